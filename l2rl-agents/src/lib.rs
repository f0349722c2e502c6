pub mod meta_a2c;
pub mod runner;
