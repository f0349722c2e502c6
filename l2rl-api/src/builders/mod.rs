pub mod meta_a2c;

pub use meta_a2c::MetaA2CBuilder;
