pub mod meta_batch;
pub mod returns;
pub mod stats;
