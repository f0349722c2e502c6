pub mod env;
pub mod error;
pub mod model;
pub mod rng;
pub mod scheduler;
pub mod utils;
