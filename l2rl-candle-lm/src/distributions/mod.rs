pub mod categorical_distribution;

pub use categorical_distribution::CategoricalDistribution;
