pub mod bandit;
pub mod registry;

pub use bandit::{BanditDifficulty, DependentBandit};
pub use registry::{BoxedEnv, EnvRegistry};
