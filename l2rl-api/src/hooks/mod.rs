pub mod logging;

pub use logging::LoggingHooks;

use anyhow::Result;
use l2rl_agents::meta_a2c::{MetaA2C, MetaA2CParams, TrainStats};
use l2rl_candle_lm::network::MetaNetwork;
use l2rl_core::utils::meta_batch::MetaBatch;
use std::time::Duration;

/// What a single inner update of the task loop produced.
#[derive(Debug, Clone, Copy)]
pub struct UpdateReport<'a> {
    /// 1 based
    pub task: usize,
    /// 1 based, restarts with every task
    pub update: usize,
    pub nupdates: usize,
    pub nbatch: usize,
    /// Time since the task started
    pub elapsed: Duration,
    pub stats: TrainStats,
    pub batch: &'a MetaBatch,
}

impl UpdateReport<'_> {
    pub fn total_timesteps(&self) -> usize {
        self.update * self.nbatch
    }

    pub fn fps(&self) -> usize {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0. {
            (self.total_timesteps() as f64 / secs) as usize
        } else {
            0
        }
    }
}

pub trait TaskLoopHooks<N: MetaNetwork> {
    fn init_hook(&mut self, params: &MetaA2CParams) -> Result<()>;

    fn task_start_hook(&mut self, task: usize, model: &MetaA2C<N>) -> Result<()>;

    fn post_update_hook(&mut self, report: &UpdateReport<'_>) -> Result<()>;

    fn task_end_hook(&mut self, task: usize, model: &MetaA2C<N>) -> Result<()>;

    fn shutdown_hook(&mut self) -> Result<()>;
}
