use crate::hooks::{LoggingHooks, TaskLoopHooks, UpdateReport};
use anyhow::Result;
use l2rl_agents::{
    meta_a2c::{MetaA2C, MetaA2CParams},
    runner::Runner,
};
use l2rl_candle_lm::network::MetaNetwork;
use l2rl_core::{env::VecEnv, error::L2rlError};
use std::{path::Path, time::Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLoopState {
    Idle,
    /// 1 based task index
    RunningTask(usize),
    Finished,
}

/// Outer loop of meta training: `n_tasks` tasks, each a fresh runner over the same environment
/// and the same model, so parameters and optimizer state carry over while the recurrent state
/// and the meta inputs start from zero.
pub struct TaskLoop<V: VecEnv, N: MetaNetwork, H: TaskLoopHooks<N>> {
    pub env: V,
    pub model: MetaA2C<N>,
    pub hooks: H,
    pub params: MetaA2CParams,
    state: TaskLoopState,
}

impl<V: VecEnv, N: MetaNetwork, H: TaskLoopHooks<N>> TaskLoop<V, N, H> {
    pub fn new(env: V, model: MetaA2C<N>, hooks: H, params: MetaA2CParams) -> Result<Self> {
        params.validate()?;
        if env.num_envs() != model.nenvs() {
            return Err(
                L2rlError::shape_mismatch("number of envs", model.nenvs(), env.num_envs()).into(),
            );
        }
        if params.nsteps != model.nsteps() {
            return Err(L2rlError::shape_mismatch("nsteps", model.nsteps(), params.nsteps).into());
        }
        Ok(Self {
            env,
            model,
            hooks,
            params,
            state: TaskLoopState::Idle,
        })
    }

    pub fn state(&self) -> TaskLoopState {
        self.state
    }

    pub fn into_parts(self) -> (V, MetaA2C<N>, H) {
        (self.env, self.model, self.hooks)
    }

    /// Number of updates of a single task. The remainder of `total_timesteps` that does not fill
    /// a whole batch is not run.
    pub fn nupdates(&self) -> usize {
        self.params.total_timesteps / self.model.nbatch()
    }

    pub fn run(&mut self) -> Result<()> {
        if self.state != TaskLoopState::Idle {
            return Err(L2rlError::configuration(format!(
                "the task loop can only run once, it is {:?}",
                self.state
            ))
            .into());
        }
        let nbatch = self.model.nbatch();
        let nupdates = self.nupdates();
        info!(
            nenvs = self.model.nenvs(),
            nsteps = self.model.nsteps(),
            total_timesteps = self.params.total_timesteps,
            nbatch,
            nupdates,
            n_tasks = self.params.n_tasks,
            "meta training"
        );
        if nupdates == 0 {
            warn!(
                total_timesteps = self.params.total_timesteps,
                nbatch, "total_timesteps is smaller than a batch, no update will run"
            );
        }
        self.hooks.init_hook(&self.params)?;
        for task in 1..=self.params.n_tasks {
            self.state = TaskLoopState::RunningTask(task);
            self.hooks.task_start_hook(task, &self.model)?;
            let mut runner = Runner::new(
                &mut self.env,
                &self.model,
                self.params.nsteps,
                self.params.gamma,
                self.params.timestep_reset,
            )?;
            let start = Instant::now();
            for update in 1..=nupdates {
                let batch = runner.run(&self.model)?;
                let stats = self.model.train(&batch)?;
                self.hooks.post_update_hook(&UpdateReport {
                    task,
                    update,
                    nupdates,
                    nbatch,
                    elapsed: start.elapsed(),
                    stats,
                    batch: &batch,
                })?;
            }
            drop(runner);
            if self.params.advance_env_task && !self.env.next_task()? {
                warn!(task, "advance_env_task is set but the environment has no tasks");
            }
            self.env.save_db_experiments()?;
            self.hooks.task_end_hook(task, &self.model)?;
        }
        self.state = TaskLoopState::Finished;
        self.hooks.shutdown_hook()
    }
}

/// Trains `model` on `env` for `params.n_tasks` tasks with the default logging hooks.
pub fn learn<V: VecEnv, N: MetaNetwork>(
    env: V,
    model: MetaA2C<N>,
    params: MetaA2CParams,
    log_dir: Option<&Path>,
) -> Result<MetaA2C<N>> {
    let mut hooks = LoggingHooks::new(params.log_interval);
    if let Some(log_dir) = log_dir {
        hooks = hooks.with_log_dir(log_dir);
    }
    let mut task_loop = TaskLoop::new(env, model, hooks, params)?;
    task_loop.run()?;
    let (_, model, _) = task_loop.into_parts();
    Ok(model)
}
