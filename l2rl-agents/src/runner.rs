use anyhow::Result;
use candle_core::Tensor;
use l2rl_core::{
    env::{InfoRecord, VecEnv, VecStep},
    error::L2rlError,
    model::{ActingModel, MetaInputs},
    utils::{
        meta_batch::{MetaBatch, swap_and_flatten, swap_and_flatten_tensors},
        returns::bootstrapped_returns,
    },
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// When the timestep input goes back to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimestepReset {
    /// At the end of every episode, and at the start of every task
    #[default]
    OnEpisodeEnd,
    /// Only at the start of every task
    OnTaskEnd,
}

impl FromStr for TimestepReset {
    type Err = L2rlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on-episode-end" => Ok(Self::OnEpisodeEnd),
            "on-task-end" => Ok(Self::OnTaskEnd),
            other => Err(L2rlError::configuration(format!(
                "unknown timestep reset `{other}`, expected `on-episode-end` or `on-task-end`"
            ))),
        }
    }
}

/// Collects fixed length rollouts from a vectorized environment for one task. The recurrent
/// state and the meta inputs (previous action, previous reward, timestep) are carried from one
/// rollout to the next and start from zero when the runner is created.
pub struct Runner<'e, V: VecEnv> {
    env: &'e mut V,
    nsteps: usize,
    gamma: f32,
    timestep_reset: TimestepReset,
    observations: Tensor,
    states: Option<Tensor>,
    dones: Vec<bool>,
    prev_actions: Vec<u32>,
    prev_rewards: Vec<f32>,
    timesteps: Vec<u32>,
}

impl<'e, V: VecEnv> Runner<'e, V> {
    pub fn new<M: ActingModel>(
        env: &'e mut V,
        model: &M,
        nsteps: usize,
        gamma: f32,
        timestep_reset: TimestepReset,
    ) -> Result<Self> {
        let n_envs = env.num_envs();
        let observations = env.reset()?;
        let states = model.initial_state(n_envs)?;
        Ok(Self {
            env,
            nsteps,
            gamma,
            timestep_reset,
            observations,
            states,
            dones: vec![false; n_envs],
            prev_actions: vec![0; n_envs],
            prev_rewards: vec![0.; n_envs],
            timesteps: vec![0; n_envs],
        })
    }

    pub fn states(&self) -> Option<&Tensor> {
        self.states.as_ref()
    }

    pub fn prev_actions(&self) -> &[u32] {
        &self.prev_actions
    }

    pub fn prev_rewards(&self) -> &[f32] {
        &self.prev_rewards
    }

    pub fn timesteps(&self) -> &[u32] {
        &self.timesteps
    }

    fn meta_inputs(&self) -> MetaInputs<'_> {
        MetaInputs {
            observations: &self.observations,
            prev_actions: &self.prev_actions,
            prev_rewards: &self.prev_rewards,
            timesteps: &self.timesteps,
            dones: &self.dones,
        }
    }

    fn advance(&mut self, actions: Vec<u32>, step: VecStep) {
        let VecStep {
            observations,
            rewards,
            dones,
            ..
        } = step;
        for (timestep, done) in self.timesteps.iter_mut().zip(&dones) {
            *timestep = match (self.timestep_reset, done) {
                (TimestepReset::OnEpisodeEnd, true) => 0,
                _ => *timestep + 1,
            };
        }
        self.observations = observations;
        self.prev_actions = actions;
        self.prev_rewards = rewards;
        self.dones = dones;
    }

    pub fn run<M: ActingModel>(&mut self, model: &M) -> Result<MetaBatch> {
        let n_envs = self.dones.len();
        let batch_states = self.states.clone();
        let mut mb_observations = Vec::with_capacity(self.nsteps);
        let mut mb_actions = Vec::with_capacity(self.nsteps);
        let mut mb_values = Vec::with_capacity(self.nsteps);
        let mut mb_masks = Vec::with_capacity(self.nsteps);
        let mut mb_prev_actions = Vec::with_capacity(self.nsteps);
        let mut mb_prev_rewards = Vec::with_capacity(self.nsteps);
        let mut mb_timesteps = Vec::with_capacity(self.nsteps);
        let mut mb_rewards = Vec::with_capacity(self.nsteps);
        let mut mb_dones = Vec::with_capacity(self.nsteps);
        let mut infos: Vec<InfoRecord> = Vec::with_capacity(self.nsteps * n_envs);
        for _ in 0..self.nsteps {
            let output = model.step(&self.meta_inputs(), self.states.as_ref())?;
            if output.actions.len() != n_envs || output.values.len() != n_envs {
                return Err(L2rlError::shape_mismatch(
                    "step output",
                    n_envs,
                    (output.actions.len(), output.values.len()),
                )
                .into());
            }
            mb_observations.push(self.observations.clone());
            mb_actions.push(output.actions.clone());
            mb_values.push(output.values);
            mb_masks.push(self.dones.clone());
            mb_prev_actions.push(self.prev_actions.clone());
            mb_prev_rewards.push(self.prev_rewards.clone());
            mb_timesteps.push(self.timesteps.clone());

            let mut step = self.env.step(&output.actions)?;
            infos.append(&mut step.infos);
            mb_rewards.push(step.rewards.clone());
            mb_dones.push(step.dones.clone());
            self.states = output.states;
            self.advance(output.actions, step);
        }

        let last_values = if self.gamma > 0. {
            Some(model.value(&self.meta_inputs(), self.states.as_ref())?)
        } else {
            None
        };
        let mut returns = Vec::with_capacity(n_envs * self.nsteps);
        for env in 0..n_envs {
            let rewards: Vec<f32> = mb_rewards.iter().map(|r: &Vec<f32>| r[env]).collect();
            match &last_values {
                Some(last_values) => {
                    let dones: Vec<bool> = mb_dones.iter().map(|d: &Vec<bool>| d[env]).collect();
                    returns.extend(bootstrapped_returns(
                        &rewards,
                        &dones,
                        last_values[env],
                        self.gamma,
                    ));
                }
                None => returns.extend(rewards),
            }
        }

        Ok(MetaBatch {
            n_envs,
            n_steps: self.nsteps,
            observations: swap_and_flatten_tensors(&mb_observations)?,
            states: batch_states,
            returns,
            masks: swap_and_flatten(&mb_masks),
            actions: swap_and_flatten(&mb_actions),
            values: swap_and_flatten(&mb_values),
            prev_actions: swap_and_flatten(&mb_prev_actions),
            prev_rewards: swap_and_flatten(&mb_prev_rewards),
            timesteps: swap_and_flatten(&mb_timesteps),
            infos,
        })
    }
}
