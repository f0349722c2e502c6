use anyhow::Result;
use candle_core::{Device, Tensor};
use l2rl_core::{
    env::{Env, EnvironmentDescription, InfoRecord, SequentialVecEnv, SnapShot, Space},
    model::{ActingModel, MetaInputs, StepOutput},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Always takes the same action and predicts the same value.
pub struct FixedActionModel {
    pub action: u32,
    pub value: f32,
}

impl ActingModel for FixedActionModel {
    fn initial_state(&self, _n_envs: usize) -> Result<Option<Tensor>> {
        Ok(None)
    }

    fn step(&self, inputs: &MetaInputs<'_>, _states: Option<&Tensor>) -> Result<StepOutput> {
        let n = inputs.len();
        Ok(StepOutput {
            actions: vec![self.action; n],
            values: vec![self.value; n],
            states: None,
            neglogps: vec![0.; n],
        })
    }

    fn value(&self, inputs: &MetaInputs<'_>, _states: Option<&Tensor>) -> Result<Vec<f32>> {
        Ok(vec![self.value; inputs.len()])
    }
}

/// Counts calls of the task hooks across every clone of an environment.
#[derive(Debug, Clone, Default)]
pub struct HookCounters {
    pub next_task: Arc<AtomicUsize>,
    pub save_db: Arc<AtomicUsize>,
}

impl HookCounters {
    pub fn next_task_calls(&self) -> usize {
        self.next_task.load(Ordering::SeqCst)
    }

    pub fn save_db_calls(&self) -> usize {
        self.save_db.load(Ordering::SeqCst)
    }
}

/// Pays `reward` for every action, the episode ends after `episode_len` steps. Observations are
/// the step count within the episode.
pub struct ConstantRewardEnv {
    pub reward: f32,
    pub episode_len: usize,
    pub n_actions: usize,
    t: usize,
    counters: HookCounters,
}

impl ConstantRewardEnv {
    pub fn new(reward: f32, episode_len: usize) -> Self {
        Self {
            reward,
            episode_len,
            n_actions: 2,
            t: 0,
            counters: HookCounters::default(),
        }
    }

    pub fn with_counters(mut self, counters: HookCounters) -> Self {
        self.counters = counters;
        self
    }
}

impl Env for ConstantRewardEnv {
    fn reset(&mut self, _seed: u64) -> Result<Vec<f32>> {
        self.t = 0;
        Ok(vec![0.])
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        self.t += 1;
        let info = InfoRecord::from([
            ("t".to_string(), self.t.into()),
            ("action".to_string(), action.into()),
            ("reward".to_string(), self.reward.into()),
        ]);
        Ok(SnapShot {
            state: vec![self.t as f32],
            reward: self.reward,
            terminated: self.t >= self.episode_len,
            trancuated: false,
            info,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continous_from_dims(vec![1]),
            Space::Discrete(self.n_actions),
        )
    }

    fn next_task(&mut self) -> Result<bool> {
        self.counters.next_task.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        self.counters.save_db.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

pub fn constant_reward_vec_env(
    n_envs: usize,
    reward: f32,
    episode_len: usize,
    counters: &HookCounters,
) -> Result<SequentialVecEnv<ConstantRewardEnv>> {
    let envs = (0..n_envs)
        .map(|_| ConstantRewardEnv::new(reward, episode_len).with_counters(counters.clone()))
        .collect();
    SequentialVecEnv::new(envs, Device::Cpu)
}
