use crate::{error::L2rlError, rng::next_seed};
use anyhow::Result;
use candle_core::{Device, Tensor};
use rayon::prelude::*;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Space {
    Discrete(usize),
    Continous {
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
        size: usize,
    },
}

impl Space {
    pub fn continous_from_dims(dims: Vec<usize>) -> Self {
        Self::Continous {
            min: None,
            max: None,
            size: dims.iter().product(),
        }
    }

    pub fn size(&self) -> usize {
        match &self {
            Self::Discrete(size) => *size,
            Self::Continous { size, .. } => *size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentDescription {
    pub observation_space: Space,
    pub action_space: Space,
}

impl EnvironmentDescription {
    pub fn new(observation_space: Space, action_space: Space) -> Self {
        Self {
            observation_space,
            action_space,
        }
    }

    pub fn action_size(&self) -> usize {
        self.action_space.size()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_space.size()
    }
}

/// A single value of the per step info record an environment reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for InfoValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for InfoValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for InfoValue {
    fn from(value: u32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<usize> for InfoValue {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f32> for InfoValue {
    fn from(value: f32) -> Self {
        Self::Float(value as f64)
    }
}

impl From<f64> for InfoValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for InfoValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for InfoValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Keys are kept sorted so that the episode log columns are stable between runs.
pub type InfoRecord = BTreeMap<String, InfoValue>;

pub struct SnapShot {
    pub state: Vec<f32>,
    pub reward: f32,
    pub terminated: bool,
    pub trancuated: bool,
    pub info: InfoRecord,
}

impl SnapShot {
    pub fn done(&self) -> bool {
        self.terminated || self.trancuated
    }
}

/// A single environment instance with a discrete action space.
pub trait Env: Send {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>>;
    fn step(&mut self, action: u32) -> Result<SnapShot>;
    fn env_description(&self) -> EnvironmentDescription;

    /// Switches the environment to a new task. Returns false if the environment has no notion of
    /// tasks.
    fn next_task(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Persists whatever experiment database the environment keeps. Returns false if there is
    /// none.
    fn save_db_experiments(&mut self) -> Result<bool> {
        Ok(false)
    }
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        (**self).reset(seed)
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        (**self).step(action)
    }

    fn env_description(&self) -> EnvironmentDescription {
        (**self).env_description()
    }

    fn next_task(&mut self) -> Result<bool> {
        (**self).next_task()
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        (**self).save_db_experiments()
    }
}

pub struct VecStep {
    /// `[num_envs, observation_size]`, already reset for the environments that are done
    pub observations: Tensor,
    pub rewards: Vec<f32>,
    pub dones: Vec<bool>,
    pub infos: Vec<InfoRecord>,
}

/// `num_envs` environments stepped in lockstep. Environments that finish an episode are reset
/// automatically and report the first observation of the next episode.
pub trait VecEnv {
    fn num_envs(&self) -> usize;
    fn env_description(&self) -> EnvironmentDescription;
    fn reset(&mut self) -> Result<Tensor>;
    fn step(&mut self, actions: &[u32]) -> Result<VecStep>;

    fn next_task(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        Ok(false)
    }
}

struct EnvStep {
    state: Vec<f32>,
    reward: f32,
    done: bool,
    info: InfoRecord,
}

fn step_with_reset<E: Env>(env: &mut E, env_idx: usize, action: u32, seed: u64) -> Result<EnvStep> {
    let snapshot = env
        .step(action)
        .map_err(|err| L2rlError::environment(env_idx, &err))?;
    let done = snapshot.done();
    let SnapShot {
        mut state,
        reward,
        info,
        ..
    } = snapshot;
    if done {
        debug!(env_idx, "episode finished, resetting");
        state = env
            .reset(seed)
            .map_err(|err| L2rlError::environment(env_idx, &err))?;
    }
    Ok(EnvStep {
        state,
        reward,
        done,
        info,
    })
}

fn observations_to_tensor(
    observations: Vec<Vec<f32>>,
    observation_size: usize,
    device: &Device,
) -> Result<Tensor> {
    let n_envs = observations.len();
    let mut flat = Vec::with_capacity(n_envs * observation_size);
    for obs in observations {
        if obs.len() != observation_size {
            return Err(L2rlError::shape_mismatch("observation", observation_size, obs.len()).into());
        }
        flat.extend(obs);
    }
    Ok(Tensor::from_vec(flat, (n_envs, observation_size), device)?)
}

fn check_actions(actions: &[u32], n_envs: usize) -> Result<()> {
    if actions.len() != n_envs {
        return Err(L2rlError::shape_mismatch("actions", n_envs, actions.len()).into());
    }
    Ok(())
}

fn collect_step(
    steps: Vec<EnvStep>,
    observation_size: usize,
    device: &Device,
) -> Result<VecStep> {
    let mut observations = Vec::with_capacity(steps.len());
    let mut rewards = Vec::with_capacity(steps.len());
    let mut dones = Vec::with_capacity(steps.len());
    let mut infos = Vec::with_capacity(steps.len());
    for step in steps {
        observations.push(step.state);
        rewards.push(step.reward);
        dones.push(step.done);
        infos.push(step.info);
    }
    Ok(VecStep {
        observations: observations_to_tensor(observations, observation_size, device)?,
        rewards,
        dones,
        infos,
    })
}

/// Steps the environments one after the other on the calling thread.
pub struct SequentialVecEnv<E: Env> {
    envs: Vec<E>,
    description: EnvironmentDescription,
    device: Device,
}

impl<E: Env> SequentialVecEnv<E> {
    pub fn new(envs: Vec<E>, device: Device) -> Result<Self> {
        let description = shared_description(&envs)?;
        Ok(Self {
            envs,
            description,
            device,
        })
    }

    pub fn envs(&self) -> &[E] {
        &self.envs
    }
}

impl<E: Env> VecEnv for SequentialVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.description.clone()
    }

    fn reset(&mut self) -> Result<Tensor> {
        let observations = self
            .envs
            .iter_mut()
            .enumerate()
            .map(|(env_idx, env)| {
                env.reset(next_seed())
                    .map_err(|err| anyhow::Error::from(L2rlError::environment(env_idx, &err)))
            })
            .collect::<Result<Vec<_>>>()?;
        observations_to_tensor(observations, self.description.observation_size(), &self.device)
    }

    fn step(&mut self, actions: &[u32]) -> Result<VecStep> {
        check_actions(actions, self.envs.len())?;
        let steps = self
            .envs
            .iter_mut()
            .zip(actions)
            .enumerate()
            .map(|(env_idx, (env, action))| step_with_reset(env, env_idx, *action, next_seed()))
            .collect::<Result<Vec<_>>>()?;
        collect_step(steps, self.description.observation_size(), &self.device)
    }

    fn next_task(&mut self) -> Result<bool> {
        let mut supported = false;
        for env in self.envs.iter_mut() {
            supported |= env.next_task()?;
        }
        Ok(supported)
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        let mut supported = false;
        for env in self.envs.iter_mut() {
            supported |= env.save_db_experiments()?;
        }
        Ok(supported)
    }
}

/// Steps the environments on the rayon thread pool. A step only returns once every environment
/// has produced its transition.
pub struct ParallelVecEnv<E: Env> {
    envs: Vec<E>,
    description: EnvironmentDescription,
    device: Device,
}

impl<E: Env> ParallelVecEnv<E> {
    pub fn new(envs: Vec<E>, device: Device) -> Result<Self> {
        let description = shared_description(&envs)?;
        Ok(Self {
            envs,
            description,
            device,
        })
    }
}

impl<E: Env> VecEnv for ParallelVecEnv<E> {
    fn num_envs(&self) -> usize {
        self.envs.len()
    }

    fn env_description(&self) -> EnvironmentDescription {
        self.description.clone()
    }

    fn reset(&mut self) -> Result<Tensor> {
        // seeds are drawn on the calling thread, the rng is thread local
        let seeds: Vec<u64> = (0..self.envs.len()).map(|_| next_seed()).collect();
        let observations = self
            .envs
            .par_iter_mut()
            .zip(seeds.par_iter())
            .enumerate()
            .map(|(env_idx, (env, seed))| {
                env.reset(*seed)
                    .map_err(|err| anyhow::Error::from(L2rlError::environment(env_idx, &err)))
            })
            .collect::<Result<Vec<_>>>()?;
        observations_to_tensor(observations, self.description.observation_size(), &self.device)
    }

    fn step(&mut self, actions: &[u32]) -> Result<VecStep> {
        check_actions(actions, self.envs.len())?;
        let seeds: Vec<u64> = (0..self.envs.len()).map(|_| next_seed()).collect();
        let steps = self
            .envs
            .par_iter_mut()
            .zip(actions.par_iter())
            .zip(seeds.par_iter())
            .enumerate()
            .map(|(env_idx, ((env, action), seed))| step_with_reset(env, env_idx, *action, *seed))
            .collect::<Result<Vec<_>>>()?;
        collect_step(steps, self.description.observation_size(), &self.device)
    }

    fn next_task(&mut self) -> Result<bool> {
        let supported = self
            .envs
            .par_iter_mut()
            .map(|env| env.next_task())
            .collect::<Result<Vec<_>>>()?;
        Ok(supported.into_iter().any(|s| s))
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        let mut supported = false;
        for env in self.envs.iter_mut() {
            supported |= env.save_db_experiments()?;
        }
        Ok(supported)
    }
}

fn shared_description<E: Env>(envs: &[E]) -> Result<EnvironmentDescription> {
    let Some(first) = envs.first() else {
        return Err(L2rlError::configuration("a vectorized env needs at least one env").into());
    };
    let description = first.env_description();
    if !matches!(description.action_space, Space::Discrete(_)) {
        return Err(L2rlError::configuration("only discrete action spaces are supported").into());
    }
    for env in &envs[1..] {
        let other = env.env_description();
        if other != description {
            return Err(L2rlError::shape_mismatch("environment description", &description, other).into());
        }
    }
    Ok(description)
}
