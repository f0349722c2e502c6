use crate::{env::InfoRecord, model::MetaInputs};
use anyhow::Result;
use candle_core::Tensor;

/// One rollout of `n_steps` steps over `n_envs` environments. Every per step field is laid out
/// environment major: row `env * n_steps + step`.
#[derive(Debug, Clone)]
pub struct MetaBatch {
    pub n_envs: usize,
    pub n_steps: usize,
    /// `[n_envs * n_steps, observation_size]`
    pub observations: Tensor,
    /// Recurrent state at the start of the rollout, `[n_envs, state_size]`
    pub states: Option<Tensor>,
    /// Discounted (and possibly bootstrapped) returns
    pub returns: Vec<f32>,
    /// Done flag observed before each step
    pub masks: Vec<bool>,
    pub actions: Vec<u32>,
    pub values: Vec<f32>,
    pub prev_actions: Vec<u32>,
    pub prev_rewards: Vec<f32>,
    pub timesteps: Vec<u32>,
    /// Info records in the order the environments reported them (time major)
    pub infos: Vec<InfoRecord>,
}

impl MetaBatch {
    pub fn len(&self) -> usize {
        self.n_envs * self.n_steps
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The inputs exactly as the acting model saw them during the rollout.
    pub fn meta_inputs(&self) -> MetaInputs<'_> {
        MetaInputs {
            observations: &self.observations,
            prev_actions: &self.prev_actions,
            prev_rewards: &self.prev_rewards,
            timesteps: &self.timesteps,
            dones: &self.masks,
        }
    }

    pub fn advantages(&self) -> Vec<f32> {
        self.returns
            .iter()
            .zip(&self.values)
            .map(|(ret, value)| ret - value)
            .collect()
    }
}

/// `[n_steps][n_envs]` to `[n_envs * n_steps]`, environment major.
pub fn swap_and_flatten<T: Clone>(steps: &[Vec<T>]) -> Vec<T> {
    let n_steps = steps.len();
    let n_envs = steps.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(n_envs * n_steps);
    for env in 0..n_envs {
        for step in steps {
            flat.push(step[env].clone());
        }
    }
    flat
}

/// Same as [`swap_and_flatten`] for per step `[n_envs, ...]` tensors.
pub fn swap_and_flatten_tensors(steps: &[Tensor]) -> Result<Tensor> {
    let stacked = Tensor::stack(steps, 1)?;
    let dims = stacked.dims().to_vec();
    let mut flat_dims = vec![dims[0] * dims[1]];
    flat_dims.extend_from_slice(&dims[2..]);
    Ok(stacked.reshape(flat_dims)?)
}
