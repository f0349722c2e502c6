use anyhow::Result;
use candle_core::Tensor;

/// Everything the policy is conditioned on besides the recurrent state. All slices are indexed
/// by batch row, the same way as the rows of `observations`.
#[derive(Debug, Clone, Copy)]
pub struct MetaInputs<'a> {
    pub observations: &'a Tensor,
    pub prev_actions: &'a [u32],
    pub prev_rewards: &'a [f32],
    pub timesteps: &'a [u32],
    /// Episode ended before this row. Recurrent models reset their state on these rows.
    pub dones: &'a [bool],
}

impl MetaInputs<'_> {
    pub fn len(&self) -> usize {
        self.prev_actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prev_actions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub actions: Vec<u32>,
    pub values: Vec<f32>,
    pub states: Option<Tensor>,
    pub neglogps: Vec<f32>,
}

/// The acting side of a model, the part the runner calls back into on every environment step.
pub trait ActingModel {
    /// Recurrent state for `n_envs` fresh environments, `None` for feed forward models.
    fn initial_state(&self, n_envs: usize) -> Result<Option<Tensor>>;

    fn step(&self, inputs: &MetaInputs<'_>, states: Option<&Tensor>) -> Result<StepOutput>;

    fn value(&self, inputs: &MetaInputs<'_>, states: Option<&Tensor>) -> Result<Vec<f32>>;
}
