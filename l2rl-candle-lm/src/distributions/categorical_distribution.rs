use anyhow::Result;
use candle_core::{Error, Tensor};
use candle_nn::ops::{log_softmax, softmax};
use l2rl_core::rng::RNG;
use rand::distr::Distribution as RandDistributiion;
use rand::distr::weighted::WeightedIndex;

/// A batch of categorical distributions, one per row of `logits`.
#[derive(Clone, Debug)]
pub struct CategoricalDistribution {
    logits: Tensor,
}

impl CategoricalDistribution {
    /// `logits` has shape `[batch, n_actions]`.
    pub fn new(logits: Tensor) -> Self {
        Self { logits }
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn sample(&self) -> Result<Vec<u32>> {
        let action_probs: Vec<Vec<f32>> = softmax(&self.logits, 1)?.to_vec2()?;
        action_probs
            .iter()
            .map(|probs| {
                let distribution = WeightedIndex::new(probs).map_err(Error::wrap)?;
                let action = RNG.with_borrow_mut(|rng| distribution.sample(rng));
                Ok(action as u32)
            })
            .collect()
    }

    /// `-log p(action)` for every row.
    pub fn neglogp(&self, actions: &[u32]) -> Result<Tensor> {
        let actions = Tensor::from_slice(actions, (actions.len(), 1), self.logits.device())?;
        let log_probs = log_softmax(&self.logits, 1)?;
        Ok(log_probs.gather(&actions, 1)?.squeeze(1)?.neg()?)
    }

    pub fn entropy(&self) -> Result<Tensor> {
        let log_probs = log_softmax(&self.logits, 1)?;
        let probs = log_probs.exp()?;
        Ok(probs.mul(&log_probs)?.sum(1)?.neg()?)
    }
}
