pub mod params;

pub use params::MetaA2CParams;

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Optimizer, VarMap};
use l2rl_candle_lm::{
    distributions::CategoricalDistribution,
    network::{MetaNetwork, MetaNetworkKind},
    optimizer::{OptimizerWithMaxGrad, ParamsRmsProp, RmsProp},
    tensors::{Entropy, PolicyLoss, ValueLoss},
};
use l2rl_core::{
    error::L2rlError,
    model::{ActingModel, MetaInputs, StepOutput},
    scheduler::Scheduler,
    utils::meta_batch::MetaBatch,
};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStats {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub policy_entropy: f32,
    pub learning_rate: f64,
    /// Global gradient norm before clipping
    pub grad_norm: f32,
}

/// Advantage actor critic over a meta network. Acting goes through [`ActingModel`], learning
/// through [`MetaA2C::train`].
pub struct MetaA2C<N: MetaNetwork = MetaNetworkKind> {
    network: N,
    varmap: VarMap,
    optimizer: OptimizerWithMaxGrad<RmsProp>,
    scheduler: Scheduler,
    vf_coef: f32,
    ent_coef: f32,
    nenvs: usize,
    nsteps: usize,
    device: Device,
}

impl<N: MetaNetwork> MetaA2C<N> {
    /// `varmap` must hold every trainable parameter of `network`. The learning rate schedule spans
    /// all the tasks.
    pub fn new(
        network: N,
        varmap: VarMap,
        params: &MetaA2CParams,
        nenvs: usize,
        device: Device,
    ) -> Result<Self> {
        let rms_params = ParamsRmsProp {
            lr: params.lr,
            alpha: params.alpha,
            eps: params.epsilon,
        };
        let rmsprop = RmsProp::new(varmap.all_vars(), rms_params)?;
        let optimizer = OptimizerWithMaxGrad::new(rmsprop, params.max_grad_norm, varmap.clone());
        let scheduler = Scheduler::new(
            params.lr,
            params.total_timesteps.saturating_mul(params.n_tasks),
            params.lrschedule.clone(),
        );
        Ok(Self {
            network,
            varmap,
            optimizer,
            scheduler,
            vf_coef: params.vf_coef,
            ent_coef: params.ent_coef,
            nenvs,
            nsteps: params.nsteps,
            device,
        })
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn nenvs(&self) -> usize {
        self.nenvs
    }

    pub fn nsteps(&self) -> usize {
        self.nsteps
    }

    pub fn nbatch(&self) -> usize {
        self.nenvs * self.nsteps
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn check_batch(&self, batch: &MetaBatch) -> Result<()> {
        let nbatch = self.nbatch();
        if (batch.n_envs, batch.n_steps) != (self.nenvs, self.nsteps) {
            return Err(L2rlError::shape_mismatch(
                "batch (n_envs, n_steps)",
                (self.nenvs, self.nsteps),
                (batch.n_envs, batch.n_steps),
            )
            .into());
        }
        for (what, len) in [
            ("returns", batch.returns.len()),
            ("masks", batch.masks.len()),
            ("actions", batch.actions.len()),
            ("values", batch.values.len()),
            ("prev_actions", batch.prev_actions.len()),
            ("prev_rewards", batch.prev_rewards.len()),
            ("timesteps", batch.timesteps.len()),
        ] {
            if len != nbatch {
                return Err(L2rlError::shape_mismatch(what, nbatch, len).into());
            }
        }
        let n_actions = self.network.action_size() as u32;
        if let Some(action) = batch.actions.iter().find(|a| **a >= n_actions) {
            return Err(
                L2rlError::shape_mismatch("actions", format!("< {n_actions}"), action).into(),
            );
        }
        let state_dims = batch.states.as_ref().map(|s| s.dims().to_vec());
        let expected = self.network.state_size().map(|size| vec![self.nenvs, size]);
        if state_dims != expected {
            return Err(L2rlError::shape_mismatch("states", expected, state_dims).into());
        }
        Ok(())
    }

    /// Policy gradient loss, value loss and mean entropy of `batch` under the current parameters.
    pub fn losses(&self, batch: &MetaBatch) -> Result<(PolicyLoss, ValueLoss, Entropy)> {
        self.check_batch(batch)?;
        let nbatch = self.nbatch();
        let states = batch.states.as_ref().map(Tensor::detach);
        let output = self
            .network
            .forward(&batch.meta_inputs(), states.as_ref(), self.nsteps)?;
        let distribution = CategoricalDistribution::new(output.logits);
        let neglogp = distribution.neglogp(&batch.actions)?;
        let advantages = Tensor::from_vec(batch.advantages(), nbatch, &self.device)?;
        let returns = Tensor::from_slice(&batch.returns, nbatch, &self.device)?;
        let policy_loss = PolicyLoss(advantages.mul(&neglogp)?.mean_all()?);
        let value_loss = ValueLoss(output.values.sub(&returns)?.sqr()?.mean_all()?);
        let entropy = Entropy(distribution.entropy()?.mean_all()?);
        Ok((policy_loss, value_loss, entropy))
    }

    /// One gradient step on `batch`. Consumes one batch worth of learning rate schedule steps, but
    /// only once the step went through.
    pub fn train(&mut self, batch: &MetaBatch) -> Result<TrainStats> {
        let (policy_loss, value_loss, entropy) = self.losses(batch)?;
        let loss = policy_loss
            .sub(&entropy.affine(self.ent_coef as f64, 0.)?)?
            .add(&value_loss.affine(self.vf_coef as f64, 0.)?)?;
        let learning_rate = self.scheduler.peek_advance(self.nbatch());
        let grad_norm = self.optimizer.backward_step(&loss, learning_rate)?;
        self.scheduler.advance(self.nbatch());
        let stats = TrainStats {
            policy_loss: policy_loss.to_scalar::<f32>()?,
            value_loss: value_loss.to_scalar::<f32>()?,
            policy_entropy: entropy.to_scalar::<f32>()?,
            learning_rate,
            grad_norm,
        };
        debug!(?stats, "train step");
        Ok(stats)
    }

    /// Writes the parameter values as safetensors. Optimizer slots and the schedule position are
    /// not part of the checkpoint.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path)?;
        Ok(())
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.load(path)?;
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.optimizer.learning_rate()
    }
}

impl<N: MetaNetwork> ActingModel for MetaA2C<N> {
    fn initial_state(&self, n_envs: usize) -> Result<Option<Tensor>> {
        self.network.initial_state(n_envs)
    }

    fn step(&self, inputs: &MetaInputs<'_>, states: Option<&Tensor>) -> Result<StepOutput> {
        let output = self.network.forward(inputs, states, 1)?;
        let distribution = CategoricalDistribution::new(output.logits);
        let actions = distribution.sample()?;
        let neglogps = distribution.neglogp(&actions)?.to_vec1()?;
        Ok(StepOutput {
            actions,
            values: output.values.to_vec1()?,
            states: output.states.map(|s| s.detach()),
            neglogps,
        })
    }

    fn value(&self, inputs: &MetaInputs<'_>, states: Option<&Tensor>) -> Result<Vec<f32>> {
        let output = self.network.forward(inputs, states, 1)?;
        Ok(output.values.to_vec1()?)
    }
}
