use super::{MetaNetwork, NetworkOutput, feature_size, meta_features};
use crate::thread_safe_sequential::{LinearLayer, ThreadSafeSequential, build_torso};
use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{Activation, Module, VarBuilder};
use l2rl_core::model::MetaInputs;

/// Feed forward network over the meta features: a shared relu torso with separate policy and
/// value heads.
#[derive(Debug, Clone)]
pub struct MlpMetaNetwork {
    torso: ThreadSafeSequential,
    policy_head: LinearLayer,
    value_head: LinearLayer,
    observation_size: usize,
    action_size: usize,
    device: Device,
}

impl MlpMetaNetwork {
    pub fn build(
        observation_size: usize,
        action_size: usize,
        hidden_layers: &[usize],
        vb: &VarBuilder,
        device: Device,
    ) -> Result<Self> {
        let input_dim = feature_size(observation_size, action_size);
        let torso = build_torso(input_dim, hidden_layers, Activation::Relu, vb, "torso")?;
        let torso_dim = torso.out_dim().unwrap_or(input_dim);
        let policy_head = LinearLayer::new(torso_dim, action_size, vb, "pi")?;
        let value_head = LinearLayer::new(torso_dim, 1, vb, "vf")?;
        Ok(Self {
            torso,
            policy_head,
            value_head,
            observation_size,
            action_size,
            device,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl MetaNetwork for MlpMetaNetwork {
    fn observation_size(&self) -> usize {
        self.observation_size
    }

    fn action_size(&self) -> usize {
        self.action_size
    }

    fn state_size(&self) -> Option<usize> {
        None
    }

    fn initial_state(&self, _n_envs: usize) -> Result<Option<Tensor>> {
        Ok(None)
    }

    fn forward(
        &self,
        inputs: &MetaInputs<'_>,
        _states: Option<&Tensor>,
        _n_steps: usize,
    ) -> Result<NetworkOutput> {
        let features = meta_features(inputs, self.observation_size, self.action_size)?;
        let latent = self.torso.forward(&features)?;
        let logits = self.policy_head.forward(&latent)?;
        let values = self.value_head.forward(&latent)?.squeeze(1)?;
        Ok(NetworkOutput {
            logits,
            values,
            states: None,
        })
    }
}
