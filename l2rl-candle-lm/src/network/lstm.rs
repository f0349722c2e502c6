use super::{MetaNetwork, NetworkOutput, feature_size, meta_features};
use crate::thread_safe_sequential::LinearLayer;
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::{LSTM, LSTMConfig, LSTMState, RNN, lstm};
use candle_nn::{Module, VarBuilder};
use l2rl_core::{error::L2rlError, model::MetaInputs};

/// Single layer LSTM over the meta features. The recurrent state is `[h, c]` concatenated along
/// the feature axis, so it is `[n_envs, 2 * hidden]`.
#[derive(Debug, Clone)]
pub struct LstmMetaNetwork {
    lstm: LSTM,
    policy_head: LinearLayer,
    value_head: LinearLayer,
    observation_size: usize,
    action_size: usize,
    hidden: usize,
    device: Device,
}

impl LstmMetaNetwork {
    pub fn build(
        observation_size: usize,
        action_size: usize,
        hidden: usize,
        vb: &VarBuilder,
        device: Device,
    ) -> Result<Self> {
        let input_dim = feature_size(observation_size, action_size);
        let lstm = lstm(input_dim, hidden, LSTMConfig::default(), vb.pp("lstm"))?;
        let policy_head = LinearLayer::new(hidden, action_size, vb, "pi")?;
        let value_head = LinearLayer::new(hidden, 1, vb, "vf")?;
        Ok(Self {
            lstm,
            policy_head,
            value_head,
            observation_size,
            action_size,
            hidden,
            device,
        })
    }

    fn split_state(&self, states: Option<&Tensor>, n_envs: usize) -> Result<(Tensor, Tensor)> {
        let expected = [n_envs, 2 * self.hidden];
        let Some(states) = states else {
            return Err(L2rlError::shape_mismatch("states", expected, "none").into());
        };
        if states.dims() != expected.as_slice() {
            return Err(L2rlError::shape_mismatch("states", expected, states.dims()).into());
        }
        let h = states.narrow(1, 0, self.hidden)?;
        let c = states.narrow(1, self.hidden, self.hidden)?;
        Ok((h, c))
    }
}

impl MetaNetwork for LstmMetaNetwork {
    fn observation_size(&self) -> usize {
        self.observation_size
    }

    fn action_size(&self) -> usize {
        self.action_size
    }

    fn state_size(&self) -> Option<usize> {
        Some(2 * self.hidden)
    }

    fn initial_state(&self, n_envs: usize) -> Result<Option<Tensor>> {
        let zeros = Tensor::zeros((n_envs, 2 * self.hidden), DType::F32, &self.device)?;
        Ok(Some(zeros))
    }

    fn forward(
        &self,
        inputs: &MetaInputs<'_>,
        states: Option<&Tensor>,
        n_steps: usize,
    ) -> Result<NetworkOutput> {
        let n = inputs.len();
        if n_steps == 0 || n % n_steps != 0 {
            return Err(
                L2rlError::shape_mismatch("batch", format!("multiple of {n_steps}"), n).into(),
            );
        }
        let n_envs = n / n_steps;
        let (mut h, mut c) = self.split_state(states, n_envs)?;
        let features = meta_features(inputs, self.observation_size, self.action_size)?;
        let feature_dim = features.dim(1)?;
        let sequence = features.reshape((n_envs, n_steps, feature_dim))?;
        let mut outputs = Vec::with_capacity(n_steps);
        for step in 0..n_steps {
            // zero the state of environments whose episode ended before this step
            let keep: Vec<f32> = (0..n_envs)
                .map(|env| if inputs.dones[env * n_steps + step] { 0. } else { 1. })
                .collect();
            let keep = Tensor::from_vec(keep, (n_envs, 1), &self.device)?;
            h = h.broadcast_mul(&keep)?;
            c = c.broadcast_mul(&keep)?;
            let xs = sequence.narrow(1, step, 1)?.squeeze(1)?.contiguous()?;
            let state = self.lstm.step(&xs, &LSTMState::new(h, c))?;
            h = state.h().clone();
            c = state.c().clone();
            outputs.push(h.clone());
        }
        let latent = Tensor::stack(&outputs, 1)?.reshape((n, self.hidden))?;
        let logits = self.policy_head.forward(&latent)?;
        let values = self.value_head.forward(&latent)?.squeeze(1)?;
        Ok(NetworkOutput {
            logits,
            values,
            states: Some(Tensor::cat(&[&h, &c], 1)?),
        })
    }
}
