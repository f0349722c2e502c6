pub mod lstm;
pub mod mlp;

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use enum_dispatch::enum_dispatch;
use l2rl_core::{
    env::{EnvironmentDescription, Space},
    error::L2rlError,
    model::MetaInputs,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub use lstm::LstmMetaNetwork;
pub use mlp::MlpMetaNetwork;

#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// `[batch, n_actions]`
    pub logits: Tensor,
    /// `[batch]`
    pub values: Tensor,
    /// Recurrent state after the last step, `[n_envs, state_size]`
    pub states: Option<Tensor>,
}

/// Policy and value network conditioned on the observation, the previous action, the previous
/// reward and the timestep within the episode.
#[enum_dispatch]
pub trait MetaNetwork {
    fn observation_size(&self) -> usize;

    fn action_size(&self) -> usize;

    /// Width of the recurrent state, `None` for feed forward networks.
    fn state_size(&self) -> Option<usize>;

    fn initial_state(&self, n_envs: usize) -> Result<Option<Tensor>>;

    /// Rows of `inputs` are environment major: row `env * n_steps + step`.
    fn forward(
        &self,
        inputs: &MetaInputs<'_>,
        states: Option<&Tensor>,
        n_steps: usize,
    ) -> Result<NetworkOutput>;
}

#[enum_dispatch(MetaNetwork)]
#[derive(Debug, Clone)]
pub enum MetaNetworkKind {
    Mlp(MlpMetaNetwork),
    Lstm(LstmMetaNetwork),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NetworkConfig {
    Mlp { hidden_layers: Vec<usize> },
    Lstm { hidden: usize },
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::Lstm { hidden: 48 }
    }
}

impl FromStr for NetworkConfig {
    type Err = L2rlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mlp" => Ok(Self::Mlp {
                hidden_layers: vec![64, 64],
            }),
            "lstm" => Ok(Self::default()),
            other => Err(L2rlError::configuration(format!(
                "unknown network `{other}`, expected `mlp` or `lstm`"
            ))),
        }
    }
}

impl NetworkConfig {
    pub fn is_recurrent(&self) -> bool {
        matches!(self, Self::Lstm { .. })
    }

    pub fn build(
        &self,
        env_description: &EnvironmentDescription,
        vb: &VarBuilder,
        device: &Device,
    ) -> Result<MetaNetworkKind> {
        let Space::Discrete(action_size) = env_description.action_space else {
            return Err(L2rlError::configuration(
                "meta learning networks need a discrete action space",
            )
            .into());
        };
        let observation_size = env_description.observation_size();
        let network: MetaNetworkKind = match self {
            Self::Mlp { hidden_layers } => MlpMetaNetwork::build(
                observation_size,
                action_size,
                hidden_layers,
                vb,
                device.clone(),
            )?
            .into(),
            Self::Lstm { hidden } => LstmMetaNetwork::build(
                observation_size,
                action_size,
                *hidden,
                vb,
                device.clone(),
            )?
            .into(),
        };
        Ok(network)
    }
}

/// Width of the rows [`meta_features`] produces.
pub fn feature_size(observation_size: usize, action_size: usize) -> usize {
    observation_size + action_size + 2
}

/// `[observation, one_hot(prev_action), prev_reward, timestep]` for every row of `inputs`.
pub fn meta_features(
    inputs: &MetaInputs<'_>,
    observation_size: usize,
    action_size: usize,
) -> Result<Tensor> {
    let n = inputs.len();
    let obs_dims = inputs.observations.dims();
    if obs_dims != [n, observation_size].as_slice() {
        return Err(L2rlError::shape_mismatch("observations", [n, observation_size], obs_dims).into());
    }
    for (what, len) in [
        ("prev_rewards", inputs.prev_rewards.len()),
        ("timesteps", inputs.timesteps.len()),
        ("dones", inputs.dones.len()),
    ] {
        if len != n {
            return Err(L2rlError::shape_mismatch(what, n, len).into());
        }
    }
    let width = action_size + 2;
    let mut extra = vec![0f32; n * width];
    for (row, chunk) in extra.chunks_mut(width).enumerate() {
        let prev_action = inputs.prev_actions[row] as usize;
        if prev_action >= action_size {
            return Err(L2rlError::shape_mismatch(
                "prev_actions",
                format!("< {action_size}"),
                prev_action,
            )
            .into());
        }
        chunk[prev_action] = 1.;
        chunk[action_size] = inputs.prev_rewards[row];
        chunk[action_size + 1] = inputs.timesteps[row] as f32;
    }
    let device = inputs.observations.device();
    let extra = Tensor::from_vec(extra, (n, width), device)?;
    let observations = inputs.observations.to_dtype(DType::F32)?;
    Ok(Tensor::cat(&[&observations, &extra], 1)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn features_layout() -> Result<()> {
        let observations = Tensor::new(&[[0.5f32, -1.], [2., 3.]], &Device::Cpu)?;
        let inputs = MetaInputs {
            observations: &observations,
            prev_actions: &[1, 0],
            prev_rewards: &[1., 0.],
            timesteps: &[7, 0],
            dones: &[false, true],
        };
        let features: Vec<Vec<f32>> = meta_features(&inputs, 2, 3)?.to_vec2()?;
        assert_eq!(
            features,
            vec![
                vec![0.5, -1., 0., 1., 0., 1., 7.],
                vec![2., 3., 1., 0., 0., 0., 0.]
            ]
        );
        assert_eq!(features[0].len(), feature_size(2, 3));
        Ok(())
    }

    #[test]
    fn mismatched_inputs_are_rejected() -> Result<()> {
        let observations = Tensor::zeros((2, 2), DType::F32, &Device::Cpu)?;
        let inputs = MetaInputs {
            observations: &observations,
            prev_actions: &[0, 0],
            prev_rewards: &[0.],
            timesteps: &[0, 0],
            dones: &[false, false],
        };
        let err = meta_features(&inputs, 2, 2).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<L2rlError>(),
            Some(L2rlError::ShapeMismatch { what: "prev_rewards", .. })
        ));
        let inputs = MetaInputs {
            prev_rewards: &[0., 0.],
            prev_actions: &[0, 5],
            ..inputs
        };
        assert!(meta_features(&inputs, 2, 2).is_err());
        Ok(())
    }

    #[test]
    fn continuous_actions_are_a_configuration_error() {
        let description =
            EnvironmentDescription::new(Space::Discrete(1), Space::continous_from_dims(vec![2]));
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let err = NetworkConfig::default()
            .build(&description, &vb, &Device::Cpu)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<L2rlError>(),
            Some(L2rlError::Configuration(_))
        ));
    }

    #[test]
    fn network_names() {
        assert_eq!("lstm".parse::<NetworkConfig>().ok(), Some(NetworkConfig::default()));
        assert!(matches!(
            "mlp".parse::<NetworkConfig>(),
            Ok(NetworkConfig::Mlp { .. })
        ));
        assert!("cnn".parse::<NetworkConfig>().is_err());
        assert!(NetworkConfig::default().is_recurrent());
        assert!(!NetworkConfig::Mlp { hidden_layers: vec![] }.is_recurrent());
    }
}
