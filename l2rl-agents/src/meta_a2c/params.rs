use crate::runner::TimestepReset;
use l2rl_candle_lm::network::NetworkConfig;
use l2rl_core::{error::L2rlError, scheduler::Schedule};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaA2CParams {
    /// Environment steps per environment in every rollout
    pub nsteps: usize,
    /// Environment steps of a single task
    pub total_timesteps: usize,
    pub vf_coef: f32,
    pub ent_coef: f32,
    pub max_grad_norm: Option<f32>,
    pub lr: f64,
    pub lrschedule: Schedule,
    /// RMSProp epsilon
    pub epsilon: f64,
    /// RMSProp decay
    pub alpha: f64,
    pub gamma: f32,
    /// Log every this many updates
    pub log_interval: usize,
    pub n_tasks: usize,
    pub timestep_reset: TimestepReset,
    /// Ask the environment for a new task at the end of every task
    pub advance_env_task: bool,
    pub network: NetworkConfig,
    pub seed: u64,
}

impl Default for MetaA2CParams {
    fn default() -> Self {
        Self {
            nsteps: 5,
            total_timesteps: 80_000_000,
            vf_coef: 0.5,
            ent_coef: 0.01,
            max_grad_norm: Some(0.5),
            lr: 7e-4,
            lrschedule: Schedule::Linear,
            epsilon: 1e-5,
            alpha: 0.99,
            gamma: 0.99,
            log_interval: 100,
            n_tasks: 5,
            timestep_reset: TimestepReset::OnEpisodeEnd,
            advance_env_task: false,
            network: NetworkConfig::default(),
            seed: 0,
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, L2rlError>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|err| L2rlError::configuration(format!("invalid value `{value}` for `{key}`: {err}")))
}

/// Counts may be written in float notation, `80e6`.
fn parse_count(key: &str, value: &str) -> Result<usize, L2rlError> {
    if let Ok(count) = value.parse::<usize>() {
        return Ok(count);
    }
    let count: f64 = parse(key, value)?;
    if count < 0. || count.fract() != 0. || !count.is_finite() {
        return Err(L2rlError::configuration(format!(
            "`{key}` must be a non negative integer, got `{value}`"
        )));
    }
    Ok(count as usize)
}

impl MetaA2CParams {
    /// Applies a single `key=value` override.
    pub fn apply_override(&mut self, kv: &str) -> Result<(), L2rlError> {
        let Some((key, value)) = kv.split_once('=') else {
            return Err(L2rlError::configuration(format!(
                "expected `key=value`, got `{kv}`"
            )));
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "nsteps" => self.nsteps = parse_count(key, value)?,
            "total_timesteps" => self.total_timesteps = parse_count(key, value)?,
            "vf_coef" => self.vf_coef = parse(key, value)?,
            "ent_coef" => self.ent_coef = parse(key, value)?,
            "max_grad_norm" => {
                self.max_grad_norm = match value {
                    "none" | "None" => None,
                    value => Some(parse(key, value)?),
                }
            }
            "lr" => self.lr = parse(key, value)?,
            "lrschedule" => self.lrschedule = parse(key, value)?,
            "epsilon" => self.epsilon = parse(key, value)?,
            "alpha" => self.alpha = parse(key, value)?,
            "gamma" => self.gamma = parse(key, value)?,
            "log_interval" => self.log_interval = parse_count(key, value)?,
            "n_tasks" => self.n_tasks = parse_count(key, value)?,
            "timestep_reset" => self.timestep_reset = parse(key, value)?,
            "advance_env_task" => self.advance_env_task = parse(key, value)?,
            "network" => self.network = parse(key, value)?,
            "nlstm" => self.network = NetworkConfig::Lstm {
                hidden: parse_count(key, value)?,
            },
            "hidden_layers" => {
                let hidden_layers = value
                    .split(',')
                    .filter(|layer| !layer.is_empty())
                    .map(|layer| parse_count(key, layer))
                    .collect::<Result<Vec<_>, _>>()?;
                self.network = NetworkConfig::Mlp { hidden_layers };
            }
            "seed" => self.seed = parse(key, value)?,
            other => {
                return Err(L2rlError::configuration(format!(
                    "unknown parameter `{other}`"
                )));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), L2rlError> {
        if self.nsteps == 0 {
            return Err(L2rlError::configuration("`nsteps` must be positive"));
        }
        if self.log_interval == 0 {
            return Err(L2rlError::configuration("`log_interval` must be positive"));
        }
        if !(0. ..=1.).contains(&self.gamma) {
            return Err(L2rlError::configuration("`gamma` must be in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides() -> anyhow::Result<()> {
        let mut params = MetaA2CParams::default();
        params.apply_override("total_timesteps=1e5")?;
        params.apply_override("lrschedule=constant")?;
        params.apply_override("max_grad_norm=none")?;
        params.apply_override("nlstm=16")?;
        params.apply_override("timestep_reset=on-task-end")?;
        assert_eq!(params.total_timesteps, 100_000);
        assert!(matches!(params.lrschedule, Schedule::Constant));
        assert_eq!(params.max_grad_norm, None);
        assert_eq!(params.network, NetworkConfig::Lstm { hidden: 16 });
        assert_eq!(params.timestep_reset, TimestepReset::OnTaskEnd);
        params.apply_override("hidden_layers=32,32")?;
        assert_eq!(
            params.network,
            NetworkConfig::Mlp {
                hidden_layers: vec![32, 32]
            }
        );
        Ok(())
    }

    #[test]
    fn malformed_overrides_are_configuration_errors() {
        let mut params = MetaA2CParams::default();
        for kv in [
            "lr",
            "lr=fast",
            "unknown=1",
            "lrschedule=cosine",
            "nsteps=2.5",
            "n_tasks=-1",
        ] {
            assert!(
                matches!(params.apply_override(kv), Err(L2rlError::Configuration(_))),
                "{kv}"
            );
        }
    }

    #[test]
    fn serde_fills_defaults() -> anyhow::Result<()> {
        let params: MetaA2CParams =
            serde_json::from_str(r#"{"nsteps": 20, "lrschedule": "constant"}"#)?;
        assert_eq!(params.nsteps, 20);
        assert_eq!(params.n_tasks, 5);
        assert!(matches!(params.lrschedule, Schedule::Constant));
        let json = serde_json::to_string(&params)?;
        assert!(json.contains(r#""timestep_reset":"on-episode-end""#));
        Ok(())
    }
}
