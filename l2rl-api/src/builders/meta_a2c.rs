use crate::{hooks::LoggingHooks, task_loop::TaskLoop};
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use derive_more::{Deref, DerefMut};
use l2rl_agents::meta_a2c::{MetaA2C, MetaA2CParams};
use l2rl_candle_lm::network::MetaNetworkKind;
use l2rl_core::{
    env::{EnvironmentDescription, VecEnv},
    rng,
};
use std::path::PathBuf;
use tracing::info;

/// Builds a Meta-A2C model and the task loop around it. Derefs to the hyperparameters, so
/// `builder.nsteps = 20` works.
#[derive(Deref, DerefMut)]
pub struct MetaA2CBuilder {
    #[deref]
    #[deref_mut]
    params: MetaA2CParams,
    pub device: Device,
    pub log_dir: Option<PathBuf>,
    pub save_checkpoints: bool,
    pub load_path: Option<PathBuf>,
}

impl Default for MetaA2CBuilder {
    fn default() -> Self {
        Self {
            params: MetaA2CParams::default(),
            device: Device::Cpu,
            log_dir: None,
            save_checkpoints: false,
            load_path: None,
        }
    }
}

impl MetaA2CBuilder {
    pub fn new(params: MetaA2CParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &MetaA2CParams {
        &self.params
    }

    pub fn set_log_dir(&mut self, log_dir: impl Into<PathBuf>) {
        self.log_dir = Some(log_dir.into());
    }

    pub fn set_load_path(&mut self, load_path: impl Into<PathBuf>) {
        self.load_path = Some(load_path.into());
    }

    pub fn set_save_checkpoints(&mut self, save_checkpoints: bool) {
        self.save_checkpoints = save_checkpoints;
    }

    /// A fresh model for `n_envs` environments of `env_description`, loaded from `load_path`
    /// when one is set.
    pub fn build_model(
        &self,
        env_description: &EnvironmentDescription,
        n_envs: usize,
    ) -> Result<MetaA2C<MetaNetworkKind>> {
        self.params.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        let network = self
            .params
            .network
            .build(env_description, &vb, &self.device)?;
        let mut model = MetaA2C::new(network, varmap, &self.params, n_envs, self.device.clone())?;
        if let Some(load_path) = &self.load_path {
            model.load(load_path)?;
            info!(path = %load_path.display(), "loaded parameters");
        }
        Ok(model)
    }

    /// Seeds the global rng before anything random happens, then builds the model for `env` and
    /// the task loop that trains it.
    pub fn build<V: VecEnv>(&self, env: V) -> Result<TaskLoop<V, MetaNetworkKind, LoggingHooks>> {
        rng::seed(self.params.seed);
        let model = self.build_model(&env.env_description(), env.num_envs())?;
        let mut hooks = LoggingHooks::new(self.params.log_interval)
            .with_checkpoints(self.save_checkpoints);
        if let Some(log_dir) = &self.log_dir {
            hooks = hooks.with_log_dir(log_dir);
        }
        TaskLoop::new(env, model, hooks, self.params.clone())
    }
}
