use crate::envs::bandit::{BanditDifficulty, DependentBandit};
use anyhow::Result;
use candle_core::Device;
use l2rl_core::{
    env::{Env, ParallelVecEnv, SequentialVecEnv},
    error::L2rlError,
};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

pub type BoxedEnv = Box<dyn Env>;

pub type EnvFactory = Arc<dyn Fn() -> Result<BoxedEnv> + Send + Sync>;

/// Environment ids grouped by environment type, and how to build each of them.
#[derive(Default, Clone)]
pub struct EnvRegistry {
    env_types: BTreeMap<String, Vec<String>>,
    factories: BTreeMap<String, EnvFactory>,
}

impl EnvRegistry {
    /// The dependent bandits, under the `bandit` type.
    pub fn with_builtin_envs() -> Self {
        Self::builtin_envs(None)
    }

    /// Same as [`EnvRegistry::with_builtin_envs`]. With a `db_dir`, every instance saves its
    /// trial database as `<db_dir>/bandit_db/<env id>-<instance>.json`.
    pub fn builtin_envs(db_dir: Option<&Path>) -> Self {
        let mut registry = Self::default();
        for difficulty in BanditDifficulty::ALL {
            let id = format!("DependentBandit-{}-v0", difficulty.name());
            let db_path = db_dir.map(|dir| dir.join("bandit_db"));
            let instances = AtomicUsize::new(0);
            let env_id = id.clone();
            registry.register("bandit", &id, move || {
                let mut bandit = DependentBandit::new(difficulty);
                if let Some(db_path) = &db_path {
                    let instance = instances.fetch_add(1, Ordering::Relaxed);
                    bandit = bandit.with_db_path(db_path.join(format!("{env_id}-{instance}.json")));
                }
                Ok(Box::new(bandit) as BoxedEnv)
            });
        }
        registry
    }

    pub fn register(
        &mut self,
        env_type: &str,
        env_id: &str,
        factory: impl Fn() -> Result<BoxedEnv> + Send + Sync + 'static,
    ) {
        let ids = self.env_types.entry(env_type.to_string()).or_default();
        if !ids.iter().any(|id| id == env_id) {
            ids.push(env_id.to_string());
        }
        self.factories.insert(env_id.to_string(), Arc::new(factory));
    }

    pub fn env_types(&self) -> impl Iterator<Item = &str> {
        self.env_types.keys().map(String::as_str)
    }

    /// Resolves `(env_type, env_id)`. An explicit type is taken as is. Otherwise `env` may name
    /// a type, which resolves to the first id registered under it, or an id, which resolves to
    /// the type it was registered under.
    pub fn get_env_type(
        &self,
        env: &str,
        env_type: Option<&str>,
    ) -> Result<(String, String), L2rlError> {
        if let Some(env_type) = env_type {
            return Ok((env_type.to_string(), env.to_string()));
        }
        if let Some(ids) = self.env_types.get(env) {
            let first = ids.first().ok_or_else(|| {
                L2rlError::configuration(format!("env type `{env}` has no registered ids"))
            })?;
            return Ok((env.to_string(), first.clone()));
        }
        self.env_types
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == env))
            .map(|(env_type, _)| (env_type.clone(), env.to_string()))
            .ok_or_else(|| {
                let known: Vec<&str> = self.env_types().collect();
                L2rlError::configuration(format!(
                    "env id `{env}` is not recognized in env types {known:?}"
                ))
            })
    }

    pub fn make(&self, env_id: &str) -> Result<BoxedEnv> {
        let factory = self
            .factories
            .get(env_id)
            .ok_or_else(|| L2rlError::configuration(format!("no environment `{env_id}`")))?;
        factory()
    }

    pub fn make_many(&self, env_id: &str, n_envs: usize) -> Result<Vec<BoxedEnv>> {
        (0..n_envs).map(|_| self.make(env_id)).collect()
    }

    pub fn make_sequential(
        &self,
        env_id: &str,
        n_envs: usize,
        device: &Device,
    ) -> Result<SequentialVecEnv<BoxedEnv>> {
        SequentialVecEnv::new(self.make_many(env_id, n_envs)?, device.clone())
    }

    pub fn make_parallel(
        &self,
        env_id: &str,
        n_envs: usize,
        device: &Device,
    ) -> Result<ParallelVecEnv<BoxedEnv>> {
        ParallelVecEnv::new(self.make_many(env_id, n_envs)?, device.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use l2rl_core::env::VecEnv;

    #[test]
    fn env_type_resolution() -> Result<()> {
        let registry = EnvRegistry::with_builtin_envs();
        assert_eq!(
            registry.get_env_type("bandit", None)?,
            ("bandit".to_string(), "DependentBandit-uniform-v0".to_string())
        );
        assert_eq!(
            registry.get_env_type("DependentBandit-hard-v0", None)?,
            ("bandit".to_string(), "DependentBandit-hard-v0".to_string())
        );
        assert_eq!(
            registry.get_env_type("Custom-v1", Some("custom"))?,
            ("custom".to_string(), "Custom-v1".to_string())
        );
        assert!(matches!(
            registry.get_env_type("CartPole-v1", None),
            Err(L2rlError::Configuration(_))
        ));
        Ok(())
    }

    #[test]
    fn builds_vectorized_envs() -> Result<()> {
        let registry = EnvRegistry::with_builtin_envs();
        let mut env = registry.make_parallel("DependentBandit-easy-v0", 3, &Device::Cpu)?;
        assert_eq!(env.num_envs(), 3);
        assert_eq!(env.reset()?.dims(), &[3, 1]);
        assert!(registry.make("missing").is_err());
        Ok(())
    }

    #[test]
    fn builtin_envs_save_their_trials_under_the_db_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let registry = EnvRegistry::builtin_envs(Some(dir.path()));
        let mut env = registry.make_sequential("DependentBandit-hard-v0", 2, &Device::Cpu)?;
        env.reset()?;
        env.step(&[0, 1])?;
        assert!(env.save_db_experiments()?);
        for instance in 0..2 {
            let path = dir
                .path()
                .join("bandit_db")
                .join(format!("DependentBandit-hard-v0-{instance}.json"));
            assert!(path.exists(), "{}", path.display());
        }

        let mut env = EnvRegistry::with_builtin_envs().make_sequential(
            "DependentBandit-hard-v0",
            1,
            &Device::Cpu,
        )?;
        assert!(!env.save_db_experiments()?);
        Ok(())
    }
}
