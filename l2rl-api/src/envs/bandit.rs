use anyhow::Result;
use l2rl_core::{
    env::{Env, EnvironmentDescription, InfoRecord, SnapShot, Space},
    error::L2rlError,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::{fs, path::PathBuf, str::FromStr};
use tracing::info;

/// How far apart the two arms of a dependent bandit are. The arms pay out with probability `p`
/// and `1 - p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanditDifficulty {
    /// `p ~ U[0, 1]`
    Uniform,
    /// `p` in {0.1, 0.9}
    Easy,
    /// `p` in {0.25, 0.75}
    Medium,
    /// `p` in {0.4, 0.6}
    Hard,
}

impl BanditDifficulty {
    pub const ALL: [Self; 4] = [Self::Uniform, Self::Easy, Self::Medium, Self::Hard];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    fn sample_p(&self, rng: &mut StdRng) -> f32 {
        let low = match self {
            Self::Uniform => return rng.random::<f32>(),
            Self::Easy => 0.1,
            Self::Medium => 0.25,
            Self::Hard => 0.4,
        };
        if rng.random::<bool>() { low } else { 1. - low }
    }
}

impl FromStr for BanditDifficulty {
    type Err = L2rlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| L2rlError::configuration(format!("unknown bandit difficulty `{s}`")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BanditTrial {
    pub trial: usize,
    pub p: f32,
    pub pulls: usize,
    pub total_reward: f32,
    pub regret: f32,
}

/// Two armed bandit whose arm probabilities are coupled. An episode (trial) is `trial_length`
/// pulls against the same bandit. The observation carries no information, everything the agent
/// learns about the arms comes through the previous action and reward.
pub struct DependentBandit {
    difficulty: BanditDifficulty,
    trial_length: usize,
    resample_on_reset: bool,
    rng: StdRng,
    p: f32,
    pulls: usize,
    trial: usize,
    total_reward: f32,
    regret: f32,
    db: Vec<BanditTrial>,
    db_path: Option<PathBuf>,
}

impl DependentBandit {
    pub const DEFAULT_TRIAL_LENGTH: usize = 100;

    pub fn new(difficulty: BanditDifficulty) -> Self {
        let mut rng = StdRng::seed_from_u64(0);
        let p = difficulty.sample_p(&mut rng);
        Self {
            difficulty,
            trial_length: Self::DEFAULT_TRIAL_LENGTH,
            resample_on_reset: true,
            rng,
            p,
            pulls: 0,
            trial: 0,
            total_reward: 0.,
            regret: 0.,
            db: vec![],
            db_path: None,
        }
    }

    pub fn with_trial_length(mut self, trial_length: usize) -> Self {
        self.trial_length = trial_length.max(1);
        self
    }

    /// Keep the same arm probabilities across episodes, only `next_task` draws new ones.
    pub fn fixed_within_task(mut self) -> Self {
        self.resample_on_reset = false;
        self
    }

    /// `save_db_experiments` writes the finished trials to `path` as json.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn p(&self) -> f32 {
        self.p
    }

    pub fn trials(&self) -> &[BanditTrial] {
        &self.db
    }

    fn arm_probability(&self, action: u32) -> f32 {
        if action == 0 { self.p } else { 1. - self.p }
    }
}

impl Env for DependentBandit {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        self.rng = StdRng::seed_from_u64(seed);
        if self.resample_on_reset {
            self.p = self.difficulty.sample_p(&mut self.rng);
        }
        self.pulls = 0;
        self.total_reward = 0.;
        self.regret = 0.;
        Ok(vec![0.])
    }

    fn step(&mut self, action: u32) -> Result<SnapShot> {
        if action > 1 {
            return Err(L2rlError::shape_mismatch("bandit arm", "0 or 1", action).into());
        }
        let arm_p = self.arm_probability(action);
        let best_p = self.p.max(1. - self.p);
        let reward = if self.rng.random::<f32>() < arm_p { 1. } else { 0. };
        self.pulls += 1;
        self.total_reward += reward;
        self.regret += best_p - arm_p;
        let terminated = self.pulls >= self.trial_length;
        let info = InfoRecord::from([
            ("trial".to_string(), self.trial.into()),
            ("pull".to_string(), self.pulls.into()),
            ("p".to_string(), self.p.into()),
            ("action".to_string(), action.into()),
            ("reward".to_string(), reward.into()),
            ("optimal".to_string(), (arm_p >= best_p).into()),
            ("regret".to_string(), self.regret.into()),
        ]);
        if terminated {
            self.db.push(BanditTrial {
                trial: self.trial,
                p: self.p,
                pulls: self.pulls,
                total_reward: self.total_reward,
                regret: self.regret,
            });
            self.trial += 1;
        }
        Ok(SnapShot {
            state: vec![0.],
            reward,
            terminated,
            trancuated: false,
            info,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(Space::continous_from_dims(vec![1]), Space::Discrete(2))
    }

    fn next_task(&mut self) -> Result<bool> {
        self.p = self.difficulty.sample_p(&mut self.rng);
        Ok(true)
    }

    fn save_db_experiments(&mut self) -> Result<bool> {
        let Some(path) = &self.db_path else {
            return Ok(false);
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.db)?)?;
        info!(path = %path.display(), trials = self.db.len(), "saved bandit trials");
        Ok(true)
    }
}
