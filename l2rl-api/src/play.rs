use crate::utils::episode_log::EpisodeLogWriter;
use anyhow::Result;
use l2rl_core::{
    env::VecEnv,
    model::{ActingModel, MetaInputs},
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayReport {
    pub steps: usize,
    /// Reward of the first environment, summed per finished episode
    pub episode_rewards: Vec<f32>,
    /// Reward of the episode still running when the step budget ran out
    pub unfinished_reward: f32,
}

pub fn play_log_path(log_dir: &Path) -> PathBuf {
    log_dir.join("play_logs").join("episode_results.csv")
}

/// Runs `model` on `env` for `num_timesteps` vectorized steps without learning. As soon as any
/// environment finishes an episode all of them are reset together, along with the meta inputs
/// and the recurrent state. With a `log_dir`, every step's info records go to
/// `<log_dir>/play_logs/episode_results.csv`.
pub fn play<V: VecEnv, M: ActingModel>(
    env: &mut V,
    model: &M,
    num_timesteps: usize,
    log_dir: Option<&Path>,
) -> Result<PlayReport> {
    let n_envs = env.num_envs();
    let mut episode_log = log_dir
        .map(|dir| EpisodeLogWriter::create(play_log_path(dir), &[]))
        .transpose()?;
    info!(num_timesteps, n_envs, "running trained model");

    let mut observations = env.reset()?;
    let mut states = model.initial_state(n_envs)?;
    let mut dones = vec![false; n_envs];
    let mut prev_actions = vec![0u32; n_envs];
    let mut prev_rewards = vec![0f32; n_envs];
    let mut timesteps = vec![0u32; n_envs];
    let mut report = PlayReport::default();

    for _ in 0..num_timesteps {
        let inputs = MetaInputs {
            observations: &observations,
            prev_actions: &prev_actions,
            prev_rewards: &prev_rewards,
            timesteps: &timesteps,
            dones: &dones,
        };
        let output = model.step(&inputs, states.as_ref())?;
        let step = env.step(&output.actions)?;
        report.steps += 1;
        report.unfinished_reward += step.rewards.first().copied().unwrap_or_default();
        if let Some(episode_log) = &mut episode_log {
            episode_log.write(&[], &step.infos)?;
        }
        states = output.states;
        prev_actions = output.actions;
        prev_rewards = step.rewards;
        observations = step.observations;
        timesteps.iter_mut().for_each(|t| *t += 1);
        dones = step.dones;

        if dones.iter().any(|done| *done) {
            info!(episode_rew = report.unfinished_reward, "episode finished");
            report.episode_rewards.push(report.unfinished_reward);
            report.unfinished_reward = 0.;
            observations = env.reset()?;
            timesteps.fill(0);
            dones.fill(true);
            env.save_db_experiments()?;
            if let Some(episode_log) = &mut episode_log {
                episode_log.flush()?;
            }
        }
    }

    env.save_db_experiments()?;
    if let Some(episode_log) = &mut episode_log {
        episode_log.flush()?;
        info!(path = %episode_log.path().display(), rows = episode_log.rows(), "saved episode logs");
    }
    Ok(report)
}
