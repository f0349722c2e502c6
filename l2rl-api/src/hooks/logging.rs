use super::{TaskLoopHooks, UpdateReport};
use crate::utils::episode_log::EpisodeLogWriter;
use anyhow::Result;
use l2rl_agents::meta_a2c::{MetaA2C, MetaA2CParams};
use l2rl_candle_lm::network::MetaNetwork;
use l2rl_core::utils::stats::explained_variance;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Tabular training metrics through `tracing`, plus the files of a run when a log directory is
/// set:
///
/// ```text
/// <log_dir>/params.json
/// <log_dir>/episode_logs/episodes_results.csv
/// <log_dir>/models/meta_a2c-task<i>.safetensors   (with checkpoints enabled)
/// ```
pub struct LoggingHooks {
    log_interval: usize,
    log_dir: Option<PathBuf>,
    save_checkpoints: bool,
    flush_interval: usize,
    episode_log: Option<EpisodeLogWriter>,
}

impl LoggingHooks {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
            log_dir: None,
            save_checkpoints: false,
            flush_interval: EpisodeLogWriter::DEFAULT_FLUSH_INTERVAL,
            episode_log: None,
        }
    }

    pub fn with_log_dir(mut self, log_dir: impl AsRef<Path>) -> Self {
        self.log_dir = Some(log_dir.as_ref().to_path_buf());
        self
    }

    pub fn with_checkpoints(mut self, save_checkpoints: bool) -> Self {
        self.save_checkpoints = save_checkpoints;
        self
    }

    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn episode_log_path(log_dir: &Path) -> PathBuf {
        log_dir.join("episode_logs").join("episodes_results.csv")
    }

    pub fn checkpoint_path(log_dir: &Path, task: usize) -> PathBuf {
        log_dir
            .join("models")
            .join(format!("meta_a2c-task{task}.safetensors"))
    }
}

impl<N: MetaNetwork> TaskLoopHooks<N> for LoggingHooks {
    fn init_hook(&mut self, params: &MetaA2CParams) -> Result<()> {
        let Some(log_dir) = &self.log_dir else {
            return Ok(());
        };
        fs::create_dir_all(log_dir)?;
        info!(log_dir = %log_dir.display(), "logging to");
        match serde_json::to_string_pretty(params) {
            Ok(json) => fs::write(log_dir.join("params.json"), json)?,
            Err(err) => warn!(%err, "parameters are not serializable, params.json skipped"),
        }
        let episode_log = EpisodeLogWriter::create(Self::episode_log_path(log_dir), &["task"])?
            .with_flush_interval(self.flush_interval);
        self.episode_log = Some(episode_log);
        Ok(())
    }

    fn task_start_hook(&mut self, task: usize, _model: &MetaA2C<N>) -> Result<()> {
        info!(task, "starting task");
        Ok(())
    }

    fn post_update_hook(&mut self, report: &UpdateReport<'_>) -> Result<()> {
        if let Some(episode_log) = &mut self.episode_log {
            episode_log.write(&[report.task.to_string()], &report.batch.infos)?;
        }
        if report.update % self.log_interval == 0 || report.update == 1 {
            let ev = explained_variance(&report.batch.values, &report.batch.returns);
            info!(
                task = report.task,
                total_time = report.elapsed.as_secs_f64(),
                nupdates = report.update,
                total_timesteps = report.total_timesteps(),
                fps = report.fps(),
                policy_entropy = report.stats.policy_entropy,
                value_loss = report.stats.value_loss,
                policy_loss = report.stats.policy_loss,
                explained_variance = ev,
                learning_rate = report.stats.learning_rate,
            );
        }
        Ok(())
    }

    fn task_end_hook(&mut self, task: usize, model: &MetaA2C<N>) -> Result<()> {
        if let Some(episode_log) = &mut self.episode_log {
            episode_log.flush()?;
        }
        if let (true, Some(log_dir)) = (self.save_checkpoints, &self.log_dir) {
            let path = Self::checkpoint_path(log_dir, task);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            model.save(&path)?;
            info!(task, path = %path.display(), "saved checkpoint");
        }
        Ok(())
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        if let Some(episode_log) = &mut self.episode_log {
            episode_log.flush()?;
            info!(path = %episode_log.path().display(), rows = episode_log.rows(), "episode log written");
        }
        Ok(())
    }
}
