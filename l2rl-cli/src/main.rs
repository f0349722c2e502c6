use anyhow::Result;
use candle_core::Device;
use clap::{Parser, ValueEnum};
use l2rl_api::{builders::MetaA2CBuilder, envs::EnvRegistry, play::play};
use l2rl_candle_lm::network::NetworkConfig;
use std::{path::PathBuf, thread};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Algorithm {
    #[value(name = "meta_a2c")]
    MetaA2c,
}

impl Algorithm {
    fn builder(self) -> MetaA2CBuilder {
        match self {
            Self::MetaA2c => MetaA2CBuilder::default(),
        }
    }
}

/// Meta reinforcement learning: train a recurrent actor critic across a sequence of tasks.
#[derive(Parser)]
#[command(name = "l2rl")]
struct Cli {
    #[arg(long, value_enum, default_value = "meta_a2c")]
    alg: Algorithm,

    /// Environment id, or an environment type to take its first id
    #[arg(long, default_value = "bandit")]
    env: String,

    /// Environment type, when `env` alone is ambiguous
    #[arg(long)]
    env_type: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    /// Environment steps of a single task (`1e6` is accepted)
    #[arg(long)]
    num_timesteps: Option<f64>,

    /// `lstm` or `mlp`
    #[arg(long)]
    network: Option<NetworkConfig>,

    /// Number of environments stepped in parallel, defaults to the number of cpus
    #[arg(long)]
    num_env: Option<usize>,

    #[arg(long)]
    n_tasks: Option<usize>,

    /// Save the trained parameters here (safetensors)
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Load parameters from here before training
    #[arg(long)]
    load_path: Option<PathBuf>,

    /// Run the trained model after training
    #[arg(long)]
    play: bool,

    /// Where params.json, episode logs and checkpoints go
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write a checkpoint at the end of every task (needs `--log-dir`)
    #[arg(long)]
    save_checkpoints: bool,

    /// Hyperparameter overrides, `key=value`
    #[arg(trailing_var_arg = true)]
    overrides: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    let registry = EnvRegistry::builtin_envs(cli.log_dir.as_deref());
    let (env_type, env_id) = registry.get_env_type(&cli.env, cli.env_type.as_deref())?;
    let num_env = match cli.num_env {
        Some(num_env) => num_env,
        None => thread::available_parallelism()?.get(),
    };
    info!(%env_type, %env_id, num_env, "environment");

    let mut builder = cli.alg.builder();
    if let Some(seed) = cli.seed {
        builder.seed = seed;
    }
    if let Some(num_timesteps) = cli.num_timesteps {
        builder.apply_override(&format!("total_timesteps={num_timesteps}"))?;
    }
    if let Some(network) = cli.network {
        builder.network = network;
    }
    if let Some(n_tasks) = cli.n_tasks {
        builder.n_tasks = n_tasks;
    }
    for kv in &cli.overrides {
        builder.apply_override(kv)?;
    }
    builder.device = Device::cuda_if_available(0)?;
    builder.set_save_checkpoints(cli.save_checkpoints);
    if let Some(log_dir) = &cli.log_dir {
        builder.set_log_dir(log_dir);
    }
    if let Some(load_path) = &cli.load_path {
        builder.set_load_path(load_path);
    }
    info!(alg = ?cli.alg, params = ?builder.params(), "training");

    let env = registry.make_parallel(&env_id, num_env, &builder.device)?;
    let mut task_loop = builder.build(env)?;
    task_loop.run()?;
    let (mut env, model, _) = task_loop.into_parts();

    if let Some(save_path) = &cli.save_path {
        info!(path = %save_path.display(), "saving trained model");
        model.save(save_path)?;
    }

    if cli.play {
        let num_timesteps = builder.total_timesteps;
        let report = play(&mut env, &model, num_timesteps, cli.log_dir.as_deref())?;
        info!(
            steps = report.steps,
            episodes = report.episode_rewards.len(),
            "finished playing"
        );
    }
    Ok(())
}
