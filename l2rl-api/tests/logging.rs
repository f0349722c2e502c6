use anyhow::Result;
use l2rl_agents::meta_a2c::MetaA2CParams;
use l2rl_api::{
    builders::MetaA2CBuilder,
    hooks::LoggingHooks,
    test_utils::{HookCounters, constant_reward_vec_env},
};
use l2rl_candle_lm::network::NetworkConfig;
use l2rl_core::{
    env::VecEnv,
    model::{ActingModel, MetaInputs},
};
use std::fs;

#[test]
fn a_run_writes_params_episode_logs_and_checkpoints() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut builder = MetaA2CBuilder::default();
    builder.nsteps = 4;
    builder.total_timesteps = 16;
    builder.n_tasks = 2;
    builder.log_interval = 1;
    builder.network = NetworkConfig::Mlp {
        hidden_layers: vec![8],
    };
    builder.set_log_dir(dir.path());
    builder.set_save_checkpoints(true);

    let env = constant_reward_vec_env(2, 1., 3, &HookCounters::default())?;
    let mut task_loop = builder.build(env)?;
    task_loop.run()?;

    let params: MetaA2CParams =
        serde_json::from_str(&fs::read_to_string(dir.path().join("params.json"))?)?;
    assert_eq!(params.nsteps, 4);
    assert_eq!(params.n_tasks, 2);

    // two updates of eight rows per task
    let mut reader = csv::Reader::from_path(LoggingHooks::episode_log_path(dir.path()))?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    assert_eq!(headers, vec!["task", "action", "reward", "t"]);
    let tasks = reader
        .records()
        .map(|record| record.map(|r| r[0].to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(tasks.len(), 2 * 2 * 8);
    assert!(tasks[..16].iter().all(|t| t == "1"));
    assert!(tasks[16..].iter().all(|t| t == "2"));

    for task in 1..=2 {
        assert!(LoggingHooks::checkpoint_path(dir.path(), task).exists());
    }

    // the last checkpoint holds the final parameters
    let mut reload = MetaA2CBuilder::new(builder.params().clone());
    reload.set_load_path(LoggingHooks::checkpoint_path(dir.path(), 2));
    let reloaded = reload.build_model(&task_loop.env.env_description(), 2)?;
    let observations = task_loop.env.reset()?;
    let inputs = MetaInputs {
        observations: &observations,
        prev_actions: &[1, 0],
        prev_rewards: &[1., 0.],
        timesteps: &[2, 0],
        dones: &[false, false],
    };
    assert_eq!(
        reloaded.value(&inputs, None)?,
        task_loop.model.value(&inputs, None)?
    );
    Ok(())
}

#[test]
fn checkpoints_are_skipped_without_a_log_dir() -> Result<()> {
    let mut builder = MetaA2CBuilder::default();
    builder.nsteps = 2;
    builder.total_timesteps = 4;
    builder.n_tasks = 1;
    builder.network = NetworkConfig::Mlp {
        hidden_layers: vec![4],
    };
    builder.set_save_checkpoints(true);
    let env = constant_reward_vec_env(1, 0.5, 2, &HookCounters::default())?;
    let mut task_loop = builder.build(env)?;
    task_loop.run()?;
    assert_eq!(task_loop.model.scheduler().steps_consumed(), 4);
    Ok(())
}
