use anyhow::Result;
use candle_core::Device;
use l2rl_api::{
    builders::MetaA2CBuilder,
    envs::{BanditDifficulty, DependentBandit, EnvRegistry},
    play::{play, play_log_path},
    test_utils::{FixedActionModel, HookCounters, constant_reward_vec_env},
};
use l2rl_candle_lm::network::NetworkConfig;
use l2rl_core::env::SequentialVecEnv;

#[test]
fn play_resets_every_env_when_one_is_done() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let counters = HookCounters::default();
    let mut env = constant_reward_vec_env(2, 1., 3, &counters)?;
    let model = FixedActionModel {
        action: 1,
        value: 0.,
    };
    let report = play(&mut env, &model, 7, Some(dir.path()))?;
    assert_eq!(report.steps, 7);
    assert_eq!(report.episode_rewards, vec![3., 3.]);
    assert_eq!(report.unfinished_reward, 1.);
    // two environments after each episode, two more at exit
    assert_eq!(counters.save_db_calls(), 2 * 2 + 2);

    let mut reader = csv::Reader::from_path(play_log_path(dir.path()))?;
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    assert_eq!(headers, vec!["action", "reward", "t"]);
    let ts = reader
        .records()
        .map(|record| record.map(|r| r[2].to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(ts.len(), 7 * 2);
    assert_eq!(&ts[..8], &["1", "1", "2", "2", "3", "3", "1", "1"]);
    Ok(())
}

#[test]
fn trained_lstm_plays_the_bandit() -> Result<()> {
    let mut builder = MetaA2CBuilder::default();
    builder.nsteps = 5;
    builder.total_timesteps = 100;
    builder.n_tasks = 2;
    builder.network = NetworkConfig::Lstm { hidden: 8 };
    builder.seed = 3;

    let registry = EnvRegistry::with_builtin_envs();
    let (env_type, env_id) = registry.get_env_type("bandit", None)?;
    assert_eq!(env_type, "bandit");
    let env = registry.make_sequential(&env_id, 2, &Device::Cpu)?;
    let mut task_loop = builder.build(env)?;
    task_loop.run()?;
    let (_, model, _) = task_loop.into_parts();
    assert!(model.learning_rate().is_finite());

    let bandits = (0..2)
        .map(|_| DependentBandit::new(BanditDifficulty::Easy).with_trial_length(10))
        .collect();
    let mut env = SequentialVecEnv::new(bandits, Device::Cpu)?;
    let report = play(&mut env, &model, 25, None)?;
    assert_eq!(report.episode_rewards.len(), 2);
    assert!(
        report
            .episode_rewards
            .iter()
            .all(|reward| (0. ..=10.).contains(reward))
    );
    Ok(())
}
