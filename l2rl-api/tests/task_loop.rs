use anyhow::{Result, anyhow};
use l2rl_agents::meta_a2c::{MetaA2C, MetaA2CParams};
use l2rl_api::{
    builders::MetaA2CBuilder,
    hooks::{TaskLoopHooks, UpdateReport},
    task_loop::{TaskLoop, TaskLoopState, learn},
    test_utils::{ConstantRewardEnv, HookCounters, constant_reward_vec_env},
};
use l2rl_candle_lm::network::{MetaNetwork, MetaNetworkKind, NetworkConfig};
use l2rl_core::{
    env::{SequentialVecEnv, VecEnv},
    error::L2rlError,
};

type Params = Vec<(String, Vec<f32>)>;

fn snapshot<N: MetaNetwork>(model: &MetaA2C<N>) -> Result<Params> {
    let data = model
        .varmap()
        .data()
        .lock()
        .map_err(|err| anyhow!("varmap lock poisoned: {err}"))?;
    let mut params = data
        .iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().flatten_all()?.to_vec1::<f32>()?)))
        .collect::<Result<Params>>()?;
    params.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(params)
}

/// The meta inputs of the first step of every environment in a batch.
#[derive(Debug)]
struct FirstRows {
    task: usize,
    update: usize,
    prev_actions: Vec<u32>,
    prev_rewards: Vec<f32>,
    timesteps: Vec<u32>,
    masks: Vec<bool>,
    states: Option<Vec<f32>>,
}

#[derive(Default)]
struct RecordingHooks {
    inits: usize,
    task_starts: Vec<(usize, Params)>,
    task_ends: Vec<(usize, Params)>,
    first_rows: Vec<FirstRows>,
    shutdowns: usize,
}

impl<N: MetaNetwork> TaskLoopHooks<N> for RecordingHooks {
    fn init_hook(&mut self, _params: &MetaA2CParams) -> Result<()> {
        self.inits += 1;
        Ok(())
    }

    fn task_start_hook(&mut self, task: usize, model: &MetaA2C<N>) -> Result<()> {
        self.task_starts.push((task, snapshot(model)?));
        Ok(())
    }

    fn post_update_hook(&mut self, report: &UpdateReport<'_>) -> Result<()> {
        let batch = report.batch;
        let rows: Vec<usize> = (0..batch.n_envs).map(|env| env * batch.n_steps).collect();
        self.first_rows.push(FirstRows {
            task: report.task,
            update: report.update,
            prev_actions: rows.iter().map(|r| batch.prev_actions[*r]).collect(),
            prev_rewards: rows.iter().map(|r| batch.prev_rewards[*r]).collect(),
            timesteps: rows.iter().map(|r| batch.timesteps[*r]).collect(),
            masks: rows.iter().map(|r| batch.masks[*r]).collect(),
            states: batch
                .states
                .as_ref()
                .map(|s| s.flatten_all().and_then(|s| s.to_vec1::<f32>()))
                .transpose()?,
        });
        Ok(())
    }

    fn task_end_hook(&mut self, task: usize, model: &MetaA2C<N>) -> Result<()> {
        self.task_ends.push((task, snapshot(model)?));
        Ok(())
    }

    fn shutdown_hook(&mut self) -> Result<()> {
        self.shutdowns += 1;
        Ok(())
    }
}

fn builder(network: NetworkConfig) -> MetaA2CBuilder {
    let mut builder = MetaA2CBuilder::default();
    builder.nsteps = 3;
    builder.total_timesteps = 12;
    builder.n_tasks = 3;
    builder.network = network;
    builder.seed = 7;
    builder
}

type RecordingLoop = TaskLoop<SequentialVecEnv<ConstantRewardEnv>, MetaNetworkKind, RecordingHooks>;

fn recording_loop(builder: &MetaA2CBuilder, counters: &HookCounters) -> Result<RecordingLoop> {
    let env = constant_reward_vec_env(2, 1., 100, counters)?;
    let model = builder.build_model(&env.env_description(), 2)?;
    TaskLoop::new(env, model, RecordingHooks::default(), builder.params().clone())
}

#[test]
fn meta_state_resets_at_every_task() -> Result<()> {
    let builder = builder(NetworkConfig::Lstm { hidden: 4 });
    let mut task_loop = recording_loop(&builder, &HookCounters::default())?;
    assert_eq!(task_loop.state(), TaskLoopState::Idle);
    task_loop.run()?;
    assert_eq!(task_loop.state(), TaskLoopState::Finished);

    let hooks = &task_loop.hooks;
    assert_eq!((hooks.inits, hooks.shutdowns), (1, 1));
    assert_eq!(hooks.first_rows.len(), 3 * 2);
    for rows in &hooks.first_rows {
        if rows.update == 1 {
            assert_eq!(rows.prev_actions, vec![0, 0], "{rows:?}");
            assert_eq!(rows.prev_rewards, vec![0., 0.], "{rows:?}");
            assert_eq!(rows.timesteps, vec![0, 0], "{rows:?}");
            assert_eq!(rows.masks, vec![false, false], "{rows:?}");
            let states = rows.states.as_ref().ok_or_else(|| anyhow!("missing states"))?;
            assert!(states.iter().all(|s| *s == 0.), "{rows:?}");
        } else {
            // carried over from the previous rollout of the same task
            assert_eq!(rows.prev_rewards, vec![1., 1.], "{rows:?}");
            assert_eq!(rows.timesteps, vec![3, 3], "{rows:?}");
            let states = rows.states.as_ref().ok_or_else(|| anyhow!("missing states"))?;
            assert!(states.iter().any(|s| *s != 0.), "{rows:?}");
        }
    }
    let tasks: Vec<usize> = hooks.first_rows.iter().map(|r| r.task).collect();
    assert_eq!(tasks, vec![1, 1, 2, 2, 3, 3]);
    Ok(())
}

#[test]
fn parameters_carry_over_between_tasks() -> Result<()> {
    let builder = builder(NetworkConfig::Mlp {
        hidden_layers: vec![8],
    });
    let mut task_loop = recording_loop(&builder, &HookCounters::default())?;
    task_loop.run()?;
    let hooks = &task_loop.hooks;
    assert_eq!(hooks.task_starts.len(), 3);
    assert_eq!(hooks.task_ends.len(), 3);
    for (end, next_start) in hooks.task_ends.iter().zip(&hooks.task_starts[1..]) {
        assert_eq!(end.0 + 1, next_start.0);
        assert_eq!(end.1, next_start.1);
    }
    assert_ne!(hooks.task_starts[0].1, hooks.task_starts[1].1);

    // the learning rate schedule spans every task
    let nbatch = task_loop.model.nbatch();
    assert_eq!(
        task_loop.model.scheduler().steps_consumed(),
        3 * task_loop.nupdates() * nbatch
    );
    Ok(())
}

#[test]
fn a_task_loop_runs_once() -> Result<()> {
    let builder = builder(NetworkConfig::Mlp {
        hidden_layers: vec![4],
    });
    let mut task_loop = recording_loop(&builder, &HookCounters::default())?;
    task_loop.run()?;
    let err = task_loop.run().err().ok_or_else(|| anyhow!("second run succeeded"))?;
    assert!(matches!(
        err.downcast_ref::<L2rlError>(),
        Some(L2rlError::Configuration(_))
    ));
    Ok(())
}

#[test]
fn environment_task_hooks() -> Result<()> {
    let mut builder = builder(NetworkConfig::Mlp {
        hidden_layers: vec![4],
    });
    let counters = HookCounters::default();
    recording_loop(&builder, &counters)?.run()?;
    assert_eq!(counters.next_task_calls(), 0);
    assert_eq!(counters.save_db_calls(), 3 * 2);

    builder.advance_env_task = true;
    let counters = HookCounters::default();
    recording_loop(&builder, &counters)?.run()?;
    assert_eq!(counters.next_task_calls(), 3 * 2);
    assert_eq!(counters.save_db_calls(), 3 * 2);
    Ok(())
}

#[test]
fn env_count_must_match_the_model() -> Result<()> {
    let builder = builder(NetworkConfig::Mlp {
        hidden_layers: vec![4],
    });
    let env = constant_reward_vec_env(3, 1., 10, &HookCounters::default())?;
    let model = builder.build_model(&env.env_description(), 2)?;
    let result = TaskLoop::new(env, model, RecordingHooks::default(), builder.params().clone());
    let err = result.err().ok_or_else(|| anyhow!("mismatched env count accepted"))?;
    assert!(matches!(
        err.downcast_ref::<L2rlError>(),
        Some(L2rlError::ShapeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn learn_returns_the_trained_model() -> Result<()> {
    let builder = builder(NetworkConfig::Lstm { hidden: 4 });
    let env = constant_reward_vec_env(2, 1., 5, &HookCounters::default())?;
    let model = builder.build_model(&env.env_description(), 2)?;
    let before = snapshot(&model)?;
    let model = learn(env, model, builder.params().clone(), None)?;
    assert_ne!(snapshot(&model)?, before);
    assert_eq!(model.scheduler().steps_consumed(), 3 * 2 * 6);
    Ok(())
}
