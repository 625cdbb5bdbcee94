use anyhow::{Result, anyhow};
use candle_core::{Device, Tensor};
use twinrl_api::{
    builders::env::EnvConfig,
    test_utils::{assert_all_finite, improved, quick_td3},
    utils::evaluator::Evaluator,
};
use twinrl_core::{
    Algorithm, env::Env, off_policy_algorithm::OffPolicyAgent, replay_buffer::ReplayBuffer, rng,
};
use twinrl_envs::Pendulum;

#[test]
fn td3_pendulum_short_run() -> Result<()> {
    rng::seed(0);
    let env = EnvConfig::pendulum().build(&Device::Cpu)?;
    let mut td3 = quick_td3(2).build(env, &Device::Cpu)?;
    td3.train()?;
    assert_eq!(td3.env_steps(), 800);
    // learning starts once the first cycle filled the buffer
    assert_eq!(td3.train_steps(), 160);
    assert_eq!(td3.hooks.average_returns.len(), 2);
    assert_all_finite("average_returns", &td3.hooks.average_returns);
    assert!(td3.agent.policy_network().sync().distance()? > 0.);
    Ok(())
}

#[test]
fn td3_waits_for_a_filled_buffer() -> Result<()> {
    rng::seed(1);
    let mut builder = quick_td3(1);
    builder.params.min_buffer_size = 10_000;
    let env = EnvConfig::point_mass().build(&Device::Cpu)?;
    let mut td3 = builder.build(env, &Device::Cpu)?;
    td3.train()?;
    assert_eq!(td3.train_steps(), 0);
    assert!(!td3.agent.ready_to_train());
    assert_eq!(td3.agent.replay_buffer().len(), 400);
    Ok(())
}

#[test]
fn td3_checkpoints_reproduce_the_policy() -> Result<()> {
    rng::seed(2);
    let config = EnvConfig::pendulum();
    let builder = quick_td3(1);
    let mut td3 = builder.build(config.build(&Device::Cpu)?, &Device::Cpu)?;
    td3.train()?;
    let dir = std::env::temp_dir().join(format!("twinrl-api-td3-{}", std::process::id()));
    td3.agent.save(&dir)?;

    let mut env = config.build(&Device::Cpu)?;
    let description = env.env_description();
    let mut restored = builder.build_agent(&Device::Cpu, &description)?;
    restored.load(&dir)?;
    std::fs::remove_dir_all(&dir)?;

    let mut evaluator = Evaluator::new(2, 200);
    rng::seed(10);
    let trained = evaluator.evaluate(&mut env, td3.agent.policy())?;
    rng::seed(10);
    let reloaded = evaluator.evaluate(&mut env, restored.policy())?;
    assert_eq!(trained, reloaded);
    Ok(())
}

#[test]
fn goal_conditioned_agents_take_wider_inputs() -> Result<()> {
    let device = Device::Cpu;
    let mut builder = quick_td3(1);
    builder.params.input_include_goal = true;
    let description = EnvConfig::point_mass().build(&device)?.env_description();
    assert!(builder.build_agent(&device, &description).is_err());

    builder.goal_dim = 2;
    let agent = builder.build_agent(&device, &description)?;
    assert_eq!(agent.replay_buffer().goal_dim(), 2);
    let input_width = agent
        .qf1_network()
        .online_vars()
        .all_vars()
        .iter()
        .map(|var| var.dims().to_vec())
        .find(|dims| dims.len() == 2 && dims[1] == 2 + 2 + 2);
    assert!(input_width.is_some(), "no critic layer reads obs + goal + action");
    // rollouts from these environments carry no goals
    assert!(builder.build(EnvConfig::point_mass().build(&device)?, &device).is_err());
    Ok(())
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
    Ok((a - b)?.abs()?.max(0)?.to_scalar::<f32>()?)
}

#[test]
fn evaluation_reuses_the_training_normalization() -> Result<()> {
    rng::seed(4);
    let device = Device::Cpu;
    let mut config = EnvConfig::pendulum();
    config.normalize.normalize_obs = true;
    let stats = config
        .new_obs_stats(&device)?
        .ok_or_else(|| anyhow!("observation normalization is enabled"))?;
    let env = config.build_with_stats(&device, Some(&stats))?;
    let mut td3 = quick_td3(1).build(env, &device)?;
    td3.train()?;
    let trained = stats.borrow().clone();
    assert!(trained.count > 400.);

    let mut eval_env = config.build_eval(&device, Some(trained.clone()))?;
    let mut raw = Pendulum::new(device.clone());
    let obs = eval_env.reset(42)?;
    let expected = trained.normalize(&raw.reset(42)?, 1e-8)?;
    assert!(max_abs_diff(&obs, &expected)? < 1e-6);
    for _ in 0..10 {
        // 0.5 in the unit action space is a torque of 1
        let snapshot = eval_env.step(&Tensor::new(&[0.5f32], &device)?)?;
        let raw_snapshot = raw.step(&Tensor::new(&[1f32], &device)?)?;
        let expected = trained.normalize(&raw_snapshot.state, 1e-8)?;
        assert!(max_abs_diff(&snapshot.state, &expected)? < 1e-6);
    }
    assert_eq!(stats.borrow().count, trained.count);
    Ok(())
}

#[test]
#[ignore = "long running benchmark"]
fn td3_pendulum_benchmark() -> Result<()> {
    rng::seed(3);
    let mut builder = quick_td3(40);
    builder.schedule.n_epoch_cycles = 10;
    builder.schedule.n_train_steps = 50;
    builder.params.min_buffer_size = 1000;
    builder.params.buffer_batch_size = 100;
    builder.params.target_update_tau = 0.005;
    let config = EnvConfig::pendulum();
    let mut td3 = builder.build(config.build(&Device::Cpu)?, &Device::Cpu)?;
    td3.train()?;
    assert!(improved(&td3.hooks.average_returns, 5));

    let mut env = config.build(&Device::Cpu)?;
    let mut evaluator = Evaluator::new(10, 200);
    let average_return = evaluator.evaluate(&mut env, td3.agent.policy())?;
    assert!(average_return > -400., "average return {average_return}");
    Ok(())
}
