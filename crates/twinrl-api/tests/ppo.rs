use anyhow::Result;
use candle_core::Device;
use twinrl_api::{
    builders::{env::EnvConfig, learning_module::LearningModuleType},
    test_utils::{assert_all_finite, improved, quick_ppo},
    utils::evaluator::Evaluator,
};
use twinrl_core::{Algorithm, on_policy_algorithm::OnPolicyAgent, rng};

#[test]
fn ppo_point_mass_short_run() -> Result<()> {
    rng::seed(0);
    let config = EnvConfig::point_mass();
    let mut ppo = quick_ppo(2048).build(|| config.build(&Device::Cpu), &Device::Cpu)?;
    ppo.train()?;
    let stats = ppo.agent.last_stats().unwrap();
    assert_all_finite(
        "ppo stats",
        &[stats.policy_loss, stats.value_loss, stats.entropy, stats.approx_kl],
    );
    assert_eq!(stats.epochs, 4);
    assert!(!ppo.hooks.average_returns.is_empty());
    assert_all_finite("average_returns", &ppo.hooks.average_returns);
    Ok(())
}

#[test]
fn ppo_decoupled_learning_module_trains() -> Result<()> {
    rng::seed(1);
    let mut builder = quick_ppo(512);
    builder.learning_module = LearningModuleType::default();
    let config = EnvConfig::pendulum();
    let mut ppo = builder.build(|| config.build(&Device::Cpu), &Device::Cpu)?;
    ppo.train()?;
    assert!(ppo.agent.last_stats().is_some());
    assert_eq!(ppo.hooks.average_returns.len(), 1);
    Ok(())
}

#[test]
fn ppo_rejects_an_empty_sampler() {
    let mut builder = quick_ppo(512);
    builder.n_envs = 0;
    let config = EnvConfig::pendulum();
    assert!(builder.build(|| config.build(&Device::Cpu), &Device::Cpu).is_err());
}

#[test]
#[ignore = "long running benchmark"]
fn ppo_pendulum_benchmark() -> Result<()> {
    rng::seed(2);
    let mut builder = quick_ppo(1_000_000);
    builder.n_steps = 2048;
    builder.n_envs = 1;
    builder.params.sample_size = 64;
    builder.params.max_epochs = 10;
    let config = EnvConfig::pendulum();
    let mut ppo = builder.build(|| config.build(&Device::Cpu), &Device::Cpu)?;
    ppo.train()?;
    assert!(improved(&ppo.hooks.average_returns, 10));

    let mut env = config.build(&Device::Cpu)?;
    let mut evaluator = Evaluator::new(10, 200);
    let average_return = evaluator.evaluate(&mut env, ppo.agent.policy())?;
    assert!(average_return > -1000., "average return {average_return}");
    Ok(())
}
