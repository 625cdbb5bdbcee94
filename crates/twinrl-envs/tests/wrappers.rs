use anyhow::Result;
use candle_core::{Device, Tensor};
use twinrl_core::{env::Env, sampler::EnvWorker};
use twinrl_envs::{
    NormalizedEnv, Pendulum, PointMass, TimeLimit, wrappers::normalized::NormalizeConfig,
};

#[test]
fn time_limit_truncates_without_terminating() -> Result<()> {
    let mut env = TimeLimit::new(Pendulum::default(), 5);
    env.reset(0)?;
    let action = Tensor::new(&[0f32], &Device::Cpu)?;
    for step in 1..=5 {
        let snapshot = env.step(&action)?;
        assert_eq!(snapshot.truncated, step == 5);
        assert!(!snapshot.terminated);
    }
    env.reset(1)?;
    assert_eq!(env.elapsed(), 0);
    Ok(())
}

#[test]
fn termination_wins_over_truncation() -> Result<()> {
    let mut inner = PointMass::default();
    inner.set_position([0.01, 0.]);
    let mut env = TimeLimit::new(inner, 1);
    let snapshot = env.step(&Tensor::new(&[0f32, 0.], &Device::Cpu)?)?;
    assert!(snapshot.terminated);
    assert!(!snapshot.truncated);
    Ok(())
}

#[test]
fn wrapped_envs_run_inside_a_worker() -> Result<()> {
    let env = NormalizedEnv::new(
        TimeLimit::new(Pendulum::default(), 10),
        NormalizeConfig {
            normalize_obs: true,
            reward_scale: 0.1,
        },
        Device::Cpu,
    )?;
    let mut worker = EnvWorker::new(env, None);
    let mut episodes = 0;
    for _ in 0..30 {
        let step = worker.step(Tensor::new(&[0.5f32], &Device::Cpu)?)?;
        assert!(step.reward <= 0.);
        assert!(!step.terminated);
        if step.done {
            episodes += 1;
        }
    }
    assert_eq!(episodes, 3);
    Ok(())
}
