use anyhow::Result;
use candle_core::Device;
use std::path::Path;
use tracing::{info, warn};
use twinrl_api::{
    builders::env::OBS_STATS_FILE,
    config::{AlgorithmKind, ExperimentConfig},
    utils::evaluator::Evaluator,
};
use twinrl_core::{
    Algorithm, env::Env, error::TwinRlError, off_policy_algorithm::OffPolicyAgent,
    on_policy_algorithm::OnPolicyAgent, policies::Policy, rng,
    utils::running_mean::RunningMeanStd,
};

#[derive(Debug, Clone, Default)]
pub struct ExperimentReport {
    /// Average return of the training episodes, per epoch for TD3 and per rollout for PPO.
    pub train_returns: Vec<f32>,
    pub eval_return: Option<f32>,
}

pub fn run_experiment(config: &ExperimentConfig, device: &Device) -> Result<ExperimentReport> {
    rng::seed(config.seed);
    info!(
        algorithm = ?config.algorithm,
        env = ?config.env.kind,
        seed = config.seed,
        "starting experiment"
    );
    match config.algorithm {
        AlgorithmKind::Td3 => run_td3(config, device),
        AlgorithmKind::Ppo => run_ppo(config, device),
    }
}

/// Evaluation episodes are seeded from the experiment seed and see observations normalized with
/// the statistics gathered during training.
fn evaluate(
    config: &ExperimentConfig,
    device: &Device,
    policy: &dyn Policy,
    obs_stats: Option<RunningMeanStd>,
) -> Result<Option<f32>> {
    if config.eval_episodes == 0 {
        return Ok(None);
    }
    rng::seed(config.seed);
    let mut env = config.env.build_eval(device, obs_stats)?;
    let mut evaluator = Evaluator::new(config.eval_episodes, config.env.max_path_length);
    Ok(Some(evaluator.evaluate(&mut env, policy)?))
}

fn run_td3(config: &ExperimentConfig, device: &Device) -> Result<ExperimentReport> {
    let obs_stats = config.env.new_obs_stats(device)?;
    let env = config.env.build_with_stats(device, obs_stats.as_ref())?;
    let mut td3 = config.td3.build(env, device)?;
    td3.train()?;
    let obs_stats = obs_stats.map(|stats| stats.borrow().clone());
    if let Some(dir) = &config.checkpoint_dir {
        td3.agent.save(dir)?;
        if let Some(stats) = &obs_stats {
            stats.save(Path::new(dir).join(OBS_STATS_FILE))?;
        }
        info!(dir = dir.as_str(), "checkpoint written");
    }
    Ok(ExperimentReport {
        train_returns: td3.hooks.average_returns.clone(),
        eval_return: evaluate(config, device, td3.agent.policy(), obs_stats)?,
    })
}

fn run_ppo(config: &ExperimentConfig, device: &Device) -> Result<ExperimentReport> {
    let obs_stats = config.env.new_obs_stats(device)?;
    let mut ppo = config.ppo.build(
        || config.env.build_with_stats(device, obs_stats.as_ref()),
        device,
    )?;
    ppo.train()?;
    if config.checkpoint_dir.is_some() {
        warn!("checkpoints are only written for td3");
    }
    let obs_stats = obs_stats.map(|stats| stats.borrow().clone());
    Ok(ExperimentReport {
        train_returns: ppo.hooks.average_returns.clone(),
        eval_return: evaluate(config, device, ppo.agent.policy(), obs_stats)?,
    })
}

/// Evaluates a TD3 checkpoint written by [`run_experiment`], weights and observation statistics
/// both come from `dir`.
pub fn evaluate_checkpoint(
    config: &ExperimentConfig,
    dir: impl AsRef<Path>,
    device: &Device,
) -> Result<Option<f32>> {
    if config.algorithm != AlgorithmKind::Td3 {
        return Err(
            TwinRlError::InvalidConfig("only td3 checkpoints can be evaluated".into()).into(),
        );
    }
    let dir = dir.as_ref();
    let description = config.env.build(device)?.env_description();
    let mut agent = config.td3.build_agent(device, &description)?;
    agent.load(dir)?;
    let obs_stats = config.env.load_obs_stats(dir, device)?;
    info!(dir = %dir.display(), "checkpoint loaded");
    evaluate(config, device, agent.policy(), obs_stats)
}

/// Observation and action sizes of the configured environment.
pub fn env_sizes(config: &ExperimentConfig, device: &Device) -> Result<(usize, usize)> {
    let description = config.env.build(device)?.env_description();
    Ok((description.observation_size(), description.action_size()))
}

#[cfg(test)]
mod test {
    use super::{env_sizes, evaluate_checkpoint, run_experiment};
    use anyhow::Result;
    use candle_core::Device;
    use twinrl_api::{
        builders::env::{EnvConfig, OBS_STATS_FILE},
        config::{AlgorithmKind, ExperimentConfig},
    };

    fn tiny_config(algorithm: AlgorithmKind) -> Result<ExperimentConfig> {
        let mut config = ExperimentConfig::from_json(
            r#"{
                "eval_episodes": 2,
                "td3": {
                    "params": { "min_buffer_size": 50, "buffer_batch_size": 16 },
                    "policy_layers": [16],
                    "qf_layers": [16],
                    "schedule": { "n_epochs": 1, "n_epoch_cycles": 2, "env_steps_per_cycle": 50, "n_train_steps": 5 }
                },
                "ppo": { "n_steps": 100, "total_steps": 100, "policy_layers": [16], "params": { "sample_size": 20, "max_epochs": 2 } }
            }"#,
        )?;
        config.algorithm = algorithm;
        config.env = EnvConfig {
            max_path_length: 50,
            ..EnvConfig::point_mass()
        };
        Ok(config)
    }

    #[test]
    fn td3_experiment_reports_returns() -> Result<()> {
        let report = run_experiment(&tiny_config(AlgorithmKind::Td3)?, &Device::Cpu)?;
        assert!(report.train_returns.iter().all(|r| r.is_finite()));
        assert!(report.eval_return.is_some_and(f32::is_finite));
        Ok(())
    }

    #[test]
    fn ppo_experiment_reports_returns() -> Result<()> {
        let report = run_experiment(&tiny_config(AlgorithmKind::Ppo)?, &Device::Cpu)?;
        assert!(report.eval_return.is_some_and(f32::is_finite));
        Ok(())
    }

    #[test]
    fn td3_checkpoints_carry_the_observation_statistics() -> Result<()> {
        let mut config = tiny_config(AlgorithmKind::Td3)?;
        config.env.normalize.normalize_obs = true;
        let dir =
            std::env::temp_dir().join(format!("twinrl-examples-td3-{}", std::process::id()));
        config.checkpoint_dir = Some(dir.to_string_lossy().into_owned());

        let report = run_experiment(&config, &Device::Cpu)?;
        assert!(dir.join(OBS_STATS_FILE).exists());
        let restored = evaluate_checkpoint(&config, &dir, &Device::Cpu)?;
        std::fs::remove_dir_all(&dir)?;
        assert_eq!(report.eval_return, restored);
        Ok(())
    }

    #[test]
    fn ppo_checkpoints_are_not_evaluated() -> Result<()> {
        let config = tiny_config(AlgorithmKind::Ppo)?;
        assert!(evaluate_checkpoint(&config, std::env::temp_dir(), &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn point_mass_sizes() -> Result<()> {
        let sizes = env_sizes(&tiny_config(AlgorithmKind::Td3)?, &Device::Cpu)?;
        assert_eq!(sizes, (2, 2));
        Ok(())
    }
}
