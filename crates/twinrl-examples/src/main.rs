use anyhow::Result;
use candle_core::Device;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use twinrl_api::{
    builders::env::{EnvConfig, EnvKind},
    config::{AlgorithmKind, ExperimentConfig},
};
use twinrl_core::error::TwinRlError;
use twinrl_examples::{env_sizes, evaluate_checkpoint, run_experiment};

#[derive(Parser, Debug)]
#[command(name = "twinrl", version, about = "Train TD3 or PPO agents on continuous control tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Twin delayed deep deterministic policy gradient
    Td3(RunArgs),
    /// Proximal policy optimization
    Ppo(RunArgs),
    /// Evaluate a TD3 checkpoint, the configuration must match the one it was trained with
    Eval(RunArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum EnvArg {
    Pendulum,
    PointMass,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, value_enum)]
    env: Option<EnvArg>,
    /// TD3 epochs, or PPO rollouts
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// JSON experiment file, command line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    checkpoint_dir: Option<String>,
    #[arg(long)]
    eval_episodes: Option<usize>,
}

impl RunArgs {
    fn experiment(self, algorithm: AlgorithmKind) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_file(path)?,
            None => ExperimentConfig::default(),
        };
        config.algorithm = algorithm;
        if let Some(env) = self.env {
            let kind = match env {
                EnvArg::Pendulum => EnvKind::Pendulum,
                EnvArg::PointMass => EnvKind::PointMass,
            };
            if kind != config.env.kind {
                config.env = match kind {
                    EnvKind::Pendulum => EnvConfig::pendulum(),
                    EnvKind::PointMass => EnvConfig::point_mass(),
                };
            }
        }
        if let Some(epochs) = self.epochs {
            config.td3.schedule.n_epochs = epochs;
            config.ppo.total_steps = epochs * config.ppo.n_steps * config.ppo.n_envs;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(dir) = self.checkpoint_dir {
            config.checkpoint_dir = Some(dir);
        }
        if let Some(eval_episodes) = self.eval_episodes {
            config.eval_episodes = eval_episodes;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let device = Device::Cpu;
    let config = match cli.command {
        Command::Td3(args) => args.experiment(AlgorithmKind::Td3)?,
        Command::Ppo(args) => args.experiment(AlgorithmKind::Ppo)?,
        Command::Eval(args) => {
            let config = args.experiment(AlgorithmKind::Td3)?;
            let Some(dir) = &config.checkpoint_dir else {
                return Err(TwinRlError::InvalidConfig(
                    "eval needs --checkpoint-dir".into(),
                )
                .into());
            };
            let eval_return = evaluate_checkpoint(&config, dir, &device)?;
            info!(eval_return, "done");
            return Ok(());
        }
    };
    let (observation_size, action_size) = env_sizes(&config, &device)?;
    info!(observation_size, action_size, "environment ready");
    let report = run_experiment(&config, &device)?;
    info!(
        last_train_return = report.train_returns.last().copied(),
        eval_return = report.eval_return,
        "done"
    );
    Ok(())
}
