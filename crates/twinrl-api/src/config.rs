//! Experiment files.
//!
//! An experiment is a JSON document. Every field is optional and falls back to its default, so
//! the smallest valid file is `{}`:
//!
//! ```json
//! {
//!   "algorithm": "td3",
//!   "seed": 1,
//!   "env": { "kind": "pendulum", "max_path_length": 200 },
//!   "td3": { "params": { "policy_delay": 2 }, "schedule": { "n_epochs": 100 } }
//! }
//! ```

use crate::builders::{env::EnvConfig, ppo::PpoBuilder, td3::Td3Builder};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    #[default]
    Td3,
    Ppo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub algorithm: AlgorithmKind,
    pub seed: u64,
    pub env: EnvConfig,
    /// Evaluation episodes run after training.
    pub eval_episodes: usize,
    /// Weights are written here after training when set.
    pub checkpoint_dir: Option<String>,
    pub td3: Td3Builder,
    pub ppo: PpoBuilder,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::Td3,
            seed: 1,
            env: EnvConfig::default(),
            eval_episodes: 10,
            checkpoint_dir: None,
            td3: Td3Builder::default(),
            ppo: PpoBuilder::default(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading experiment file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing experiment file {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
