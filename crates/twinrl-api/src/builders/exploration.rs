use anyhow::Result;
use serde::{Deserialize, Serialize};
use twinrl_core::{
    env::Space,
    exploration::{ExplorationStrategy, GaussianStrategy, OuStrategy},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplorationConfig {
    Gaussian {
        max_sigma: f32,
        min_sigma: f32,
        decay_period: usize,
    },
    OrnsteinUhlenbeck {
        sigma: f32,
        theta: f32,
        dt: f32,
    },
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self::Gaussian {
            max_sigma: 0.1,
            min_sigma: 0.1,
            decay_period: 1_000_000,
        }
    }
}

impl ExplorationConfig {
    pub fn build(&self, action_space: &Space) -> Result<Box<dyn ExplorationStrategy>> {
        match *self {
            Self::Gaussian {
                max_sigma,
                min_sigma,
                decay_period,
            } => Ok(Box::new(GaussianStrategy::new(
                action_space,
                max_sigma,
                min_sigma,
                decay_period,
            )?)),
            Self::OrnsteinUhlenbeck { sigma, theta, dt } => Ok(Box::new(OuStrategy::new(
                action_space,
                0.,
                sigma,
                theta,
                dt,
            )?)),
        }
    }
}
