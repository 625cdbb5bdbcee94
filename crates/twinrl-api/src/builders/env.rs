use anyhow::Result;
use candle_core::Device;
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, path::Path, rc::Rc};
use tracing::warn;
use twinrl_core::{env::Env, utils::running_mean::RunningMeanStd};
use twinrl_envs::{
    NormalizedEnv, Pendulum, PointMass, SharedObsStats, TimeLimit,
    wrappers::normalized::NormalizeConfig,
};

/// Name of the observation statistics inside a checkpoint directory.
pub const OBS_STATS_FILE: &str = "obs_stats.safetensors";

pub type BoxedEnv = Box<dyn Env>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    Pendulum,
    PointMass,
}

/// Which environment to train on and how it is wrapped. Every environment is time limited and
/// sees actions in `[-1, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub kind: EnvKind,
    pub max_path_length: usize,
    pub normalize: NormalizeConfig,
    /// Only used by `PointMass`.
    pub goal_radius: f32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            kind: EnvKind::Pendulum,
            max_path_length: 200,
            normalize: NormalizeConfig::default(),
            goal_radius: 0.05,
        }
    }
}

impl EnvConfig {
    pub fn pendulum() -> Self {
        Self::default()
    }

    pub fn point_mass() -> Self {
        Self {
            kind: EnvKind::PointMass,
            max_path_length: 100,
            ..Default::default()
        }
    }

    /// A training environment with its own observation statistics.
    pub fn build(&self, device: &Device) -> Result<BoxedEnv> {
        self.build_with_stats(device, None)
    }

    /// A training environment that updates `stats`, so that several environments and the
    /// evaluation can share one normalization.
    pub fn build_with_stats(
        &self,
        device: &Device,
        stats: Option<&SharedObsStats>,
    ) -> Result<BoxedEnv> {
        let mut env = self.normalized(device)?;
        if let Some(stats) = stats {
            env = env.with_obs_stats(stats.clone())?;
        }
        Ok(Box::new(env))
    }

    /// An evaluation environment normalizing observations with a frozen copy of `stats`.
    pub fn build_eval(&self, device: &Device, stats: Option<RunningMeanStd>) -> Result<BoxedEnv> {
        let mut env = self.normalized(device)?;
        match stats {
            Some(stats) => env = env.with_obs_stats(Rc::new(RefCell::new(stats)))?,
            None if self.normalize.normalize_obs => {
                warn!("evaluating without training statistics, observations are barely normalized")
            }
            None => {}
        }
        Ok(Box::new(env.freeze_obs_stats()))
    }

    /// Fresh statistics to share between training environments, `None` unless observations
    /// are normalized.
    pub fn new_obs_stats(&self, device: &Device) -> Result<Option<SharedObsStats>> {
        if !self.normalize.normalize_obs {
            return Ok(None);
        }
        let size = self.time_limited(device).env_description().observation_size();
        let stats = RunningMeanStd::new(size, device)?;
        Ok(Some(Rc::new(RefCell::new(stats))))
    }

    /// Statistics written next to a checkpoint, `None` unless observations are normalized.
    pub fn load_obs_stats(
        &self,
        dir: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Option<RunningMeanStd>> {
        if !self.normalize.normalize_obs {
            return Ok(None);
        }
        Ok(Some(RunningMeanStd::load(dir.as_ref().join(OBS_STATS_FILE), device)?))
    }

    fn normalized(&self, device: &Device) -> Result<NormalizedEnv<BoxedEnv>> {
        NormalizedEnv::new(
            self.time_limited(device),
            self.normalize.clone(),
            device.clone(),
        )
    }

    fn time_limited(&self, device: &Device) -> BoxedEnv {
        let env: BoxedEnv = match self.kind {
            EnvKind::Pendulum => Box::new(Pendulum::new(device.clone())),
            EnvKind::PointMass => Box::new(PointMass::new(self.goal_radius, device.clone())),
        };
        Box::new(TimeLimit::new(env, self.max_path_length))
    }
}
