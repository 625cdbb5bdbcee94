//! Shadow copies of trainable networks used to compute bootstrap targets.
//!
//! A `TargetNetwork` pairs the `VarMap` of an online network with the `VarMap` of a second
//! network of the same architecture. The target starts as a hard copy of the online weights and
//! then only ever moves through Polyak averaging:
//!
//! ```text
//! θ' ← τ·θ + (1 − τ)·θ'
//! ```
//!
//! The target variables are never handed to an optimizer.

use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use std::collections::HashMap;
use std::sync::MutexGuard;
use twinrl_core::error::TwinRlError;

pub struct TargetNetwork {
    online: VarMap,
    target: VarMap,
}

fn lock(varmap: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>> {
    varmap
        .data()
        .lock()
        .map_err(|err| anyhow!("var map lock poisoned: {err}"))
}

impl TargetNetwork {
    /// Pairs `online` with `target` and hard copies the online weights into the target.
    pub fn new(online: VarMap, target: VarMap) -> Result<Self> {
        if std::ptr::eq(online.data(), target.data()) {
            return Err(TwinRlError::ParameterMismatch(
                "online and target networks share their variables".into(),
            )
            .into());
        }
        let network = Self { online, target };
        network.check_compatible()?;
        network.hard_sync()?;
        Ok(network)
    }

    pub fn online(&self) -> &VarMap {
        &self.online
    }

    pub fn target(&self) -> &VarMap {
        &self.target
    }

    fn check_compatible(&self) -> Result<()> {
        let online = lock(&self.online)?;
        let target = lock(&self.target)?;
        if online.len() != target.len() {
            return Err(TwinRlError::ParameterMismatch(format!(
                "online network has {} variables, target network has {}",
                online.len(),
                target.len()
            ))
            .into());
        }
        for (name, var) in online.iter() {
            let Some(target_var) = target.get(name) else {
                return Err(TwinRlError::ParameterMismatch(format!(
                    "{name} is missing from the target network"
                ))
                .into());
            };
            if var.shape() != target_var.shape() {
                return Err(TwinRlError::ParameterMismatch(format!(
                    "{name} has shape {:?} online and {:?} in the target network",
                    var.shape(),
                    target_var.shape()
                ))
                .into());
            }
        }
        Ok(())
    }

    /// θ' ← θ
    pub fn hard_sync(&self) -> Result<()> {
        self.polyak(1.)
    }

    /// θ' ← τ·θ + (1 − τ)·θ', `tau` must lie in `[0, 1]`.
    pub fn soft_update(&self, tau: f32) -> Result<()> {
        if !(0. ..=1.).contains(&tau) {
            return Err(TwinRlError::InvalidConfig(format!("tau {tau} is outside [0, 1]")).into());
        }
        self.polyak(tau)
    }

    fn polyak(&self, tau: f32) -> Result<()> {
        if tau == 0. {
            return Ok(());
        }
        let online = lock(&self.online)?;
        let target = lock(&self.target)?;
        for (name, var) in online.iter() {
            let target_var = target.get(name).ok_or_else(|| {
                TwinRlError::ParameterMismatch(format!("{name} is missing from the target network"))
            })?;
            let updated = if tau == 1. {
                var.as_tensor().detach().copy()?
            } else {
                let online_part = var.as_tensor().affine(tau as f64, 0.)?;
                let target_part = target_var.as_tensor().affine(1. - tau as f64, 0.)?;
                (online_part + target_part)?.detach()
            };
            target_var.set(&updated)?;
        }
        Ok(())
    }

    /// Squared euclidean distance between the online and the target weights.
    pub fn distance(&self) -> Result<f32> {
        let online = lock(&self.online)?;
        let target = lock(&self.target)?;
        let mut distance = 0f32;
        for (name, var) in online.iter() {
            if let Some(target_var) = target.get(name) {
                let diff: Tensor = (var.as_tensor() - target_var.as_tensor())?;
                distance += diff.sqr()?.sum_all()?.to_scalar::<f32>()?;
            }
        }
        Ok(distance)
    }
}

/// An online network together with its target copy. Both are built by the same constructor so
/// their variables line up by name.
pub struct NetworkPair<M> {
    pub online: M,
    pub target: M,
    sync: TargetNetwork,
}

impl<M> NetworkPair<M> {
    pub fn build(device: &Device, build: impl Fn(&VarBuilder) -> Result<M>) -> Result<Self> {
        let online_vars = VarMap::new();
        let online = build(&VarBuilder::from_varmap(&online_vars, DType::F32, device))?;
        let target_vars = VarMap::new();
        let target = build(&VarBuilder::from_varmap(&target_vars, DType::F32, device))?;
        let sync = TargetNetwork::new(online_vars, target_vars)?;
        Ok(Self {
            online,
            target,
            sync,
        })
    }

    /// Trainable variables of the online network.
    pub fn online_vars(&self) -> &VarMap {
        self.sync.online()
    }

    pub fn target_vars(&self) -> &VarMap {
        self.sync.target()
    }

    pub fn sync(&self) -> &TargetNetwork {
        &self.sync
    }

    pub fn soft_update(&self, tau: f32) -> Result<()> {
        self.sync.soft_update(tau)
    }
}
