use anyhow::Result;
use candle_core::{Tensor, backprop::GradStore};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use std::fmt::Debug;
use tracing::trace;

/// Rescales the gradients of the variables in `varmap` so that their global norm is at most
/// `max_norm`. Gradients of other variables are left alone. Returns the norm before clipping.
pub fn clip_grad(grads: &mut GradStore, varmap: &VarMap, max_norm: f32) -> Result<f32> {
    let vars = varmap.all_vars();
    let mut total_norm_squared = 0f32;
    for var in vars.iter() {
        if let Some(grad) = grads.get(var) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    let total_norm = total_norm_squared.sqrt();
    if total_norm > max_norm {
        trace!(total_norm, max_norm, "clipping gradients");
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        for var in vars.iter() {
            let Some(grad) = grads.get(var) else {
                continue;
            };
            let clipped = grad.affine(clip_coef, 0.)?;
            grads.insert(var, clipped);
        }
    }
    Ok(total_norm)
}

/// AdamW bound to the variables of a single `VarMap`, with optional global gradient norm
/// clipping.
pub struct OptimizerWithMaxGrad {
    pub optimizer: AdamW,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl Debug for OptimizerWithMaxGrad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("learning_rate", &self.optimizer.learning_rate())
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl OptimizerWithMaxGrad {
    pub fn new(optimizer: AdamW, max_grad_norm: Option<f32>, varmap: VarMap) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            varmap,
        }
    }

    /// Plain Adam on every variable of `varmap`. Weight decay is applied explicitly through the
    /// loss, see `regularization::l2_loss`.
    pub fn adam(varmap: VarMap, learning_rate: f64, max_grad_norm: Option<f32>) -> Result<Self> {
        let params = ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self::new(optimizer, max_grad_norm, varmap))
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Steps the bound variables with gradients that were already computed. Used when a single
    /// backward pass feeds several optimizers.
    pub fn step(&mut self, grads: &mut GradStore) -> Result<()> {
        if let Some(max_norm) = self.max_grad_norm {
            clip_grad(grads, &self.varmap, max_norm)?;
        }
        self.optimizer.step(grads)?;
        Ok(())
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let mut grads = loss.backward()?;
        self.step(&mut grads)
    }
}

#[cfg(test)]
mod test {
    use super::{OptimizerWithMaxGrad, clip_grad};
    use anyhow::Result;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarMap};

    #[test]
    fn clipping_bounds_the_global_norm() -> Result<()> {
        let varmap = VarMap::new();
        let w = varmap.get(4, "w", Init::Const(1.), DType::F32, &Device::Cpu)?;
        let loss = w.affine(10., 0.)?.sum_all()?;
        let mut grads = loss.backward()?;
        let norm = clip_grad(&mut grads, &varmap, 1.)?;
        assert!((norm - 20.).abs() < 1e-4);
        let grad = grads.get(&w).ok_or_else(|| anyhow::anyhow!("no gradient"))?;
        let clipped_norm = grad.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?;
        assert!((clipped_norm - 1.).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn step_moves_only_bound_variables() -> Result<()> {
        let bound = VarMap::new();
        let other = VarMap::new();
        let a = bound.get(2, "a", Init::Const(1.), DType::F32, &Device::Cpu)?;
        let b = other.get(2, "b", Init::Const(1.), DType::F32, &Device::Cpu)?;
        let mut optimizer = OptimizerWithMaxGrad::adam(bound, 0.1, Some(0.5))?;
        let loss = (&a + &b)?.sqr()?.sum_all()?;
        optimizer.backward_step(&loss)?;
        let a: Vec<f32> = a.to_vec1()?;
        let b: Vec<f32> = b.to_vec1()?;
        assert!(a.iter().all(|x| *x < 1.));
        assert_eq!(b, vec![1., 1.]);
        Ok(())
    }
}
