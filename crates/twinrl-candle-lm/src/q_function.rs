use crate::thread_safe_sequential::{ThreadSafeSequential, build_sequential};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Module, VarBuilder};
use twinrl_core::policies::QFunction;

/// Q(s, a) as an MLP over the concatenation of observation and action.
#[derive(Debug, Clone)]
pub struct ContinuousMlpQFunction {
    net: ThreadSafeSequential,
}

impl ContinuousMlpQFunction {
    pub fn new(net: ThreadSafeSequential) -> Self {
        Self { net }
    }

    pub fn build(
        observation_size: usize,
        action_size: usize,
        hidden_sizes: &[usize],
        vb: &VarBuilder,
        prefix: &str,
    ) -> Result<Self> {
        let layers: Vec<usize> = hidden_sizes.iter().copied().chain([1]).collect();
        let net = build_sequential(observation_size + action_size, &layers, vb, prefix)?;
        Ok(Self::new(net))
    }

    pub fn forward(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let xs = Tensor::cat(&[observations, actions], 1)?;
        Ok(self.net.forward(&xs)?)
    }
}

impl QFunction for ContinuousMlpQFunction {
    fn get_qval(&self, observations: &Tensor, actions: &Tensor) -> Result<Tensor> {
        self.forward(observations, actions)
    }
}

#[cfg(test)]
mod test {
    use super::ContinuousMlpQFunction;
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{VarBuilder, VarMap};
    use twinrl_core::policies::QFunction;

    #[test]
    fn qvals_are_a_column() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let qf = ContinuousMlpQFunction::build(3, 1, &[16, 16], &vb, "qf1_")?;
        let obs = Tensor::randn(0f32, 1., (7, 3), &Device::Cpu)?;
        let act = Tensor::randn(0f32, 1., (7, 1), &Device::Cpu)?;
        assert_eq!(qf.get_qval(&obs, &act)?.dims(), &[7, 1]);
        Ok(())
    }
}
