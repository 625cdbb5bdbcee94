use candle_core::{DType, Device, Error, Result, Shape, Tensor, shape::Dim};
use std::{collections::HashMap, path::Path};

#[derive(Debug, Clone)]
pub struct RunningMeanStd {
    pub mean: Tensor,
    pub var: Tensor,
    pub count: f64,
}

pub fn biased_var<D: Dim>(t: &Tensor, dim: D) -> Result<Tensor> {
    let dim = dim.to_index(t.shape(), "var")?;
    let mean = t.mean_keepdim(dim)?;
    let squares = t.broadcast_sub(&mean)?.sqr()?;
    (squares.sum_keepdim(dim)? / t.dim(dim)? as f64)?.squeeze(dim)
}

impl RunningMeanStd {
    pub fn new<S: Into<Shape> + Copy>(shape: S, device: &Device) -> Result<Self> {
        Ok(Self {
            mean: Tensor::zeros(shape, DType::F32, device)?,
            var: Tensor::ones(shape, DType::F32, device)?,
            count: 1e-4,
        })
    }

    /// Updates the statistics with a batch of shape `[B, ..]`.
    pub fn update(&mut self, arr: &Tensor) -> Result<()> {
        let batch_mean = arr.mean(0)?;
        let batch_var = biased_var(arr, 0)?;
        let batch_count = arr.dim(0)? as f64;
        self.update_from_moments(batch_mean, batch_var, batch_count)
    }

    // parallel variant of Welford's algorithm
    fn update_from_moments(
        &mut self,
        batch_mean: Tensor,
        batch_var: Tensor,
        batch_count: f64,
    ) -> Result<()> {
        let delta = batch_mean.sub(&self.mean)?;
        let tot_count = self.count + batch_count;
        let new_mean = self.mean.add(&(&delta * (batch_count / tot_count))?)?;
        let m_a = (&self.var * self.count)?;
        let m_b = (batch_var * batch_count)?;
        let m_2 = m_a
            .add(&m_b)?
            .add(&(delta.sqr()? * (self.count * batch_count / tot_count))?)?;
        self.var = (m_2 / tot_count)?;
        self.mean = new_mean;
        self.count = tot_count;
        Ok(())
    }

    pub fn normalize(&self, t: &Tensor, epsilon: f64) -> Result<Tensor> {
        let std = (&self.var + epsilon)?.sqrt()?;
        t.broadcast_sub(&self.mean)?.broadcast_div(&std)
    }

    /// Writes `mean`, `var` and `count` to a safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let count = Tensor::new(&[self.count], self.mean.device())?;
        let tensors = HashMap::from([
            ("mean".to_string(), self.mean.clone()),
            ("var".to_string(), self.var.clone()),
            ("count".to_string(), count),
        ]);
        candle_core::safetensors::save(&tensors, path)
    }

    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let mut tensors = candle_core::safetensors::load(path, device)?;
        let mut take = |name: &str| {
            tensors
                .remove(name)
                .ok_or_else(|| Error::Msg(format!("running statistics lack `{name}`")))
        };
        let mean = take("mean")?;
        let var = take("var")?;
        let count = take("count")?.to_vec1::<f64>()?;
        let Some(&count) = count.first() else {
            return Err(Error::Msg("running statistics hold an empty count".into()));
        };
        if mean.shape() != var.shape() {
            return Err(Error::Msg(format!(
                "running mean of shape {:?} does not match variance of shape {:?}",
                mean.shape(),
                var.shape()
            )));
        }
        Ok(Self { mean, var, count })
    }
}

#[cfg(test)]
mod test {
    use super::{RunningMeanStd, biased_var};
    use crate::rng::RNG;
    use candle_core::{Device, Result, Tensor};
    use rand::Rng;

    #[test]
    fn test_biased_var() -> Result<()> {
        let test_t = Tensor::from_slice(
            &[
                0.48883059f32,
                0.48259816,
                0.79328812,
                0.19103859,
                0.11694599,
                0.53854045,
            ],
            (2, 3),
            &Device::Cpu,
        )?;
        let var = biased_var(&test_t, 0)?;
        let reference_var =
            Tensor::from_slice(&[0.02217002f32, 0.03342538, 0.01622409], 3, &Device::Cpu)?;
        let var_diff = (&var - &reference_var)?.abs()?.max(0)?;
        assert!(var_diff.to_scalar::<f32>()? < 1e-5, "var diff");
        Ok(())
    }

    #[test]
    fn test_running_mean_std_running() -> Result<()> {
        let device = Device::Cpu;
        let shape = (10, 3);
        let mut rms = RunningMeanStd::new(shape.1, &device)?;
        let mut all_data = vec![];

        for _ in 0..100 {
            let data: Vec<f32> =
                RNG.with_borrow_mut(|rng| (0..30).map(|_| rng.random_range(-1.0..1.0)).collect());
            let tensor = Tensor::from_slice(&data, shape, &device)?;
            rms.update(&tensor)?;
            all_data.extend(data);
        }

        let all_tensor = Tensor::from_slice(&all_data, (all_data.len() / 3, 3), &device)?;
        let reference_mean = all_tensor.mean(0)?;
        let reference_var = biased_var(&all_tensor, 0)?;

        let mean_diff = (&rms.mean - &reference_mean)?.abs()?.max(0)?;
        let var_diff = (&rms.var - &reference_var)?.abs()?.max(0)?;

        let eps = 1e-3;
        assert!(mean_diff.to_scalar::<f32>()? < eps, "mean mismatch");
        assert!(var_diff.to_scalar::<f32>()? < eps, "variance mismatch");
        Ok(())
    }

    #[test]
    fn statistics_survive_a_checkpoint() -> Result<()> {
        let device = Device::Cpu;
        let mut rms = RunningMeanStd::new(2, &device)?;
        rms.update(&Tensor::new(&[[1f32, -2.], [3., 0.5], [-1., 4.]], &device)?)?;
        let path = std::env::temp_dir().join(format!("twinrl-rms-{}.safetensors", std::process::id()));
        rms.save(&path)?;
        let restored = RunningMeanStd::load(&path, &device)?;
        std::fs::remove_file(&path)?;

        assert_eq!(restored.count, rms.count);
        assert_eq!(restored.mean.to_vec1::<f32>()?, rms.mean.to_vec1::<f32>()?);
        assert_eq!(restored.var.to_vec1::<f32>()?, rms.var.to_vec1::<f32>()?);
        Ok(())
    }
}
