use anyhow::{Result, anyhow};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;

/// Σ ½‖W‖² over the weight matrices of `varmap`. Biases are not regularized.
pub fn l2_loss(varmap: &VarMap, device: &Device) -> Result<Tensor> {
    let data = varmap
        .data()
        .lock()
        .map_err(|err| anyhow!("var map lock poisoned: {err}"))?;
    let mut names: Vec<&String> = data.keys().filter(|name| name.ends_with("weight")).collect();
    names.sort();
    let mut loss = Tensor::zeros((), DType::F32, device)?;
    for name in names {
        let weight = data[name].as_tensor();
        loss = (loss + weight.sqr()?.sum_all()?.affine(0.5, 0.)?)?;
    }
    Ok(loss)
}

/// Adds `coeff · l2_loss(varmap)` to `loss`, skipping the graph entirely when `coeff` is zero.
pub fn with_weight_decay(loss: Tensor, varmap: &VarMap, coeff: f32) -> Result<Tensor> {
    if coeff == 0. {
        return Ok(loss);
    }
    let l2 = l2_loss(varmap, loss.device())?;
    Ok((loss + l2.affine(coeff as f64, 0.)?)?)
}

#[cfg(test)]
mod test {
    use super::{l2_loss, with_weight_decay};
    use anyhow::Result;
    use candle_core::{DType, Device, Tensor};
    use candle_nn::{Init, VarMap};

    #[test]
    fn only_weights_are_penalized() -> Result<()> {
        let varmap = VarMap::new();
        varmap.get((2, 2), "layer0.weight", Init::Const(2.), DType::F32, &Device::Cpu)?;
        varmap.get(2, "layer0.bias", Init::Const(100.), DType::F32, &Device::Cpu)?;
        let loss = l2_loss(&varmap, &Device::Cpu)?.to_scalar::<f32>()?;
        // 4 entries of 2² halved
        assert!((loss - 8.).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn zero_decay_leaves_the_loss_untouched() -> Result<()> {
        let varmap = VarMap::new();
        varmap.get(3, "w.weight", Init::Const(1.), DType::F32, &Device::Cpu)?;
        let loss = Tensor::new(1.5f32, &Device::Cpu)?;
        let same = with_weight_decay(loss.clone(), &varmap, 0.)?.to_scalar::<f32>()?;
        assert_eq!(same, 1.5);
        let decayed = with_weight_decay(loss, &varmap, 0.1)?.to_scalar::<f32>()?;
        assert!((decayed - 1.65).abs() < 1e-6);
        Ok(())
    }
}
