use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};
use either::Either;

/// Dense layer whose parameters live under `{prefix}.weight` and `{prefix}.bias` in the var map.
#[derive(Debug, Clone)]
pub struct LinearLayer {
    layer: Linear,
    prefix: String,
}

impl LinearLayer {
    pub fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder, prefix: &str) -> Result<Self> {
        let layer = linear(in_dim, out_dim, vb.pp(prefix))?;
        Ok(Self {
            layer,
            prefix: prefix.to_owned(),
        })
    }

    pub fn weight_name(&self) -> String {
        format!("{}.weight", self.prefix)
    }

    pub fn out_dim(&self) -> usize {
        self.layer.weight().dims()[0]
    }
}

impl Module for LinearLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.layer.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct ActivationLayer(pub Activation);

impl Module for ActivationLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.0.forward(xs)
    }
}

#[derive(Debug, Clone)]
pub struct ThreadSafeLayer(pub Either<LinearLayer, ActivationLayer>);

impl ThreadSafeLayer {
    pub fn linear(linear: LinearLayer) -> Self {
        Self(Either::Left(linear))
    }

    pub fn activation(activation: ActivationLayer) -> Self {
        Self(Either::Right(activation))
    }
}

impl Module for ThreadSafeLayer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match &self.0 {
            Either::Left(linear) => linear.forward(xs),
            Either::Right(activation) => activation.forward(xs),
        }
    }
}

/// Sequential stack of layers. Unlike `candle_nn::Sequential` it is `Clone + Send + Sync`, so
/// networks can be shared between the policy handed to samplers and the learner.
#[derive(Default, Debug, Clone)]
pub struct ThreadSafeSequential {
    layers: Vec<ThreadSafeLayer>,
}

impl ThreadSafeSequential {
    pub fn add_layer(mut self, layer: ThreadSafeLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Names of the weight matrices, in forward order.
    pub fn weight_names(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.0.as_ref().left().map(|l| l.weight_name()))
            .collect()
    }

    pub fn output_dim(&self) -> Option<usize> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.0.as_ref().left().map(|l| l.out_dim()))
    }
}

impl Module for ThreadSafeSequential {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs))
    }
}

/// MLP with `activation` between hidden layers and a linear output. `layers` lists the output
/// size of every dense layer, the last entry being the network output. Parameters are named
/// `{prefix}{layer_idx}.weight` and `{prefix}{layer_idx}.bias`.
pub fn build_sequential_with_activation(
    input_dim: usize,
    layers: &[usize],
    activation: Activation,
    vb: &VarBuilder,
    prefix: &str,
) -> Result<ThreadSafeSequential> {
    let mut last_dim = input_dim;
    let mut nn = ThreadSafeSequential::default();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        if layer_idx > 0 {
            nn = nn.add_layer(ThreadSafeLayer::activation(ActivationLayer(activation)));
        }
        let layer_pp = format!("{prefix}{layer_idx}");
        let layer = LinearLayer::new(last_dim, *layer_size, vb, &layer_pp)?;
        nn = nn.add_layer(ThreadSafeLayer::linear(layer));
        last_dim = *layer_size;
    }
    Ok(nn)
}

pub fn build_sequential(
    input_dim: usize,
    layers: &[usize],
    vb: &VarBuilder,
    prefix: &str,
) -> Result<ThreadSafeSequential> {
    build_sequential_with_activation(input_dim, layers, Activation::Relu, vb, prefix)
}
