use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder, linear};
use either::Either;

#[derive(Debug, Clone)]
pub struct LinearLayer {
    layer: Linear,
    in_dim: usize,
    out_dim: usize,
}

impl LinearLayer {
    pub fn new(in_dim: usize, out_dim: usize, vb: &VarBuilder, prefix: &str) -> Result<Self> {
        let layer = linear(in_dim, out_dim, vb.pp(prefix))?;
        Ok(Self {
            layer,
            in_dim,
            out_dim,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
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

/// A `Sequential` that only holds linear layers and activations, so it is `Send + Sync` and can
/// be cloned into worker threads.
#[derive(Default, Debug, Clone)]
pub struct ThreadSafeSequential {
    layers: Vec<ThreadSafeLayer>,
    out_dim: Option<usize>,
}

impl Module for ThreadSafeSequential {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in self.layers.iter() {
            xs = layer.forward(&xs)?
        }
        Ok(xs)
    }
}

impl ThreadSafeSequential {
    pub fn add_layer(mut self, layer: ThreadSafeLayer) -> Self {
        if let Either::Left(linear) = &layer.0 {
            self.out_dim = Some(linear.out_dim());
        }
        self.layers.push(layer);
        self
    }

    /// Width of the last linear layer, `None` if there is none.
    pub fn out_dim(&self) -> Option<usize> {
        self.out_dim
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Linear layers of the given widths with `activation` after every one of them, the last
/// included. Parameters are named `{prefix}{layer_idx}`.
pub fn build_torso(
    input_dim: usize,
    layers: &[usize],
    activation: Activation,
    vb: &VarBuilder,
    prefix: &str,
) -> Result<ThreadSafeSequential> {
    let mut last_dim = input_dim;
    let mut nn = ThreadSafeSequential::default();
    for (layer_idx, layer_size) in layers.iter().enumerate() {
        let layer_pp = format!("{prefix}{layer_idx}");
        let lin_layer = LinearLayer::new(last_dim, *layer_size, vb, &layer_pp)?;
        nn = nn
            .add_layer(ThreadSafeLayer::linear(lin_layer))
            .add_layer(ThreadSafeLayer::activation(ActivationLayer(activation)));
        last_dim = *layer_size;
    }
    Ok(nn)
}
