use crate::clip_grad::clip_grad;
use anyhow::Result;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{Optimizer, VarMap};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsRmsProp {
    pub lr: f64,
    /// Decay of the running mean of squared gradients
    pub alpha: f64,
    pub eps: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            lr: 7e-4,
            alpha: 0.99,
            eps: 1e-5,
        }
    }
}

#[derive(Debug)]
struct VarRmsProp {
    var: Var,
    mean_square: Var,
}

/// RMSProp without momentum. The mean square slots start at one and epsilon is added under the
/// square root:
///
/// ```text
/// ms  <- alpha * ms + (1 - alpha) * g^2
/// var <- var - lr * g / sqrt(ms + eps)
/// ```
#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarRmsProp>,
    params: ParamsRmsProp,
}

impl RmsProp {
    pub fn params(&self) -> &ParamsRmsProp {
        &self.params
    }
}

impl Optimizer for RmsProp {
    type Config = ParamsRmsProp;

    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let mean_square = Var::from_tensor(&var.ones_like()?)?;
                Ok(VarRmsProp { var, mean_square })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let ParamsRmsProp { lr, alpha, eps } = self.params;
        for var in self.vars.iter() {
            let theta = &var.var;
            let mean_square = &var.mean_square;
            if let Some(g) = grads.get(theta) {
                let next_ms = mean_square
                    .affine(alpha, 0.)?
                    .add(&g.sqr()?.affine(1. - alpha, 0.)?)?;
                let delta = g.div(&next_ms.affine(1., eps)?.sqrt()?)?.affine(lr, 0.)?;
                theta.set(&theta.sub(&delta)?)?;
                mean_square.set(&next_ms)?;
            }
        }
        Ok(())
    }
}

/// An optimizer that clips the global gradient norm before every step.
pub struct OptimizerWithMaxGrad<O: Optimizer> {
    pub optimizer: O,
    pub max_grad_norm: Option<f32>,
    pub varmap: VarMap,
}

impl<O: Optimizer + Debug> Debug for OptimizerWithMaxGrad<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerWithMaxGrad")
            .field("optimizer", &self.optimizer)
            .field("max_grad_norm", &self.max_grad_norm)
            .finish()
    }
}

impl<O: Optimizer> OptimizerWithMaxGrad<O> {
    pub fn new(optimizer: O, max_grad_norm: Option<f32>, varmap: VarMap) -> Self {
        Self {
            optimizer,
            max_grad_norm,
            varmap,
        }
    }

    /// Applies one update with learning rate `lr`. Returns the gradient norm before clipping.
    pub fn backward_step(&mut self, loss: &Tensor, lr: f64) -> Result<f32> {
        let (grads, grad_norm) = clip_grad(loss, &self.varmap, self.max_grad_norm)?;
        self.optimizer.set_learning_rate(lr);
        self.optimizer.step(&grads)?;
        Ok(grad_norm)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn single_rmsprop_step() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(1, "w", Init::Const(1.))?;
        let params = ParamsRmsProp {
            lr: 0.1,
            alpha: 0.9,
            eps: 0.,
        };
        let mut opt = RmsProp::new(varmap.all_vars(), params)?;
        // gradient 2
        let loss = w.affine(2., 0.)?.sum_all()?;
        opt.backward_step(&loss)?;
        // ms = 0.9 * 1 + 0.1 * 4 = 1.3
        let expected = 1. - 0.1 * 2. / 1.3f32.sqrt();
        let w = varmap.all_vars()[0].to_vec1::<f32>()?;
        assert!((w[0] - expected).abs() < 1e-5, "{w:?}");
        Ok(())
    }

    #[test]
    fn max_grad_wrapper_sets_lr_and_reports_norm() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(4, "w", Init::Const(0.))?;
        let opt = RmsProp::new(varmap.all_vars(), ParamsRmsProp::default())?;
        let mut opt = OptimizerWithMaxGrad::new(opt, Some(0.5), varmap.clone());
        let loss = w.sum_all()?;
        let norm = opt.backward_step(&loss, 0.25)?;
        assert!((norm - 2.).abs() < 1e-5);
        assert_eq!(opt.optimizer.learning_rate(), 0.25);
        let w = varmap.all_vars()[0].to_vec1::<f32>()?;
        assert!(w.iter().all(|x| *x < 0.));
        Ok(())
    }
}
