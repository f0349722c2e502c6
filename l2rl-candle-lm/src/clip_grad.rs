use anyhow::Result;
use candle_core::Tensor;
use candle_core::backprop::GradStore;
use candle_nn::VarMap;
use l2rl_core::error::L2rlError;

/// Global L2 norm over the gradients of every variable in `varmap`.
pub fn global_norm(grad_store: &GradStore, varmap: &VarMap) -> Result<f32> {
    let mut total_norm_squared = 0.0f32;
    for var in varmap.all_vars().iter() {
        if let Some(grad) = grad_store.get(var.as_tensor()) {
            total_norm_squared += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }
    Ok(total_norm_squared.sqrt())
}

/// Backpropagates `t` and rescales the gradients so their global norm is at most `max_norm`.
/// Returns the gradients together with the norm measured before clipping.
pub fn clip_grad(t: &Tensor, varmap: &VarMap, max_norm: Option<f32>) -> Result<(GradStore, f32)> {
    let mut grad_store = t.backward()?;
    let total_norm = global_norm(&grad_store, varmap)?;
    if !total_norm.is_finite() {
        return Err(L2rlError::InvalidGradient { norm: total_norm }.into());
    }
    let Some(max_norm) = max_norm else {
        return Ok((grad_store, total_norm));
    };
    if total_norm > max_norm {
        let clip_coef = (max_norm / (total_norm + 1e-6)) as f64;
        for var in varmap.all_vars().iter() {
            let Some(old_grad) = grad_store.get(var.as_tensor()) else {
                continue;
            };
            let new_grad = old_grad.affine(clip_coef, 0.)?;
            grad_store.insert(var.as_tensor(), new_grad);
        }
    }
    Ok((grad_store, total_norm))
}
