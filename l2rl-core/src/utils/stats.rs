fn variance(xs: impl Iterator<Item = f32> + Clone) -> f32 {
    let n = xs.clone().count();
    if n == 0 {
        return 0.;
    }
    let mean = xs.clone().sum::<f32>() / n as f32;
    xs.map(|x| (x - mean).powi(2)).sum::<f32>() / n as f32
}

/// `1 - Var[y - ypred] / Var[y]`: 1 is a perfect prediction, 0 is no better than a constant,
/// negative is worse. NaN when `y` is constant.
pub fn explained_variance(ypred: &[f32], y: &[f32]) -> f32 {
    let var_y = variance(y.iter().copied());
    if var_y == 0. {
        return f32::NAN;
    }
    let residual = variance(y.iter().zip(ypred).map(|(y, p)| y - p));
    1. - residual / var_y
}
