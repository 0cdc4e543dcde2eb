//! Central finite differences.
//!
//! Used for problems without an analytic Jacobian and for components that do
//! not implement [`Component::gradient`](crate::component::Component::gradient).

use crate::error::{Result, SpecFitError};
use crate::problem::Problem;
use ndarray::{Array1, Array2};

/// Relative step of a central difference, `eps^(1/3)`
pub fn default_step() -> f64 {
    f64::EPSILON.cbrt()
}

/// Step for a value: `relative * max(|value|, 1)`
pub fn step_size(value: f64, relative: f64) -> f64 {
    relative * value.abs().max(1.0)
}

/// Central-difference derivatives of `f` with respect to each element of `at`
///
/// Row `j` of the result is `(f(at + h_j e_j) - f(at - h_j e_j)) / 2 h_j`.
///
/// # Arguments
///
/// * `f` - Function of the full vector
/// * `at` - Point of evaluation
/// * `relative` - Relative step, see [`step_size`]
pub fn central_difference<F>(mut f: F, at: &[f64], relative: f64) -> Result<Array2<f64>>
where
    F: FnMut(&[f64]) -> Result<Array1<f64>>,
{
    let mut perturbed = at.to_vec();
    let mut rows: Vec<Array1<f64>> = Vec::with_capacity(at.len());

    for j in 0..at.len() {
        let h = step_size(at[j], relative);

        perturbed[j] = at[j] + h;
        let f_plus = f(&perturbed)?;
        perturbed[j] = at[j] - h;
        let f_minus = f(&perturbed)?;
        perturbed[j] = at[j];

        if f_plus.len() != f_minus.len() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "function returned {} and {} values",
                f_plus.len(),
                f_minus.len()
            )));
        }
        rows.push((f_plus - f_minus) / (2.0 * h));
    }

    let n = rows.first().map_or(0, |r| r.len());
    let mut out = Array2::zeros((at.len(), n));
    for (mut row, values) in out.rows_mut().into_iter().zip(rows) {
        row.assign(&values);
    }
    Ok(out)
}

/// Jacobian of the residuals, shaped `(n_residuals, n_params)`
///
/// `relative` overrides the relative step ([`default_step`] when `None`).
pub fn jacobian<P: Problem + ?Sized>(
    problem: &P,
    params: &Array1<f64>,
    relative: Option<f64>,
) -> Result<Array2<f64>> {
    let n_residuals = problem.residual_count();
    let at = params.to_vec();
    if at.is_empty() {
        return Ok(Array2::zeros((n_residuals, 0)));
    }

    let by_param = central_difference(
        |p| problem.eval(&Array1::from(p.to_vec())),
        &at,
        relative.unwrap_or_else(default_step),
    )?;
    if by_param.ncols() != n_residuals {
        return Err(SpecFitError::DimensionMismatch(format!(
            "Expected {} residuals, got {}",
            n_residuals,
            by_param.ncols()
        )));
    }
    Ok(by_param.reversed_axes())
}
