//! # Covariance Matrix Calculations
//!
//! Standard errors of fitted parameters from the Jacobian at the solution.

use ndarray::{Array1, Array2};

use crate::utils::matrix_convert::{nalgebra_to_ndarray, ndarray_to_nalgebra};

/// Calculate covariance matrix from Jacobian matrix.
///
/// For nonlinear least-squares problems, the covariance matrix is estimated as:
///   covar = redchi * inv(J^T * J)
/// where:
///   - J is the Jacobian matrix, `(n_residuals, n_params)`
///   - redchi is the reduced chi-square (chi^2 / dof)
///
/// # Returns
///
/// * `None` when `J^T J` is singular
pub fn calculate_covariance(jacobian: &Array2<f64>, redchi: f64) -> Option<Array2<f64>> {
    let j = ndarray_to_nalgebra(jacobian);
    let jtj = j.transpose() * &j;
    let inverse = jtj.try_inverse()?;
    Some(nalgebra_to_ndarray(&inverse) * redchi)
}

/// Extract standard errors from the covariance matrix.
///
/// Standard errors are the square roots of the diagonal elements
/// of the covariance matrix. Negative diagonal entries give NaN.
pub fn standard_errors_from_covariance(covar: &Array2<f64>) -> Array1<f64> {
    covar
        .diag()
        .mapv(|v| if v >= 0.0 { v.sqrt() } else { f64::NAN })
}

/// Standard errors of the parameters of a least-squares solution
///
/// # Arguments
///
/// * `jacobian` - Jacobian of the residuals at the solution
/// * `cost` - Sum of squared residuals at the solution
///
/// # Returns
///
/// * `None` when there are no degrees of freedom left or `J^T J` is singular
pub fn standard_errors(jacobian: &Array2<f64>, cost: f64) -> Option<Array1<f64>> {
    let (n_residuals, n_params) = jacobian.dim();
    if n_residuals <= n_params || n_params == 0 {
        return None;
    }

    let redchi = cost / (n_residuals - n_params) as f64;
    let covar = calculate_covariance(jacobian, redchi)?;
    Some(standard_errors_from_covariance(&covar))
}
