//! Problem definition trait and implementations.
//!
//! This module defines the `Problem` trait, which represents a nonlinear
//! least squares problem to be solved with the Levenberg-Marquardt algorithm,
//! and [`PositionProblem`], the problem of fitting a component list to the
//! spectrum at one navigation position.

use std::cell::RefCell;

use ndarray::{Array1, Array2};

use crate::component::Component;
use crate::composition::{self, EvaluationContext};
use crate::error::{Result, SpecFitError};

/// A trait representing a nonlinear least squares problem.
///
/// This trait defines the interface for problems that can be solved using
/// the Levenberg-Marquardt algorithm.
pub trait Problem {
    /// Evaluate the residuals at the given parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - The parameter values at which to evaluate the residuals
    ///
    /// # Returns
    ///
    /// * A vector of residuals, or an error if the evaluation fails
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>>;

    /// Get the number of parameters in the problem.
    fn parameter_count(&self) -> usize;

    /// Get the number of residuals in the problem.
    fn residual_count(&self) -> usize;

    /// Evaluate the Jacobian matrix at the given parameters.
    ///
    /// The Jacobian is the matrix of partial derivatives of the residuals with respect
    /// to the parameters, shaped `(residual_count, parameter_count)`.
    ///
    /// # Default Implementation
    ///
    /// Central finite differences, see [`crate::utils::finite_difference::jacobian`].
    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        crate::utils::finite_difference::jacobian(self, params, None)
    }

    /// Check if this problem provides a custom Jacobian implementation.
    fn has_custom_jacobian(&self) -> bool {
        false
    }

    /// Evaluate the sum of squared residuals at the given parameters.
    fn eval_cost(&self, params: &Array1<f64>) -> Result<f64> {
        let residuals = self.eval(params)?;
        Ok(residuals.iter().map(|r| r.powi(2)).sum())
    }
}

/// Fit of a component list to one spectrum
///
/// Residuals are `(model - data) * weight` over the selected channels. Every
/// evaluation writes the trial vector into the components, so after the solver
/// returns the caller must assign the final vector with
/// [`PositionProblem::assign`].
pub struct PositionProblem<'a> {
    components: RefCell<&'a mut [Box<dyn Component>]>,
    context: &'a EvaluationContext,
    data: Array1<f64>,
    weights: Option<Array1<f64>>,
    use_gradient: bool,
    n_free: usize,
}

impl<'a> PositionProblem<'a> {
    /// Create a new position problem.
    ///
    /// # Arguments
    ///
    /// * `components` - Components to fit; their free parameters are the unknowns
    /// * `context` - Axis, channel selection and convolution branch
    /// * `data` - Measured values at the selected channels
    /// * `weights` - Optional per-channel weights at the selected channels
    /// * `use_gradient` - Use the components' gradients instead of finite differences
    pub fn new(
        components: &'a mut [Box<dyn Component>],
        context: &'a EvaluationContext,
        data: Array1<f64>,
        weights: Option<Array1<f64>>,
        use_gradient: bool,
    ) -> Result<Self> {
        if data.len() != context.n_selected() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "{} data points for {} selected channels",
                data.len(),
                context.n_selected()
            )));
        }
        if let Some(w) = &weights {
            if w.len() != data.len() {
                return Err(SpecFitError::DimensionMismatch(format!(
                    "{} weights for {} data points",
                    w.len(),
                    data.len()
                )));
            }
        }

        let n_free = composition::free_parameter_count(components);
        Ok(Self {
            components: RefCell::new(components),
            context,
            data,
            weights,
            use_gradient,
            n_free,
        })
    }

    /// Write a free-parameter vector (and optional std) into the components
    pub fn assign(&self, params: &Array1<f64>, std: Option<&[f64]>) -> Result<()> {
        let mut components = self.components.borrow_mut();
        composition::assign_free_vector(&mut **components, &params.to_vec(), std)
    }

    /// Current free-parameter vector of the components
    pub fn initial_params(&self) -> Array1<f64> {
        Array1::from(composition::free_parameter_vector(&**self.components.borrow()))
    }
}

impl Problem for PositionProblem<'_> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.assign(params, None)?;
        let components = self.components.borrow();
        let model = composition::evaluate(&**components, self.context, false, true);

        let mut residuals = model - &self.data;
        if let Some(w) = &self.weights {
            residuals *= w;
        }
        Ok(residuals)
    }

    fn parameter_count(&self) -> usize {
        self.n_free
    }

    fn residual_count(&self) -> usize {
        self.data.len()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        if !self.use_gradient {
            return crate::utils::finite_difference::jacobian(self, params, None);
        }

        self.assign(params, None)?;
        let mut components = self.components.borrow_mut();
        let jac = composition::jacobian(&mut **components, self.context, self.weights.as_ref());
        Ok(jac.t().to_owned())
    }

    fn has_custom_jacobian(&self) -> bool {
        self.use_gradient
    }
}
