//! Implementation of the Levenberg-Marquardt algorithm.
//!
//! This module contains the core implementation of the Levenberg-Marquardt
//! algorithm for nonlinear least-squares optimization, with an optional
//! projection of every trial point onto box bounds.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::fmt;

use crate::error::{Result, SpecFitError};
use crate::parameters::Bounds;
use crate::problem::Problem;
use crate::utils::matrix_convert::{nalgebra_vec_to_ndarray, ndarray_to_nalgebra, ndarray_vec_to_nalgebra};

use super::config::{DecompositionMethod, LmConfig};

/// Result of the Levenberg-Marquardt optimization.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// Optimized parameter values
    pub params: Array1<f64>,

    /// Residuals at the solution
    pub residuals: Array1<f64>,

    /// Sum of squared residuals
    pub cost: f64,

    /// Number of accepted iterations
    pub iterations: usize,

    /// Number of function evaluations
    pub func_evals: usize,

    /// Whether the optimization converged
    pub success: bool,

    /// A message describing the result
    pub message: String,

    /// The Jacobian matrix at the solution (if requested)
    pub jacobian: Option<Array2<f64>>,
}

impl fmt::Display for LmResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimization Result:")?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Function evaluations: {}", self.func_evals)?;
        writeln!(f, "  Parameters: {:?}", self.params)?;
        Ok(())
    }
}

/// Status of the iteration.
enum IterationStatus {
    /// Converged successfully
    Converged(String),

    /// Failed to converge
    Failed(String),
}

/// The Levenberg-Marquardt optimizer.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    /// Configuration options
    config: LmConfig,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt optimizer with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Levenberg-Marquardt optimizer with the given configuration.
    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the tolerance for relative change in cost.
    pub fn with_ftol(mut self, ftol: f64) -> Self {
        self.config.ftol = ftol;
        self
    }

    /// Set the tolerance for relative change in parameter values.
    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.config.xtol = xtol;
        self
    }

    /// Set the tolerance for gradient norm.
    pub fn with_gtol(mut self, gtol: f64) -> Self {
        self.config.gtol = gtol;
        self
    }

    /// Set the initial value for the damping parameter.
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.config.initial_lambda = lambda;
        self
    }

    /// Set the factor by which to increase lambda.
    pub fn with_lambda_up_factor(mut self, factor: f64) -> Self {
        self.config.lambda_up_factor = factor;
        self
    }

    /// Set the factor by which to decrease lambda.
    pub fn with_lambda_down_factor(mut self, factor: f64) -> Self {
        self.config.lambda_down_factor = factor;
        self
    }

    /// Set the minimum value for lambda.
    pub fn with_min_lambda(mut self, min_lambda: f64) -> Self {
        self.config.min_lambda = min_lambda;
        self
    }

    /// Set the maximum value for lambda.
    pub fn with_max_lambda(mut self, max_lambda: f64) -> Self {
        self.config.max_lambda = max_lambda;
        self
    }

    /// Set the method used for solving the linear system.
    pub fn with_decomposition_method(mut self, method: DecompositionMethod) -> Self {
        self.config.decomposition_method = method;
        self
    }

    /// Set whether to calculate and return the Jacobian at the solution.
    pub fn with_calc_jacobian(mut self, calc_jacobian: bool) -> Self {
        self.config.calc_jacobian = calc_jacobian;
        self
    }

    /// Minimize the sum of squared residuals for the given problem.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess for the parameter values
    ///
    /// # Returns
    ///
    /// * `Result<LmResult>` - The result of the optimization. Non-convergence is
    ///   reported through `success = false`; errors are reserved for invalid
    ///   input and failing evaluations.
    pub fn minimize<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
    ) -> Result<LmResult> {
        self.run(problem, initial_params, None)
    }

    /// Minimize with every trial point projected onto box bounds.
    ///
    /// # Arguments
    ///
    /// * `problem` - The problem to solve
    /// * `initial_params` - Initial guess, clamped into the bounds before the first evaluation
    /// * `bounds` - One entry per parameter
    pub fn minimize_bounded<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        bounds: &[Bounds],
    ) -> Result<LmResult> {
        if bounds.len() != initial_params.len() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "Expected {} bounds, got {}",
                initial_params.len(),
                bounds.len()
            )));
        }
        self.run(problem, initial_params, Some(bounds))
    }

    fn run<P: Problem + ?Sized>(
        &self,
        problem: &P,
        initial_params: Array1<f64>,
        bounds: Option<&[Bounds]>,
    ) -> Result<LmResult> {
        // Check parameter dimensions
        let n_params = problem.parameter_count();
        if initial_params.len() != n_params {
            return Err(SpecFitError::DimensionMismatch(format!(
                "Expected {} parameters, got {}",
                n_params,
                initial_params.len()
            )));
        }

        let project = |p: &mut Array1<f64>| {
            if let Some(bounds) = bounds {
                for (v, b) in p.iter_mut().zip(bounds) {
                    *v = b.clamp(*v);
                }
            }
        };

        let mut params = initial_params;
        project(&mut params);
        let mut lambda = self.config.initial_lambda;

        let mut residuals = problem.eval(&params)?;
        let mut cost: f64 = residuals.iter().map(|r| r.powi(2)).sum();
        let mut func_evals = 1;
        let mut iterations = 0;

        if !cost.is_finite() {
            return Err(SpecFitError::FunctionEvaluation(
                "Residuals are not finite at the initial parameters".to_string(),
            ));
        }

        let mut jacobian = problem.jacobian(&params)?;
        if !problem.has_custom_jacobian() {
            func_evals += n_params + 1;
        }

        let status = loop {
            if iterations >= self.config.max_iterations {
                break IterationStatus::Failed(format!(
                    "Maximum iterations ({}) reached",
                    self.config.max_iterations
                ));
            }

            // Gradient g = J^T r
            let gradient = jacobian.t().dot(&residuals);
            let gradient_norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
            if gradient_norm < self.config.gtol {
                break IterationStatus::Converged(format!(
                    "Gradient convergence: ||g|| = {:.2e} < {:.2e}",
                    gradient_norm, self.config.gtol
                ));
            }

            let step = match self.calculate_step(&jacobian, &gradient, lambda) {
                Some(step) => step,
                None => {
                    // If step calculation failed, increase lambda and try again
                    lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                    if lambda >= self.config.max_lambda {
                        break IterationStatus::Failed(
                            "Failed to calculate step, and lambda reached maximum".to_string(),
                        );
                    }
                    continue;
                }
            };

            let mut new_params = &params - &step;
            project(&mut new_params);
            let param_change = relative_change(&params, &new_params, self.config.xtol);

            let new_residuals = problem.eval(&new_params)?;
            func_evals += 1;
            let new_cost: f64 = new_residuals.iter().map(|r| r.powi(2)).sum();

            if new_cost.is_finite() && new_cost < cost {
                // Step accepted
                let cost_change = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);

                params = new_params;
                residuals = new_residuals;
                cost = new_cost;
                lambda = (lambda * self.config.lambda_down_factor).max(self.config.min_lambda);
                iterations += 1;

                if param_change < self.config.xtol {
                    break IterationStatus::Converged(format!(
                        "Parameter convergence: |dx|/|x| = {:.2e} < {:.2e}",
                        param_change, self.config.xtol
                    ));
                }
                if cost_change < self.config.ftol || cost == 0.0 {
                    break IterationStatus::Converged(format!(
                        "Cost convergence: |df|/|f| = {:.2e} < {:.2e}",
                        cost_change, self.config.ftol
                    ));
                }

                jacobian = problem.jacobian(&params)?;
                if !problem.has_custom_jacobian() {
                    func_evals += n_params + 1;
                }
            } else {
                // Step rejected. A vanishing step means no better point is reachable.
                if param_change < self.config.xtol {
                    break IterationStatus::Converged(format!(
                        "Parameter convergence: |dx|/|x| = {:.2e} < {:.2e}",
                        param_change, self.config.xtol
                    ));
                }

                lambda = (lambda * self.config.lambda_up_factor).min(self.config.max_lambda);
                if lambda >= self.config.max_lambda {
                    break IterationStatus::Failed(
                        "Failed to decrease cost, and lambda reached maximum".to_string(),
                    );
                }
            }
        };

        let (success, message) = match status {
            IterationStatus::Converged(message) => (true, message),
            IterationStatus::Failed(message) => (false, message),
        };

        // Leave the problem evaluated at the returned point
        let residuals = problem.eval(&params)?;
        func_evals += 1;

        Ok(LmResult {
            jacobian: if self.config.calc_jacobian {
                Some(problem.jacobian(&params)?)
            } else {
                None
            },
            params,
            residuals,
            cost,
            iterations,
            func_evals,
            success,
            message,
        })
    }

    /// Calculate the Levenberg-Marquardt step.
    ///
    /// This method solves the equation (J^T J + λ diag(J^T J)) δ = J^T r, where:
    /// - J is the Jacobian matrix
    /// - r is the residual vector
    /// - λ is the damping parameter
    /// - δ is the step (the update is `x - δ`)
    ///
    /// # Returns
    ///
    /// * The step, or None if the system is singular
    fn calculate_step(
        &self,
        jacobian: &Array2<f64>,
        gradient: &Array1<f64>,
        lambda: f64,
    ) -> Option<Array1<f64>> {
        let j: DMatrix<f64> = ndarray_to_nalgebra(jacobian);
        let mut a = j.transpose() * &j;
        for i in 0..a.nrows() {
            let scale = a[(i, i)].max(1e-12);
            a[(i, i)] += lambda * scale;
        }
        let b: DVector<f64> = ndarray_vec_to_nalgebra(gradient);

        let step = match self.config.decomposition_method {
            DecompositionMethod::Cholesky => a.cholesky().map(|c| c.solve(&b)),
            DecompositionMethod::Lu => a.lu().solve(&b),
            DecompositionMethod::Auto => match a.clone().cholesky() {
                Some(c) => Some(c.solve(&b)),
                None => a.lu().solve(&b),
            },
        }?;

        if step.iter().all(|s| s.is_finite()) {
            Some(nalgebra_vec_to_ndarray(&step))
        } else {
            None
        }
    }
}

/// Largest parameter change relative to the parameter magnitude
fn relative_change(old: &Array1<f64>, new: &Array1<f64>, xtol: f64) -> f64 {
    old.iter()
        .zip(new.iter())
        .map(|(o, n)| (n - o).abs() / (o.abs() + xtol))
        .fold(0.0, f64::max)
}
