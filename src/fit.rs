//! Single-position fit driver
//!
//! Fitting a position means: assemble the free-parameter vector of the active
//! components, hand the residuals `(model - data) * weight` to the selected
//! fitter, then write the fitted vector and its standard deviations back into
//! the components in the same order.

use std::fmt;

use log::{debug, warn};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::component::Component;
use crate::composition::{self, EvaluationContext};
use crate::error::{Result, SpecFitError};
use crate::lm::LmConfig;
use crate::optimizer::{self, BoundsSpec, FitterKind};
use crate::problem::{PositionProblem, Problem};

/// Options of a single-position fit
///
/// # Examples
///
/// ```
/// use specfit_rs::fit::FitOptions;
/// use specfit_rs::optimizer::FitterKind;
///
/// let options = FitOptions::new()
///     .with_fitter(FitterKind::LmProjected)
///     .with_bounded(true)
///     .with_gradient(true);
/// assert!(options.bounded);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Fitter to run. Default: `Lm`
    pub fitter: FitterKind,

    /// Use component gradients for the Jacobian. Default: false
    pub use_gradient: bool,

    /// Honor parameter bounds. Default: false
    pub bounded: bool,

    /// Weight residuals by `1 / sqrt(variance)`. Default: false
    pub weighted: bool,

    /// Solver settings
    pub solver: LmConfig,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            fitter: FitterKind::default(),
            use_gradient: false,
            bounded: false,
            weighted: false,
            solver: LmConfig::default(),
        }
    }
}

impl FitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fitter(mut self, fitter: FitterKind) -> Self {
        self.fitter = fitter;
        self
    }

    pub fn with_gradient(mut self, use_gradient: bool) -> Self {
        self.use_gradient = use_gradient;
        self
    }

    pub fn with_bounded(mut self, bounded: bool) -> Self {
        self.bounded = bounded;
        self
    }

    pub fn with_weighted(mut self, weighted: bool) -> Self {
        self.weighted = weighted;
        self
    }

    pub fn with_solver(mut self, solver: LmConfig) -> Self {
        self.solver = solver;
        self
    }
}

/// Non-fatal conditions recorded during a fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitWarning {
    /// Bounding was requested but the fitter cannot honor bounds; the fit ran unbounded
    BoundingUnsupported { fitter: FitterKind },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::BoundingUnsupported { fitter } => write!(
                f,
                "fitter {} does not support bounds, the fit was unbounded",
                fitter
            ),
        }
    }
}

/// Result of a single-position fit
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Whether the fitter reported convergence
    pub success: bool,

    pub message: String,

    pub iterations: usize,

    /// Sum of squared (weighted) residuals at the solution
    pub cost: f64,

    /// Standard deviation of each free slot, NaN where it could not be estimated
    pub std: Option<Vec<f64>>,

    pub warnings: Vec<FitWarning>,
}

impl fmt::Display for FitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Fit {}", if self.success { "converged" } else { "failed" })?;
        writeln!(f, "  Message: {}", self.message)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Cost: {:.6e}", self.cost)?;
        for warning in &self.warnings {
            writeln!(f, "  Warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Bounds resolved once for a series of fits
///
/// The fitter kind decides whether the per-slot bound list or the
/// parameter-info records are built. A fitter without bound support degrades
/// to an unbounded fit with a warning.
#[derive(Debug, Clone, Default)]
pub struct FitPlan {
    pub bounds: BoundsSpec,
    pub warnings: Vec<FitWarning>,
}

impl FitPlan {
    pub fn new(options: &FitOptions, components: &[Box<dyn Component>]) -> Self {
        if !options.bounded {
            return Self::default();
        }

        if !options.fitter.supports_bounds() {
            warn!(
                "Fitter {} does not support bounds, fitting without them",
                options.fitter
            );
            return Self {
                bounds: BoundsSpec::Unbounded,
                warnings: vec![FitWarning::BoundingUnsupported {
                    fitter: options.fitter,
                }],
            };
        }

        Self {
            bounds: BoundsSpec::for_fitter(options.fitter, composition::bound_list(components)),
            warnings: Vec::new(),
        }
    }
}

/// Channel weights `1 / sqrt(variance)`; channels without positive variance get weight 0
pub fn variance_weights(variance: ArrayView1<'_, f64>) -> Array1<f64> {
    variance.mapv(|v| if v > 0.0 { 1.0 / v.sqrt() } else { 0.0 })
}

/// Fit a component list to one spectrum
///
/// On return the components hold the fitted free values (and their standard
/// deviations). When the solver cannot make progress at all the starting values
/// are restored and the outcome is marked unsuccessful.
///
/// # Arguments
///
/// * `components` - Components to fit
/// * `context` - Axis, channel selection and convolution branch of the position
/// * `data` - Measured values at the selected channels
/// * `weights` - Optional weights at the selected channels
/// * `options` - Fitter and solver settings
/// * `plan` - Bounds resolved for `options`
///
/// # Errors
///
/// Dimension and configuration errors. Non-convergence is not an error.
pub fn fit_components(
    components: &mut [Box<dyn Component>],
    context: &EvaluationContext,
    data: Array1<f64>,
    weights: Option<Array1<f64>>,
    options: &FitOptions,
    plan: &FitPlan,
) -> Result<FitOutcome> {
    let problem = PositionProblem::new(components, context, data, weights, options.use_gradient)?;
    let p0 = problem.initial_params();

    if p0.is_empty() {
        let cost = problem.eval_cost(&p0)?;
        return Ok(FitOutcome {
            success: true,
            message: "No free parameters".to_string(),
            iterations: 0,
            cost,
            std: None,
            warnings: plan.warnings.clone(),
        });
    }

    let output = match optimizer::optimize(
        options.fitter,
        &problem,
        p0.clone(),
        &plan.bounds,
        &options.solver,
    ) {
        Ok(output) => output,
        Err(SpecFitError::OptimizationFailure(message))
        | Err(SpecFitError::FunctionEvaluation(message)) => {
            debug!("Fit aborted, restoring starting values: {}", message);
            problem.assign(&p0, None)?;
            return Ok(FitOutcome {
                success: false,
                message,
                iterations: 0,
                cost: f64::NAN,
                std: None,
                warnings: plan.warnings.clone(),
            });
        }
        Err(e) => return Err(e),
    };

    let std = output
        .std
        .map(|s| s.to_vec())
        .unwrap_or_else(|| vec![f64::NAN; p0.len()]);
    problem.assign(&output.params, Some(&std))?;

    debug!(
        "Fit {} after {} iterations, cost {:.6e}",
        if output.success { "converged" } else { "did not converge" },
        output.iterations,
        output.cost
    );

    Ok(FitOutcome {
        success: output.success,
        message: output.message,
        iterations: output.iterations,
        cost: output.cost,
        std: Some(std),
        warnings: plan.warnings.clone(),
    })
}
