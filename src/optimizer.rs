//! Optimizer adapter.
//!
//! Bounds live on parameters as one [`Bounds`] per free slot. This module is the
//! only place where that list is translated into the shape a fitter expects:
//! nothing for the unbounded fitter, the list itself for the projected fitter,
//! and [`ParameterInfo`] records for the transformed fitter.

use std::fmt;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::lm::{LevenbergMarquardt, LmConfig, LmResult};
use crate::parameters::{Bounds, BoundsTransform};
use crate::problem::Problem;
use crate::uncertainty;

/// Which solver variant runs a fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FitterKind {
    /// Levenberg-Marquardt without bound support
    #[default]
    Lm,

    /// Levenberg-Marquardt in unbounded internal coordinates, bounds given as
    /// per-parameter `limited`/`limits` records
    LmParameterInfo,

    /// Levenberg-Marquardt with trial points projected onto a bound list
    LmProjected,
}

impl FitterKind {
    /// Whether this fitter can honor parameter bounds
    pub fn supports_bounds(&self) -> bool {
        !matches!(self, FitterKind::Lm)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FitterKind::Lm => "lm",
            FitterKind::LmParameterInfo => "lm-parameter-info",
            FitterKind::LmProjected => "lm-projected",
        }
    }
}

impl fmt::Display for FitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-parameter bound record: which sides are limited and the limit values
///
/// An unlimited side carries `0.0` in `limits`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub limited: [bool; 2],
    pub limits: [f64; 2],
}

impl ParameterInfo {
    pub fn from_bounds(bounds: &Bounds) -> Self {
        Self {
            limited: [bounds.min.is_some(), bounds.max.is_some()],
            limits: [bounds.min.unwrap_or(0.0), bounds.max.unwrap_or(0.0)],
        }
    }

    pub fn to_bounds(&self) -> Bounds {
        Bounds {
            min: self.limited[0].then_some(self.limits[0]),
            max: self.limited[1].then_some(self.limits[1]),
        }
    }
}

/// Bounds in the shape a fitter expects
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BoundsSpec {
    #[default]
    Unbounded,
    List(Vec<Bounds>),
    ParameterInfo(Vec<ParameterInfo>),
}

impl BoundsSpec {
    /// Translate a bound list into the shape `kind` expects
    pub fn for_fitter(kind: FitterKind, bounds: Vec<Bounds>) -> Self {
        match kind {
            FitterKind::Lm => BoundsSpec::Unbounded,
            FitterKind::LmProjected => BoundsSpec::List(bounds),
            FitterKind::LmParameterInfo => {
                BoundsSpec::ParameterInfo(bounds.iter().map(ParameterInfo::from_bounds).collect())
            }
        }
    }

    pub fn is_bounded(&self) -> bool {
        !matches!(self, BoundsSpec::Unbounded)
    }
}

/// What a fitter returns
#[derive(Debug, Clone)]
pub struct OptimizerOutput {
    /// Fitted free-parameter vector
    pub params: Array1<f64>,
    /// Standard deviation of each fitted value, when it could be estimated
    pub std: Option<Array1<f64>>,
    pub success: bool,
    pub message: String,
    pub iterations: usize,
    pub cost: f64,
}

/// Run a fitter on a problem
///
/// # Arguments
///
/// * `kind` - Fitter to run
/// * `problem` - Residuals (and optionally Jacobian) of the fit
/// * `p0` - Starting free-parameter vector
/// * `bounds` - Bounds in the shape `kind` expects, or [`BoundsSpec::Unbounded`]
/// * `config` - Solver settings
///
/// # Errors
///
/// [`SpecFitError::Configuration`] when `bounds` does not match the shape
/// `kind` expects or has the wrong length.
pub fn optimize<P: Problem + ?Sized>(
    kind: FitterKind,
    problem: &P,
    p0: Array1<f64>,
    bounds: &BoundsSpec,
    config: &LmConfig,
) -> Result<OptimizerOutput> {
    let lm = LevenbergMarquardt::with_config(config.clone());

    match (kind, bounds) {
        (_, BoundsSpec::Unbounded) => {
            let result = lm.minimize(problem, p0)?;
            Ok(output_from::<P>(result, None))
        }
        (FitterKind::LmProjected, BoundsSpec::List(list)) => {
            check_len(list.len(), p0.len())?;
            let result = lm.minimize_bounded(problem, p0, list)?;
            Ok(output_from::<P>(result, None))
        }
        (FitterKind::LmParameterInfo, BoundsSpec::ParameterInfo(info)) => {
            check_len(info.len(), p0.len())?;
            let transformed = TransformedProblem::new(problem, info);
            let internal = transformed.to_internal(&p0)?;
            let result = lm.minimize(&transformed, internal)?;
            Ok(output_from(result, Some(&transformed)))
        }
        (kind, _) => Err(SpecFitError::Configuration(format!(
            "fitter {} does not accept this bounds layout",
            kind
        ))),
    }
}

fn check_len(n_bounds: usize, n_params: usize) -> Result<()> {
    if n_bounds != n_params {
        return Err(SpecFitError::Configuration(format!(
            "{} bounds for {} free parameters",
            n_bounds, n_params
        )));
    }
    Ok(())
}

fn output_from<P: Problem + ?Sized>(
    result: LmResult,
    transform: Option<&TransformedProblem<'_, P>>,
) -> OptimizerOutput {
    let std = result
        .jacobian
        .as_ref()
        .and_then(|jac| uncertainty::standard_errors(jac, result.cost));

    let (params, std) = match transform {
        Some(t) => {
            let std = std.map(|s| t.scale_std(&result.params, &s));
            (t.to_external(&result.params), std)
        }
        None => (result.params, std),
    };

    OptimizerOutput {
        params,
        std,
        success: result.success,
        message: result.message,
        iterations: result.iterations,
        cost: result.cost,
    }
}

/// A problem seen through Minuit-style bound transforms
///
/// The solver works on unbounded internal values; every evaluation maps them to
/// bounded external values first. Analytic Jacobians are carried through the
/// chain rule.
pub struct TransformedProblem<'a, P: Problem + ?Sized> {
    inner: &'a P,
    transforms: Vec<BoundsTransform>,
}

impl<'a, P: Problem + ?Sized> TransformedProblem<'a, P> {
    pub fn new(inner: &'a P, info: &[ParameterInfo]) -> Self {
        Self {
            inner,
            transforms: info
                .iter()
                .map(|i| BoundsTransform::new(i.to_bounds()))
                .collect(),
        }
    }

    /// Map internal values to bounded external values
    pub fn to_external(&self, internal: &Array1<f64>) -> Array1<f64> {
        internal
            .iter()
            .zip(&self.transforms)
            .map(|(&v, t)| t.to_external(v))
            .collect()
    }

    /// Map external values (clamped into their bounds) to internal values
    pub fn to_internal(&self, external: &Array1<f64>) -> Result<Array1<f64>> {
        external
            .iter()
            .zip(&self.transforms)
            .map(|(&v, t)| t.to_internal(t.bounds().clamp(v)).map_err(SpecFitError::from))
            .collect()
    }

    /// First-order propagation of internal standard errors to external ones
    fn scale_std(&self, internal: &Array1<f64>, std: &Array1<f64>) -> Array1<f64> {
        internal
            .iter()
            .zip(std.iter())
            .zip(&self.transforms)
            .map(|((&v, &s), t)| s * t.external_derivative(v).abs())
            .collect()
    }
}

impl<P: Problem + ?Sized> Problem for TransformedProblem<'_, P> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        self.inner.eval(&self.to_external(params))
    }

    fn parameter_count(&self) -> usize {
        self.inner.parameter_count()
    }

    fn residual_count(&self) -> usize {
        self.inner.residual_count()
    }

    fn jacobian(&self, params: &Array1<f64>) -> Result<Array2<f64>> {
        if !self.inner.has_custom_jacobian() {
            return crate::utils::finite_difference::jacobian(self, params, None);
        }

        let mut jac = self.inner.jacobian(&self.to_external(params))?;
        for (mut column, (&v, t)) in jac
            .columns_mut()
            .into_iter()
            .zip(params.iter().zip(&self.transforms))
        {
            column *= t.external_derivative(v);
        }
        Ok(jac)
    }

    fn has_custom_jacobian(&self) -> bool {
        self.inner.has_custom_jacobian()
    }
}
