//! Parameter bounds implementation
//!
//! Bounds are an optional `(min, max)` pair; a missing side means the parameter
//! is unconstrained on that side. This is the single internal representation of
//! bounds. Solver-specific shapes (bound lists, parameter-info records) are
//! derived from it at the optimizer boundary only.
//!
//! The module also implements the Minuit-style parameter transformation used by
//! bound-aware solvers that work with unbounded internal coordinates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must be less than max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter value {value} is outside bounds: [{min:?}, {max:?}]")]
    ValueOutsideBounds {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("Infinite parameter value is not allowed")]
    InfiniteValue,
}

/// Represents the bounds constraints on a parameter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum allowed value, `None` when unbounded from below
    pub min: Option<f64>,

    /// Maximum allowed value, `None` when unbounded from above
    pub max: Option<f64>,
}

impl Bounds {
    /// Create a new bounds constraint from optional sides
    ///
    /// # Arguments
    ///
    /// * `min` - Minimum allowed value, or `None`
    /// * `max` - Maximum allowed value, or `None`
    ///
    /// # Returns
    ///
    /// A new `Bounds` object if min <= max, or an error otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::parameters::Bounds;
    ///
    /// let bounds = Bounds::new(Some(0.0), Some(10.0)).unwrap();
    /// assert_eq!(bounds.min, Some(0.0));
    /// assert!(Bounds::new(Some(1.0), Some(0.0)).is_err());
    /// ```
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, BoundsError> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(BoundsError::InvalidBounds { min: lo, max: hi });
            }
        }

        Ok(Self { min, max })
    }

    /// Create a closed interval `[min, max]`
    pub fn closed(min: f64, max: f64) -> Result<Self, BoundsError> {
        Self::new(Some(min), Some(max))
    }

    /// Create an unbounded constraint
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Create a bounds constraint with only a minimum value
    pub fn min_only(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Create a bounds constraint with only a maximum value
    pub fn max_only(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    /// Check if a value is within the bounds
    pub fn is_within_bounds(&self, value: f64) -> bool {
        self.min.map_or(true, |lo| value >= lo) && self.max.map_or(true, |hi| value <= hi)
    }

    /// `true` if neither side is constrained
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// `true` if the parameter is bounded from below
    pub fn has_lower_bound(&self) -> bool {
        self.min.is_some()
    }

    /// `true` if the parameter is bounded from above
    pub fn has_upper_bound(&self) -> bool {
        self.max.is_some()
    }

    /// Clamp a value to be within the bounds
    pub fn clamp(&self, value: f64) -> f64 {
        let value = self.min.map_or(value, |lo| value.max(lo));
        self.max.map_or(value, |hi| value.min(hi))
    }

    /// The bounds as a `(min, max)` pair
    pub fn as_pair(&self) -> (Option<f64>, Option<f64>) {
        (self.min, self.max)
    }
}

/// Implements the Minuit-style parameter transformations for handling bounds constraints
///
/// This allows the optimizer to work with unbounded parameters internally, while the
/// external values are constrained to be within the specified bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsTransform {
    bounds: Bounds,
}

impl BoundsTransform {
    /// Create a new bounds transform
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// The bounds this transform maps onto
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Transform an internal parameter value to an external value
    ///
    /// # Arguments
    ///
    /// * `internal_value` - The internal parameter value
    ///
    /// # Returns
    ///
    /// The corresponding external value, constrained to be within bounds
    pub fn to_external(&self, internal_value: f64) -> f64 {
        match self.bounds.as_pair() {
            (None, None) => internal_value,
            (Some(min), None) => min - 1.0 + (internal_value * internal_value + 1.0).sqrt(),
            (None, Some(max)) => max + 1.0 - (internal_value * internal_value + 1.0).sqrt(),
            (Some(min), Some(max)) => min + (internal_value.sin() + 1.0) * (max - min) / 2.0,
        }
    }

    /// Transform an external parameter value to an internal value
    ///
    /// # Arguments
    ///
    /// * `external_value` - The external parameter value
    ///
    /// # Returns
    ///
    /// The corresponding internal value, or an error if the external value is outside bounds
    pub fn to_internal(&self, external_value: f64) -> Result<f64, BoundsError> {
        if !external_value.is_finite() {
            return Err(BoundsError::InfiniteValue);
        }

        if !self.bounds.is_within_bounds(external_value) {
            return Err(BoundsError::ValueOutsideBounds {
                value: external_value,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }

        Ok(match self.bounds.as_pair() {
            (None, None) => external_value,
            (Some(min), None) => ((external_value - min + 1.0).powi(2) - 1.0).sqrt(),
            (None, Some(max)) => ((max - external_value + 1.0).powi(2) - 1.0).sqrt(),
            (Some(min), Some(max)) => {
                let scaled = 2.0 * (external_value - min) / (max - min) - 1.0;
                // Ensure scaled is in [-1, 1] for asin
                scaled.clamp(-1.0, 1.0).asin()
            }
        })
    }

    /// Derivative of the external value with respect to the internal value
    ///
    /// Used to carry an analytic jacobian through the transformation
    /// (chain rule: `d f / d internal = d f / d external * d external / d internal`).
    pub fn external_derivative(&self, internal_value: f64) -> f64 {
        match self.bounds.as_pair() {
            (None, None) => 1.0,
            (Some(_), None) => internal_value / (internal_value * internal_value + 1.0).sqrt(),
            (None, Some(_)) => -internal_value / (internal_value * internal_value + 1.0).sqrt(),
            (Some(min), Some(max)) => internal_value.cos() * (max - min) / 2.0,
        }
    }
}
