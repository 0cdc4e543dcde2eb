//! Levenberg-Marquardt algorithm implementation.
//!
//! This module provides the damped Gauss-Newton solver behind every fitter kind:
//! plain, with box bounds enforced by projection, and (through the
//! [`BoundsTransform`](crate::parameters::BoundsTransform)) in unbounded internal
//! coordinates.

pub mod algorithm;
pub mod config;

// Re-export key types
pub use algorithm::{LevenbergMarquardt, LmResult};
pub use config::{DecompositionMethod, LmConfig};
