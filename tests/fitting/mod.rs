//! Fitting tests
//!
//! Single-position fits through every fitter kind and dataset-wide passes.

pub mod fit_tests;
pub mod multifit_tests;
