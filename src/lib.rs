//! # specfit-rs
//!
//! `specfit-rs` fits an additively composed spectral model to every spectrum
//! of a multidimensional dataset, one navigation position at a time.
//!
//! The library provides:
//! - A [`Component`] trait for additive model terms, with built-in components
//! - Convolution of selected components with an instrument response
//! - Per-position parameter maps synchronized with live values by
//!   [`Model::charge`] and [`Model::store`]
//! - A Levenberg-Marquardt solver with unbounded, projected and transformed
//!   bound handling, and standard errors from the Jacobian
//! - A dataset-wide driver ([`Model::multifit`]) with masking, seeding,
//!   checkpoints, cancellation and parallel workers
//!
//! ## Basic Usage
//!
//! ```
//! use ndarray::Array2;
//! use specfit_rs::{components, DataAxis, Dataset, Model, MultifitOptions};
//!
//! // Two spectra of a straight line with different slopes
//! let axis = DataAxis::new(0.0, 1.0, 10);
//! let x = axis.values();
//! let mut data = Array2::zeros((2, 10));
//! data.row_mut(0).assign(&x.mapv(|x| 2.0 * x + 1.0));
//! data.row_mut(1).assign(&x.mapv(|x| 3.0 * x + 5.0));
//!
//! let mut model = Model::new(Dataset::from_spectra(data, &[2], axis).unwrap());
//! model.extend(components::line(0.0, 1.0));
//!
//! let report = model.multifit(&MultifitOptions::default()).unwrap();
//! assert_eq!(report.fitted, 2);
//!
//! model.set_position(1).unwrap();
//! let slope = model.components()[1].parameters()[0].value();
//! assert!((slope - 3.0).abs() < 1e-6);
//! ```

// Public modules
pub mod error;

// Parameter system
pub mod parameters;

// Data and navigation
pub mod axis;
pub mod dataset;
pub mod navigation;

// Model composition
pub mod component;
pub mod components;
pub mod composition;
pub mod convolution;

// Fitting
pub mod fit;
pub mod lm;
pub mod optimizer;
pub mod problem;
pub mod uncertainty;
pub mod utils;

// Model and dataset-wide driver
pub mod archive;
pub mod model;
pub mod multifit;

// Re-exports for convenience
pub use error::{Result, SpecFitError};

pub use axis::DataAxis;
pub use component::{Component, ComponentCore};
pub use convolution::InstrumentResponse;
pub use dataset::Dataset;
pub use fit::{FitOptions, FitOutcome, FitWarning};
pub use lm::{LevenbergMarquardt, LmConfig};
pub use model::{Model, ModelEvent};
pub use multifit::{CancellationToken, MultifitEvent, MultifitOptions, MultifitReport};
pub use navigation::NavigationCursor;
pub use optimizer::FitterKind;
pub use parameters::{Bounds, ParamRef, Parameter};
pub use problem::Problem;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
