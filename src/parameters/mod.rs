//! # Parameter System
//!
//! Parameters are the unit of state shared between components, the optimizer
//! and the per-position maps.
//!
//! ## Core Components
//!
//! - [`Parameter`]: named scalar or vector value with a free flag, bounds and twins
//! - [`ParameterMap`]: dense per-position storage of values and standard deviations
//! - [`ParamRef`]: `(component, parameter)` address used for twin links
//! - [`Bounds`] and [`BoundsTransform`]: optional `(min, max)` limits and the
//!   Minuit-style transform used by bound-aware fitters
//!
//! ## Example Usage
//!
//! ```rust
//! use specfit_rs::parameters::{Bounds, Parameter};
//!
//! let mut sigma = Parameter::new("sigma", 1.0).with_bounds(Bounds::min_only(0.0));
//! sigma.create_map(10);
//!
//! // fit at position 3 ...
//! sigma.set_value(0.8);
//! sigma.store_at(3).unwrap();
//!
//! assert_eq!(sigma.map().unwrap().value_at(3)[0], 0.8);
//! ```

pub mod bounds;
pub mod parameter;


// Re-export key types
pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use parameter::{ParamRef, Parameter, ParameterError, ParameterMap};
