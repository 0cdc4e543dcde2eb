//! Built-in component implementations.
//!
//! This module provides commonly used spectral terms: constant, linear and
//! polynomial backgrounds, a Gaussian peak, a power-law background and a
//! lookup-table shape read from an external file.

use std::path::Path;

use crate::component::Component;
use crate::error::Result;

mod peak;
mod polynomial;
mod power_law;
mod tabulated;

// Re-export the components
pub use peak::Gaussian;
pub use polynomial::{Offset, Polynomial, Slope};
pub use power_law::PowerLaw;
pub use tabulated::Tabulated;

/// Create the two components of a straight line `offset + slope * x`
///
/// # Returns
///
/// * `[Offset, Slope]`, boxed and ready to be added to a model
pub fn line(offset: f64, slope: f64) -> Vec<Box<dyn Component>> {
    vec![Box::new(Offset::new(offset)), Box::new(Slope::new(slope))]
}

/// Create a boxed Gaussian peak
///
/// # Arguments
///
/// * `area` - Integrated intensity
/// * `centre` - Peak position
/// * `sigma` - Standard deviation
pub fn gaussian(area: f64, centre: f64, sigma: f64) -> Box<dyn Component> {
    Box::new(Gaussian::new(area, centre, sigma))
}

/// Create a boxed lookup-table component from a file
///
/// Fails with a configuration error when the table is missing or malformed.
pub fn tabulated<P: AsRef<Path>>(path: P) -> Result<Box<dyn Component>> {
    Ok(Box::new(Tabulated::from_file(path)?))
}
