//! Peak components.

use ndarray::{Array1, Array2};

use crate::component::{Component, ComponentCore};
use crate::parameters::{Bounds, Parameter};

/// Index of the area parameter
const A: usize = 0;
/// Index of the centre parameter
const CENTRE: usize = 1;
/// Index of the width parameter
const SIGMA: usize = 2;

/// A normalized Gaussian peak.
///
/// The Gaussian function is defined as:
/// f(x) = A / (sigma * sqrt(2π)) * exp(-(x - centre)² / (2 * sigma²))
///
/// so that `A` is the peak area. It is characterized by:
/// - `A`: The integrated intensity
/// - `centre`: The position of the peak centre
/// - `sigma`: The standard deviation, controlling the width (bounded below by 0)
///
/// The Full Width at Half Maximum (FWHM) is related to sigma by:
/// FWHM = 2 * sqrt(2 * ln(2)) * sigma ≈ 2.3548 * sigma
#[derive(Debug, Clone)]
pub struct Gaussian {
    core: ComponentCore,
}

impl Gaussian {
    /// Create a new Gaussian component.
    ///
    /// # Arguments
    ///
    /// * `area` - Integrated intensity
    /// * `centre` - Peak position
    /// * `sigma` - Standard deviation
    pub fn new(area: f64, centre: f64, sigma: f64) -> Self {
        Self {
            core: ComponentCore::new(
                "Gaussian",
                vec![
                    Parameter::new("A", area),
                    Parameter::new("centre", centre),
                    Parameter::new("sigma", sigma).with_bounds(Bounds::min_only(0.0)),
                ],
            ),
        }
    }

    /// Full width at half maximum of the current shape
    pub fn fwhm(&self) -> f64 {
        2.0 * (2.0 * 2f64.ln()).sqrt() * self.parameters()[SIGMA].value()
    }

    fn values(&self) -> (f64, f64, f64) {
        let p = self.parameters();
        (p[A].value(), p[CENTRE].value(), p[SIGMA].value())
    }
}

impl Default for Gaussian {
    fn default() -> Self {
        Self::new(1.0, 0.0, 1.0)
    }
}

impl Component for Gaussian {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        let (area, centre, sigma) = self.values();
        let norm = area / (sigma * (2.0 * std::f64::consts::PI).sqrt());
        x.mapv(|x| {
            let arg = (x - centre) / sigma;
            norm * (-0.5 * arg * arg).exp()
        })
    }

    fn gradient(&self, parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        let (area, centre, sigma) = self.values();
        let f = self.function(x);

        let row = match parameter {
            A if area != 0.0 => &f / area,
            A => {
                let mut unit = self.clone();
                unit.parameters_mut()[A].set_value(1.0);
                unit.function(x)
            }
            CENTRE => {
                let d = x.mapv(|x| (x - centre) / (sigma * sigma));
                &f * &d
            }
            SIGMA => {
                let d = x.mapv(|x| {
                    let arg = (x - centre) / sigma;
                    (arg * arg - 1.0) / sigma
                });
                &f * &d
            }
            _ => return None,
        };

        let n = row.len();
        row.into_shape((1, n)).ok()
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}
