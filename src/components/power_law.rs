//! Power-law background.

use ndarray::{Array1, Array2};

use crate::component::{Component, ComponentCore};
use crate::parameters::Parameter;

/// `f(x) = A * (x - origin)^(-r)` for `x > origin`, zero elsewhere
///
/// `origin` is fixed on construction.
#[derive(Debug, Clone)]
pub struct PowerLaw {
    core: ComponentCore,
}

impl PowerLaw {
    pub fn new(a: f64, r: f64) -> Self {
        Self {
            core: ComponentCore::new(
                "PowerLaw",
                vec![
                    Parameter::new("A", a),
                    Parameter::new("r", r),
                    Parameter::new("origin", 0.0).with_free(false),
                ],
            ),
        }
    }

    fn shifted(&self, x: &Array1<f64>) -> Array1<f64> {
        let origin = self.parameters()[2].value();
        x.mapv(|x| x - origin)
    }
}

impl Default for PowerLaw {
    fn default() -> Self {
        Self::new(1e6, 3.0)
    }
}

impl Component for PowerLaw {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        let a = self.parameters()[0].value();
        let r = self.parameters()[1].value();
        self.shifted(x)
            .mapv(|d| if d > 0.0 { a * d.powf(-r) } else { 0.0 })
    }

    fn gradient(&self, parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        let a = self.parameters()[0].value();
        let r = self.parameters()[1].value();
        let d = self.shifted(x);

        let row = match parameter {
            0 => d.mapv(|d| if d > 0.0 { d.powf(-r) } else { 0.0 }),
            1 => d.mapv(|d| if d > 0.0 { -a * d.ln() * d.powf(-r) } else { 0.0 }),
            _ => return None,
        };

        let n = row.len();
        row.into_shape((1, n)).ok()
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}
