//! Polynomial background components.
//!
//! [`Offset`] and [`Slope`] are the two terms of a straight line kept as separate
//! components so they can be activated, fixed or twinned independently.
//! [`Polynomial`] carries all its coefficients in one vector-valued parameter.

use ndarray::{Array1, Array2};

use crate::component::{Component, ComponentCore};
use crate::parameters::Parameter;

/// A constant: `f(x) = offset`
#[derive(Debug, Clone)]
pub struct Offset {
    core: ComponentCore,
}

impl Offset {
    pub fn new(offset: f64) -> Self {
        Self {
            core: ComponentCore::new("Offset", vec![Parameter::new("offset", offset)]),
        }
    }
}

impl Default for Offset {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Component for Offset {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        Array1::from_elem(x.len(), self.parameters()[0].value())
    }

    fn gradient(&self, _parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        Some(Array2::ones((1, x.len())))
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

/// A line through the origin: `f(x) = slope * x`
#[derive(Debug, Clone)]
pub struct Slope {
    core: ComponentCore,
}

impl Slope {
    pub fn new(slope: f64) -> Self {
        Self {
            core: ComponentCore::new("Slope", vec![Parameter::new("slope", slope)]),
        }
    }
}

impl Default for Slope {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Component for Slope {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        let slope = self.parameters()[0].value();
        x.mapv(|x| slope * x)
    }

    fn gradient(&self, _parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        let mut grad = Array2::zeros((1, x.len()));
        grad.row_mut(0).assign(x);
        Some(grad)
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}

/// A polynomial with coefficients ordered from the highest power down:
/// `f(x) = c[0] * x^n + c[1] * x^(n-1) + ... + c[n]`
#[derive(Debug, Clone)]
pub struct Polynomial {
    core: ComponentCore,
}

impl Polynomial {
    /// Create a polynomial of the given order with all coefficients zero
    pub fn new(order: usize) -> Self {
        Self::with_coefficients(vec![0.0; order + 1])
    }

    /// Create a polynomial from explicit coefficients, highest power first
    pub fn with_coefficients(coefficients: Vec<f64>) -> Self {
        Self {
            core: ComponentCore::new(
                "Polynomial",
                vec![Parameter::vector("coefficients", coefficients)],
            ),
        }
    }

    /// Polynomial order
    pub fn order(&self) -> usize {
        self.parameters()[0].n_elements().saturating_sub(1)
    }
}

impl Component for Polynomial {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        let coefficients = self.parameters()[0].values();
        // Horner's scheme
        x.mapv(|x| coefficients.iter().fold(0.0, |acc, &c| acc * x + c))
    }

    fn gradient(&self, _parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        let order = self.order();
        let mut grad = Array2::zeros((order + 1, x.len()));
        for (k, mut row) in grad.rows_mut().into_iter().enumerate() {
            let power = (order - k) as i32;
            row.assign(&x.mapv(|x| x.powi(power)));
        }
        Some(grad)
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}
