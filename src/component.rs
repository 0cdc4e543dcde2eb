//! Component trait
//!
//! A component is one additive term of a model: an ordered list of parameters
//! plus a function of the spectral axis. The model only ever talks to
//! components through this trait.

use std::fmt::Debug;

use log::{debug, warn};
use ndarray::{Array1, Array2};

use crate::error::Result;
use crate::parameters::{Parameter, ParameterError};
use crate::utils::finite_difference;

/// State shared by every component implementation
#[derive(Debug, Clone)]
pub struct ComponentCore {
    name: String,
    parameters: Vec<Parameter>,
    active: bool,
    convolved: bool,
}

impl ComponentCore {
    /// Create an active, non-convolved core
    pub fn new(name: &str, parameters: Vec<Parameter>) -> Self {
        Self {
            name: name.to_string(),
            parameters,
            active: true,
            convolved: false,
        }
    }
}

/// An additive model term
///
/// Implementors provide [`Component::function`] and, where available, analytic
/// per-parameter gradients. Everything else is provided on top of the
/// [`ComponentCore`].
pub trait Component: Debug + Send + Sync {
    /// Shared state
    fn core(&self) -> &ComponentCore;

    /// Mutable shared state
    fn core_mut(&mut self) -> &mut ComponentCore;

    /// Evaluate the component at every point of `x` using the current values
    fn function(&self, x: &Array1<f64>) -> Array1<f64>;

    /// Analytic derivative of [`Component::function`] with respect to one parameter
    ///
    /// # Arguments
    ///
    /// * `parameter` - Index of the parameter in [`Component::parameters`]
    /// * `x` - Points at which to evaluate the derivative
    ///
    /// # Returns
    ///
    /// One row per parameter element, one column per point, or `None` when no
    /// analytic derivative is available (a central finite difference is used then).
    fn gradient(&self, _parameter: usize, _x: &Array1<f64>) -> Option<Array2<f64>> {
        None
    }

    /// Clone into a box
    fn box_clone(&self) -> Box<dyn Component>;

    fn name(&self) -> &str {
        &self.core().name
    }

    fn set_name(&mut self, name: &str) {
        self.core_mut().name = name.to_string();
    }

    fn parameters(&self) -> &[Parameter] {
        &self.core().parameters
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.core_mut().parameters
    }

    /// Parameter by name
    fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters().iter().find(|p| p.name() == name)
    }

    /// Mutable parameter by name
    fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.parameters_mut().iter_mut().find(|p| p.name() == name)
    }

    /// Index of a parameter by name
    fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters().iter().position(|p| p.name() == name)
    }

    fn is_active(&self) -> bool {
        self.core().active
    }

    fn set_active(&mut self, active: bool) {
        self.core_mut().active = active;
    }

    fn is_convolved(&self) -> bool {
        self.core().convolved
    }

    fn set_convolved(&mut self, convolved: bool) {
        self.core_mut().convolved = convolved;
    }

    /// Number of free scalar slots (free parameters expanded by element count)
    fn nfree_param(&self) -> usize {
        self.parameters()
            .iter()
            .filter(|p| p.is_free())
            .map(|p| p.n_elements())
            .sum()
    }

    /// Current values of the free parameters, flattened in parameter order
    fn free_values(&self) -> Vec<f64> {
        self.parameters()
            .iter()
            .filter(|p| p.is_free())
            .flat_map(|p| p.values().iter().copied())
            .collect()
    }

    /// Assign an ordered sequence of values to this component's parameters
    ///
    /// # Arguments
    ///
    /// * `values` - Flattened values, one slot per element, in parameter order
    /// * `std` - Optional standard deviations with the same layout
    /// * `only_free` - Assign free parameters only (the optimizer layout)
    fn charge(&mut self, values: &[f64], std: Option<&[f64]>, only_free: bool) -> Result<()> {
        let mut offset = 0;
        for param in self.parameters_mut() {
            if only_free && !param.is_free() {
                continue;
            }

            let n = param.n_elements();
            let end = offset + n;
            if end > values.len() {
                return Err(ParameterError::ElementCountMismatch {
                    name: param.name().to_string(),
                    expected: end,
                    found: values.len(),
                }
                .into());
            }

            param.set_values(&values[offset..end])?;
            if let Some(std) = std {
                param.set_std(std.get(offset..end).map(|s| s.to_vec()))?;
            }
            offset = end;
        }
        Ok(())
    }

    /// Copy every live parameter value into its map at `position`
    fn store_at(&mut self, position: usize) -> Result<()> {
        for param in self.parameters_mut() {
            param.store_at(position)?;
        }
        Ok(())
    }

    /// Copy parameter values from their maps at `position`
    ///
    /// With `only_fixed`, free parameters keep their current values.
    fn charge_from(&mut self, position: usize, only_fixed: bool) -> Result<()> {
        for param in self.parameters_mut() {
            if only_fixed && param.is_free() {
                continue;
            }
            param.charge_from(position)?;
        }
        Ok(())
    }

    /// (Re)allocate every parameter map for `n_positions` positions
    fn create_maps(&mut self, n_positions: usize) {
        for param in self.parameters_mut() {
            param.create_map(n_positions);
        }
    }

    /// Derivative of the component with respect to one parameter
    ///
    /// Uses [`Component::gradient`] when it is implemented, otherwise a central
    /// finite difference on the live parameter value (restored afterwards).
    fn parameter_gradient(&mut self, parameter: usize, x: &Array1<f64>) -> Array2<f64> {
        if let Some(grad) = self.gradient(parameter, x) {
            return grad;
        }

        debug!(
            "No analytic gradient for {}.{}, using finite differences",
            self.name(),
            self.parameters()[parameter].name()
        );

        let original = self.parameters()[parameter].values().to_vec();
        let grad = finite_difference::central_difference(
            |values| {
                self.parameters_mut()[parameter].set_values(values)?;
                Ok(self.function(x))
            },
            &original,
            finite_difference::default_step(),
        );

        let restored = self.parameters_mut()[parameter].set_values(&original);
        match grad.and_then(|grad| restored.map(|_| grad).map_err(Into::into)) {
            Ok(grad) => grad,
            Err(e) => {
                warn!(
                    "Finite-difference gradient of {}.{} failed, using zeros: {}",
                    self.name(),
                    self.parameters()[parameter].name(),
                    e
                );
                Array2::zeros((original.len(), x.len()))
            }
        }
    }
}

impl Clone for Box<dyn Component> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
