//! Parameter definition and implementation
//!
//! A [`Parameter`] holds a live value (a scalar or a fixed-length vector), a
//! free/fixed flag, optional bounds, the list of parameters twinned to it and a
//! dense per-position [`ParameterMap`]. The live value is what the optimizer
//! mutates; the map is what persists across navigation positions. The two are
//! synchronized only through [`Parameter::store_at`] and
//! [`Parameter::charge_from`].

use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

use crate::parameters::bounds::{Bounds, BoundsError};

/// Errors that can occur when working with parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter '{name}' has {expected} elements, got {found}")]
    ElementCountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Bounds error: {0}")]
    BoundsError(#[from] BoundsError),

    #[error("Position {position} is out of range for parameter '{name}' ({size} positions)")]
    PositionOutOfRange {
        name: String,
        position: usize,
        size: usize,
    },

    #[error("Mask for parameter '{name}' has {found} entries, the map has {expected} positions")]
    MaskLengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Parameter '{name}' has no per-position map allocated")]
    MapNotAllocated { name: String },

    #[error("Parameter '{name}' cannot be twinned to itself")]
    SelfTwin { name: String },
}

/// Address of a parameter inside a model: component index, parameter index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamRef {
    pub component: usize,
    pub parameter: usize,
}

impl ParamRef {
    pub fn new(component: usize, parameter: usize) -> Self {
        Self {
            component,
            parameter,
        }
    }
}

/// Dense per-position storage of a parameter's values and standard deviations
///
/// Rows are flattened navigation positions, columns are the parameter's
/// elements. Standard deviations are NaN until a fit provides them.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMap {
    values: Array2<f64>,
    std: Array2<f64>,
    is_set: Array1<bool>,
}

impl ParameterMap {
    /// Allocate a map with every position holding `fill`
    ///
    /// # Arguments
    ///
    /// * `n_positions` - Number of navigation positions
    /// * `fill` - Initial value of every position (one entry per element)
    pub fn new(n_positions: usize, fill: &[f64]) -> Self {
        let n_elements = fill.len();
        let mut values = Array2::zeros((n_positions, n_elements));
        for mut row in values.rows_mut() {
            row.assign(&ArrayView1::from(fill));
        }

        Self {
            values,
            std: Array2::from_elem((n_positions, n_elements), f64::NAN),
            is_set: Array1::from_elem(n_positions, false),
        }
    }

    /// Build a map from already populated arrays
    pub fn from_parts(
        values: Array2<f64>,
        std: Array2<f64>,
        is_set: Array1<bool>,
    ) -> Result<Self, ParameterError> {
        if values.dim() != std.dim() || values.nrows() != is_set.len() {
            return Err(ParameterError::ElementCountMismatch {
                name: "map".to_string(),
                expected: values.len(),
                found: std.len(),
            });
        }

        Ok(Self {
            values,
            std,
            is_set,
        })
    }

    pub fn n_positions(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_elements(&self) -> usize {
        self.values.ncols()
    }

    /// Stored values, `(n_positions, n_elements)`
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Stored standard deviations, `(n_positions, n_elements)`
    pub fn std(&self) -> &Array2<f64> {
        &self.std
    }

    /// Whether a value was explicitly stored at each position
    pub fn is_set(&self) -> &Array1<bool> {
        &self.is_set
    }

    /// Values stored at one position
    pub fn value_at(&self, position: usize) -> ArrayView1<'_, f64> {
        self.values.row(position)
    }

    /// Standard deviations stored at one position
    pub fn std_at(&self, position: usize) -> ArrayView1<'_, f64> {
        self.std.row(position)
    }

    /// Write one position. A missing `std` is recorded as NaN.
    pub fn set_at(&mut self, position: usize, values: &[f64], std: Option<&[f64]>) {
        self.values
            .row_mut(position)
            .assign(&ArrayView1::from(values));
        match std {
            Some(std) => self.std.row_mut(position).assign(&ArrayView1::from(std)),
            None => self.std.row_mut(position).fill(f64::NAN),
        }
        self.is_set[position] = true;
    }
}

/// A named model parameter
///
/// # Examples
///
/// ```
/// use specfit_rs::parameters::Parameter;
///
/// let mut param = Parameter::new("centre", 1.5);
/// assert_eq!(param.value(), 1.5);
/// assert!(param.is_free());
///
/// param.create_map(4);
/// param.set_value(2.0);
/// param.store_at(3).unwrap();
/// param.set_value(0.0);
/// param.charge_from(3).unwrap();
/// assert_eq!(param.value(), 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,

    /// Current value, one entry per element
    value: Vec<f64>,

    /// Standard deviation of the last fit, if any
    std: Option<Vec<f64>>,

    free: bool,

    bounds: Bounds,

    /// Parameters whose value follows this one
    twins: Vec<ParamRef>,

    map: Option<ParameterMap>,
}

impl Parameter {
    /// Create a new free, unbounded scalar parameter
    pub fn new(name: &str, value: f64) -> Self {
        Self::vector(name, vec![value])
    }

    /// Create a new free, unbounded parameter with one entry per element
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the parameter
    /// * `values` - Initial value of every element; its length fixes the element count
    pub fn vector(name: &str, values: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            value: values,
            std: None,
            free: true,
            bounds: Bounds::default(),
            twins: Vec::new(),
            map: None,
        }
    }

    /// Builder-style bounds assignment
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Builder-style free flag assignment
    pub fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First element of the current value
    pub fn value(&self) -> f64 {
        self.value.first().copied().unwrap_or(f64::NAN)
    }

    /// All elements of the current value
    pub fn values(&self) -> &[f64] {
        &self.value
    }

    /// Set every element to `value`
    pub fn set_value(&mut self, value: f64) {
        self.value.iter_mut().for_each(|v| *v = value);
    }

    /// Replace the current value element by element
    pub fn set_values(&mut self, values: &[f64]) -> Result<(), ParameterError> {
        self.check_len(values.len())?;
        self.value.copy_from_slice(values);
        Ok(())
    }

    pub fn n_elements(&self) -> usize {
        self.value.len()
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn set_free(&mut self, free: bool) {
        self.free = free;
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = bounds;
    }

    /// Parameters that follow this one
    pub fn twins(&self) -> &[ParamRef] {
        &self.twins
    }

    /// Register a follower. Duplicates are ignored.
    pub fn add_twin(&mut self, twin: ParamRef) {
        if !self.twins.contains(&twin) {
            self.twins.push(twin);
        }
    }

    /// Unregister a follower
    pub fn remove_twin(&mut self, twin: ParamRef) {
        self.twins.retain(|t| *t != twin);
    }

    pub(crate) fn twins_mut(&mut self) -> &mut Vec<ParamRef> {
        &mut self.twins
    }

    /// Standard deviation from the last fit or charge, if any
    pub fn std(&self) -> Option<&[f64]> {
        self.std.as_deref()
    }

    pub fn set_std(&mut self, std: Option<Vec<f64>>) -> Result<(), ParameterError> {
        if let Some(std) = &std {
            self.check_len(std.len())?;
        }
        self.std = std;
        Ok(())
    }

    /// Per-position map, if allocated
    pub fn map(&self) -> Option<&ParameterMap> {
        self.map.as_ref()
    }

    /// (Re)allocate the per-position map for `n_positions` positions
    ///
    /// Every position is initialized with the current value and marked as not set.
    pub fn create_map(&mut self, n_positions: usize) {
        self.map = Some(ParameterMap::new(n_positions, &self.value));
    }

    /// Detach the per-position map
    pub fn release_map(&mut self) -> Option<ParameterMap> {
        self.map.take()
    }

    /// Install a map, checking its element count
    pub fn replace_map(&mut self, map: ParameterMap) -> Result<(), ParameterError> {
        self.check_len(map.n_elements())?;
        self.map = Some(map);
        Ok(())
    }

    /// Copy the live value (and std) into the map at `position`
    pub fn store_at(&mut self, position: usize) -> Result<(), ParameterError> {
        self.check_position(position)?;
        let value = self.value.clone();
        let std = self.std.clone();
        if let Some(map) = self.map.as_mut() {
            map.set_at(position, &value, std.as_deref());
        }
        Ok(())
    }

    /// Copy the value (and std) stored at `position` into the live value
    ///
    /// Positions never stored leave the live value untouched.
    pub fn charge_from(&mut self, position: usize) -> Result<(), ParameterError> {
        self.check_position(position)?;
        let map = self.map.take();
        if let Some(map) = &map {
            self.charge_from_map(map, position)?;
        }
        self.map = map;
        Ok(())
    }

    /// Copy the value stored at `position` of an external map into the live value
    pub fn charge_from_map(
        &mut self,
        map: &ParameterMap,
        position: usize,
    ) -> Result<(), ParameterError> {
        if position >= map.n_positions() {
            return Err(ParameterError::PositionOutOfRange {
                name: self.name.clone(),
                position,
                size: map.n_positions(),
            });
        }
        self.check_len(map.n_elements())?;

        if !map.is_set()[position] {
            return Ok(());
        }

        self.value = map.value_at(position).to_vec();
        let std = map.std_at(position);
        self.std = if std.iter().any(|s| s.is_finite()) {
            Some(std.to_vec())
        } else {
            None
        };
        Ok(())
    }

    /// Broadcast the live value into the map at every position where `mask`
    /// is `false` (every position when no mask is given)
    pub fn set_current_value_to(&mut self, mask: Option<&[bool]>) -> Result<(), ParameterError> {
        let map = self.map.as_mut().ok_or_else(|| ParameterError::MapNotAllocated {
            name: self.name.clone(),
        })?;

        if let Some(mask) = mask {
            if mask.len() != map.n_positions() {
                return Err(ParameterError::MaskLengthMismatch {
                    name: self.name.clone(),
                    expected: map.n_positions(),
                    found: mask.len(),
                });
            }
        }

        for position in 0..map.n_positions() {
            if mask.map_or(false, |m| m[position]) {
                continue;
            }
            map.set_at(position, &self.value, None);
        }
        Ok(())
    }

    fn check_len(&self, found: usize) -> Result<(), ParameterError> {
        if found != self.value.len() {
            return Err(ParameterError::ElementCountMismatch {
                name: self.name.clone(),
                expected: self.value.len(),
                found,
            });
        }
        Ok(())
    }

    fn check_position(&self, position: usize) -> Result<(), ParameterError> {
        let map = self.map.as_ref().ok_or_else(|| ParameterError::MapNotAllocated {
            name: self.name.clone(),
        })?;
        if position >= map.n_positions() {
            return Err(ParameterError::PositionOutOfRange {
                name: self.name.clone(),
                position,
                size: map.n_positions(),
            });
        }
        Ok(())
    }
}
