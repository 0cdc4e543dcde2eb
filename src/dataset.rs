//! Measured spectra over a navigation grid

use ndarray::{Array2, ArrayD, ArrayView1, Axis, IxDyn};

use crate::axis::DataAxis;
use crate::error::{Result, SpecFitError};

/// A stack of spectra sharing one spectral axis
///
/// Data are held as `(n_positions, n_channels)` with positions in row-major
/// order of the navigation shape.
#[derive(Debug, Clone)]
pub struct Dataset {
    axis: DataAxis,
    navigation_shape: Vec<usize>,
    data: Array2<f64>,
    variance: Option<Array2<f64>>,
}

impl Dataset {
    /// Build a dataset from an n-dimensional array whose last axis is spectral
    ///
    /// # Arguments
    ///
    /// * `data` - Array of shape `[nav..., n_channels]`
    /// * `axis` - Spectral axis; its size must equal the last dimension of `data`
    pub fn new(data: ArrayD<f64>, axis: DataAxis) -> Result<Self> {
        let shape = data.shape().to_vec();
        let (&n_channels, navigation_shape) = shape.split_last().ok_or_else(|| {
            SpecFitError::DimensionMismatch("dataset needs at least one dimension".to_string())
        })?;

        let n_positions = navigation_shape.iter().product();
        let flat: Vec<f64> = data.iter().copied().collect();
        let data = Array2::from_shape_vec((n_positions, n_channels), flat)
            .map_err(|e| SpecFitError::DimensionMismatch(e.to_string()))?;

        Self::from_spectra(data, navigation_shape, axis)
    }

    /// Build a dataset from spectra already flattened to `(n_positions, n_channels)`
    pub fn from_spectra(data: Array2<f64>, navigation_shape: &[usize], axis: DataAxis) -> Result<Self> {
        let n_positions: usize = navigation_shape.iter().product();
        if data.nrows() != n_positions {
            return Err(SpecFitError::DimensionMismatch(format!(
                "navigation shape {:?} has {} positions, data has {} rows",
                navigation_shape,
                n_positions,
                data.nrows()
            )));
        }
        if data.ncols() != axis.size {
            return Err(SpecFitError::DimensionMismatch(format!(
                "axis has {} channels, data has {}",
                axis.size,
                data.ncols()
            )));
        }

        Ok(Self {
            axis,
            navigation_shape: navigation_shape.to_vec(),
            data,
            variance: None,
        })
    }

    /// Attach a per-channel variance with the same layout as the data
    pub fn with_variance(mut self, variance: Array2<f64>) -> Result<Self> {
        if variance.dim() != self.data.dim() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "variance shape {:?} does not match data shape {:?}",
                variance.dim(),
                self.data.dim()
            )));
        }
        self.variance = Some(variance);
        Ok(self)
    }

    pub fn axis(&self) -> &DataAxis {
        &self.axis
    }

    pub fn navigation_shape(&self) -> &[usize] {
        &self.navigation_shape
    }

    pub fn n_positions(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.data.ncols()
    }

    /// Flattened data, `(n_positions, n_channels)`
    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Spectrum at a flat position
    pub fn spectrum(&self, position: usize) -> ArrayView1<'_, f64> {
        self.data.index_axis(Axis(0), position)
    }

    /// Variance at a flat position, if a variance is attached
    pub fn variance(&self, position: usize) -> Option<ArrayView1<'_, f64>> {
        self.variance
            .as_ref()
            .map(|v| v.index_axis(Axis(0), position))
    }

    pub fn has_variance(&self) -> bool {
        self.variance.is_some()
    }

    /// Full shape `[nav..., n_channels]`
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.navigation_shape.clone();
        shape.push(self.n_channels());
        shape
    }

    /// Reshape a `(n_positions, n_channels)` array into the dataset layout
    pub(crate) fn unflatten(&self, flat: Array2<f64>) -> Result<ArrayD<f64>> {
        flat.into_shape(IxDyn(&self.shape()))
            .map_err(|e| SpecFitError::DimensionMismatch(e.to_string()))
    }
}
