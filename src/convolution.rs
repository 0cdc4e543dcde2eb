//! Instrument-response convolution
//!
//! Convolved components are evaluated on an extended axis of
//! `n_channels + response_len - 1` points and reduced back to `n_channels`
//! points by a "valid" discrete convolution with the response, which keeps only
//! fully overlapping lags.

use ndarray::{Array1, Array2, ArrayView1};

use crate::axis::DataAxis;
use crate::error::{Result, SpecFitError};

/// Discrete convolution keeping only fully overlapping lags
///
/// The output has `max(n, m) - min(n, m) + 1` samples. The operation is
/// commutative, so the argument order only matters for naming.
///
/// # Examples
///
/// ```
/// use ndarray::array;
/// use specfit_rs::convolution::convolve_valid;
///
/// let out = convolve_valid(array![1.0, 2.0, 3.0, 4.0].view(), array![0.0, 1.0, 0.0].view());
/// assert_eq!(out.to_vec(), vec![2.0, 3.0]);
/// ```
pub fn convolve_valid<'a>(signal: ArrayView1<'a, f64>, kernel: ArrayView1<'a, f64>) -> Array1<f64> {
    let (long, short) = if signal.len() >= kernel.len() {
        (signal, kernel)
    } else {
        (kernel, signal)
    };

    if short.is_empty() {
        return Array1::zeros(0);
    }

    let n_short = short.len();
    let n_out = long.len() - n_short + 1;
    Array1::from_iter((0..n_out).map(|k| {
        short
            .iter()
            .enumerate()
            .map(|(j, &s)| s * long[k + n_short - 1 - j])
            .sum::<f64>()
    }))
}

/// Extended axis on which convolved components are evaluated
///
/// It keeps the step of `axis`, has `axis.size + response_len - 1` points and
/// is shifted so the response's zero channel lines up with the axis origin:
/// with `knot = response_len - zero_index - 1`, the first value is
/// `offset - knot * scale`.
pub fn convolution_axis(axis: &DataAxis, response_len: usize, zero_index: usize) -> DataAxis {
    let knot = response_len.saturating_sub(zero_index + 1);
    DataAxis::new(
        axis.offset - knot as f64 * axis.scale,
        axis.scale,
        axis.size + response_len.saturating_sub(1),
    )
}

/// Instrument response (low-loss spectrum) used to convolve components
///
/// Holds either one kernel shared by every navigation position or one kernel
/// per position. All kernels have the same length and zero index.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentResponse {
    kernels: Array2<f64>,
    zero_index: usize,
}

impl InstrumentResponse {
    /// One kernel shared by every position
    ///
    /// # Arguments
    ///
    /// * `kernel` - Response samples on the main axis step
    /// * `zero_index` - Index of the kernel sample at zero energy loss
    pub fn uniform(kernel: Array1<f64>, zero_index: usize) -> Result<Self> {
        let len = kernel.len();
        let kernels = kernel
            .into_shape((1, len))
            .map_err(|e| SpecFitError::DimensionMismatch(e.to_string()))?;
        Self::per_position(kernels, zero_index)
    }

    /// One kernel per flat navigation position, `(n_positions, kernel_len)`
    pub fn per_position(kernels: Array2<f64>, zero_index: usize) -> Result<Self> {
        if kernels.ncols() == 0 {
            return Err(SpecFitError::Configuration(
                "instrument response is empty".to_string(),
            ));
        }
        if zero_index >= kernels.ncols() {
            return Err(SpecFitError::Configuration(format!(
                "zero index {} is outside a response of length {}",
                zero_index,
                kernels.ncols()
            )));
        }

        Ok(Self {
            kernels,
            zero_index,
        })
    }

    /// Shared kernel whose zero index is read from its own axis
    pub fn from_axis(kernel: Array1<f64>, axis: &DataAxis) -> Result<Self> {
        if kernel.len() != axis.size {
            return Err(SpecFitError::DimensionMismatch(format!(
                "response has {} samples, its axis {}",
                kernel.len(),
                axis.size
            )));
        }
        Self::uniform(kernel, axis.value2index(0.0))
    }

    pub fn len(&self) -> usize {
        self.kernels.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.ncols() == 0
    }

    pub fn zero_index(&self) -> usize {
        self.zero_index
    }

    /// `true` when one kernel serves every position
    pub fn is_shared(&self) -> bool {
        self.kernels.nrows() == 1
    }

    /// Kernel used at a flat position
    pub fn kernel(&self, position: usize) -> ArrayView1<'_, f64> {
        let row = if self.is_shared() { 0 } else { position };
        self.kernels.row(row)
    }

    /// Check that a per-position response covers `n_positions`
    pub fn validate(&self, n_positions: usize) -> Result<()> {
        if !self.is_shared() && self.kernels.nrows() != n_positions {
            return Err(SpecFitError::Configuration(format!(
                "instrument response has {} kernels for {} navigation positions",
                self.kernels.nrows(),
                n_positions
            )));
        }
        Ok(())
    }
}
