//! Uniform spectral axis

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// A uniformly sampled axis: `value(i) = offset + i * scale`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataAxis {
    pub offset: f64,
    pub scale: f64,
    pub size: usize,
}

impl DataAxis {
    pub fn new(offset: f64, scale: f64, size: usize) -> Self {
        Self {
            offset,
            scale,
            size,
        }
    }

    /// Axis coordinates of every channel
    pub fn values(&self) -> Array1<f64> {
        Array1::from_iter((0..self.size).map(|i| self.index2value(i)))
    }

    pub fn index2value(&self, index: usize) -> f64 {
        self.offset + index as f64 * self.scale
    }

    /// Nearest channel index of an axis value, clamped to the axis
    pub fn value2index(&self, value: f64) -> usize {
        if self.size == 0 {
            return 0;
        }
        let raw = ((value - self.offset) / self.scale).round();
        if raw.is_nan() || raw < 0.0 {
            0
        } else {
            (raw as usize).min(self.size - 1)
        }
    }

    /// Axis value of the last channel
    pub fn high_value(&self) -> f64 {
        self.index2value(self.size.saturating_sub(1))
    }
}
