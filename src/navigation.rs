//! Navigation over the non-spectral dimensions of a dataset
//!
//! Positions are addressed either by their multi-dimensional indices or by
//! their row-major flat index. Every per-position array in the crate
//! (parameter maps, dataset rows, per-position responses) uses the flat index.

use ndarray::ArrayD;

use crate::error::{Result, SpecFitError};

/// Current position within a navigation shape
///
/// An empty shape describes a single spectrum and has exactly one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCursor {
    shape: Vec<usize>,
    position: usize,
}

impl NavigationCursor {
    /// Create a cursor at the first position of `shape`
    pub fn new(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            position: 0,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of positions
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Current flat position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current multi-dimensional indices
    pub fn indices(&self) -> Vec<usize> {
        self.unravel(self.position)
    }

    /// Move to a flat position
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position >= self.size() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "position {} is out of range for navigation shape {:?}",
                position, self.shape
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Move to multi-dimensional indices
    pub fn set_indices(&mut self, indices: &[usize]) -> Result<()> {
        let position = self.ravel(indices)?;
        self.position = position;
        Ok(())
    }

    /// Iterate over every flat position in row-major order
    pub fn positions(&self) -> std::ops::Range<usize> {
        0..self.size()
    }

    /// Convert multi-dimensional indices to a flat position
    pub fn ravel(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.shape.len() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "expected {} navigation indices, got {}",
                self.shape.len(),
                indices.len()
            )));
        }

        let mut flat = 0;
        for (&index, &extent) in indices.iter().zip(&self.shape) {
            if index >= extent {
                return Err(SpecFitError::DimensionMismatch(format!(
                    "indices {:?} are out of range for navigation shape {:?}",
                    indices, self.shape
                )));
            }
            flat = flat * extent + index;
        }
        Ok(flat)
    }

    /// Convert a flat position to multi-dimensional indices
    pub fn unravel(&self, mut position: usize) -> Vec<usize> {
        let mut indices = vec![0; self.shape.len()];
        for (slot, &extent) in indices.iter_mut().zip(&self.shape).rev() {
            if extent == 0 {
                continue;
            }
            *slot = position % extent;
            position /= extent;
        }
        indices
    }
}

/// Flatten a position mask after checking it against a navigation shape
///
/// `true` marks a position to be skipped.
///
/// # Returns
///
/// The mask in flat (row-major) order, or a configuration error if its shape
/// differs from `shape`.
pub fn flatten_mask(mask: &ArrayD<bool>, shape: &[usize]) -> Result<Vec<bool>> {
    // A single spectrum has shape [] but callers commonly pass a length-1 mask
    let matches = mask.shape() == shape || (shape.is_empty() && mask.len() == 1);
    if !matches {
        return Err(SpecFitError::Configuration(format!(
            "mask shape {:?} does not match navigation shape {:?}",
            mask.shape(),
            shape
        )));
    }
    Ok(mask.iter().copied().collect())
}
