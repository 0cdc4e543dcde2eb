//! Lookup-table component.
//!
//! The shape comes from an external two-column table (`x y` per line,
//! whitespace separated, `#` starts a comment). A missing or malformed table is
//! a configuration error raised when the component is built.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use ndarray::{Array1, Array2};

use crate::component::{Component, ComponentCore};
use crate::error::{Result, SpecFitError};
use crate::parameters::Parameter;

/// `f(x) = intensity * table(x - shift)`, linearly interpolated
///
/// Outside the tabulated range the first or last sample is used and a warning
/// is logged once per component.
#[derive(Debug)]
pub struct Tabulated {
    core: ComponentCore,
    x: Vec<f64>,
    y: Vec<f64>,
    source: Option<PathBuf>,
    warned: AtomicBool,
}

impl Tabulated {
    /// Load the table from a file
    ///
    /// # Errors
    ///
    /// [`SpecFitError::Configuration`] if the file cannot be read or does not
    /// hold at least two finite rows with strictly increasing `x`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            SpecFitError::Configuration(format!(
                "cannot read lookup table {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut x = Vec::new();
        let mut y = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace().map(str::parse::<f64>);
            match (fields.next(), fields.next()) {
                (Some(Ok(xi)), Some(Ok(yi))) => {
                    x.push(xi);
                    y.push(yi);
                }
                _ => {
                    return Err(SpecFitError::Configuration(format!(
                        "lookup table {} line {}: expected two numbers",
                        path.display(),
                        line_no + 1
                    )))
                }
            }
        }

        let mut table = Self::from_table(x, y)?;
        table.source = Some(path.to_path_buf());
        Ok(table)
    }

    /// Build from in-memory samples
    pub fn from_table(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        if x.len() != y.len() || x.len() < 2 {
            return Err(SpecFitError::Configuration(format!(
                "lookup table needs at least two (x, y) rows, got {} x and {} y values",
                x.len(),
                y.len()
            )));
        }
        if let Some(i) = x.iter().zip(&y).position(|(xi, yi)| !xi.is_finite() || !yi.is_finite()) {
            return Err(SpecFitError::Configuration(format!(
                "lookup table row {} is not finite: ({}, {})",
                i + 1,
                x[i],
                y[i]
            )));
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SpecFitError::Configuration(
                "lookup table x values must be strictly increasing".to_string(),
            ));
        }

        Ok(Self {
            core: ComponentCore::new(
                "Tabulated",
                vec![
                    Parameter::new("intensity", 1.0),
                    Parameter::new("shift", 0.0).with_free(false),
                ],
            ),
            x,
            y,
            source: None,
            warned: AtomicBool::new(false),
        })
    }

    /// File the table was read from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Tabulated range `(first x, last x)`
    pub fn range(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    fn interpolate(&self, points: &Array1<f64>) -> Array1<f64> {
        let (lo, hi) = self.range();
        let n = self.x.len();
        let mut clamped = false;

        let out = points.mapv(|p| {
            if p <= lo || p.is_nan() {
                clamped |= p < lo || p.is_nan();
                return self.y[0];
            }
            if p >= hi {
                clamped |= p > hi;
                return self.y[n - 1];
            }
            // first index with x > p
            let upper = self.x.partition_point(|&xi| xi <= p);
            let (x0, x1) = (self.x[upper - 1], self.x[upper]);
            let (y0, y1) = (self.y[upper - 1], self.y[upper]);
            y0 + (y1 - y0) * (p - x0) / (x1 - x0)
        });

        if clamped && !self.warned.swap(true, Ordering::Relaxed) {
            warn!(
                "{}: coordinates outside the tabulated range [{}, {}] were clamped",
                self.name(),
                lo,
                hi
            );
        }
        out
    }

    fn shifted(&self, x: &Array1<f64>) -> Array1<f64> {
        let shift = self.parameters()[1].value();
        x.mapv(|x| x - shift)
    }
}

impl Clone for Tabulated {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            source: self.source.clone(),
            warned: AtomicBool::new(self.warned.load(Ordering::Relaxed)),
        }
    }
}

impl Component for Tabulated {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn function(&self, x: &Array1<f64>) -> Array1<f64> {
        let intensity = self.parameters()[0].value();
        self.interpolate(&self.shifted(x)) * intensity
    }

    fn gradient(&self, parameter: usize, x: &Array1<f64>) -> Option<Array2<f64>> {
        if parameter != 0 {
            return None;
        }
        let row = self.interpolate(&self.shifted(x));
        let n = row.len();
        row.into_shape((1, n)).ok()
    }

    fn box_clone(&self) -> Box<dyn Component> {
        Box::new(self.clone())
    }
}
