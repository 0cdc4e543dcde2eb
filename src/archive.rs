//! Persisted parameter maps.
//!
//! A [`ParameterArchive`] holds the full per-position map of every parameter of
//! a model, keyed by `"{index}_{component}.{parameter}"` with names lowercased
//! and spaces replaced by underscores. The same format is used for multifit
//! checkpoints. Archives are JSON; NaN is stored as `null` and infinities as the
//! strings `"inf"` and `"-inf"`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecFitError};
use crate::model::{Model, ModelEvent};
use crate::parameters::{ParameterError, ParameterMap};

/// One archived number
///
/// JSON has no literal for infinities, so they are written as strings. A
/// missing value (`null`) stands for NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArchivedValue {
    Finite(f64),
    Infinite(Infinity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Infinity {
    #[serde(rename = "inf")]
    Positive,
    #[serde(rename = "-inf")]
    Negative,
}

/// One parameter's map in archive form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedParameter {
    pub n_elements: usize,

    /// Values in `(position, element)` row-major order
    pub values: Vec<Option<ArchivedValue>>,

    /// Standard deviations with the layout of `values`, when archived
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std: Option<Vec<Option<ArchivedValue>>>,

    /// Whether each position was explicitly stored
    pub is_set: Vec<bool>,
}

impl ArchivedValue {
    fn encode(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else if value == f64::INFINITY {
            Some(Self::Infinite(Infinity::Positive))
        } else if value == f64::NEG_INFINITY {
            Some(Self::Infinite(Infinity::Negative))
        } else {
            Some(Self::Finite(value))
        }
    }

    fn decode(value: Option<Self>) -> f64 {
        match value {
            None => f64::NAN,
            Some(Self::Finite(v)) => v,
            Some(Self::Infinite(Infinity::Positive)) => f64::INFINITY,
            Some(Self::Infinite(Infinity::Negative)) => f64::NEG_INFINITY,
        }
    }
}

fn to_archived(values: &Array2<f64>) -> Vec<Option<ArchivedValue>> {
    values.iter().map(|&v| ArchivedValue::encode(v)).collect()
}

fn from_archived(values: &[Option<ArchivedValue>], shape: (usize, usize)) -> Result<Array2<f64>> {
    let flat = values.iter().map(|&v| ArchivedValue::decode(v)).collect();
    Array2::from_shape_vec(shape, flat).map_err(|e| SpecFitError::DimensionMismatch(e.to_string()))
}

impl ArchivedParameter {
    pub fn from_map(map: &ParameterMap, include_std: bool) -> Self {
        Self {
            n_elements: map.n_elements(),
            values: to_archived(map.values()),
            std: include_std.then(|| to_archived(map.std())),
            is_set: map.is_set().to_vec(),
        }
    }

    pub fn to_map(&self) -> Result<ParameterMap> {
        let shape = (self.is_set.len(), self.n_elements);
        let values = from_archived(&self.values, shape)?;
        let std = match &self.std {
            Some(std) => from_archived(std, shape)?,
            None => Array2::from_elem(shape, f64::NAN),
        };
        Ok(ParameterMap::from_parts(
            values,
            std,
            Array1::from(self.is_set.clone()),
        )?)
    }
}

/// Keyed archive of every parameter map of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterArchive {
    pub navigation_shape: Vec<usize>,
    pub entries: BTreeMap<String, ArchivedParameter>,
}

impl ParameterArchive {
    /// Archive key of a parameter
    ///
    /// # Examples
    ///
    /// ```
    /// use specfit_rs::archive::ParameterArchive;
    ///
    /// assert_eq!(ParameterArchive::key(2, "Power Law", "A"), "2_power_law.a");
    /// ```
    pub fn key(index: usize, component: &str, parameter: &str) -> String {
        format!("{}_{}.{}", index, slug(component), slug(parameter))
    }

    /// Snapshot the maps of every parameter of `model`
    ///
    /// Parameters without an allocated map are left out.
    pub fn from_model(model: &Model, include_std: bool) -> Self {
        let mut entries = BTreeMap::new();
        for (index, component) in model.components().iter().enumerate() {
            for param in component.parameters() {
                if let Some(map) = param.map() {
                    entries.insert(
                        Self::key(index, component.name(), param.name()),
                        ArchivedParameter::from_map(map, include_std),
                    );
                }
            }
        }

        Self {
            navigation_shape: model.navigation_shape().to_vec(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ArchivedParameter> {
        self.entries.get(key)
    }

    /// Write the archive as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        debug!("Saved {} parameter maps to {}", self.len(), path.as_ref().display());
        Ok(())
    }

    /// Read an archive written by [`ParameterArchive::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Install the archived maps into the matching parameters of `model`
    ///
    /// # Errors
    ///
    /// * [`SpecFitError::Configuration`] if the navigation shapes differ
    /// * [`SpecFitError::ParameterNotFound`] if a model parameter has no entry
    /// * [`SpecFitError::ParameterError`] if an entry does not fit its parameter
    ///
    /// Every entry is checked before any map is installed, so on error the
    /// model is left as it was.
    pub fn apply(&self, model: &mut Model) -> Result<()> {
        if self.navigation_shape != model.navigation_shape() {
            return Err(SpecFitError::Configuration(format!(
                "archive navigation shape {:?} does not match the model's {:?}",
                self.navigation_shape,
                model.navigation_shape()
            )));
        }

        let n_positions: usize = self.navigation_shape.iter().product();
        let mut resolved = Vec::new();
        for (index, component) in model.components().iter().enumerate() {
            for (p, param) in component.parameters().iter().enumerate() {
                let key = Self::key(index, component.name(), param.name());
                let entry = self
                    .entries
                    .get(&key)
                    .ok_or_else(|| SpecFitError::ParameterNotFound(key.clone()))?;
                let map = entry.to_map()?;
                if map.n_elements() != param.n_elements() {
                    return Err(ParameterError::ElementCountMismatch {
                        name: key,
                        expected: param.n_elements(),
                        found: map.n_elements(),
                    }
                    .into());
                }
                if map.n_positions() != n_positions {
                    return Err(SpecFitError::DimensionMismatch(format!(
                        "{} holds {} positions, expected {}",
                        key,
                        map.n_positions(),
                        n_positions
                    )));
                }
                resolved.push((index, p, map));
            }
        }

        for (index, p, map) in resolved {
            model.components_mut()[index].parameters_mut()[p].replace_map(map)?;
        }
        Ok(())
    }
}

fn slug(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

impl Model {
    /// Save every parameter map (optionally with std maps) to `path`
    pub fn save_parameters<P: AsRef<Path>>(&self, path: P, include_std: bool) -> Result<()> {
        ParameterArchive::from_model(self, include_std).save(path)
    }

    /// Restore parameter maps saved with [`Model::save_parameters`] and charge
    /// the live values at the current position
    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        ParameterArchive::load(path)?.apply(self)?;
        self.charge_quiet(false)?;
        self.notify(&ModelEvent::ParametersLoaded);
        Ok(())
    }
}
