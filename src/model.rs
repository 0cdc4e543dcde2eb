//! The model: an ordered list of components bound to one dataset.
//!
//! A [`Model`] owns the components, the navigation cursor, the channel
//! selection and the optional instrument response. It is the only place where
//! live parameter values and the per-position parameter maps meet:
//! [`Model::charge`] reads the maps at the cursor, [`Model::store`] writes them.

use std::fmt;

use ndarray::{Array1, Array2, ArrayD};

use crate::axis::DataAxis;
use crate::component::Component;
use crate::composition::{self, ConvolutionBranch, EvaluationContext};
use crate::convolution::{self, InstrumentResponse};
use crate::dataset::Dataset;
use crate::error::{Result, SpecFitError};
use crate::fit::{self, FitOptions, FitOutcome, FitPlan};
use crate::navigation::{flatten_mask, NavigationCursor};
use crate::parameters::{ParamRef, Parameter, ParameterError};

/// Notification sent to model observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEvent {
    /// Live values were charged from the maps at `position`
    Charged { position: usize },
    /// Live values were stored into the maps at `position`
    Stored { position: usize },
    /// Parameter maps were replaced from an archive
    ParametersLoaded,
}

/// Callback notified after a charge or store batch
pub type Observer = Box<dyn Fn(&ModelEvent) + Send + Sync>;

/// Inputs of a fit at one position
pub(crate) struct FitInputs {
    pub context: EvaluationContext,
    pub data: Array1<f64>,
    pub weights: Option<Array1<f64>>,
}

/// Additive model over a dataset
///
/// # Examples
///
/// ```
/// use ndarray::Array2;
/// use specfit_rs::{components, DataAxis, Dataset, FitOptions, Model};
///
/// let axis = DataAxis::new(0.0, 1.0, 10);
/// let y = axis.values().mapv(|x| 3.0 * x + 5.0);
/// let data = y.insert_axis(ndarray::Axis(0));
/// let dataset = Dataset::from_spectra(data, &[1], axis).unwrap();
///
/// let mut model = Model::new(dataset);
/// model.extend(components::line(0.0, 1.0));
/// let outcome = model.fit(&FitOptions::default()).unwrap();
/// assert!(outcome.success);
/// ```
pub struct Model {
    dataset: Dataset,
    components: Vec<Box<dyn Component>>,
    cursor: NavigationCursor,
    channel_switches: Vec<bool>,
    response: Option<InstrumentResponse>,
    convolution_axis: Option<DataAxis>,
    observers: Vec<Observer>,
}

impl Model {
    /// Create an empty model over `dataset`, every channel selected
    pub fn new(dataset: Dataset) -> Self {
        let cursor = NavigationCursor::new(dataset.navigation_shape());
        let channel_switches = vec![true; dataset.n_channels()];
        Self {
            dataset,
            components: Vec::new(),
            cursor,
            channel_switches,
            response: None,
            convolution_axis: None,
            observers: Vec::new(),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn axis(&self) -> &DataAxis {
        self.dataset.axis()
    }

    pub fn cursor(&self) -> &NavigationCursor {
        &self.cursor
    }

    pub fn navigation_shape(&self) -> &[usize] {
        self.cursor.shape()
    }

    // ---- Components ----

    pub fn components(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    /// Mutable access to the components (flags and parameter values)
    pub fn components_mut(&mut self) -> &mut [Box<dyn Component>] {
        &mut self.components
    }

    pub fn component(&self, index: usize) -> Option<&dyn Component> {
        self.components.get(index).map(|c| c.as_ref())
    }

    pub fn component_mut(&mut self, index: usize) -> Option<&mut Box<dyn Component>> {
        self.components.get_mut(index)
    }

    /// Index of the first component called `name`
    pub fn find_component(&self, name: &str) -> Option<usize> {
        self.components.iter().position(|c| c.name() == name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a component, allocating its maps for the navigation shape
    pub fn push(&mut self, mut component: Box<dyn Component>) {
        component.create_maps(self.dataset.n_positions());
        self.components.push(component);
    }

    pub fn extend<I: IntoIterator<Item = Box<dyn Component>>>(&mut self, components: I) {
        for component in components {
            self.push(component);
        }
    }

    /// Insert a component at `index`, shifting the twin links of later components
    pub fn insert(&mut self, index: usize, mut component: Box<dyn Component>) -> Result<()> {
        if index > self.components.len() {
            return Err(SpecFitError::Configuration(format!(
                "cannot insert at {} into a model of {} components",
                index,
                self.components.len()
            )));
        }

        component.create_maps(self.dataset.n_positions());
        for twin in self.twins_mut() {
            if twin.component >= index {
                twin.component += 1;
            }
        }
        self.components.insert(index, component);
        Ok(())
    }

    /// Remove a component and every twin link pointing at it
    pub fn remove(&mut self, index: usize) -> Result<Box<dyn Component>> {
        if index >= self.components.len() {
            return Err(SpecFitError::ParameterNotFound(format!(
                "component {} (model has {})",
                index,
                self.components.len()
            )));
        }

        let removed = self.components.remove(index);
        for component in &mut self.components {
            for param in component.parameters_mut() {
                let twins = param.twins_mut();
                twins.retain(|t| t.component != index);
                for twin in twins.iter_mut() {
                    if twin.component > index {
                        twin.component -= 1;
                    }
                }
            }
        }
        Ok(removed)
    }

    fn twins_mut(&mut self) -> impl Iterator<Item = &mut ParamRef> {
        self.components
            .iter_mut()
            .flat_map(|c| c.parameters_mut().iter_mut())
            .flat_map(|p| p.twins_mut().iter_mut())
    }

    /// Reference to a parameter by component index and parameter name
    pub fn param_ref(&self, component: usize, parameter: &str) -> Result<ParamRef> {
        self.components
            .get(component)
            .and_then(|c| c.parameter_index(parameter))
            .map(|p| ParamRef::new(component, p))
            .ok_or_else(|| {
                SpecFitError::ParameterNotFound(format!(
                    "{} in component {}",
                    parameter, component
                ))
            })
    }

    pub fn parameter(&self, at: ParamRef) -> Result<&Parameter> {
        self.components
            .get(at.component)
            .and_then(|c| c.parameters().get(at.parameter))
            .ok_or_else(|| SpecFitError::ParameterNotFound(format!("{:?}", at)))
    }

    pub fn parameter_mut(&mut self, at: ParamRef) -> Result<&mut Parameter> {
        self.components
            .get_mut(at.component)
            .and_then(|c| c.parameters_mut().get_mut(at.parameter))
            .ok_or_else(|| SpecFitError::ParameterNotFound(format!("{:?}", at)))
    }

    /// Make `follower` move with `parent`
    ///
    /// The follower is fixed, detached from any previous parent and set to the
    /// parent's current value.
    pub fn set_twin(&mut self, parent: ParamRef, follower: ParamRef) -> Result<()> {
        let parent_len = self.parameter(parent)?.n_elements();
        let follower_param = self.parameter(follower)?;
        if parent == follower {
            return Err(ParameterError::SelfTwin {
                name: follower_param.name().to_string(),
            }
            .into());
        }
        if follower_param.n_elements() != parent_len {
            return Err(ParameterError::ElementCountMismatch {
                name: follower_param.name().to_string(),
                expected: parent_len,
                found: follower_param.n_elements(),
            }
            .into());
        }

        self.clear_twin(follower);
        self.parameter_mut(follower)?.set_free(false);
        self.parameter_mut(parent)?.add_twin(follower);
        composition::propagate_twins(&mut self.components)
    }

    /// Detach `follower` from its parent, if any
    pub fn clear_twin(&mut self, follower: ParamRef) {
        for component in &mut self.components {
            for param in component.parameters_mut() {
                param.remove_twin(follower);
            }
        }
    }

    // ---- Instrument response ----

    /// Attach an instrument response; convolved components are convolved with it
    pub fn set_instrument_response(&mut self, response: InstrumentResponse) -> Result<()> {
        response.validate(self.dataset.n_positions())?;
        self.convolution_axis = Some(convolution::convolution_axis(
            self.dataset.axis(),
            response.len(),
            response.zero_index(),
        ));
        self.response = Some(response);
        Ok(())
    }

    pub fn clear_instrument_response(&mut self) {
        self.response = None;
        self.convolution_axis = None;
    }

    pub fn instrument_response(&self) -> Option<&InstrumentResponse> {
        self.response.as_ref()
    }

    /// Extended axis of the convolution branch, present with a response
    pub fn convolution_axis(&self) -> Option<&DataAxis> {
        self.convolution_axis.as_ref()
    }

    // ---- Channel selection ----

    pub fn channel_switches(&self) -> &[bool] {
        &self.channel_switches
    }

    fn pixel_range(&self, i1: Option<usize>, i2: Option<usize>) -> std::ops::Range<usize> {
        let n = self.channel_switches.len();
        let end = i2.unwrap_or(n).min(n);
        let start = i1.unwrap_or(0).min(end);
        start..end
    }

    fn unit_range(&self, x1: Option<f64>, x2: Option<f64>) -> (Option<usize>, Option<usize>) {
        let axis = self.dataset.axis();
        (x1.map(|x| axis.value2index(x)), x2.map(|x| axis.value2index(x)))
    }

    /// Select only the channels in `[i1, i2)`; `None` leaves that side open
    pub fn set_data_range_in_pixels(&mut self, i1: Option<usize>, i2: Option<usize>) {
        let range = self.pixel_range(i1, i2);
        self.channel_switches.fill(false);
        self.channel_switches[range].fill(true);
    }

    /// Deselect the channels in `[i1, i2)`
    pub fn remove_data_range_in_pixels(&mut self, i1: Option<usize>, i2: Option<usize>) {
        let range = self.pixel_range(i1, i2);
        self.channel_switches[range].fill(false);
    }

    /// Select the channels in `[i1, i2)` in addition to the current selection
    pub fn add_data_range_in_pixels(&mut self, i1: Option<usize>, i2: Option<usize>) {
        let range = self.pixel_range(i1, i2);
        self.channel_switches[range].fill(true);
    }

    pub fn set_data_range_in_units(&mut self, x1: Option<f64>, x2: Option<f64>) {
        let (i1, i2) = self.unit_range(x1, x2);
        self.set_data_range_in_pixels(i1, i2);
    }

    pub fn remove_data_range_in_units(&mut self, x1: Option<f64>, x2: Option<f64>) {
        let (i1, i2) = self.unit_range(x1, x2);
        self.remove_data_range_in_pixels(i1, i2);
    }

    pub fn add_data_range_in_units(&mut self, x1: Option<f64>, x2: Option<f64>) {
        let (i1, i2) = self.unit_range(x1, x2);
        self.add_data_range_in_pixels(i1, i2);
    }

    /// Select every channel
    pub fn reset_data_range(&mut self) {
        self.channel_switches.fill(true);
    }

    /// Replace the channel selection
    pub fn set_channel_switches(&mut self, switches: Vec<bool>) -> Result<()> {
        if switches.len() != self.dataset.n_channels() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "{} channel switches for {} channels",
                switches.len(),
                self.dataset.n_channels()
            )));
        }
        self.channel_switches = switches;
        Ok(())
    }

    // ---- Evaluation ----

    fn context_with(&self, position: usize, switches: Vec<bool>) -> Result<EvaluationContext> {
        let convolution = match (&self.response, &self.convolution_axis) {
            (Some(response), Some(axis)) => Some(ConvolutionBranch {
                axis: axis.values(),
                kernel: response.kernel(position).to_owned(),
            }),
            _ => None,
        };
        EvaluationContext::new(&self.dataset.axis().values(), switches, convolution)
    }

    /// Evaluation context at a flat position with the current channel selection
    pub fn evaluation_context(&self, position: usize) -> Result<EvaluationContext> {
        self.context_with(position, self.channel_switches.clone())
    }

    /// Model at the current position over the selected channels
    pub fn evaluate(&self) -> Result<Array1<f64>> {
        self.evaluate_with(false, true)
    }

    /// Model at the current position over the selected channels
    ///
    /// # Arguments
    ///
    /// * `non_convolved` - Add convolved components directly, without the response
    /// * `only_active` - Skip inactive components
    pub fn evaluate_with(&self, non_convolved: bool, only_active: bool) -> Result<Array1<f64>> {
        let context = self.evaluation_context(self.cursor.position())?;
        Ok(composition::evaluate(
            &self.components,
            &context,
            non_convolved,
            only_active,
        ))
    }

    /// Model at the current position over the whole axis, NaN at deselected channels
    pub fn evaluate_full(&self) -> Result<Array1<f64>> {
        let context = self.context_with(self.cursor.position(), vec![true; self.dataset.n_channels()])?;
        let mut full = composition::evaluate(&self.components, &context, false, true);
        for (value, &on) in full.iter_mut().zip(&self.channel_switches) {
            if !on {
                *value = f64::NAN;
            }
        }
        Ok(full)
    }

    /// Evaluate the model at every position into an array shaped like the dataset
    ///
    /// Each position is charged from the maps first. With `out_of_range_to_nan`
    /// the deselected channels are NaN. The cursor is restored afterwards.
    pub fn generate_model_cube(&mut self, out_of_range_to_nan: bool) -> Result<ArrayD<f64>> {
        let original = self.cursor.position();
        let n_channels = self.dataset.n_channels();
        let mut cube = Array2::zeros((self.dataset.n_positions(), n_channels));

        for position in self.cursor.positions() {
            self.cursor.set_position(position)?;
            self.charge_quiet(false)?;

            let row = if out_of_range_to_nan {
                self.evaluate_full()?
            } else {
                let context = self.context_with(position, vec![true; n_channels])?;
                composition::evaluate(&self.components, &context, false, true)
            };
            cube.row_mut(position).assign(&row);
        }

        self.cursor.set_position(original)?;
        self.charge(false)?;
        self.dataset.unflatten(cube)
    }

    // ---- Free parameters ----

    /// Current free values of the active components, in fit order
    pub fn free_parameter_vector(&self) -> Vec<f64> {
        composition::free_parameter_vector(&self.components)
    }

    /// Labels of [`Model::free_parameter_vector`]
    pub fn free_parameter_names(&self) -> Vec<String> {
        composition::free_parameter_names(&self.components)
    }

    /// Write a free-parameter vector into the components (twins follow)
    pub fn set_free_parameter_vector(&mut self, values: &[f64]) -> Result<()> {
        composition::assign_free_vector(&mut self.components, values, None)
    }

    // ---- Position binding ----

    /// Move the cursor and charge the live values from the maps there
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        self.cursor.set_position(position)?;
        self.charge(false)
    }

    /// Move the cursor by indices and charge the live values from the maps there
    pub fn set_indices(&mut self, indices: &[usize]) -> Result<()> {
        self.cursor.set_indices(indices)?;
        self.charge(false)
    }

    /// Copy the maps at the current position into the live values
    ///
    /// With `only_fixed`, free parameters keep their current values, so the
    /// previous position's result seeds the next fit.
    pub fn charge(&mut self, only_fixed: bool) -> Result<()> {
        self.charge_quiet(only_fixed)?;
        self.notify(&ModelEvent::Charged {
            position: self.cursor.position(),
        });
        Ok(())
    }

    pub(crate) fn charge_quiet(&mut self, only_fixed: bool) -> Result<()> {
        let position = self.cursor.position();
        for component in &mut self.components {
            component.charge_from(position, only_fixed)?;
        }
        composition::propagate_twins(&mut self.components)
    }

    /// Copy the live values (and std) into the maps at the current position
    pub fn store(&mut self) -> Result<()> {
        self.store_quiet()?;
        self.notify(&ModelEvent::Stored {
            position: self.cursor.position(),
        });
        Ok(())
    }

    pub(crate) fn store_quiet(&mut self) -> Result<()> {
        let position = self.cursor.position();
        for component in &mut self.components {
            component.store_at(position)?;
        }
        Ok(())
    }

    pub(crate) fn cursor_mut(&mut self) -> &mut NavigationCursor {
        &mut self.cursor
    }

    /// Broadcast live values into the maps
    ///
    /// # Arguments
    ///
    /// * `components` - Component indices, or every active component
    /// * `mask` - Positions to skip (`true`), shaped like the navigation shape
    pub fn set_current_values_to(
        &mut self,
        components: Option<&[usize]>,
        mask: Option<&ArrayD<bool>>,
    ) -> Result<()> {
        let mask = mask
            .map(|m| flatten_mask(m, self.cursor.shape()))
            .transpose()?;

        let indices: Vec<usize> = match components {
            Some(indices) => indices.to_vec(),
            None => (0..self.components.len())
                .filter(|&i| self.components[i].is_active())
                .collect(),
        };

        for index in indices {
            let component = self.components.get_mut(index).ok_or_else(|| {
                SpecFitError::ParameterNotFound(format!("component {}", index))
            })?;
            for param in component.parameters_mut() {
                param.set_current_value_to(mask.as_deref())?;
            }
        }
        Ok(())
    }

    // ---- Fitting ----

    pub(crate) fn fit_inputs(&self, position: usize, weighted: bool) -> Result<FitInputs> {
        let context = self.evaluation_context(position)?;
        let data = composition::select(self.dataset.spectrum(position), &self.channel_switches);

        let weights = if weighted {
            let variance = self.dataset.variance(position).ok_or_else(|| {
                SpecFitError::Configuration(
                    "weighted fit requested but the dataset has no variance".to_string(),
                )
            })?;
            Some(composition::select(
                fit::variance_weights(variance).view(),
                &self.channel_switches,
            ))
        } else {
            None
        };

        Ok(FitInputs {
            context,
            data,
            weights,
        })
    }

    /// Fit the model to the spectrum at the current position
    ///
    /// The fitted values stay in the live parameters; call [`Model::store`] to
    /// record them in the maps.
    pub fn fit(&mut self, options: &FitOptions) -> Result<FitOutcome> {
        let plan = FitPlan::new(options, &self.components);
        self.fit_with_plan(options, &plan)
    }

    pub(crate) fn fit_with_plan(&mut self, options: &FitOptions, plan: &FitPlan) -> Result<FitOutcome> {
        let inputs = self.fit_inputs(self.cursor.position(), options.weighted)?;
        fit::fit_components(
            &mut self.components,
            &inputs.context,
            inputs.data,
            inputs.weights,
            options,
            plan,
        )
    }

    // ---- Observers ----

    /// Register a callback notified once per charge or store
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&ModelEvent) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub(crate) fn notify(&self, event: &ModelEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    /// Report of the current parameter values
    pub fn current_values(&self, only_free: bool) -> CurrentValues<'_> {
        CurrentValues {
            model: self,
            only_free,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("dataset", &self.dataset)
            .field("components", &self.components)
            .field("cursor", &self.cursor)
            .field("channel_switches", &self.channel_switches)
            .field("response", &self.response)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.current_values(true).fmt(f)
    }
}

/// Table of parameter values of the active components
pub struct CurrentValues<'a> {
    model: &'a Model,
    only_free: bool,
}

impl fmt::Display for CurrentValues<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Components\tParameter\tValue")?;
        for component in self.model.components.iter().filter(|c| c.is_active()) {
            writeln!(f, "{}", component.name())?;
            for param in component.parameters() {
                if self.only_free && !param.is_free() {
                    continue;
                }
                let values: Vec<String> = param.values().iter().map(|v| format!("{:.6}", v)).collect();
                writeln!(f, "\t\t{}\t{}", param.name(), values.join(", "))?;
            }
        }
        Ok(())
    }
}
