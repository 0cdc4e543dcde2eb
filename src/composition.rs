//! Additive model composition over an ordered component list.
//!
//! These are free functions over `&[Box<dyn Component>]` so that a model and a
//! worker-local copy of its components share one implementation. The order of
//! the component slice, then of each component's parameters, defines the
//! layout of the flattened free-parameter vector everywhere in the crate.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::component::Component;
use crate::convolution::convolve_valid;
use crate::error::{Result, SpecFitError};
use crate::optimizer::ParameterInfo;
use crate::parameters::{Bounds, ParamRef};

/// Convolution branch of an evaluation: extended axis and the kernel to apply
#[derive(Debug, Clone)]
pub struct ConvolutionBranch {
    /// Coordinates of the extended convolution axis
    pub axis: Array1<f64>,
    /// Instrument response at the current position
    pub kernel: Array1<f64>,
}

/// Everything an evaluation needs besides the components themselves
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Coordinates of the selected channels
    pub selected_axis: Array1<f64>,
    /// Channel selection over the full axis
    pub channel_switches: Vec<bool>,
    /// Present when an instrument response is attached
    pub convolution: Option<ConvolutionBranch>,
}

impl EvaluationContext {
    /// Build a context from the full axis and a channel selection
    pub fn new(
        axis: &Array1<f64>,
        channel_switches: Vec<bool>,
        convolution: Option<ConvolutionBranch>,
    ) -> Result<Self> {
        if axis.len() != channel_switches.len() {
            return Err(SpecFitError::DimensionMismatch(format!(
                "axis has {} channels, channel switches {}",
                axis.len(),
                channel_switches.len()
            )));
        }
        if let Some(branch) = &convolution {
            let expected = axis.len() + branch.kernel.len().saturating_sub(1);
            if branch.axis.len() != expected {
                return Err(SpecFitError::DimensionMismatch(format!(
                    "convolution axis has {} points, expected {}",
                    branch.axis.len(),
                    expected
                )));
            }
        }

        Ok(Self {
            selected_axis: select(axis.view(), &channel_switches),
            channel_switches,
            convolution,
        })
    }

    /// Number of selected channels
    pub fn n_selected(&self) -> usize {
        self.selected_axis.len()
    }
}

/// Keep the entries whose switch is on
pub fn select(values: ArrayView1<'_, f64>, switches: &[bool]) -> Array1<f64> {
    values
        .iter()
        .zip(switches)
        .filter(|(_, &on)| on)
        .map(|(&v, _)| v)
        .collect()
}

/// Sum of the component outputs over the selected channels
///
/// # Arguments
///
/// * `components` - Ordered component list
/// * `context` - Axis, channel selection and optional convolution branch
/// * `non_convolved` - Ignore the convolution branch and add every component directly
/// * `only_active` - Skip inactive components
pub fn evaluate(
    components: &[Box<dyn Component>],
    context: &EvaluationContext,
    non_convolved: bool,
    only_active: bool,
) -> Array1<f64> {
    let included = components
        .iter()
        .filter(|c| !only_active || c.is_active());

    let branch = match &context.convolution {
        Some(branch) if !non_convolved => branch,
        _ => {
            let mut sum = Array1::zeros(context.n_selected());
            for component in included {
                sum += &component.function(&context.selected_axis);
            }
            return sum;
        }
    };

    let mut direct = Array1::zeros(context.n_selected());
    let mut convolved = Array1::zeros(branch.axis.len());
    let mut any_convolved = false;
    for component in included {
        if component.is_convolved() {
            convolved += &component.function(&branch.axis);
            any_convolved = true;
        } else {
            direct += &component.function(&context.selected_axis);
        }
    }

    if any_convolved {
        let full = convolve_valid(convolved.view(), branch.kernel.view());
        direct += &select(full.view(), &context.channel_switches);
    }
    direct
}

/// Current values of every free parameter of the active components
pub fn free_parameter_vector(components: &[Box<dyn Component>]) -> Vec<f64> {
    components
        .iter()
        .filter(|c| c.is_active())
        .flat_map(|c| c.free_values())
        .collect()
}

/// Length of [`free_parameter_vector`]
pub fn free_parameter_count(components: &[Box<dyn Component>]) -> usize {
    components
        .iter()
        .filter(|c| c.is_active())
        .map(|c| c.nfree_param())
        .sum()
}

/// Labels of the free slots, `component.parameter` or `component.parameter[i]`
pub fn free_parameter_names(components: &[Box<dyn Component>]) -> Vec<String> {
    let mut names = Vec::new();
    for component in components.iter().filter(|c| c.is_active()) {
        for param in component.parameters().iter().filter(|p| p.is_free()) {
            if param.n_elements() == 1 {
                names.push(format!("{}.{}", component.name(), param.name()));
            } else {
                for i in 0..param.n_elements() {
                    names.push(format!("{}.{}[{}]", component.name(), param.name(), i));
                }
            }
        }
    }
    names
}

/// Distribute a free-parameter vector back into the components
///
/// Twins of every parameter are then set to their parent's value (one step,
/// no transitive propagation).
pub fn assign_free_vector(
    components: &mut [Box<dyn Component>],
    values: &[f64],
    std: Option<&[f64]>,
) -> Result<()> {
    let expected = free_parameter_count(components);
    if values.len() != expected {
        return Err(SpecFitError::DimensionMismatch(format!(
            "expected {} free parameter values, got {}",
            expected,
            values.len()
        )));
    }

    let mut offset = 0;
    for component in components.iter_mut().filter(|c| c.is_active()) {
        let n = component.nfree_param();
        let slice_std = std.and_then(|s| s.get(offset..offset + n));
        component.charge(&values[offset..offset + n], slice_std, true)?;
        offset += n;
    }

    propagate_twins(components)
}

/// Copy each parameter's value to its twins
pub fn propagate_twins(components: &mut [Box<dyn Component>]) -> Result<()> {
    let updates: Vec<(ParamRef, Vec<f64>)> = components
        .iter()
        .flat_map(|c| c.parameters().iter())
        .flat_map(|p| {
            p.twins()
                .iter()
                .map(move |twin| (*twin, p.values().to_vec()))
        })
        .collect();

    for (twin, values) in updates {
        let param = components
            .get_mut(twin.component)
            .and_then(|c| c.parameters_mut().get_mut(twin.parameter))
            .ok_or_else(|| {
                SpecFitError::ParameterNotFound(format!(
                    "twin at component {}, parameter {}",
                    twin.component, twin.parameter
                ))
            })?;
        param.set_values(&values)?;
    }
    Ok(())
}

/// Derivative of the model with respect to one parameter over the selected channels
fn component_gradient(
    component: &mut Box<dyn Component>,
    parameter: usize,
    context: &EvaluationContext,
) -> Array2<f64> {
    match &context.convolution {
        Some(branch) if component.is_convolved() => {
            let raw = component.parameter_gradient(parameter, &branch.axis);
            let mut out = Array2::zeros((raw.nrows(), context.n_selected()));
            for (mut row, raw_row) in out.rows_mut().into_iter().zip(raw.rows()) {
                let full = convolve_valid(raw_row, branch.kernel.view());
                row.assign(&select(full.view(), &context.channel_switches));
            }
            out
        }
        _ => component.parameter_gradient(parameter, &context.selected_axis),
    }
}

/// Jacobian of the model with respect to the free-parameter vector
///
/// Rows follow the free-parameter layout, columns the selected channels. A
/// twinned parameter's row also carries the gradients of its (active) twins.
/// With `weights`, every column is scaled by the channel weight.
pub fn jacobian(
    components: &mut [Box<dyn Component>],
    context: &EvaluationContext,
    weights: Option<&Array1<f64>>,
) -> Array2<f64> {
    let n_free = free_parameter_count(components);
    let mut jac = Array2::zeros((n_free, context.n_selected()));

    let mut row = 0;
    for ci in 0..components.len() {
        if !components[ci].is_active() {
            continue;
        }
        for pi in 0..components[ci].parameters().len() {
            let param = &components[ci].parameters()[pi];
            if !param.is_free() {
                continue;
            }
            let n_elements = param.n_elements();
            let twins = param.twins().to_vec();

            let mut grad = component_gradient(&mut components[ci], pi, context);
            for twin in twins {
                let active = components
                    .get(twin.component)
                    .map_or(false, |c| c.is_active());
                if active {
                    grad += &component_gradient(&mut components[twin.component], twin.parameter, context);
                }
            }

            jac.slice_mut(ndarray::s![row..row + n_elements, ..])
                .assign(&grad);
            row += n_elements;
        }
    }

    if let Some(weights) = weights {
        for mut slot_row in jac.axis_iter_mut(Axis(0)) {
            slot_row *= weights;
        }
    }
    jac
}

/// One [`Bounds`] per free slot, in free-parameter order
pub fn bound_list(components: &[Box<dyn Component>]) -> Vec<Bounds> {
    components
        .iter()
        .filter(|c| c.is_active())
        .flat_map(|c| c.parameters().iter())
        .filter(|p| p.is_free())
        .flat_map(|p| std::iter::repeat(*p.bounds()).take(p.n_elements()))
        .collect()
}

/// One [`ParameterInfo`] per free slot, in free-parameter order
pub fn parameter_info(components: &[Box<dyn Component>]) -> Vec<ParameterInfo> {
    bound_list(components)
        .iter()
        .map(ParameterInfo::from_bounds)
        .collect()
}
