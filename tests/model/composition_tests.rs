use approx::assert_relative_eq;
use ndarray::{array, Array1, Array2};
use specfit_rs::composition::{self, EvaluationContext};
use specfit_rs::components::{Gaussian, Offset, Polynomial, PowerLaw, Slope};
use specfit_rs::{Component, Dataset, InstrumentResponse, Model};

use crate::test_helpers::{array_approx_eq, unit_axis};

fn empty_model(n_positions: usize, n_channels: usize) -> Model {
    let data = Array2::zeros((n_positions, n_channels));
    Model::new(Dataset::from_spectra(data, &[n_positions], unit_axis(n_channels)).unwrap())
}

#[test]
fn test_evaluate_length_equals_selected_channels() {
    let mut model = empty_model(1, 20);
    model.push(Box::new(Gaussian::new(3.0, 10.0, 2.0)));
    model.push(Box::new(Offset::new(1.0)));

    for (i1, i2) in [(None, None), (Some(4), Some(9)), (Some(15), None), (None, Some(1))] {
        model.set_data_range_in_pixels(i1, i2);
        let n_selected = model.channel_switches().iter().filter(|&&on| on).count();
        assert_eq!(model.evaluate().unwrap().len(), n_selected);
    }
}

#[test]
fn test_data_range_in_units_uses_axis() {
    let axis = specfit_rs::DataAxis::new(100.0, 0.5, 20);
    let dataset = Dataset::from_spectra(Array2::zeros((1, 20)), &[1], axis).unwrap();
    let mut model = Model::new(dataset);

    model.set_data_range_in_units(Some(101.0), Some(103.0));
    let selected: Vec<usize> = model
        .channel_switches()
        .iter()
        .enumerate()
        .filter(|(_, &on)| on)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(selected, vec![2, 3, 4, 5]);

    // values past the axis clamp to its ends
    model.set_data_range_in_units(Some(50.0), Some(1000.0));
    assert_eq!(model.channel_switches().iter().filter(|&&on| on).count(), 19);
}

#[test]
fn test_unit_impulse_response_leaves_model_unchanged() {
    let mut model = empty_model(2, 30);
    model.push(Box::new(Gaussian::new(5.0, 12.0, 1.5)));
    model.push(Box::new(PowerLaw::new(10.0, 1.5)));
    model.push(Box::new(Offset::new(0.5)));
    model.components_mut()[0].set_convolved(true);
    model.components_mut()[1].set_convolved(true);
    model.set_data_range_in_pixels(Some(3), Some(25));

    let plain = model.evaluate().unwrap();

    let mut impulse = Array1::zeros(7);
    impulse[3] = 1.0;
    model
        .set_instrument_response(InstrumentResponse::uniform(impulse, 3).unwrap())
        .unwrap();
    let convolved = model.evaluate().unwrap();

    assert!(array_approx_eq(&plain, &convolved, 1e-12));
    assert_eq!(
        model.evaluate_with(true, true).unwrap().len(),
        plain.len()
    );
}

#[test]
fn test_shifted_impulse_shifts_convolved_components() {
    let mut model = empty_model(1, 20);
    model.push(Box::new(Gaussian::new(5.0, 8.0, 1.0)));
    model.components_mut()[0].set_convolved(true);
    let reference = model.evaluate().unwrap();

    // zero loss at index 1, all weight one channel later
    model
        .set_instrument_response(InstrumentResponse::uniform(array![0.0, 0.0, 1.0], 1).unwrap())
        .unwrap();
    let shifted = model.evaluate().unwrap();

    for i in 1..20 {
        assert_relative_eq!(shifted[i], reference[i - 1], epsilon = 1e-12);
    }
}

#[test]
fn test_per_position_response() {
    let mut model = empty_model(2, 10);
    model.push(Box::new(Offset::new(1.0)));
    model.components_mut()[0].set_convolved(true);

    let kernels = array![[0.0, 1.0, 0.0], [0.0, 2.0, 0.0]];
    model
        .set_instrument_response(InstrumentResponse::per_position(kernels, 1).unwrap())
        .unwrap();

    assert!(model.evaluate().unwrap().iter().all(|&v| v == 1.0));
    model.set_position(1).unwrap();
    assert!(model.evaluate().unwrap().iter().all(|&v| v == 2.0));
}

#[test]
fn test_free_vector_tracks_active_components() {
    let mut model = empty_model(1, 5);
    model.push(Box::new(Offset::new(1.0)));
    model.push(Box::new(Polynomial::with_coefficients(vec![1.0, 2.0, 3.0])));
    model.push(Box::new(Gaussian::new(1.0, 2.0, 3.0)));

    let expected: usize = model
        .components()
        .iter()
        .filter(|c| c.is_active())
        .map(|c| c.nfree_param())
        .sum();
    assert_eq!(model.free_parameter_vector().len(), expected);
    assert_eq!(expected, 7);

    model.components_mut()[1].set_active(false);
    assert_eq!(model.free_parameter_vector().len(), 4);

    model.components_mut()[2].parameters_mut()[0].set_free(false);
    assert_eq!(model.free_parameter_vector(), vec![1.0, 2.0, 3.0]);
    assert_eq!(
        model.free_parameter_names(),
        vec!["Offset.offset", "Gaussian.centre", "Gaussian.sigma"]
    );
}

#[test]
fn test_twin_gradient_added_to_parent_row() {
    let mut model = empty_model(1, 6);
    model.push(Box::new(Gaussian::new(2.0, 2.0, 1.0)));
    model.push(Box::new(Gaussian::new(1.0, 3.5, 1.0)));
    let parent = model.param_ref(0, "sigma").unwrap();
    let follower = model.param_ref(1, "sigma").unwrap();
    model.set_twin(parent, follower).unwrap();

    let context = model.evaluation_context(0).unwrap();
    let x = context.selected_axis.clone();
    let jac = composition::jacobian(model.components_mut(), &context, None);
    // A, centre, sigma of the first peak; A, centre of the second
    assert_eq!(jac.nrows(), 5);

    let mut first = model.components()[0].clone();
    let mut second = model.components()[1].clone();
    let own = first.parameter_gradient(2, &x);
    let twin = second.parameter_gradient(2, &x);
    for i in 0..x.len() {
        assert_relative_eq!(jac[[2, i]], own[[0, i]] + twin[[0, i]], epsilon = 1e-12);
    }
}

#[test]
fn test_twin_follows_parent_value() {
    let mut model = empty_model(1, 6);
    model.extend(vec![
        Box::new(Slope::new(1.0)) as Box<dyn Component>,
        Box::new(Slope::new(0.0)),
    ]);
    model
        .set_twin(model.param_ref(0, "slope").unwrap(), model.param_ref(1, "slope").unwrap())
        .unwrap();

    model.set_free_parameter_vector(&[4.0]).unwrap();
    assert_eq!(model.components()[1].parameters()[0].value(), 4.0);
    assert_eq!(
        model.evaluate().unwrap().to_vec(),
        vec![0.0, 8.0, 16.0, 24.0, 32.0, 40.0]
    );
}

#[test]
fn test_context_rejects_mismatched_switches() {
    let axis = array![0.0, 1.0, 2.0];
    assert!(EvaluationContext::new(&axis, vec![true; 2], None).is_err());
}
