use ndarray::{Array, IxDyn};
use specfit_rs::components::{Gaussian, Polynomial};
use specfit_rs::{Dataset, Model, ModelEvent};
use std::sync::{Arc, Mutex};

use crate::test_helpers::unit_axis;

fn grid_model() -> Model {
    // 2 x 3 navigation grid of 8-channel spectra
    let data = Array::zeros(IxDyn(&[2, 3, 8]));
    let mut model = Model::new(Dataset::new(data, unit_axis(8)).unwrap());
    model.push(Box::new(Gaussian::new(10.0, 4.0, 1.0)));
    model.push(Box::new(Polynomial::with_coefficients(vec![0.5, -1.0])));
    model
}

#[test]
fn test_store_mutate_charge_restores_exactly() {
    let mut model = grid_model();
    model.set_indices(&[1, 2]).unwrap();
    assert_eq!(model.cursor().position(), 5);

    model.set_free_parameter_vector(&[0.1 + 0.2, 1.0 / 3.0, 2.0_f64.sqrt(), -7.25, 1e-300])
        .unwrap();
    let stored = model.free_parameter_vector();
    model.store().unwrap();

    model
        .set_free_parameter_vector(&[0.0, 0.0, 1.0, 0.0, 0.0])
        .unwrap();
    model.charge(false).unwrap();
    assert_eq!(model.free_parameter_vector(), stored);
}

#[test]
fn test_charge_only_fixed_keeps_free_values() {
    let mut model = grid_model();
    model.components_mut()[0].parameters_mut()[2].set_free(false);

    model.set_position(3).unwrap();
    model.components_mut()[0].parameters_mut()[2].set_value(2.5);
    model.components_mut()[0].parameters_mut()[1].set_value(6.0);
    model.store().unwrap();

    model.components_mut()[0].parameters_mut()[2].set_value(9.0);
    model.components_mut()[0].parameters_mut()[1].set_value(-1.0);
    model.charge(true).unwrap();

    let gaussian = &model.components()[0];
    assert_eq!(gaussian.parameters()[2].value(), 2.5);
    assert_eq!(gaussian.parameters()[1].value(), -1.0);
}

#[test]
fn test_unset_positions_keep_live_values() {
    let mut model = grid_model();
    model.components_mut()[0].parameters_mut()[1].set_value(5.5);
    model.set_position(4).unwrap();
    assert_eq!(model.components()[0].parameters()[1].value(), 5.5);
}

#[test]
fn test_set_current_values_to_selected_components() {
    let mut model = grid_model();
    model.components_mut()[1]
        .parameters_mut()[0]
        .set_values(&[3.0, 4.0])
        .unwrap();

    let mut mask = Array::from_elem(IxDyn(&[2, 3]), false);
    mask[IxDyn(&[0, 1])] = true;
    model.set_current_values_to(Some(&[1]), Some(&mask)).unwrap();

    let coefficients = model.components()[1].parameters()[0].map().unwrap();
    assert_eq!(coefficients.values().row(5).to_vec(), vec![3.0, 4.0]);
    assert!(!coefficients.is_set()[1]);
    assert_eq!(coefficients.is_set().iter().filter(|&&s| s).count(), 5);

    // the other component was not touched
    let centre = model.components()[0].parameters()[1].map().unwrap();
    assert!(centre.is_set().iter().all(|&s| !s));
}

#[test]
fn test_model_cube_has_dataset_shape() {
    let mut model = grid_model();
    model.components_mut()[0].set_active(false);
    model.set_current_values_to(None, None).unwrap();

    model.set_position(2).unwrap();
    model.components_mut()[1]
        .parameters_mut()[0]
        .set_values(&[0.0, 9.0])
        .unwrap();
    model.store().unwrap();
    model.set_position(0).unwrap();

    let cube = model.generate_model_cube(false).unwrap();
    assert_eq!(cube.shape(), &[2, 3, 8]);
    // 0.5 * x - 1 everywhere except position (0, 2)
    assert_eq!(cube[IxDyn(&[1, 1, 4])], 1.0);
    assert_eq!(cube[IxDyn(&[0, 2, 4])], 9.0);
    assert_eq!(model.cursor().position(), 0);
}

#[test]
fn test_observers_see_charge_and_store() {
    let mut model = grid_model();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    model.add_observer(move |event| sink.lock().unwrap().push(*event));

    model.set_position(1).unwrap();
    model.store().unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            ModelEvent::Charged { position: 1 },
            ModelEvent::Stored { position: 1 }
        ]
    );
}

#[test]
fn test_maps_follow_navigation_shape() {
    let model = grid_model();
    for component in model.components() {
        for param in component.parameters() {
            let map = param.map().unwrap();
            assert_eq!(map.n_positions(), 6);
            assert_eq!(map.n_elements(), param.n_elements());
        }
    }
}
