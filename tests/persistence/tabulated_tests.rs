use approx::assert_relative_eq;
use ndarray::Array2;
use specfit_rs::components;
use specfit_rs::{Dataset, FitOptions, Model, SpecFitError};
use std::fs;

use crate::test_helpers::unit_axis;

fn write_triangle(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("triangle.dat");
    fs::write(&path, "# edge shape\n2 0\n4 2\n6 0\n").unwrap();
    path
}

#[test]
fn test_missing_table_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        components::tabulated(dir.path().join("nope.dat")),
        Err(SpecFitError::Configuration(_))
    ));
}

#[test]
fn test_malformed_table_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.dat");
    fs::write(&path, "0 1\n1 one\n").unwrap();
    assert!(matches!(
        components::tabulated(&path),
        Err(SpecFitError::Configuration(_))
    ));

    fs::write(&path, "0 1\n0 2\n").unwrap();
    assert!(components::tabulated(&path).is_err());

    // "nan" parses as a float but is not a usable sample
    fs::write(&path, "nan 0\n1 1\n").unwrap();
    assert!(matches!(
        components::tabulated(&path),
        Err(SpecFitError::Configuration(_))
    ));
}

#[test]
fn test_table_interpolates_and_clamps_in_model() {
    let dir = tempfile::tempdir().unwrap();
    let table = components::tabulated(write_triangle(dir.path())).unwrap();

    let mut model = Model::new(Dataset::from_spectra(Array2::zeros((1, 9)), &[1], unit_axis(9)).unwrap());
    model.push(table);

    let values = model.evaluate().unwrap().to_vec();
    assert_eq!(values, vec![0.0, 0.0, 0.0, 1.0, 2.0, 1.0, 0.0, 0.0, 0.0]);

    // a fixed shift moves the shape along the axis
    model.components_mut()[0]
        .parameter_mut("shift")
        .unwrap()
        .set_value(1.5);
    let shifted = model.evaluate().unwrap();
    assert_relative_eq!(shifted[5], 1.5, epsilon = 1e-12);
    assert_relative_eq!(shifted[4], 0.5, epsilon = 1e-12);
}

#[test]
fn test_fit_table_intensity() {
    let dir = tempfile::tempdir().unwrap();
    let table = components::tabulated(write_triangle(dir.path())).unwrap();

    let axis = unit_axis(9);
    let mut data = Array2::zeros((1, 9));
    data.row_mut(0).assign(&ndarray::arr1(&[0.0, 0.0, 0.0, 3.5, 7.0, 3.5, 0.0, 0.0, 0.0]));
    let mut model = Model::new(Dataset::from_spectra(data, &[1], axis).unwrap());
    model.push(table);

    assert_eq!(model.free_parameter_names(), vec!["Tabulated.intensity"]);
    let outcome = model.fit(&FitOptions::new().with_gradient(true)).unwrap();
    assert!(outcome.success);
    assert_relative_eq!(model.free_parameter_vector()[0], 3.5, epsilon = 1e-8);
}
