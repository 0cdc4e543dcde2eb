use specfit_rs::archive::ParameterArchive;
use specfit_rs::components::{self, Gaussian};
use specfit_rs::{ModelEvent, MultifitOptions, SpecFitError};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use crate::test_helpers::line_model;

const LINES: [(f64, f64); 4] = [(1.0, 0.5), (2.0, -1.0), (3.0, 0.0), (-0.5, 7.0)];

#[test]
fn test_multifit_results_survive_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("maps.json");

    let mut fitted = line_model(&[2, 2], &LINES, 10);
    fitted.extend(components::line(0.0, 0.0));
    fitted.multifit(&MultifitOptions::new()).unwrap();
    fitted.save_parameters(&path, true).unwrap();

    let mut restored = line_model(&[2, 2], &LINES, 10);
    restored.extend(components::line(0.0, 0.0));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    restored.add_observer(move |event| sink.lock().unwrap().push(*event));
    restored.load_parameters(&path).unwrap();
    assert_eq!(*events.lock().unwrap(), vec![ModelEvent::ParametersLoaded]);

    for (a, b) in fitted.components().iter().zip(restored.components()) {
        let a = a.parameters()[0].map().unwrap();
        let b = b.parameters()[0].map().unwrap();
        assert_eq!(a.values(), b.values());
        assert_eq!(a.is_set(), b.is_set());
        for (x, y) in a.std().iter().zip(b.std().iter()) {
            assert!(x == y || (x.is_nan() && y.is_nan()));
        }
    }

    // live values were charged at the current position
    restored.set_position(3).unwrap();
    fitted.set_position(3).unwrap();
    assert_eq!(
        restored.free_parameter_vector(),
        fitted.free_parameter_vector()
    );
}

#[test]
fn test_archive_without_std_clears_std_maps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("values_only.json");

    let mut model = line_model(&[4], &LINES, 10);
    model.extend(components::line(0.0, 0.0));
    model.multifit(&MultifitOptions::new()).unwrap();
    model.save_parameters(&path, false).unwrap();

    let archive = ParameterArchive::load(&path).unwrap();
    assert_eq!(archive.len(), 2);
    assert!(archive.get("0_offset.offset").unwrap().std.is_none());

    model.load_parameters(&path).unwrap();
    let map = model.components()[1].parameters()[0].map().unwrap();
    assert!(map.std().iter().all(|s| s.is_nan()));
    assert!(map.is_set().iter().all(|&s| s));
}

#[test]
fn test_loading_into_a_different_model_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lines.json");

    let mut lines = line_model(&[4], &LINES, 10);
    lines.extend(components::line(0.0, 0.0));
    lines.save_parameters(&path, false).unwrap();

    let mut peaks = line_model(&[4], &LINES, 10);
    peaks.push(Box::new(Gaussian::new(1.0, 2.0, 3.0)));
    assert!(matches!(
        peaks.load_parameters(&path),
        Err(SpecFitError::ParameterNotFound(_))
    ));

    let mut reshaped = line_model(&[2, 2], &LINES, 10);
    reshaped.extend(components::line(0.0, 0.0));
    assert!(matches!(
        reshaped.load_parameters(&path),
        Err(SpecFitError::Configuration(_))
    ));
}

#[test]
fn test_missing_archive_is_io_error() {
    let dir = tempdir().unwrap();
    let mut model = line_model(&[4], &LINES, 10);
    model.extend(components::line(0.0, 0.0));
    assert!(matches!(
        model.load_parameters(dir.path().join("absent.json")),
        Err(SpecFitError::IoError(_))
    ));
}

#[test]
fn test_failed_load_keeps_existing_maps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lines.json");

    let mut lines = line_model(&[4], &LINES, 10);
    lines.extend(components::line(0.0, 0.0));
    lines.multifit(&MultifitOptions::new()).unwrap();
    lines.save_parameters(&path, false).unwrap();

    // same leading components, one extra at the end
    let mut extended = line_model(&[4], &LINES, 10);
    extended.extend(components::line(0.0, 0.0));
    extended.push(Box::new(Gaussian::new(1.0, 2.0, 3.0)));
    assert!(matches!(
        extended.load_parameters(&path),
        Err(SpecFitError::ParameterNotFound(key)) if key == "2_gaussian.a"
    ));

    for component in &extended.components()[..2] {
        let map = component.parameters()[0].map().unwrap();
        assert!(map.is_set().iter().all(|&s| !s));
        assert!(map.values().iter().all(|&v| v == 0.0));
    }
}
