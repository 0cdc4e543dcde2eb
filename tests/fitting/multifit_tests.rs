use approx::assert_relative_eq;
use ndarray::{Array, IxDyn};
use specfit_rs::components::{self, Gaussian};
use specfit_rs::{
    CancellationToken, FitOptions, LmConfig, MultifitEvent, MultifitOptions, SpecFitError,
};
use std::sync::{Arc, Mutex};

use crate::test_helpers::line_model;

const LINES: [(f64, f64); 3] = [(2.0, 1.0), (-1.0, 4.0), (0.5, -3.0)];

fn slope_offset_at(model: &mut specfit_rs::Model, position: usize) -> (f64, f64) {
    model.set_position(position).unwrap();
    let values = model.free_parameter_vector();
    (values[1], values[0])
}

#[test]
fn test_masked_position_is_left_untouched() {
    let mut model = line_model(&[3, 1], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let mut mask = Array::from_elem(IxDyn(&[3, 1]), false);
    mask[IxDyn(&[1, 0])] = true;
    let report = model
        .multifit(&MultifitOptions::new().with_mask(mask))
        .unwrap();

    assert_eq!(report.fitted, 2);
    assert_eq!(report.skipped, 1);
    assert!(report.is_complete());

    let slope_map = model.components()[1].parameters()[0].map().unwrap();
    assert_eq!(slope_map.is_set().to_vec(), vec![true, false, true]);
    assert_eq!(slope_map.values()[[1, 0]], 0.0);

    for position in [0, 2] {
        let (slope, offset) = slope_offset_at(&mut model, position);
        assert_relative_eq!(slope, LINES[position].0, epsilon = 1e-6);
        assert_relative_eq!(offset, LINES[position].1, epsilon = 1e-6);
    }
}

#[test]
fn test_mask_shape_checked_before_fitting() {
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let mask = Array::from_elem(IxDyn(&[2]), false);
    let result = model.multifit(&MultifitOptions::new().with_mask(mask));
    assert!(matches!(result, Err(SpecFitError::Configuration(_))));

    let slope_map = model.components()[1].parameters()[0].map().unwrap();
    assert!(slope_map.is_set().iter().all(|&s| !s));
}

#[test]
fn test_weighted_multifit_needs_variance() {
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let options =
        MultifitOptions::new().with_fit_options(FitOptions::new().with_weighted(true));
    assert!(matches!(
        model.multifit(&options),
        Err(SpecFitError::Configuration(_))
    ));
}

#[test]
fn test_checkpoint_removed_after_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let checkpoints = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&checkpoints);
    let options = MultifitOptions::new()
        .with_autosave(1, Some(dir.path().to_path_buf()))
        .with_progress(move |event| {
            if let MultifitEvent::Checkpoint { path } = event {
                assert!(path.exists());
                *counter.lock().unwrap() += 1;
            }
        });

    let report = model.multifit(&options).unwrap();
    assert_eq!(report.fitted, 3);
    assert!(report.checkpoint.is_none());
    assert_eq!(*checkpoints.lock().unwrap(), 3);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_cancelled_pass_keeps_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let token = CancellationToken::new();
    let trigger = token.clone();
    let options = MultifitOptions::new()
        .with_autosave(1, Some(dir.path().to_path_buf()))
        .with_cancellation(token)
        .with_progress(move |event| {
            if let MultifitEvent::PositionFitted { .. } = event {
                trigger.cancel();
            }
        });

    let report = model.multifit(&options).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.fitted, 1);
    assert!(!report.is_complete());

    let checkpoint = report.checkpoint.unwrap();
    assert!(checkpoint.starts_with(dir.path()));
    assert!(checkpoint.exists());

    // the checkpoint restores the first fitted position
    let mut restored = line_model(&[3], &LINES, 12);
    restored.extend(components::line(0.0, 0.0));
    restored.load_parameters(&checkpoint).unwrap();
    let (slope, offset) = slope_offset_at(&mut restored, 0);
    assert_relative_eq!(slope, 2.0, epsilon = 1e-6);
    assert_relative_eq!(offset, 1.0, epsilon = 1e-6);
    assert!(!restored.components()[1].parameters()[0].map().unwrap().is_set()[1]);
}

#[test]
fn test_checkpoint_holds_last_completed_interval() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<(f64, f64)> = (0..5).map(|i| (1.0 + i as f64, -(i as f64))).collect();
    let mut model = line_model(&[5], &lines, 12);
    model.extend(components::line(0.0, 0.0));

    let token = CancellationToken::new();
    let trigger = token.clone();
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    let options = MultifitOptions::new()
        .with_autosave(2, Some(dir.path().to_path_buf()))
        .with_cancellation(token)
        .with_progress(move |event| {
            if let MultifitEvent::PositionFitted { .. } = event {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n == 3 {
                    trigger.cancel();
                }
            }
        });

    let report = model.multifit(&options).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.fitted, 3);

    // written after the second position, not after the third
    let mut restored = line_model(&[5], &lines, 12);
    restored.extend(components::line(0.0, 0.0));
    restored.load_parameters(report.checkpoint.as_ref().unwrap()).unwrap();
    let map = restored.components()[1].parameters()[0].map().unwrap();
    assert_eq!(map.is_set().to_vec(), vec![true, true, false, false, false]);
    assert_relative_eq!(map.values()[[1, 0]], 2.0, epsilon = 1e-6);

    let live = model.components()[1].parameters()[0].map().unwrap();
    assert_eq!(live.is_set().to_vec(), vec![true, true, true, false, false]);
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_pass_stops_between_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<(f64, f64)> = (0..6).map(|i| (0.5 * i as f64, 2.0)).collect();
    let mut model = line_model(&[6], &lines, 12);
    model.extend(components::line(0.0, 0.0));

    let token = CancellationToken::new();
    let trigger = token.clone();
    let options = MultifitOptions::new()
        .with_parallel(true)
        .with_autosave(2, Some(dir.path().to_path_buf()))
        .with_cancellation(token)
        .with_progress(move |event| {
            if let MultifitEvent::PositionFitted { .. } = event {
                trigger.cancel();
            }
        });

    let report = model.multifit(&options).unwrap();
    assert!(report.cancelled);
    // the first chunk is written back in full
    assert_eq!(report.fitted, 2);

    let map = model.components()[1].parameters()[0].map().unwrap();
    assert_eq!(map.is_set().to_vec(), vec![true, true, false, false, false, false]);

    let mut restored = line_model(&[6], &lines, 12);
    restored.extend(components::line(0.0, 0.0));
    restored.load_parameters(report.checkpoint.as_ref().unwrap()).unwrap();
    let (slope, offset) = slope_offset_at(&mut restored, 1);
    assert_relative_eq!(slope, 0.5, epsilon = 1e-6);
    assert_relative_eq!(offset, 2.0, epsilon = 1e-6);
}

#[cfg(feature = "parallel")]
#[test]
fn test_parallel_pass_cancelled_up_front() {
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let token = CancellationToken::new();
    token.cancel();
    let report = model
        .multifit(&MultifitOptions::new().with_parallel(true).with_cancellation(token))
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.processed(), 0);
    assert!(report.checkpoint.is_none());
    let map = model.components()[0].parameters()[0].map().unwrap();
    assert!(map.is_set().iter().all(|&s| !s));
}

#[test]
fn test_abort_on_failure_reports_progress() {
    let mut model = line_model(&[3], &LINES, 12);
    model.push(Box::new(Gaussian::new(1.0, 0.0, 1.0)));

    let solver = LmConfig {
        max_iterations: 1,
        ..LmConfig::default()
    };
    let options = MultifitOptions::new()
        .with_fit_options(FitOptions::new().with_solver(solver))
        .with_abort_on_failure(true);

    match model.multifit(&options) {
        Err(SpecFitError::ConvergenceFailure {
            position,
            fitted,
            failed,
            skipped,
            ..
        }) => {
            assert_eq!(position, vec![0]);
            assert_eq!((fitted, failed, skipped), (0, 1, 0));
        }
        other => panic!("expected a convergence failure, got {:?}", other),
    }
}

#[test]
fn test_failures_are_reported_without_abort() {
    let mut model = line_model(&[3], &LINES, 12);
    model.push(Box::new(Gaussian::new(1.0, 0.0, 1.0)));

    let solver = LmConfig {
        max_iterations: 1,
        ..LmConfig::default()
    };
    let report = model
        .multifit(&MultifitOptions::new().with_fit_options(FitOptions::new().with_solver(solver)))
        .unwrap();

    assert_eq!(report.failed.len(), 3);
    assert_eq!(report.failed[2].indices, vec![2]);
    // failed fits are still stored
    let map = model.components()[0].parameters()[0].map().unwrap();
    assert!(map.is_set().iter().all(|&s| s));
}

#[test]
fn test_parallel_pass_matches_sequential() {
    let lines: Vec<(f64, f64)> = (0..12).map(|i| (0.25 * i as f64, 10.0 - i as f64)).collect();

    let mut sequential = line_model(&[3, 4], &lines, 16);
    sequential.extend(components::line(0.0, 0.0));
    let mut parallel = line_model(&[3, 4], &lines, 16);
    parallel.extend(components::line(0.0, 0.0));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let options = MultifitOptions::new()
        .with_parallel(true)
        .with_autosave(5, None)
        .with_progress(move |event| {
            if let MultifitEvent::PositionFitted { position, .. } = event {
                sink.lock().unwrap().push(*position);
            }
        });

    sequential.multifit(&MultifitOptions::new()).unwrap();
    let report = parallel.multifit(&options).unwrap();
    assert_eq!(report.fitted, 12);
    assert_eq!(*events.lock().unwrap(), (0..12).collect::<Vec<_>>());

    for (a, b) in sequential.components().iter().zip(parallel.components()) {
        let a = a.parameters()[0].map().unwrap().values();
        let b = b.parameters()[0].map().unwrap().values();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-8);
        }
    }
}

#[test]
fn test_seeded_pass_starts_from_previous_result() {
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));

    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let options = MultifitOptions::new()
        .with_charge_only_fixed(true)
        .with_parallel(true)
        .with_progress(move |event| {
            if let MultifitEvent::PositionFitted { position, .. } = event {
                sink.lock().unwrap().push(*position);
            }
        });

    let report = model.multifit(&options).unwrap();
    assert_eq!(report.fitted, 3);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);

    let (slope, offset) = slope_offset_at(&mut model, 2);
    assert_relative_eq!(slope, 0.5, epsilon = 1e-6);
    assert_relative_eq!(offset, -3.0, epsilon = 1e-6);
}

#[test]
fn test_cursor_restored_after_pass() {
    let mut model = line_model(&[3], &LINES, 12);
    model.extend(components::line(0.0, 0.0));
    model.set_position(1).unwrap();

    model.multifit(&MultifitOptions::new()).unwrap();
    assert_eq!(model.cursor().position(), 1);

    // live values were charged at the restored position
    let values = model.free_parameter_vector();
    assert_relative_eq!(values[1], -1.0, epsilon = 1e-6);
    assert_relative_eq!(values[0], 4.0, epsilon = 1e-6);
}
