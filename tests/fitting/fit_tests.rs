use approx::assert_relative_eq;
use ndarray::{Array1, Array2};
use specfit_rs::components::{self, Gaussian, Offset};
use specfit_rs::optimizer::{self, BoundsSpec, FitterKind};
use specfit_rs::parameters::Bounds;
use specfit_rs::{Dataset, FitOptions, FitWarning, LmConfig, Model};

use crate::test_helpers::{add_noise, line_model, unit_axis};

#[test]
fn test_line_fit_recovers_slope_and_offset() {
    let mut model = line_model(&[1], &[(3.0, 5.0)], 10);
    model.extend(components::line(0.0, 0.0));

    for fitter in [FitterKind::Lm, FitterKind::LmProjected, FitterKind::LmParameterInfo] {
        model.set_free_parameter_vector(&[0.0, 0.0]).unwrap();
        let outcome = model
            .fit(&FitOptions::new().with_fitter(fitter).with_gradient(true))
            .unwrap();

        assert!(outcome.success, "{}: {}", fitter, outcome.message);
        let fitted = model.free_parameter_vector();
        assert_relative_eq!(fitted[0], 5.0, epsilon = 1e-6);
        assert_relative_eq!(fitted[1], 3.0, epsilon = 1e-6);
    }
}

#[test]
fn test_fit_only_uses_selected_channels() {
    // the last two channels are corrupted and deselected
    let mut model = {
        let axis = unit_axis(10);
        let mut data = crate::test_helpers::line_spectra(&axis, &[(2.0, 1.0)]);
        data[[0, 8]] = 100.0;
        data[[0, 9]] = -100.0;
        Model::new(Dataset::from_spectra(data, &[1], axis).unwrap())
    };
    model.extend(components::line(0.0, 0.0));
    model.set_data_range_in_pixels(None, Some(8));

    model.fit(&FitOptions::default()).unwrap();
    let fitted = model.free_parameter_vector();
    assert_relative_eq!(fitted[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(fitted[1], 2.0, epsilon = 1e-6);
}

#[test]
fn test_bounding_without_support_warns_and_fits_unbounded() {
    let mut model = line_model(&[1], &[(0.0, 4.0)], 10);
    model.push(Box::new(Offset::new(0.0)));
    model.components_mut()[0].parameters_mut()[0].set_bounds(Bounds::max_only(2.0));

    let outcome = model
        .fit(&FitOptions::new().with_fitter(FitterKind::Lm).with_bounded(true))
        .unwrap();

    assert_eq!(
        outcome.warnings,
        vec![FitWarning::BoundingUnsupported {
            fitter: FitterKind::Lm
        }]
    );
    assert_relative_eq!(model.free_parameter_vector()[0], 4.0, epsilon = 1e-6);
}

#[test]
fn test_bounded_fitters_stop_at_the_bound() {
    for fitter in [FitterKind::LmProjected, FitterKind::LmParameterInfo] {
        let mut model = line_model(&[1], &[(3.0, 5.0)], 10);
        model.extend(components::line(0.0, 0.0));
        model.components_mut()[1].parameters_mut()[0].set_bounds(Bounds::max_only(2.0));

        let outcome = model
            .fit(&FitOptions::new().with_fitter(fitter).with_bounded(true))
            .unwrap();
        assert!(outcome.warnings.is_empty());

        let slope = model.free_parameter_vector()[1];
        assert!(slope <= 2.0 + 1e-12, "{} gave slope {}", fitter, slope);
        assert_relative_eq!(slope, 2.0, epsilon = 1e-2);
    }
}

#[test]
fn test_noisy_gaussian_fit_with_std() {
    let axis = specfit_rs::DataAxis::new(-10.0, 0.25, 81);
    let truth = Gaussian::new(50.0, 1.2, 1.8);
    let mut data = Array2::zeros((1, axis.size));
    data.row_mut(0)
        .assign(&specfit_rs::Component::function(&truth, &axis.values()));
    add_noise(&mut data, 0.05, 7);

    let mut model = Model::new(Dataset::from_spectra(data, &[1], axis).unwrap());
    model.push(Box::new(Gaussian::new(30.0, 0.0, 1.0)));

    for use_gradient in [true, false] {
        model.set_free_parameter_vector(&[30.0, 0.0, 1.0]).unwrap();
        let outcome = model
            .fit(&FitOptions::new().with_gradient(use_gradient))
            .unwrap();
        assert!(outcome.success, "{}", outcome);

        let fitted = model.free_parameter_vector();
        assert_relative_eq!(fitted[0], 50.0, epsilon = 0.5);
        assert_relative_eq!(fitted[1], 1.2, epsilon = 0.02);
        assert_relative_eq!(fitted[2], 1.8, epsilon = 0.02);

        let std = outcome.std.unwrap();
        assert!(std.iter().all(|s| s.is_finite() && *s > 0.0 && *s < 1.0));
    }
}

#[test]
fn test_weighted_fit_ignores_zero_weight_channels() {
    let axis = unit_axis(10);
    let mut data = crate::test_helpers::line_spectra(&axis, &[(0.0, 2.0)]);
    data[[0, 3]] = 50.0;
    let mut variance = Array2::from_elem((1, 10), 1.0);
    variance[[0, 3]] = 0.0;

    let dataset = Dataset::from_spectra(data, &[1], axis)
        .unwrap()
        .with_variance(variance)
        .unwrap();
    let mut model = Model::new(dataset);
    model.push(Box::new(Offset::new(0.0)));

    model.fit(&FitOptions::new().with_weighted(true)).unwrap();
    assert_relative_eq!(model.free_parameter_vector()[0], 2.0, epsilon = 1e-8);

    model.fit(&FitOptions::new()).unwrap();
    assert_relative_eq!(model.free_parameter_vector()[0], 6.8, epsilon = 1e-8);
}

#[test]
fn test_max_iterations_reports_failure() {
    let mut model = line_model(&[1], &[(3.0, 5.0)], 10);
    model.push(Box::new(Gaussian::new(1.0, 0.0, 1.0)));

    let solver = LmConfig {
        max_iterations: 1,
        ..LmConfig::default()
    };
    let outcome = model.fit(&FitOptions::new().with_solver(solver)).unwrap();
    assert!(!outcome.success);
    assert!(outcome.message.contains("Maximum iterations"));
}

#[test]
fn test_optimizer_rejects_mismatched_bounds_layout() {
    struct Quadratic;
    impl specfit_rs::Problem for Quadratic {
        fn eval(&self, params: &Array1<f64>) -> specfit_rs::Result<Array1<f64>> {
            Ok(params.mapv(|p| p - 1.0))
        }
        fn parameter_count(&self) -> usize {
            1
        }
        fn residual_count(&self) -> usize {
            1
        }
    }

    let p0 = Array1::from_vec(vec![0.0]);
    let config = LmConfig::default();
    let list = BoundsSpec::List(vec![Bounds::unbounded()]);

    assert!(optimizer::optimize(FitterKind::LmParameterInfo, &Quadratic, p0.clone(), &list, &config).is_err());
    assert!(optimizer::optimize(
        FitterKind::LmProjected,
        &Quadratic,
        p0.clone(),
        &BoundsSpec::List(vec![]),
        &config
    )
    .is_err());

    let output = optimizer::optimize(FitterKind::LmProjected, &Quadratic, p0, &list, &config).unwrap();
    assert_relative_eq!(output.params[0], 1.0, epsilon = 1e-10);
    // no degrees of freedom left
    assert!(output.std.is_none());
}
