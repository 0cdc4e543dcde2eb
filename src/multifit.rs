//! Dataset-wide fitting.
//!
//! [`Model::multifit`] visits every navigation position that is not masked,
//! charges the live values from the maps, fits, and stores the result. Without
//! seeding the positions are independent and may be fitted by rayon workers;
//! seeded passes (`charge_only_fixed`) always run in position order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use ndarray::ArrayD;

use crate::archive::ParameterArchive;
use crate::error::{Result, SpecFitError};
use crate::fit::{FitOptions, FitOutcome, FitPlan, FitWarning};
use crate::model::Model;
use crate::navigation::flatten_mask;

/// Shared flag to stop a multifit pass between positions
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress of a multifit pass
#[derive(Debug, Clone, PartialEq)]
pub enum MultifitEvent {
    /// The pass starts; `total` positions will be fitted
    Started { total: usize },
    /// A position was fitted and stored
    PositionFitted { position: usize, success: bool },
    /// A masked position was skipped
    PositionSkipped { position: usize },
    /// Parameter maps were written to the checkpoint file
    Checkpoint { path: PathBuf },
}

pub type ProgressCallback = Arc<dyn Fn(&MultifitEvent) + Send + Sync>;

/// Options of a dataset-wide fit
#[derive(Clone)]
pub struct MultifitOptions {
    /// Options of every single-position fit
    pub fit: FitOptions,

    /// Positions to skip (`true`), shaped like the navigation shape
    pub mask: Option<ArrayD<bool>>,

    /// Charge only fixed parameters, seeding each fit with the previous result
    pub charge_only_fixed: bool,

    /// Write a checkpoint every `autosave_every` fitted positions. Default: false
    pub autosave: bool,

    /// Default: 10
    pub autosave_every: usize,

    /// Directory of the checkpoint file. Default: the system temp directory
    pub autosave_dir: Option<PathBuf>,

    /// Stop at the first position that fails to converge
    pub abort_on_failure: bool,

    /// Fit unseeded passes on rayon workers
    pub parallel: bool,

    pub cancel: Option<CancellationToken>,

    pub progress: Option<ProgressCallback>,
}

impl Default for MultifitOptions {
    fn default() -> Self {
        Self {
            fit: FitOptions::default(),
            mask: None,
            charge_only_fixed: false,
            autosave: false,
            autosave_every: 10,
            autosave_dir: None,
            abort_on_failure: false,
            parallel: false,
            cancel: None,
            progress: None,
        }
    }
}

impl fmt::Debug for MultifitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultifitOptions")
            .field("fit", &self.fit)
            .field("mask", &self.mask.as_ref().map(|m| m.shape().to_vec()))
            .field("charge_only_fixed", &self.charge_only_fixed)
            .field("autosave", &self.autosave)
            .field("autosave_every", &self.autosave_every)
            .field("autosave_dir", &self.autosave_dir)
            .field("abort_on_failure", &self.abort_on_failure)
            .field("parallel", &self.parallel)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl MultifitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fit_options(mut self, fit: FitOptions) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_mask(mut self, mask: ArrayD<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_charge_only_fixed(mut self, charge_only_fixed: bool) -> Self {
        self.charge_only_fixed = charge_only_fixed;
        self
    }

    /// Checkpoint every `every` positions into `dir` (temp dir when `None`)
    pub fn with_autosave(mut self, every: usize, dir: Option<PathBuf>) -> Self {
        self.autosave = true;
        self.autosave_every = every;
        self.autosave_dir = dir;
        self
    }

    pub fn with_abort_on_failure(mut self, abort: bool) -> Self {
        self.abort_on_failure = abort;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&MultifitEvent) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    fn emit(&self, event: MultifitEvent) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |c| c.is_cancelled())
    }
}

/// A position whose fit did not converge
#[derive(Debug, Clone, PartialEq)]
pub struct FailedPosition {
    pub position: usize,
    pub indices: Vec<usize>,
    pub message: String,
}

/// Summary of a multifit pass
#[derive(Debug, Clone, Default)]
pub struct MultifitReport {
    /// Positions fitted successfully
    pub fitted: usize,

    /// Positions whose fit did not converge (their best-effort values are stored)
    pub failed: Vec<FailedPosition>,

    /// Masked positions
    pub skipped: usize,

    /// The pass was stopped through its cancellation token
    pub cancelled: bool,

    /// Checkpoint left on disk by an interrupted pass
    pub checkpoint: Option<PathBuf>,

    pub warnings: Vec<FitWarning>,
}

impl MultifitReport {
    /// Positions visited by the fitter
    pub fn processed(&self) -> usize {
        self.fitted + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed.is_empty()
    }
}

impl fmt::Display for MultifitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Multifit {}", if self.cancelled { "cancelled" } else { "finished" })?;
        writeln!(f, "  Fitted: {}", self.fitted)?;
        writeln!(f, "  Failed: {}", self.failed.len())?;
        writeln!(f, "  Skipped: {}", self.skipped)?;
        for failure in &self.failed {
            writeln!(f, "    {:?}: {}", failure.indices, failure.message)?;
        }
        if let Some(path) = &self.checkpoint {
            writeln!(f, "  Checkpoint: {}", path.display())?;
        }
        for warning in &self.warnings {
            writeln!(f, "  Warning: {}", warning)?;
        }
        Ok(())
    }
}

/// Checkpoint file, created on first write
struct Checkpoint {
    dir: PathBuf,
    every: usize,
    path: Option<PathBuf>,
}

impl Checkpoint {
    fn new(options: &MultifitOptions) -> Result<Option<Self>> {
        if !options.autosave {
            return Ok(None);
        }
        if options.autosave_every == 0 {
            return Err(SpecFitError::Configuration(
                "autosave interval must be at least one position".to_string(),
            ));
        }

        let dir = options
            .autosave_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Ok(Some(Self {
            dir,
            every: options.autosave_every,
            path: None,
        }))
    }

    fn write(&mut self, model: &Model) -> Result<&Path> {
        let path = match self.path.take() {
            Some(path) => path,
            None => {
                let (_, path) = tempfile::Builder::new()
                    .prefix("specfit_autosave-")
                    .suffix(".json")
                    .tempfile_in(&self.dir)?
                    .keep()
                    .map_err(|e| SpecFitError::IoError(e.error))?;
                info!("Autosaving every {} positions to {}", self.every, path.display());
                path
            }
        };

        ParameterArchive::from_model(model, true).save(&path)?;
        Ok(self.path.insert(path).as_path())
    }

    fn remove(self) -> Result<()> {
        if let Some(path) = self.path {
            info!("Deleting the checkpoint file {}", path.display());
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Bookkeeping shared by the sequential and parallel passes
struct Pass<'a> {
    options: &'a MultifitOptions,
    checkpoint: Option<Checkpoint>,
    report: MultifitReport,
}

impl Pass<'_> {
    /// Record a stored fit; checkpoints and aborts as configured
    fn record(&mut self, model: &Model, position: usize, outcome: &FitOutcome) -> Result<()> {
        if outcome.success {
            self.report.fitted += 1;
        } else {
            debug!("Position {} did not converge: {}", position, outcome.message);
            self.report.failed.push(FailedPosition {
                position,
                indices: model.cursor().unravel(position),
                message: outcome.message.clone(),
            });
        }
        self.options.emit(MultifitEvent::PositionFitted {
            position,
            success: outcome.success,
        });

        if let Some(checkpoint) = self.checkpoint.as_mut() {
            if self.report.processed() % checkpoint.every == 0 {
                let path = checkpoint.write(model)?.to_path_buf();
                self.options.emit(MultifitEvent::Checkpoint { path });
            }
        }

        if !outcome.success && self.options.abort_on_failure {
            return Err(SpecFitError::ConvergenceFailure {
                position: model.cursor().unravel(position),
                message: outcome.message.clone(),
                fitted: self.report.fitted,
                failed: self.report.failed.len(),
                skipped: self.report.skipped,
            });
        }
        Ok(())
    }
}

impl Model {
    /// Fit every unmasked position and store the results in the parameter maps
    ///
    /// Failed fits are recorded in the report and do not stop the pass unless
    /// `abort_on_failure` is set. The cursor is restored afterwards and the live
    /// values are charged there.
    ///
    /// # Errors
    ///
    /// * [`SpecFitError::Configuration`] for a mask whose shape differs from the
    ///   navigation shape, a zero autosave interval or a weighted fit without
    ///   variance, all raised before any position is fitted
    /// * [`SpecFitError::ConvergenceFailure`] when `abort_on_failure` is set and
    ///   a position fails
    pub fn multifit(&mut self, options: &MultifitOptions) -> Result<MultifitReport> {
        let n_positions = self.dataset().n_positions();
        let mask = match &options.mask {
            Some(mask) => flatten_mask(mask, self.navigation_shape())?,
            None => vec![false; n_positions],
        };
        if options.fit.weighted && !self.dataset().has_variance() {
            return Err(SpecFitError::Configuration(
                "weighted fit requested but the dataset has no variance".to_string(),
            ));
        }

        let plan = FitPlan::new(&options.fit, self.components());
        let mut pass = Pass {
            options,
            checkpoint: Checkpoint::new(options)?,
            report: MultifitReport {
                warnings: plan.warnings.clone(),
                ..Default::default()
            },
        };

        let total = mask.iter().filter(|&&m| !m).count();
        info!(
            "Multifit over {} positions ({} masked) with fitter {}",
            total,
            n_positions - total,
            options.fit.fitter
        );
        options.emit(MultifitEvent::Started { total });

        let original = self.cursor().position();
        let result = if options.parallel && !options.charge_only_fixed {
            self.multifit_parallel(&mask, &plan, &mut pass)
        } else {
            if options.parallel {
                debug!("Seeded multifit runs sequentially");
            }
            self.multifit_sequential(&mask, &plan, &mut pass)
        };

        self.cursor_mut().set_position(original)?;
        self.charge(false)?;

        let Pass {
            checkpoint,
            mut report,
            ..
        } = pass;
        if let Err(e) = result {
            if let Some(path) = checkpoint.and_then(|c| c.path) {
                info!("Multifit stopped, checkpoint kept at {}", path.display());
            }
            return Err(e);
        }

        if report.cancelled {
            report.checkpoint = checkpoint.and_then(|c| c.path);
            info!("Multifit cancelled after {} positions", report.processed());
        } else if let Some(checkpoint) = checkpoint {
            checkpoint.remove()?;
        }

        info!(
            "Multifit finished: {} fitted, {} failed, {} skipped",
            report.fitted,
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    fn multifit_sequential(&mut self, mask: &[bool], plan: &FitPlan, pass: &mut Pass<'_>) -> Result<()> {
        let options = pass.options;
        for (position, &masked) in mask.iter().enumerate() {
            if options.is_cancelled() {
                pass.report.cancelled = true;
                break;
            }
            if masked {
                pass.report.skipped += 1;
                options.emit(MultifitEvent::PositionSkipped { position });
                continue;
            }

            self.cursor_mut().set_position(position)?;
            self.charge_quiet(options.charge_only_fixed)?;
            let outcome = self.fit_with_plan(&options.fit, plan)?;
            self.store_quiet()?;
            pass.record(self, position, &outcome)?;
        }
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn multifit_parallel(&mut self, mask: &[bool], plan: &FitPlan, pass: &mut Pass<'_>) -> Result<()> {
        log::warn!("Built without the parallel feature, fitting sequentially");
        self.multifit_sequential(mask, plan, pass)
    }

    /// Positions are fitted in chunks on worker copies of the components.
    /// Results are written back and checkpointed serially, in position order.
    #[cfg(feature = "parallel")]
    fn multifit_parallel(&mut self, mask: &[bool], plan: &FitPlan, pass: &mut Pass<'_>) -> Result<()> {
        use crate::component::Component;
        use rayon::prelude::*;

        let options = pass.options;
        for (position, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
            pass.report.skipped += 1;
            options.emit(MultifitEvent::PositionSkipped { position });
        }

        let todo: Vec<usize> = (0..mask.len()).filter(|&p| !mask[p]).collect();
        let chunk_size = match &pass.checkpoint {
            Some(checkpoint) => checkpoint.every,
            None => todo.len().max(1),
        };

        // Worker template: current live values, no maps
        let template: Vec<Box<dyn Component>> = self
            .components()
            .iter()
            .map(|c| {
                let mut copy = c.clone();
                for param in copy.parameters_mut() {
                    param.release_map();
                }
                copy
            })
            .collect();

        // Workers check the token, so a cancel shows up as a short chunk
        for chunk in todo.chunks(chunk_size) {
            let model: &Model = self;
            let results: Vec<Option<(usize, Vec<Box<dyn Component>>, FitOutcome)>> = chunk
                .par_iter()
                .map(|&position| -> Result<Option<_>> {
                    if options.is_cancelled() {
                        return Ok(None);
                    }
                    let mut components = template.clone();
                    for (worker, main) in components.iter_mut().zip(model.components()) {
                        for (param, source) in worker.parameters_mut().iter_mut().zip(main.parameters()) {
                            if let Some(map) = source.map() {
                                param.charge_from_map(map, position)?;
                            }
                        }
                    }
                    crate::composition::propagate_twins(&mut components)?;

                    let inputs = model.fit_inputs(position, options.fit.weighted)?;
                    let outcome = crate::fit::fit_components(
                        &mut components,
                        &inputs.context,
                        inputs.data,
                        inputs.weights,
                        &options.fit,
                        plan,
                    )?;
                    Ok(Some((position, components, outcome)))
                })
                .collect::<Result<_>>()?;

            let finished = results.iter().flatten().count();
            for (position, components, outcome) in results.into_iter().flatten() {
                for (main, worker) in self.components_mut().iter_mut().zip(&components) {
                    for (param, fitted) in main.parameters_mut().iter_mut().zip(worker.parameters()) {
                        param.set_values(fitted.values())?;
                        param.set_std(fitted.std().map(|s| s.to_vec()))?;
                        param.store_at(position)?;
                    }
                }
                pass.record(self, position, &outcome)?;
            }

            if finished < chunk.len() {
                pass.report.cancelled = true;
                break;
            }
        }
        Ok(())
    }
}
