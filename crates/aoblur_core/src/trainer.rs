//! Projected gradient descent over the filter parameters.
//!
//! Every epoch runs the dual-number forward pass and the loss for each frame
//! of a batch, averages the per-frame losses (and with them the gradients),
//! takes one optimizer step and clamps the parameters back to their floor.
//! The best parameters seen are checkpointed at epoch boundaries and reloaded
//! when the fit ends.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::autodiff::Dual;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{AoError, AoResult};
use crate::filter::{forward_dual, BilateralFilter, FilterConfig};
use crate::float_trait::AoFloat;
use crate::frame::{Frame, FrameStack, LossTarget, TargetConfig};
use crate::loss::{AoLoss, LossFunction};
use crate::optim::{Optimizer, OptimizerConfig};
use crate::params::{ParameterVector, DEFAULT_PARAM_FLOOR};

/// Default number of epochs per fit
const DEFAULT_EPOCHS: usize = 100;

// =============================================================================
// Configuration
// =============================================================================

/// Settings of one fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Number of optimizer steps. Default: 100
    pub epochs: usize,
    pub optimizer: OptimizerConfig,
    /// Lower bound every parameter is clamped to after a step. Default: 1e-4
    pub param_floor: f64,
    pub loss: LossFunction,
    /// How the confidence channel of the loss target is built.
    pub target: TargetConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            optimizer: OptimizerConfig::default(),
            param_floor: DEFAULT_PARAM_FLOOR,
            loss: LossFunction::default(),
            target: TargetConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Validate the configuration parameters, including the nested optimizer,
    /// loss and target settings.
    pub fn validate(&self) -> AoResult<()> {
        if self.epochs == 0 {
            return Err(AoError::InvalidConfig("epochs must be > 0".to_string()));
        }
        if !self.param_floor.is_finite() || self.param_floor <= 0.0 {
            return Err(AoError::InvalidConfig(
                "param_floor must be finite and > 0".to_string(),
            ));
        }
        self.optimizer.validate()?;
        self.loss.validate()?;
        self.target.validate()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Outcome of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// Parameters reloaded from the checkpoint store.
    pub best_params: ParameterVector,
    pub best_loss: f64,
    /// Epoch at which `best_params` were evaluated.
    pub best_epoch: usize,
    /// Loss of every epoch, evaluated before that epoch's step.
    pub loss_history: Vec<f64>,
    /// Parameters after every epoch's step.
    pub param_history: Vec<ParameterVector>,
}

impl FitReport {
    pub fn first_loss(&self) -> Option<f64> {
        self.loss_history.first().copied()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

/// Outcome of fitting a sequence of frames pulled from a [`FrameSource`].
#[derive(Debug, Clone, Default)]
pub struct SourceFitReport {
    /// Ids that were fitted, each with its report.
    pub fitted: Vec<(String, FitReport)>,
    /// Ids whose frame was unavailable.
    pub skipped: Vec<String>,
}

impl SourceFitReport {
    pub fn num_fitted(&self) -> usize {
        self.fitted.len()
    }
}

// =============================================================================
// Frame sources
// =============================================================================

/// Loads frames by scene or slice id.
///
/// A missing frame must be reported as [`AoError::FrameUnavailable`] so that
/// drivers can skip it.
pub trait FrameSource<F: AoFloat> {
    fn load(&self, id: &str) -> AoResult<Frame<F>>;
}

impl<F: AoFloat> FrameSource<F> for BTreeMap<String, Frame<F>> {
    fn load(&self, id: &str) -> AoResult<Frame<F>> {
        self.get(id).cloned().ok_or_else(|| AoError::FrameUnavailable {
            id: id.to_string(),
        })
    }
}

impl<F: AoFloat> FrameSource<F> for HashMap<String, Frame<F>> {
    fn load(&self, id: &str) -> AoResult<Frame<F>> {
        self.get(id).cloned().ok_or_else(|| AoError::FrameUnavailable {
            id: id.to_string(),
        })
    }
}

// =============================================================================
// Trainer
// =============================================================================

/// Fits a [`ParameterVector`] to frames with known references.
///
/// The trainer owns the parameters being fitted. After each fit they are
/// replaced by the best checkpoint, so consecutive fits warm-start from the
/// previous result.
#[derive(Debug, Clone)]
pub struct Trainer {
    filter: FilterConfig,
    config: TrainConfig,
    params: ParameterVector,
}

impl Trainer {
    pub fn new(filter: FilterConfig, config: TrainConfig) -> AoResult<Self> {
        filter.validate()?;
        config.validate()?;
        Ok(Self {
            filter,
            config,
            params: ParameterVector::default(),
        })
    }

    /// Start from `params` instead of the defaults.
    pub fn with_params(mut self, params: ParameterVector) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &ParameterVector {
        &self.params
    }

    pub fn set_params(&mut self, params: ParameterVector) {
        self.params = params;
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter
    }

    /// An evaluation filter frozen at the current parameters.
    pub fn filter(&self) -> AoResult<BilateralFilter> {
        BilateralFilter::new(self.filter, self.params)
    }

    /// Loss of `params` on a batch, with its gradient in the dual part.
    pub fn evaluate<F: AoFloat>(
        &self,
        frames: &[Frame<F>],
        params: &ParameterVector,
    ) -> AoResult<Dual> {
        let targets = self.targets(frames)?;
        self.batch_loss(frames, &targets, params)
    }

    /// Fit a single frame.
    pub fn fit<F, C>(&mut self, frame: &Frame<F>, store: &mut C) -> AoResult<FitReport>
    where
        F: AoFloat,
        C: CheckpointStore + ?Sized,
    {
        self.fit_batch(std::slice::from_ref(frame), store)
    }

    /// Fit all `frames` jointly with one step per epoch.
    ///
    /// Per-frame gradients are computed in parallel and averaged before the
    /// parameters are touched. Epochs whose loss or gradient is not finite are
    /// neither stepped nor checkpointed. Fails with [`AoError::NoCheckpoint`]
    /// if no epoch produced a finite loss.
    pub fn fit_batch<F, C>(&mut self, frames: &[Frame<F>], store: &mut C) -> AoResult<FitReport>
    where
        F: AoFloat,
        C: CheckpointStore + ?Sized,
    {
        if frames.is_empty() {
            return Err(AoError::EmptyBatch);
        }
        let targets = self.targets(frames)?;

        let epochs = self.config.epochs;
        let floor = self.config.param_floor;
        let mut optimizer = Optimizer::new(self.config.optimizer);
        let mut params = self.params;

        let mut best_loss = f64::INFINITY;
        let mut saved = false;
        let mut loss_history = Vec::with_capacity(epochs);
        let mut param_history = Vec::with_capacity(epochs);

        info!(
            frames = frames.len(),
            epochs,
            optimizer = ?self.config.optimizer.kind,
            "starting fit"
        );

        for epoch in 0..epochs {
            let loss = self.batch_loss(frames, &targets, &params)?;
            loss_history.push(loss.value);

            if !loss.is_finite() {
                warn!(epoch, loss = loss.value, "non-finite loss, skipping step");
                param_history.push(params);
                continue;
            }

            if loss.value < best_loss {
                best_loss = loss.value;
                store.save(&Checkpoint {
                    epoch,
                    loss: loss.value,
                    params,
                })?;
                saved = true;
                info!(epoch, loss = loss.value, "checkpointed improved parameters");
            }

            optimizer.step(params.values_mut(), &loss.grad);
            params.project_positive(floor);
            param_history.push(params);

            debug!(epoch, loss = loss.value, params = ?params.values(), "epoch done");
        }

        if !saved {
            return Err(AoError::NoCheckpoint);
        }

        let best = store.load()?;
        self.params = best.params;

        info!(
            best_loss = best.loss,
            best_epoch = best.epoch,
            "fit finished"
        );

        Ok(FitReport {
            best_params: best.params,
            best_loss: best.loss,
            best_epoch: best.epoch,
            loss_history,
            param_history,
        })
    }

    /// Fit every slice of a stack in order.
    ///
    /// Slice 0 starts from the current parameters; each later slice starts
    /// from the best parameters of the slice before it.
    pub fn fit_slices<F, C>(
        &mut self,
        stack: &FrameStack<F>,
        store: &mut C,
    ) -> AoResult<Vec<FitReport>>
    where
        F: AoFloat,
        C: CheckpointStore + ?Sized,
    {
        let mut reports = Vec::with_capacity(stack.num_slices());
        for (index, frame) in stack.frames().enumerate() {
            debug!(slice = index, "fitting slice");
            reports.push(self.fit(&frame, store)?);
        }
        Ok(reports)
    }

    /// Fit the frames behind `ids` one after another, warm-starting each.
    ///
    /// Unavailable frames are skipped with a warning; any other error stops
    /// the run.
    pub fn fit_sources<F, Src, C, I, S>(
        &mut self,
        source: &Src,
        ids: I,
        store: &mut C,
    ) -> AoResult<SourceFitReport>
    where
        F: AoFloat,
        Src: FrameSource<F> + ?Sized,
        C: CheckpointStore + ?Sized,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = SourceFitReport::default();
        for id in ids {
            let id = id.as_ref();
            let frame = match source.load(id) {
                Ok(frame) => frame,
                Err(err) if err.is_recoverable() => {
                    warn!(id, %err, "skipping frame");
                    report.skipped.push(id.to_string());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let fit = self.fit(&frame, store)?;
            report.fitted.push((id.to_string(), fit));
        }
        info!(
            fitted = report.num_fitted(),
            skipped = report.skipped.len(),
            "source fit finished"
        );
        Ok(report)
    }

    fn targets<F: AoFloat>(&self, frames: &[Frame<F>]) -> AoResult<Vec<LossTarget<F>>> {
        frames
            .iter()
            .map(|frame| frame.loss_target(&self.config.target))
            .collect()
    }

    fn batch_loss<F: AoFloat>(
        &self,
        frames: &[Frame<F>],
        targets: &[LossTarget<F>],
        params: &ParameterVector,
    ) -> AoResult<Dual> {
        if frames.is_empty() {
            return Err(AoError::EmptyBatch);
        }
        let losses: Vec<Dual> = frames
            .par_iter()
            .zip(targets.par_iter())
            .map(|(frame, target)| {
                let prediction = forward_dual(frame, params, &self.filter);
                self.config.loss.evaluate(prediction.view(), target)
            })
            .collect::<AoResult<Vec<Dual>>>()?;

        let n = Dual::usize_as(losses.len());
        Ok(losses.into_iter().sum::<Dual>() / n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpoint;
    use crate::loss::StructuralSimilarity;
    use crate::optim::OptimizerKind;
    use crate::params::ParamId;
    use ndarray::{Array2, Array3};

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    fn checkerboard_frame() -> Frame<f64> {
        let bright = Array2::from_shape_fn((4, 4), |(r, c)| if (r + c) % 2 == 0 { 0.8 } else { 0.2 });
        let dark = Array2::from_elem((4, 4), 0.5);
        let depth = Array2::from_elem((4, 4), 1.0);
        let reference = bright.clone();
        Frame::new(bright, dark, depth, reference).unwrap()
    }

    struct SimpleLcg {
        state: u64,
    }

    impl SimpleLcg {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_f64(&mut self) -> f64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (self.state >> 11) as f64 / (1u64 << 53) as f64
        }
    }

    /// Random 12x12 frame whose reference is its own bright buffer.
    fn random_frame(seed: u64) -> Frame<f64> {
        let mut rng = SimpleLcg::new(seed);
        let mut next = |scale: f64, offset: f64| {
            Array2::from_shape_fn((12, 12), |_| offset + scale * rng.next_f64())
        };
        let bright = next(1.0, 0.0);
        let dark = next(1.0, 0.0);
        let depth = next(4.0, 0.5);
        let reference = bright.clone();
        Frame::new(bright, dark, depth, reference).unwrap()
    }

    fn ssim_loss() -> LossFunction {
        LossFunction::StructuralSimilarity(StructuralSimilarity {
            patch_size: 5,
            ..StructuralSimilarity::default()
        })
    }

    fn quick_config(epochs: usize) -> TrainConfig {
        TrainConfig {
            epochs,
            optimizer: OptimizerConfig {
                learning_rate: 0.05,
                ..OptimizerConfig::default()
            },
            ..TrainConfig::default()
        }
    }

    // ==================== Config Tests ====================

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        assert_eq!(config.epochs, 100);
        assert_eq!(config.optimizer.kind, OptimizerKind::Adam);
        assert_eq!(config.param_floor, 1e-4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad_epochs = TrainConfig {
            epochs: 0,
            ..TrainConfig::default()
        };
        assert!(matches!(bad_epochs.validate(), Err(AoError::InvalidConfig(_))));

        let bad_floor = TrainConfig {
            param_floor: 0.0,
            ..TrainConfig::default()
        };
        assert!(Trainer::new(FilterConfig::default(), bad_floor).is_err());
    }

    #[test]
    fn test_config_from_partial_json() {
        let config: TrainConfig =
            serde_json::from_str(r#"{"epochs": 5, "loss": {"kind": "structural_similarity"}}"#)
                .unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(
            config.loss,
            LossFunction::StructuralSimilarity(StructuralSimilarity::default())
        );
        assert_eq!(config.optimizer, OptimizerConfig::default());
    }

    // ==================== Fit Tests ====================

    #[test]
    fn test_fit_records_history() {
        let frame = checkerboard_frame();
        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(12)).unwrap();
        let mut store = InMemoryCheckpoint::new();
        let report = trainer.fit(&frame, &mut store).unwrap();

        assert_eq!(report.loss_history.len(), 12);
        assert_eq!(report.param_history.len(), 12);
        assert!(report.loss_history.iter().all(|l| l.is_finite()));
        let min = report
            .loss_history
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        assert_eq!(report.best_loss, min);
        assert_eq!(report.loss_history[report.best_epoch], report.best_loss);
        assert_eq!(trainer.params(), &report.best_params);
    }

    #[test]
    fn test_fit_lowers_loss() {
        let frame = checkerboard_frame();
        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(30)).unwrap();
        let mut store = InMemoryCheckpoint::new();
        let report = trainer.fit(&frame, &mut store).unwrap();

        let first = report.first_loss().unwrap();
        let last = report.final_loss().unwrap();
        assert!(last <= first, "first {first}, last {last}");
        assert!(report.best_loss < first);
    }

    #[test]
    fn test_parameters_stay_above_floor() {
        let frame = checkerboard_frame();
        let config = TrainConfig {
            epochs: 20,
            optimizer: OptimizerConfig {
                learning_rate: 5.0,
                ..OptimizerConfig::default()
            },
            ..TrainConfig::default()
        };
        let mut trainer = Trainer::new(FilterConfig::default(), config).unwrap();
        let report = trainer.fit(&frame, &mut InMemoryCheckpoint::new()).unwrap();

        for params in &report.param_history {
            for id in ParamId::ALL {
                assert!(params.get(id) >= config.param_floor);
            }
        }
    }

    #[test]
    fn test_batch_of_identical_frames_matches_single() {
        let frame = checkerboard_frame();
        let trainer = Trainer::new(FilterConfig::default(), quick_config(1)).unwrap();
        let params = ParameterVector::default();

        let single = trainer.evaluate(std::slice::from_ref(&frame), &params).unwrap();
        let batch = trainer
            .evaluate(&[frame.clone(), frame.clone(), frame], &params)
            .unwrap();

        assert!(approx_eq(single.value, batch.value, 1e-12));
        for i in 0..single.grad.len() {
            assert!(approx_eq(single.grad[i], batch.grad[i], 1e-12));
        }
    }

    #[test]
    fn test_ssim_gradient_matches_finite_difference() {
        let frame = random_frame(31);
        let config = TrainConfig {
            loss: ssim_loss(),
            ..quick_config(1)
        };
        let trainer = Trainer::new(FilterConfig::default(), config).unwrap();
        let frames = std::slice::from_ref(&frame);
        let base = ParameterVector::default();
        let dual = trainer.evaluate(frames, &base).unwrap();
        assert!(dual.value.is_finite());

        for id in ParamId::ALL {
            let value = base.get(id);
            let h = 1e-5 * value;
            let mut plus = base;
            plus.set(id, value + h).unwrap();
            let mut minus = base;
            minus.set(id, value - h).unwrap();

            let loss_plus = trainer.evaluate(frames, &plus).unwrap().value;
            let loss_minus = trainer.evaluate(frames, &minus).unwrap().value;
            let numeric = (loss_plus - loss_minus) / (2.0 * h);
            let analytic = dual.grad[id.index()];
            let tol = 1e-4 * numeric.abs().max(analytic.abs()) + 1e-7;
            assert!(
                approx_eq(analytic, numeric, tol),
                "{}: dual {analytic}, central difference {numeric}",
                id.name()
            );
        }
    }

    #[test]
    fn test_fit_with_ssim_loss_improves() {
        let frame = random_frame(47);
        let config = TrainConfig {
            loss: ssim_loss(),
            ..quick_config(40)
        };
        let mut trainer = Trainer::new(FilterConfig::default(), config).unwrap();
        let report = trainer.fit(&frame, &mut InMemoryCheckpoint::new()).unwrap();

        assert!(report.loss_history.iter().all(|l| l.is_finite()));
        let first = report.first_loss().unwrap();
        assert!(report.best_loss < first, "first {first}, best {}", report.best_loss);
        assert_eq!(trainer.params(), &report.best_params);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(1)).unwrap();
        let frames: Vec<Frame<f64>> = Vec::new();
        let result = trainer.fit_batch(&frames, &mut InMemoryCheckpoint::new());
        assert!(matches!(result, Err(AoError::EmptyBatch)));
    }

    #[test]
    fn test_bypassed_filter_has_zero_gradient() {
        let frame = checkerboard_frame();
        let filter = FilterConfig {
            enabled: false,
            ..FilterConfig::default()
        };
        let mut trainer = Trainer::new(filter, quick_config(3)).unwrap();
        let report = trainer.fit(&frame, &mut InMemoryCheckpoint::new()).unwrap();

        // Output equals bright equals reference, so nothing moves.
        assert_eq!(report.best_loss, 0.0);
        assert_eq!(report.best_params, ParameterVector::default());
    }

    // ==================== Warm Start Tests ====================

    #[test]
    fn test_fit_slices_warm_starts() {
        let frame = checkerboard_frame();
        let stack_of = |a: Array2<f64>| {
            let mut out = Array3::zeros((2, 4, 4));
            out.index_axis_mut(ndarray::Axis(0), 0).assign(&a);
            out.index_axis_mut(ndarray::Axis(0), 1).assign(&a);
            out
        };
        let stack = FrameStack::new(
            stack_of(frame.bright().to_owned()),
            stack_of(frame.dark().to_owned()),
            stack_of(frame.depth().to_owned()),
            stack_of(frame.reference().to_owned()),
        )
        .unwrap();

        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(5)).unwrap();
        let reports = trainer
            .fit_slices(&stack, &mut InMemoryCheckpoint::new())
            .unwrap();

        assert_eq!(reports.len(), 2);
        // The second slice starts where the first one ended.
        assert!(reports[1].first_loss().unwrap() <= reports[0].first_loss().unwrap());
        assert_eq!(trainer.params(), &reports[1].best_params);
    }

    #[test]
    fn test_fit_sources_skips_unavailable() {
        let mut frames = BTreeMap::new();
        frames.insert("scene_a".to_string(), checkerboard_frame());
        frames.insert("scene_c".to_string(), checkerboard_frame());

        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(3)).unwrap();
        let report = trainer
            .fit_sources(
                &frames,
                ["scene_a", "scene_b", "scene_c"],
                &mut InMemoryCheckpoint::new(),
            )
            .unwrap();

        assert_eq!(report.num_fitted(), 2);
        assert_eq!(report.skipped, vec!["scene_b".to_string()]);
        assert_eq!(report.fitted[0].0, "scene_a");
        assert_eq!(report.fitted[1].0, "scene_c");
    }

    struct BrokenSource;

    impl FrameSource<f64> for BrokenSource {
        fn load(&self, id: &str) -> AoResult<Frame<f64>> {
            Err(AoError::InvalidConfig(format!("cannot decode {id}")))
        }
    }

    #[test]
    fn test_fit_sources_propagates_other_errors() {
        let mut trainer = Trainer::new(FilterConfig::default(), quick_config(1)).unwrap();
        let result = trainer.fit_sources(&BrokenSource, ["x"], &mut InMemoryCheckpoint::new());
        assert!(matches!(result, Err(AoError::InvalidConfig(_))));
    }
}
