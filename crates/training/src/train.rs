//! Fit loop, best-checkpoint saving and checkpoint loading.

use crate::config::{PipelineConfig, TrainingConfig};
use crate::dataset::{prepare_dataset, validation_partition, PreparedDataset};
use crate::error::{TrainError, TrainResult};
use crate::run::{CheckpointMonitor, RunDir, MODEL_CONFIG_NAME};
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::{C3d, C3dConfig};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use video_dataset::{collate, Clip, SplitDataset};

pub type ADBackend = Autodiff<TrainBackend>;

/// Metrics logged after every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    /// 1-based.
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: f32,
    pub val_accuracy: f32,
    pub checkpoint_saved: bool,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_dir: PathBuf,
    /// Snapshot the model was trained on.
    pub snapshot: PathBuf,
    pub model_config: C3dConfig,
    /// Most recent (and therefore best) checkpoint written.
    pub best_checkpoint: Option<PathBuf>,
    pub history: Vec<EpochMetrics>,
}

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub learning_rate: f64,
    pub shuffle_seed: u64,
    pub checkpoint_prefix: String,
}

impl From<&TrainingConfig> for FitOptions {
    fn from(cfg: &TrainingConfig) -> Self {
        Self {
            epochs: cfg.epochs,
            batch_size: cfg.batch_size,
            validation_split: cfg.validation_split,
            learning_rate: cfg.learning_rate,
            shuffle_seed: cfg.shuffle_seed,
            checkpoint_prefix: cfg.checkpoint_prefix.clone(),
        }
    }
}

pub struct FitOutcome {
    pub history: Vec<EpochMetrics>,
    pub best_checkpoint: Option<PathBuf>,
}

/// Train on a fresh run directory under `training.runs_root`.
pub fn run_train(cfg: &PipelineConfig) -> TrainResult<TrainingReport> {
    cfg.validate()?;
    let run_dir = RunDir::create_now(&cfg.training.runs_root)?;
    let prepared = prepare_dataset(cfg, run_dir.path())?;
    train_in(cfg, &run_dir, prepared)
}

/// Train on `prepared` inside an existing run directory.
pub fn train_in(
    cfg: &PipelineConfig,
    run_dir: &RunDir,
    prepared: PreparedDataset,
) -> TrainResult<TrainingReport> {
    let device = <ADBackend as Backend>::Device::default();
    let data = &prepared.data;
    let model_config = model_config_for(cfg, data)?;

    let model = match &cfg.training.pretrained {
        Some(path) => {
            let pretrained_cfg = model_config_for_checkpoint(path, model_config.clone())?;
            if pretrained_cfg != model_config {
                return Err(TrainError::model_load(
                    path,
                    format!(
                        "checkpoint was trained for {pretrained_cfg:?}, dataset needs {model_config:?}"
                    ),
                ));
            }
            tracing::info!(path = %path.display(), "resuming from checkpoint");
            load_c3d::<ADBackend>(path, &model_config, &device)?
        }
        None => C3d::<ADBackend>::new(&model_config, &device),
    };

    let config_path = run_dir.model_config_path();
    let json = serde_json::to_vec_pretty(&model_config)
        .map_err(|e| TrainError::Other(format!("failed to encode model config: {e}")))?;
    fs::write(&config_path, json).map_err(|e| TrainError::io(&config_path, e))?;

    let opts = FitOptions::from(&cfg.training);
    let outcome = fit(model, data, &opts, run_dir, &device)?;
    Ok(TrainingReport {
        run_dir: run_dir.path().to_path_buf(),
        snapshot: prepared.snapshot,
        model_config,
        best_checkpoint: outcome.best_checkpoint,
        history: outcome.history,
    })
}

/// Network shape for `data`: clip size from the clips themselves, widths from config.
pub(crate) fn model_config_for(
    cfg: &PipelineConfig,
    data: &SplitDataset,
) -> TrainResult<C3dConfig> {
    let shape = data
        .clip_shape()
        .ok_or_else(|| TrainError::Other("dataset has no clips".to_string()))?;
    let num_classes = data.num_classes();
    if let Some(bad) = data
        .y_train
        .iter()
        .chain(data.y_test.iter())
        .find(|l| **l as usize >= num_classes)
    {
        return Err(TrainError::Other(format!(
            "label {bad} out of range for {num_classes} classes"
        )));
    }
    let mut model_config = cfg.c3d_config(num_classes);
    if (shape.frames, shape.height as usize, shape.width as usize)
        != (model_config.frames, model_config.height, model_config.width)
    {
        tracing::warn!(
            frames = shape.frames,
            height = shape.height,
            width = shape.width,
            "snapshot clip shape differs from dataset config; using the snapshot's"
        );
        model_config.frames = shape.frames;
        model_config.height = shape.height as usize;
        model_config.width = shape.width as usize;
    }
    model_config.validate()?;
    Ok(model_config)
}

/// Fit `model` on the training partition, validating on its tail after every epoch
/// and saving a checkpoint whenever validation accuracy improves.
pub fn fit(
    mut model: C3d<ADBackend>,
    data: &SplitDataset,
    opts: &FitOptions,
    run_dir: &RunDir,
    device: &<ADBackend as Backend>::Device,
) -> TrainResult<FitOutcome> {
    let (fit_range, val_range) = validation_partition(data.x_train.len(), opts.validation_split)?;
    let mut fit_indices: Vec<usize> = fit_range.collect();
    let val_indices: Vec<usize> = val_range.collect();
    tracing::info!(
        train = fit_indices.len(),
        validation = val_indices.len(),
        epochs = opts.epochs,
        batch_size = opts.batch_size,
        "starting training"
    );

    let batch_size = opts.batch_size.max(1);
    let mut rng = StdRng::seed_from_u64(opts.shuffle_seed);
    let mut optim = AdamConfig::new().init();
    let loss_fn = CrossEntropyLossConfig::new().init::<ADBackend>(device);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let mut monitor = CheckpointMonitor::new();
    let mut history = Vec::with_capacity(opts.epochs);
    let mut best_checkpoint = None;

    for epoch in 1..=opts.epochs {
        fit_indices.shuffle(&mut rng);
        let mut running = RunningMetrics::default();
        for chunk in fit_indices.chunks(batch_size) {
            let batch = collate::<ADBackend>(&data.x_train, &data.y_train, chunk, device)?;
            let logits = model.forward(batch.clips);
            let loss = loss_fn.forward(logits.clone(), batch.labels);
            let loss_val = scalar(loss.clone().detach())?;
            let correct = count_correct(logits.detach(), chunk, &data.y_train)?;
            running.add(loss_val, correct, chunk.len());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(opts.learning_rate, model, grads);
        }

        let (val_loss, val_accuracy) = evaluate_split(
            &model.valid(),
            &data.x_train,
            &data.y_train,
            &val_indices,
            batch_size,
            device,
        )?;
        let improved = monitor.observe(val_accuracy);
        if improved {
            let path = run_dir.checkpoint_path(&opts.checkpoint_prefix, epoch, val_accuracy);
            model
                .clone()
                .save_file(path.clone(), &recorder)
                .map_err(|e| TrainError::Checkpoint {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            tracing::info!(path = %path.display(), val_accuracy, "saved checkpoint");
            best_checkpoint = Some(path);
        }

        let metrics = EpochMetrics {
            epoch,
            loss: running.loss(),
            accuracy: running.accuracy(),
            val_loss,
            val_accuracy,
            checkpoint_saved: improved,
        };
        tracing::info!(
            epoch,
            loss = metrics.loss,
            accuracy = metrics.accuracy,
            val_loss,
            val_accuracy,
            "epoch finished"
        );
        history.push(metrics);
    }

    Ok(FitOutcome {
        history,
        best_checkpoint,
    })
}

/// Mean cross-entropy and accuracy of `model` over `indices`, without gradients.
pub fn evaluate_split<B: Backend>(
    model: &C3d<B>,
    clips: &[Clip],
    labels: &[u32],
    indices: &[usize],
    batch_size: usize,
    device: &B::Device,
) -> TrainResult<(f32, f32)> {
    let loss_fn = CrossEntropyLossConfig::new().init::<B>(device);
    let mut running = RunningMetrics::default();
    for chunk in indices.chunks(batch_size.max(1)) {
        let batch = collate::<B>(clips, labels, chunk, device)?;
        let logits = model.forward(batch.clips);
        let loss_val = scalar(loss_fn.forward(logits.clone(), batch.labels))?;
        let correct = count_correct(logits, chunk, labels)?;
        running.add(loss_val, correct, chunk.len());
    }
    Ok((running.loss(), running.accuracy()))
}

/// Sample-weighted loss and accuracy over an epoch.
#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    seen: usize,
}

impl RunningMetrics {
    fn add(&mut self, batch_loss: f32, correct: usize, batch_len: usize) {
        self.loss_sum += batch_loss as f64 * batch_len as f64;
        self.correct += correct;
        self.seen += batch_len;
    }

    fn loss(&self) -> f32 {
        if self.seen == 0 {
            return 0.0;
        }
        (self.loss_sum / self.seen as f64) as f32
    }

    fn accuracy(&self) -> f32 {
        if self.seen == 0 {
            return 0.0;
        }
        self.correct as f32 / self.seen as f32
    }
}

pub(crate) fn tensor_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> TrainResult<Vec<f32>> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Other(format!("failed to read tensor: {e:?}")))
}

fn scalar<B: Backend>(t: Tensor<B, 1>) -> TrainResult<f32> {
    Ok(tensor_values(t)?.into_iter().next().unwrap_or(0.0))
}

/// Index of the largest value; ties resolve to the first.
pub(crate) fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in row.iter().enumerate() {
        if *v > row[best] {
            best = i;
        }
    }
    best
}

fn count_correct<B: Backend>(
    logits: Tensor<B, 2>,
    indices: &[usize],
    labels: &[u32],
) -> TrainResult<usize> {
    let [rows, cols] = logits.dims();
    let values = tensor_values(logits)?;
    Ok(values
        .chunks(cols.max(1))
        .take(rows)
        .zip(indices)
        .filter(|(row, i)| argmax(row) == labels[**i] as usize)
        .count())
}

/// Shape stored next to `checkpoint` in `model.json`, or `fallback` when absent.
pub fn model_config_for_checkpoint(
    checkpoint: &Path,
    fallback: C3dConfig,
) -> TrainResult<C3dConfig> {
    let Some(path) = checkpoint.parent().map(|p| p.join(MODEL_CONFIG_NAME)) else {
        return Ok(fallback);
    };
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "no model config beside checkpoint; using defaults");
        return Ok(fallback);
    }
    let raw = fs::read(&path).map_err(|e| TrainError::model_load(&path, e.to_string()))?;
    serde_json::from_slice(&raw)
        .map_err(|e| TrainError::model_load(&path, format!("bad model config: {e}")))
}

/// Load a C3D checkpoint saved by [`fit`], rejecting files for another architecture.
pub fn load_c3d<B: Backend>(
    path: &Path,
    cfg: &C3dConfig,
    device: &B::Device,
) -> TrainResult<C3d<B>> {
    if !path.is_file() {
        return Err(TrainError::model_load(path, "checkpoint file not found"));
    }
    cfg.validate()
        .map_err(|e| TrainError::model_load(path, e.to_string()))?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = C3d::<B>::new(cfg, device)
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| TrainError::model_load(path, format!("incompatible checkpoint: {e}")))?;
    // Records replace tensors wholesale, so a foreign layout only shows up here.
    let expected = cfg.weight_shapes();
    let found = model.weight_shapes();
    if let Some((i, (got, want))) = found
        .iter()
        .zip(&expected)
        .enumerate()
        .find(|(_, (got, want))| got != want)
    {
        return Err(TrainError::model_load(
            path,
            format!("architecture mismatch: weight {i} has shape {got:?}, expected {want:?}"),
        ));
    }
    if found.len() != expected.len() {
        return Err(TrainError::model_load(
            path,
            format!(
                "architecture mismatch: {} weights, expected {}",
                found.len(),
                expected.len()
            ),
        ));
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5]), 0);
        assert_eq!(argmax(&[-3.0]), 0);
    }

    #[test]
    fn running_metrics_weight_by_batch_size() {
        let mut m = RunningMetrics::default();
        m.add(1.0, 3, 3);
        m.add(4.0, 0, 1);
        assert!((m.loss() - 1.75).abs() < 1e-6);
        assert!((m.accuracy() - 0.75).abs() < 1e-6);
        assert_eq!(RunningMetrics::default().loss(), 0.0);
    }

    #[test]
    fn missing_checkpoint_is_model_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = load_c3d::<TrainBackend>(
            &tmp.path().join("C3D_E01_VA0.50.bin"),
            &C3dConfig::default(),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::ModelLoad { .. }));
    }

    #[test]
    fn garbage_checkpoint_is_model_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.bin");
        fs::write(&path, b"definitely not a burn record").unwrap();
        let cfg = C3dConfig {
            frames: 2,
            height: 4,
            width: 4,
            stage_widths: [2, 2, 2, 2, 2],
            fc_hidden: 4,
            ..C3dConfig::default()
        };
        let device = Default::default();
        let err = load_c3d::<TrainBackend>(&path, &cfg, &device).unwrap_err();
        assert!(matches!(err, TrainError::ModelLoad { .. }));
    }

    #[test]
    fn same_parameter_count_different_layout_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("C3D_E01_VA1.00.bin");
        let base = C3dConfig {
            frames: 2,
            height: 4,
            width: 4,
            num_classes: 2,
            fc_hidden: 2,
            dropout: 0.0,
            ..C3dConfig::default()
        };
        // Width 2 moves from stage 4 to stage 3; both nets hold 431 parameters.
        let saved_cfg = C3dConfig {
            stage_widths: [1, 1, 1, 2, 1],
            ..base.clone()
        };
        let other_cfg = C3dConfig {
            stage_widths: [1, 1, 2, 1, 1],
            ..base
        };
        let device = Default::default();
        let saved = C3d::<TrainBackend>::new(&saved_cfg, &device);
        let other = C3d::<TrainBackend>::new(&other_cfg, &device);
        assert_eq!(saved.num_params(), other.num_params());
        saved
            .save_file(path.clone(), &BinFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        load_c3d::<TrainBackend>(&path, &saved_cfg, &device).unwrap();
        let err = load_c3d::<TrainBackend>(&path, &other_cfg, &device).unwrap_err();
        match err {
            TrainError::ModelLoad { reason, .. } => assert!(reason.contains("architecture mismatch")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
