//! Dataset preparation for a run and index partitions for the fit loop.

use crate::config::PipelineConfig;
use crate::error::{TrainError, TrainResult};
use std::ops::Range;
use std::path::{Path, PathBuf};
use video_dataset::{
    default_decoder, load_or_build, with_snapshot_extension, DatasetBuilder, FrameSampler,
    SplitDataset, VideoDecoder,
};

/// A split dataset plus the snapshot file it lives in.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub data: SplitDataset,
    pub snapshot: PathBuf,
}

/// Load `dataset.snapshot` when configured; otherwise sample every video under
/// `dataset.root` with ffmpeg and save the split into `save_dir`.
pub fn prepare_dataset(cfg: &PipelineConfig, save_dir: &Path) -> TrainResult<PreparedDataset> {
    prepare_dataset_with(cfg, save_dir, default_decoder())
}

pub fn prepare_dataset_with<D: VideoDecoder>(
    cfg: &PipelineConfig,
    save_dir: &Path,
    decoder: D,
) -> TrainResult<PreparedDataset> {
    let save_as = with_snapshot_extension(&save_dir.join(&cfg.dataset.snapshot_name));
    let snapshot = cfg
        .dataset
        .snapshot
        .clone()
        .unwrap_or_else(|| save_as.clone());
    let builder = DatasetBuilder::new(
        cfg.dataset.root.clone(),
        FrameSampler::new(cfg.sampler_config(), decoder),
    );
    let data = load_or_build(
        cfg.dataset.snapshot.as_deref(),
        &save_as,
        cfg.dataset.test_fraction,
        cfg.dataset.split_seed,
        || builder.build(),
    )?;
    if data.x_train.is_empty() {
        return Err(TrainError::Other(format!(
            "dataset {} has no training clips",
            snapshot.display()
        )));
    }
    Ok(PreparedDataset { data, snapshot })
}

/// Fit and validation index ranges over `n` training samples.
///
/// The validation set is the tail of the training partition, taken before any
/// shuffling: `split_at = floor(n * (1 - validation_split))`.
pub fn validation_partition(
    n: usize,
    validation_split: f64,
) -> TrainResult<(Range<usize>, Range<usize>)> {
    if !(validation_split > 0.0 && validation_split < 1.0) {
        return Err(TrainError::InvalidConfig(format!(
            "validation_split must be in (0, 1), got {validation_split}"
        )));
    }
    let split_at = (n as f64 * (1.0 - validation_split)).floor() as usize;
    if split_at == 0 || split_at >= n {
        return Err(TrainError::InvalidConfig(format!(
            "validation_split {validation_split} leaves an empty partition for {n} samples"
        )));
    }
    Ok((0..split_at, split_at..n))
}
