use crate::config::PipelineConfig;
use clap::Parser;
use cli_support::{BackendKind, ConfigArgs};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a C3D classifier on a class-per-directory video tree"
)]
pub struct TrainArgs {
    #[command(flatten)]
    pub common: ConfigArgs,
    /// Root directory with one subdirectory of videos per class.
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,
    /// Load this dataset snapshot instead of sampling videos.
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
    /// Parent directory for timestamped run directories.
    #[arg(long)]
    pub runs_root: Option<PathBuf>,
    /// Resume from a saved checkpoint.
    #[arg(long)]
    pub pretrained: Option<PathBuf>,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Fraction of the training partition held out for validation.
    #[arg(long)]
    pub validation_split: Option<f64>,
    #[arg(long)]
    pub lr: Option<f64>,
}

impl TrainArgs {
    pub fn apply(&self, cfg: &mut PipelineConfig) {
        if let Some(root) = &self.dataset_root {
            cfg.dataset.root = root.clone();
        }
        if let Some(snapshot) = &self.snapshot {
            cfg.dataset.snapshot = Some(snapshot.clone());
        }
        if let Some(runs_root) = &self.runs_root {
            cfg.training.runs_root = runs_root.clone();
        }
        if let Some(pretrained) = &self.pretrained {
            cfg.training.pretrained = Some(pretrained.clone());
        }
        if let Some(epochs) = self.epochs {
            cfg.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            cfg.training.batch_size = batch_size;
        }
        if let Some(split) = self.validation_split {
            cfg.training.validation_split = split;
        }
        if let Some(lr) = self.lr {
            cfg.training.learning_rate = lr;
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate embedding retrieval accuracy of a C3D checkpoint"
)]
pub struct EvalArgs {
    #[command(flatten)]
    pub common: ConfigArgs,
    /// Checkpoint to evaluate (overrides retrieval.checkpoint).
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    /// Dataset snapshot to evaluate on (overrides retrieval.snapshot).
    #[arg(long)]
    pub snapshot: Option<PathBuf>,
    /// Embedding layer: fc6/dense_1, fc7/dense_2 or fc8/dense_3.
    #[arg(long)]
    pub layer: Option<String>,
    /// Cosine similarity above which an item is retrieved.
    #[arg(long)]
    pub threshold: Option<f32>,
    #[arg(long)]
    pub batch_size: Option<usize>,
}

impl EvalArgs {
    pub fn apply(&self, cfg: &mut PipelineConfig) -> anyhow::Result<()> {
        if let Some(checkpoint) = &self.checkpoint {
            cfg.retrieval.checkpoint = Some(checkpoint.clone());
        }
        if let Some(snapshot) = &self.snapshot {
            cfg.retrieval.snapshot = Some(snapshot.clone());
        }
        if let Some(layer) = &self.layer {
            cfg.retrieval.layer = layer.parse()?;
        }
        if let Some(threshold) = self.threshold {
            cfg.retrieval.threshold = threshold;
        }
        if let Some(batch_size) = self.batch_size {
            cfg.retrieval.batch_size = batch_size;
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "c3d_retrieval",
    about = "Train a C3D classifier, then report embedding retrieval accuracy"
)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub common: ConfigArgs,
}

/// Check the backend flag against the features this binary was built with, then load config.
pub fn load_config(common: &ConfigArgs) -> anyhow::Result<PipelineConfig> {
    validate_backend_choice(common.backend)?;
    Ok(PipelineConfig::load(common.config.as_deref())?)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; the WGPU backend is used despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}
