//! Pipeline configuration: defaults, optional TOML file, CLI overrides.
//!
//! Every key in the file is optional; missing keys keep their defaults.
//!
//! ```toml
//! [dataset]
//! root = "data/KTH/train"
//! snapshot = "runs/2024_01_01_10_00/data.snap"
//!
//! [training]
//! epochs = 50
//! batch_size = 32
//!
//! [retrieval]
//! layer = "fc7"
//! threshold = 0.9
//! ```

use crate::error::{TrainError, TrainResult};
use models::{C3dConfig, C3dLayer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use video_dataset::{SamplerConfig, DEFAULT_SNAPSHOT_NAME};

pub const DEFAULT_CONFIG_NAME: &str = "c3d-retrieval.toml";
pub const CONFIG_ENV: &str = "C3D_RETRIEVAL_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetConfig {
    /// Root with one subdirectory of videos per class.
    pub root: PathBuf,
    /// Load this snapshot instead of sampling videos.
    pub snapshot: Option<PathBuf>,
    /// File name for a freshly built snapshot inside the run directory.
    pub snapshot_name: String,
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    pub stride_margin: u64,
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/KTH/train"),
            snapshot: None,
            snapshot_name: DEFAULT_SNAPSHOT_NAME.to_string(),
            frames: 16,
            width: 224,
            height: 224,
            stride_margin: 5,
            test_fraction: 0.05,
            split_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Parent of the timestamped run directories.
    pub runs_root: PathBuf,
    /// Resume from this checkpoint instead of a fresh model.
    pub pretrained: Option<PathBuf>,
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of the training partition held out for validation.
    pub validation_split: f64,
    pub learning_rate: f64,
    pub shuffle_seed: u64,
    pub checkpoint_prefix: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            runs_root: PathBuf::from("."),
            pretrained: None,
            epochs: 50,
            batch_size: 32,
            validation_split: 0.05,
            learning_rate: 1e-3,
            shuffle_seed: 42,
            checkpoint_prefix: "C3D".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// Checkpoint to evaluate; defaults to the best checkpoint of the run just trained.
    pub checkpoint: Option<PathBuf>,
    /// Snapshot to evaluate on; defaults to the training snapshot.
    pub snapshot: Option<PathBuf>,
    pub layer: C3dLayer,
    /// Items with cosine similarity strictly above this are retrieved.
    pub threshold: f32,
    pub batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            checkpoint: None,
            snapshot: None,
            layer: C3dLayer::Fc7,
            threshold: 0.9,
            batch_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub stage_widths: [usize; 5],
    pub fc_hidden: usize,
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let c3d = C3dConfig::default();
        Self {
            stage_widths: c3d.stage_widths,
            fc_hidden: c3d.fc_hidden,
            dropout: c3d.dropout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    pub retrieval: RetrievalConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    dataset: Option<DatasetSection>,
    training: Option<TrainingSection>,
    retrieval: Option<RetrievalSection>,
    model: Option<ModelSection>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DatasetSection {
    root: Option<String>,
    snapshot: Option<String>,
    snapshot_name: Option<String>,
    frames: Option<usize>,
    width: Option<u32>,
    height: Option<u32>,
    stride_margin: Option<u64>,
    test_fraction: Option<f64>,
    split_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrainingSection {
    runs_root: Option<String>,
    pretrained: Option<String>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    validation_split: Option<f64>,
    learning_rate: Option<f64>,
    shuffle_seed: Option<u64>,
    checkpoint_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RetrievalSection {
    checkpoint: Option<String>,
    snapshot: Option<String>,
    layer: Option<String>,
    threshold: Option<f32>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelSection {
    stage_widths: Option<[usize; 5]>,
    fc_hidden: Option<usize>,
    dropout: Option<f64>,
}

impl PipelineConfig {
    /// Resolve the config file (`explicit`, then `$C3D_RETRIEVAL_CONFIG`, then
    /// `./c3d-retrieval.toml`) and read it; no file at all means defaults.
    pub fn load(explicit: Option<&Path>) -> TrainResult<Self> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_path(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_NAME);
        if local.exists() {
            return Self::from_path(local);
        }
        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> TrainResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| TrainError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let cfg = Self::from_toml_str(&raw).map_err(|e| TrainError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> TrainResult<Self> {
        let file: PipelineConfigFile =
            toml::from_str(raw).map_err(|e| TrainError::InvalidConfig(e.to_string()))?;
        Self::from_file(file)
    }

    fn from_file(file: PipelineConfigFile) -> TrainResult<Self> {
        let dataset = file.dataset.unwrap_or_default();
        let training = file.training.unwrap_or_default();
        let retrieval = file.retrieval.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let defaults = PipelineConfig::default();

        let layer = match retrieval.layer {
            Some(name) => name.parse::<C3dLayer>()?,
            None => defaults.retrieval.layer,
        };

        Ok(PipelineConfig {
            dataset: DatasetConfig {
                root: dataset
                    .root
                    .map(|v| expand_path(&v))
                    .unwrap_or(defaults.dataset.root),
                snapshot: dataset.snapshot.map(|v| expand_path(&v)),
                snapshot_name: dataset
                    .snapshot_name
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(defaults.dataset.snapshot_name),
                frames: dataset.frames.unwrap_or(defaults.dataset.frames),
                width: dataset.width.unwrap_or(defaults.dataset.width),
                height: dataset.height.unwrap_or(defaults.dataset.height),
                stride_margin: dataset
                    .stride_margin
                    .unwrap_or(defaults.dataset.stride_margin),
                test_fraction: dataset
                    .test_fraction
                    .unwrap_or(defaults.dataset.test_fraction),
                split_seed: dataset.split_seed.unwrap_or(defaults.dataset.split_seed),
            },
            training: TrainingConfig {
                runs_root: training
                    .runs_root
                    .map(|v| expand_path(&v))
                    .unwrap_or(defaults.training.runs_root),
                pretrained: training.pretrained.map(|v| expand_path(&v)),
                epochs: training.epochs.unwrap_or(defaults.training.epochs),
                batch_size: training.batch_size.unwrap_or(defaults.training.batch_size),
                validation_split: training
                    .validation_split
                    .unwrap_or(defaults.training.validation_split),
                learning_rate: training
                    .learning_rate
                    .unwrap_or(defaults.training.learning_rate),
                shuffle_seed: training
                    .shuffle_seed
                    .unwrap_or(defaults.training.shuffle_seed),
                checkpoint_prefix: training
                    .checkpoint_prefix
                    .unwrap_or(defaults.training.checkpoint_prefix),
            },
            retrieval: RetrievalConfig {
                checkpoint: retrieval.checkpoint.map(|v| expand_path(&v)),
                snapshot: retrieval.snapshot.map(|v| expand_path(&v)),
                layer,
                threshold: retrieval.threshold.unwrap_or(defaults.retrieval.threshold),
                batch_size: retrieval
                    .batch_size
                    .unwrap_or(defaults.retrieval.batch_size),
            },
            model: ModelConfig {
                stage_widths: model.stage_widths.unwrap_or(defaults.model.stage_widths),
                fc_hidden: model.fc_hidden.unwrap_or(defaults.model.fc_hidden),
                dropout: model.dropout.unwrap_or(defaults.model.dropout),
            },
        })
    }

    pub fn validate(&self) -> TrainResult<()> {
        let d = &self.dataset;
        if d.frames == 0 || d.width == 0 || d.height == 0 {
            return Err(TrainError::InvalidConfig(format!(
                "dataset clip shape must be non-zero, got {} frames of {}x{}",
                d.frames, d.width, d.height
            )));
        }
        if !(d.test_fraction > 0.0 && d.test_fraction < 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "dataset.test_fraction must be in (0, 1), got {}",
                d.test_fraction
            )));
        }
        let t = &self.training;
        if t.epochs == 0 || t.batch_size == 0 {
            return Err(TrainError::InvalidConfig(
                "training.epochs and training.batch_size must be non-zero".to_string(),
            ));
        }
        if !(t.validation_split > 0.0 && t.validation_split < 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "training.validation_split must be in (0, 1), got {}",
                t.validation_split
            )));
        }
        if !(t.learning_rate.is_finite() && t.learning_rate > 0.0) {
            return Err(TrainError::InvalidConfig(format!(
                "training.learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if t.checkpoint_prefix.trim().is_empty() {
            return Err(TrainError::InvalidConfig(
                "training.checkpoint_prefix is empty".to_string(),
            ));
        }
        let r = &self.retrieval;
        if !(-1.0..=1.0).contains(&r.threshold) {
            return Err(TrainError::InvalidConfig(format!(
                "retrieval.threshold must be in [-1, 1], got {}",
                r.threshold
            )));
        }
        if r.batch_size == 0 {
            return Err(TrainError::InvalidConfig(
                "retrieval.batch_size must be non-zero".to_string(),
            ));
        }
        self.c3d_config(1).validate()?;
        Ok(())
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            frames: self.dataset.frames,
            width: self.dataset.width,
            height: self.dataset.height,
            stride_margin: self.dataset.stride_margin,
        }
    }

    /// Network shape for clips of the configured size and `num_classes` outputs.
    pub fn c3d_config(&self, num_classes: usize) -> C3dConfig {
        C3dConfig {
            frames: self.dataset.frames,
            height: self.dataset.height as usize,
            width: self.dataset.width as usize,
            channels: 3,
            num_classes,
            stage_widths: self.model.stage_widths,
            fc_hidden: self.model.fc_hidden,
            dropout: self.model.dropout,
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(raw)
}
