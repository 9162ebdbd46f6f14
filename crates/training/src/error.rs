use models::ModelError;
use std::path::{Path, PathBuf};
use thiserror::Error;
use video_dataset::VideoDatasetError;

pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("run directory {path} already exists")]
    RunAlreadyExists { path: PathBuf },
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error("failed to save checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },
    #[error("config file {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Dataset(#[from] VideoDatasetError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("{0}")]
    Other(String),
}

impl TrainError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        TrainError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn model_load(path: &Path, reason: impl Into<String>) -> Self {
        TrainError::ModelLoad {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
