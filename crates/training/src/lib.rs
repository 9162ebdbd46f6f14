//! C3D action classifier training and embedding retrieval evaluation.
//!
//! - `config`: pipeline options (defaults, TOML file, CLI overrides)
//! - `dataset`: snapshot-or-sample dataset preparation, validation partition
//! - `run`: timestamped run directories and the best-checkpoint policy
//! - `train`: Burn fit loop with Adam and sparse categorical cross-entropy
//! - `retrieval`: cosine-similarity retrieval over dense-layer embeddings

#![recursion_limit = "256"]

pub mod config;
pub mod dataset;
pub mod error;
pub mod pipeline;
pub mod retrieval;
pub mod run;
pub mod train;
pub mod util;

pub use config::PipelineConfig;
pub use dataset::{prepare_dataset, prepare_dataset_with, validation_partition, PreparedDataset};
pub use error::{TrainError, TrainResult};
pub use pipeline::run_pipeline;
pub use retrieval::{
    cosine_similarity_matrix, evaluate_retrieval, run_eval, RetrievalOutcome, RetrievalReport,
};
pub use run::{checkpoint_file_name, CheckpointMonitor, RunDir};
pub use train::{fit, load_c3d, run_train, train_in, EpochMetrics, FitOptions, TrainingReport};
pub use util::{EvalArgs, PipelineArgs, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
