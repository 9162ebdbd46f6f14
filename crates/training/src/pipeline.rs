//! Train, then evaluate retrieval with the best checkpoint of that run.

use crate::config::PipelineConfig;
use crate::error::{TrainError, TrainResult};
use crate::retrieval::{run_eval, RetrievalReport};
use crate::train::{run_train, TrainingReport};

pub fn run_pipeline(cfg: &PipelineConfig) -> TrainResult<(TrainingReport, RetrievalReport)> {
    let training = run_train(cfg)?;
    let checkpoint = cfg
        .retrieval
        .checkpoint
        .clone()
        .or_else(|| training.best_checkpoint.clone())
        .ok_or_else(|| {
            TrainError::Other(format!(
                "no checkpoint saved in {}",
                training.run_dir.display()
            ))
        })?;
    let snapshot = cfg
        .retrieval
        .snapshot
        .clone()
        .unwrap_or_else(|| training.snapshot.clone());
    let retrieval = run_eval(cfg, &checkpoint, &snapshot)?;
    Ok((training, retrieval))
}
