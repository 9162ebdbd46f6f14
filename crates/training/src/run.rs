//! Per-run output directories and the best-checkpoint policy.

use crate::error::{TrainError, TrainResult};
use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File written next to checkpoints describing the network shape.
pub const MODEL_CONFIG_NAME: &str = "model.json";

/// Minute-granular run name, e.g. `2024_03_09_17_42`.
pub fn run_name(at: &DateTime<Local>) -> String {
    at.format("%Y_%m_%d_%H_%M").to_string()
}

/// `<prefix>_E<epoch>_VA<val_accuracy>.bin`, epoch 1-based and zero-padded.
pub fn checkpoint_file_name(prefix: &str, epoch: usize, val_accuracy: f32) -> String {
    format!("{prefix}_E{epoch:02}_VA{val_accuracy:.2}.bin")
}

#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
}

impl RunDir {
    /// Create `<root>/<name>`. The run directory itself must not exist yet.
    pub fn create(root: &Path, name: &str) -> TrainResult<Self> {
        fs::create_dir_all(root).map_err(|e| TrainError::io(root, e))?;
        let path = root.join(name);
        match fs::create_dir(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "created run directory");
                Ok(Self { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(TrainError::RunAlreadyExists { path })
            }
            Err(e) => Err(TrainError::io(&path, e)),
        }
    }

    /// Create a run directory named after the current local time.
    pub fn create_now(root: &Path) -> TrainResult<Self> {
        Self::create(root, &run_name(&Local::now()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint_path(&self, prefix: &str, epoch: usize, val_accuracy: f32) -> PathBuf {
        self.path.join(checkpoint_file_name(prefix, epoch, val_accuracy))
    }

    pub fn model_config_path(&self) -> PathBuf {
        self.path.join(MODEL_CONFIG_NAME)
    }
}

/// Tracks the best validation accuracy seen in a run.
#[derive(Debug, Clone, Default)]
pub struct CheckpointMonitor {
    best: Option<f32>,
}

impl CheckpointMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Record an epoch's validation accuracy; true when it strictly beats every earlier one.
    pub fn observe(&mut self, val_accuracy: f32) -> bool {
        if val_accuracy.is_nan() {
            return false;
        }
        match self.best {
            Some(best) if val_accuracy <= best => false,
            _ => {
                self.best = Some(val_accuracy);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_name_is_minute_granular() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 17, 42, 59).unwrap();
        assert_eq!(run_name(&at), "2024_03_09_17_42");
    }

    #[test]
    fn checkpoint_names_encode_epoch_and_accuracy() {
        assert_eq!(checkpoint_file_name("C3D", 3, 0.8666), "C3D_E03_VA0.87.bin");
        assert_eq!(checkpoint_file_name("C3D", 12, 1.0), "C3D_E12_VA1.00.bin");
    }

    #[test]
    fn existing_run_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDir::create(tmp.path(), "2024_01_01_00_00").unwrap();
        assert!(run.path().is_dir());
        let err = RunDir::create(tmp.path(), "2024_01_01_00_00").unwrap_err();
        assert!(matches!(err, TrainError::RunAlreadyExists { .. }));
    }

    #[test]
    fn missing_runs_root_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("runs").join("kth");
        let run = RunDir::create(&root, "r1").unwrap();
        assert_eq!(run.model_config_path(), root.join("r1").join(MODEL_CONFIG_NAME));
    }

    #[test]
    fn monitor_saves_only_strict_improvements() {
        let mut m = CheckpointMonitor::new();
        let seq = [0.3, 0.3, 0.5, 0.4, f32::NAN, 0.5, 0.7];
        let saved: Vec<bool> = seq.iter().map(|v| m.observe(*v)).collect();
        assert_eq!(saved, vec![true, false, true, false, false, false, true]);
        assert_eq!(m.best(), Some(0.7));
    }

    #[test]
    fn first_value_always_saves() {
        let mut m = CheckpointMonitor::new();
        assert!(m.observe(0.0));
    }
}
