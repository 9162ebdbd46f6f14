//! Tiny end-to-end runs on the NdArray backend over an in-memory dataset.

use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use training::config::ModelConfig;
use training::run::MODEL_CONFIG_NAME;
use training::{
    checkpoint_file_name, load_c3d, prepare_dataset_with, run_eval, run_pipeline, run_train,
    train_in, PipelineConfig, PreparedDataset, RunDir, TrainBackend, TrainError,
};
use video_dataset::{
    snapshot, Clip, ClipShape, DatasetResult, FrameStream, SplitDataset, VideoDatasetError,
    VideoDecoder, DEFAULT_SNAPSHOT_NAME,
};

const SHAPE: ClipShape = ClipShape {
    frames: 4,
    height: 8,
    width: 8,
};

fn clip(label: u32, seed: usize) -> Clip {
    let base = if label == 0 { 20 } else { 200 };
    let data = (0..SHAPE.clip_len())
        .map(|i| (base + (i * 7 + seed * 13) % 40) as u8)
        .collect();
    Clip::new(SHAPE, data).unwrap()
}

fn dataset() -> SplitDataset {
    let y_train: Vec<u32> = (0..12).map(|i| (i % 2) as u32).collect();
    let x_train = y_train
        .iter()
        .enumerate()
        .map(|(i, l)| clip(*l, i))
        .collect();
    let y_test = vec![0, 1];
    let x_test = vec![clip(0, 100), clip(1, 101)];
    let mut classes = BTreeMap::new();
    classes.insert("boxing".to_string(), 0);
    classes.insert("walking".to_string(), 1);
    let videos = (0..14)
        .map(|i| PathBuf::from(format!("videos/clip_{i:02}.avi")))
        .collect();
    SplitDataset {
        x_train,
        y_train,
        x_test,
        y_test,
        classes,
        videos,
    }
}

/// Frames of a flat color: the video file's first byte picks the brightness.
struct FlatStream {
    total: u64,
    next: u64,
    level: u8,
}

impl FrameStream for FlatStream {
    fn frame_count(&self) -> u64 {
        self.total
    }

    fn next_frame(&mut self) -> DatasetResult<Option<RgbImage>> {
        if self.next >= self.total {
            return Ok(None);
        }
        self.next += 1;
        let shade = self.level.wrapping_add(self.next as u8);
        Ok(Some(RgbImage::from_pixel(16, 12, Rgb([shade, shade, 0]))))
    }
}

struct FlatDecoder;

impl VideoDecoder for FlatDecoder {
    fn open(&self, path: &Path) -> DatasetResult<Box<dyn FrameStream>> {
        let raw = fs::read(path).map_err(|e| VideoDatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Box::new(FlatStream {
            total: 12,
            next: 0,
            level: raw.first().copied().unwrap_or(0),
        }))
    }
}

fn tiny_config(root: &Path) -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.dataset.frames = SHAPE.frames;
    cfg.dataset.width = SHAPE.width;
    cfg.dataset.height = SHAPE.height;
    cfg.training.runs_root = root.join("runs");
    cfg.training.epochs = 3;
    cfg.training.batch_size = 4;
    cfg.training.validation_split = 0.25;
    cfg.retrieval.batch_size = 5;
    cfg.model = ModelConfig {
        stage_widths: [2, 2, 2, 2, 2],
        fc_hidden: 8,
        dropout: 0.0,
    };
    cfg
}

fn prepared(root: &Path) -> anyhow::Result<PreparedDataset> {
    let data = dataset();
    let path = root.join("data.snap");
    snapshot::save(&data, &path)?;
    Ok(PreparedDataset {
        data,
        snapshot: path,
    })
}

fn saved_checkpoints(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if name.ends_with(".bin") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[test]
fn checkpoints_follow_validation_improvements() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = tiny_config(tmp.path());
    let run = RunDir::create(&cfg.training.runs_root, "2024_01_01_00_00")?;
    let report = train_in(&cfg, &run, prepared(tmp.path())?)?;

    assert_eq!(report.history.len(), 3);
    assert_eq!(
        report.history.iter().map(|m| m.epoch).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(report.history[0].checkpoint_saved);

    let mut best = f32::NEG_INFINITY;
    let mut expected = Vec::new();
    for m in &report.history {
        assert!((0.0..=1.0).contains(&m.accuracy));
        assert!((0.0..=1.0).contains(&m.val_accuracy));
        assert!(m.loss.is_finite() && m.val_loss.is_finite());
        assert_eq!(m.checkpoint_saved, m.val_accuracy > best);
        if m.checkpoint_saved {
            best = m.val_accuracy;
            expected.push(checkpoint_file_name("C3D", m.epoch, m.val_accuracy));
        }
    }
    expected.sort();
    assert_eq!(saved_checkpoints(run.path())?, expected);

    let best_path = report.best_checkpoint.clone().unwrap();
    assert!(best_path.is_file());
    assert!(run.path().join(MODEL_CONFIG_NAME).is_file());
    assert_eq!(report.model_config.num_classes, 2);
    Ok(())
}

#[test]
fn best_checkpoint_reloads_for_retrieval() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = tiny_config(tmp.path());
    let run = RunDir::create(&cfg.training.runs_root, "run")?;
    let prep = prepared(tmp.path())?;
    let snap = prep.snapshot.clone();
    let report = train_in(&cfg, &run, prep)?;
    let best = report.best_checkpoint.unwrap();

    let device = Default::default();
    load_c3d::<TrainBackend>(&best, &report.model_config, &device)?;

    let retrieval = run_eval(&cfg, &best, &snap)?;
    assert_eq!(retrieval.queries, 12);
    assert_eq!(retrieval.retrieved + retrieval.skipped, 12);
    if let Some(acc) = retrieval.mean_accuracy {
        assert!((0.0..=1.0).contains(&acc));
    }
    Ok(())
}

#[test]
fn incompatible_checkpoints_are_model_load_errors() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = tiny_config(tmp.path());
    let run = RunDir::create(&cfg.training.runs_root, "run")?;
    let report = train_in(&cfg, &run, prepared(tmp.path())?)?;
    let best = report.best_checkpoint.unwrap();

    // Loading directly with a wider head than was saved.
    let mut wider = report.model_config.clone();
    wider.fc_hidden = 16;
    let device = Default::default();
    let err = load_c3d::<TrainBackend>(&best, &wider, &device).unwrap_err();
    assert!(matches!(err, TrainError::ModelLoad { .. }));

    // Resuming a run whose model.json disagrees with the requested model.
    let mut resume = cfg.clone();
    resume.model.fc_hidden = 16;
    resume.training.pretrained = Some(best);
    let run2 = RunDir::create(&cfg.training.runs_root, "run2")?;
    let err = train_in(&resume, &run2, prepared(tmp.path())?).unwrap_err();
    assert!(matches!(err, TrainError::ModelLoad { .. }));

    // Missing pretrained file.
    let mut missing = cfg.clone();
    missing.training.pretrained = Some(tmp.path().join("nope.bin"));
    let run3 = RunDir::create(&cfg.training.runs_root, "run3")?;
    let err = train_in(&missing, &run3, prepared(tmp.path())?).unwrap_err();
    assert!(matches!(err, TrainError::ModelLoad { .. }));
    Ok(())
}

#[test]
fn resume_from_compatible_checkpoint() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = tiny_config(tmp.path());
    cfg.training.epochs = 1;
    let run = RunDir::create(&cfg.training.runs_root, "first")?;
    let first = train_in(&cfg, &run, prepared(tmp.path())?)?;

    cfg.training.pretrained = first.best_checkpoint;
    let run2 = RunDir::create(&cfg.training.runs_root, "second")?;
    let second = train_in(&cfg, &run2, prepared(tmp.path())?)?;
    assert_eq!(second.history.len(), 1);
    assert!(second.best_checkpoint.is_some());
    Ok(())
}

#[test]
fn run_train_uses_a_fresh_timestamped_directory() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = tiny_config(tmp.path());
    cfg.training.epochs = 1;
    let snap = tmp.path().join("kth.snap");
    snapshot::save(&dataset(), &snap)?;
    cfg.dataset.snapshot = Some(snap.clone());

    let report = run_train(&cfg)?;
    assert_eq!(report.run_dir.parent(), Some(cfg.training.runs_root.as_path()));
    assert_eq!(report.snapshot, snap);
    // A loaded snapshot is not copied into the run directory.
    assert!(!report.run_dir.join("data.snap").exists());

    let name = report.run_dir.file_name().unwrap().to_string_lossy().into_owned();
    let err = RunDir::create(&cfg.training.runs_root, &name).unwrap_err();
    assert!(matches!(err, TrainError::RunAlreadyExists { .. }));
    Ok(())
}

#[test]
fn pipeline_trains_then_reports_retrieval() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = tiny_config(tmp.path());
    cfg.training.epochs = 2;
    let snap = tmp.path().join("kth.snap");
    snapshot::save(&dataset(), &snap)?;
    cfg.dataset.snapshot = Some(snap);
    cfg.retrieval.threshold = 0.5;

    let (training, retrieval) = run_pipeline(&cfg)?;
    assert!(training.best_checkpoint.is_some());
    assert_eq!(retrieval.queries, 12);
    assert!((retrieval.threshold - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn fresh_dataset_is_sampled_and_saved_in_the_run_directory() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = tiny_config(tmp.path());
    let root = tmp.path().join("videos");
    for (class, level) in [("boxing", 10u8), ("walking", 180u8)] {
        let dir = root.join(class);
        fs::create_dir_all(&dir)?;
        for i in 0..4u8 {
            fs::write(dir.join(format!("{class}_{i:02}.avi")), [level + i * 5])?;
        }
    }
    cfg.dataset.root = root;
    cfg.dataset.snapshot = None;
    cfg.dataset.stride_margin = 1;
    cfg.dataset.test_fraction = 0.25;

    let run = RunDir::create(&cfg.training.runs_root, "fresh")?;
    let prep = prepare_dataset_with(&cfg, run.path(), FlatDecoder)?;

    assert_eq!(prep.snapshot, run.path().join(DEFAULT_SNAPSHOT_NAME));
    assert!(prep.snapshot.is_file());
    assert_eq!(prep.data.x_train.len() + prep.data.x_test.len(), 8);
    assert_eq!(prep.data.classes.len(), 2);
    assert!(prep.data.x_train.iter().all(|c| c.shape == SHAPE));
    assert_eq!(snapshot::load(&prep.snapshot)?, prep.data);
    Ok(())
}
