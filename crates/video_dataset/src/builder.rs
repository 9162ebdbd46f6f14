//! Walking a class-per-directory video tree into a labeled dataset.

use crate::decode::VideoDecoder;
use crate::sampler::FrameSampler;
use crate::types::{DatasetResult, LabeledDataset, VideoDatasetError};
use std::fs;
use std::path::{Path, PathBuf};

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with('.'))
}

fn sorted_entries(dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| VideoDatasetError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VideoDatasetError::io(dir, e))?;
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}

/// Class directories under `root`, sorted by name; index in the result is the label.
pub fn index_classes(root: &Path) -> DatasetResult<Vec<(String, PathBuf)>> {
    let mut classes = Vec::new();
    for path in sorted_entries(root)? {
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            return Err(VideoDatasetError::invalid(
                &path,
                "class directory name is not valid UTF-8",
            ));
        };
        classes.push((name.to_string(), path.clone()));
    }
    if classes.is_empty() {
        return Err(VideoDatasetError::invalid(root, "no class directories"));
    }
    Ok(classes)
}

/// Video files of one class directory, sorted by path.
pub fn index_videos(class_dir: &Path) -> DatasetResult<Vec<PathBuf>> {
    sorted_entries(class_dir)
}

/// Builds a `LabeledDataset` from `<root>/<class>/<video>` trees.
#[derive(Debug, Clone)]
pub struct DatasetBuilder<D> {
    root: PathBuf,
    sampler: FrameSampler<D>,
}

impl<D: VideoDecoder> DatasetBuilder<D> {
    pub fn new(root: impl Into<PathBuf>, sampler: FrameSampler<D>) -> Self {
        Self {
            root: root.into(),
            sampler,
        }
    }

    /// Sample every video under the root. The first failing file aborts the build.
    pub fn build(&self) -> DatasetResult<LabeledDataset> {
        let classes = index_classes(&self.root)?;
        let mut dataset = LabeledDataset::default();
        for (label, (name, dir)) in classes.iter().enumerate() {
            let label = label as u32;
            dataset.classes.insert(name.clone(), label);
            let videos = index_videos(dir)?;
            tracing::info!(class = %name, label, videos = videos.len(), "sampling class");
            for video in videos {
                let clip = self.sampler.sample(&video).map_err(|e| {
                    VideoDatasetError::DataExtraction {
                        path: video.clone(),
                        source: Box::new(e),
                    }
                })?;
                dataset.clips.push(clip);
                dataset.labels.push(label);
                dataset.videos.push(video);
            }
        }
        tracing::info!(
            root = %self.root.display(),
            clips = dataset.len(),
            classes = dataset.num_classes(),
            "dataset built"
        );
        Ok(dataset)
    }
}
