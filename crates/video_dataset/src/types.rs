//! Core types, error definitions, and data structures for video_dataset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, VideoDatasetError>;

#[derive(Debug, Error)]
pub enum VideoDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid input {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },
    #[error("decode error at {path}: {msg}")]
    Decode { path: PathBuf, msg: String },
    #[error("data extraction failed for {path}: {source}")]
    DataExtraction {
        path: PathBuf,
        #[source]
        source: Box<VideoDatasetError>,
    },
    #[error("snapshot {path}: {reason}")]
    Snapshot { path: PathBuf, reason: String },
    #[error("invalid split: {0}")]
    Split(String),
    #[error("{0}")]
    Other(String),
}

impl VideoDatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VideoDatasetError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VideoDatasetError::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn snapshot(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        VideoDatasetError::Snapshot {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Frames, height and width of a clip; channels are always 3 (RGB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipShape {
    pub frames: usize,
    pub height: u32,
    pub width: u32,
}

impl ClipShape {
    pub const CHANNELS: usize = 3;

    pub fn frame_len(&self) -> usize {
        self.height as usize * self.width as usize * Self::CHANNELS
    }

    pub fn clip_len(&self) -> usize {
        self.frames * self.frame_len()
    }

    /// Bytes per clip, or `None` for an empty extent or a size that overflows.
    pub fn checked_clip_len(&self) -> Option<usize> {
        if self.frames == 0 || self.height == 0 || self.width == 0 {
            return None;
        }
        (self.height as usize)
            .checked_mul(self.width as usize)?
            .checked_mul(Self::CHANNELS)?
            .checked_mul(self.frames)
    }
}

/// An ordered run of equally sized RGB frames sampled from one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clip {
    pub shape: ClipShape,
    /// Pixels in `[frames, height, width, 3]` row-major order.
    pub data: Vec<u8>,
}

impl Clip {
    pub fn new(shape: ClipShape, data: Vec<u8>) -> DatasetResult<Self> {
        if data.len() != shape.clip_len() {
            return Err(VideoDatasetError::Other(format!(
                "clip buffer holds {} bytes, expected {} for {:?}",
                data.len(),
                shape.clip_len(),
                shape
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build a clip from frames that all share `width`x`height`.
    pub fn from_frames(frames: &[image::RgbImage], width: u32, height: u32) -> DatasetResult<Self> {
        let shape = ClipShape {
            frames: frames.len(),
            height,
            width,
        };
        let mut data = Vec::with_capacity(shape.clip_len());
        for (i, frame) in frames.iter().enumerate() {
            if frame.dimensions() != (width, height) {
                return Err(VideoDatasetError::Other(format!(
                    "frame {i} is {}x{}, expected {width}x{height}",
                    frame.width(),
                    frame.height()
                )));
            }
            data.extend_from_slice(frame.as_raw());
        }
        Self::new(shape, data)
    }

    pub fn frame(&self, index: usize) -> &[u8] {
        let len = self.shape.frame_len();
        &self.data[index * len..(index + 1) * len]
    }

    /// `[frames, height, width, channels]`.
    pub fn dims(&self) -> [usize; 4] {
        [
            self.shape.frames,
            self.shape.height as usize,
            self.shape.width as usize,
            ClipShape::CHANNELS,
        ]
    }
}

/// Every clip under a dataset root with its class label and source path.
#[derive(Debug, Clone, Default)]
pub struct LabeledDataset {
    pub clips: Vec<Clip>,
    pub labels: Vec<u32>,
    pub videos: Vec<PathBuf>,
    /// Class directory name -> label index.
    pub classes: BTreeMap<String, u32>,
}

impl LabeledDataset {
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Train/test partition of a `LabeledDataset`; the unit persisted as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitDataset {
    pub x_train: Vec<Clip>,
    pub y_train: Vec<u32>,
    pub x_test: Vec<Clip>,
    pub y_test: Vec<u32>,
    pub classes: BTreeMap<String, u32>,
    /// Source paths of the full, unsplit dataset in build order.
    pub videos: Vec<PathBuf>,
}

impl SplitDataset {
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn clip_shape(&self) -> Option<ClipShape> {
        self.x_train
            .first()
            .or_else(|| self.x_test.first())
            .map(|c| c.shape)
    }

    /// `[samples, frames, height, width, channels]` of `x_train`.
    pub fn train_dims(&self) -> [usize; 5] {
        stack_dims(&self.x_train, self.clip_shape())
    }

    /// `[samples, frames, height, width, channels]` of `x_test`.
    pub fn test_dims(&self) -> [usize; 5] {
        stack_dims(&self.x_test, self.clip_shape())
    }
}

fn stack_dims(clips: &[Clip], shape: Option<ClipShape>) -> [usize; 5] {
    let shape = shape.unwrap_or(ClipShape {
        frames: 0,
        height: 0,
        width: 0,
    });
    [
        clips.len(),
        shape.frames,
        shape.height as usize,
        shape.width as usize,
        ClipShape::CHANNELS,
    ]
}
