//! Equidistant frame sampling.

use crate::decode::VideoDecoder;
use crate::types::{Clip, DatasetResult, VideoDatasetError};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Frames kept per clip.
    pub frames: usize,
    pub width: u32,
    pub height: u32,
    /// Subtracted from `total / frames` so sampling finishes before the last frames.
    pub stride_margin: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            frames: 16,
            width: 224,
            height: 224,
            stride_margin: 5,
        }
    }
}

impl SamplerConfig {
    /// Sampling stride for a video of `total_frames`, or `None` if it would be < 1.
    pub fn stride(&self, total_frames: u64) -> Option<u64> {
        if self.frames == 0 {
            return None;
        }
        let per_slot = total_frames / self.frames as u64;
        per_slot
            .checked_sub(self.stride_margin)
            .filter(|stride| *stride > 0)
    }
}

/// Samples a fixed number of resized frames from each video.
#[derive(Debug, Clone)]
pub struct FrameSampler<D> {
    cfg: SamplerConfig,
    decoder: D,
}

impl<D: VideoDecoder> FrameSampler<D> {
    pub fn new(cfg: SamplerConfig, decoder: D) -> Self {
        Self { cfg, decoder }
    }

    /// Keep every `stride`-th frame (1-based) until `frames` are collected.
    ///
    /// Videos too short for a positive stride, and streams that end before enough
    /// frames are kept, are rejected with `InvalidInput`.
    pub fn sample(&self, path: &Path) -> DatasetResult<Clip> {
        let mut stream = self.decoder.open(path)?;
        let total = stream.frame_count();
        let stride = self.cfg.stride(total).ok_or_else(|| {
            VideoDatasetError::invalid(
                path,
                format!(
                    "{total} frames is too short to sample {} frames (stride {} - {} < 1)",
                    self.cfg.frames,
                    total / self.cfg.frames.max(1) as u64,
                    self.cfg.stride_margin
                ),
            )
        })?;

        let mut kept = Vec::with_capacity(self.cfg.frames);
        let mut read_count: u64 = 1;
        while let Some(frame) = stream.next_frame()? {
            if read_count % stride == 0 {
                let resized = if frame.dimensions() == (self.cfg.width, self.cfg.height) {
                    frame
                } else {
                    image::imageops::resize(
                        &frame,
                        self.cfg.width,
                        self.cfg.height,
                        FilterType::Triangle,
                    )
                };
                kept.push(resized);
            }
            read_count += 1;
            if kept.len() == self.cfg.frames {
                break;
            }
        }

        if kept.len() < self.cfg.frames {
            return Err(VideoDatasetError::invalid(
                path,
                format!(
                    "short clip: stream ended after {} frames with {} of {} sampled",
                    read_count - 1,
                    kept.len(),
                    self.cfg.frames
                ),
            ));
        }
        Clip::from_frames(&kept, self.cfg.width, self.cfg.height)
    }
}
