//! Video clip datasets for 3D-convolutional training.
//!
//! This crate provides:
//! - Video decoding behind the `VideoDecoder` trait (ffmpeg CLI by default, libav with `ffmpeg`)
//! - Equidistant frame sampling into fixed-size clips
//! - Class-per-directory dataset building with deterministic labels
//! - Seeded train/test splitting
//! - Single-file dataset snapshots
//! - Burn tensor batching (`burn-runtime` feature)

pub mod builder;
pub mod decode;
#[cfg(feature = "ffmpeg")]
pub mod libav;
pub mod sampler;
pub mod snapshot;
pub mod splits;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use builder::{index_classes, index_videos, DatasetBuilder};
pub use decode::{default_decoder, DefaultDecoder, FfmpegDecoder, FrameStream, VideoDecoder};
#[cfg(feature = "ffmpeg")]
pub use libav::LibavDecoder;
pub use sampler::{FrameSampler, SamplerConfig};
pub use snapshot::{load_or_build, with_snapshot_extension, DEFAULT_SNAPSHOT_NAME};
pub use splits::{split_indices, test_count, train_test_split};
pub use types::*;

#[cfg(feature = "burn-runtime")]
pub use batch::{clips_to_tensor, collate, labels_to_tensor, ClipBatch};
