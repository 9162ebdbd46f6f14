//! Burn tensors from clips and labels.

use crate::types::{Clip, ClipShape, DatasetResult, VideoDatasetError};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

pub struct ClipBatch<B: Backend> {
    /// `[batch, 3, frames, height, width]`, pixels scaled to `[0, 1]`.
    pub clips: Tensor<B, 5>,
    /// `[batch]` class indices.
    pub labels: Tensor<B, 1, Int>,
}

/// Stack clips into a channels-first 5D tensor.
pub fn clips_to_tensor<B: Backend>(clips: &[&Clip], device: &B::Device) -> DatasetResult<Tensor<B, 5>> {
    let first = clips
        .first()
        .ok_or_else(|| VideoDatasetError::Other("cannot batch zero clips".to_string()))?;
    let shape = first.shape;
    let (frames, height, width) = (shape.frames, shape.height as usize, shape.width as usize);
    let pixels = height * width;
    let mut buf: Vec<f32> = Vec::with_capacity(clips.len() * shape.clip_len());
    for clip in clips {
        if clip.shape != shape {
            return Err(VideoDatasetError::Other(format!(
                "clip shapes differ within batch: {:?} vs {:?}",
                clip.shape, shape
            )));
        }
        // NDHWC bytes -> CDHW floats.
        for c in 0..ClipShape::CHANNELS {
            for t in 0..frames {
                let frame = clip.frame(t);
                for p in 0..pixels {
                    buf.push(frame[p * ClipShape::CHANNELS + c] as f32 / 255.0);
                }
            }
        }
    }
    Ok(Tensor::<B, 5>::from_data(
        TensorData::new(buf, [clips.len(), ClipShape::CHANNELS, frames, height, width]),
        device,
    ))
}

pub fn labels_to_tensor<B: Backend>(labels: &[u32], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = labels.iter().map(|l| *l as i64).collect();
    Tensor::<B, 1, Int>::from_data(TensorData::new(values, [labels.len()]), device)
}

/// Gather `indices` from parallel clip/label slices into one batch.
pub fn collate<B: Backend>(
    clips: &[Clip],
    labels: &[u32],
    indices: &[usize],
    device: &B::Device,
) -> DatasetResult<ClipBatch<B>> {
    if clips.len() != labels.len() {
        return Err(VideoDatasetError::Other(format!(
            "{} clips but {} labels",
            clips.len(),
            labels.len()
        )));
    }
    let mut picked = Vec::with_capacity(indices.len());
    let mut picked_labels = Vec::with_capacity(indices.len());
    for &i in indices {
        let clip = clips.get(i).ok_or_else(|| {
            VideoDatasetError::Other(format!("sample index {i} out of range ({})", clips.len()))
        })?;
        picked.push(clip);
        picked_labels.push(labels[i]);
    }
    Ok(ClipBatch {
        clips: clips_to_tensor(&picked, device)?,
        labels: labels_to_tensor(&picked_labels, device),
    })
}
