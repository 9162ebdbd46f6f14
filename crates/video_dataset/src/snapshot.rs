//! Single-file snapshots of a split dataset.
//!
//! Layout (little-endian):
//! `C3DS` magic, `u32` format version, `u64` header length, JSON header, then the raw
//! `u8` pixels of `x_train` followed by `x_test`.

use crate::splits::train_test_split;
use crate::types::{
    Clip, ClipShape, DatasetResult, LabeledDataset, SplitDataset, VideoDatasetError,
};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_MAGIC: &[u8; 4] = b"C3DS";
pub const SNAPSHOT_VERSION: u32 = 1;
pub const SNAPSHOT_EXTENSION: &str = "snap";
pub const DEFAULT_SNAPSHOT_NAME: &str = "data.snap";

const PREFIX_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    shape: ClipShape,
    train_samples: usize,
    test_samples: usize,
    y_train: Vec<u32>,
    y_test: Vec<u32>,
    classes: BTreeMap<String, u32>,
    /// Source paths as UTF-8 strings.
    videos: Vec<String>,
    /// Hex-encoded SHA256 of the pixel payload.
    payload_sha256: String,
}

/// Append the snapshot extension unless the name already carries it.
pub fn with_snapshot_extension(path: &Path) -> PathBuf {
    if path.extension().and_then(|s| s.to_str()) == Some(SNAPSHOT_EXTENSION) {
        return path.to_path_buf();
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(SNAPSHOT_EXTENSION);
    PathBuf::from(name)
}

fn payload_digest<'a>(clips: impl Iterator<Item = &'a Clip>) -> String {
    let mut hasher = sha2::Sha256::new();
    for clip in clips {
        hasher.update(&clip.data);
    }
    format!("{:x}", hasher.finalize())
}

/// Write `data` to `path`. Readers see either the previous file or the complete new one.
pub fn save(data: &SplitDataset, path: &Path) -> DatasetResult<()> {
    let shape = data
        .clip_shape()
        .ok_or_else(|| VideoDatasetError::snapshot(path, "dataset has no clips"))?;
    if let Some(bad) = data
        .x_train
        .iter()
        .chain(data.x_test.iter())
        .find(|c| c.shape != shape)
    {
        return Err(VideoDatasetError::snapshot(
            path,
            format!("mixed clip shapes {:?} and {:?}", shape, bad.shape),
        ));
    }
    if data.x_train.len() != data.y_train.len() || data.x_test.len() != data.y_test.len() {
        return Err(VideoDatasetError::snapshot(
            path,
            "clip and label counts differ",
        ));
    }
    let videos = data
        .videos
        .iter()
        .map(|p| {
            p.to_str().map(str::to_string).ok_or_else(|| {
                VideoDatasetError::snapshot(path, format!("non UTF-8 video path {}", p.display()))
            })
        })
        .collect::<DatasetResult<Vec<_>>>()?;

    let header = SnapshotHeader {
        shape,
        train_samples: data.x_train.len(),
        test_samples: data.x_test.len(),
        y_train: data.y_train.clone(),
        y_test: data.y_test.clone(),
        classes: data.classes.clone(),
        videos,
        payload_sha256: payload_digest(data.x_train.iter().chain(data.x_test.iter())),
    };
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| VideoDatasetError::Other(e.to_string()))?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| VideoDatasetError::io(parent, e))?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(fs::File::create(&tmp_path)?);
        file.write_all(SNAPSHOT_MAGIC)?;
        file.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
        file.write_all(&(header_bytes.len() as u64).to_le_bytes())?;
        file.write_all(&header_bytes)?;
        for clip in data.x_train.iter().chain(data.x_test.iter()) {
            file.write_all(&clip.data)?;
        }
        file.flush()?;
        file.get_ref().sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp_path);
        return Err(VideoDatasetError::io(&tmp_path, e));
    }
    fs::rename(&tmp_path, path).map_err(|e| VideoDatasetError::io(path, e))
}

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

fn read_u64_le(data: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    u64::from_le_bytes(arr)
}

/// Read and verify a snapshot written by [`save`].
pub fn load(path: &Path) -> DatasetResult<SplitDataset> {
    let data = fs::read(path).map_err(|e| VideoDatasetError::io(path, e))?;
    if data.len() < PREFIX_LEN {
        return Err(VideoDatasetError::snapshot(path, "file too small"));
    }
    if &data[0..4] != SNAPSHOT_MAGIC {
        return Err(VideoDatasetError::snapshot(path, "bad magic"));
    }
    let version = read_u32_le(&data[4..8]);
    if version != SNAPSHOT_VERSION {
        return Err(VideoDatasetError::snapshot(
            path,
            format!("unsupported version {version} (expected {SNAPSHOT_VERSION})"),
        ));
    }
    let header_len = read_u64_le(&data[8..16]) as usize;
    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| VideoDatasetError::snapshot(path, "header truncated"))?;
    let header: SnapshotHeader = serde_json::from_slice(&data[PREFIX_LEN..header_end])
        .map_err(|e| VideoDatasetError::snapshot(path, format!("bad header: {e}")))?;

    if header.y_train.len() != header.train_samples || header.y_test.len() != header.test_samples
    {
        return Err(VideoDatasetError::snapshot(
            path,
            "label counts do not match sample counts",
        ));
    }
    // The header sits outside the checksum, so its sizes are untrusted.
    let clip_len = header.shape.checked_clip_len().ok_or_else(|| {
        VideoDatasetError::snapshot(path, format!("invalid clip shape {:?}", header.shape))
    })?;
    let payload_len = header
        .train_samples
        .checked_add(header.test_samples)
        .and_then(|n| n.checked_mul(clip_len))
        .ok_or_else(|| VideoDatasetError::snapshot(path, "overflow computing payload size"))?;
    let payload = &data[header_end..];
    if payload.len() != payload_len {
        return Err(VideoDatasetError::snapshot(
            path,
            format!(
                "payload is {} bytes, expected {payload_len}",
                payload.len()
            ),
        ));
    }
    let digest = format!("{:x}", sha2::Sha256::digest(payload));
    if digest != header.payload_sha256 {
        return Err(VideoDatasetError::snapshot(path, "payload checksum mismatch"));
    }

    let mut clips = payload
        .chunks_exact(clip_len)
        .map(|chunk| Clip::new(header.shape, chunk.to_vec()));
    let x_train = clips
        .by_ref()
        .take(header.train_samples)
        .collect::<DatasetResult<Vec<_>>>()?;
    let x_test = clips
        .take(header.test_samples)
        .collect::<DatasetResult<Vec<_>>>()?;
    if x_train.len() != header.train_samples || x_test.len() != header.test_samples {
        return Err(VideoDatasetError::snapshot(
            path,
            format!(
                "decoded {}/{} clips, header promises {}/{}",
                x_train.len(),
                x_test.len(),
                header.train_samples,
                header.test_samples
            ),
        ));
    }

    Ok(SplitDataset {
        x_train,
        y_train: header.y_train,
        x_test,
        y_test: header.y_test,
        classes: header.classes,
        videos: header.videos.into_iter().map(PathBuf::from).collect(),
    })
}

/// Load `snapshot` if given; otherwise build, split and save to `save_as`.
pub fn load_or_build<F>(
    snapshot: Option<&Path>,
    save_as: &Path,
    test_fraction: f64,
    seed: u64,
    build: F,
) -> DatasetResult<SplitDataset>
where
    F: FnOnce() -> DatasetResult<LabeledDataset>,
{
    if let Some(path) = snapshot {
        let data = load(path)?;
        tracing::info!(
            path = %path.display(),
            train = data.x_train.len(),
            test = data.x_test.len(),
            "loaded dataset snapshot"
        );
        return Ok(data);
    }
    let dataset = build()?;
    let split = train_test_split(dataset, test_fraction, seed)?;
    let save_as = with_snapshot_extension(save_as);
    save(&split, &save_as)?;
    tracing::info!(path = %save_as.display(), "saved dataset snapshot");
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_appended_once() {
        assert_eq!(
            with_snapshot_extension(Path::new("runs/data")),
            PathBuf::from("runs/data.snap")
        );
        assert_eq!(
            with_snapshot_extension(Path::new("kth.snap")),
            PathBuf::from("kth.snap")
        );
        assert_eq!(
            with_snapshot_extension(Path::new("kth.v2")),
            PathBuf::from("kth.v2.snap")
        );
    }

    #[test]
    fn empty_dataset_cannot_be_saved() {
        let tmp = tempfile::tempdir().unwrap();
        let err = save(&SplitDataset::default(), &tmp.path().join("x.snap")).unwrap_err();
        assert!(matches!(err, VideoDatasetError::Snapshot { .. }));
    }

    /// Write a snapshot with a hand-made header over `payload`, checksum included.
    fn write_raw(path: &Path, header: serde_json::Value, payload: &[u8]) {
        let mut header = header;
        header["payload_sha256"] = format!("{:x}", sha2::Sha256::digest(payload)).into();
        let header_bytes = serde_json::to_vec(&header).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(payload);
        fs::write(path, bytes).unwrap();
    }

    fn header(frames: u64, train_samples: usize) -> serde_json::Value {
        serde_json::json!({
            "shape": { "frames": frames, "height": 1, "width": 1 },
            "train_samples": train_samples,
            "test_samples": 0,
            "y_train": vec![0u32; train_samples],
            "y_test": [],
            "classes": { "boxing": 0 },
            "videos": [],
        })
    }

    #[test]
    fn well_formed_raw_snapshot_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ok.snap");
        write_raw(&path, header(2, 3), &[7u8; 18]);
        let data = load(&path).unwrap();
        assert_eq!(data.x_train.len(), 3);
        assert_eq!(data.y_train.len(), 3);
    }

    #[test]
    fn overflowing_clip_shape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("huge.snap");
        write_raw(&path, header(u64::MAX, 1), &[]);
        let err = load(&path).unwrap_err();
        assert!(matches!(err, VideoDatasetError::Snapshot { .. }));
    }

    #[test]
    fn zero_frame_shape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty.snap");
        write_raw(&path, header(0, 3), &[]);
        let err = load(&path).unwrap_err();
        assert!(matches!(err, VideoDatasetError::Snapshot { .. }));
    }

    #[test]
    fn clip_len_checks_overflow() {
        let shape = ClipShape {
            frames: usize::MAX,
            height: 2,
            width: 2,
        };
        assert_eq!(shape.checked_clip_len(), None);
        let shape = ClipShape {
            frames: 4,
            height: 2,
            width: 3,
        };
        assert_eq!(shape.checked_clip_len(), Some(72));
    }
}
