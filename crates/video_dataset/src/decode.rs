//! Video decoding seams and the ffmpeg-backed decoder.

use crate::types::{DatasetResult, VideoDatasetError};
use image::RgbImage;
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

/// Sequential RGB frames from one opened video.
pub trait FrameStream {
    /// Total frame count as reported by the container.
    fn frame_count(&self) -> u64;
    /// Next decoded frame, or `None` at end of stream.
    fn next_frame(&mut self) -> DatasetResult<Option<RgbImage>>;
}

/// Opens video files as frame streams.
pub trait VideoDecoder {
    fn open(&self, path: &Path) -> DatasetResult<Box<dyn FrameStream>>;
}

/// Decoder used when none is given: libav with the `ffmpeg` feature, else the CLI tools.
#[cfg(feature = "ffmpeg")]
pub type DefaultDecoder = crate::libav::LibavDecoder;
#[cfg(not(feature = "ffmpeg"))]
pub type DefaultDecoder = FfmpegDecoder;

/// [`DefaultDecoder`] configured from `FFMPEG_BIN` / `FFPROBE_BIN`.
pub fn default_decoder() -> DefaultDecoder {
    DefaultDecoder::from_env()
}

/// Decoder that shells out to `ffprobe` (metadata) and `ffmpeg` (raw RGB frames).
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    pub frames: Option<u64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
}

pub(crate) fn parse_probe(raw: &[u8], path: &Path) -> DatasetResult<ProbeInfo> {
    let out: ProbeOutput = serde_json::from_slice(raw).map_err(|e| VideoDatasetError::Decode {
        path: path.to_path_buf(),
        msg: format!("unreadable ffprobe output: {e}"),
    })?;
    let stream = out
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| VideoDatasetError::invalid(path, "no video stream"))?;
    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(VideoDatasetError::invalid(
                path,
                "video stream has no frame size",
            ))
        }
    };
    // "N/A" and missing counts both mean the container does not record it.
    let frames = stream
        .nb_frames
        .or(stream.nb_read_frames)
        .and_then(|s| s.trim().parse::<u64>().ok());
    Ok(ProbeInfo {
        width,
        height,
        frames,
    })
}

impl FfmpegDecoder {
    /// Honor `FFMPEG_BIN` / `FFPROBE_BIN` overrides.
    pub fn from_env() -> Self {
        let mut dec = Self::default();
        if let Ok(bin) = std::env::var("FFMPEG_BIN") {
            if !bin.trim().is_empty() {
                dec.ffmpeg = PathBuf::from(bin);
            }
        }
        if let Ok(bin) = std::env::var("FFPROBE_BIN") {
            if !bin.trim().is_empty() {
                dec.ffprobe = PathBuf::from(bin);
            }
        }
        dec
    }

    fn run_probe(&self, path: &Path, count_frames: bool) -> DatasetResult<ProbeInfo> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-select_streams", "v:0"]);
        if count_frames {
            cmd.args(["-count_frames", "-show_entries", "stream=width,height,nb_read_frames"]);
        } else {
            cmd.args(["-show_entries", "stream=width,height,nb_frames"]);
        }
        cmd.args(["-of", "json"]).arg(path);
        let output = cmd.output().map_err(|e| VideoDatasetError::Decode {
            path: path.to_path_buf(),
            msg: format!("failed to run {}: {e}", self.ffprobe.display()),
        })?;
        if !output.status.success() {
            return Err(VideoDatasetError::Decode {
                path: path.to_path_buf(),
                msg: format!(
                    "ffprobe exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        parse_probe(&output.stdout, path)
    }

    /// Arguments that stream every decoded frame of `path` as raw rgb24 on stdout.
    ///
    /// Frames keep their stored orientation and timing so their size and count agree
    /// with what ffprobe reports.
    pub(crate) fn decode_args(path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-v", "error", "-nostdin", "-noautorotate", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(path.as_os_str().to_os_string());
        args.extend(
            ["-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
                .into_iter()
                .map(OsString::from),
        );
        args
    }

    fn probe(&self, path: &Path) -> DatasetResult<ProbeInfo> {
        let info = self.run_probe(path, false)?;
        if info.frames.is_some() {
            return Ok(info);
        }
        tracing::debug!(path = %path.display(), "container has no frame count; counting frames");
        self.run_probe(path, true)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> DatasetResult<Box<dyn FrameStream>> {
        if !path.is_file() {
            return Err(VideoDatasetError::invalid(path, "not a readable file"));
        }
        let info = self.probe(path)?;
        let mut child = Command::new(&self.ffmpeg)
            .args(Self::decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| VideoDatasetError::Decode {
                path: path.to_path_buf(),
                msg: format!("failed to run {}: {e}", self.ffmpeg.display()),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| VideoDatasetError::Decode {
            path: path.to_path_buf(),
            msg: "ffmpeg stdout unavailable".to_string(),
        })?;
        // Drained on its own thread so a chatty ffmpeg never blocks on a full pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        Ok(Box::new(FfmpegStream {
            path: path.to_path_buf(),
            child,
            stderr,
            stdout: BufReader::new(stdout),
            width: info.width,
            height: info.height,
            frame_count: info.frames.unwrap_or(0),
            frames_read: 0,
            finished: false,
        }))
    }
}

struct FfmpegStream {
    path: PathBuf,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    frame_count: u64,
    frames_read: u64,
    finished: bool,
}

impl FrameStream for FfmpegStream {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn next_frame(&mut self) -> DatasetResult<Option<RgbImage>> {
        if self.finished {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {
                self.frames_read += 1;
                RgbImage::from_raw(self.width, self.height, buf)
                    .map(Some)
                    .ok_or_else(|| VideoDatasetError::Decode {
                        path: self.path.clone(),
                        msg: "frame buffer size mismatch".to_string(),
                    })
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                let status = self
                    .child
                    .wait()
                    .map_err(|e| VideoDatasetError::io(&self.path, e))?;
                let diagnostics = self
                    .stderr
                    .take()
                    .and_then(|handle| handle.join().ok())
                    .unwrap_or_default();
                if !status.success() && self.frames_read == 0 {
                    return Err(VideoDatasetError::Decode {
                        path: self.path.clone(),
                        msg: format!(
                            "ffmpeg exited with {status} before producing frames: {}",
                            diagnostics.trim()
                        ),
                    });
                }
                if !diagnostics.trim().is_empty() {
                    tracing::warn!(
                        path = %self.path.display(),
                        frames = self.frames_read,
                        stderr = %diagnostics.trim(),
                        "ffmpeg reported errors while decoding"
                    );
                }
                Ok(None)
            }
            Err(e) => Err(VideoDatasetError::io(&self.path, e)),
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        // Sampling usually stops before the end of the video.
        if !self.finished {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
