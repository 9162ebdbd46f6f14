//! In-process decoding through libav (`ffmpeg` feature).
//!
//! Falls back to the ffmpeg command-line tools when libav cannot be initialised.

use crate::decode::{FfmpegDecoder, FrameStream, VideoDecoder};
use crate::types::{DatasetResult, VideoDatasetError};
use ffmpeg_next as ffmpeg;
use ffmpeg::format::context::Input;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use image::RgbImage;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn libav_ready() -> bool {
    static READY: OnceLock<bool> = OnceLock::new();
    *READY.get_or_init(|| match ffmpeg::init() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "libav init failed; using the ffmpeg command-line tools");
            false
        }
    })
}

fn decode_err(path: &Path, e: impl Display) -> VideoDatasetError {
    VideoDatasetError::Decode {
        path: path.to_path_buf(),
        msg: e.to_string(),
    }
}

/// Decoder linked against libavformat/libavcodec.
#[derive(Debug, Clone, Default)]
pub struct LibavDecoder {
    /// Used when libav is unavailable at runtime.
    pub fallback: FfmpegDecoder,
}

impl LibavDecoder {
    pub fn from_env() -> Self {
        Self {
            fallback: FfmpegDecoder::from_env(),
        }
    }
}

/// Packets of stream `index`; stands in for a missing container frame count.
fn count_packets(path: &Path, index: usize) -> DatasetResult<u64> {
    let mut input = ffmpeg::format::input(&path).map_err(|e| decode_err(path, e))?;
    Ok(input
        .packets()
        .filter(|(stream, _)| stream.index() == index)
        .count() as u64)
}

impl VideoDecoder for LibavDecoder {
    fn open(&self, path: &Path) -> DatasetResult<Box<dyn FrameStream>> {
        if !path.is_file() {
            return Err(VideoDatasetError::invalid(path, "not a readable file"));
        }
        if !libav_ready() {
            return self.fallback.open(path);
        }
        let input = ffmpeg::format::input(&path).map_err(|e| decode_err(path, e))?;
        let (index, frames, decoder) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| VideoDatasetError::invalid(path, "no video stream"))?;
            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| decode_err(path, e))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| decode_err(path, e))?;
            (stream.index(), stream.frames(), decoder)
        };
        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(VideoDatasetError::invalid(
                path,
                "video stream has no frame size",
            ));
        }
        let frame_count = match u64::try_from(frames) {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::debug!(path = %path.display(), "container has no frame count; counting packets");
                count_packets(path, index)?
            }
        };
        let scaler = Scaler::get(
            decoder.format(),
            width,
            height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| decode_err(path, e))?;
        Ok(Box::new(LibavStream {
            path: path.to_path_buf(),
            input,
            decoder,
            scaler,
            index,
            frame_count,
            flushed: false,
        }))
    }
}

struct LibavStream {
    path: PathBuf,
    input: Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Scaler,
    index: usize,
    frame_count: u64,
    flushed: bool,
}

impl LibavStream {
    fn to_image(&self, rgb: &ffmpeg::frame::Video) -> DatasetResult<RgbImage> {
        let (width, height) = (rgb.width(), rgb.height());
        let row = width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data(0);
        let mut buf = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let line = plane
                .get(start..start + row)
                .ok_or_else(|| decode_err(&self.path, "truncated rgb plane"))?;
            buf.extend_from_slice(line);
        }
        RgbImage::from_raw(width, height, buf)
            .ok_or_else(|| decode_err(&self.path, "frame buffer size mismatch"))
    }
}

impl FrameStream for LibavStream {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn next_frame(&mut self) -> DatasetResult<Option<RgbImage>> {
        loop {
            let mut decoded = ffmpeg::frame::Video::empty();
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb)
                    .map_err(|e| decode_err(&self.path, e))?;
                return self.to_image(&rgb).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.index => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| decode_err(&self.path, e))?,
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| decode_err(&self.path, e))?;
                    self.flushed = true;
                }
                Err(e) => return Err(decode_err(&self.path, e)),
            }
        }
    }
}
