//! Captured media samples
//!
//! A sample is one timestamped unit of captured media: a video frame (packed
//! pixel buffer plus format descriptor) or an audio block (interleaved PCM
//! plus format descriptor). Payloads are `Bytes`, so handing a sample down
//! the pipeline never copies pixel data; the buffer is released when the
//! last stage drops it.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Which stream a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

/// Packed pixel layouts the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// Format descriptor for a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Stride in bytes; >= width * bytes_per_pixel.
    pub bytes_per_row: usize,
}

impl VideoFormat {
    pub fn packed(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
            bytes_per_row: width as usize * pixel_format.bytes_per_pixel(),
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// An axis-aligned pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Format descriptor for an audio block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub format: VideoFormat,
    pub data: Bytes,
}

impl VideoFrame {
    /// Copy the given rectangle out of this frame into a tightly packed new
    /// frame. Returns None when the rectangle is empty, falls outside the
    /// frame, or the backing buffer is shorter than the format claims.
    pub fn crop(&self, rect: PixelRect) -> Option<VideoFrame> {
        if rect.width == 0 || rect.height == 0 {
            return None;
        }
        if rect.x.checked_add(rect.width)? > self.format.width
            || rect.y.checked_add(rect.height)? > self.format.height
        {
            return None;
        }

        let bpp = self.format.pixel_format.bytes_per_pixel();
        let src_stride = self.format.bytes_per_row;
        let dst_stride = rect.width as usize * bpp;
        let mut out = Vec::with_capacity(dst_stride * rect.height as usize);

        for row in 0..rect.height as usize {
            let start = (rect.y as usize + row) * src_stride + rect.x as usize * bpp;
            let end = start + dst_stride;
            let src = self.data.get(start..end)?;
            out.extend_from_slice(src);
        }

        Some(VideoFrame {
            format: VideoFormat {
                width: rect.width,
                height: rect.height,
                pixel_format: self.format.pixel_format,
                bytes_per_row: dst_stride,
            },
            data: Bytes::from(out),
        })
    }
}

/// One captured block of interleaved PCM audio.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub format: AudioFormat,
    pub data: Bytes,
    /// Number of sample frames (one frame = one sample per channel).
    pub frames: u32,
}

impl AudioBlock {
    pub fn duration(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(f64::from(self.frames) / f64::from(self.format.sample_rate))
    }
}

/// Payload of a [`MediaSample`].
#[derive(Debug, Clone)]
pub enum SamplePayload {
    Video(VideoFrame),
    Audio(AudioBlock),
}

/// A timestamped unit of captured media.
#[derive(Debug, Clone)]
pub struct MediaSample {
    /// Presentation timestamp on the device clock.
    pub pts: Duration,
    pub payload: SamplePayload,
}

impl MediaSample {
    pub fn video(pts: Duration, frame: VideoFrame) -> Self {
        Self {
            pts,
            payload: SamplePayload::Video(frame),
        }
    }

    pub fn audio(pts: Duration, block: AudioBlock) -> Self {
        Self {
            pts,
            payload: SamplePayload::Audio(block),
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self.payload {
            SamplePayload::Video(_) => StreamKind::Video,
            SamplePayload::Audio(_) => StreamKind::Audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_frame(width: u32, height: u32) -> VideoFrame {
        let format = VideoFormat::packed(width, height, PixelFormat::Bgra8);
        let mut data = Vec::with_capacity(format.bytes_per_row * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[x as u8, y as u8, 0, 0xff]);
            }
        }
        VideoFrame {
            format,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn crop_copies_the_requested_rectangle() {
        let frame = gradient_frame(8, 6);
        let cropped = frame
            .crop(PixelRect {
                x: 2,
                y: 1,
                width: 4,
                height: 3,
            })
            .unwrap();

        assert_eq!(cropped.format.width, 4);
        assert_eq!(cropped.format.height, 3);
        assert_eq!(cropped.data.len(), 4 * 3 * 4);
        // Top-left pixel of the crop is source pixel (2, 1).
        assert_eq!(&cropped.data[..2], &[2, 1]);
        // Bottom-right pixel of the crop is source pixel (5, 3).
        let last = cropped.data.len() - 4;
        assert_eq!(&cropped.data[last..last + 2], &[5, 3]);
    }

    #[test]
    fn crop_rejects_out_of_bounds_and_empty_rects() {
        let frame = gradient_frame(4, 4);
        assert!(frame
            .crop(PixelRect {
                x: 2,
                y: 2,
                width: 3,
                height: 1,
            })
            .is_none());
        assert!(frame
            .crop(PixelRect {
                x: 0,
                y: 0,
                width: 0,
                height: 2,
            })
            .is_none());
    }

    #[test]
    fn audio_block_duration_follows_the_sample_rate() {
        let block = AudioBlock {
            format: AudioFormat {
                sample_rate: 44100,
                channels: 1,
            },
            data: Bytes::new(),
            frames: 22050,
        };
        assert_eq!(block.duration(), Duration::from_millis(500));
    }
}
