//! Capture configuration
//!
//! Per-stream settings for the recorder. Bit rates, channel counts, and
//! sample rates left at 0 are derived from the quality tier; the export
//! region is kept in reference coordinates and resolved lazily against the
//! first format descriptor observed from the device, because the real
//! buffer dimensions are unknown until capture starts.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::sample::{AudioFormat, PixelRect, VideoFormat};

/// Export quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl Default for QualityTier {
    fn default() -> Self {
        Self::Low
    }
}

/// Audio preset derived from a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPreset {
    pub channels: u16,
    pub bit_rate: u32,
    pub sample_rate: u32,
}

impl QualityTier {
    /// Video bits per pixel used when deriving an automatic bit rate.
    pub fn video_bits_per_pixel(self) -> f32 {
        match self {
            QualityTier::Low => 2.1,
            QualityTier::Medium => 6.0,
            QualityTier::High => 10.1,
        }
    }

    // 1ch/64kbps suits voice; 2ch/128kbps tape quality; 2ch/320kbps is the
    // practical AAC ceiling.
    pub fn audio_preset(self) -> AudioPreset {
        match self {
            QualityTier::Low => AudioPreset {
                channels: 1,
                bit_rate: 64_000,
                sample_rate: 44_100,
            },
            QualityTier::Medium => AudioPreset {
                channels: 2,
                bit_rate: 128_000,
                sample_rate: 44_100,
            },
            QualityTier::High => AudioPreset {
                channels: 2,
                bit_rate: 320_000,
                sample_rate: 44_100,
            },
        }
    }
}

/// Which physical camera to capture from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

/// Frame orientation hint carried through to the writer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Orientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Rectangle in reference (screen) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Requested export geometry: a crop in reference coordinates plus optional
/// target pixel dimensions for the output file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRegion {
    pub rect: RectF,
    pub dimensions: Option<(u32, u32)>,
}

impl ExportRegion {
    /// Map the reference rectangle onto the capture buffer. The reference
    /// rect is scaled uniformly until it fills the buffer along its tighter
    /// axis, then clamped so the resulting crop stays inside the frame.
    pub fn resolve_crop(&self, format: &VideoFormat) -> Option<PixelRect> {
        if self.rect.width <= 0.0 || self.rect.height <= 0.0 {
            return None;
        }
        let scale = (format.width as f32 / self.rect.width)
            .min(format.height as f32 / self.rect.height);

        let x = ((self.rect.x * scale).round().max(0.0) as u32).min(format.width.saturating_sub(1));
        let y = ((self.rect.y * scale).round().max(0.0) as u32).min(format.height.saturating_sub(1));
        let width = ((self.rect.width * scale).round() as u32).min(format.width - x);
        let height = ((self.rect.height * scale).round() as u32).min(format.height - y);

        if width == 0 || height == 0 {
            return None;
        }
        Some(PixelRect {
            x,
            y,
            width,
            height,
        })
    }
}

/// Video stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConfig {
    pub enabled: bool,
    /// Target bit rate in bits/s; 0 derives it from the quality tier.
    pub bit_rate: u32,
    pub quality: QualityTier,
    pub max_frame_rate: u32,
    pub orientation: Orientation,
    pub position: CameraPosition,
    pub export: Option<ExportRegion>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bit_rate: 0,
            quality: QualityTier::default(),
            max_frame_rate: 30,
            orientation: Orientation::Portrait,
            position: CameraPosition::Back,
            export: None,
        }
    }
}

/// Video settings resolved against the first observed format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedVideoSettings {
    pub width: u32,
    pub height: u32,
    pub bit_rate: u32,
    pub max_frame_rate: u32,
    pub crop: Option<PixelRect>,
}

impl VideoConfig {
    pub fn writer_settings(&self, format: &VideoFormat) -> ResolvedVideoSettings {
        let crop = self.export.as_ref().and_then(|e| e.resolve_crop(format));
        let (width, height) = self
            .export
            .as_ref()
            .and_then(|e| e.dimensions)
            .or_else(|| crop.map(|c| (c.width, c.height)))
            .unwrap_or((format.width, format.height));

        let bit_rate = if self.bit_rate != 0 {
            self.bit_rate
        } else {
            let pixels = (u64::from(width) * u64::from(height)) as f32;
            (pixels * self.quality.video_bits_per_pixel()) as u32
        };

        ResolvedVideoSettings {
            width,
            height,
            bit_rate,
            max_frame_rate: self.max_frame_rate,
            crop,
        }
    }
}

/// Audio stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConfig {
    pub enabled: bool,
    /// Target bit rate in bits/s; 0 derives it from the quality tier.
    pub bit_rate: u32,
    pub quality: QualityTier,
    /// 0 derives the rate from the source format or the quality tier.
    pub sample_rate: u32,
    /// 0 derives the channel count from the source format or the tier.
    pub channels: u16,
    /// Prefer the source format's rate/channels over the configured ones.
    pub adopt_source_format: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bit_rate: 0,
            quality: QualityTier::default(),
            sample_rate: 0,
            channels: 0,
            adopt_source_format: true,
        }
    }
}

/// Audio settings resolved against the first observed format descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAudioSettings {
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_rate: u32,
}

impl AudioConfig {
    pub fn writer_settings(&self, format: Option<&AudioFormat>) -> ResolvedAudioSettings {
        let mut channels = self.channels;
        let mut sample_rate = self.sample_rate;

        if self.adopt_source_format {
            if let Some(format) = format {
                channels = format.channels;
                sample_rate = format.sample_rate;
            }
        }

        let preset = self.quality.audio_preset();
        if channels == 0 {
            channels = preset.channels;
        }
        if sample_rate == 0 {
            sample_rate = preset.sample_rate;
        }
        let bit_rate = if self.bit_rate != 0 {
            self.bit_rate
        } else {
            preset.bit_rate
        };

        ResolvedAudioSettings {
            channels,
            sample_rate,
            bit_rate,
        }
    }
}

/// Top-level configuration for a capture pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub video: VideoConfig,
    pub audio: AudioConfig,
    /// Hard ceiling on total recorded time across all segments.
    pub max_duration: Option<Duration>,
    /// Segment directory; defaults to a per-process temporary directory.
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sample::PixelFormat;

    #[test]
    fn low_tier_bit_rate_is_pixels_times_constant() {
        let config = VideoConfig::default();
        let format = VideoFormat::packed(640, 480, PixelFormat::Bgra8);
        let settings = config.writer_settings(&format);
        assert_eq!(settings.bit_rate, (640.0 * 480.0 * 2.1) as u32);
        assert_eq!((settings.width, settings.height), (640, 480));
        assert!(settings.crop.is_none());
    }

    #[test]
    fn explicit_bit_rate_wins_over_the_tier() {
        let config = VideoConfig {
            bit_rate: 1_000_000,
            ..VideoConfig::default()
        };
        let format = VideoFormat::packed(1920, 1080, PixelFormat::Bgra8);
        assert_eq!(config.writer_settings(&format).bit_rate, 1_000_000);
    }

    #[test]
    fn low_tier_audio_preset_fills_unset_fields() {
        let config = AudioConfig {
            adopt_source_format: false,
            ..AudioConfig::default()
        };
        let settings = config.writer_settings(None);
        assert_eq!(settings.channels, 1);
        assert_eq!(settings.bit_rate, 64_000);
        assert_eq!(settings.sample_rate, 44_100);
    }

    #[test]
    fn adopted_source_format_overrides_configured_audio_fields() {
        let config = AudioConfig::default();
        let format = AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        let settings = config.writer_settings(Some(&format));
        assert_eq!(settings.channels, 2);
        assert_eq!(settings.sample_rate, 48_000);
        // Bit rate still comes from the tier.
        assert_eq!(settings.bit_rate, 64_000);
    }

    #[test]
    fn export_region_scales_and_clamps_onto_the_buffer() {
        let region = ExportRegion {
            rect: RectF {
                x: 0.0,
                y: 64.0,
                width: 300.0,
                height: 300.0,
            },
            dimensions: Some((540, 540)),
        };
        let format = VideoFormat::packed(1080, 1080, PixelFormat::Bgra8);
        let crop = region.resolve_crop(&format).unwrap();
        // scale = min(1080/300, 1080/300) = 3.6
        assert_eq!((crop.x, crop.y), (0, 230));
        assert_eq!(crop.width, 1080);
        // Clamped to stay inside the 1080-high buffer.
        assert_eq!(crop.height, 850);

        let settings = VideoConfig {
            export: Some(region),
            ..VideoConfig::default()
        }
        .writer_settings(&format);
        assert_eq!((settings.width, settings.height), (540, 540));
    }

    #[test]
    fn degenerate_export_rect_resolves_to_no_crop() {
        let region = ExportRegion {
            rect: RectF {
                x: 10.0,
                y: 10.0,
                width: 0.0,
                height: 120.0,
            },
            dimensions: None,
        };
        let format = VideoFormat::packed(640, 480, PixelFormat::Bgra8);
        assert!(region.resolve_crop(&format).is_none());
    }
}
