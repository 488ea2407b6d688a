//! MP4 segment containers
//!
//! One [`SegmentMuxer`] per segment file. Tracks are attached at open time
//! from the prepared encoder inputs; samples arrive with already-rebased
//! timestamps, so every container's timeline starts at zero. Finalizing
//! writes the index and reports the duration the container itself claims;
//! cancelling deletes the file without finalizing.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::mp4::{
    AacConfig, AudioObjectType, AvcConfig, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample,
    Mp4Writer, SampleFreqIndex, TrackConfig, TrackType,
};

use crate::capture::config::{ResolvedAudioSettings, ResolvedVideoSettings};
use crate::muxer::encoder::{EncodedFrame, VideoCodecParams};
use crate::utils::error::{CaptureError, CaptureResult};

const MOVIE_TIMESCALE: u32 = 1_000;
const VIDEO_TIMESCALE: u32 = 90_000;

/// Everything the container needs to describe the video track.
pub struct VideoTrackSpec {
    pub settings: ResolvedVideoSettings,
    pub codec: VideoCodecParams,
}

/// Everything the container needs to describe the audio track.
pub struct AudioTrackSpec {
    pub settings: ResolvedAudioSettings,
}

struct TrackState {
    track_id: u32,
    timescale: u32,
    last_pts: Option<Duration>,
    /// Fallback sample duration in timescale units.
    nominal: u32,
}

impl TrackState {
    /// Sample duration: encoder hint, else delta to the previous sample,
    /// else the nominal duration.
    fn sample_duration(&self, pts: Duration, hint: Option<Duration>) -> u32 {
        if let Some(hint) = hint {
            return scaled(hint, self.timescale) as u32;
        }
        match self.last_pts {
            Some(last) if pts > last => scaled(pts - last, self.timescale) as u32,
            _ => self.nominal,
        }
    }
}

fn scaled(pts: Duration, timescale: u32) -> u64 {
    (pts.as_nanos() * u128::from(timescale) / 1_000_000_000) as u64
}

fn container_err(err: ::mp4::Error) -> CaptureError {
    CaptureError::Container(err.to_string())
}

fn brand(tag: &str) -> ::mp4::FourCC {
    // Static four-character tags cannot fail to parse.
    str::parse(tag).expect("static fourcc")
}

fn freq_index(sample_rate: u32) -> SampleFreqIndex {
    match sample_rate {
        96_000 => SampleFreqIndex::Freq96000,
        88_200 => SampleFreqIndex::Freq88200,
        64_000 => SampleFreqIndex::Freq64000,
        48_000 => SampleFreqIndex::Freq48000,
        32_000 => SampleFreqIndex::Freq32000,
        24_000 => SampleFreqIndex::Freq24000,
        22_050 => SampleFreqIndex::Freq22050,
        16_000 => SampleFreqIndex::Freq16000,
        12_000 => SampleFreqIndex::Freq12000,
        11_025 => SampleFreqIndex::Freq11025,
        8_000 => SampleFreqIndex::Freq8000,
        _ => SampleFreqIndex::Freq44100,
    }
}

fn channel_config(channels: u16) -> ChannelConfig {
    match channels {
        1 => ChannelConfig::Mono,
        3 => ChannelConfig::Three,
        4 => ChannelConfig::Four,
        5 => ChannelConfig::Five,
        6 => ChannelConfig::FiveOne,
        8 => ChannelConfig::SevenOne,
        _ => ChannelConfig::Stereo,
    }
}

/// A single open segment container.
pub struct SegmentMuxer {
    path: PathBuf,
    writer: Mp4Writer<File>,
    video: Option<TrackState>,
    audio: Option<TrackState>,
}

impl SegmentMuxer {
    /// Create the segment file and attach one track per spec. At least one
    /// spec must be present.
    pub fn create(
        path: &Path,
        video: Option<VideoTrackSpec>,
        audio: Option<AudioTrackSpec>,
    ) -> CaptureResult<Self> {
        if video.is_none() && audio.is_none() {
            return Err(CaptureError::Container(
                "a segment needs at least one track".to_string(),
            ));
        }

        let file = File::create(path)?;
        let config = Mp4Config {
            major_brand: brand("isom"),
            minor_version: 512,
            compatible_brands: vec![brand("isom"), brand("iso2"), brand("avc1"), brand("mp41")],
            timescale: MOVIE_TIMESCALE,
        };
        let mut writer = Mp4Writer::write_start(file, &config).map_err(container_err)?;

        // Track ids are assigned by the writer in the order tracks are
        // added, starting at 1.
        let mut track_count = 0u32;
        let video_state = match video {
            Some(spec) => {
                writer
                    .add_track(&TrackConfig {
                        track_type: TrackType::Video,
                        timescale: VIDEO_TIMESCALE,
                        language: "und".to_string(),
                        media_conf: MediaConfig::AvcConfig(AvcConfig {
                            width: spec.settings.width as u16,
                            height: spec.settings.height as u16,
                            seq_param_set: spec.codec.seq_param_set,
                            pic_param_set: spec.codec.pic_param_set,
                        }),
                    })
                    .map_err(container_err)?;
                track_count += 1;
                Some(TrackState {
                    track_id: track_count,
                    timescale: VIDEO_TIMESCALE,
                    last_pts: None,
                    nominal: VIDEO_TIMESCALE / spec.settings.max_frame_rate.max(1),
                })
            }
            None => None,
        };

        let audio_state = match audio {
            Some(spec) => {
                writer
                    .add_track(&TrackConfig {
                        track_type: TrackType::Audio,
                        timescale: spec.settings.sample_rate,
                        language: "und".to_string(),
                        media_conf: MediaConfig::AacConfig(AacConfig {
                            bitrate: spec.settings.bit_rate,
                            profile: AudioObjectType::AacLowComplexity,
                            freq_index: freq_index(spec.settings.sample_rate),
                            chan_conf: channel_config(spec.settings.channels),
                        }),
                    })
                    .map_err(container_err)?;
                track_count += 1;
                Some(TrackState {
                    track_id: track_count,
                    timescale: spec.settings.sample_rate,
                    last_pts: None,
                    // 1024-frame AAC granule as the fallback duration.
                    nominal: 1024,
                })
            }
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            video: video_state,
            audio: audio_state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_video_track(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio_track(&self) -> bool {
        self.audio.is_some()
    }

    /// Append an encoded video frame at the given rebased timestamp.
    pub fn write_video(&mut self, frame: &EncodedFrame, pts: Duration) -> CaptureResult<()> {
        let track = self
            .video
            .as_mut()
            .ok_or_else(|| CaptureError::Container("container has no video track".to_string()))?;

        let sample = Mp4Sample {
            start_time: scaled(pts, track.timescale),
            duration: track.sample_duration(pts, frame.duration_hint),
            rendering_offset: 0,
            is_sync: frame.is_keyframe,
            bytes: frame.data.clone(),
        };
        self.writer
            .write_sample(track.track_id, &sample)
            .map_err(container_err)?;
        track.last_pts = Some(pts);
        Ok(())
    }

    /// Append an encoded audio block at the given rebased timestamp.
    pub fn write_audio(&mut self, block: &EncodedFrame, pts: Duration) -> CaptureResult<()> {
        let track = self
            .audio
            .as_mut()
            .ok_or_else(|| CaptureError::Container("container has no audio track".to_string()))?;

        let sample = Mp4Sample {
            start_time: scaled(pts, track.timescale),
            duration: track.sample_duration(pts, block.duration_hint),
            rendering_offset: 0,
            is_sync: true,
            bytes: block.data.clone(),
        };
        self.writer
            .write_sample(track.track_id, &sample)
            .map_err(container_err)?;
        track.last_pts = Some(pts);
        Ok(())
    }

    /// Flush and close the container. Returns the duration the finished
    /// file reports, falling back to the writer-tracked duration when the
    /// file cannot be read back.
    pub fn finalize(mut self, written_duration: Duration) -> CaptureResult<Duration> {
        self.writer.write_end().map_err(container_err)?;
        let path = self.path.clone();
        drop(self);

        match probe_duration(&path) {
            Ok(duration) => Ok(duration),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "finished segment not re-readable, using tracked duration");
                Ok(written_duration)
            }
        }
    }

    /// Abandon the container without finalizing and delete the file.
    pub fn cancel(self) {
        let SegmentMuxer { path, writer, .. } = self;
        drop(writer);
        if let Err(err) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), %err, "failed to delete cancelled segment file");
        }
    }
}

/// Duration of a finished segment as reported by its container.
pub fn probe_duration(path: &Path) -> CaptureResult<Duration> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let reader = BufReader::new(file);
    let mp4 = ::mp4::Mp4Reader::read_header(reader, size).map_err(container_err)?;
    Ok(mp4.duration())
}
