//! Frame sources.
//!
//! This module provides the `Grabber`, which pulls decoded frames from:
//! - Camera devices (platform capture input, feature: ffmpeg)
//! - Local video files (feature: ffmpeg)
//! - Network streams such as RTSP (feature: ffmpeg)
//! - Synthetic `stub://` sources (always available, used by tests and dry runs)
//!
//! Opening a source is fatal on failure; there is no retry policy.

#[cfg(feature = "ffmpeg")]
pub(crate) mod ffmpeg;
pub mod grabber;

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;

pub use grabber::{Grabber, GrabberOptions, GrabberStats};

/// Fallback capture size when a camera reports no usable resolution.
pub const FALLBACK_WIDTH: u32 = 640;
pub const FALLBACK_HEIGHT: u32 = 480;

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Camera device index (0 is usually the built-in webcam).
    Camera(u32),
    /// Local media file.
    File(PathBuf),
    /// Network URL (rtsp://, rtmp://, http(s)://, udp://, srt://).
    Network(String),
    /// Synthetic source, `stub://name?frames=N&...`.
    Synthetic(String),
}

impl SourceSpec {
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(anyhow!("source location is empty"));
        }
        if location.starts_with("stub://") {
            return Ok(Self::Synthetic(location.to_string()));
        }
        if let Some((scheme, _)) = location.split_once("://") {
            return match scheme.to_ascii_lowercase().as_str() {
                "rtsp" | "rtsps" | "rtmp" | "rtmps" | "http" | "https" | "udp" | "srt" => {
                    Ok(Self::Network(location.to_string()))
                }
                other => Err(anyhow!("unsupported source scheme '{}'", other)),
            };
        }
        if location.chars().all(|c| c.is_ascii_digit()) {
            let index = location
                .parse()
                .map_err(|_| anyhow!("camera index out of range: {}", location))?;
            return Ok(Self::Camera(index));
        }
        Ok(Self::File(PathBuf::from(location)))
    }

    pub fn is_rtsp(&self) -> bool {
        matches!(self, Self::Network(url) if url.to_ascii_lowercase().starts_with("rtsp"))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "camera #{}", index),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Network(url) | Self::Synthetic(url) => f.write_str(url),
        }
    }
}

/// Media codecs the relay distinguishes when planning a sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Codec {
    H264,
    H265,
    Mjpeg,
    RawVideo,
    Aac,
    Mp3,
    Opus,
    Pcm,
    Other(String),
}

impl Codec {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" => Self::H264,
            "h265" | "hevc" => Self::H265,
            "mjpeg" => Self::Mjpeg,
            "rawvideo" | "raw" => Self::RawVideo,
            "aac" => Self::Aac,
            "mp3" => Self::Mp3,
            "opus" => Self::Opus,
            "pcm" | "pcm_s16le" => Self::Pcm,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::H264 => "h264",
            Self::H265 => "hevc",
            Self::Mjpeg => "mjpeg",
            Self::RawVideo => "rawvideo",
            Self::Aac => "aac",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Pcm => "pcm_s16le",
            Self::Other(name) => name,
        }
    }
}

/// What a grabber detected after start.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 when unknown.
    pub frame_rate: f64,
    pub video_codec: Option<Codec>,
    pub pixel_format: Option<String>,
    /// Bits per second; 0 when unknown.
    pub video_bitrate: u64,
    pub audio_channels: u16,
    pub audio_codec: Option<Codec>,
    pub sample_rate: u32,
    pub audio_bitrate: u64,
}

impl SourceInfo {
    pub fn has_valid_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn has_audio(&self) -> bool {
        self.audio_channels > 0
    }

    /// Log the detected parameters, one line each.
    pub fn log_summary(&self) {
        log::info!("  Resolution: {}x{}", self.width, self.height);
        log::info!("  Frame Rate: {:.2}", self.frame_rate);
        if let Some(codec) = &self.video_codec {
            log::info!("  Video Codec: {}", codec.name());
        }
        if let Some(pixel_format) = &self.pixel_format {
            log::info!("  Pixel Format: {}", pixel_format);
        }
        log::info!("  Audio Channels: {}", self.audio_channels);
        if self.has_audio() {
            if let Some(codec) = &self.audio_codec {
                log::info!("  Audio Codec: {}", codec.name());
            }
            log::info!("  Sample Rate: {}", self.sample_rate);
        }
    }
}
