//! Frame sinks: MP4 files, RTMP publish endpoints and HLS segment writers.
//!
//! A sink is described by a `RecorderConfig` and driven through a
//! `Recorder`. Presets build the configurations the relay programs use;
//! `plan` derives codec settings from what a grabber detected.

#[cfg(feature = "ffmpeg")]
pub(crate) mod ffmpeg;
pub mod plan;
pub mod recorder;
pub mod start;

use std::path::Path;

use crate::ingest::Codec;
pub use plan::CodecPlan;
pub use recorder::{RecordedFrame, Recorder, SinkProbe};
pub use start::{start_with_timeout, DEFAULT_START_TIMEOUT};

/// Encoder input pixel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Yuv420p,
}

impl PixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoSettings {
    pub codec: Codec,
    /// Bits per second; `None` leaves the encoder default.
    pub bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
    /// Keyframe interval in frames.
    pub gop: Option<u32>,
    /// `None` keeps the encoder's preferred format.
    pub pixel_format: Option<PixelFormat>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioSettings {
    pub codec: Codec,
    pub bitrate: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: u16,
}

/// HLS playlist rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HlsSegmenting {
    pub segment_seconds: u32,
    pub list_size: u32,
}

impl Default for HlsSegmenting {
    fn default() -> Self {
        Self {
            segment_seconds: 4,
            list_size: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecorderConfig {
    /// Output path or URL. `stub://...` records into memory.
    pub location: String,
    /// Container format; `None` guesses from the location.
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub video: VideoSettings,
    pub audio: Option<AudioSettings>,
    /// Muxer options in the order they are applied.
    pub options: Vec<(String, String)>,
}

impl RecorderConfig {
    pub fn new(location: impl Into<String>, width: u32, height: u32, plan: CodecPlan) -> Self {
        Self {
            location: location.into(),
            format: None,
            width,
            height,
            video: plan.video,
            audio: plan.audio,
            options: Vec::new(),
        }
    }

    /// H.264/YUV420P into an MP4 file with the index moved to the front.
    pub fn mp4_file(path: &Path, width: u32, height: u32, frame_rate: f64, bitrate: u64) -> Self {
        Self::new(
            path.to_string_lossy(),
            width,
            height,
            plan::plan_camera(frame_rate, bitrate, None),
        )
        .with_format("mp4")
        .with_option("movflags", "faststart")
    }

    /// H.264/YUV420P in FLV to an RTMP endpoint, keyframe every two seconds.
    pub fn rtmp_publish(url: &str, width: u32, height: u32, frame_rate: f64, bitrate: u64) -> Self {
        Self::new(url, width, height, plan::plan_camera(frame_rate, bitrate, Some(2)))
            .with_format("flv")
    }

    /// HLS playlist `dir/playlist` with `segment%05d.ts` segments beside it.
    pub fn hls(
        dir: &Path,
        playlist: &str,
        width: u32,
        height: u32,
        plan: CodecPlan,
        segmenting: HlsSegmenting,
    ) -> Self {
        let segment_pattern = dir.join("segment%05d.ts");
        Self::new(dir.join(playlist).to_string_lossy(), width, height, plan)
            .with_format("hls")
            .with_option("hls_time", &segmenting.segment_seconds.to_string())
            .with_option("hls_list_size", &segmenting.list_size.to_string())
            .with_option("hls_flags", "delete_segments+omit_endlist")
            .with_option(
                "hls_segment_filename",
                &segment_pattern.to_string_lossy(),
            )
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_option(mut self, key: &str, value: &str) -> Self {
        self.options.push((key.to_string(), value.to_string()));
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the output leaves the machine (RTMP, RTSP, SRT, ...).
    pub fn is_network(&self) -> bool {
        match self.location.split_once("://") {
            Some((scheme, _)) => !matches!(scheme, "file" | "stub"),
            None => false,
        }
    }
}
