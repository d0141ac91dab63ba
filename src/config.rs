//! Program configuration: per-program defaults, an optional TOML (or JSON)
//! file, `RELAY_*` environment overrides, then validation.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::hls::{HlsSettings, DEFAULT_HTTP_PORT};
use crate::ingest::{GrabberOptions, SourceSpec, FALLBACK_HEIGHT, FALLBACK_WIDTH};
use crate::memory;
use crate::pipeline::RecordErrorPolicy;
use crate::sink::plan::{DEFAULT_FRAME_RATE, DEFAULT_VIDEO_BITRATE};
use crate::sink::{HlsSegmenting, DEFAULT_START_TIMEOUT};

const DEFAULT_CAMERA: &str = "0";
const DEFAULT_RTSP_SOURCE: &str = "rtsp://localhost:8554/live";
const DEFAULT_INPUT_FILE: &str = "input.mp4";
const DEFAULT_RECORD_FILE: &str = "output.mp4";
const DEFAULT_RTSP_PORT: u16 = 8554;
const DEFAULT_REGISTRY_URL: &str = "http://localhost:8080";

/// The six relay programs. Each has its own defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Program {
    CameraView,
    RtspView,
    CameraRecord,
    CameraPublish,
    FilePublish,
    RtspHls,
}

impl Program {
    pub fn name(self) -> &'static str {
        match self {
            Self::CameraView => "camera_view",
            Self::RtspView => "rtsp_view",
            Self::CameraRecord => "camera_record",
            Self::CameraPublish => "camera_publish",
            Self::FilePublish => "file_publish",
            Self::RtspHls => "rtsp_hls",
        }
    }

    fn default_source(self) -> &'static str {
        match self {
            Self::CameraView | Self::CameraRecord | Self::CameraPublish => DEFAULT_CAMERA,
            Self::RtspView | Self::RtspHls => DEFAULT_RTSP_SOURCE,
            Self::FilePublish => DEFAULT_INPUT_FILE,
        }
    }

    fn default_preview_title(self) -> &'static str {
        match self {
            Self::CameraView => "Camera Live - Camera Test",
            Self::RtspView => "RTSP Viewer",
            Self::CameraRecord => "Webcam Preview & Recording - Close to Stop",
            Self::CameraPublish => "RTMP Publisher - Close to Stop",
            Self::FilePublish => "MP4 File Streamer - Close to Stop",
            Self::RtspHls => "RTSP to HLS",
        }
    }

    /// Local recordings abort on the first failed frame; streams carry on.
    pub fn default_record_error_policy(self) -> RecordErrorPolicy {
        RecordErrorPolicy::default_for(self != Self::CameraRecord)
    }

    fn publishes(self) -> bool {
        matches!(self, Self::CameraPublish | Self::FilePublish)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FFmpeg's own log verbosity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfmpegLogLevel {
    Quiet,
    Error,
    Warning,
    Info,
    Debug,
}

impl FromStr for FfmpegLogLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiet" => Ok(Self::Quiet),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(anyhow!(
                "unknown ffmpeg log level '{}' (expected quiet|error|warning|info|debug)",
                other
            )),
        }
    }
}

impl FfmpegLogLevel {
    /// Apply to the FFmpeg libraries. A no-op without the ffmpeg feature.
    pub fn apply(self) {
        #[cfg(feature = "ffmpeg")]
        {
            use ffmpeg_next::util::log::Level;
            let level = match self {
                Self::Quiet => Level::Quiet,
                Self::Error => Level::Error,
                Self::Warning => Level::Warning,
                Self::Info => Level::Info,
                Self::Debug => Level::Debug,
            };
            ffmpeg_next::util::log::set_level(level);
        }
        log::debug!("ffmpeg log level: {:?}", self);
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelayConfigFile {
    source: Option<String>,
    preview: Option<bool>,
    preview_title: Option<String>,
    ffmpeg_log: Option<String>,
    capture: Option<CaptureConfigFile>,
    encoder: Option<EncoderConfigFile>,
    output: Option<OutputConfigFile>,
    publish: Option<PublishConfigFile>,
    hls: Option<HlsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fallback_width: Option<u32>,
    fallback_height: Option<u32>,
    timeout_secs: Option<u64>,
    rtsp_transport: Option<String>,
    rtsp_listen: Option<bool>,
    video_only: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EncoderConfigFile {
    frame_rate: Option<f64>,
    video_bitrate: Option<u64>,
    on_record_error: Option<String>,
    start_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PublishConfigFile {
    rtmp_url: Option<String>,
    rtsp_port: Option<u16>,
    rtsp_path: Option<String>,
    register: Option<bool>,
    registry_url: Option<String>,
    stream_name: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct HlsConfigFile {
    dir: Option<PathBuf>,
    playlist: Option<String>,
    segment_seconds: Option<u32>,
    list_size: Option<u32>,
    http_port: Option<u16>,
    memory_log_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    /// Requested capture size; `None` takes what the device offers.
    pub size: Option<(u32, u32)>,
    pub fallback_size: (u32, u32),
    pub timeout: Duration,
    pub rtsp_transport: String,
    pub rtsp_listen: bool,
    pub video_only: bool,
}

impl CaptureSettings {
    pub fn grabber_options(&self) -> GrabberOptions {
        GrabberOptions {
            image_size: self.size,
            rtsp_transport: self.rtsp_transport.clone(),
            timeout: self.timeout,
            rtsp_listen: self.rtsp_listen,
            video_only: self.video_only,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub frame_rate: f64,
    pub video_bitrate: u64,
    pub on_record_error: RecordErrorPolicy,
    pub start_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub rtmp_url: String,
    /// Where the media server re-publishes the RTMP stream over RTSP.
    pub rtsp_port: u16,
    pub rtsp_path: String,
    pub register: bool,
    pub registry_url: String,
    pub stream_name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub program: Program,
    pub source: String,
    pub preview: bool,
    pub preview_title: String,
    pub ffmpeg_log: FfmpegLogLevel,
    pub capture: CaptureSettings,
    pub encoder: EncoderSettings,
    /// Recording target for `camera_record`.
    pub output: PathBuf,
    pub publish: PublishSettings,
    pub hls: HlsSettings,
    pub http_port: u16,
    pub memory_log_interval: Duration,
}

impl RelayConfig {
    /// Defaults, then the file named by `path` or `RELAY_CONFIG`, then
    /// `RELAY_*` overrides, then validation.
    pub fn load(program: Program, path: Option<&Path>) -> Result<Self> {
        let cfg = Self::resolve(program, path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// `load` without the validation step, for callers that layer their
    /// own overrides on top.
    pub fn resolve(program: Program, path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("RELAY_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => RelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(program, file_cfg)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn defaults(program: Program) -> Self {
        let (rtmp_url, rtsp_path, stream_name, description) = match program {
            Program::FilePublish => (
                "rtmp://localhost:1935/file_stream",
                "/file_stream",
                "Local MP4 File Stream",
                "Streaming a local MP4 file, re-published over RTSP",
            ),
            _ => (
                "rtmp://localhost:11935/live",
                "/live",
                "Camera Stream",
                "Live camera stream, re-published over RTSP",
            ),
        };
        let timeout = match program {
            Program::RtspView => Duration::from_secs(5),
            _ => Duration::from_secs(10),
        };
        Self {
            program,
            source: program.default_source().to_string(),
            preview: program != Program::RtspHls,
            preview_title: program.default_preview_title().to_string(),
            ffmpeg_log: match program {
                Program::RtspHls => FfmpegLogLevel::Debug,
                _ => FfmpegLogLevel::Info,
            },
            capture: CaptureSettings {
                size: None,
                fallback_size: (FALLBACK_WIDTH, FALLBACK_HEIGHT),
                timeout,
                rtsp_transport: "tcp".to_string(),
                rtsp_listen: false,
                video_only: program == Program::RtspView,
            },
            encoder: EncoderSettings {
                frame_rate: DEFAULT_FRAME_RATE,
                video_bitrate: DEFAULT_VIDEO_BITRATE,
                on_record_error: program.default_record_error_policy(),
                start_timeout: DEFAULT_START_TIMEOUT,
            },
            output: PathBuf::from(DEFAULT_RECORD_FILE),
            publish: PublishSettings {
                rtmp_url: rtmp_url.to_string(),
                rtsp_port: DEFAULT_RTSP_PORT,
                rtsp_path: rtsp_path.to_string(),
                register: program.publishes(),
                registry_url: DEFAULT_REGISTRY_URL.to_string(),
                stream_name: stream_name.to_string(),
                description: description.to_string(),
            },
            hls: HlsSettings::default(),
            http_port: DEFAULT_HTTP_PORT,
            memory_log_interval: memory::DEFAULT_INTERVAL,
        }
    }

    fn from_file(program: Program, file: RelayConfigFile) -> Result<Self> {
        let mut cfg = Self::defaults(program);
        if let Some(source) = file.source {
            cfg.source = source;
        }
        if let Some(preview) = file.preview {
            cfg.preview = preview;
        }
        if let Some(title) = file.preview_title {
            cfg.preview_title = title;
        }
        if let Some(level) = file.ffmpeg_log {
            cfg.ffmpeg_log = level.parse()?;
        }
        if let Some(capture) = file.capture {
            match (capture.width, capture.height) {
                (Some(width), Some(height)) => cfg.capture.size = Some((width, height)),
                (None, None) => {}
                _ => return Err(anyhow!("capture.width and capture.height must be set together")),
            }
            if let Some(width) = capture.fallback_width {
                cfg.capture.fallback_size.0 = width;
            }
            if let Some(height) = capture.fallback_height {
                cfg.capture.fallback_size.1 = height;
            }
            if let Some(secs) = capture.timeout_secs {
                cfg.capture.timeout = Duration::from_secs(secs);
            }
            if let Some(transport) = capture.rtsp_transport {
                cfg.capture.rtsp_transport = transport;
            }
            if let Some(listen) = capture.rtsp_listen {
                cfg.capture.rtsp_listen = listen;
            }
            if let Some(video_only) = capture.video_only {
                cfg.capture.video_only = video_only;
            }
        }
        if let Some(encoder) = file.encoder {
            if let Some(rate) = encoder.frame_rate {
                cfg.encoder.frame_rate = rate;
            }
            if let Some(bitrate) = encoder.video_bitrate {
                cfg.encoder.video_bitrate = bitrate;
            }
            if let Some(policy) = encoder.on_record_error {
                cfg.encoder.on_record_error = policy.parse()?;
            }
            if let Some(secs) = encoder.start_timeout_secs {
                cfg.encoder.start_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(path) = file.output.and_then(|output| output.path) {
            cfg.output = path;
        }
        if let Some(publish) = file.publish {
            if let Some(url) = publish.rtmp_url {
                cfg.publish.rtmp_url = url;
            }
            if let Some(port) = publish.rtsp_port {
                cfg.publish.rtsp_port = port;
            }
            if let Some(path) = publish.rtsp_path {
                cfg.publish.rtsp_path = path;
            }
            if let Some(register) = publish.register {
                cfg.publish.register = register;
            }
            if let Some(url) = publish.registry_url {
                cfg.publish.registry_url = url;
            }
            if let Some(name) = publish.stream_name {
                cfg.publish.stream_name = name;
            }
            if let Some(description) = publish.description {
                cfg.publish.description = description;
            }
        }
        if let Some(hls) = file.hls {
            if let Some(dir) = hls.dir {
                cfg.hls.dir = dir;
            }
            if let Some(playlist) = hls.playlist {
                cfg.hls.playlist = playlist;
            }
            cfg.hls.segmenting = HlsSegmenting {
                segment_seconds: hls
                    .segment_seconds
                    .unwrap_or(cfg.hls.segmenting.segment_seconds),
                list_size: hls.list_size.unwrap_or(cfg.hls.segmenting.list_size),
            };
            if let Some(port) = hls.http_port {
                cfg.http_port = port;
            }
            if let Some(secs) = hls.memory_log_secs {
                cfg.memory_log_interval = Duration::from_secs(secs);
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("RELAY_SOURCE") {
            self.source = source;
        }
        if let Some(output) = env_value("RELAY_OUTPUT") {
            self.output = PathBuf::from(output);
        }
        if let Some(url) = env_value("RELAY_RTMP_URL") {
            self.publish.rtmp_url = url;
        }
        if let Some(url) = env_value("RELAY_REGISTRY_URL") {
            self.publish.registry_url = url;
        }
        if let Some(dir) = env_value("RELAY_HLS_DIR") {
            self.hls.dir = PathBuf::from(dir);
        }
        if let Some(port) = env_value("RELAY_HTTP_PORT") {
            self.http_port = port
                .parse()
                .map_err(|_| anyhow!("RELAY_HTTP_PORT must be a port number"))?;
        }
        if let Some(policy) = env_value("RELAY_ON_RECORD_ERROR") {
            self.encoder.on_record_error = policy
                .parse()
                .context("RELAY_ON_RECORD_ERROR")?;
        }
        if let Some(level) = env_value("RELAY_FFMPEG_LOG") {
            self.ffmpeg_log = level.parse().context("RELAY_FFMPEG_LOG")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let spec = SourceSpec::parse(&self.source)
            .with_context(|| format!("invalid source '{}'", self.source))?;
        match self.program {
            Program::RtspView | Program::RtspHls if !spec.is_rtsp() && !is_stub(&self.source) => {
                return Err(anyhow!("{} needs an rtsp:// source, got '{}'", self.program, self.source));
            }
            Program::FilePublish if !matches!(spec, SourceSpec::File(_) | SourceSpec::Synthetic(_)) => {
                return Err(anyhow!("{} needs a local file source, got '{}'", self.program, self.source));
            }
            _ => {}
        }
        if let Some((width, height)) = self.capture.size {
            if width == 0 || height == 0 {
                return Err(anyhow!("capture size must be positive"));
            }
        }
        if self.capture.fallback_size.0 == 0 || self.capture.fallback_size.1 == 0 {
            return Err(anyhow!("fallback capture size must be positive"));
        }
        if self.capture.timeout.is_zero() {
            return Err(anyhow!("capture timeout must be greater than zero"));
        }
        if !matches!(self.capture.rtsp_transport.as_str(), "tcp" | "udp") {
            return Err(anyhow!(
                "rtsp_transport must be tcp or udp, got '{}'",
                self.capture.rtsp_transport
            ));
        }
        if !(self.encoder.frame_rate >= 1.0 && self.encoder.frame_rate <= 240.0) {
            return Err(anyhow!("frame rate must be between 1 and 240"));
        }
        if self.encoder.video_bitrate == 0 {
            return Err(anyhow!("video bitrate must be greater than zero"));
        }
        if self.encoder.start_timeout.is_zero() {
            return Err(anyhow!("recorder start timeout must be greater than zero"));
        }
        if self.program == Program::CameraRecord && self.output.as_os_str().is_empty() {
            return Err(anyhow!("output path must not be empty"));
        }
        if self.program.publishes() {
            let rtmp = url::Url::parse(&self.publish.rtmp_url)
                .with_context(|| format!("invalid RTMP url '{}'", self.publish.rtmp_url))?;
            if !matches!(rtmp.scheme(), "rtmp" | "rtmps" | "stub") {
                return Err(anyhow!("publish url must be rtmp://, got '{}'", self.publish.rtmp_url));
            }
            if self.publish.register {
                let registry = url::Url::parse(&self.publish.registry_url).with_context(|| {
                    format!("invalid registry url '{}'", self.publish.registry_url)
                })?;
                if !matches!(registry.scheme(), "http" | "https") {
                    return Err(anyhow!("registry url must be http(s)"));
                }
                if self.publish.stream_name.trim().is_empty() {
                    return Err(anyhow!("stream name must not be empty"));
                }
            }
        }
        if self.program == Program::RtspHls {
            if self.hls.playlist.is_empty() || self.hls.playlist.contains(['/', '\\']) {
                return Err(anyhow!("playlist must be a bare file name"));
            }
            if self.hls.segmenting.segment_seconds == 0 || self.hls.segmenting.list_size == 0 {
                return Err(anyhow!("HLS segment length and list size must be positive"));
            }
            if self.memory_log_interval.is_zero() {
                return Err(anyhow!("memory log interval must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn source_spec(&self) -> Result<SourceSpec> {
        SourceSpec::parse(&self.source)
    }
}

fn is_stub(location: &str) -> bool {
    location.starts_with("stub://")
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
