//! camrelay
//!
//! Small programs that wire a camera, file or network source to a sink
//! (preview window, MP4 file, RTMP publish endpoint or HLS segments) through
//! the FFmpeg libraries, plus registration of the published stream with an
//! HTTP catalogue and a file server for HLS output.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (`Grabber`, `SourceSpec`, `SourceInfo`)
//! - `sink`: recorders, presets, codec plans, start with timeout
//! - `pipeline`: the grab/preview/record copy loop
//! - `registry`, `netaddr`: stream announcement
//! - `hls`: output directory and HTTP file server
//! - `config`, `cli`, `ui`, `relay`: program plumbing shared by the binaries
//!
//! Without the `ffmpeg` feature only `stub://` sources and sinks work, which
//! is what the tests use.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod frame;
pub mod hls;
pub mod ingest;
pub mod memory;
pub mod netaddr;
pub mod pipeline;
pub mod preview;
pub mod registry;
pub mod relay;
pub mod sink;
pub mod ui;

pub use cancel::CancelToken;
pub use config::{FfmpegLogLevel, Program, RelayConfig};
pub use frame::{AudioSamples, Frame, VideoImage};
pub use ingest::{Codec, Grabber, GrabberOptions, SourceInfo, SourceSpec};
pub use pipeline::{
    CopyLoop, CopyOptions, CopyStats, RecordErrorPolicy, StopReason, TimestampMode,
};
pub use registry::{RegistrationOutcome, RegistryClient, StreamRegistration};
pub use sink::{CodecPlan, Recorder, RecorderConfig};
