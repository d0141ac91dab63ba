//! The copy loop shared by every relay program: grab, optionally preview,
//! stamp, record, until the source ends or someone cancels.

use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;

use crate::cancel::CancelToken;
use crate::frame::{frame_interval_us, Frame};
use crate::ingest::Grabber;
use crate::preview::Preview;
use crate::sink::Recorder;
use crate::ui::RecordingProgress;

/// How the sink timestamp is derived for each frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimestampMode {
    /// Let the recorder use the frame's own timestamp.
    None,
    /// `count * (1_000_000 / floor(fps))` microseconds.
    FrameCount { fps: f64 },
    /// The frame's timestamp when it is non-zero.
    Source,
}

/// What a failed `record` does to the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordErrorPolicy {
    /// Log, count and keep streaming.
    Continue,
    /// Log and stop with `StopReason::RecordFailed`.
    Abort,
}

impl RecordErrorPolicy {
    /// Local files abort (a gap corrupts the recording), network sinks
    /// carry on.
    pub fn default_for(recorder_is_network: bool) -> Self {
        if recorder_is_network {
            Self::Continue
        } else {
            Self::Abort
        }
    }
}

impl FromStr for RecordErrorPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "abort" => Ok(Self::Abort),
            other => Err(anyhow::anyhow!(
                "unknown record error policy '{}' (expected continue|abort)",
                other
            )),
        }
    }
}

impl fmt::Display for RecordErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Cancelled,
    RecordFailed { frame: u64, error: String },
    DimensionMismatch { expected: (u32, u32), actual: (u32, u32) },
}

impl StopReason {
    /// Stops that leave the output incomplete.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::RecordFailed { .. } | Self::DimensionMismatch { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => f.write_str("end of stream"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::RecordFailed { frame, error } => {
                write!(f, "record failed at frame {}: {}", frame, error)
            }
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "frame is {}x{} but the recorder expects {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CopyOptions {
    pub timestamps: TimestampMode,
    pub on_record_error: RecordErrorPolicy,
    /// Stop when an image does not have exactly this size.
    pub expected_dimensions: Option<(u32, u32)>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            timestamps: TimestampMode::None,
            on_record_error: RecordErrorPolicy::Continue,
            expected_dimensions: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyStats {
    pub grabbed: u64,
    pub recorded: u64,
    pub skipped: u64,
    pub record_errors: u64,
    pub stop: StopReason,
}

impl CopyStats {
    /// Recording length estimate from the number of recorded frames.
    pub fn duration_secs(&self, fps: f64) -> f64 {
        if fps <= 0.0 {
            return 0.0;
        }
        self.recorded as f64 / fps
    }

    pub fn log_summary(&self, fps: Option<f64>) {
        log::info!(
            "copy loop stopped ({}): grabbed={} recorded={} skipped={} record_errors={}",
            self.stop,
            self.grabbed,
            self.recorded,
            self.skipped,
            self.record_errors
        );
        if let Some(fps) = fps {
            if self.recorded == 0 {
                log::warn!("no frames were recorded");
            } else {
                log::info!(
                    "recorded {} frames (~{:.2}s at {:.2} fps)",
                    self.recorded,
                    self.duration_secs(fps),
                    fps
                );
            }
        }
    }
}

pub struct CopyLoop<'a> {
    grabber: &'a mut Grabber,
    recorder: Option<&'a mut Recorder>,
    preview: &'a mut dyn Preview,
    cancel: CancelToken,
    options: CopyOptions,
    progress: Option<&'a RecordingProgress>,
}

impl<'a> CopyLoop<'a> {
    pub fn new(
        grabber: &'a mut Grabber,
        recorder: Option<&'a mut Recorder>,
        preview: &'a mut dyn Preview,
        cancel: CancelToken,
        options: CopyOptions,
    ) -> Self {
        Self {
            grabber,
            recorder,
            preview,
            cancel,
            options,
            progress: None,
        }
    }

    /// Report each recorded frame to `progress`.
    pub fn with_progress(mut self, progress: &'a RecordingProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run until a stop condition. Grab errors propagate.
    pub fn run(&mut self) -> Result<CopyStats> {
        let mut stats = CopyStats {
            grabbed: 0,
            recorded: 0,
            skipped: 0,
            record_errors: 0,
            stop: StopReason::EndOfStream,
        };
        // Frames handed to the sink, successful or not.
        let mut handed: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                stats.stop = StopReason::Cancelled;
                break;
            }
            let frame = match self.grabber.grab().context("grab frame")? {
                Some(frame) => frame,
                None => {
                    log::info!("end of stream");
                    stats.stop = StopReason::EndOfStream;
                    break;
                }
            };
            stats.grabbed += 1;
            if frame.is_empty() {
                stats.skipped += 1;
                continue;
            }

            if let (Some(expected), Some(actual)) =
                (self.options.expected_dimensions, frame.dimensions())
            {
                if expected != actual {
                    log::error!(
                        "frame dimension mismatch: got {}x{}, expected {}x{}",
                        actual.0,
                        actual.1,
                        expected.0,
                        expected.1
                    );
                    stats.stop = StopReason::DimensionMismatch { expected, actual };
                    break;
                }
            }

            if let Some(image) = &frame.image {
                self.preview.show(image);
            }
            if self.cancel.is_cancelled() {
                stats.stop = StopReason::Cancelled;
                break;
            }

            let Some(recorder) = self.recorder.as_deref_mut() else {
                continue;
            };
            let timestamp = timestamp_for(self.options.timestamps, handed, &frame);
            let result = recorder.record(frame, timestamp);
            handed += 1;
            match result {
                Ok(()) => {
                    stats.recorded += 1;
                    if let Some(progress) = self.progress {
                        progress.update(stats.recorded);
                    }
                }
                Err(err) => {
                    stats.record_errors += 1;
                    log::error!("record failed for frame {}: {:#}", handed, err);
                    if self.options.on_record_error == RecordErrorPolicy::Abort {
                        stats.stop = StopReason::RecordFailed {
                            frame: handed,
                            error: format!("{:#}", err),
                        };
                        break;
                    }
                }
            }
        }
        if let Some(progress) = self.progress {
            progress.finish(stats.recorded);
        }
        Ok(stats)
    }
}

fn timestamp_for(mode: TimestampMode, handed: u64, frame: &Frame) -> Option<i64> {
    match mode {
        TimestampMode::None => None,
        TimestampMode::FrameCount { fps } => Some(handed as i64 * frame_interval_us(fps)),
        TimestampMode::Source => (frame.timestamp_us != 0).then_some(frame.timestamp_us),
    }
}
