//! `Recorder`: the handle that encodes and muxes frames into an output.
//!
//! Lifecycle is `new` -> `start` -> `record`* -> `stop`. `stop(self)`
//! finalizes the output (trailer, playlist end) and releases it; a started
//! recorder dropped without `stop` is finalized from `Drop`, so the native
//! output is closed exactly once on every path.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

#[cfg(feature = "ffmpeg")]
use super::ffmpeg::FfmpegRecorder;
use super::RecorderConfig;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Started,
    Stopped,
}

pub struct Recorder {
    config: RecorderConfig,
    backend: RecorderBackend,
    state: State,
    frames_recorded: u64,
}

enum RecorderBackend {
    Memory(MemorySink),
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(Option<FfmpegRecorder>),
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let backend = if config.location.starts_with("stub://") {
            RecorderBackend::Memory(MemorySink::parse(&config.location)?)
        } else {
            #[cfg(feature = "ffmpeg")]
            {
                RecorderBackend::Ffmpeg(None)
            }
            #[cfg(not(feature = "ffmpeg"))]
            {
                bail!(
                    "output '{}' requires the ffmpeg feature (only stub:// is built in)",
                    config.location
                );
            }
        };
        Ok(Self {
            config,
            backend,
            state: State::Idle,
            frames_recorded: 0,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.state == State::Started
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded
    }

    /// Observer for memory sinks; `None` for real outputs.
    pub fn probe(&self) -> Option<SinkProbe> {
        match &self.backend {
            RecorderBackend::Memory(sink) => Some(sink.probe.clone()),
            #[cfg(feature = "ffmpeg")]
            RecorderBackend::Ffmpeg(_) => None,
        }
    }

    /// Open the output and write its header. May block on network sinks.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Idle {
            bail!("recorder for {} was already started", self.config.location);
        }
        match &mut self.backend {
            RecorderBackend::Memory(sink) => sink.start(),
            #[cfg(feature = "ffmpeg")]
            RecorderBackend::Ffmpeg(slot) => {
                FfmpegRecorder::open(&self.config).map(|output| *slot = Some(output))
            }
        }
        .with_context(|| format!("failed to start recorder for {}", self.config.location))?;
        self.state = State::Started;
        log::info!("recorder started: {}", self.config.location);
        Ok(())
    }

    /// Encode one frame. `timestamp_us` overrides the frame's own timestamp.
    pub fn record(&mut self, frame: Frame, timestamp_us: Option<i64>) -> Result<()> {
        if self.state != State::Started {
            bail!("recorder for {} is not started", self.config.location);
        }
        match &mut self.backend {
            RecorderBackend::Memory(sink) => sink.record(&frame, timestamp_us)?,
            #[cfg(feature = "ffmpeg")]
            RecorderBackend::Ffmpeg(Some(output)) => output.record(&frame, timestamp_us)?,
            #[cfg(feature = "ffmpeg")]
            RecorderBackend::Ffmpeg(None) => bail!("recorder output is not open"),
        }
        self.frames_recorded += 1;
        Ok(())
    }

    /// Flush, finalize and release the output.
    pub fn stop(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.state != State::Started {
            self.state = State::Stopped;
            return Ok(());
        }
        self.state = State::Stopped;
        match &mut self.backend {
            RecorderBackend::Memory(sink) => sink.stop(),
            #[cfg(feature = "ffmpeg")]
            RecorderBackend::Ffmpeg(slot) => match slot.take() {
                Some(output) => output.finish(),
                None => Ok(()),
            },
        }
        .with_context(|| format!("failed to stop recorder for {}", self.config.location))?;
        log::info!(
            "recorder stopped: {} ({} frames)",
            self.config.location,
            self.frames_recorded
        );
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("error releasing recorder: {:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Memory sink (stub://) for tests
// ----------------------------------------------------------------------------

/// What a memory sink received, as seen by a test.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedFrame {
    pub timestamp_us: Option<i64>,
    pub dimensions: Option<(u32, u32)>,
    pub audio_frames: usize,
}

#[derive(Debug, Default)]
struct ProbeState {
    started: bool,
    stopped: bool,
    stop_count: u32,
    frames: Vec<RecordedFrame>,
}

/// Shared view of a memory sink that outlives the recorder.
#[derive(Clone, Debug, Default)]
pub struct SinkProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl SinkProbe {
    fn with<T>(&self, f: impl FnOnce(&mut ProbeState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn is_started(&self) -> bool {
        self.with(|state| state.started)
    }

    pub fn is_stopped(&self) -> bool {
        self.with(|state| state.stopped)
    }

    /// How many times the output was finalized. Never more than one.
    pub fn stop_count(&self) -> u32 {
        self.with(|state| state.stop_count)
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.with(|state| state.frames.clone())
    }

    pub fn timestamps(&self) -> Vec<Option<i64>> {
        self.with(|state| state.frames.iter().map(|f| f.timestamp_us).collect())
    }
}

/// `stub://sink?fail_start=1&start_delay_ms=N&fail_every=K`
struct MemorySink {
    fail_start: bool,
    start_delay: Duration,
    fail_every: Option<u64>,
    calls: u64,
    probe: SinkProbe,
}

impl MemorySink {
    fn parse(location: &str) -> Result<Self> {
        let url = Url::parse(location).context("parse stub sink url")?;
        let mut sink = Self {
            fail_start: false,
            start_delay: Duration::ZERO,
            fail_every: None,
            calls: 0,
            probe: SinkProbe::default(),
        };
        for (key, value) in url.query_pairs() {
            let parse_err = || anyhow!("invalid stub sink parameter {}={}", key, value);
            match key.as_ref() {
                "fail_start" => sink.fail_start = value == "1" || value == "true",
                "start_delay_ms" => {
                    sink.start_delay =
                        Duration::from_millis(value.parse().map_err(|_| parse_err())?)
                }
                "fail_every" => sink.fail_every = Some(value.parse().map_err(|_| parse_err())?),
                other => bail!("unknown stub sink parameter '{}'", other),
            }
        }
        Ok(sink)
    }

    fn start(&mut self) -> Result<()> {
        if !self.start_delay.is_zero() {
            std::thread::sleep(self.start_delay);
        }
        if self.fail_start {
            bail!("stub sink refused to start");
        }
        self.probe.with(|state| state.started = true);
        Ok(())
    }

    fn record(&mut self, frame: &Frame, timestamp_us: Option<i64>) -> Result<()> {
        self.calls += 1;
        if let Some(every) = self.fail_every {
            if every > 0 && self.calls % every == 0 {
                bail!("stub sink rejected frame {}", self.calls);
            }
        }
        let recorded = RecordedFrame {
            timestamp_us,
            dimensions: frame.dimensions(),
            audio_frames: frame.samples.as_ref().map(|s| s.frames()).unwrap_or(0),
        };
        self.probe.with(|state| state.frames.push(recorded));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.with(|state| {
            state.stopped = true;
            state.stop_count += 1;
        });
        Ok(())
    }
}
