//! Program steps shared by the relay binaries: open the source, start the
//! sink, announce the stream, tear everything down.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::config::{PublishSettings, RelayConfig};
use crate::ingest::{Grabber, SourceInfo};
use crate::netaddr;
use crate::pipeline::CopyStats;
use crate::registry::{self, RegistrationOutcome, RegistryClient, StreamRegistration};
use crate::sink::{start_with_timeout, Recorder, RecorderConfig};
use crate::ui::Ui;

/// Open and start the configured source. With `fallback`, a camera that
/// reports no usable size is restarted at the configured fallback size.
pub fn open_source(cfg: &RelayConfig, ui: &Ui, fallback: bool) -> Result<(Grabber, SourceInfo)> {
    let stage = ui.stage("Open source");
    let spec = cfg.source_spec()?;
    log::info!("opening source {}", spec);
    let mut grabber = Grabber::new(spec, cfg.capture.grabber_options())?;
    let info = if fallback {
        let (width, height) = cfg.capture.fallback_size;
        grabber.start_with_fallback(width, height)?
    } else {
        grabber.start()?
    };
    stage.finish();
    log::info!("source started:");
    info.log_summary();
    Ok((grabber, info))
}

/// Fail before any sink opens when the source has no usable picture.
pub fn require_video(info: &SourceInfo, source: &str) -> Result<()> {
    if !info.has_valid_dimensions() {
        anyhow::bail!(
            "{} has no usable video stream (reported size {}x{})",
            source,
            info.width,
            info.height
        );
    }
    Ok(())
}

pub fn start_recorder(config: RecorderConfig, timeout: Duration, ui: &Ui) -> Result<Recorder> {
    let stage = ui.stage("Start recorder");
    let location = config.location.clone();
    let recorder = Recorder::new(config)?;
    let recorder = start_with_timeout(recorder, timeout)
        .with_context(|| format!("recorder for {} did not start", location))?;
    stage.finish();
    log::info!("recording to {}", location);
    Ok(recorder)
}

/// Register the re-published RTSP URL. Never fails the program.
pub fn register_stream(publish: &PublishSettings) -> Option<RegistrationOutcome> {
    if !publish.register {
        log::info!("stream registration disabled");
        return None;
    }
    let host = netaddr::local_host();
    let registration = StreamRegistration {
        stream_name: publish.stream_name.clone(),
        rtsp_url: registry::rtsp_access_url(&host, publish.rtsp_port, &publish.rtsp_path),
        description: publish.description.clone(),
    };
    log::info!("viewers can pull the stream from {}", registration.rtsp_url);
    let client = RegistryClient::new(&publish.registry_url, registry::DEFAULT_TIMEOUT);
    Some(client.register(&registration))
}

/// Recorder first, then grabber. Errors are logged, not returned.
pub fn teardown(recorder: Option<Recorder>, grabber: Grabber) {
    if let Some(recorder) = recorder {
        match recorder.stop() {
            Ok(()) => log::info!("recorder stopped"),
            Err(err) => log::warn!("error stopping recorder: {:#}", err),
        }
    }
    let stats = grabber.stats();
    match grabber.release() {
        Ok(()) => log::info!(
            "grabber released after {} frames from {}",
            stats.frames_grabbed,
            stats.source
        ),
        Err(err) => log::warn!("error releasing grabber: {:#}", err),
    }
}

/// Turn a stop that left the output incomplete into an error for `main`.
pub fn check_stop(stats: &CopyStats) -> Result<()> {
    if stats.stop.is_failure() {
        anyhow::bail!("stopped early: {}", stats.stop);
    }
    Ok(())
}
