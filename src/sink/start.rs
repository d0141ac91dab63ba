//! Bounded sink start.
//!
//! Opening a network output can block for as long as the remote end keeps
//! the connection half-open. The start runs on a helper thread which sends
//! back exactly one `Result<Recorder>`; on timeout the caller gets an error
//! and the helper drops (and thereby releases) the recorder once its start
//! finally returns.

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::Recorder;

pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);

pub fn start_with_timeout(mut recorder: Recorder, timeout: Duration) -> Result<Recorder> {
    let location = recorder.config().location.clone();
    let (tx, rx) = mpsc::sync_channel::<Result<Recorder>>(1);
    thread::Builder::new()
        .name("recorder-start".to_string())
        .spawn(move || {
            let outcome = recorder.start().map(|()| recorder);
            if let Err(mpsc::TrySendError::Disconnected(Ok(late))) = tx.try_send(outcome) {
                log::warn!(
                    "recorder for {} started after the caller gave up; releasing it",
                    late.config().location
                );
            }
        })
        .map_err(|e| anyhow!("failed to spawn recorder start thread: {}", e))?;

    match rx.recv_timeout(timeout) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(anyhow!(
            "recorder for {} did not start within {:?}",
            location,
            timeout
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(anyhow!(
            "recorder start thread for {} exited without a result",
            location
        )),
    }
}
