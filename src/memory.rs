//! Periodic process memory logging for long-running converters.

use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Resident and peak memory of this process plus system totals, in bytes.
/// Fields are 0 where the platform does not report them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub resident: u64,
    pub peak_resident: u64,
    pub system_total: u64,
    pub system_available: u64,
}

impl MemorySnapshot {
    pub fn read() -> Self {
        let mut snapshot = Self::default();
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            snapshot.resident = kib_field(&status, "VmRSS:").unwrap_or(0);
            snapshot.peak_resident = kib_field(&status, "VmHWM:").unwrap_or(0);
        }
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            snapshot.system_total = kib_field(&meminfo, "MemTotal:").unwrap_or(0);
            snapshot.system_available = kib_field(&meminfo, "MemAvailable:").unwrap_or(0);
        }
        snapshot
    }

    pub fn log(&self) {
        const MB: u64 = 1024 * 1024;
        log::info!(
            "[Memory Usage] Resident: {} MB, Peak: {} MB, System available: {} MB of {} MB",
            self.resident / MB,
            self.peak_resident / MB,
            self.system_available / MB,
            self.system_total / MB
        );
    }
}

/// `Key:   1234 kB` -> bytes.
fn kib_field(content: &str, key: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(key))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}

/// Log a snapshot every `interval` until `cancel` fires.
pub fn spawn_logger(interval: Duration, cancel: CancelToken) -> std::io::Result<JoinHandle<()>> {
    log::info!("memory logging started, interval {}s", interval.as_secs());
    std::thread::Builder::new()
        .name("memory-log".to_string())
        .spawn(move || {
            while !cancel.wait_timeout(interval) {
                MemorySnapshot::read().log();
            }
            log::info!("memory logging stopped");
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kib_fields() {
        let status = "Name:\tcamrelay\nVmHWM:\t   2048 kB\nVmRSS:\t   1024 kB\n";
        assert_eq!(kib_field(status, "VmRSS:"), Some(1024 * 1024));
        assert_eq!(kib_field(status, "VmHWM:"), Some(2048 * 1024));
        assert_eq!(kib_field(status, "VmSwap:"), None);
    }

    #[test]
    fn logger_exits_on_cancel() {
        let cancel = CancelToken::new();
        let handle = spawn_logger(Duration::from_millis(10), cancel.clone()).expect("spawn");
        std::thread::sleep(Duration::from_millis(30));
        cancel.cancel();
        handle.join().expect("logger thread");
    }
}
