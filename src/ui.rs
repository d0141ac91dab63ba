//! Terminal feedback on stderr. Start-up stages and the running frame count
//! draw as `indicatif` spinners on a terminal; elsewhere they become plain
//! `==>` lines and a periodic progress line.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How often the plain progress line is printed.
pub const PLAIN_REPORT_INTERVAL: Duration = Duration::from_secs(10);

const TICK: Duration = Duration::from_millis(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl FromStr for UiMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "plain" => Ok(Self::Plain),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown ui mode '{}' (expected auto|plain|pretty)",
                other
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// Pick the mode against the real stderr.
    pub fn detect(mode: UiMode) -> Self {
        Self::new(mode, std::io::stderr().is_terminal())
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    fn spinner(&self, template: &str) -> Option<ProgressBar> {
        if !self.pretty() {
            return None;
        }
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(TICK);
        Some(bar)
    }

    /// Begin a start-up stage. Call `finish` on success; a guard dropped
    /// without `finish` reports the stage as failed.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner("{spinner} {msg}");
        match &spinner {
            Some(bar) => bar.set_message(format!("{name}…")),
            None => eprintln!("==> {}", name),
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            done: false,
        }
    }

    /// Running count of frames handed to `target`.
    pub fn recording(&self, target: &str) -> RecordingProgress {
        let bar = self.spinner("{spinner} {prefix} {msg}");
        if let Some(bar) = &bar {
            bar.set_prefix(target.to_string());
            bar.set_message(progress_line(0, Duration::ZERO));
        }
        RecordingProgress {
            target: target.to_string(),
            start: Instant::now(),
            bar,
            last_report: Mutex::new(None),
            report_every: PLAIN_REPORT_INTERVAL,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    done: bool,
}

impl StageGuard {
    pub fn finish(mut self) {
        self.done = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.done { "✔" } else { "✘" };
        let message = format!("{} {} ({})", mark, self.name, format_elapsed(self.elapsed()));
        match &self.spinner {
            Some(spinner) if self.done => spinner.finish_with_message(message),
            Some(spinner) => spinner.abandon_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

/// Frames recorded so far and the wall time since recording began.
pub struct RecordingProgress {
    target: String,
    start: Instant,
    bar: Option<ProgressBar>,
    last_report: Mutex<Option<Instant>>,
    report_every: Duration,
}

impl RecordingProgress {
    pub fn with_report_interval(mut self, every: Duration) -> Self {
        self.report_every = every;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Called after each frame the sink accepted.
    pub fn update(&self, recorded: u64) {
        let line = progress_line(recorded, self.elapsed());
        match &self.bar {
            Some(bar) => bar.set_message(line),
            None => {
                if self.due(Instant::now()) {
                    eprintln!("    {}: {}", self.target, line);
                }
            }
        }
    }

    /// True when the plain line should be printed at `now`; the first
    /// update waits a full interval.
    fn due(&self, now: Instant) -> bool {
        let mut last = match self.last_report.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let since = last.unwrap_or(self.start);
        if now.saturating_duration_since(since) < self.report_every {
            return false;
        }
        *last = Some(now);
        true
    }

    pub fn finish(&self, recorded: u64) {
        let line = progress_line(recorded, self.elapsed());
        match &self.bar {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("    {}: {}", self.target, line),
        }
    }
}

fn progress_line(recorded: u64, elapsed: Duration) -> String {
    let plural = if recorded == 1 { "" } else { "s" };
    format!("{} frame{} in {}", recorded, plural, format_elapsed(elapsed))
}

/// Sub-second values in milliseconds, then a clock that grows an hour
/// field only when needed.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs == 0 {
        return format!("{}ms", elapsed.subsec_millis());
    }
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_mode_parses_known_names() -> anyhow::Result<()> {
        assert_eq!("Pretty".parse::<UiMode>()?, UiMode::Pretty);
        assert_eq!("".parse::<UiMode>()?, UiMode::Auto);
        assert!("fancy".parse::<UiMode>().is_err());
        Ok(())
    }

    #[test]
    fn spinner_only_on_terminals() {
        assert!(!Ui::new(UiMode::Pretty, false).pretty());
        assert!(!Ui::new(UiMode::Plain, true).pretty());
        assert!(Ui::new(UiMode::Auto, true).pretty());
    }

    #[test]
    fn elapsed_reads_like_a_clock() {
        assert_eq!(format_elapsed(Duration::from_millis(42)), "42ms");
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "0:01");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2:05");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "3:00:07");
    }

    #[test]
    fn progress_line_counts_frames() {
        assert_eq!(progress_line(1, Duration::from_secs(0)), "1 frame in 0ms");
        assert_eq!(progress_line(300, Duration::from_secs(10)), "300 frames in 0:10");
    }

    #[test]
    fn plain_progress_is_throttled() {
        let progress = Ui::new(UiMode::Plain, false)
            .recording("stub://sink")
            .with_report_interval(Duration::from_secs(10));
        let start = progress.start;
        assert!(!progress.due(start + Duration::from_secs(3)));
        assert!(progress.due(start + Duration::from_secs(10)));
        assert!(!progress.due(start + Duration::from_secs(15)));
        assert!(progress.due(start + Duration::from_secs(21)));
    }
}
