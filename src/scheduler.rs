//! Time-of-day automation.
//!
//! A schedule file lists `HH:MM:SS,focuscode,action` lines (UTC):
//!
//! ```text
//! 04:00:00,03,3   // start recording
//! 12:00:00,03,8   // spectral overview
//! 19:30:00,03,0   // stop
//! ```
//!
//! The [`Scheduler`] checks the table at a fixed interval and fires every entry
//! whose time has passed, in ascending order, exactly once per process lifetime.
//! Entries are not re-armed at midnight.

use crate::core::{ControlActions, ScheduleAction, ScheduleEntry};
use crate::error::{AppResult, DaqError};
use crate::frequencies::strip_inline_comment;
use crate::timestamp::seconds_since_midnight;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of wall-clock time, replaceable in tests.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parses `HH:MM:SS` into seconds since midnight.
pub fn parse_time_of_day(text: &str) -> Result<u32, String> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    let &[h, m, s] = parts.as_slice() else {
        return Err(format!("invalid time format: {:?}", text.trim()));
    };
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid time component {:?}: {}", part, e))
    };
    let (h, m, s) = (parse(h)?, parse(m)?, parse(s)?);
    if h > 23 || m > 59 || s > 59 {
        return Err(format!("time out of range: {:?}", text.trim()));
    }
    Ok(h * 3600 + m * 60 + s)
}

fn parse_line(line: &str) -> Result<Option<ScheduleEntry>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return Ok(None);
    }
    let line = strip_inline_comment(line);
    let parts: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 3 {
        return Ok(None);
    }
    let t = parse_time_of_day(parts[0])?;
    let focuscode = parts[1]
        .parse::<i32>()
        .map_err(|e| format!("invalid focuscode {:?}: {}", parts[1], e))?;
    let action = parts[2]
        .parse::<i32>()
        .map_err(|e| format!("invalid action {:?}: {}", parts[2], e))?;
    Ok(Some(ScheduleEntry {
        t,
        action,
        focuscode: Some(focuscode),
    }))
}

/// Parses schedule text. Malformed lines are logged and skipped; the result is
/// sorted by time.
pub fn parse_schedule(text: &str, source_name: &str) -> Vec<ScheduleEntry> {
    let mut entries: Vec<ScheduleEntry> = text
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match parse_line(line) {
            Ok(entry) => entry,
            Err(message) => {
                let err = DaqError::Parse {
                    source_name: source_name.to_string(),
                    line: idx + 1,
                    message,
                };
                warn!("Skipping schedule line: {}", err);
                None
            }
        })
        .collect();
    entries.sort_by_key(|e| e.t);
    entries
}

/// Loads a schedule file; a missing file is an empty schedule.
pub fn load_schedule_file(path: &Path) -> AppResult<Vec<ScheduleEntry>> {
    if !path.is_file() {
        info!(path = %path.display(), "No schedule file, scheduler idle");
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let entries = parse_schedule(&text, &path.display().to_string());
    info!(path = %path.display(), entries = entries.len(), "Loaded schedule");
    Ok(entries)
}

/// Fires schedule entries against the wall clock.
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    applied: Vec<bool>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Scheduler over `entries` (sorted by time), checked every `interval`.
    pub fn new(mut entries: Vec<ScheduleEntry>, interval: Duration) -> Self {
        entries.sort_by_key(|e| e.t);
        let applied = vec![false; entries.len()];
        Self {
            entries,
            applied,
            interval,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Entries in firing order.
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Entries that have not fired yet.
    pub fn pending(&self) -> usize {
        self.applied.iter().filter(|a| !**a).count()
    }

    /// Marks and returns every unapplied entry with `t <= now_secs`, ascending.
    pub fn due(&mut self, now_secs: u32) -> Vec<ScheduleEntry> {
        let mut fired = Vec::new();
        for (entry, applied) in self.entries.iter().zip(self.applied.iter_mut()) {
            if entry.t > now_secs {
                break;
            }
            if !*applied {
                *applied = true;
                fired.push(*entry);
            }
        }
        fired
    }

    /// One check against the clock. Returns the number of entries fired.
    pub async fn check(&mut self, actions: &dyn ControlActions) -> usize {
        let now = seconds_since_midnight(self.clock.now());
        let due = self.due(now);
        for entry in &due {
            info!(
                t = entry.t,
                action = entry.action,
                focuscode = ?entry.focuscode,
                "Schedule entry due"
            );
            match entry.kind() {
                ScheduleAction::Start => actions.start().await,
                ScheduleAction::Stop => actions.stop().await,
                ScheduleAction::Overview => actions.overview_once().await,
                ScheduleAction::Unsupported(code) => {
                    warn!(code, "Unsupported schedule action, ignored")
                }
            }
        }
        due.len()
    }

    /// Checks immediately, then every interval, until `shutdown` fires.
    pub async fn run(mut self, actions: Arc<dyn ControlActions>, shutdown: CancellationToken) {
        if self.entries.is_empty() {
            debug!("Scheduler has no entries");
        }
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.check(actions.as_ref()).await;
                }
            }
        }
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: u32, action: i32) -> ScheduleEntry {
        ScheduleEntry {
            t,
            action,
            focuscode: Some(3),
        }
    }

    #[test]
    fn parses_times() {
        assert_eq!(parse_time_of_day("04:00:00"), Ok(14_400));
        assert_eq!(parse_time_of_day(" 23:59:59 "), Ok(86_399));
        assert!(parse_time_of_day("24:00:00").is_err());
        assert!(parse_time_of_day("04:00").is_err());
        assert!(parse_time_of_day("aa:00:00").is_err());
    }

    #[test]
    fn parses_and_sorts_schedule() {
        let text = "\
# station schedule
19:30:00,03,0   // stop
04:00:00,03,3   // start
// overview at noon
12:00:00,03,8
bad line
25:00:00,03,3
12:00:00,03
";
        let entries = parse_schedule(text, "scheduler.cfg");
        assert_eq!(
            entries,
            vec![entry(14_400, 3), entry(43_200, 8), entry(70_200, 0)]
        );
    }

    #[test]
    fn due_fires_in_order_once() {
        let mut scheduler = Scheduler::new(
            vec![entry(70_200, 0), entry(14_400, 3)],
            Duration::from_secs(60),
        );
        assert!(scheduler.due(14_399).is_empty());
        assert_eq!(scheduler.due(14_401), vec![entry(14_400, 3)]);
        assert!(scheduler.due(14_500).is_empty());
        assert_eq!(scheduler.due(80_000), vec![entry(70_200, 0)]);
        assert!(scheduler.due(86_399).is_empty());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn past_entries_fire_together_on_next_check() {
        let mut scheduler = Scheduler::new(
            vec![entry(10, 3), entry(20, 8), entry(30, 0)],
            Duration::from_secs(60),
        );
        let fired = scheduler.due(25);
        assert_eq!(fired, vec![entry(10, 3), entry(20, 8)]);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_schedule_file(&dir.path().join("none.cfg"))
            .unwrap()
            .is_empty());
    }
}
