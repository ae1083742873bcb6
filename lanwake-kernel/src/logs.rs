/**
 * AUDIT LOG - Append-only JSON-lines event log with time-based retention
 *
 * ROLE: every externally visible action (wake, shutdown, reboot, target
 * mutation, status check) is appended here as one JSON object per line.
 *
 * RETENTION: pruning piggybacks on append/read and runs at most once every
 * PRUNE_INTERVAL. Entries older than `retention_days` are dropped; entries
 * without a readable `ts` are kept. The rewrite goes through a temp file and
 * an atomic rename.
 *
 * LOCKING: one mutex guards the file and the last-prune marker. It is never
 * taken while the registry lock is held.
 */

use crate::clock::{format_ts, parse_ts, SharedClock};
use crate::error::{WolError, WolResult};
use crate::persist::replace_file;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

pub const PRUNE_INTERVAL: Duration = Duration::seconds(600);
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
pub const DEFAULT_MAX_LIMIT: usize = 500;

pub type LogEntry = Map<String, Value>;

#[derive(Debug, Default)]
struct PruneState {
    last_prune: Option<OffsetDateTime>,
}

pub struct LogStore {
    path: PathBuf,
    retention_days: i64,
    max_limit: usize,
    clock: SharedClock,
    state: Mutex<PruneState>,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>, clock: SharedClock) -> Self {
        Self {
            path: path.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_limit: DEFAULT_MAX_LIMIT,
            clock,
            state: Mutex::new(PruneState::default()),
        }
    }

    /// `0` or negative disables pruning.
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stamps `ts` and appends `event` (a JSON object carrying `evt`).
    pub fn append(&self, event: Value) -> WolResult<()> {
        let Value::Object(mut entry) = event else {
            return Err(WolError::invalid("log event must be a JSON object"));
        };
        if !entry.get("evt").is_some_and(Value::is_string) {
            return Err(WolError::invalid("log event requires an evt tag"));
        }
        let now = self.clock.now();
        entry.insert("ts".into(), Value::String(format_ts(now)));
        let line = serde_json::to_string(&entry)?;

        let mut state = self.state.lock();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        drop(file);
        // the event is already on disk; a failed prune must not fail the caller
        if let Err(e) = self.maybe_prune_locked(&mut state, now) {
            warn!(path = %self.path.display(), error = %e, "audit log prune failed");
        }
        Ok(())
    }

    /// Like [`append`](Self::append) but only warns on failure. Used on paths
    /// that are already reporting a more relevant error.
    pub fn record(&self, event: Value) {
        if let Err(e) = self.append(event) {
            warn!(path = %self.path().display(), error = %e, "failed to append audit event");
        }
    }

    /// Newest-first entries, at most `min(limit, max_limit)`; `limit <= 0`
    /// means `max_limit`.
    pub fn read(&self, limit: i64) -> WolResult<Vec<LogEntry>> {
        let now = self.clock.now();
        let text = {
            let mut state = self.state.lock();
            self.maybe_prune_locked(&mut state, now)?;
            if !self.path.exists() {
                return Ok(Vec::new());
            }
            fs::read_to_string(&self.path)?
        };

        let mut entries: Vec<(OffsetDateTime, LogEntry)> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Value>(line) {
                Ok(Value::Object(entry)) => Some(entry),
                _ => None,
            })
            .map(|mut entry| {
                let ts = localize_ts(&mut entry, now);
                (ts.unwrap_or(OffsetDateTime::UNIX_EPOCH), entry)
            })
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let cap = if limit <= 0 {
            self.max_limit
        } else {
            usize::try_from(limit).unwrap_or(usize::MAX).min(self.max_limit)
        };
        Ok(entries.into_iter().take(cap).map(|(_, entry)| entry).collect())
    }

    fn maybe_prune_locked(&self, state: &mut PruneState, now: OffsetDateTime) -> WolResult<()> {
        if self.retention_days <= 0 {
            return Ok(());
        }
        if let Some(last) = state.last_prune {
            if now - last < PRUNE_INTERVAL {
                return Ok(());
            }
        }
        state.last_prune = Some(now);
        let cutoff = now - Duration::days(self.retention_days);
        self.prune_locked(cutoff, now)
    }

    /// Rewrites the file keeping entries at or after `cutoff` and entries
    /// without a readable timestamp. Unparseable lines are dropped.
    fn prune_locked(&self, cutoff: OffsetDateTime, now: OffsetDateTime) -> WolResult<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let text = fs::read_to_string(&self.path)?;
        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Ok(Value::Object(mut entry)) = serde_json::from_str::<Value>(line) else {
                dropped += 1;
                continue;
            };
            match localize_ts(&mut entry, now) {
                Some(ts) if ts < cutoff => dropped += 1,
                _ => kept.push(serde_json::to_string(&entry)?),
            }
        }

        let mut output = kept.join("\n");
        if !output.is_empty() {
            output.push('\n');
        }
        replace_file(&self.path, &output)?;
        debug!(kept = kept.len(), dropped, "audit log pruned");
        Ok(())
    }
}

/// Parses the entry's `ts` and rewrites it in the local offset of `now`.
fn localize_ts(entry: &mut LogEntry, now: OffsetDateTime) -> Option<OffsetDateTime> {
    let ts = entry.get("ts").and_then(Value::as_str).and_then(parse_ts)?;
    entry.insert("ts".into(), Value::String(format_ts(ts.to_offset(now.offset()))));
    Some(ts)
}
