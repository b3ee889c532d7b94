//! SG-015: Append-only JSONL provenance event log, one per parent stack.
//!
//! Every line carries the run that wrote it and its position in that run,
//! so interleaved runs (synth, then drift) can be told apart on read-back.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event log handle for a single run against one stack.
pub struct EventLog {
    path: PathBuf,
    run_id: String,
    seq: u32,
}

impl EventLog {
    /// Start a run. Nothing touches the disk until the first append.
    pub fn open(state_dir: &Path, stack: &str) -> Self {
        Self {
            path: event_log_path(state_dir, stack),
            run_id: generate_run_id(stack),
            seq: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Append an event stamped with this run and the next sequence number.
    pub fn append(&mut self, event: ProvenanceEvent) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create state dir: {}", e))?;
        }
        let line = TimestampedEvent {
            ts: now_iso8601(),
            run_id: self.run_id.clone(),
            seq: self.seq,
            event,
        };
        let json =
            serde_json::to_string(&line).map_err(|e| format!("JSON serialize error: {}", e))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("cannot open event log {}: {}", self.path.display(), e))?;
        writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;
        self.seq += 1;
        Ok(())
    }
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_timestamp(secs)
}

fn format_timestamp(epoch_secs: u64) -> String {
    let (year, month, day) = civil_from_days((epoch_secs / 86_400) as i64);
    let rem = epoch_secs % 86_400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month as u32, day as u32)
}

/// Run id: `r-` plus 12 hex digits of BLAKE3 over the stack and the clock.
fn generate_run_id(stack: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = blake3::Hasher::new();
    hasher.update(stack.as_bytes());
    hasher.update(&nanos.to_le_bytes());
    format!("r-{}", &hasher.finalize().to_hex()[..12])
}

/// Derive the event log path for a parent stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Read back every event of a stack's log, oldest first.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line)
                .map_err(|e| format!("{}:{}: invalid event: {}", path.display(), i + 1, e))
        })
        .collect()
}
