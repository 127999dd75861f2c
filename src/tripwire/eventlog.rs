//! MW-021: Append-only JSONL provenance log, one per stack.

use crate::core::error::{StackError, StackResult};
use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_utc(secs)
}

/// Format seconds since the epoch as an ISO 8601 UTC timestamp.
pub fn format_utc(secs: u64) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (y, m, d) = civil_from_days(days as i64);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y,
        m,
        d,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Derive the event log path for a stack.
pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append an event to the stack's event log.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> StackResult<()> {
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StackError::State(format!("cannot create state dir: {}", e)))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)
        .map_err(|e| StackError::State(format!("JSON serialize error: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| {
            StackError::State(format!("cannot open event log {}: {}", path.display(), e))
        })?;

    writeln!(file, "{}", json).map_err(|e| StackError::State(format!("write error: {}", e)))?;

    Ok(())
}

/// Read back all events (used by `status`).
pub fn read_events(state_dir: &Path, stack: &str) -> StackResult<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| StackError::State(format!("cannot read {}: {}", path.display(), e)))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| StackError::State(format!("bad event line in {}: {}", path.display(), e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mw021_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
    }

    #[test]
    fn test_mw021_format_utc_known_dates() {
        assert_eq!(format_utc(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_utc(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(format_utc(1_771_250_400), "2026-02-16T14:00:00Z");
        assert_eq!(format_utc(4_107_542_399), "2100-02-28T23:59:59Z");
    }

    #[test]
    fn test_mw021_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert!(id.len() > 4);
    }

    #[test]
    fn test_mw021_event_log_path() {
        let p = event_log_path(Path::new("/state"), "ml");
        assert_eq!(p, PathBuf::from("/state/ml/events.jsonl"));
    }

    #[test]
    fn test_mw021_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            "ml",
            ProvenanceEvent::ApplyStarted {
                stack: "ml".to_string(),
                run_id: "r-abc".to_string(),
                version: "0.3.0".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            "ml",
            ProvenanceEvent::ResourceFailed {
                stack: "ml".to_string(),
                resource: "file-system".to_string(),
                error: "quota".to_string(),
            },
        )
        .unwrap();

        let content = std::fs::read_to_string(dir.path().join("ml/events.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("apply_started"));

        let events = read_events(dir.path(), "ml").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].event,
            ProvenanceEvent::ResourceFailed { .. }
        ));
    }

    #[test]
    fn test_mw021_read_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "ghost").unwrap().is_empty());
    }
}
