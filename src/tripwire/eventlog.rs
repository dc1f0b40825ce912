//! Append-only JSONL provenance event log.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generate an RFC 3339 UTC timestamp.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Append an event to the log at `path`.
pub fn append_event(path: &Path, event: ProvenanceEvent) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create log dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

/// Run-scoped event sink. Without a path, events are dropped.
///
/// Write failures are logged once as warnings and never abort a run.
#[derive(Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
    failed: bool,
}

impl EventLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            failed: false,
        }
    }

    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(&mut self, event: ProvenanceEvent) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(e) = append_event(path, event) {
            if !self.failed {
                log::warn!("event log disabled for this run: {}", e);
            }
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 2 + 12);
    }

    #[test]
    fn test_append_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let event = ProvenanceEvent::RunStarted {
            run_id: "r-abc".to_string(),
            document: "topology.json".to_string(),
            digest: "blake3:00".to_string(),
            credentials: "ambient".to_string(),
            version: "0.1.0".to_string(),
        };
        append_event(&path, event).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"event\":\"run_started\""));
        assert!(content.contains("r-abc"));
        assert!(content.contains("\"ts\":"));
    }

    #[test]
    fn test_event_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut log = EventLog::new(Some(path.clone()));
        for i in 0..3 {
            log.record(ProvenanceEvent::ResourceCreated {
                kind: "subnet".to_string(),
                id: format!("subnet-{}", i),
            });
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: TimestampedEvent = serde_json::from_str(lines[2]).unwrap();
        assert!(matches!(
            parsed.event,
            ProvenanceEvent::ResourceCreated { ref id, .. } if id == "subnet-2"
        ));
    }

    #[test]
    fn test_unwritable_log_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let mut log = EventLog::new(Some(dir.path().to_path_buf()));
        log.record(ProvenanceEvent::StageStarted {
            stage: "network".to_string(),
        });
        log.record(ProvenanceEvent::StageStarted {
            stage: "dns".to_string(),
        });
        assert!(log.failed);
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let mut log = EventLog::disabled();
        assert!(log.path().is_none());
        log.record(ProvenanceEvent::StageStarted {
            stage: "network".to_string(),
        });
        assert!(!log.failed);
    }
}
