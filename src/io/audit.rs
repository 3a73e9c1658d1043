//! Validation audit log - appends every validation event to file
//!
//! Events are written in JSONL format (one JSON object per line) to the
//! file specified in config, where the platform backend picks them up for
//! archival. Writing is best-effort: a failed append is logged and never
//! rolls back the committed ticket transition.

use crate::domain::event::ValidationEvent;
use chrono::{TimeZone, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Audit writer for validation events
pub struct AuditLog {
    file_path: String,
}

impl AuditLog {
    pub fn new(file_path: &str) -> Self {
        info!(file_path = %file_path, "audit_initialized");
        Self { file_path: file_path.to_string() }
    }

    /// Append a validation event to the audit file
    /// Returns true if successful, false otherwise
    pub fn append(&self, event: &ValidationEvent) -> bool {
        let line = match self.to_audit_json(event) {
            Ok(line) => line,
            Err(e) => {
                error!(event_id = %event.id, error = %e, "audit_serialize_failed");
                return false;
            }
        };

        match self.append_line(&line) {
            Ok(()) => {
                debug!(
                    event_id = %event.id,
                    code = %event.code,
                    outcome = %event.outcome.as_str(),
                    "audit_written"
                );
                true
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "audit_write_failed");
                false
            }
        }
    }

    /// Serialize an event with an RFC3339 wall-clock stamp for archival
    fn to_audit_json(&self, event: &ValidationEvent) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(event)?;
        if let Some(obj) = value.as_object_mut() {
            let wall = Utc
                .timestamp_millis_opt(event.ts as i64)
                .single()
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_default();
            obj.insert("at".to_string(), serde_json::Value::String(wall));
        }
        serde_json::to_string(&value)
    }

    /// Append a line to the audit file
    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let path = Path::new(&self.file_path);

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ticket::{ActorId, TicketCode, TripId, ValidationOutcome};
    use std::fs;
    use tempfile::tempdir;

    fn sample_event() -> ValidationEvent {
        ValidationEvent::new(
            TicketCode::from("T-1001"),
            ValidationOutcome::Accepted,
            ActorId::from("scanner-7"),
            Some(TripId::from("LINE-4-0800")),
        )
    }

    #[test]
    fn test_append_writes_valid_jsonl() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("audit.jsonl");
        let audit = AuditLog::new(file_path.to_str().unwrap());

        let event = sample_event();
        assert!(audit.append(&event));

        let content = fs::read_to_string(&file_path).unwrap();
        assert!(content.ends_with('\n'));

        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["id"], event.id);
        assert_eq!(parsed["code"], "T-1001");
        assert_eq!(parsed["outcome"], "accepted");
        assert_eq!(parsed["ts"], event.ts);
        // Wall-clock stamp accompanies the epoch timestamp
        assert!(parsed["at"].as_str().unwrap().starts_with("20"));
    }

    #[test]
    fn test_append_mode_preserves_existing_lines() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("audit.jsonl");
        fs::write(&file_path, "{\"existing\":\"data\"}\n").unwrap();

        let audit = AuditLog::new(file_path.to_str().unwrap());
        audit.append(&sample_event());

        let content = fs::read_to_string(&file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("existing"));
        for line in lines {
            let _parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("dir").join("audit.jsonl");
        let audit = AuditLog::new(nested.to_str().unwrap());

        assert!(audit.append(&sample_event()));
        assert!(nested.exists());
    }
}
