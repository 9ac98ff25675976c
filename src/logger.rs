use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::diff::diff_json;

/// How content responses are recorded in the wire log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every content body in full.
    Full,
    /// The first content body in full, then only changed paths.
    Diffed,
}

/// Append-only NDJSON record of traffic with the cloud API.
/// Credentials never reach this file.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_content: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_content: None,
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, attempt: u32) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "attempt": attempt,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, write_id: Uuid, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "write",
            "write_id": write_id.to_string(),
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, path: &str, status: u16) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "path": path,
            "status": status,
        });
        self.write_line(&entry);
    }

    pub fn log_content(&mut self, body: &Value) {
        let ts = Utc::now().to_rfc3339();
        let entry = match (self.mode, self.previous_content.as_ref()) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, body, "", &mut changes);
                let changes: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({ "ts": ts, "dir": "content", "changes": changes })
            }
            (MessageLogMode::Diffed, None) => {
                json!({ "ts": ts, "dir": "content", "full": true, "body": body })
            }
            (MessageLogMode::Full, _) => json!({ "ts": ts, "dir": "content", "body": body }),
        };
        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed {
            self.previous_content = Some(body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write wire log entry: {e}");
        }
    }
}
