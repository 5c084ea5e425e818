use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use skillbox_core::Result;
use skillbox_core::process::truncate;

/// Keys whose values never reach the log.
const SECRET_KEYS: &[&str] = &["pin", "token", "secret", "api_key", "caps_token"];
const MAX_DETAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Propose,
    Validate,
    Approve,
    ApproveDenied,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Validate => "validate",
            Self::Approve => "approve",
            Self::ApproveDenied => "approve_denied",
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub name: String,
    pub actor: String,
    /// RFC 3339, UTC.
    pub ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl AuditEntry {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.ts)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// `detail.<key>`, if present.
    pub fn detail_field(&self, key: &str) -> Option<&Value> {
        self.detail.as_ref()?.get(key)
    }
}

/// Append-only JSON-lines log of who proposed, validated, and approved what.
///
/// The file is only ever opened for appending; nothing here rewrites it.
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        event: AuditEvent,
        name: &str,
        actor: &str,
        detail: Option<Value>,
    ) -> Result<AuditEntry> {
        let entry = AuditEntry {
            event,
            name: name.to_string(),
            actor: actor.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            detail: detail.map(redact),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        debug!(event = event.as_str(), skill = %name, %actor, "audit entry written");
        Ok(entry)
    }

    /// Every parsable entry, oldest first. A missing log is empty.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = n + 1, error = %e, "skipping unreadable audit entry"),
            }
        }
        Ok(entries)
    }

    /// The newest `n` entries, oldest first.
    pub fn read_recent(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    /// Entries about `name`, oldest first.
    pub fn history(&self, name: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|e| e.name == name)
            .collect())
    }
}

fn redact(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let secret = SECRET_KEYS.iter().any(|s| k.eq_ignore_ascii_case(s));
                    let v = if secret {
                        Value::String("REDACTED".into())
                    } else {
                        redact(v)
                    };
                    (k, v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact).collect()),
        Value::String(s) if s.len() > MAX_DETAIL_CHARS => {
            Value::String(truncate(&s, MAX_DETAIL_CHARS))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_nested_secrets() {
        let out = redact(json!({
            "pin": "1234",
            "nested": {"caps_token": "1234", "API_KEY": "k", "ok": true},
            "list": [{"secret": "s"}],
            "note": "x".repeat(MAX_DETAIL_CHARS + 10),
        }));
        assert_eq!(out["pin"], "REDACTED");
        assert_eq!(out["nested"]["caps_token"], "REDACTED");
        assert_eq!(out["nested"]["API_KEY"], "REDACTED");
        assert_eq!(out["nested"]["ok"], true);
        assert_eq!(out["list"][0]["secret"], "REDACTED");
        assert!(out["note"].as_str().unwrap().len() <= MAX_DETAIL_CHARS + '…'.len_utf8());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("store/audit.log"));
        assert!(log.read_recent(5).unwrap().is_empty());

        log.record(AuditEvent::Propose, "a", "alice", None).unwrap();
        log.record(AuditEvent::Validate, "a", "alice", Some(json!({"ok": true})))
            .unwrap();
        log.record(AuditEvent::Approve, "b", "bob", Some(json!({"pin": "9"})))
            .unwrap();

        let recent = log.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event, AuditEvent::Validate);
        assert_eq!(recent[1].detail_field("pin").unwrap(), "REDACTED");
        assert!(recent[1].timestamp().is_some());
        assert_eq!(log.history("a").unwrap().len(), 2);

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(!raw.contains("\"9\""));
    }

    #[test]
    fn skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "not json\n\n").unwrap();
        let log = AuditLog::new(&path);
        log.record(AuditEvent::Propose, "a", "cli", None).unwrap();
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("not json"));
    }
}
