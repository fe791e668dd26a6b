use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL record of session transitions and exports
pub struct ActivityLog {
    path: PathBuf,
    run_id: String,
    base_url: String,
    file: File,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    base_url: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl ActivityLog {
    pub fn new(path: &Path, run_id: &str, base_url: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create activity log directory {}", parent.display())
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open activity log {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: run_id.to_string(),
            base_url: base_url.to_string(),
            file,
        })
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            base_url: &self.base_url,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to write activity log {}", self.path.display()))?;
        Ok(())
    }

    pub fn login(&mut self, username: &str, role: &str) -> Result<()> {
        self.log(
            "login",
            serde_json::json!({ "username": username, "role": role }),
        )
    }

    pub fn login_failed(&mut self, message: &str) -> Result<()> {
        self.log("login_failed", serde_json::json!({ "message": message }))
    }

    pub fn logout(&mut self) -> Result<()> {
        self.log("logout", serde_json::json!({}))
    }

    /// The server rejected the token on `path`
    pub fn session_expired(&mut self, path: &str) -> Result<()> {
        self.log("session_expired", serde_json::json!({ "path": path }))
    }

    pub fn export(&mut self, kind: &str, saved_to: &Path, bytes: usize) -> Result<()> {
        self.log(
            "export",
            serde_json::json!({
                "kind": kind,
                "saved_to": saved_to,
                "bytes": bytes,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_events_are_appended_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("activity.jsonl");

        let mut log = ActivityLog::new(&path, "run-1", "http://localhost:8080/api").unwrap();
        log.login("ada", "ROLE_ADMIN").unwrap();
        log.session_expired("/students").unwrap();
        drop(log);

        // Reopening appends rather than truncating
        let mut log = ActivityLog::new(&path, "run-2", "http://localhost:8080/api").unwrap();
        log.logout().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["type"], "login");
        assert_eq!(events[0]["username"], "ada");
        assert_eq!(events[0]["run_id"], "run-1");
        assert_eq!(events[1]["type"], "session_expired");
        assert_eq!(events[1]["path"], "/students");
        assert_eq!(events[2]["run_id"], "run-2");
        assert!(events[2]["ts"].as_str().is_some());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_names_the_log() {
        // Every write to /dev/full fails with ENOSPC
        let mut log = ActivityLog::new(Path::new("/dev/full"), "run-1", "http://a/api").unwrap();
        let err = log.logout().unwrap_err();
        assert!(err.to_string().contains("Failed to write activity log /dev/full"));
    }
}
