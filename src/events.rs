use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only JSONL log of session lifecycle events.
///
/// Never records tokens or passwords.
pub struct EventLog {
    run_id: String,
    file: Option<File>,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl EventLog {
    pub fn new(path: &Path, run_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            run_id: run_id.to_string(),
            file: Some(file),
        })
    }

    /// A log that drops every event
    pub fn disabled() -> Self {
        Self {
            run_id: String::new(),
            file: None,
        }
    }

    pub fn log(&mut self, event_type: &str, data: serde_json::Value) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let line = serde_json::to_string(&event)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    pub fn session_restored(&mut self, user_id: &str) -> Result<()> {
        self.log(
            "session_restored",
            serde_json::json!({ "user_id": user_id }),
        )
    }

    pub fn session_expired(&mut self, reason: &str) -> Result<()> {
        self.log("session_expired", serde_json::json!({ "reason": reason }))
    }

    pub fn login(&mut self, user_id: &str, roles: &[&str]) -> Result<()> {
        self.log(
            "login",
            serde_json::json!({ "user_id": user_id, "roles": roles }),
        )
    }

    pub fn login_failed(&mut self, status: Option<u16>) -> Result<()> {
        self.log("login_failed", serde_json::json!({ "status": status }))
    }

    pub fn logout(&mut self, reason: &str) -> Result<()> {
        self.log("logout", serde_json::json!({ "reason": reason }))
    }

    /// Log a guard or fallback redirect during navigation
    pub fn redirect(&mut self, from: &str, to: &str) -> Result<()> {
        self.log("redirect", serde_json::json!({ "from": from, "to": to }))
    }

    pub fn api_error(&mut self, path: &str, status: Option<u16>) -> Result<()> {
        self.log(
            "api_error",
            serde_json::json!({ "path": path, "status": status }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_events_are_appended_as_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let mut log = EventLog::new(&path, "run-1").unwrap();
        log.login("T-100", &["TEACHER"]).unwrap();
        log.redirect("/admin", "/").unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "login");
        assert_eq!(lines[0]["run_id"], "run-1");
        assert_eq!(lines[0]["roles"][0], "TEACHER");
        assert_eq!(lines[1]["from"], "/admin");
        assert!(lines[1]["ts"].is_string());
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        EventLog::new(&path, "a")
            .unwrap()
            .logout("user")
            .unwrap();
        EventLog::new(&path, "b")
            .unwrap()
            .session_expired("expired")
            .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["run_id"], "b");
        assert_eq!(lines[1]["reason"], "expired");
    }

    #[test]
    fn test_disabled_log_is_silent() {
        let mut log = EventLog::disabled();
        log.api_error("/api/teacher", Some(500)).unwrap();
    }
}
