use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::types::{Event, LogError};

/// An append-only JSON-lines event log.
///
/// Appends are serialized through a per-log mutex and written as one complete
/// line. Loads take no lock: a line that is still being written has no
/// terminating newline yet and is ignored until it does.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event after every event already in the log.
    ///
    /// Creates the parent directory and the file when they do not exist yet.
    pub async fn append(&self, event: &Event) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(&event.to_value()?)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;

        tracing::debug!(
            path = %self.path.display(),
            action = event.action(),
            "Appended event"
        );
        Ok(())
    }

    /// Load every event in append order.
    ///
    /// A missing file is an empty log. Blank and unparseable lines are skipped.
    pub async fn load(&self) -> Result<Vec<Event>, LogError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(parse_lines(&bytes, &self.path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No event log yet, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(LogError::Io(e)),
        }
    }
}

/// Decode the newline-terminated lines of a log file.
fn parse_lines(bytes: &[u8], path: &Path) -> Vec<Event> {
    // Only complete lines count; the tail after the last newline may be a
    // concurrent append in progress.
    let complete = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(end) => &bytes[..=end],
        None => return Vec::new(),
    };

    let mut events = Vec::new();
    for (index, raw) in complete.split(|&b| b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|value| Event::from_value(&value));
        match parsed {
            Some(event) => events.push(event),
            None => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "Skipping unparseable event log line"
                );
            }
        }
    }
    events
}
