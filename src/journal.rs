//! Append-only event journal with retention rotation
//!
//! One line-delimited JSON file per (stream, key): attack events keyed by UTC
//! date, WS/CDP session transcripts keyed by session id. Appends go through a
//! dedicated writer task so ingestion never blocks on disk; each record is
//! flushed when written, and writer handles are lazily created and reused.
//! Rotation deletes date-named files older than the retention window, closing
//! any open handle first.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Logical log destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Classified attack events, one file per UTC date
    Attacks,
    /// Raw WebSocket session transcripts, one file per session id
    WsSessions,
    /// Raw CDP session transcripts, one file per session id
    CdpSessions,
}

impl Stream {
    pub const ALL: [Stream; 3] = [Stream::Attacks, Stream::WsSessions, Stream::CdpSessions];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Stream::Attacks => "attacks",
            Stream::WsSessions => "ws-sessions",
            Stream::CdpSessions => "cdp-sessions",
        }
    }
}

enum JournalMessage {
    Append { path: PathBuf, line: String },
    Flush(oneshot::Sender<()>),
    Rotate { retention_days: i64 },
    Shutdown(oneshot::Sender<()>),
}

/// Handle for appending records; clone freely across ingestion contexts
#[derive(Clone)]
pub struct Journal {
    tx: mpsc::UnboundedSender<JournalMessage>,
    data_dir: PathBuf,
}

impl Journal {
    /// Create the stream directories and start the writer task.
    ///
    /// Failure to create the storage layout is the one fatal error in this
    /// core.
    pub fn start(data_dir: &Path) -> Result<Self> {
        for stream in Stream::ALL {
            let dir = data_dir.join(stream.dir_name());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let task = WriterTask {
            data_dir: data_dir.to_path_buf(),
            writers: HashMap::new(),
        };
        tokio::spawn(task.run(rx));

        Ok(Self {
            tx,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Append one record as a single JSON line to `(stream, key)`.
    ///
    /// Serialization failures and writer-task loss are reported and the
    /// record is dropped; the pipeline continues.
    pub fn append<T: Serialize>(&self, stream: Stream, key: &str, record: &T) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                warn!("Failed to encode journal record: {}", err);
                return;
            }
        };
        let path = self.file_path(stream, key);
        if self.tx.send(JournalMessage::Append { path, line }).is_err() {
            warn!("Journal writer is gone; record dropped");
        }
    }

    /// Wait until every record sent so far has reached its file
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(JournalMessage::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Delete date-named files older than the retention window
    pub fn rotate(&self, retention_days: i64) {
        let _ = self.tx.send(JournalMessage::Rotate { retention_days });
    }

    /// Final flush, then close every writer. No partial last lines.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(JournalMessage::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn file_path(&self, stream: Stream, key: &str) -> PathBuf {
        self.data_dir
            .join(stream.dir_name())
            .join(format!("{key}.jsonl"))
    }
}

struct WriterTask {
    data_dir: PathBuf,
    writers: HashMap<PathBuf, BufWriter<File>>,
}

impl WriterTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<JournalMessage>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                JournalMessage::Append { path, line } => self.append(path, line),
                JournalMessage::Flush(ack) => {
                    self.flush_all();
                    let _ = ack.send(());
                }
                JournalMessage::Rotate { retention_days } => self.rotate(retention_days),
                JournalMessage::Shutdown(ack) => {
                    self.flush_all();
                    self.writers.clear();
                    let _ = ack.send(());
                    break;
                }
            }
        }
        debug!("Journal writer task stopped");
    }

    fn append(&mut self, path: PathBuf, line: String) {
        let writer = match self.writers.entry(path.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                match OpenOptions::new().create(true).append(true).open(&path) {
                    Ok(file) => entry.insert(BufWriter::new(file)),
                    Err(err) => {
                        warn!("Failed to open log file {}: {}", path.display(), err);
                        return;
                    }
                }
            }
        };

        // One line per record, flushed so a crash never truncates mid-line
        // into the next append.
        let result = writeln!(writer, "{line}").and_then(|_| writer.flush());
        if let Err(err) = result {
            warn!("Failed to append to {}: {}", path.display(), err);
            self.writers.remove(&path);
        }
    }

    fn flush_all(&mut self) {
        for (path, writer) in self.writers.iter_mut() {
            if let Err(err) = writer.flush() {
                warn!("Failed to flush {}: {}", path.display(), err);
            }
        }
    }

    /// Best-effort deletion of expired date-named files across all streams.
    /// Missing directories and individual failures never halt the pass.
    fn rotate(&mut self, retention_days: i64) {
        let cutoff = (Utc::now() - Duration::days(retention_days)).date_naive();

        for stream in Stream::ALL {
            let dir = self.data_dir.join(stream.dir_name());
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.flatten() {
                let path = entry.path();
                let Some(date) = file_date(&path) else {
                    continue;
                };
                if date >= cutoff {
                    continue;
                }

                self.writers.remove(&path);
                match std::fs::remove_file(&path) {
                    Ok(()) => info!("Rotated old log: {}", path.display()),
                    Err(err) => warn!("Failed to rotate {}: {}", path.display(), err),
                }
            }
        }
    }
}

/// Parse `YYYY-MM-DD` from a `*.jsonl` filename; session-id files don't
/// qualify and are never rotated by date.
fn file_date(path: &Path) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".jsonl")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_append_round_trip() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        let records: Vec<Value> = (0..25)
            .map(|n| json!({"seq": n, "method": "GET", "path": format!("/probe/{n}")}))
            .collect();
        for record in &records {
            journal.append(Stream::Attacks, "2026-08-07", record);
        }
        journal.flush().await;

        let read = read_lines(&journal.file_path(Stream::Attacks, "2026-08-07"));
        assert_eq!(read, records);
    }

    #[tokio::test]
    async fn test_session_streams_are_separate_files() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        journal.append(Stream::WsSessions, "sess-a", &json!({"dir": "in"}));
        journal.append(Stream::WsSessions, "sess-b", &json!({"dir": "out"}));
        journal.append(Stream::CdpSessions, "sess-a", &json!({"m": "Page.navigate"}));
        journal.flush().await;

        assert_eq!(read_lines(&journal.file_path(Stream::WsSessions, "sess-a")).len(), 1);
        assert_eq!(read_lines(&journal.file_path(Stream::WsSessions, "sess-b")).len(), 1);
        assert_eq!(read_lines(&journal.file_path(Stream::CdpSessions, "sess-a")).len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_deletes_only_expired_dates() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        let old_key = (Utc::now() - Duration::days(45)).format("%Y-%m-%d").to_string();
        let fresh_key = Utc::now().format("%Y-%m-%d").to_string();

        journal.append(Stream::Attacks, &old_key, &json!({"n": 1}));
        journal.append(Stream::Attacks, &fresh_key, &json!({"n": 2}));
        journal.append(Stream::WsSessions, "long-session-id", &json!({"n": 3}));
        journal.flush().await;

        journal.rotate(30);
        journal.flush().await;

        assert!(!journal.file_path(Stream::Attacks, &old_key).exists());
        assert!(journal.file_path(Stream::Attacks, &fresh_key).exists());
        // session files have no date, rotation leaves them alone
        assert!(journal.file_path(Stream::WsSessions, "long-session-id").exists());
    }

    #[tokio::test]
    async fn test_rotation_boundary_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        let on_cutoff = (Utc::now() - Duration::days(30)).format("%Y-%m-%d").to_string();
        journal.append(Stream::Attacks, &on_cutoff, &json!({"n": 1}));
        journal.flush().await;

        journal.rotate(30);
        journal.flush().await;

        // a file dated exactly on the cutoff remains
        assert!(journal.file_path(Stream::Attacks, &on_cutoff).exists());
    }

    #[tokio::test]
    async fn test_append_reopens_after_rotation() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        let old_key = (Utc::now() - Duration::days(60)).format("%Y-%m-%d").to_string();
        journal.append(Stream::Attacks, &old_key, &json!({"n": 1}));
        journal.flush().await;
        journal.rotate(30);
        journal.flush().await;
        assert!(!journal.file_path(Stream::Attacks, &old_key).exists());

        // a write to the same key after rotation creates a fresh file
        journal.append(Stream::Attacks, &old_key, &json!({"n": 2}));
        journal.flush().await;
        let lines = read_lines(&journal.file_path(Stream::Attacks, &old_key));
        assert_eq!(lines, vec![json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_shutdown_leaves_complete_lines() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::start(dir.path()).unwrap();

        for n in 0..100 {
            journal.append(Stream::Attacks, "2026-08-07", &json!({"seq": n}));
        }
        journal.shutdown().await;

        let content =
            std::fs::read_to_string(journal.file_path(Stream::Attacks, "2026-08-07")).unwrap();
        assert_eq!(content.lines().count(), 100);
        assert!(content.ends_with('\n'));
    }
}
