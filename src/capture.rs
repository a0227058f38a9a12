// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Durable, human-readable append-only log of captured requests.
//!
//! Each entry is a blank-line-separated block of the form
//! `<timestamp> ---- <JSON payload>`. Writes happen on a single background
//! task so that entries land in the order they were recorded, and so that a
//! slow or failing disk never holds up the request path.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::PersistenceError;

const SEPARATOR: &str = " ---- ";

enum LogCommand {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background log writer. Cheap to clone.
#[derive(Clone)]
pub struct CaptureLog {
    tx: mpsc::UnboundedSender<LogCommand>,
    path: PathBuf,
}

impl CaptureLog {
    /// Start the writer task for `path`. The file is opened lazily on the
    /// first entry, so an unwritable path only shows up as logged
    /// persistence errors.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path: PathBuf = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), rx));
        Self { tx, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an entry. Never waits and never fails from the caller's view.
    pub fn append(&self, received_at: &DateTime<Utc>, payload: &Value) {
        let block = format_entry(received_at, payload);
        if self.tx.send(LogCommand::Append(block)).is_err() {
            tracing::warn!(path = %self.path.display(), "capture log writer is gone, entry dropped");
        }
    }

    /// Wait until every entry queued before this call has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::UnboundedReceiver<LogCommand>) {
    let mut file: Option<tokio::fs::File> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            LogCommand::Append(block) => {
                if let Err(e) = write_block(&path, &mut file, &block).await {
                    tracing::warn!(error = %e, "capture log write failed");
                    // reopen on the next entry
                    file = None;
                }
            }
            LogCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn write_block(
    path: &Path,
    file: &mut Option<tokio::fs::File>,
    block: &str,
) -> Result<(), PersistenceError> {
    let display = || path.display().to_string();
    if file.is_none() {
        let f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| PersistenceError::Open {
                path: display(),
                source,
            })?;
        *file = Some(f);
    }
    if let Some(f) = file.as_mut() {
        f.write_all(block.as_bytes())
            .await
            .map_err(|source| PersistenceError::Write {
                path: display(),
                source,
            })?;
        f.flush().await.map_err(|source| PersistenceError::Write {
            path: display(),
            source,
        })?;
    }
    Ok(())
}

/// Render one log block, leading blank line included.
pub fn format_entry(received_at: &DateTime<Utc>, payload: &Value) -> String {
    format!("\n\n{}{}{}", received_at.to_rfc3339(), SEPARATOR, payload)
}

/// Read a capture log back into `(timestamp, payload)` pairs, oldest first.
///
/// Blocks that cannot be parsed are skipped with a warning. A missing file
/// yields an empty list.
pub async fn read_log<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<(DateTime<Utc>, Value)>> {
    let path_ref = path.as_ref();

    if !tokio::fs::try_exists(path_ref).await.unwrap_or(false) {
        return Ok(Vec::new());
    }

    let contents = tokio::fs::read_to_string(path_ref).await?;
    let mut entries = Vec::new();

    for (idx, block) in contents.split("\n\n").enumerate() {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        match parse_entry(block) {
            Some(entry) => entries.push(entry),
            None => {
                tracing::warn!(block = idx, "failed to parse capture log entry, skipping");
            }
        }
    }

    Ok(entries)
}

fn parse_entry(block: &str) -> Option<(DateTime<Utc>, Value)> {
    let (ts, json) = block.split_once(SEPARATOR)?;
    let ts = DateTime::parse_from_rfc3339(ts.trim()).ok()?.with_timezone(&Utc);
    let payload = serde_json::from_str(json).ok()?;
    Some((ts, payload))
}
