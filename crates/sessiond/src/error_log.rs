//! Append-only diagnostic log for internal failures.
//!
//! One line per failure: `<RFC3339> | ERROR: <context> | <detail>`. Runtime
//! stderr lands here instead of in client responses.

use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Write failures are logged and swallowed.
    pub async fn record(&self, context: &str, detail: &str) {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format_record(&timestamp, context, detail);

        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.write(line.as_bytes()).await {
            warn!(path = %self.path.display(), "failed to write error log: {}", e);
        }
    }

    async fn write(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}

fn format_record(timestamp: &str, context: &str, detail: &str) -> String {
    // Keep one record per line.
    let detail = detail.replace(['\r', '\n'], " ");
    format!("{timestamp} | ERROR: {context} | {detail}\n")
}
