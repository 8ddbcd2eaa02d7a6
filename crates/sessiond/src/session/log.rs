//! Append-only stdio transcripts.
//!
//! Each session owns one `<id>_stdio.xml` file holding one
//! `<message timestamp="...">escaped text</message>` element per line. The
//! in-memory cache mirrors the file; an append pushes to the cache and writes
//! the same bytes to disk while holding that session's transcript lock, so
//! cache order and file order never differ.

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TRANSCRIPT_SUFFIX: &str = "_stdio.xml";

static MESSAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<message timestamp="([^"]*)">(.*?)</message>"#)
        .expect("transcript pattern is valid")
});

/// Transcript errors.
#[derive(Debug, Error)]
pub enum LogError {
    /// Session ids must be UUIDs; they become file names.
    #[error("invalid session id: {0}")]
    InvalidId(String),

    #[error("transcript io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One transcript entry. `message` is stored escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    fn new(text: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            message: escape(text),
        }
    }

    /// The original, unescaped text.
    pub fn text(&self) -> String {
        unescape(&self.message)
    }

    fn to_xml(&self) -> String {
        format!(
            "<message timestamp=\"{}\">{}</message>\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.message
        )
    }
}

/// Escape the five XML special characters.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Reverse [`escape`].
pub fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse transcript file content into entries, skipping malformed elements.
pub fn parse_transcript(content: &str) -> Vec<LogEntry> {
    MESSAGE_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let timestamp = match DateTime::parse_from_rfc3339(&caps[1]) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    warn!("skipping transcript entry with bad timestamp {:?}: {}", &caps[1], e);
                    return None;
                }
            };
            Some(LogEntry {
                timestamp,
                message: caps[2].to_string(),
            })
        })
        .collect()
}

fn validate_id(id: &str) -> Result<(), LogError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| LogError::InvalidId(id.to_string()))
}

type Transcript = Arc<Mutex<Vec<LogEntry>>>;

/// Per-session transcript store.
#[derive(Debug)]
pub struct SessionLog {
    dir: PathBuf,
    cache: DashMap<String, Transcript>,
}

impl SessionLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: DashMap::new(),
        }
    }

    /// Directory holding the transcript files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backing file for `id`.
    pub fn transcript_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}{TRANSCRIPT_SUFFIX}"))
    }

    /// Whether `id` has a cache entry. This is registry membership.
    pub fn exists(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Ids with a cache entry, in no particular order.
    pub fn session_ids(&self) -> Vec<String> {
        self.cache.iter().map(|e| e.key().clone()).collect()
    }

    /// Read the transcript file into the cache, or seed an empty entry.
    ///
    /// A session already cached is left untouched.
    pub async fn load(&self, id: &str) -> Result<(), LogError> {
        validate_id(id)?;
        if self.exists(id) {
            return Ok(());
        }

        let path = self.transcript_path(id);
        let entries = match fs::read_to_string(&path).await {
            Ok(content) => parse_transcript(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(LogError::Io { path, source }),
        };

        debug!(session_id = %id, entries = entries.len(), "loaded transcript");
        self.cache
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(entries)));
        Ok(())
    }

    /// Load every transcript found in the sessions directory.
    ///
    /// Creates the directory when missing. Returns the number of sessions
    /// now registered.
    pub async fn restore(&self) -> Result<usize, LogError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| LogError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|source| LogError::Io {
                path: self.dir.clone(),
                source,
            })?;

        while let Some(entry) = dir.next_entry().await.map_err(|source| LogError::Io {
            path: self.dir.clone(),
            source,
        })? {
            let file_name = entry.file_name();
            let Some(id) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(TRANSCRIPT_SUFFIX))
            else {
                continue;
            };

            match self.load(id).await {
                Ok(()) => {}
                Err(LogError::InvalidId(_)) => {
                    debug!("ignoring non-session file {:?}", file_name);
                }
                Err(e) => return Err(e),
            }
        }

        let count = self.cache.len();
        info!(sessions = count, dir = %self.dir.display(), "restored session transcripts");
        Ok(count)
    }

    /// Append one escaped, timestamped entry to the cache and the file.
    ///
    /// A disk failure is reported after the cache has already taken the
    /// entry; the two are then out of step and need investigating.
    pub async fn append(&self, id: &str, message: &str) -> Result<(), LogError> {
        validate_id(id)?;

        let slot = self.cache.entry(id.to_string()).or_default().clone();
        let mut entries = slot.lock().await;

        let entry = LogEntry::new(message);
        let line = entry.to_xml();
        entries.push(entry);

        let path = self.transcript_path(id);
        write_line(&path, line.as_bytes())
            .await
            .map_err(|source| LogError::Io { path, source })
    }

    /// Evict the cache entry and delete the file. A missing file is fine.
    pub async fn remove(&self, id: &str) -> Result<(), LogError> {
        validate_id(id)?;

        if let Some((_, slot)) = self.cache.remove(id) {
            // Let an in-flight append finish before the file goes away.
            let _entries = slot.lock().await;
        }

        let path = self.transcript_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LogError::Io { path, source }),
        }
    }

    /// Snapshot of the cached entries for `id`.
    pub async fn entries(&self, id: &str) -> Option<Vec<LogEntry>> {
        let slot = self.cache.get(id).map(|slot| slot.value().clone())?;
        let entries = slot.lock().await;
        Some(entries.clone())
    }
}

async fn write_line(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}
