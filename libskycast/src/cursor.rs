//! Resumption cursor storage
//!
//! The cursor is the `published` string of the last entry that was posted
//! successfully. It is stored verbatim, so the file always holds the value in
//! the feed's own date format.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::types::{parse_timestamp, Cursor, EventLog};

/// Durable storage for the single resumption cursor
pub trait CursorStore: Send + Sync {
    /// Read the cursor, `None` when nothing was posted yet
    fn load(&self) -> Result<Option<Cursor>>;

    /// Replace the stored cursor with `published`
    ///
    /// An `Ok` return means the value is durable.
    fn save(&self, published: &str) -> Result<()>;
}

fn parse_cursor(path: &str, raw: &str, date_format: &str) -> Result<Option<Cursor>> {
    let published = raw.trim();
    if published.is_empty() {
        return Ok(None);
    }
    match parse_timestamp(published, date_format) {
        Some(at) => Ok(Some(Cursor {
            published: published.to_string(),
            at,
        })),
        None => Err(StorageError::Corrupt {
            path: path.to_string(),
            value: published.to_string(),
        }
        .into()),
    }
}

/// Cursor kept in a plain text file
pub struct FileCursorStore {
    path: PathBuf,
    date_format: String,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>, date_format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            date_format: date_format.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "cursor".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }

    fn write_atomically(&self, published: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(published.as_bytes())?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<Cursor>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => parse_cursor(&self.display_path(), &content, &self.date_format),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No cursor at {}, starting fresh", self.path.display());
                Ok(None)
            }
            Err(source) => Err(StorageError::Unavailable {
                path: self.display_path(),
                source,
            }
            .into()),
        }
    }

    fn save(&self, published: &str) -> Result<()> {
        self.write_atomically(published)
            .map_err(|source| StorageError::Write {
                path: self.display_path(),
                source,
            })?;
        tracing::debug!("Cursor saved to {}: {}", self.path.display(), published);
        Ok(())
    }
}

/// In-memory cursor for tests and dry runs
pub struct MemoryCursorStore {
    value: Mutex<Option<String>>,
    date_format: String,
    fail_next_save: AtomicBool,
    events: Option<EventLog>,
}

impl MemoryCursorStore {
    pub fn new(date_format: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(None),
            date_format: date_format.into(),
            fail_next_save: AtomicBool::new(false),
            events: None,
        }
    }

    /// Start from an existing cursor value
    pub fn with_value(self, published: impl Into<String>) -> Self {
        *self.value.lock().unwrap() = Some(published.into());
        self
    }

    /// Record `save:<published>` into a shared event log
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Make the next `save` fail with a write error
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Current raw value
    pub fn value(&self) -> Option<String> {
        self.value.lock().unwrap().clone()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<Cursor>> {
        match self.value() {
            Some(raw) => parse_cursor("memory", &raw, &self.date_format),
            None => Ok(None),
        }
    }

    fn save(&self, published: &str) -> Result<()> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Write {
                path: "memory".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
            }
            .into());
        }
        *self.value.lock().unwrap() = Some(published.to_string());
        if let Some(events) = &self.events {
            events.lock().unwrap().push(format!("save:{}", published));
        }
        Ok(())
    }
}
