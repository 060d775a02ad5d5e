//! Where the configuration document comes from.

use std::fs;
use std::io;
use std::path::PathBuf;

/// Supplies the raw configuration document and its origin for logging.
///
/// Failure to read is not fatal to the daemon; the caller substitutes
/// defaults and keeps running.
pub trait ConfigSource: Send + Sync {
    /// Human-readable origin (file path, URL, ...) for log messages.
    fn location(&self) -> String;

    /// Read the whole document.
    fn read_document(&self) -> io::Result<String>;
}

/// Configuration from a file on disk.
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileConfigSource {
    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn read_document(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}
