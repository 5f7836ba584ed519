//! File backend configuration.

/// Configuration for opening a [`FileBackend`](crate::FileBackend).
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Whether to create the log file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync after every append (safer but slower).
    pub sync_on_write: bool,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: false,
        }
    }
}

impl FileConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the log file if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to fsync after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }
}
