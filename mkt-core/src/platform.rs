//! Platform-specific data directories.

use std::path::PathBuf;
use crate::constants::APP_NAME;
use crate::error::{MktError, MktResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Application data directory (database, logs).
    ///
    /// - Windows: `%APPDATA%/Marketplace`
    /// - macOS: `~/Library/Application Support/Marketplace`
    /// - Linux: `~/.local/share/Marketplace`
    pub fn data_dir() -> MktResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| MktError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Application configuration directory.
    pub fn config_dir() -> MktResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| MktError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::MacOs => write!(f, "macos"),
            Self::Linux => write!(f, "linux"),
        }
    }
}
