//! Logging setup and the per-interface logger handle.
//!
//! Log output goes through `tracing`. [`init`] installs the global
//! subscriber once at program start; kernels receive a [`Logger`] that
//! names the interface in every event and owns the optional debug
//! directory used for raw dumps (node descriptors, config data streams).
//!
//! # Example
//!
//! ```rust,no_run
//! use rs_trackside::config::LogConfig;
//! use rs_trackside::logging::{self, Logger};
//!
//! let config = LogConfig::default().with_debug_dir("/tmp/trackside");
//! logging::init(&config).unwrap();
//!
//! let logger = Logger::from_config("cs2", &config);
//! logger.dump("hello.bin", b"raw bytes").unwrap();
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.filter`. Fails if a subscriber is already
/// installed.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter.as_str())?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

/// Logger handle for one interface.
///
/// Cheap to clone; the worker thread gets its own copy.
#[derive(Clone, Debug)]
pub struct Logger {
    id: Arc<str>,
    debug_dir: Option<PathBuf>,
}

impl Logger {
    /// Logger for interface `id` without a debug directory.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: Arc::from(id.as_ref()),
            debug_dir: None,
        }
    }

    /// Logger using the debug directory from `config`, if any.
    pub fn from_config(id: impl AsRef<str>, config: &LogConfig) -> Self {
        let logger = Self::new(id);
        if config.has_debug_dir() {
            logger.with_debug_dir(config.debug_dir.as_str())
        } else {
            logger
        }
    }

    /// Set the debug directory.
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    /// Interface id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Debug directory, if configured.
    pub fn debug_dir(&self) -> Option<&Path> {
        self.debug_dir.as_deref()
    }

    /// Write `bytes` to `<debug_dir>/<id>/<name>`.
    ///
    /// Returns the written path, or `None` without a debug directory.
    pub fn dump(&self, name: &str, bytes: &[u8]) -> io::Result<Option<PathBuf>> {
        let Some(dir) = &self.debug_dir else {
            return Ok(None);
        };
        let dir = dir.join(sanitize(&self.id));
        fs::create_dir_all(&dir)?;
        let path = dir.join(sanitize(name));
        fs::write(&path, bytes)?;
        tracing::debug!(interface = %self.id, path = %path.display(), "wrote debug dump");
        Ok(Some(path))
    }

    /// Pretty JSON variant of [`dump`](Self::dump).
    pub fn dump_json<T: Serialize>(&self, name: &str, value: &T) -> io::Result<Option<PathBuf>> {
        if self.debug_dir.is_none() {
            return Ok(None);
        }
        let json = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
        self.dump(name, &json)
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_without_dir_is_noop() {
        let logger = Logger::new("x");
        assert_eq!(logger.dump("a.bin", b"123").unwrap(), None);
        assert_eq!(logger.dump_json("a.json", &[1, 2]).unwrap(), None);
    }

    #[test]
    fn dump_writes_under_interface_dir() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new("cs2/main").with_debug_dir(dir.path());
        let path = logger.dump("loks.bin", b"abc").unwrap().unwrap();
        assert_eq!(path, dir.path().join("cs2_main").join("loks.bin"));
        assert_eq!(fs::read(&path).unwrap(), b"abc");
    }

    #[test]
    fn dump_json_pretty() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new("diy").with_debug_dir(dir.path());
        let path = logger.dump_json("v.json", &vec![1, 2]).unwrap().unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains('1'));
        assert!(text.contains('\n'));
    }

    #[test]
    fn from_config_respects_empty_dir() {
        let logger = Logger::from_config("a", &LogConfig::default());
        assert!(logger.debug_dir().is_none());
        let logger = Logger::from_config("a", &LogConfig::default().with_debug_dir("/tmp/q"));
        assert_eq!(logger.debug_dir(), Some(Path::new("/tmp/q")));
    }
}
