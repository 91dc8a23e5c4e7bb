use std::path::{Path, PathBuf};
use std::{env, fs};

use lucid_core::LogRecord;

use crate::error::{Result, StoreError};
use crate::store::Store;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "LUCID_DATA_DIR";

/// Base directory for all lucid storage: `$LUCID_DATA_DIR`, else `~/.lucid`.
pub fn default_base_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs_home().join(".lucid")
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Sanitize a knowledge base name for use as a filename.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One database per named knowledge base.
///
/// Layout:
/// ```text
/// ~/.lucid/
/// ├── config.toml
/// └── kbs/
///     ├── default.db
///     └── <name>.db
/// ```
pub struct KbStore {
    store: Store,
    name: String,
    path: Option<PathBuf>,
}

impl KbStore {
    /// Open (creating if needed) the knowledge base `name` under `base_dir`,
    /// or under [`default_base_dir`] when none is given.
    pub fn open(name: &str, base_dir: Option<&Path>) -> Result<Self> {
        let base = base_dir.map(PathBuf::from).unwrap_or_else(default_base_dir);
        let kbs_dir = base.join("kbs");

        fs::create_dir_all(&kbs_dir).map_err(|e| {
            StoreError::InvalidData(format!("failed to create {}: {e}", kbs_dir.display()))
        })?;

        let name = match sanitize_name(name) {
            n if n.is_empty() => "default".to_string(),
            n => n,
        };
        let path = kbs_dir.join(format!("{name}.db"));
        let store = Store::open(&path)?;

        Ok(Self {
            store,
            name,
            path: Some(path),
        })
    }

    /// Open with an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            store: Store::open_in_memory()?,
            name: "test".to_string(),
            path: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn load_log(&self) -> Result<Vec<LogRecord>> {
        self.store.load_log()
    }

    pub fn sync_log(&self, log: &[LogRecord]) -> Result<usize> {
        self.store.sync_log(log)
    }

    pub fn replace_log(&self, log: &[LogRecord]) -> Result<()> {
        self.store.replace_log(log)
    }
}
