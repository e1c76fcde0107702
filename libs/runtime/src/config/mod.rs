//! Layered configuration.
//!
//! ```text
//! defaults (set by modules during registration)
//!     → config file (discovered across search paths, YAML)
//!     → environment (<PREFIX>__SECTION__KEY)
//!     → overrides (explicit command-line flags)
//!     → ConfigTree snapshot (immutable, swapped atomically)
//!
//! On file change:
//!     notify event → debounce stage → ConfigChanges::next()
//!     → ConfigStore::reload() → new snapshot
//! ```

mod store;
mod tree;
mod watch;

pub use store::{expand_search_path, ConfigStore, LoadSpec};
pub use tree::ConfigTree;
pub use watch::{spawn_debounce, ConfigChanges};

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading, reading or watching configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file '{name}' not found (searched: {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("missing required config section '{0}'")]
    MissingSection(String),

    #[error("failed to unmarshal config section '{section}': {source}")]
    Unmarshal {
        section: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config file {} must contain a mapping at the top level", path.display())]
    NotAMapping { path: PathBuf },

    #[error("unsupported config file extension '{0}' (supported: yaml, yml, json)")]
    UnsupportedFormat(String),

    #[error("failed to merge config layers: {0}")]
    Merge(#[from] Box<figment::Error>),

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error("no config file is backing this store")]
    NoBackingFile,

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
