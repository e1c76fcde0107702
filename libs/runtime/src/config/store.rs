use arc_swap::ArcSwap;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::tree::{insert_path, normalize_keys, ConfigTree};
use super::watch::{watch_file, ConfigChanges};
use super::ConfigError;

/// Where and how to look for the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    /// File name without extension, may contain directories ("etc/default").
    pub name: String,
    /// Extensions tried for every search path, in order.
    pub extensions: Vec<String>,
    /// Directories searched in order; `$HOME` and `~` are expanded.
    pub search_paths: Vec<String>,
    /// Fail when no file is found instead of running on defaults.
    pub must_exist: bool,
    /// Explicit file; replaces discovery and must exist.
    pub file: Option<PathBuf>,
}

impl Default for LoadSpec {
    fn default() -> Self {
        Self {
            name: "etc/default".to_string(),
            extensions: vec!["yaml".to_string()],
            search_paths: vec![".".to_string(), "$HOME".to_string(), "/etc".to_string()],
            must_exist: false,
            file: None,
        }
    }
}

impl LoadSpec {
    /// Every candidate path in search order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(self.search_paths.len() * self.extensions.len());
        for dir in &self.search_paths {
            let Some(dir) = expand_search_path(dir) else {
                continue;
            };
            for ext in &self.extensions {
                let ext = ext.trim_start_matches('.');
                out.push(dir.join(format!("{}.{ext}", self.name)));
            }
        }
        out
    }

    /// Resolve the file to load.
    ///
    /// `Ok(None)` means nothing was found and the file is optional.
    pub fn locate(&self) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(file) = &self.file {
            if file.is_file() {
                return Ok(Some(file.clone()));
            }
            return Err(ConfigError::NotFound {
                name: file.display().to_string(),
                searched: vec![file.clone()],
            });
        }

        for ext in &self.extensions {
            check_extension(ext.trim_start_matches('.'))?;
        }

        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(Some(found.clone()));
        }
        if self.must_exist {
            return Err(ConfigError::NotFound {
                name: self.name.clone(),
                searched: candidates,
            });
        }
        Ok(None)
    }
}

/// Expand a leading `$HOME` or `~` in a search path.
///
/// Returns `None` when the home directory cannot be determined; such a search
/// path is skipped.
pub fn expand_search_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    let rest = if let Some(rest) = raw.strip_prefix("$HOME") {
        rest
    } else if let Some(rest) = raw.strip_prefix('~') {
        rest
    } else {
        return Some(PathBuf::from(raw));
    };
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')) {
        // "$HOMEDIR" or "~user" are not expanded
        return Some(PathBuf::from(raw));
    }
    let home = dirs::home_dir()?;
    let rest = rest.trim_start_matches(['/', '\\']);
    Some(if rest.is_empty() { home } else { home.join(rest) })
}

fn check_extension(ext: &str) -> Result<(), ConfigError> {
    match ext.to_ascii_lowercase().as_str() {
        // JSON is a subset of YAML; one parser reads all three
        "yaml" | "yml" | "json" => Ok(()),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    check_extension(ext)?;
    let text = std::fs::read_to_string(path)?;
    let doc: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    match normalize_keys(doc) {
        Value::Null => Ok(Value::Object(Map::new())),
        obj @ Value::Object(_) => Ok(obj),
        _ => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// Layered configuration store.
///
/// Precedence from lowest to highest: defaults, config file, environment,
/// overrides. Readers get immutable snapshots; every load or reload builds a
/// complete new tree and swaps it in.
pub struct ConfigStore {
    env_prefix: String,
    defaults: Mutex<Value>,
    overrides: Mutex<Value>,
    /// Parsed content of the backing file, kept for rebuilds.
    file_doc: Mutex<Value>,
    source: Mutex<Option<PathBuf>>,
    snapshot: ArcSwap<ConfigTree>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("env_prefix", &self.env_prefix)
            .field("source", &*self.source.lock())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Create an empty store. Environment variables named
    /// `<ENV_PREFIX>__SECTION__KEY` override file values.
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: env_prefix.into().trim_end_matches('_').to_ascii_uppercase(),
            defaults: Mutex::new(Value::Object(Map::new())),
            overrides: Mutex::new(Value::Object(Map::new())),
            file_doc: Mutex::new(Value::Object(Map::new())),
            source: Mutex::new(None),
            snapshot: ArcSwap::from_pointee(ConfigTree::empty()),
        }
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    /// Lowest-precedence value for a dotted key. Takes effect on the next
    /// [`rebuild`](Self::rebuild), [`load`](Self::load) or [`reload`](Self::reload).
    pub fn set_default(&self, key: &str, value: impl Into<Value>) {
        insert_path(&mut self.defaults.lock(), key, value.into());
    }

    /// Highest-precedence value for a dotted key (explicit flags).
    pub fn set_override(&self, key: &str, value: impl Into<Value>) {
        insert_path(&mut self.overrides.lock(), key, value.into());
    }

    /// Discover and read the config file, then publish a fresh snapshot.
    ///
    /// When nothing is found and the file is optional, the snapshot is built
    /// from defaults, environment and overrides alone.
    pub fn load(&self, spec: &LoadSpec) -> Result<Arc<ConfigTree>, ConfigError> {
        let found = spec.locate()?;
        let doc = match &found {
            Some(path) => read_document(path)?,
            None => Value::Object(Map::new()),
        };
        let tree = self.compose(&doc)?;

        match &found {
            Some(path) => tracing::debug!(path = %path.display(), "config file loaded"),
            None => tracing::debug!(name = %spec.name, "no config file found; using defaults"),
        }

        *self.file_doc.lock() = doc;
        *self.source.lock() = found;
        Ok(self.publish(tree))
    }

    /// Re-read the previously discovered file.
    ///
    /// On failure the current snapshot stays in effect.
    pub fn reload(&self) -> Result<Arc<ConfigTree>, ConfigError> {
        let path = self.source().ok_or(ConfigError::NoBackingFile)?;
        let doc = read_document(&path)?;
        let tree = self.compose(&doc)?;
        *self.file_doc.lock() = doc;
        tracing::debug!(path = %path.display(), "config file reloaded");
        Ok(self.publish(tree))
    }

    /// Recompose the snapshot from the cached file content and the current
    /// defaults, environment and overrides.
    pub fn rebuild(&self) -> Result<Arc<ConfigTree>, ConfigError> {
        let doc = self.file_doc.lock().clone();
        let tree = self.compose(&doc)?;
        Ok(self.publish(tree))
    }

    pub fn current(&self) -> Arc<ConfigTree> {
        self.snapshot.load_full()
    }

    /// Section of the current snapshot; `None` when absent.
    pub fn subtree(&self, path: &str) -> Option<ConfigTree> {
        self.snapshot.load().subtree(path)
    }

    /// Path of the file backing the store, if one was found.
    pub fn source(&self) -> Option<PathBuf> {
        self.source.lock().clone()
    }

    /// Subscribe to changes of the backing file.
    ///
    /// Bursts of file-system events within `debounce` collapse into one
    /// notification. Must be called from within a Tokio runtime.
    pub fn watch(&self, debounce: Duration) -> Result<ConfigChanges, ConfigError> {
        let path = self.source().ok_or(ConfigError::NoBackingFile)?;
        watch_file(&path, debounce)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        self.current().to_yaml()
    }

    fn compose(&self, file_doc: &Value) -> Result<ConfigTree, ConfigError> {
        let defaults = self.defaults.lock().clone();
        let overrides = self.overrides.lock().clone();

        let figment = Figment::new()
            .merge(Serialized::defaults(defaults))
            .merge(Serialized::defaults(file_doc.clone()))
            // SCAFFOLD__SETTINGS__LOG__LEVEL=debug maps to settings.log.level
            .merge(Env::prefixed(&format!("{}__", self.env_prefix)).split("__"))
            .merge(Serialized::defaults(overrides));

        let merged: Value = figment
            .extract()
            .map_err(|e| ConfigError::Merge(Box::new(e)))?;
        Ok(ConfigTree::from_value(merged))
    }

    fn publish(&self, tree: ConfigTree) -> Arc<ConfigTree> {
        let tree = Arc::new(tree);
        self.snapshot.store(tree.clone());
        tree
    }
}
