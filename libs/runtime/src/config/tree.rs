use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;

use super::ConfigError;

/// Immutable snapshot of the merged configuration document.
///
/// Keys are case-insensitive: every object key is lowercased when the tree is
/// built, and lookups lowercase the requested path the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    /// Dotted path of this tree inside the root document ("" for the root).
    prefix: String,
    root: Value,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigTree {
    pub fn empty() -> Self {
        Self {
            prefix: String::new(),
            root: Value::Object(Map::new()),
        }
    }

    /// Build a tree from a raw document, normalizing keys.
    pub fn from_value(value: Value) -> Self {
        let root = match normalize_keys(value) {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            prefix: String::new(),
            root,
        }
    }

    /// Path of this tree relative to the document root.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.as_object().map_or(true, |m| m.is_empty())
    }

    /// Look up a dotted key path ("settings.log.level").
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut cur = &self.root;
        for seg in split_path(path) {
            cur = cur.as_object()?.get(&seg)?;
        }
        Some(cur)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Scoped view rooted at `path`.
    ///
    /// Returns `None` when the path is absent or does not point at a section
    /// (a nested mapping). An empty section is still `Some`.
    pub fn subtree(&self, path: &str) -> Option<ConfigTree> {
        let value = self.get(path)?;
        if !value.is_object() {
            return None;
        }
        Some(Self {
            prefix: join_prefix(&self.prefix, path),
            root: value.clone(),
        })
    }

    /// Like [`subtree`](Self::subtree) but a missing section is an error.
    pub fn require_subtree(&self, path: &str) -> Result<ConfigTree, ConfigError> {
        self.subtree(path)
            .ok_or_else(|| ConfigError::MissingSection(join_prefix(&self.prefix, path)))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    /// Scalar value rendered as a string; numbers and booleans are stringified.
    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        match self.get(path)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        match self.get(path)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Durations are humantime strings ("5s", "300ms"); bare integers are seconds.
    pub fn get_duration(&self, path: &str) -> Option<Duration> {
        match self.get(path)? {
            Value::String(s) => humantime::parse_duration(s.trim()).ok(),
            Value::Number(n) => n.as_u64().map(Duration::from_secs),
            _ => None,
        }
    }

    /// Deserialize the whole tree into `T`.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(self.root.clone()).map_err(|source| ConfigError::Unmarshal {
            section: if self.prefix.is_empty() {
                "<root>".to_string()
            } else {
                self.prefix.clone()
            },
            source,
        })
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.root).map_err(ConfigError::Serialize)
    }
}

/// Split a dotted path into lowercase segments, ignoring empty ones.
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_ascii_lowercase)
}

/// Insert `value` at a dotted path, creating intermediate sections.
/// A scalar in the way of the path is replaced by a section.
pub(crate) fn insert_path(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<String> = split_path(path).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        cur = match cur {
            Value::Object(map) => map
                .entry(seg.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Value::Object(map) = cur {
        map.insert(last.clone(), normalize_keys(value));
    }
}

/// Recursively lowercase object keys. Colliding keys keep the last value.
pub(crate) fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), normalize_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}

fn join_prefix(prefix: &str, path: &str) -> String {
    let tail = split_path(path).collect::<Vec<_>>().join(".");
    match (prefix.is_empty(), tail.is_empty()) {
        (true, _) => tail,
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}.{tail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn sample() -> ConfigTree {
        ConfigTree::from_value(json!({
            "Settings": {
                "Log": { "Level": "debug", "format": "json", "output": "stdout" },
                "mysql": { "port": 3306, "connect_timeout": "5s", "enabled": "true" }
            }
        }))
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let tree = sample();
        assert_eq!(tree.get_str("settings.log.level"), Some("debug"));
        assert_eq!(tree.get_str("SETTINGS.LOG.LEVEL"), Some("debug"));
        assert!(tree.contains("settings.mysql"));
        assert!(!tree.contains("settings.redis"));
    }

    #[test]
    fn subtree_of_absent_path_is_none() {
        let tree = sample();
        assert!(tree.subtree("settings.redis").is_none());
        // scalar is not a section
        assert!(tree.subtree("settings.log.level").is_none());

        let err = tree.require_subtree("settings.redis").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "settings.redis"));
    }

    #[test]
    fn empty_section_is_present() {
        let tree = ConfigTree::from_value(json!({ "settings": { "log": {} } }));
        let log = tree.subtree("settings.log").expect("section exists");
        assert!(log.is_empty());
        assert_eq!(log.prefix(), "settings.log");
    }

    #[test]
    fn typed_getters() {
        let tree = sample();
        assert_eq!(tree.get_u64("settings.mysql.port"), Some(3306));
        assert_eq!(tree.get_string("settings.mysql.port").as_deref(), Some("3306"));
        assert_eq!(
            tree.get_duration("settings.mysql.connect_timeout"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(tree.get_bool("settings.mysql.enabled"), Some(true));
        assert_eq!(tree.get_bool("settings.log.level"), None);
    }

    #[test]
    fn extract_reports_section_on_failure() {
        #[derive(Debug, Deserialize)]
        struct Port {
            #[allow(dead_code)]
            port: String,
        }

        let mysql = sample().subtree("settings.mysql").unwrap();
        let err = mysql.extract::<Port>().unwrap_err();
        match err {
            ConfigError::Unmarshal { section, .. } => assert_eq!(section, "settings.mysql"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn insert_path_builds_sections() {
        let mut root = json!({});
        insert_path(&mut root, "settings.log.Level", json!("info"));
        insert_path(&mut root, "settings.log.format", json!("console"));
        assert_eq!(root, json!({ "settings": { "log": { "level": "info", "format": "console" } } }));

        // a scalar in the way becomes a section
        insert_path(&mut root, "settings.log.level.nested", json!(1));
        assert_eq!(root["settings"]["log"]["level"], json!({ "nested": 1 }));
    }
}
