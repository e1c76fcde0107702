//! Type-keyed hub of shared resources.
//!
//! Modules publish what they bring up during `initialize` (the database
//! handle, the CPU budget) and later modules or the application fetch it by
//! type: `hub.get::<DbHandle>()`. Trait objects work as keys too:
//! `hub.get::<dyn my::Api>()`.
//!
//! - Key = (type name, scope); `type_name::<T>()` works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read).
//! - Re-registering overwrites atomically; Arcs already handed out stay valid,
//!   which is what a reloaded module relies on when it republishes.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Global scope constant.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Clone, Eq, PartialEq, Hash)]
struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientHubError {
    #[error("resource not found: type={type_name}, scope={scope}")]
    NotFound {
        type_name: &'static str,
        scope: String,
    },

    #[error("type mismatch in hub for type={type_name}, scope={scope}")]
    TypeMismatch {
        type_name: &'static str,
        scope: String,
    },
}

type Boxed = Box<dyn Any + Send + Sync>;

/// Registry of shared resources keyed by (type, scope).
#[derive(Default)]
pub struct ClientHub {
    map: RwLock<HashMap<(TypeKey, Arc<str>), Boxed>>,
}

impl fmt::Debug for ClientHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .map
            .read()
            .keys()
            .map(|(t, s)| format!("{t:?}@{s}"))
            .collect();
        f.debug_struct("ClientHub").field("entries", &keys).finish()
    }
}

impl ClientHub {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `value` in the global scope under type `T`.
    pub fn register<T>(&self, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_scoped::<T>(GLOBAL_SCOPE, value);
    }

    /// Publish `value` in a named scope under type `T`.
    pub fn register_scoped<T>(&self, scope: impl Into<Arc<str>>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = (TypeKey::of::<T>(), scope.into());
        self.map.write().insert(key, Box::new(value));
    }

    /// Fetch from the global scope.
    pub fn get<T>(&self) -> Result<Arc<T>, ClientHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get_scoped::<T>(GLOBAL_SCOPE)
    }

    /// Fetch from a named scope.
    pub fn get_scoped<T>(&self, scope: impl Into<Arc<str>>) -> Result<Arc<T>, ClientHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let scope: Arc<str> = scope.into();
        let r = self.map.read();

        let boxed = r
            .get(&(type_key.clone(), scope.clone()))
            .ok_or_else(|| ClientHubError::NotFound {
                type_name: type_key.0,
                scope: scope.to_string(),
            })?;

        // Stored value is exactly `Arc<T>`.
        boxed
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| ClientHubError::TypeMismatch {
                type_name: type_key.0,
                scope: scope.to_string(),
            })
    }

    /// Remove an entry; returns it if it was present.
    pub fn remove<T>(&self, scope: impl Into<Arc<str>>) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let boxed = self
            .map
            .write()
            .remove(&(TypeKey::of::<T>(), scope.into()))?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Budget: Send + Sync {
        fn cpus(&self) -> usize;
    }

    struct Fixed(usize);
    impl Budget for Fixed {
        fn cpus(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn register_and_get_dyn_trait_global() {
        let hub = ClientHub::new();
        let api: Arc<dyn Budget> = Arc::new(Fixed(7));
        hub.register::<dyn Budget>(api.clone());

        let got = hub.get::<dyn Budget>().unwrap();
        assert_eq!(got.cpus(), 7);
        assert!(Arc::ptr_eq(&api, &got));
    }

    #[test]
    fn concrete_types_and_overwrite() {
        let hub = ClientHub::new();
        hub.register(Arc::new(String::from("first")));
        let held = hub.get::<String>().unwrap();
        hub.register(Arc::new(String::from("second")));

        assert_eq!(*held, "first");
        assert_eq!(*hub.get::<String>().unwrap(), "second");
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn scopes_are_independent() {
        let hub = ClientHub::new();
        hub.register_scoped::<dyn Budget>("tenant-1", Arc::new(Fixed(1)));
        hub.register_scoped::<dyn Budget>("tenant-2", Arc::new(Fixed(2)));

        assert_eq!(hub.get_scoped::<dyn Budget>("tenant-1").unwrap().cpus(), 1);
        assert_eq!(hub.get_scoped::<dyn Budget>("tenant-2").unwrap().cpus(), 2);
        assert!(matches!(
            hub.get::<dyn Budget>(),
            Err(ClientHubError::NotFound { .. })
        ));

        assert!(hub.remove::<dyn Budget>("tenant-1").is_some());
        assert!(hub.get_scoped::<dyn Budget>("tenant-1").is_err());
        hub.clear();
        assert!(hub.is_empty());
    }
}
