//! Persistence adapters: serialize a source to an external store on every
//! change, optionally load an initial value, and optionally listen for
//! external change events (cross-tab sync) without echoing them back out
//! (§6).

use std::fmt;
use std::rc::Rc;

use cellkit_core::{Observer, Source};

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to serialize value for key {key:?}: {source}")]
    Serialize { key: String, source: serde_json::Error },

    #[error("failed to deserialize value for key {key:?}: {source}")]
    Deserialize { key: String, source: serde_json::Error },

    #[error("storage backend failed for key {key:?}: {source}")]
    Storage { key: String, source: Box<dyn std::error::Error + Send + Sync> },
}

/// A key-value storage backend. The default `serde_json` serializer pairs
/// with any `Storage` implementation (an in-memory map in tests, a real
/// browser `localStorage` shim outside this crate).
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>>;
    fn set(&self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// An external feed of "storage changed elsewhere" events, e.g. a
/// browser's `storage` event fired by another tab. No concrete binding
/// ships in this crate (there is no browser here); the adapter degrades
/// to write-only persistence when none is supplied.
pub trait StorageChangeSource {
    /// Register a callback invoked with `(key, new_raw_value)` whenever an
    /// external change arrives. Returns a handle that stops listening on
    /// drop.
    fn on_change(&self, callback: Box<dyn Fn(&str, &str)>) -> Box<dyn std::any::Any>;
}

pub struct PersistenceOptions {
    pub load_on_init: bool,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self { load_on_init: true }
    }
}

/// Binds a [`Source<T>`] to a storage key: serializes and writes on every
/// change, optionally hydrates from storage on construction, and
/// optionally listens for external changes to the same key. Cross-sync
/// writes go through the ordinary `Source::write` equality check, so an
/// echo of a value this adapter itself just wrote is a no-op.
pub struct PersistenceAdapter<T> {
    _observer: Observer,
    _change_listener: Option<Box<dyn std::any::Any>>,
    _source: Source<T>,
}

impl<T> PersistenceAdapter<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + Clone + fmt::Debug + 'static,
{
    pub fn new<S: Storage + 'static>(
        source: Source<T>,
        key: impl Into<String>,
        storage: Rc<S>,
        options: PersistenceOptions,
        on_error: impl Fn(PersistenceError) + 'static,
    ) -> Self {
        Self::with_change_source::<S, NoChangeSource>(source, key, storage, None, options, on_error)
    }

    pub fn with_change_source<S: Storage + 'static, C: StorageChangeSource + 'static>(
        source: Source<T>,
        key: impl Into<String>,
        storage: Rc<S>,
        change_source: Option<Rc<C>>,
        options: PersistenceOptions,
        on_error: impl Fn(PersistenceError) + 'static,
    ) -> Self {
        let key = key.into();
        let on_error = Rc::new(on_error);

        if options.load_on_init {
            match storage.get(&key) {
                Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                    Ok(value) => source.write(value),
                    Err(source_err) => on_error(PersistenceError::Deserialize { key: key.clone(), source: source_err }),
                },
                Ok(None) => {}
                Err(err) => on_error(PersistenceError::Storage { key: key.clone(), source: err }),
            }
        }

        let write_source = source.clone();
        let write_storage = storage.clone();
        let write_key = key.clone();
        let write_on_error = on_error.clone();
        let observer = Observer::new(move || {
            let value = write_source.get();
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(err) = write_storage.set(&write_key, &raw) {
                        write_on_error(PersistenceError::Storage { key: write_key.clone(), source: err });
                    }
                }
                Err(err) => write_on_error(PersistenceError::Serialize { key: write_key.clone(), source: err }),
            }
            None
        });

        let change_listener: Option<Box<dyn std::any::Any>> = change_source.map(|cs| {
            let sync_source = source.clone();
            let sync_key = key.clone();
            let sync_on_error = on_error.clone();
            cs.on_change(Box::new(move |changed_key, raw| {
                if changed_key != sync_key {
                    return;
                }
                match serde_json::from_str::<T>(raw) {
                    Ok(value) => sync_source.write(value),
                    Err(err) => sync_on_error(PersistenceError::Deserialize { key: sync_key.clone(), source: err }),
                }
            }))
        });

        Self { _observer: observer, _change_listener: change_listener, _source: source }
    }
}

/// Uninhabited placeholder type parameter for [`PersistenceAdapter::new`],
/// which has no change source. Never constructed.
pub enum NoChangeSource {}

impl StorageChangeSource for NoChangeSource {
    fn on_change(&self, _callback: Box<dyn Fn(&str, &str)>) -> Box<dyn std::any::Any> {
        unreachable!("NoChangeSource is never instantiated")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MapStorage {
        data: RefCell<HashMap<String, String>>,
    }
    impl MapStorage {
        fn new() -> Rc<Self> {
            Rc::new(Self { data: RefCell::new(HashMap::new()) })
        }
    }
    impl Storage for MapStorage {
        fn get(&self, key: &str) -> Result<Option<String>, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.data.borrow().get(key).cloned())
        }
        fn set(&self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.data.borrow_mut().insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    struct ManualChangeSource {
        callbacks: RefCell<Vec<Box<dyn Fn(&str, &str)>>>,
    }
    impl ManualChangeSource {
        fn new() -> Rc<Self> {
            Rc::new(Self { callbacks: RefCell::new(Vec::new()) })
        }
        fn fire(&self, key: &str, value: &str) {
            for cb in self.callbacks.borrow().iter() {
                cb(key, value);
            }
        }
    }
    impl StorageChangeSource for ManualChangeSource {
        fn on_change(&self, callback: Box<dyn Fn(&str, &str)>) -> Box<dyn std::any::Any> {
            self.callbacks.borrow_mut().push(callback);
            Box::new(())
        }
    }

    #[test]
    fn writes_propagate_to_storage() {
        let storage = MapStorage::new();
        let source = Source::new("light".to_string());
        let _adapter = PersistenceAdapter::new(
            source.clone(),
            "theme",
            storage.clone(),
            PersistenceOptions { load_on_init: false },
            |_err| panic!("unexpected persistence error"),
        );

        source.write("dark".to_string());
        assert_eq!(storage.get("theme").unwrap(), Some("\"dark\"".to_string()));
    }

    #[test]
    fn external_change_echo_is_suppressed() {
        let storage = MapStorage::new();
        storage.set("theme", "\"light\"").unwrap();
        let change_source = ManualChangeSource::new();
        let source = Source::new(String::new());

        let writes = Rc::new(RefCell::new(Vec::new()));
        let writes2 = writes.clone();
        let observed = source.clone();
        let _tap = Observer::new(move || {
            writes2.borrow_mut().push(observed.get());
            None
        });

        let _adapter = PersistenceAdapter::with_change_source(
            source.clone(),
            "theme",
            storage.clone(),
            Some(change_source.clone()),
            PersistenceOptions { load_on_init: true },
            |_err| panic!("unexpected persistence error"),
        );

        source.write("dark".to_string());
        change_source.fire("theme", "\"dark\"");

        assert_eq!(source.get(), "dark");
        assert_eq!(writes.borrow().len(), 3, "initial load + explicit write, echo suppressed by equality");
    }
}
