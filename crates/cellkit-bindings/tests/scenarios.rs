//! End-to-end scenario for the persistence adapter's cross-tab echo
//! suppression contract.

use std::cell::{Cell as StdCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use cellkit_bindings::{PersistenceAdapter, PersistenceOptions, Storage, StorageChangeSource};
use cellkit_core::{observe, Source};

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
fn cross_tab_persistence_echo_is_suppressed() {
    let storage = MapStorage::new();
    storage.set("theme", "\"light\"").unwrap();

    let source: Source<String> = Source::new(String::new());
    let observations = Rc::new(StdCell::new(0));
    let observations2 = observations.clone();
    let observed_source = source.clone();
    let _observer = observe(move || {
        let _ = observed_source.get();
        observations2.set(observations2.get() + 1);
        None
    });

    let change_source = ManualChangeSource::new();
    let _adapter = PersistenceAdapter::with_change_source(
        source.clone(),
        "theme",
        storage.clone(),
        Some(change_source.clone()),
        PersistenceOptions { load_on_init: true },
        |err| panic!("unexpected persistence error: {err}"),
    );
    assert_eq!(source.get(), "light");
    assert_eq!(observations.get(), 1, "load-on-init produces exactly one observer run");

    source.write("dark".to_string());
    assert_eq!(observations.get(), 2);
    assert_eq!(storage.get("theme").unwrap(), Some("\"dark\"".to_string()));

    change_source.fire("theme", "\"dark\"");
    assert_eq!(observations.get(), 2, "echo of the value this adapter just wrote must not re-notify");
}
