//! External-interface adapters for cellkit's reactive core: a view-binding
//! contract a UI layer can `use_cell`/`use_cells` against, a persistence
//! adapter that mirrors a [`cellkit_core::Source`] to an external store,
//! and a devtools bridge exposing a snapshot plus live event feed of the
//! named-cell debug directory.
//!
//! None of these are required to use `cellkit-core` on its own; they exist
//! for host applications that need to wire cells into a render loop, a
//! storage backend, or an inspector panel.

pub mod devtools;
pub mod persistence;
pub mod view;

pub use devtools::{DevtoolsBridge, DevtoolsEvent, DevtoolsEventKind, DevtoolsSnapshot};
pub use persistence::{PersistenceAdapter, PersistenceError, PersistenceOptions, Storage, StorageChangeSource};
pub use view::{use_cell, use_cells, use_named_cells, Binding, CellRead};
