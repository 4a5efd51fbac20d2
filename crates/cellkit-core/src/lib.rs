//! A fine-grained reactive runtime: mutable source cells, lazily-memoized
//! computed cells, side-effecting observers, coordinated actions, and a
//! sequence-valued container cell, wired together by an implicit
//! dependency tracker rather than an explicit subscription graph.
//!
//! The engine is single-threaded-cooperative (see [`runtime`] and
//! [`tracking`]): every cell, computed value, and observer lives on one
//! logical thread, and async bodies are driven with `tokio`'s
//! `LocalSet`/`spawn_local` rather than assuming `Send`.

pub mod action;
pub mod cell;
pub mod computed;
pub mod container;
pub mod error;
pub mod id;
mod listener;
pub mod observer;
pub mod runtime;
pub mod source;
pub mod tracking;

pub use action::{action, Action, Concurrency};
pub use cell::{Cell, DepEdge, Subscriber};
pub use computed::{Computed, ComputedOptions};
pub use container::{Container, Draft};
pub use error::{ActionError, CellError, UsageError};
pub use id::NodeId;
pub use listener::new as raw_listener;
pub use observer::{observe, observe_async, observe_named, AbortToken, BoxFuture, CleanupFn, Clock, Observer, ObserverOptions};
pub use runtime::{batch, is_batching};
pub use source::{Source, Unsubscribe};
