//! Devtools bridge: a point-in-time snapshot of every named cell/observer/
//! action plus a live event feed, for an external inspector panel to
//! render (§6). Fans out over a broadcast channel the way
//! `InProcJobEventBus` does for orchestration events, backed by a bounded
//! ring buffer so a panel that attaches late still sees recent history.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::broadcast;

const BACKLOG_CAPACITY: usize = 200;

/// A point-in-time read of the debug directory: every live named cell's
/// current value, plus the names of every registered observer and action.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DevtoolsSnapshot {
    pub cells: Vec<(String, serde_json::Value)>,
    pub observers: Vec<String>,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DevtoolsEventKind {
    CellChanged,
    ObserverRan,
    ActionCalled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DevtoolsEvent {
    pub kind: DevtoolsEventKind,
    pub payload: String,
    pub timestamp_millis: u64,
}

pub struct DevtoolsBridge {
    sender: broadcast::Sender<DevtoolsEvent>,
    backlog: Mutex<VecDeque<DevtoolsEvent>>,
}

impl Default for DevtoolsBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl DevtoolsBridge {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BACKLOG_CAPACITY);
        Self { sender, backlog: Mutex::new(VecDeque::with_capacity(BACKLOG_CAPACITY)) }
    }

    /// Read every currently-registered, still-alive named cell's debug
    /// representation as a best-effort JSON value (falling back to the
    /// raw `Debug` string when it doesn't parse as JSON, since cell
    /// values aren't required to implement `Serialize`).
    pub fn snapshot(&self) -> DevtoolsSnapshot {
        let cells = cellkit_core::runtime::registered_cells()
            .into_iter()
            .map(|(name, repr)| {
                let value = serde_json::from_str(&repr).unwrap_or_else(|_| serde_json::Value::String(repr));
                (name, value)
            })
            .collect();
        DevtoolsSnapshot {
            cells,
            observers: cellkit_core::runtime::registered_observer_names(),
            actions: cellkit_core::runtime::registered_action_names(),
        }
    }

    /// Publish an event to every live subscriber and append it to the
    /// backlog, evicting the oldest entry once full.
    pub fn publish(&self, event: DevtoolsEvent) {
        let mut backlog = self.backlog.lock().expect("devtools backlog mutex poisoned");
        if backlog.len() == BACKLOG_CAPACITY {
            backlog.pop_front();
        }
        backlog.push_back(event.clone());
        drop(backlog);
        let _ = self.sender.send(event);
    }

    /// Subscribe to the live event feed. Events published before this
    /// call are not replayed through the channel; call [`Self::backlog`]
    /// first for history.
    pub fn subscribe(&self) -> broadcast::Receiver<DevtoolsEvent> {
        self.sender.subscribe()
    }

    /// The most recent events still held in the backlog, oldest first.
    pub fn backlog(&self) -> Vec<DevtoolsEvent> {
        self.backlog.lock().expect("devtools backlog mutex poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellkit_core::Source;

    #[test]
    fn snapshot_reflects_named_cells() {
        let _count = Source::named("devtools-test-count", 1);
        let snapshot = DevtoolsBridge::new().snapshot();
        assert!(snapshot.cells.iter().any(|(name, value)| name == "devtools-test-count" && *value == serde_json::json!(1)));
    }

    #[test]
    fn backlog_caps_at_capacity_and_evicts_oldest() {
        let bridge = DevtoolsBridge::new();
        for i in 0..(BACKLOG_CAPACITY + 10) {
            bridge.publish(DevtoolsEvent {
                kind: DevtoolsEventKind::CellChanged,
                payload: i.to_string(),
                timestamp_millis: i as u64,
            });
        }
        let backlog = bridge.backlog();
        assert_eq!(backlog.len(), BACKLOG_CAPACITY);
        assert_eq!(backlog.front().unwrap().payload, "10");
        assert_eq!(backlog.back().unwrap().payload, (BACKLOG_CAPACITY + 9).to_string());
    }

    #[tokio::test]
    async fn live_subscriber_receives_published_events() {
        let bridge = DevtoolsBridge::new();
        let mut rx = bridge.subscribe();
        bridge.publish(DevtoolsEvent { kind: DevtoolsEventKind::ObserverRan, payload: "tick".into(), timestamp_millis: 0 });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload, "tick");
    }
}
