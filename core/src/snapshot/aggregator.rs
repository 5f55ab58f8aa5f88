use crate::snapshot::model::TrafficSnapshot;
use log::debug;
use serde_json::Value;
use tokio::sync::watch;

/// Sole owner of the current [`TrafficSnapshot`].
///
/// Each update replaces the previous snapshot wholesale. Consumers get a
/// read-only view through [`SnapshotAggregator::watch`] and always observe
/// either the old or the new snapshot, never a mix.
pub struct SnapshotAggregator {
    current: watch::Sender<TrafficSnapshot>,
    updates: u64,
}

impl SnapshotAggregator {
    pub fn new() -> Self {
        let (current, _) = watch::channel(TrafficSnapshot::default());
        Self {
            current,
            updates: 0,
        }
    }

    /// Applies a raw payload and returns the snapshot now on display.
    pub fn update(&mut self, raw: &Value) -> TrafficSnapshot {
        let snapshot = TrafficSnapshot::from_payload(raw);
        self.updates += 1;
        debug!(
            "snapshot #{}: {} vehicles, status {:?}",
            self.updates, snapshot.vehicle_count, snapshot.status
        );
        self.current.send_replace(snapshot.clone());
        snapshot
    }

    pub fn current(&self) -> TrafficSnapshot {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TrafficSnapshot> {
        self.current.subscribe()
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates
    }

    /// Moves the aggregator into an event handler.
    pub fn into_handler(mut self) -> impl FnMut(&Value) {
        move |raw| {
            self.update(raw);
        }
    }
}

impl Default for SnapshotAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::style::StatusStyle;
    use serde_json::json;

    #[test]
    fn later_payload_replaces_earlier_one() {
        let first = json!({"vehicle_count": 30, "status": "CONGESTED", "objects": {"Bus": 5}});
        let second = json!({"vehicle_count": 2, "status": "LOW"});

        let mut aggregator = SnapshotAggregator::new();
        aggregator.update(&first);
        aggregator.update(&second);

        assert_eq!(aggregator.current(), TrafficSnapshot::from_payload(&second));
        assert_eq!(aggregator.current().class_count("Bus"), 0);
        assert_eq!(aggregator.updates_applied(), 2);
    }

    #[test]
    fn watchers_see_latest_snapshot() {
        let mut aggregator = SnapshotAggregator::new();
        let mut view = aggregator.watch();
        assert_eq!(view.borrow().status, "WAITING");

        aggregator.update(&json!({"status": "MODERATE FLOW", "vehicle_count": 9}));
        assert!(view.has_changed().unwrap());
        let seen = view.borrow_and_update().clone();
        assert_eq!(seen.vehicle_count, 9);
        assert_eq!(seen.style(), StatusStyle::Warning);
    }

    #[test]
    fn handler_feeds_watchers() {
        let aggregator = SnapshotAggregator::new();
        let view = aggregator.watch();
        let mut handler = aggregator.into_handler();

        handler(&json!({"vehicle_count": 4}));
        handler(&json!("garbage"));

        assert_eq!(*view.borrow(), TrafficSnapshot::default());
    }
}
