use log::debug;
use serde_json::Value;
use std::collections::HashMap;

type Handler = Box<dyn FnMut(&Value)>;

/// Named-event handler registry.
///
/// One handler per event name. Subscribing again replaces the previous
/// handler, so a remounted consumer never ends up registered twice.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Handler>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`. Returns true if it replaced one.
    pub fn subscribe<F>(&mut self, event: impl Into<String>, handler: F) -> bool
    where
        F: FnMut(&Value) + 'static,
    {
        let event = event.into();
        debug!("subscribing to {event}");
        self.handlers.insert(event, Box::new(handler)).is_some()
    }

    /// Drops the handler for `event`. Returns true if one was registered.
    pub fn unsubscribe(&mut self, event: &str) -> bool {
        debug!("unsubscribing from {event}");
        self.handlers.remove(event).is_some()
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Invokes the handler for `event`, if any. Returns whether one ran.
    pub fn dispatch(&mut self, event: &str, payload: &Value) -> bool {
        match self.handlers.get_mut(event) {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn dispatch_reaches_subscribed_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut router = EventRouter::new();
        router.subscribe("vehicle_data", move |payload| sink.borrow_mut().push(payload.clone()));

        assert!(router.dispatch("vehicle_data", &json!({"vehicle_count": 1})));
        assert!(!router.dispatch("other", &json!({})));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn resubscribe_replaces_handler() {
        let calls = Rc::new(RefCell::new((0, 0)));
        let mut router = EventRouter::new();

        let first = calls.clone();
        assert!(!router.subscribe("vehicle_data", move |_| first.borrow_mut().0 += 1));
        let second = calls.clone();
        assert!(router.subscribe("vehicle_data", move |_| second.borrow_mut().1 += 1));

        router.dispatch("vehicle_data", &Value::Null);
        assert_eq!(*calls.borrow(), (0, 1));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let mut router = EventRouter::new();
        router.subscribe("vehicle_data", move |_| *counter.borrow_mut() += 1);

        router.dispatch("vehicle_data", &Value::Null);
        assert!(router.unsubscribe("vehicle_data"));
        assert!(!router.dispatch("vehicle_data", &Value::Null));
        assert!(!router.unsubscribe("vehicle_data"));
        assert_eq!(*calls.borrow(), 1);
        assert!(router.is_empty());
    }
}
