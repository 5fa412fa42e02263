use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, error};

use crate::types::{EventListener, EventMask, SchedulerEvent};

struct Subscription {
    name: String,
    mask: EventMask,
    listener: Arc<dyn EventListener>,
}

/// Registry of `(mask, listener)` pairs and synchronous dispatcher.
///
/// Share one bus per scheduler as `Arc<EventBus>`.
pub struct EventBus {
    /// Registration order is delivery order.
    listeners: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(
        &self,
        name: impl Into<String>,
        mask: EventMask,
        listener: Arc<dyn EventListener>,
    ) {
        let name = name.into();
        debug!(listener = %name, "event listener registered");
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push(Subscription {
                name,
                mask,
                listener,
            });
    }

    /// Remove every listener registered under `name`. Returns whether any was removed.
    pub fn unsubscribe(&self, name: &str) -> bool {
        let mut listeners = self.listeners.write().expect("listener registry poisoned");
        let before = listeners.len();
        listeners.retain(|s| s.name != name);
        let removed = listeners.len() < before;
        if removed {
            debug!(listener = name, "event listener unregistered");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .expect("listener registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener whose mask contains its kind.
    ///
    /// The registry lock is released before any listener runs, so a listener
    /// may subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &SchedulerEvent) {
        let kind = event.kind();
        let targets: Vec<(String, Arc<dyn EventListener>)> = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .iter()
            .filter(|s| s.mask.contains(kind))
            .map(|s| (s.name.clone(), Arc::clone(&s.listener)))
            .collect();

        for (name, listener) in targets {
            let t = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(event)));
            let elapsed_ms = t.elapsed().as_millis() as u64;
            match outcome {
                Ok(()) => debug!(listener = %name, event = %kind, duration_ms = elapsed_ms, "listener completed"),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(listener = %name, event = %kind, %message, "listener panicked");
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, RemovalReason};
    use std::sync::Mutex;

    fn removed(id: &str) -> SchedulerEvent {
        SchedulerEvent::JobRemoved {
            job_id: id.to_string(),
            jobstore: "default".to_string(),
            reason: RemovalReason::Requested,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<EventKind>>>, Arc<dyn EventListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn EventListener> =
            Arc::new(move |e: &SchedulerEvent| sink.lock().unwrap().push(e.kind()));
        (seen, listener)
    }

    #[test]
    fn mask_filters_delivery() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.subscribe("removals", EventKind::JobRemoved.into(), listener);

        bus.publish(&SchedulerEvent::SchedulerStarted);
        bus.publish(&removed("a"));

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::JobRemoved]);
    }

    #[test]
    fn delivery_preserves_publication_order() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.subscribe("all", EventMask::ALL, listener);

        bus.publish(&SchedulerEvent::SchedulerStarted);
        bus.publish(&removed("a"));
        bus.publish(&SchedulerEvent::SchedulerShutdown);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                EventKind::SchedulerStarted,
                EventKind::JobRemoved,
                EventKind::SchedulerShutdown
            ]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let bus = EventBus::new();
        bus.subscribe(
            "bomb",
            EventMask::ALL,
            Arc::new(|_: &SchedulerEvent| panic!("boom")),
        );
        let (seen, listener) = recorder();
        bus.subscribe("after", EventMask::ALL, listener);

        bus.publish(&SchedulerEvent::SchedulerPaused);

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::SchedulerPaused]);
    }

    #[test]
    fn unsubscribe_by_name() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        bus.subscribe("rec", EventMask::ALL, listener);
        assert!(bus.unsubscribe("rec"));
        assert!(!bus.unsubscribe("rec"));
        assert!(bus.is_empty());

        bus.publish(&SchedulerEvent::SchedulerStarted);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn mask_algebra() {
        let mask = EventKind::JobMissed | EventKind::JobError;
        assert!(mask.contains(EventKind::JobMissed));
        assert!(!mask.contains(EventKind::JobAdded));
        assert!(EventMask::failures().contains(EventKind::JobstoreError));
        let all: EventMask = EventKind::ALL.into_iter().collect();
        assert!(EventKind::ALL.iter().all(|k| all.contains(*k)));
        assert!(EventMask::NONE.is_empty());
    }

    #[test]
    fn events_serialize_with_taxonomy_names() {
        let json = serde_json::to_value(removed("j1")).unwrap();
        assert_eq!(json["event"], "JOB_REMOVED");
        assert_eq!(json["reason"], "requested");
        assert_eq!(removed("j1").job_id(), Some("j1"));
    }
}
