//! Notification bridge: listener bookkeeping on both ends of a connection.
//!
//! The client keeps a [`ListenerTable`] mapping registration ids to local
//! listeners; the server keeps a [`RelayTable`] mapping the same ids to live
//! registry subscriptions. Registration ids come from a per-connection
//! counter and travel in every notification envelope, so dispatch is a plain
//! table lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::registry::Subscription;
use crate::wire::{BeanName, WireValue};

/// Client-side notification listener.
///
/// Invoked with the event payload and the handback value supplied at
/// registration, in per-registration arrival order.
pub type Listener = Arc<dyn Fn(WireValue, Option<&WireValue>) + Send + Sync>;

/// Lifecycle of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegPhase {
    /// Id allocated, AddListener not yet acknowledged by the server.
    Pending,
    /// Acknowledged; events are expected.
    Active,
    /// Removed or connection closed; events for this id are dropped.
    TornDown,
}

struct Registration {
    name: BeanName,
    listener: Listener,
    filter: Option<WireValue>,
    handback: Option<WireValue>,
    phase: RegPhase,
}

impl Registration {
    /// Same listener instance with the same filter and handback.
    fn matches(&self, listener: &Listener, filter: &Option<WireValue>, handback: &Option<WireValue>) -> bool {
        Arc::ptr_eq(&self.listener, listener) && self.filter == *filter && self.handback == *handback
    }
}

/// Client-side registration table.
///
/// One plain mutex guards both the id counter and the map, so the duplicate
/// scan and the insert of `register` are a single atomic step. Registration
/// is not a hot path; the lock is never held while a listener runs.
pub struct ListenerTable {
    inner: Mutex<ListenerTableInner>,
}

struct ListenerTableInner {
    next_id: u32,
    regs: HashMap<u32, Registration>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ListenerTableInner {
                next_id: 1,
                regs: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ListenerTableInner> {
        // A panic while holding this lock is already a bug in this module;
        // keep going with the state as it stands.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a listener for `name`.
    ///
    /// Re-registering the same (listener, filter, handback) triple on the
    /// same bean returns the existing id without allocating a new slot; the
    /// second element is `true` only for a fresh registration. Concurrent
    /// registrations of one triple resolve to one id.
    pub fn register(
        &self,
        name: &BeanName,
        listener: Listener,
        filter: Option<WireValue>,
        handback: Option<WireValue>,
    ) -> (u32, bool) {
        let mut inner = self.lock();

        for (id, reg) in &inner.regs {
            if reg.phase != RegPhase::TornDown
                && reg.name == *name
                && reg.matches(&listener, &filter, &handback)
            {
                return (*id, false);
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.regs.insert(
            id,
            Registration {
                name: name.clone(),
                listener,
                filter,
                handback,
                phase: RegPhase::Pending,
            },
        );
        (id, true)
    }

    /// Mark a registration acknowledged by the server.
    pub fn activate(&self, id: u32) {
        if let Some(reg) = self.lock().regs.get_mut(&id) {
            if reg.phase == RegPhase::Pending {
                reg.phase = RegPhase::Active;
            }
        }
    }

    /// Current phase of a registration, if it exists.
    pub fn phase(&self, id: u32) -> Option<RegPhase> {
        self.lock().regs.get(&id).map(|r| r.phase)
    }

    /// Deliver one incoming event to its listener.
    ///
    /// Unknown ids are dropped with a warning; torn-down ids silently (the
    /// removal may still be in flight on the server).
    pub fn dispatch(&self, id: u32, event: WireValue) {
        // Clone out of the table so the listener runs without the lock held.
        let hit = {
            let inner = self.lock();
            match inner.regs.get(&id) {
                Some(reg) if reg.phase != RegPhase::TornDown => {
                    Some((reg.listener.clone(), reg.handback.clone()))
                }
                Some(_) => {
                    tracing::debug!(registration = id, "event for torn-down registration dropped");
                    None
                }
                None => {
                    tracing::warn!(registration = id, "event for unknown registration dropped");
                    None
                }
            }
        };
        if let Some((listener, handback)) = hit {
            listener(event, handback.as_ref());
        }
    }

    /// Tear down one registration, returning its bean name so the caller can
    /// issue the RemoveListener request.
    pub fn remove(&self, id: u32) -> Option<BeanName> {
        self.lock().regs.remove(&id).map(|reg| reg.name)
    }

    /// Tear down everything (connection close).
    pub fn teardown_all(&self) {
        self.lock().regs.clear();
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.lock().regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().regs.is_empty()
    }
}

/// Server-side table of live registry subscriptions, keyed by the same
/// registration ids the client holds.
#[derive(Default)]
pub struct RelayTable {
    relays: DashMap<u32, Box<dyn Subscription>>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self {
            relays: DashMap::new(),
        }
    }

    /// Track a freshly attached subscription.
    pub fn insert(&self, id: u32, subscription: Box<dyn Subscription>) {
        self.relays.insert(id, subscription);
    }

    /// Detach and drop the subscription for `id`. Returns whether the id was
    /// known. Detach failures are logged, never propagated.
    pub fn detach(&self, id: u32) -> bool {
        match self.relays.remove(&id) {
            Some((_, mut sub)) => {
                if let Err(failure) = sub.detach() {
                    tracing::warn!(registration = id, %failure, "listener detach failed");
                }
                true
            }
            None => false,
        }
    }

    /// Detach every subscription (connection close).
    pub fn teardown_all(&self) {
        let ids: Vec<u32> = self.relays.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.detach(id);
        }
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RemoteFailure;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn name(s: &str) -> BeanName {
        s.parse().unwrap()
    }

    fn recording_listener() -> (Listener, Arc<Mutex<Vec<WireValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let listener: Listener = Arc::new(move |event, _handback| {
            seen2.lock().unwrap().push(event);
        });
        (listener, seen)
    }

    #[test]
    fn test_tables_shared_across_tasks() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ListenerTable>();
        assert_send_sync::<RelayTable>();
    }

    #[test]
    fn test_concurrent_registration_of_one_triple_yields_one_id() {
        let table = Arc::new(ListenerTable::new());
        let (listener, _) = recording_listener();
        let bean = name("app:type=Cache");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let listener = listener.clone();
                let bean = bean.clone();
                std::thread::spawn(move || table.register(&bean, listener, None, None).0)
            })
            .collect();
        let ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(table.len(), 1);
        assert!(ids.iter().all(|&id| id == ids[0]));
    }

    #[test]
    fn test_registration_is_idempotent() {
        let table = ListenerTable::new();
        let (listener, _) = recording_listener();
        let bean = name("app:type=Cache");

        let (id1, fresh1) = table.register(&bean, listener.clone(), None, None);
        let (id2, fresh2) = table.register(&bean, listener.clone(), None, None);
        assert_eq!(id1, id2);
        assert!(fresh1);
        assert!(!fresh2);
        assert_eq!(table.len(), 1);

        // Different filter: a distinct registration.
        let (id3, fresh3) = table.register(&bean, listener, Some(WireValue::Bool(true)), None);
        assert_ne!(id1, id3);
        assert!(fresh3);
    }

    #[test]
    fn test_phase_transitions() {
        let table = ListenerTable::new();
        let (listener, _) = recording_listener();
        let (id, _) = table.register(&name("a:k=v"), listener, None, None);

        assert_eq!(table.phase(id), Some(RegPhase::Pending));
        table.activate(id);
        assert_eq!(table.phase(id), Some(RegPhase::Active));
    }

    #[test]
    fn test_dispatch_in_order_with_handback() {
        let table = ListenerTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let listener: Listener = Arc::new(move |event, handback| {
            seen2.lock().unwrap().push((event, handback.cloned()));
        });
        let handback = Some(WireValue::Str("ctx".into()));
        let (id, _) = table.register(&name("a:k=v"), listener, None, handback.clone());
        table.activate(id);

        for i in 0..3 {
            table.dispatch(id, WireValue::I32(i));
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for (i, (event, hb)) in seen.iter().enumerate() {
            assert_eq!(*event, WireValue::I32(i as i32));
            assert_eq!(*hb, handback);
        }
    }

    #[test]
    fn test_unknown_id_dropped() {
        let table = ListenerTable::new();
        // Must not panic.
        table.dispatch(999, WireValue::Void);
    }

    #[test]
    fn test_remove_returns_bean_name() {
        let table = ListenerTable::new();
        let (listener, seen) = recording_listener();
        let (id, _) = table.register(&name("app:type=Cache"), listener, None, None);
        table.activate(id);

        let bean = table.remove(id).unwrap();
        assert_eq!(bean.to_string(), "app:type=Cache");

        table.dispatch(id, WireValue::Void);
        assert!(seen.lock().unwrap().is_empty());
    }

    struct CountingSub {
        detached: Arc<AtomicU32>,
        fail: bool,
    }

    impl Subscription for CountingSub {
        fn detach(&mut self) -> Result<(), RemoteFailure> {
            self.detached.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RemoteFailure::new("ListenerNotFound", "already gone"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_relay_teardown_detaches_all_and_swallows_failures() {
        let table = RelayTable::new();
        let detached = Arc::new(AtomicU32::new(0));
        table.insert(
            1,
            Box::new(CountingSub {
                detached: detached.clone(),
                fail: false,
            }),
        );
        table.insert(
            2,
            Box::new(CountingSub {
                detached: detached.clone(),
                fail: true,
            }),
        );

        table.teardown_all();
        assert_eq!(detached.load(Ordering::SeqCst), 2);
        assert_eq!(table.len(), 0);
        assert!(!table.detach(1));
    }
}
