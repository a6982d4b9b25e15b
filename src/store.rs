//! Bounded, newest-first history of recent decodes.
//!
//! The store keeps the last [`MAX_DECODES`] records and tells registered
//! observers about every new record and every clear. Readers only ever get
//! copies, so a UI iterating a snapshot is unaffected by concurrent writes.
//!
//! Two locks are involved:
//! - the state lock guards the records and the observer list and is held only
//!   while inserting/evicting/clearing and while copying the observer list;
//! - the delivery lock serializes notification so every observer sees events
//!   in the order they were applied to the store.
//!
//! Observers run with the state lock released, so a callback may call
//! [`DecodeStore::snapshot`] or [`DecodeStore::unsubscribe`]. Callbacks must
//! not call [`DecodeStore::add`] or [`DecodeStore::clear`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::decode::DecodeRecord;

/// Number of records the store keeps by default.
pub const MAX_DECODES: usize = 100;

/// Receives store events.
///
/// Callbacks run on the thread that changed the store and should return
/// quickly; hand slow work off to another task.
pub trait DecodeObserver: Send + Sync {
    /// A record was added at the front of the store.
    fn on_new_decode(&self, record: &DecodeRecord);

    /// The store was emptied.
    fn on_cleared(&self);

    /// Whether this observer can no longer receive events. Closed observers
    /// are dropped after the next delivery.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Event delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    NewDecode(DecodeRecord),
    Cleared,
}

/// Handle returned by [`DecodeStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Forwards store events into a tokio channel.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<StoreEvent>,
}

impl DecodeObserver for ChannelObserver {
    fn on_new_decode(&self, record: &DecodeRecord) {
        let _ = self.tx.send(StoreEvent::NewDecode(record.clone()));
    }

    fn on_cleared(&self) {
        let _ = self.tx.send(StoreEvent::Cleared);
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

type Observers = Vec<(SubscriptionId, Arc<dyn DecodeObserver>)>;

struct StoreState {
    /// Newest first.
    records: VecDeque<DecodeRecord>,
    observers: Observers,
}

/// Thread-safe bounded decode history with observer fan-out.
pub struct DecodeStore {
    capacity: usize,
    state: Mutex<StoreState>,
    delivery: Mutex<()>,
    next_id: AtomicU64,
}

impl DecodeStore {
    /// Create a store holding up to [`MAX_DECODES`] records.
    pub fn new() -> Self {
        Self::with_capacity(MAX_DECODES)
    }

    /// Create a store holding up to `capacity` records (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(StoreState {
                records: VecDeque::with_capacity(capacity + 1),
                observers: Vec::new(),
            }),
            delivery: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    // A panicking observer must not take the store down with it.
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert `record` as the newest entry, evict past capacity, then notify
    /// observers.
    pub fn add(&self, record: DecodeRecord) {
        let _delivery = self.delivery();

        let observers = {
            let mut state = self.state();
            state.records.push_front(record.clone());
            while state.records.len() > self.capacity {
                state.records.pop_back();
            }
            state.observers.clone()
        };

        for (_, observer) in &observers {
            observer.on_new_decode(&record);
        }
        self.prune_closed(&observers);
    }

    /// Remove every record, then notify observers once.
    pub fn clear(&self) {
        let _delivery = self.delivery();

        let observers = {
            let mut state = self.state();
            state.records.clear();
            state.observers.clone()
        };

        for (_, observer) in &observers {
            observer.on_cleared();
        }
        self.prune_closed(&observers);
    }

    /// Unregister observers from `delivered` that reported closed.
    fn prune_closed(&self, delivered: &Observers) {
        let closed: Vec<SubscriptionId> = delivered
            .iter()
            .filter(|(_, observer)| observer.is_closed())
            .map(|(id, _)| *id)
            .collect();
        if closed.is_empty() {
            return;
        }
        debug!("Dropping {} closed observers", closed.len());
        self.state()
            .observers
            .retain(|(id, _)| !closed.contains(id));
    }

    /// Copy of the current records, newest first.
    pub fn snapshot(&self) -> Vec<DecodeRecord> {
        self.state().records.iter().cloned().collect()
    }

    /// The most recent record, if any.
    pub fn latest(&self) -> Option<DecodeRecord> {
        self.state().records.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register an observer for future events.
    pub fn subscribe(&self, observer: Arc<dyn DecodeObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Relaxed));
        self.state().observers.push((id, observer));
        id
    }

    /// Register a channel that receives every future event.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(ChannelObserver { tx }));
        (id, rx)
    }

    /// Remove an observer. Returns false if it was not registered.
    ///
    /// An observer already picked for an in-flight event still receives that
    /// event.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.state().observers.len()
    }
}

impl Default for DecodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn make_record(callsign: &str) -> DecodeRecord {
        DecodeRecord::new(callsign, "FN42", -10, 1500, format!("CQ {} FN42", callsign))
    }

    #[derive(Default)]
    struct CountingObserver {
        new_decodes: AtomicUsize,
        clears: AtomicUsize,
        last_call: Mutex<String>,
    }

    impl DecodeObserver for CountingObserver {
        fn on_new_decode(&self, record: &DecodeRecord) {
            self.new_decodes.fetch_add(1, Relaxed);
            *self.last_call.lock().unwrap() = record.callsign().to_string();
        }

        fn on_cleared(&self) {
            self.clears.fetch_add(1, Relaxed);
        }
    }

    #[test]
    fn test_newest_first() {
        let store = DecodeStore::new();
        store.add(make_record("W1AW"));
        store.add(make_record("K1ABC"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].callsign(), "K1ABC");
        assert_eq!(snapshot[1].callsign(), "W1AW");
        assert_eq!(store.latest().unwrap().callsign(), "K1ABC");
    }

    #[test]
    fn test_bounded_history() {
        let store = DecodeStore::new();
        for i in 0..250 {
            store.add(make_record(&format!("K{}ABC", i)));
            assert!(store.len() <= MAX_DECODES);
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), MAX_DECODES);
        assert_eq!(snapshot[0].callsign(), "K249ABC");
        assert_eq!(snapshot[MAX_DECODES - 1].callsign(), "K150ABC");
    }

    #[test]
    fn test_custom_capacity() {
        let store = DecodeStore::with_capacity(2);
        store.add(make_record("W1AW"));
        store.add(make_record("W2AW"));
        store.add(make_record("W3AW"));

        let calls: Vec<_> = store
            .snapshot()
            .iter()
            .map(|r| r.callsign().to_string())
            .collect();
        assert_eq!(calls, vec!["W3AW", "W2AW"]);
        assert_eq!(store.capacity(), 2);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = DecodeStore::new();
        store.add(make_record("W1AW"));

        let snapshot = store.snapshot();
        store.add(make_record("K1ABC"));
        store.clear();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].callsign(), "W1AW");
    }

    #[test]
    fn test_clear_notifies_once_per_observer() {
        let store = DecodeStore::new();
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        store.subscribe(first.clone());
        store.subscribe(second.clone());

        store.add(make_record("W1AW"));
        store.clear();

        assert!(store.snapshot().is_empty());
        assert!(store.is_empty());
        for observer in [&first, &second] {
            assert_eq!(observer.new_decodes.load(Relaxed), 1);
            assert_eq!(observer.clears.load(Relaxed), 1);
        }
    }

    #[test]
    fn test_unsubscribe() {
        let store = DecodeStore::new();
        let observer = Arc::new(CountingObserver::default());
        let id = store.subscribe(observer.clone());

        store.add(make_record("W1AW"));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.add(make_record("K1ABC"));

        assert_eq!(observer.new_decodes.load(Relaxed), 1);
        assert_eq!(*observer.last_call.lock().unwrap(), "W1AW");
        assert_eq!(store.observer_count(), 0);
    }

    /// Unsubscribes itself from inside its first callback.
    struct OneShotObserver {
        store: Arc<DecodeStore>,
        id: OnceLock<SubscriptionId>,
        calls: AtomicUsize,
    }

    impl DecodeObserver for OneShotObserver {
        fn on_new_decode(&self, _record: &DecodeRecord) {
            self.calls.fetch_add(1, Relaxed);
            if let Some(id) = self.id.get() {
                self.store.unsubscribe(*id);
            }
            // Reading from a callback must not deadlock either.
            let _ = self.store.snapshot();
        }

        fn on_cleared(&self) {}
    }

    #[test]
    fn test_unsubscribe_from_callback() {
        let store = Arc::new(DecodeStore::new());
        let observer = Arc::new(OneShotObserver {
            store: Arc::clone(&store),
            id: OnceLock::new(),
            calls: AtomicUsize::new(0),
        });
        let id = store.subscribe(observer.clone());
        observer.id.set(id).unwrap();

        store.add(make_record("W1AW"));
        store.add(make_record("K1ABC"));

        assert_eq!(observer.calls.load(Relaxed), 1);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_channel_subscription() {
        let store = DecodeStore::new();
        let (_id, mut rx) = store.subscribe_channel();

        store.add(make_record("W1AW"));
        store.clear();

        match rx.try_recv().unwrap() {
            StoreEvent::NewDecode(record) => assert_eq!(record.callsign(), "W1AW"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Cleared);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_channel_is_unsubscribed() {
        let store = DecodeStore::new();
        let (_kept, mut rx) = store.subscribe_channel();
        let (_dropped, dropped_rx) = store.subscribe_channel();
        assert_eq!(store.observer_count(), 2);

        drop(dropped_rx);
        store.add(make_record("W1AW"));
        assert_eq!(store.observer_count(), 1);

        store.clear();
        assert!(matches!(rx.try_recv(), Ok(StoreEvent::NewDecode(_))));
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::Cleared);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let store = Arc::new(DecodeStore::new());
        let observer = Arc::new(CountingObserver::default());
        store.subscribe(observer.clone());

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..200 {
                        store.add(make_record(&format!("W{}A{}", w, i % 10)));
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(store.snapshot().len() <= MAX_DECODES);
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), MAX_DECODES);
        assert_eq!(observer.new_decodes.load(Relaxed), 800);
    }
}
