use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::query::QueryFilter;
use crate::time_window::TimeWindow;

/// A telemetry query as it goes on the wire. Callers that resolve to the same filter
/// share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub metric_name: String,
    pub sensor_selector: String,
    pub node_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryKey {
    pub fn new(filter: &QueryFilter, window: &TimeWindow) -> Self {
        Self {
            metric_name: filter.metric_name.clone(),
            sensor_selector: filter.sensor_selector.clone(),
            node_id: filter.node_id.clone(),
            start: window.start(),
            end: window.end(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageQueryKey {
    pub camera: String,
    pub node_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ImageQueryKey {
    pub fn new(camera: &str, node_id: &str, window: &TimeWindow) -> Self {
        Self {
            camera: camera.to_string(),
            node_id: node_id.to_string(),
            start: window.start(),
            end: window.end(),
        }
    }
}

type Slot<V> = Arc<Mutex<Option<V>>>;

/// Session-lifetime memo table. Entries are never evicted.
///
/// Each key owns a slot mutex, so concurrent callers for one key wait for the first
/// computation instead of repeating it, while other keys proceed independently.
/// Failed computations leave the slot empty and the next caller tries again.
pub struct ResultCache<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for ResultCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let slot = self.slot(key);
        let mut guard = lock(&slot);
        if let Some(value) = guard.as_ref() {
            return value.clone();
        }
        let value = compute();
        *guard = Some(value.clone());
        value
    }

    pub fn get_or_try_compute<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let slot = self.slot(key.clone());
        let mut guard = lock(&slot);
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        match compute() {
            Ok(value) => {
                *guard = Some(value.clone());
                Ok(value)
            }
            Err(err) => {
                self.release_empty(&key, &slot);
                Err(err)
            }
        }
    }

    /// Cached value without computing, `None` on a miss or an in-flight computation
    /// that has not finished.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    /// Number of keys holding a computed value.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.try_lock().map(|v| v.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    fn slot(&self, key: K) -> Slot<V> {
        lock(&self.slots).entry(key).or_default().clone()
    }

    /// Drops a slot left empty by a failed computation. Slots other callers are
    /// already waiting on stay, so the next of them computes into the shared entry.
    fn release_empty(&self, key: &K, slot: &Slot<V>) {
        let mut slots = lock(&self.slots);
        let unshared = slots
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            slots.remove(key);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
