//! Single-flight guard for artifact builds.
//!
//! Two requests missing the same fingerprint at once would both combine and both
//! store. The first to take the slot builds; the others wait on the same mutex and
//! then find the artifact in the store.

use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::inflight";

#[derive(Default, Clone)]
pub struct BuildLocks {
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl BuildLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the build slot for `key`. Hold the returned slot and call
    /// [`BuildSlot::lock`] to serialize with other builders of the same key.
    pub fn slot(&self, key: &str) -> BuildSlot {
        let lock = Arc::clone(self.slots.entry(key.to_string()).or_default().value());
        BuildSlot {
            key: key.to_string(),
            lock,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Keys with a live slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct BuildSlot {
    key: String,
    lock: Arc<Mutex<()>>,
    slots: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl BuildSlot {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        mutex_lock(&self.lock, SOURCE, "build_slot.lock")
    }
}

impl Drop for BuildSlot {
    fn drop(&mut self) {
        // The map and this slot hold the last two references.
        self.slots
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 2);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn slots_are_released_on_drop() {
        let locks = BuildLocks::new();
        {
            let first = locks.slot("abc");
            let second = locks.slot("abc");
            assert_eq!(locks.len(), 1);
            drop(first);
            assert_eq!(locks.len(), 1);
            drop(second);
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn builders_of_one_key_run_one_at_a_time() {
        let locks = BuildLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let slot = locks.slot("same");
                    let _held = slot.lock();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("builder thread");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }
}
