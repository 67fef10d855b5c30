//! Keyed work queue with per-key exclusivity.
//!
//! A key moves through three sets:
//!
//! ```text
//! add ──> dirty+queued ──get──> processing ──done──> (gone)
//!                                   │
//!                      add while ───┘──> dirty, re-queued on done
//! ```
//!
//! A key is handed out by [`WorkQueue::get`] only when it is not already being
//! processed, so two workers never reconcile the same key at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

struct QueueState<K> {
    /// Keys waiting for a worker, in FIFO order.
    queue: VecDeque<K>,
    /// Keys that need processing (queued, or re-added while processing).
    dirty: HashSet<K>,
    /// Keys currently held by a worker.
    processing: HashSet<K>,
    /// Earliest pending delayed add per key.
    scheduled: HashMap<K, Instant>,
    shutting_down: bool,
}

/// Work queue handing out keys to a pool of workers.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                scheduled: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a key as needing processing.
    ///
    /// Adding a key that is already queued is a no-op. Adding a key that is
    /// being processed defers it until [`WorkQueue::done`] is called.
    pub fn add(&self, key: K) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "key busy, deferring");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add a key after a delay.
    ///
    /// Only the earliest pending delayed add per key is kept.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let due = Instant::now() + delay;
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            match state.scheduled.get(&key) {
                Some(existing) if *existing <= due => return,
                _ => {
                    state.scheduled.insert(key.clone(), due);
                }
            }
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(due).await;
            let fire = {
                let mut state = queue.lock();
                if state.scheduled.get(&key) == Some(&due) {
                    state.scheduled.remove(&key);
                    true
                } else {
                    false
                }
            };
            if fire {
                queue.add(key);
            }
        });
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release a key obtained from [`WorkQueue::get`].
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Drop any pending delayed add for a key.
    pub fn forget(&self, key: &K) {
        self.lock().scheduled.remove(key);
    }

    /// Stop handing out keys and wake all waiting workers.
    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if no key is waiting for a worker.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a worker currently holds the key.
    pub fn is_processing(&self, key: &K) -> bool {
        self.lock().processing.contains(key)
    }

    /// Returns true if a delayed add is pending for the key.
    pub fn is_scheduled(&self, key: &K) -> bool {
        self.lock().scheduled.contains_key(key)
    }
}
