//! Deduplicating work queue with per-key backoff
//!
//! A key is held by at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty and it is queued again when the worker calls [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

struct State<K> {
    queue: VecDeque<K>,
    /// Keys waiting to be processed (queued, or to requeue after `done`)
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

/// Work queue keyed by `K`
pub struct WorkQueue<K> {
    state: Mutex<State<K>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue whose rate-limited requeues back off from `base_delay`
    /// up to `max_delay`
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Queue `key` unless it is already waiting
    pub fn add(&self, key: K) {
        {
            let mut state = self.state.lock();
            if state.shutting_down || state.dirty.contains(&key) {
                return;
            }
            state.dirty.insert(key.clone());
            if state.processing.contains(&key) {
                return;
            }
            state.queue.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release a key handed out by [`get`](Self::get), requeueing it if it
    /// was added again meanwhile
    pub fn done(&self, key: &K) {
        let requeued = {
            let mut state = self.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Queue `key` after `delay`
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Record a failure for `key` and queue it after its backoff delay
    pub fn add_rate_limited(self: &Arc<Self>, key: K) {
        let failures = {
            let mut state = self.state.lock();
            let count = state.failures.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let delay = self.backoff(failures);
        self.add_after(key, delay);
    }

    /// Delay for the `failures`-th consecutive failure: `base * 2^(failures-1)`, capped
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// True when no key is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys. Queued keys still drain; then `get` returns `None`.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// True after [`shut_down`](Self::shut_down)
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }
}
