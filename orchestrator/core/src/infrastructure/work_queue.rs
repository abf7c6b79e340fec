// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Per-key deduplicating work queue.
//!
//! A key is queued at most once. A key re-added while a worker holds it is marked
//! dirty and handed out again after [`WorkQueue::done`], so no key is ever
//! processed by two workers at once and no change is lost (at-least-once).
//!
//! Delayed adds keep one pending deadline per key; the earliest one wins. A single
//! timer task, started on the first delayed add, moves due keys onto the queue.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
    waiting: HashMap<K, Instant>,
    timer_running: bool,
    shutting_down: bool,
}

impl<K> State<K>
where
    K: Clone + Eq + Hash,
{
    /// Returns `true` when `key` landed on the ready queue.
    fn enqueue(&mut self, key: K) -> bool {
        if self.shutting_down || !self.dirty.insert(key.clone()) {
            return false;
        }
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Enqueue every key whose deadline has passed. Returns how many became ready.
    fn promote_due(&mut self, now: Instant) -> usize {
        let due: Vec<K> = self
            .waiting
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut ready = 0;
        for key in due {
            self.waiting.remove(&key);
            if self.enqueue(key) {
                ready += 1;
            }
        }
        ready
    }
}

pub struct WorkQueue<K> {
    state: Arc<Mutex<State<K>>>,
    notify: Arc<Notify>,
    timer: Arc<Notify>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            notify: self.notify.clone(),
            timer: self.timer.clone(),
            backoff_base: self.backoff_base,
            backoff_max: self.backoff_max,
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                failures: HashMap::new(),
                waiting: HashMap::new(),
                timer_running: false,
                shutting_down: false,
            })),
            notify: Arc::new(Notify::new()),
            timer: Arc::new(Notify::new()),
            backoff_base,
            backoff_max,
        }
    }

    pub fn add(&self, key: K) {
        if self.state.lock().enqueue(key) {
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed. Requires a running tokio runtime.
    ///
    /// A key already waiting on an earlier or equal deadline is left as is.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        let start_timer = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&key).is_some_and(|pending| *pending <= deadline) {
                return;
            }
            state.waiting.insert(key, deadline);
            !std::mem::replace(&mut state.timer_running, true)
        };
        if start_timer {
            tokio::spawn(run_timer(
                Arc::downgrade(&self.state),
                self.notify.clone(),
                self.timer.clone(),
            ));
        } else {
            self.timer.notify_one();
        }
    }

    /// Add with per-key exponential backoff: `base × 2^failures`, capped at max.
    pub fn add_rate_limited(&self, key: K) -> Duration {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let exp = (*failures).min(31);
            *failures += 1;
            self.backoff_base
                .checked_mul(1u32 << exp)
                .unwrap_or(self.backoff_max)
                .min(self.backoff_max)
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    pub fn failures(&self, key: &K) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
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

    /// Mark `key` as finished. A key re-added meanwhile is queued again.
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
        self.timer.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys waiting on a delayed add.
    pub fn delayed(&self) -> usize {
        self.state.lock().waiting.len()
    }
}

/// Sleeps until the earliest pending deadline, or until a delayed add moves it closer.
async fn run_timer<K>(state: Weak<Mutex<State<K>>>, ready: Arc<Notify>, timer: Arc<Notify>)
where
    K: Clone + Eq + Hash,
{
    loop {
        let rearmed = timer.notified();
        let (woken, next) = {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.lock();
            if state.shutting_down {
                state.waiting.clear();
                state.timer_running = false;
                return;
            }
            let woken = state.promote_due(Instant::now());
            let next = state.waiting.values().min().copied();
            (woken, next)
        };
        for _ in 0..woken {
            ready.notify_one();
        }
        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = rearmed => {}
                }
            }
            None => rearmed.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(Duration::from_millis(100), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_dedup() {
        let q = queue();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
    }

    #[tokio::test]
    async fn test_key_readded_while_processing_is_redelivered_after_done() {
        let q = queue();
        q.add("a");
        let key = q.get().await.unwrap();
        q.add("a");
        assert!(q.is_empty(), "must not be handed to a second worker");
        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_backoff_doubles_and_caps() {
        let q = queue();
        assert_eq!(q.add_rate_limited("a"), Duration::from_millis(100));
        assert_eq!(q.add_rate_limited("a"), Duration::from_millis(200));
        assert_eq!(q.add_rate_limited("a"), Duration::from_millis(400));
        assert_eq!(q.add_rate_limited("a"), Duration::from_millis(800));
        assert_eq!(q.add_rate_limited("a"), Duration::from_secs(1));
        q.forget(&"a");
        assert_eq!(q.failures(&"a"), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_key_keeps_only_earliest_deadline() {
        let q = queue();
        q.add_after("a", Duration::from_secs(10));
        q.add_after("a", Duration::from_secs(30));
        q.add_after("a", Duration::from_secs(5));
        q.add_after("b", Duration::from_secs(20));
        assert_eq!(q.delayed(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
        q.done(&"a");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(q.get().await, Some("b"));
        q.done(&"b");
        // Superseded deadlines for "a" never fire.
        assert!(q.is_empty());
        assert_eq!(q.delayed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_of_processing_key_waits_for_done() {
        let q = queue();
        q.add("a");
        let key = q.get().await.unwrap();
        q.add_after("a", Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(q.is_empty());
        q.done(&key);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shutdown();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
