use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Recently seen event keys, bounded by age and by count.
pub struct DedupWindow {
    ttl: Duration,
    capacity: usize,
    state: Mutex<DedupState>,
}

#[derive(Default)]
struct DedupState {
    seen: HashMap<String, Instant>,
    order: VecDeque<(String, Instant)>,
}

impl DedupState {
    fn forget_oldest(&mut self) {
        if let Some((key, inserted)) = self.order.pop_front() {
            // a re-inserted key has a newer timestamp in `seen`
            if self.seen.get(&key) == Some(&inserted) {
                self.seen.remove(&key);
            }
        }
    }
}

impl DedupWindow {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(DedupState::default()),
        }
    }

    /// Records `key` and returns whether it was new. Empty keys are never
    /// treated as duplicates.
    pub fn first_seen(&self, key: &str) -> bool {
        self.first_seen_at(key, Instant::now())
    }

    fn first_seen_at(&self, key: &str, now: Instant) -> bool {
        if key.is_empty() {
            return true;
        }

        let mut state = self.state.lock();
        while let Some((_, inserted)) = state.order.front() {
            if now.duration_since(*inserted) < self.ttl {
                break;
            }
            state.forget_oldest();
        }

        if state.seen.contains_key(key) {
            return false;
        }

        while state.seen.len() >= self.capacity {
            state.forget_oldest();
        }
        state.seen.insert(key.to_string(), now);
        state.order.push_back((key.to_string(), now));
        true
    }

    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }
}
