use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Remembers which broadcast ids were already handled so a flooded packet
/// is acted on and forwarded at most once.
#[derive(Debug)]
pub struct BroadcastManager {
    seen: RwLock<HashMap<u64, Instant>>,
    ttl: Option<Duration>,
}

impl BroadcastManager {
    /// `ttl` of `None` keeps every id forever.
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            seen: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn has_seen(&self, index: u64) -> bool {
        let seen = self.seen.read().expect("broadcast lock poisoned");
        match seen.get(&index) {
            Some(at) => !self.is_expired(*at),
            None => false,
        }
    }

    pub fn mark_seen(&self, index: u64) {
        let mut seen = self.seen.write().expect("broadcast lock poisoned");
        self.evict_expired(&mut seen);
        seen.insert(index, Instant::now());
    }

    /// Mark `index` as seen. Returns `false` if it already was, in one step so
    /// two concurrent deliveries of the same packet cannot both proceed.
    pub fn check_and_mark(&self, index: u64) -> bool {
        let mut seen = self.seen.write().expect("broadcast lock poisoned");
        self.evict_expired(&mut seen);
        if seen.contains_key(&index) {
            return false;
        }
        seen.insert(index, Instant::now());
        true
    }

    pub fn len(&self) -> usize {
        self.seen.read().expect("broadcast lock poisoned").len()
    }

    fn is_expired(&self, at: Instant) -> bool {
        self.ttl.is_some_and(|ttl| at.elapsed() >= ttl)
    }

    fn evict_expired(&self, seen: &mut HashMap<u64, Instant>) {
        if let Some(ttl) = self.ttl {
            seen.retain(|_, at| at.elapsed() < ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::BroadcastManager;

    #[test]
    fn second_delivery_is_a_duplicate() {
        let manager = BroadcastManager::new(None);
        assert!(!manager.has_seen(7));
        assert!(manager.check_and_mark(7));
        assert!(manager.has_seen(7));
        assert!(!manager.check_and_mark(7));
        assert!(manager.check_and_mark(8));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let manager = BroadcastManager::new(None);
        manager.mark_seen(1);
        manager.mark_seen(1);
        assert!(manager.has_seen(1));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn expired_ids_are_evicted() {
        let manager = BroadcastManager::new(Some(Duration::from_millis(20)));
        manager.mark_seen(1);
        sleep(Duration::from_millis(40));
        assert!(!manager.has_seen(1));

        assert!(manager.check_and_mark(2));
        assert_eq!(manager.len(), 1);
        assert!(manager.check_and_mark(1));
    }
}
