use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Send times for one credential over the last minute.
///
/// Slots are reserved ahead of time, so entries may lie in the future; callers
/// sleep for the returned delay before using the slot.
#[derive(Debug, Default)]
pub(crate) struct RateWindow {
    sent: VecDeque<Instant>,
}

impl RateWindow {
    /// `max_per_minute == 0` disables the budget; spacing still applies.
    pub(crate) fn reserve(&mut self, now: Instant, max_per_minute: u32, spacing: Duration) -> Duration {
        while let Some(front) = self.sent.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                self.sent.pop_front();
            } else {
                break;
            }
        }

        let mut at = now;
        if let Some(last) = self.sent.back() {
            at = at.max(*last + spacing);
        }
        let budget = max_per_minute as usize;
        if budget > 0 && self.sent.len() >= budget {
            let oldest_in_budget = self.sent[self.sent.len() - budget];
            at = at.max(oldest_in_budget + WINDOW);
        }
        self.sent.push_back(at);
        at.saturating_duration_since(now)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sent.len()
    }
}

/// Point-in-time view of rotation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSnapshot {
    pub current: usize,
    pub failed: Vec<usize>,
}

#[derive(Debug)]
pub(crate) struct CredentialSet {
    keys: Vec<String>,
    current: usize,
    failed: BTreeSet<usize>,
    windows: Vec<RateWindow>,
}

pub(crate) struct Reservation {
    pub index: usize,
    pub key: String,
    pub wait: Duration,
}

impl CredentialSet {
    pub(crate) fn new(keys: Vec<String>) -> Self {
        let windows = keys.iter().map(|_| RateWindow::default()).collect();
        Self {
            keys,
            current: 0,
            failed: BTreeSet::new(),
            windows,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn reserve(&mut self, now: Instant, max_per_minute: u32, spacing: Duration) -> Reservation {
        let index = self.current;
        let wait = self.windows[index].reserve(now, max_per_minute, spacing);
        Reservation {
            index,
            key: self.keys[index].clone(),
            wait,
        }
    }

    /// Mark `index` as rate limited for this cycle and move to the next key
    /// that is not. Returns `false` when every key has failed.
    pub(crate) fn mark_failed_and_rotate(&mut self, index: usize) -> bool {
        self.failed.insert(index);
        let total = self.keys.len();
        for step in 1..=total {
            let candidate = (index + step) % total;
            if !self.failed.contains(&candidate) {
                self.current = candidate;
                return true;
            }
        }
        false
    }

    pub(crate) fn start_new_cycle(&mut self) {
        self.failed.clear();
        self.current = 0;
    }

    pub(crate) fn snapshot(&self) -> CredentialSnapshot {
        CredentialSnapshot {
            current: self.current,
            failed: self.failed.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("key-{i}")).collect()
    }

    #[test]
    fn window_enforces_spacing_between_sends() {
        let mut window = RateWindow::default();
        let now = Instant::now();
        assert_eq!(window.reserve(now, 25, Duration::from_millis(1500)), Duration::ZERO);
        let wait = window.reserve(now, 25, Duration::from_millis(1500));
        assert_eq!(wait, Duration::from_millis(1500));
    }

    #[test]
    fn window_waits_for_oldest_send_once_budget_is_spent() {
        let mut window = RateWindow::default();
        let now = Instant::now();
        for _ in 0..3 {
            window.reserve(now, 3, Duration::ZERO);
        }
        assert_eq!(window.reserve(now, 3, Duration::ZERO), WINDOW);
    }

    #[test]
    fn window_forgets_sends_older_than_a_minute() {
        let mut window = RateWindow::default();
        let start = Instant::now();
        window.reserve(start, 1, Duration::ZERO);
        let later = start + WINDOW + Duration::from_millis(1);
        assert_eq!(window.reserve(later, 1, Duration::ZERO), Duration::ZERO);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn rotation_skips_failed_keys_and_wraps() {
        let mut set = CredentialSet::new(keys(3));
        assert!(set.mark_failed_and_rotate(1));
        assert_eq!(set.snapshot().current, 2);
        assert!(set.mark_failed_and_rotate(2));
        assert_eq!(set.snapshot().current, 0);
        assert!(!set.mark_failed_and_rotate(0));
        assert_eq!(set.snapshot().failed, vec![0, 1, 2]);

        set.start_new_cycle();
        assert_eq!(
            set.snapshot(),
            CredentialSnapshot {
                current: 0,
                failed: Vec::new()
            }
        );
    }

    #[test]
    fn single_key_exhausts_immediately() {
        let mut set = CredentialSet::new(keys(1));
        assert!(!set.mark_failed_and_rotate(0));
    }

    #[test]
    fn reservation_uses_the_active_key_window() {
        let mut set = CredentialSet::new(keys(2));
        let now = Instant::now();
        let first = set.reserve(now, 25, Duration::from_secs(1));
        assert_eq!((first.index, first.key.as_str()), (0, "key-0"));
        set.mark_failed_and_rotate(0);
        let second = set.reserve(now, 25, Duration::from_secs(1));
        assert_eq!(second.index, 1);
        assert_eq!(second.wait, Duration::ZERO);
    }
}
