//! Edge and auto-repeat detection for a single button.
//!
//! All timestamps are caller-supplied milliseconds from a monotonic clock, so
//! several listeners asking about the same key within one tick agree.

#[derive(Debug, Clone, Default)]
pub struct Key {
    down: bool,
    last_up: Option<u64>,
    last_trigger: Option<u64>,
}

impl Key {
    pub fn is_down(&self) -> bool {
        self.down
    }

    /// Releasing the key forgets both timestamps.
    pub fn set_down(&mut self, down: bool) {
        self.down = down;
        if !down {
            self.last_up = None;
            self.last_trigger = None;
        }
    }

    /// True the first time the key is observed down after a press, and for
    /// further calls carrying the same `now`.
    pub fn is_just_down(&mut self, now: u64) -> bool {
        if !self.down {
            return false;
        }
        match self.last_up {
            None => {
                self.last_up = Some(now);
                true
            }
            Some(seen) => seen == now,
        }
    }

    /// True on the first observation of a press, then once every time more
    /// than `interval_ms` has passed since the last trigger.
    pub fn is_repeated_down(&mut self, now: u64, interval_ms: u64) -> bool {
        if !self.down {
            return false;
        }
        match self.last_trigger {
            None => {
                self.last_trigger = Some(now);
                true
            }
            Some(last) if last == now => true,
            Some(last) if now > last.saturating_add(interval_ms) => {
                self.last_trigger = Some(now);
                true
            }
            Some(_) => false,
        }
    }

    pub(crate) fn last_trigger(&self) -> Option<u64> {
        self.last_trigger
    }

    pub(crate) fn set_last_trigger(&mut self, at: u64) {
        self.last_trigger = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_just_down_once_per_press() {
        let mut key = Key::default();
        assert!(!key.is_just_down(0));
        key.set_down(true);
        assert!(key.is_just_down(10));
        assert!(key.is_just_down(10));
        assert!(!key.is_just_down(26));
        assert!(!key.is_just_down(42));
        key.set_down(false);
        assert!(!key.is_just_down(58));
        key.set_down(true);
        assert!(key.is_just_down(74));
    }

    #[test]
    fn test_press_and_release_between_ticks_is_missed() {
        let mut key = Key::default();
        key.set_down(true);
        key.set_down(false);
        assert!(!key.is_just_down(10));
        assert!(!key.is_repeated_down(10, 250));
    }

    #[test]
    fn test_repeat_waits_for_interval() {
        let mut key = Key::default();
        key.set_down(true);
        assert!(key.is_repeated_down(1_000, 250));
        assert!(key.is_repeated_down(1_000, 250));
        assert!(!key.is_repeated_down(1_016, 250));
        assert!(!key.is_repeated_down(1_250, 250));
        assert!(key.is_repeated_down(1_251, 250));
        assert!(!key.is_repeated_down(1_300, 250));
        assert!(key.is_repeated_down(1_502, 250));
    }

    #[test]
    fn test_release_resets_repeat() {
        let mut key = Key::default();
        key.set_down(true);
        assert!(key.is_repeated_down(1_000, 250));
        key.set_down(false);
        assert!(key.last_trigger().is_none());
        key.set_down(true);
        assert!(key.is_repeated_down(1_010, 250));
    }
}
