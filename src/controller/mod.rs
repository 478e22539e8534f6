//! Keypad input state and the fixed-rate tick that fans it out to features.

pub mod key;
pub mod keypad;
pub mod manager;

pub use key::Key;
pub use keypad::Keypad;
pub use manager::{
    ControllerCommand, ControllerCommands, ControllerManager, ListenerHandle, TickContext,
    TickListener,
};

use tokio::time::Instant;

/// Monotonic millisecond clock shared by everything that compares tick times.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
