use crate::features::ListenerError;
use async_trait::async_trait;

/// Priority sentinels. Only handlers strictly above `OFF` are ever asked for a frame.
pub mod priority {
    pub const OFF: i32 = -100;
    pub const LOWEST: i32 = 0;
    pub const AMBILIGHT: i32 = 100;
    pub const TIMER: i32 = 200;
}

/// A producer competing for the LED ring.
///
/// `priority` is polled on every refresh, so a handler can step back by
/// returning [`priority::OFF`]. The winner renders `count` RGB triples
/// (`count * 3` bytes); `Ok(None)` means "nothing to show this time".
#[async_trait]
pub trait LedHandler: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32 {
        priority::LOWEST
    }

    async fn update_leds(&self, count: usize) -> Result<Option<Vec<u8>>, ListenerError>;
}
