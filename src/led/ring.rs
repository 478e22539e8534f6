//! Picks one LED handler per refresh and forwards its frame to the hub.

use super::handler::{LedHandler, priority};
use crate::PACKET_PROCESSING_TARGET;
use crate::config::AmbilightConfig;
use crate::protocol::AmbilightMessage;
use crate::transport::SocketHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

pub struct TableLedRing {
    handlers: Vec<Arc<dyn LedHandler>>,
    last_sent: Option<String>,
    socket: SocketHandle,
    config: AmbilightConfig,
}

impl TableLedRing {
    pub fn new(config: AmbilightConfig, socket: SocketHandle) -> Self {
        Self {
            handlers: Vec::new(),
            last_sent: None,
            socket,
            config,
        }
    }

    /// Registering the same handler twice is a no-op.
    pub fn register_handler(&mut self, handler: Arc<dyn LedHandler>) -> bool {
        if self.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        debug!(handler = handler.name(), "Registered LED handler");
        self.handlers.push(handler);
        true
    }

    pub fn unregister_handler(&mut self, handler: &Arc<dyn LedHandler>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        before != self.handlers.len()
    }

    /// Highest priority above `OFF`; the earliest registration wins a tie.
    fn select_handler(&self) -> Option<Arc<dyn LedHandler>> {
        let mut best: Option<&Arc<dyn LedHandler>> = None;
        let mut best_priority = priority::OFF;
        for handler in &self.handlers {
            let prio = handler.priority();
            if prio > best_priority {
                best = Some(handler);
                best_priority = prio;
            }
        }
        best.cloned()
    }

    /// One arbitration round. Returns whether a frame was sent.
    pub async fn refresh(&mut self) -> bool {
        if !self.socket.is_connected() || !self.config.enabled {
            return false;
        }
        let Some(handler) = self.select_handler() else {
            return false;
        };
        let count = self.config.led.count;
        let colors = match handler.update_leds(count).await {
            Ok(Some(colors)) => colors,
            Ok(None) => return false,
            Err(e) => {
                warn!(handler = handler.name(), error = %e, "LED handler failed, skipping refresh");
                return false;
            }
        };
        if colors.len() != count * 3 {
            error!(
                handler = handler.name(),
                expected = count * 3,
                actual = colors.len(),
                "LED handler returned a frame of the wrong size"
            );
            return false;
        }

        let msg = AmbilightMessage::new(
            self.config.target.clone(),
            self.config.universe,
            colors,
        );
        let raw = match serde_json::to_string(&msg) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "Failed to encode LED frame");
                return false;
            }
        };
        if self.last_sent.as_deref() == Some(raw.as_str()) {
            trace!(target: PACKET_PROCESSING_TARGET, "LED frame unchanged, not resending");
            return false;
        }
        match self.socket.send(raw.clone()) {
            Ok(()) => {
                self.last_sent = Some(raw);
                true
            }
            Err(e) => {
                warn!(code = e.code(), error = %e, "Failed to send LED frame");
                false
            }
        }
    }

    /// LED ring task: refreshes at `ambilight.fps` until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs_f64(1.0 / self.config.fps);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            fps = self.config.fps,
            handlers = self.handlers.len(),
            "LED ring refresh started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        self.handlers.clear();
        debug!("LED ring refresh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::ListenerError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        priority: AtomicI32,
        value: Mutex<u8>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, priority: i32, value: u8) -> Arc<Self> {
            Arc::new(Self {
                name,
                priority: AtomicI32::new(priority),
                value: Mutex::new(value),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LedHandler for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority.load(Ordering::SeqCst)
        }
        async fn update_leds(&self, count: usize) -> Result<Option<Vec<u8>>, ListenerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(vec![*self.value.lock().unwrap(); count * 3]))
        }
    }

    struct Broken;

    #[async_trait]
    impl LedHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn priority(&self) -> i32 {
            priority::TIMER
        }
        async fn update_leds(&self, _count: usize) -> Result<Option<Vec<u8>>, ListenerError> {
            Err(ListenerError::Failed("no frame".into()))
        }
    }

    struct Short;

    #[async_trait]
    impl LedHandler for Short {
        fn name(&self) -> &str {
            "short"
        }
        async fn update_leds(&self, _count: usize) -> Result<Option<Vec<u8>>, ListenerError> {
            Ok(Some(vec![1, 2]))
        }
    }

    fn config() -> AmbilightConfig {
        let mut config = AmbilightConfig::default();
        config.enabled = true;
        config.target = "10.0.0.7".into();
        config.led.count = 2;
        config
    }

    fn colors(raw: &str) -> Vec<u8> {
        let v: serde_json::Value = serde_json::from_str(raw).unwrap();
        serde_json::from_value(v["colors"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_highest_priority_wins_and_duplicates_are_suppressed() {
        let (socket, mut out) = SocketHandle::loopback(true);
        let mut ring = TableLedRing::new(config(), socket);
        let off = Fixed::new("off", priority::OFF, 1);
        let five_a = Fixed::new("five-a", 5, 2);
        let five_b = Fixed::new("five-b", 5, 3);
        let ten = Fixed::new("ten", 10, 4);
        for h in [&off, &five_a, &five_b, &ten] {
            ring.register_handler(h.clone());
        }

        assert!(ring.refresh().await);
        let raw = out.try_recv().unwrap();
        assert_eq!(colors(&raw), vec![4; 6]);
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "ambilight");
        assert_eq!(v["target"], "10.0.0.7");
        assert_eq!(v["universe"], 1);

        assert!(!ring.refresh().await);
        assert!(out.try_recv().is_err());

        *ten.value.lock().unwrap() = 9;
        assert!(ring.refresh().await);
        assert_eq!(colors(&out.try_recv().unwrap()), vec![9; 6]);
        assert_eq!(off.calls.load(Ordering::SeqCst), 0);
        assert_eq!(five_a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ties_go_to_earliest_registration() {
        let (socket, mut out) = SocketHandle::loopback(true);
        let mut ring = TableLedRing::new(config(), socket);
        let first = Fixed::new("first", 5, 2);
        let second = Fixed::new("second", 5, 3);
        ring.register_handler(first.clone());
        ring.register_handler(second.clone());
        assert!(!ring.register_handler(first.clone()));
        ring.refresh().await;
        assert_eq!(colors(&out.try_recv().unwrap()), vec![2; 6]);

        let first_dyn: Arc<dyn LedHandler> = first.clone();
        assert!(ring.unregister_handler(&first_dyn));
        ring.refresh().await;
        assert_eq!(colors(&out.try_recv().unwrap()), vec![3; 6]);
    }

    #[tokio::test]
    async fn test_only_off_handlers_send_nothing() {
        let (socket, mut out) = SocketHandle::loopback(true);
        let mut ring = TableLedRing::new(config(), socket);
        let off = Fixed::new("off", priority::OFF, 1);
        ring.register_handler(off.clone());
        assert!(!ring.refresh().await);
        assert!(out.try_recv().is_err());
        assert_eq!(off.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skips_while_disconnected_or_disabled() {
        let (socket, mut out) = SocketHandle::loopback(false);
        let mut ring = TableLedRing::new(config(), socket.clone());
        let h = Fixed::new("h", 5, 1);
        ring.register_handler(h.clone());
        assert!(!ring.refresh().await);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);

        socket.set_connected(true);
        ring.config.enabled = false;
        assert!(!ring.refresh().await);
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_faulty_handlers_skip_one_refresh() {
        let (socket, mut out) = SocketHandle::loopback(true);
        let mut ring = TableLedRing::new(config(), socket);
        let broken: Arc<dyn LedHandler> = Arc::new(Broken);
        ring.register_handler(broken.clone());
        assert!(!ring.refresh().await);
        assert!(logs_contain("LED handler failed"));
        ring.unregister_handler(&broken);

        ring.register_handler(Arc::new(Short));
        assert!(!ring.refresh().await);
        assert!(logs_contain("wrong size"));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_send_does_not_update_cache() {
        let (socket, out) = SocketHandle::loopback(true);
        let mut ring = TableLedRing::new(config(), socket.clone());
        ring.register_handler(Fixed::new("h", 5, 7));
        // Connected flag set but nobody drains the channel any more.
        drop(out);
        assert!(!ring.refresh().await);
        assert!(ring.last_sent.is_none());
    }
}
