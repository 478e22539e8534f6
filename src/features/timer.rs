//! Countdowns shown on the table LED ring.
//!
//! The [`TimerBoard`] is shared between whoever starts countdowns (the combat
//! indicator) and [`TimerLeds`], which renders the longest running visible
//! countdown as a ring that shrinks as time runs out.

use super::ListenerError;
use crate::config::AmbilightConfig;
use crate::controller::Clock;
use crate::led::{LedHandler, priority};
use crate::protocol::Rgb;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Countdown {
    pub id: u64,
    pub start: u64,
    pub end: u64,
    /// Whether the countdown may take over the LED ring.
    pub led_visible: bool,
}

impl Countdown {
    /// Fraction elapsed in `[0, 1]`, or `-1.0` before `start`.
    pub fn completion(&self, now: u64) -> f64 {
        if now < self.start {
            -1.0
        } else if now >= self.end {
            1.0
        } else {
            (now - self.start) as f64 / (self.end - self.start) as f64
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.end < now
    }
}

#[derive(Debug, Default)]
struct BoardState {
    next_id: u64,
    countdowns: Vec<Countdown>,
}

/// Running countdowns. Cloning shares the board.
#[derive(Debug, Clone, Default)]
pub struct TimerBoard {
    state: Arc<Mutex<BoardState>>,
}

impl TimerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a countdown of `duration_ms` at `start`. Returns its id.
    pub fn add(&self, start: u64, duration_ms: u64, led_visible: bool) -> u64 {
        let mut state = self.state();
        state.next_id += 1;
        let id = state.next_id;
        state.countdowns.push(Countdown {
            id,
            start,
            end: start.saturating_add(duration_ms),
            led_visible,
        });
        debug!(id, duration_ms, led_visible, "Started countdown");
        id
    }

    pub fn remove(&self, id: u64) -> bool {
        let mut state = self.state();
        let before = state.countdowns.len();
        state.countdowns.retain(|c| c.id != id);
        before != state.countdowns.len()
    }

    pub fn abort_all(&self) {
        let mut state = self.state();
        if !state.countdowns.is_empty() {
            debug!(count = state.countdowns.len(), "Aborting countdowns");
        }
        state.countdowns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.state().countdowns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state().countdowns.len()
    }

    /// Drop expired countdowns and return the rest, latest end first.
    pub fn prune(&self, now: u64) -> Vec<Countdown> {
        let mut state = self.state();
        state.countdowns.retain(|c| !c.is_expired(now));
        state.countdowns.sort_by(|a, b| b.end.cmp(&a.end));
        state.countdowns.clone()
    }
}

fn completion_color(completion: f64) -> Rgb {
    if completion > 2.0 / 3.0 {
        Rgb::RED
    } else if completion > 1.0 / 3.0 {
        Rgb::YELLOW
    } else {
        Rgb::GREEN
    }
}

pub struct TimerLeds {
    board: TimerBoard,
    clock: Clock,
    offset: i64,
    min_brightness: u8,
}

impl TimerLeds {
    pub fn new(board: TimerBoard, clock: Clock, config: &AmbilightConfig) -> Self {
        Self {
            board,
            clock,
            offset: i64::from(config.led.offset),
            min_brightness: config.brightness.min,
        }
    }

    pub fn render(&self, count: usize, now: u64) -> Vec<u8> {
        let mut leds = vec![0; count * 3];
        let countdowns = self.board.prune(now);
        let Some(shown) = countdowns.iter().find(|c| c.led_visible) else {
            return leds;
        };
        if count == 0 {
            return leds;
        }
        let completion = shown.completion(now);
        let color = completion_color(completion);
        let completed = (count as f64 * completion).floor();
        for i in 0..count {
            let slot = (i as i64 + self.offset).rem_euclid(count as i64) as usize * 3;
            let rgb = if i as f64 > completed {
                [color.r, color.g, color.b]
            } else {
                [self.min_brightness; 3]
            };
            leds[slot..slot + 3].copy_from_slice(&rgb);
        }
        leds
    }
}

#[async_trait]
impl LedHandler for TimerLeds {
    fn name(&self) -> &str {
        "timer"
    }

    fn priority(&self) -> i32 {
        if self.board.is_empty() {
            priority::OFF
        } else {
            priority::TIMER
        }
    }

    async fn update_leds(&self, count: usize) -> Result<Option<Vec<u8>>, ListenerError> {
        Ok(Some(self.render(count, self.clock.now_ms())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leds(board: &TimerBoard, offset: i32, min: u8) -> TimerLeds {
        let mut config = AmbilightConfig::default();
        config.led.offset = offset;
        config.brightness.min = min;
        TimerLeds::new(board.clone(), Clock::new(), &config)
    }

    #[test]
    fn test_completion() {
        let c = Countdown {
            id: 1,
            start: 100,
            end: 200,
            led_visible: true,
        };
        assert_eq!(c.completion(50), -1.0);
        assert_eq!(c.completion(150), 0.5);
        assert_eq!(c.completion(200), 1.0);
        assert!(!c.is_expired(200));
        assert!(c.is_expired(201));
    }

    #[test]
    fn test_priority_follows_board() {
        let board = TimerBoard::new();
        let handler = leds(&board, 0, 0);
        assert_eq!(handler.priority(), priority::OFF);
        let id = board.add(0, 1_000, true);
        assert_eq!(handler.priority(), priority::TIMER);
        assert!(board.remove(id));
        assert_eq!(handler.priority(), priority::OFF);
    }

    #[test]
    fn test_ring_shrinks_and_changes_colour() {
        let board = TimerBoard::new();
        board.add(0, 900, true);
        let handler = leds(&board, 0, 7);

        // fresh: every LED green
        assert_eq!(handler.render(3, 0), vec![7, 7, 7, 0, 255, 0, 0, 255, 0]);
        // a bit over a third: first LED elapsed, rest yellow
        assert_eq!(handler.render(3, 400), vec![7, 7, 7, 7, 7, 7, 255, 255, 0]);
        // nearly done: red but everything up to the completed LED dimmed
        assert_eq!(handler.render(3, 700), vec![7, 7, 7, 7, 7, 7, 7, 7, 7]);
    }

    #[test]
    fn test_offset_rotates_ring() {
        let board = TimerBoard::new();
        board.add(0, 900, true);
        let handler = leds(&board, 1, 0);
        // LED 0 (elapsed) lands in slot 1
        assert_eq!(handler.render(3, 0), vec![0, 255, 0, 0, 0, 0, 0, 255, 0]);
        let negative = leds(&board, -1, 0);
        assert_eq!(negative.render(3, 0), vec![0, 255, 0, 0, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_longest_visible_countdown_wins_and_expired_are_pruned() {
        let board = TimerBoard::new();
        board.add(0, 300, true);
        board.add(0, 3_000, false);
        board.add(0, 900, true);
        let handler = leds(&board, 0, 0);
        // the 900ms countdown is shown, not yet a third through
        assert_eq!(handler.render(3, 200), vec![0, 0, 0, 0, 255, 0, 0, 255, 0]);
        assert_eq!(board.len(), 3);
        handler.render(3, 301);
        assert_eq!(board.len(), 2);
        handler.render(3, 1_000);
        assert_eq!(board.len(), 1);
        // only the hidden one is left: the ring stays dark
        assert_eq!(handler.render(2, 1_000), vec![0; 6]);
    }

    #[tokio::test]
    async fn test_handler_produces_full_frame() {
        let board = TimerBoard::new();
        let handler = leds(&board, 0, 0);
        board.add(handler.clock.now_ms(), 60_000, true);
        let frame = handler.update_leds(4).await.unwrap().unwrap();
        assert_eq!(frame.len(), 12);
        board.abort_all();
        assert!(board.is_empty());
    }
}
