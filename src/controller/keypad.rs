//! Input state and LED slots of one physical keypad.

use super::key::Key;
use crate::error::AppError;
use crate::protocol::Rgb;
use crate::scene::{Directory, FlagStore, Player};
use serde_json::Value;
use tracing::{error, trace, warn};

/// Button names in the order they appear on the device.
pub const BUTTONS: [&str; 11] = ["Q", "W", "E", "A", "S", "D", "Z", "X", "C", "SHI", "SPC"];

pub const ROTATION_FLAG: &str = "controllerRotation_";

const UNASSIGNED_LED: [Rgb; 2] = [Rgb::GREEN, Rgb::BLACK];

#[derive(Debug, Clone)]
pub struct Keypad {
    controller_id: String,
    keys: [Key; BUTTONS.len()],
    leds: [Rgb; 2],
    leds_changed: bool,
    repeat_interval_ms: u64,
}

impl Keypad {
    /// A fresh keypad shows the default colours and announces them on the next flush.
    pub fn new(controller_id: impl Into<String>, repeat_interval_ms: u64, directory: &Directory) -> Self {
        let mut keypad = Self {
            controller_id: controller_id.into(),
            keys: Default::default(),
            leds: [Rgb::BLACK; 2],
            leds_changed: false,
            repeat_interval_ms,
        };
        keypad.set_default_led_color(directory);
        keypad
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    fn key_mut(&mut self, name: &str, caller: &str) -> Option<&mut Key> {
        match BUTTONS.iter().position(|b| *b == name) {
            Some(idx) => Some(&mut self.keys[idx]),
            None => {
                warn!(
                    controller_id = %self.controller_id,
                    key = name,
                    "{caller} called with unknown key"
                );
                None
            }
        }
    }

    pub fn register_key_event(&mut self, key: &str, down: bool) {
        if let Some(k) = self.key_mut(key, "register_key_event") {
            k.set_down(down);
            trace!(key, down, "Key state changed");
        }
    }

    pub fn is_down(&mut self, key: &str) -> bool {
        self.key_mut(key, "is_down").is_some_and(|k| k.is_down())
    }

    pub fn is_just_down(&mut self, key: &str, now: u64) -> bool {
        self.key_mut(key, "is_just_down")
            .is_some_and(|k| k.is_just_down(now))
    }

    pub fn is_repeated_down(&mut self, key: &str, now: u64) -> bool {
        let interval = self.repeat_interval_ms;
        self.key_mut(key, "is_repeated_down")
            .is_some_and(|k| k.is_repeated_down(now, interval))
    }

    /// Align the repeat clock of all held `keys` so diagonal movement repeats
    /// in lockstep. No-op unless at least two of them are down.
    pub fn sync_repetitions(&mut self, keys: &[&str], now: u64) {
        if keys.len() < 2 {
            return;
        }
        let held: Vec<usize> = keys
            .iter()
            .filter_map(|name| BUTTONS.iter().position(|b| b == name))
            .filter(|idx| self.keys[*idx].is_down())
            .collect();
        if held.len() < 2 {
            return;
        }
        let latest = held
            .iter()
            .map(|idx| self.keys[*idx].last_trigger().unwrap_or(now))
            .max()
            .unwrap_or(now);
        for idx in held {
            self.keys[idx].set_last_trigger(latest);
        }
    }

    /// Set one of the two LEDs. Marks the keypad dirty only on an actual change.
    pub fn set_led(&mut self, index: usize, color: Rgb) {
        let Some(slot) = self.leds.get_mut(index) else {
            error!(controller_id = %self.controller_id, index, "Tried to set unknown LED");
            return;
        };
        if *slot != color {
            *slot = color;
            self.leds_changed = true;
        }
    }

    /// Player colour on both LEDs, or green/black while no player is mapped.
    pub fn set_default_led_color(&mut self, directory: &Directory) {
        match self.player(directory) {
            Some(player) => {
                self.set_led(0, player.color);
                self.set_led(1, player.color);
            }
            None => {
                self.set_led(0, UNASSIGNED_LED[0]);
                self.set_led(1, UNASSIGNED_LED[1]);
            }
        }
        self.leds_changed = true;
    }

    /// LED colours if they changed since the last call; clears the dirty flag.
    pub fn leds_if_changed(&mut self) -> Option<[Rgb; 2]> {
        if self.leds_changed {
            self.leds_changed = false;
            Some(self.leds)
        } else {
            None
        }
    }

    pub fn peek_leds(&self) -> [Rgb; 2] {
        self.leds
    }

    pub fn player(&self, directory: &Directory) -> Option<Player> {
        directory.player_for_controller(&self.controller_id)
    }

    pub fn token(&self, directory: &Directory) -> Option<String> {
        let player = self.player(directory)?;
        directory.token_for(&player.id)
    }

    /// Orientation in degrees, within [0, 360).
    pub fn rotation(&self, flags: &dyn FlagStore) -> f64 {
        flags
            .get_flag(&self.rotation_key())
            .and_then(|v| v.as_f64())
            .map(normalize_degrees)
            .unwrap_or(0.0)
    }

    pub fn set_rotation(&self, flags: &dyn FlagStore, degrees: f64) -> Result<f64, AppError> {
        if !degrees.is_finite() {
            return Err(AppError::Protocol(format!(
                "rotation must be numeric, got {degrees}"
            )));
        }
        let normalized = normalize_degrees(degrees);
        let value = serde_json::Number::from_f64(normalized)
            .map(Value::Number)
            .unwrap_or(Value::from(0));
        flags.set_flag(&self.rotation_key(), value)?;
        Ok(normalized)
    }

    fn rotation_key(&self) -> String {
        format!("{ROTATION_FLAG}{}", self.controller_id)
    }
}

fn normalize_degrees(degrees: f64) -> f64 {
    degrees.rem_euclid(360.0)
}
