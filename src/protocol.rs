//! Wire protocol spoken with the controller hub.
//!
//! # Frames
//! Every WebSocket text frame carries exactly one JSON object with a mandatory
//! `type` field. The transport only looks at `type` (see [`Frame`]); the typed
//! payloads below are decoded by whoever subscribed to that type.
//!
//! ## Inbound
//! ```json
//! { "type": "registration", "status": "connected", "controller-id": "C1" }
//! { "type": "key-event", "controller-id": "C1", "key": "W", "state": "down" }
//! ```
//! Registration frames with `"receiver": true` are announcements from other
//! receivers connected to the hub and carry no controller.
//!
//! ## Outbound
//! ```json
//! { "type": "registration", "status": "connected", "receiver": true, "players": [{ "id": "p1", "name": "Alice" }] }
//! { "type": "configuration", "controller-id": "C1", "led1": { "r": 255, "g": 0, "b": 0 }, "led2": { "r": 0, "g": 0, "b": 0 } }
//! { "type": "ambilight", "target": "10.0.0.7", "universe": 1, "colors": [255, 0, 0, 0, 255, 0] }
//! ```

use crate::error::{AppError, err};
use serde::{Deserialize, Serialize};

pub const TYPE_REGISTRATION: &str = "registration";
pub const TYPE_KEY_EVENT: &str = "key-event";
pub const TYPE_CONFIGURATION: &str = "configuration";
pub const TYPE_AMBILIGHT: &str = "ambilight";

/// A decoded frame with its demultiplexing key split off.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: String,
    pub body: serde_json::Value,
}

impl Frame {
    /// Parse a raw text frame. Fails on malformed JSON, non-object payloads and
    /// frames without a string `type`.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let body: serde_json::Value = serde_json::from_str(raw)?;
        if !body.is_object() {
            return Err(err::parse("frame is not a JSON object"));
        }
        let kind = body
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| err::protocol("frame without type"))?
            .to_string();
        Ok(Self { kind, body })
    }

    /// Decode the payload into a typed message.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AppError> {
        T::deserialize(&self.body).map_err(AppError::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: String,
    pub name: String,
}

/// `registration` in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: RegistrationStatus,
    #[serde(
        rename = "controller-id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub controller_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub receiver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<PlayerSummary>>,
}

impl RegistrationMessage {
    /// Announcement of this process as a non-physical receiver.
    pub fn receiver(status: RegistrationStatus, players: Vec<PlayerSummary>) -> Self {
        Self {
            kind: TYPE_REGISTRATION.to_string(),
            status,
            controller_id: None,
            receiver: true,
            players: Some(players),
        }
    }
}

/// `key-event`, inbound only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEventMessage {
    #[serde(rename = "controller-id")]
    pub controller_id: String,
    pub key: String,
    /// Usually `"down"` or `"up"`; compared case-insensitively.
    pub state: String,
}

impl KeyEventMessage {
    pub fn is_down(&self) -> bool {
        self.state.eq_ignore_ascii_case("down")
    }
}

/// `configuration`, outbound only: the two keypad LEDs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "controller-id")]
    pub controller_id: String,
    pub led1: Rgb,
    pub led2: Rgb,
}

impl ConfigurationMessage {
    pub fn new(controller_id: impl Into<String>, leds: [Rgb; 2]) -> Self {
        Self {
            kind: TYPE_CONFIGURATION.to_string(),
            controller_id: controller_id.into(),
            led1: leds[0],
            led2: leds[1],
        }
    }
}

/// `ambilight`, outbound only: one full frame for the table LED ring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AmbilightMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    pub universe: u16,
    pub colors: Vec<u8>,
}

impl AmbilightMessage {
    pub fn new(target: impl Into<String>, universe: u16, colors: Vec<u8>) -> Self {
        Self {
            kind: TYPE_AMBILIGHT.to_string(),
            target: target.into(),
            universe,
            colors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(0xFF, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 0xFF, 0);
    pub const YELLOW: Rgb = Rgb::new(0xFF, 0xFF, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB`, `RRGGBB` or the short `#RGB` form.
    pub fn from_hex(hex: &str) -> Result<Self, AppError> {
        let digits = hex.trim().trim_start_matches('#');
        let expanded: String = match digits.len() {
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            6 => digits.to_string(),
            _ => return Err(err::parse(format!("invalid colour '{hex}'"))),
        };
        let value = u32::from_str_radix(&expanded, 16)
            .map_err(|_| err::parse(format!("invalid colour '{hex}'")))?;
        Ok(Self::new(
            ((value >> 16) & 0xFF) as u8,
            ((value >> 8) & 0xFF) as u8,
            (value & 0xFF) as u8,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_requires_type() {
        assert!(Frame::parse(r#"{"status":"connected"}"#).is_err());
        assert!(Frame::parse(r#"[1,2]"#).is_err());
        assert!(Frame::parse("not json").is_err());
        let frame = Frame::parse(r#"{"type":"key-event","key":"W"}"#).unwrap();
        assert_eq!(frame.kind, TYPE_KEY_EVENT);
    }

    #[test]
    fn test_decode_registration_from_controller() {
        let frame =
            Frame::parse(r#"{"type":"registration","status":"connected","controller-id":"C1"}"#)
                .unwrap();
        let msg: RegistrationMessage = frame.decode().unwrap();
        assert_eq!(msg.status, RegistrationStatus::Connected);
        assert_eq!(msg.controller_id.as_deref(), Some("C1"));
        assert!(!msg.receiver);
    }

    #[test]
    fn test_receiver_announcement_shape() {
        let msg = RegistrationMessage::receiver(
            RegistrationStatus::Connected,
            vec![PlayerSummary {
                id: "p1".into(),
                name: "Alice".into(),
            }],
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "registration",
                "status": "connected",
                "receiver": true,
                "players": [{ "id": "p1", "name": "Alice" }]
            })
        );
    }

    #[test]
    fn test_key_event_state_is_case_insensitive() {
        let frame = Frame::parse(
            r#"{"type":"key-event","controller-id":"C1","key":"W","state":"DOWN"}"#,
        )
        .unwrap();
        let msg: KeyEventMessage = frame.decode().unwrap();
        assert!(msg.is_down());
    }

    #[test]
    fn test_configuration_serialization() {
        let msg = ConfigurationMessage::new("C1", [Rgb::RED, Rgb::BLACK]);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"configuration","controller-id":"C1","led1":{"r":255,"g":0,"b":0},"led2":{"r":0,"g":0,"b":0}}"#
        );
    }

    #[test]
    fn test_hex_colours() {
        assert_eq!(Rgb::from_hex("#ffad58").unwrap(), Rgb::new(0xff, 0xad, 0x58));
        assert_eq!(Rgb::from_hex("00FF00").unwrap(), Rgb::GREEN);
        assert_eq!(Rgb::from_hex("#f00").unwrap(), Rgb::RED);
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("#gggggg").is_err());
    }
}
