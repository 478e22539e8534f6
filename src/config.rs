//! Config modules for the application.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const SOCKET_URL_ENV: &str = "KEYRELAY_SOCKET_URL";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub doors: DoorsConfig,
    #[serde(default)]
    pub ambilight: AmbilightConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    /// Which keypad each player holds, keyed by player id.
    ///
    /// ```toml
    /// [mappings]
    /// alice = "C1"
    /// bob = "C2"
    /// ```
    #[serde(default)]
    pub mappings: HashMap<String, String>,
    #[serde(default)]
    pub flags: FlagsConfig,
    /// Scene used when the relay runs without an external host.
    #[serde(default)]
    pub scene: SceneConfig,
}

impl AppConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = Self::from_toml_str(&contents)
            .map_err(|e| format!("Failed to parse config file: {e}"))?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default() -> Self {
        // CWD > user config dir > /etc
        let config_paths = [
            PathBuf::from("keyrelay.toml"),
            dirs::config_dir()
                .map(|config_dir| config_dir.join("keyrelay").join("keyrelay.toml"))
                .unwrap_or_else(|| PathBuf::from("keyrelay.toml")),
            PathBuf::from("/etc/keyrelay/keyrelay.toml"),
        ];

        for path in &config_paths {
            if path.exists() {
                match Self::from_file(path) {
                    Ok(mut config) => {
                        tracing::info!("Loaded configuration from: {}", path.display());
                        config.validate_and_fix();
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Failed to load config from {}: {}. Falling back to defaults.",
                            path.display(),
                            e
                        );
                    }
                }
                // Only try the first existing config file
                break;
            }
        }

        tracing::info!("No configuration file found, using defaults");
        let mut config = Self::default();
        config.validate_and_fix();
        config
    }

    /// Clamp out-of-range values back into their valid ranges
    pub fn validate_and_fix(&mut self) {
        if self.controller.tick_rate == 0 || self.controller.tick_rate > 240 {
            tracing::warn!(
                "controller.tick_rate {} is out of range (1-240), using {}",
                self.controller.tick_rate,
                default_tick_rate()
            );
            self.controller.tick_rate = default_tick_rate();
        }
        if self.controller.repeat_interval_ms == 0 {
            tracing::warn!(
                "controller.repeat_interval_ms must be positive, using {}",
                default_repeat_interval_ms()
            );
            self.controller.repeat_interval_ms = default_repeat_interval_ms();
        }

        let ambilight = &mut self.ambilight;
        if !(1..=255).contains(&ambilight.universe) {
            tracing::warn!("ambilight.universe {} is out of range (1-255)", ambilight.universe);
            ambilight.universe = ambilight.universe.clamp(1, 255);
        }
        if !ambilight.fps.is_finite() || !(0.1..=15.0).contains(&ambilight.fps) {
            tracing::warn!("ambilight.fps {} is out of range (0.1-15)", ambilight.fps);
            ambilight.fps = if ambilight.fps.is_finite() {
                ambilight.fps.clamp(0.1, 15.0)
            } else {
                default_fps()
            };
        }
        if !(1..=170).contains(&ambilight.led.count) {
            tracing::warn!("ambilight.led.count {} is out of range (1-170)", ambilight.led.count);
            ambilight.led.count = ambilight.led.count.clamp(1, 170);
        }
        if !(-170..=170).contains(&ambilight.led.offset) {
            tracing::warn!(
                "ambilight.led.offset {} is out of range (-170-170)",
                ambilight.led.offset
            );
            ambilight.led.offset = ambilight.led.offset.clamp(-170, 170);
        }
        if ambilight.brightness.min > ambilight.brightness.max {
            tracing::warn!(
                "ambilight.brightness.min {} exceeds max {}, swapping",
                ambilight.brightness.min,
                ambilight.brightness.max
            );
            std::mem::swap(&mut ambilight.brightness.min, &mut ambilight.brightness.max);
        }
        if ambilight.enabled && ambilight.target.is_empty() {
            tracing::warn!("ambilight is enabled but has no target, disabling it");
            ambilight.enabled = false;
        }

        if self.combat.tactical_discussion_secs > 120 {
            tracing::warn!(
                "combat.tactical_discussion_secs {} is out of range (0-120)",
                self.combat.tactical_discussion_secs
            );
            self.combat.tactical_discussion_secs = 120;
        }
        if self.combat.player_reaction_secs > 60 {
            tracing::warn!(
                "combat.player_reaction_secs {} is out of range (0-60)",
                self.combat.player_reaction_secs
            );
            self.combat.player_reaction_secs = 60;
        }

        if !self.scene.grid_size.is_finite() || self.scene.grid_size <= 0.0 {
            tracing::warn!(
                "scene.grid_size {} must be positive, using {}",
                self.scene.grid_size,
                default_grid_size()
            );
            self.scene.grid_size = default_grid_size();
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SocketConfig {
    #[serde(default = "default_socket_host")]
    pub host: String,
    #[serde(default = "default_socket_port")]
    pub port: u16,
    #[serde(default = "default_socket_path")]
    pub path: String,
    /// Use `wss://` instead of `ws://`
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: default_socket_host(),
            port: default_socket_port(),
            path: default_socket_path(),
            secure: true,
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl SocketConfig {
    /// Hub URL, overridable with `KEYRELAY_SOCKET_URL`.
    pub fn url(&self) -> String {
        if let Ok(url) = std::env::var(SOCKET_URL_ENV) {
            if !url.is_empty() {
                return url;
            }
        }
        self.configured_url()
    }

    fn configured_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{scheme}://{}:{}{path}", self.host, self.port)
    }
}

fn default_socket_host() -> String {
    "localhost".to_string()
}

fn default_socket_port() -> u16 {
    443
}

fn default_socket_path() -> String {
    "/ws/vtt".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Ticks per second
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// A held key repeats once more than this many milliseconds have passed
    #[serde(default = "default_repeat_interval_ms")]
    pub repeat_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_rate: default_tick_rate(),
            repeat_interval_ms: default_repeat_interval_ms(),
        }
    }
}

fn default_tick_rate() -> u32 {
    60
}

fn default_repeat_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DoorsConfig {
    #[serde(default = "default_door_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for DoorsConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: default_door_interval_ms(),
        }
    }
}

fn default_door_interval_ms() -> u64 {
    150
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmbilightConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address of the LED controller the hub forwards frames to
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_universe")]
    pub universe: u16,
    /// LED ring refreshes per second
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub led: LedConfig,
    #[serde(default)]
    pub brightness: BrightnessConfig,
}

impl Default for AmbilightConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target: String::new(),
            universe: default_universe(),
            fps: default_fps(),
            led: LedConfig::default(),
            brightness: BrightnessConfig::default(),
        }
    }
}

fn default_universe() -> u16 {
    1
}

fn default_fps() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedConfig {
    #[serde(default = "default_led_count")]
    pub count: usize,
    /// Rotates the ring by this many LEDs
    #[serde(default)]
    pub offset: i32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: default_led_count(),
            offset: 0,
        }
    }
}

fn default_led_count() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrightnessConfig {
    #[serde(default)]
    pub min: u8,
    #[serde(default = "default_max_brightness")]
    pub max: u8,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: default_max_brightness(),
        }
    }
}

fn default_max_brightness() -> u8 {
    255
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CombatConfig {
    #[serde(default = "default_true")]
    pub skip_defeated: bool,
    /// Countdown before the first turn of every round; 0 disables it
    #[serde(default)]
    pub tactical_discussion_secs: u64,
    /// Countdown shown while the active player reacts; 0 disables it
    #[serde(default = "default_player_reaction_secs")]
    pub player_reaction_secs: u64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            skip_defeated: true,
            tactical_discussion_secs: 0,
            player_reaction_secs: default_player_reaction_secs(),
        }
    }
}

fn default_player_reaction_secs() -> u64 {
    6
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FlagsConfig {
    /// JSON file persisting per-user flags; kept in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneConfig {
    #[serde(default = "default_grid_size")]
    pub grid_size: f64,
    /// Colour of the empty scene, as `#RRGGBB`
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default)]
    pub players: Vec<ScenePlayerConfig>,
    #[serde(default)]
    pub tokens: Vec<SceneTokenConfig>,
    #[serde(default)]
    pub doors: Vec<SceneDoorConfig>,
    /// Encounter running from startup, in turn order
    #[serde(default)]
    pub combat: Option<SceneCombatConfig>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            background: default_background(),
            players: Vec::new(),
            tokens: Vec::new(),
            doors: Vec::new(),
            combat: None,
        }
    }
}

fn default_grid_size() -> f64 {
    100.0
}

fn default_background() -> String {
    "#999999".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenePlayerConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_player_color")]
    pub color: String,
    /// Token of the player's character, selected by default
    #[serde(default)]
    pub character: Option<String>,
}

fn default_player_color() -> String {
    "#ffffff".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneTokenConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owners: Vec<String>,
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_token_size")]
    pub width: f64,
    #[serde(default = "default_token_size")]
    pub height: f64,
}

fn default_token_size() -> f64 {
    100.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneDoorConfig {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SceneCombatConfig {
    #[serde(default)]
    pub turns: Vec<SceneCombatantConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SceneCombatantConfig {
    pub id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub defeated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.socket.host, "localhost");
        assert_eq!(config.socket.port, 443);
        assert_eq!(config.socket.path, "/ws/vtt");
        assert!(config.socket.secure);
        assert_eq!(config.socket.reconnect_delay_ms, 5000);
        assert_eq!(config.controller.tick_rate, 60);
        assert_eq!(config.controller.repeat_interval_ms, 250);
        assert_eq!(config.doors.min_interval_ms, 150);
        assert!(!config.ambilight.enabled);
        assert_eq!(config.ambilight.universe, 1);
        assert_eq!(config.ambilight.led.count, 1);
        assert_eq!(config.ambilight.brightness.max, 255);
        assert!(config.combat.skip_defeated);
        assert_eq!(config.combat.player_reaction_secs, 6);
        assert!(config.flags.path.is_none());
        assert_eq!(config.scene.grid_size, 100.0);
    }

    #[test]
    fn test_empty_file_matches_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config.socket.port, AppConfig::default().socket.port);
        assert_eq!(config.ambilight.fps, 1.0);
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn test_socket_url() {
        let mut socket = SocketConfig::default();
        assert_eq!(socket.configured_url(), "wss://localhost:443/ws/vtt");
        socket.secure = false;
        socket.host = "10.0.0.2".into();
        socket.port = 30000;
        socket.path = "relay".into();
        assert_eq!(socket.configured_url(), "ws://10.0.0.2:30000/relay");
    }

    #[test]
    fn test_full_config() {
        let toml_str = r##"
            [socket]
            host = "vtt.local"
            secure = false

            [ambilight]
            enabled = true
            target = "192.168.1.50"
            fps = 10
            [ambilight.led]
            count = 60
            offset = -12
            [ambilight.brightness]
            min = 5

            [combat]
            tactical_discussion_secs = 30

            [mappings]
            alice = "C1"

            [flags]
            path = "/var/lib/keyrelay/flags.json"

            [scene]
            grid_size = 50
            [[scene.players]]
            id = "alice"
            name = "Alice"
            color = "#123456"
            character = "wizard"
            [[scene.tokens]]
            id = "wizard"
            owners = ["alice"]
            x = 100
            y = 200
            [[scene.doors]]
            id = "gate"
            x = 150
            y = 300
            width = 50
            height = 10
            [[scene.combat.turns]]
            id = "wizard-turn"
            token = "wizard"
            owners = ["alice"]
            [[scene.combat.turns]]
            id = "goblin"
            defeated = true
        "##;
        let config = AppConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.socket.host, "vtt.local");
        assert_eq!(config.socket.port, 443);
        assert!(config.ambilight.enabled);
        assert_eq!(config.ambilight.fps, 10.0);
        assert_eq!(config.ambilight.led.count, 60);
        assert_eq!(config.ambilight.led.offset, -12);
        assert_eq!(config.ambilight.brightness.min, 5);
        assert_eq!(config.ambilight.brightness.max, 255);
        assert_eq!(config.combat.tactical_discussion_secs, 30);
        assert_eq!(config.mappings.get("alice").map(String::as_str), Some("C1"));
        assert_eq!(
            config.flags.path,
            Some(PathBuf::from("/var/lib/keyrelay/flags.json"))
        );
        assert_eq!(config.scene.grid_size, 50.0);
        assert_eq!(config.scene.players[0].character.as_deref(), Some("wizard"));
        assert_eq!(config.scene.tokens[0].width, 100.0);
        assert!(!config.scene.doors[0].open);
        let combat = config.scene.combat.unwrap();
        assert_eq!(combat.turns.len(), 2);
        assert_eq!(combat.turns[0].owners, vec!["alice"]);
        assert!(combat.turns[1].defeated);
        assert!(combat.turns[1].token.is_none());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_validate_and_fix_clamps_ranges() {
        let toml_str = r#"
            [controller]
            tick_rate = 0
            repeat_interval_ms = 0

            [ambilight]
            enabled = true
            universe = 0
            fps = 30
            [ambilight.led]
            count = 500
            offset = -400
            [ambilight.brightness]
            min = 200
            max = 100

            [combat]
            tactical_discussion_secs = 600
            player_reaction_secs = 90

            [scene]
            grid_size = -5
        "#;
        let mut config = AppConfig::from_toml_str(toml_str).unwrap();
        config.validate_and_fix();
        assert_eq!(config.controller.tick_rate, 60);
        assert_eq!(config.controller.repeat_interval_ms, 250);
        assert_eq!(config.ambilight.universe, 1);
        assert_eq!(config.ambilight.fps, 15.0);
        assert_eq!(config.ambilight.led.count, 170);
        assert_eq!(config.ambilight.led.offset, -170);
        assert_eq!(config.ambilight.brightness.min, 100);
        assert_eq!(config.ambilight.brightness.max, 200);
        // enabled without a target
        assert!(!config.ambilight.enabled);
        assert_eq!(config.combat.tactical_discussion_secs, 120);
        assert_eq!(config.combat.player_reaction_secs, 60);
        assert_eq!(config.scene.grid_size, 100.0);
        assert!(logs_contain("out of range"));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        assert!(AppConfig::from_toml_str("[socket]\nport = \"eighty\"").is_err());
    }
}
