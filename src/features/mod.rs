//! Gameplay features driven by the keypads.
//!
//! Tick listeners read key state through the [`TickContext`] and act on the
//! scene. LED handlers feed the table ring. A scene call that fails for one
//! keypad is logged and skipped; returning an error from `on_tick` removes the
//! listener for good, so that is reserved for broken invariants.
//!
//! [`TickContext`]: crate::controller::TickContext

pub mod ambilight;
pub mod combat_end_turn;
pub mod combat_indicator;
pub mod doors;
pub mod movement;
pub mod timer;
pub mod token_select;
pub mod torch;

use crate::config::AppConfig;
use crate::controller::TickListener;
use crate::error::AppError;
use crate::scene::Directory;
use thiserror::Error;
use tracing::warn;

pub use ambilight::Ambilight;
pub use combat_end_turn::CombatEndTurn;
pub use combat_indicator::CombatIndicator;
pub use doors::DoorHandler;
pub use movement::TokenMovement;
pub use timer::{Countdown, TimerBoard, TimerLeds};
pub use token_select::TokenSelect;
pub use torch::TokenTorch;

/// Fault raised by a tick listener or LED handler.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error("{0}")]
    Failed(String),
}

/// Log a scene call that failed on behalf of one keypad.
pub(crate) fn log_scene_failure(listener: &str, controller_id: &str, error: &AppError) {
    warn!(
        listener,
        controller_id,
        code = error.code(),
        error = %error,
        "Scene call failed for keypad"
    );
}

/// Every keypad feature in the order it runs on each tick.
pub fn tick_listeners(
    config: &AppConfig,
    directory: &Directory,
    timers: &TimerBoard,
) -> Vec<Box<dyn TickListener>> {
    vec![
        Box::new(TokenMovement::new()),
        Box::new(TokenSelect::new()),
        Box::new(TokenTorch::new()),
        Box::new(DoorHandler::new(&config.doors)),
        Box::new(CombatEndTurn::new()),
        Box::new(CombatIndicator::new(
            &config.combat,
            directory.scene().subscribe_combat(),
            timers.clone(),
        )),
    ]
}
