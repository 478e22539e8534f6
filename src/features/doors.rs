//! `E` toggles every door within one grid unit of the keypad's token.
//!
//! Doors are toggled through a [`ThrottledQueue`] so that several keypads
//! pressing `E` next to the same door in one tick toggle it once, and
//! neighbouring doors are opened one after another rather than all at once.

use super::{ListenerError, log_scene_failure};
use crate::config::DoorsConfig;
use crate::controller::{Keypad, TickContext, TickListener};
use crate::geometry::Rectangle;
use crate::scene::Directory;
use crate::throttle::ThrottledQueue;
use std::time::Duration;
use tracing::{debug, error};

/// Who asked for the toggle, with the token they stood on.
#[derive(Debug, Clone, PartialEq)]
pub struct DoorRequest {
    pub controller_id: String,
    pub token: String,
}

pub struct DoorHandler {
    queue: ThrottledQueue<DoorRequest, String, ()>,
}

impl DoorHandler {
    pub fn new(config: &DoorsConfig) -> Self {
        Self {
            queue: ThrottledQueue::new(Duration::from_millis(config.min_interval_ms)),
        }
    }

    fn enqueue_doors(&mut self, keypad: &Keypad, directory: &Directory) {
        let Some(token) = keypad.token(directory) else {
            return;
        };
        let scene = directory.scene();
        let Some(bounds) = scene.token_bounds(&token) else {
            error!(controller_id = %keypad.controller_id(), token = %token, "Token has no bounds");
            return;
        };
        let reach = Rectangle::from_bounds(bounds).grow(scene.grid_size());
        for door in scene.doors() {
            if !reach.intersects(&Rectangle::from_bounds(door.bounds)) {
                continue;
            }
            let request = DoorRequest {
                controller_id: keypad.controller_id().to_string(),
                token: token.clone(),
            };
            if self.queue.enqueue(request, door.id.clone(), ()) {
                debug!(controller_id = %keypad.controller_id(), door = %door.id, "Queued door toggle");
            }
        }
    }

    fn process_queue(&mut self, now: u64, directory: &Directory) {
        let Some(action) = self.queue.drain(now) else {
            return;
        };
        debug!(
            controller_id = %action.requester.controller_id,
            token = %action.requester.token,
            door = %action.target,
            "Toggling door"
        );
        if let Err(e) = directory.scene().toggle_door(&action.target) {
            log_scene_failure(self.name(), &action.requester.controller_id, &e);
        }
    }
}

impl TickListener for DoorHandler {
    fn name(&self) -> &str {
        "door-handler"
    }

    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError> {
        let now = ctx.now();
        let directory = ctx.directory();
        for keypad in ctx.keypads() {
            if keypad.is_just_down("E", now) {
                self.enqueue_doors(keypad, directory);
            }
        }
        self.process_queue(now, directory);
        Ok(())
    }
}
