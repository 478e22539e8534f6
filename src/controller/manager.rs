//! Keypad registry and tick fan-out.
//!
//! The controller task owns the registry and every tick listener. Inbound
//! registration and key-event frames mutate the registry between ticks; on
//! every tick each listener runs once, in registration order, against the same
//! `now`. A listener that returns an error or panics is dropped after that
//! tick. Once all listeners ran, keypads with changed LEDs get exactly one
//! `configuration` frame each.

use super::{Clock, Keypad};
use crate::config::ControllerConfig;
use crate::error::{AppError, err};
use crate::features::ListenerError;
use crate::protocol::{
    ConfigurationMessage, Frame, KeyEventMessage, RegistrationMessage, RegistrationStatus,
    TYPE_KEY_EVENT, TYPE_REGISTRATION,
};
use crate::scene::Directory;
use crate::transport::SocketHandle;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// A feature driven by the controller tick.
pub trait TickListener: Send {
    fn name(&self) -> &str;
    fn on_tick(&mut self, ctx: &mut TickContext<'_>) -> Result<(), ListenerError>;
}

/// Identifies a registered listener. Stale handles never match a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    index: usize,
    generation: u32,
}

/// What a listener sees during one tick.
pub struct TickContext<'a> {
    now: u64,
    keypads: &'a mut [Keypad],
    directory: &'a Directory,
    current: ListenerHandle,
    unregister_requests: &'a mut Vec<ListenerHandle>,
}

impl<'a> TickContext<'a> {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn directory(&self) -> &'a Directory {
        self.directory
    }

    /// Registered keypads in registration order.
    pub fn keypads(&mut self) -> &mut [Keypad] {
        self.keypads
    }

    pub fn keypad_mut(&mut self, controller_id: &str) -> Option<&mut Keypad> {
        self.keypads
            .iter_mut()
            .find(|k| k.controller_id() == controller_id)
    }

    pub fn handle(&self) -> ListenerHandle {
        self.current
    }

    /// Remove a listener once the current invocation returns.
    pub fn unregister(&mut self, handle: ListenerHandle) {
        self.unregister_requests.push(handle);
    }

    pub fn unregister_self(&mut self) {
        let current = self.current;
        self.unregister(current);
    }
}

struct Slot {
    generation: u32,
    live: bool,
    listener: Option<Box<dyn TickListener>>,
}

pub enum ControllerCommand {
    Register {
        listener: Box<dyn TickListener>,
        reply: oneshot::Sender<ListenerHandle>,
    },
    Unregister {
        handle: ListenerHandle,
        reply: oneshot::Sender<bool>,
    },
}

/// Adds and removes listeners on a running controller task.
#[derive(Clone)]
pub struct ControllerCommands {
    tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl ControllerCommands {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControllerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub async fn register(
        &self,
        listener: Box<dyn TickListener>,
    ) -> Result<ListenerHandle, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerCommand::Register { listener, reply })
            .map_err(|_| err::internal("controller task stopped"))?;
        rx.await
            .map_err(|_| err::internal("controller task stopped"))
    }

    pub async fn unregister(&self, handle: ListenerHandle) -> Result<bool, AppError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerCommand::Unregister { handle, reply })
            .map_err(|_| err::internal("controller task stopped"))?;
        rx.await
            .map_err(|_| err::internal("controller task stopped"))
    }
}

pub struct ControllerManager {
    keypads: Vec<Keypad>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    order: Vec<ListenerHandle>,
    directory: Directory,
    socket: SocketHandle,
    clock: Clock,
    tick_rate: u32,
    repeat_interval_ms: u64,
}

impl ControllerManager {
    pub fn new(
        config: &ControllerConfig,
        directory: Directory,
        socket: SocketHandle,
        clock: Clock,
    ) -> Self {
        Self {
            keypads: Vec::new(),
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            directory,
            socket,
            clock,
            tick_rate: config.tick_rate.max(1),
            repeat_interval_ms: config.repeat_interval_ms,
        }
    }

    pub fn keypads(&self) -> &[Keypad] {
        &self.keypads
    }

    pub fn keypad(&self, controller_id: &str) -> Option<&Keypad> {
        self.keypads
            .iter()
            .find(|k| k.controller_id() == controller_id)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn listener_count(&self) -> usize {
        self.order.len()
    }

    pub fn register_tick_listener(&mut self, listener: Box<dyn TickListener>) -> ListenerHandle {
        let name = listener.name().to_string();
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.live = true;
                slot.listener = Some(listener);
                ListenerHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    live: true,
                    listener: Some(listener),
                });
                ListenerHandle {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.order.push(handle);
        debug!(listener = %name, "Registered tick listener");
        handle
    }

    /// Returns false for handles that are unknown or already removed.
    pub fn unregister_tick_listener(&mut self, handle: ListenerHandle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index) else {
            return false;
        };
        if !slot.live || slot.generation != handle.generation {
            return false;
        }
        if let Some(listener) = slot.listener.take() {
            debug!(listener = listener.name(), "Unregistered tick listener");
        }
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.order.retain(|h| *h != handle);
        true
    }

    fn take_listener(&mut self, handle: ListenerHandle) -> Option<Box<dyn TickListener>> {
        let slot = self.slots.get_mut(handle.index)?;
        if !slot.live || slot.generation != handle.generation {
            return None;
        }
        slot.listener.take()
    }

    fn restore_listener(&mut self, handle: ListenerHandle, listener: Box<dyn TickListener>) {
        if let Some(slot) = self.slots.get_mut(handle.index) {
            if slot.live && slot.generation == handle.generation {
                slot.listener = Some(listener);
            }
        }
    }

    pub fn handle_registration(&mut self, msg: RegistrationMessage) {
        if msg.receiver {
            debug!("Got registration from another receiver, ignoring");
            return;
        }
        let Some(controller_id) = msg.controller_id else {
            warn!(code = "protocol_error", "Registration without controller id");
            return;
        };
        match msg.status {
            RegistrationStatus::Connected => {
                let keypad = Keypad::new(
                    controller_id.clone(),
                    self.repeat_interval_ms,
                    &self.directory,
                );
                let player = player_label(&keypad, &self.directory);
                match self
                    .keypads
                    .iter_mut()
                    .find(|k| k.controller_id() == controller_id)
                {
                    Some(existing) => *existing = keypad,
                    None => self.keypads.push(keypad),
                }
                info!(controller_id = %controller_id, player = %player, "Keypad connected");
            }
            RegistrationStatus::Disconnected => {
                match self
                    .keypads
                    .iter()
                    .position(|k| k.controller_id() == controller_id)
                {
                    Some(idx) => {
                        let keypad = self.keypads.remove(idx);
                        let player = player_label(&keypad, &self.directory);
                        warn!(controller_id = %controller_id, player = %player, "Keypad disconnected");
                    }
                    None => {
                        warn!(controller_id = %controller_id, "Disconnect for unknown keypad, ignoring");
                    }
                }
            }
        }
    }

    pub fn handle_key_event(&mut self, msg: KeyEventMessage) {
        match self
            .keypads
            .iter_mut()
            .find(|k| k.controller_id() == msg.controller_id)
        {
            Some(keypad) => keypad.register_key_event(&msg.key, msg.is_down()),
            None => warn!(
                controller_id = %msg.controller_id,
                "Keypad sent key-event before registration, ignoring"
            ),
        }
    }

    fn handle_frame<T, F>(&mut self, frame: &Frame, apply: F)
    where
        T: for<'de> serde::Deserialize<'de>,
        F: FnOnce(&mut Self, T),
    {
        match frame.decode::<T>() {
            Ok(msg) => apply(self, msg),
            Err(e) => error!(kind = %frame.kind, code = e.code(), error = %e, "Dropping invalid frame"),
        }
    }

    /// Run every listener once, then flush changed keypad LEDs.
    pub fn tick(&mut self, now: u64) {
        let snapshot = self.order.clone();
        let mut requests = Vec::new();
        for handle in snapshot {
            // Removed earlier in this tick.
            let Some(mut listener) = self.take_listener(handle) else {
                continue;
            };
            let mut ctx = TickContext {
                now,
                keypads: &mut self.keypads,
                directory: &self.directory,
                current: handle,
                unregister_requests: &mut requests,
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_tick(&mut ctx)));
            let name = listener.name().to_string();
            self.restore_listener(handle, listener);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(listener = %name, error = %e, "Tick listener failed, unregistering");
                    self.unregister_tick_listener(handle);
                }
                Err(panic) => {
                    error!(
                        listener = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Tick listener panicked, unregistering"
                    );
                    self.unregister_tick_listener(handle);
                }
            }
            for removed in requests.drain(..) {
                self.unregister_tick_listener(removed);
            }
        }
        self.send_changed_leds();
    }

    fn send_changed_leds(&mut self) {
        for keypad in &mut self.keypads {
            let Some(leds) = keypad.leds_if_changed() else {
                continue;
            };
            debug!(controller_id = %keypad.controller_id(), "Sending updated LEDs");
            let msg = ConfigurationMessage::new(keypad.controller_id(), leds);
            if let Err(e) = self.socket.send_message(&msg) {
                warn!(
                    controller_id = %keypad.controller_id(),
                    code = e.code(),
                    error = %e,
                    "Failed to send keypad LEDs"
                );
            }
        }
    }

    fn apply_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::Register { listener, reply } => {
                let handle = self.register_tick_listener(listener);
                let _ = reply.send(handle);
            }
            ControllerCommand::Unregister { handle, reply } => {
                let removed = self.unregister_tick_listener(handle);
                let _ = reply.send(removed);
            }
        }
    }

    /// Drop every listener and keypad.
    pub fn teardown(&mut self) {
        let listeners = self.order.len();
        let keypads = self.keypads.len();
        self.order.clear();
        self.slots.clear();
        self.free.clear();
        self.keypads.clear();
        info!(listeners, keypads, "Controller manager torn down");
    }

    fn handle_inbound(&mut self, frame: Frame) {
        match frame.kind.as_str() {
            TYPE_REGISTRATION => self.handle_frame(&frame, Self::handle_registration),
            TYPE_KEY_EVENT => self.handle_frame(&frame, Self::handle_key_event),
            other => debug!(kind = other, "Ignoring frame not meant for keypads"),
        }
    }

    /// Controller task: applies inbound frames and commands between ticks.
    ///
    /// `inbound` carries `registration` and `key-event` frames on one channel so
    /// a key-event is never applied before the registration that preceded it.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Frame>,
        mut commands: mpsc::UnboundedReceiver<ControllerCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.tick_rate));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_rate = self.tick_rate, "Controller tick started");

        loop {
            tokio::select! {
                Some(frame) = inbound.recv() => {
                    self.handle_inbound(frame);
                }
                Some(command) = commands.recv() => {
                    self.apply_command(command);
                }
                _ = interval.tick() => {
                    let now = self.clock.now_ms();
                    self.tick(now);
                }
                _ = shutdown.changed() => break,
            }
        }

        self.teardown();
    }
}

fn player_label(keypad: &Keypad, directory: &Directory) -> String {
    keypad
        .player(directory)
        .map(|p| p.name)
        .unwrap_or_else(|| "unassigned".to_string())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
