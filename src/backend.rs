//! Backend module for keyrelay
//!
//! This module takes a configuration, builds the scene collaborators and sets
//! up the socket, controller and LED ring services.

use crate::config::{AppConfig, SceneConfig};
use crate::controller::{Clock, ControllerCommands, ControllerManager};
use crate::features::{self, Ambilight, TimerBoard, TimerLeds};
use crate::geometry::Bounds;
use crate::led::TableLedRing;
use crate::protocol::{Rgb, TYPE_KEY_EVENT, TYPE_REGISTRATION};
use crate::scene::{
    Combatant, Directory, Door, FlagStore, InMemoryScene, JsonFileFlags, MemoryFlags, Player,
};
use crate::transport::Socket;
use eyre::{Result, WrapErr};
use futures::future::{join_all, select_all};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long services get to wind down before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Manages the lifecycle of background services (tasks)
struct ServiceManager {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl ServiceManager {
    /// Creates a new, empty ServiceManager.
    fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    /// Spawns a new task and adds its handle to the manager.
    fn spawn<F>(&mut self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name.to_string(), tokio::spawn(future)));
    }

    /// Aborts all managed tasks.
    fn abort_all(&self) {
        tracing::info!("Aborting all service tasks...");
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }

    /// Waits up to `grace` for every task to finish on its own, then aborts the rest.
    async fn join_all(&mut self, grace: Duration) {
        let handles = self.handles.iter_mut().map(|(_, handle)| handle);
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            tracing::warn!("Services did not stop within {:?}", grace);
            self.abort_all();
        }
        self.handles.clear();
    }

    /// Waits for any of the managed services to complete.
    /// This is useful for detecting unexpected shutdowns.
    async fn wait_for_any_completion(&mut self) {
        if self.handles.is_empty() {
            // If there are no tasks, wait indefinitely.
            std::future::pending::<()>().await;
            return;
        }
        // `select_all` waits for the first future to complete.
        let (result, index, _) =
            select_all(self.handles.iter_mut().map(|(_, handle)| handle)).await;
        // A finished handle must not be polled again by `join_all`.
        let (name, _) = self.handles.remove(index);
        tracing::warn!("Service task {} completed unexpectedly.", name);
        if let Err(e) = result {
            if e.is_panic() {
                tracing::error!("The {} task panicked!", name);
            }
        }
    }
}

/// Build the self-contained scene from the `[scene]` table.
pub fn build_scene(config: &SceneConfig) -> Result<InMemoryScene> {
    let background = Rgb::from_hex(&config.background)
        .wrap_err_with(|| format!("Invalid scene background '{}'", config.background))?;
    let scene = InMemoryScene::new(config.grid_size, background);
    for player in &config.players {
        let color = Rgb::from_hex(&player.color)
            .wrap_err_with(|| format!("Invalid colour for player {}", player.id))?;
        scene.add_player(
            Player {
                id: player.id.clone(),
                name: player.name.clone(),
                color,
            },
            player.character.clone(),
        )?;
    }
    for token in &config.tokens {
        let name = if token.name.is_empty() {
            token.id.clone()
        } else {
            token.name.clone()
        };
        scene.add_token(
            token.id.clone(),
            name,
            token.owners.clone(),
            Bounds {
                x: token.x,
                y: token.y,
                width: token.width,
                height: token.height,
            },
        )?;
    }
    for door in &config.doors {
        scene.add_door(Door {
            id: door.id.clone(),
            bounds: Bounds {
                x: door.x,
                y: door.y,
                width: door.width,
                height: door.height,
            },
            open: door.open,
        })?;
    }
    tracing::debug!(
        players = config.players.len(),
        tokens = config.tokens.len(),
        doors = config.doors.len(),
        "Scene built"
    );
    Ok(scene)
}

/// Start the encounter configured under `[scene.combat]`, if any.
fn start_configured_combat(scene: &InMemoryScene, config: &SceneConfig) -> Result<()> {
    let Some(combat) = config.combat.as_ref().filter(|c| !c.turns.is_empty()) else {
        return Ok(());
    };
    let turns = combat
        .turns
        .iter()
        .map(|c| Combatant {
            id: c.id.clone(),
            token: c.token.clone(),
            owners: c.owners.clone(),
            defeated: c.defeated,
        })
        .collect();
    scene
        .start_combat(turns)
        .wrap_err("Failed to start configured combat")?;
    Ok(())
}

fn open_flags(config: &AppConfig) -> Result<Arc<dyn FlagStore>> {
    match &config.flags.path {
        Some(path) => {
            let flags = JsonFileFlags::open(path)
                .wrap_err_with(|| format!("Failed to open flag file {}", path.display()))?;
            tracing::info!("Persisting flags to {}", path.display());
            Ok(Arc::new(flags))
        }
        None => Ok(Arc::new(MemoryFlags::new())),
    }
}

pub struct Backend {
    config: AppConfig,
    service_manager: ServiceManager,
    shutdown_tx: watch::Sender<bool>,
    timers: TimerBoard,
}

impl Backend {
    /// Create a new backend from configuration
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            service_manager: ServiceManager::new(),
            shutdown_tx,
            timers: TimerBoard::new(),
        }
    }

    /// Spawn a service task with automatic management
    fn spawn_service<F>(&mut self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!("Spawning service: {}", name);
        self.service_manager.spawn(name, future);
    }

    /// Start all configured backend services
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("Starting backend services...");

        let scene = Arc::new(build_scene(&self.config.scene)?);
        let flags = open_flags(&self.config)?;
        let directory = Directory::new(scene.clone(), flags, self.config.mappings.clone());
        if let Err(e) = directory.select_default_tokens() {
            tracing::warn!(code = e.code(), error = %e, "Failed to preselect default tokens");
        }
        let clock = Clock::new();

        let mut socket = Socket::new(
            self.config.socket.url(),
            Duration::from_millis(self.config.socket.reconnect_delay_ms),
            directory.roster(),
        );
        let inbound = socket.subscribe(&[TYPE_REGISTRATION, TYPE_KEY_EVENT]);
        let socket_handle = socket.handle();

        let manager = ControllerManager::new(
            &self.config.controller,
            directory.clone(),
            socket_handle.clone(),
            clock,
        );
        let (commands, command_rx) = ControllerCommands::channel();

        let shutdown = self.shutdown_tx.subscribe();
        self.spawn_service("socket", socket.run(shutdown.clone()));
        self.spawn_service(
            "controller",
            manager.run(inbound, command_rx, shutdown.clone()),
        );

        // Features join the running controller, in tick order.
        for listener in features::tick_listeners(&self.config, &directory, &self.timers) {
            let name = listener.name().to_string();
            commands
                .register(listener)
                .await
                .wrap_err_with(|| format!("Failed to register feature {name}"))?;
        }
        start_configured_combat(&scene, &self.config.scene)?;

        if self.config.ambilight.enabled {
            let mut ring = TableLedRing::new(self.config.ambilight.clone(), socket_handle);
            ring.register_handler(Arc::new(TimerLeds::new(
                self.timers.clone(),
                clock,
                &self.config.ambilight,
            )));
            ring.register_handler(Arc::new(Ambilight::new(scene, &self.config.ambilight)));
            self.spawn_service("led-ring", ring.run(shutdown));
        } else {
            tracing::info!("Ambilight disabled, LED ring not started");
        }

        tracing::info!("All backend services started successfully");
        Ok(())
    }

    /// Wait for all services to complete or handle shutdown
    pub async fn wait_for_shutdown(&mut self) -> Result<()> {
        tracing::info!("Waiting for shutdown signal...");

        tokio::select! {
            // Wait for Ctrl+C
            signal_result = tokio::signal::ctrl_c() => {
                match signal_result {
                    Ok(_) => tracing::info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
                }
            }
            // Wait for any service to complete (which might indicate an error)
            _ = self.service_manager.wait_for_any_completion() => {
                tracing::warn!("One or more services completed unexpectedly, shutting down...");
            }
        }

        self.shutdown().await?;
        Ok(())
    }

    /// Gracefully shutdown all services
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down backend services...");
        // No receivers left only means every service already stopped.
        let _ = self.shutdown_tx.send(true);
        self.timers.abort_all();
        self.service_manager.join_all(SHUTDOWN_GRACE).await;
        tracing::info!("Backend shutdown complete");
        Ok(())
    }
}

/// Convenience function to create and start a backend from configuration
pub async fn setup_and_run_backend(config: AppConfig) -> Result<()> {
    let mut backend = Backend::new(config);
    backend.start().await?;
    backend.wait_for_shutdown().await?;
    Ok(())
}
