//! Reconnecting WebSocket client for the controller hub.
//!
//! The socket task owns the connection. Inbound text frames are parsed once and
//! fanned out by their `type` to every subscriber registered through
//! [`Socket::subscribe`]. Frames of all types a subscriber asked for share one
//! channel and keep their arrival order. Outbound frames are queued through a cloneable
//! [`SocketHandle`], which refuses frames while no connection is open.
//!
//! On every successful open the task announces itself as a receiver together
//! with the player roster; on shutdown it says goodbye with a `disconnected`
//! registration. A dropped connection is retried after the configured delay.

use crate::PACKET_PROCESSING_TARGET;
use crate::error::AppError;
use crate::protocol::{Frame, PlayerSummary, RegistrationMessage, RegistrationStatus};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

type HubStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cheap, cloneable sending side of the socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<String>,
}

impl SocketHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a raw text frame. Fails with `NotConnected` while the socket is down.
    pub fn send(&self, raw: String) -> Result<(), AppError> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        self.outbound
            .send(raw)
            .map_err(|_| AppError::NotConnected)
    }

    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(message)?;
        self.send(raw)
    }

    /// A handle not backed by a socket task, for exercising senders in isolation.
    #[cfg(test)]
    pub(crate) fn loopback(connected: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            connected: Arc::new(AtomicBool::new(connected)),
            outbound,
        };
        (handle, rx)
    }

    #[cfg(test)]
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

/// Type-keyed fan-out of inbound frames.
#[derive(Debug, Default)]
struct Dispatcher {
    listeners: HashMap<String, Vec<mpsc::UnboundedSender<Frame>>>,
}

impl Dispatcher {
    fn subscribe(&mut self, kinds: &[&str]) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            self.listeners
                .entry(kind.to_string())
                .or_default()
                .push(tx.clone());
        }
        rx
    }

    /// Returns how many subscribers received the frame.
    fn dispatch(&mut self, raw: &str) -> usize {
        trace!(target: PACKET_PROCESSING_TARGET, frame = raw, "Received frame");
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                error!(code = e.code(), error = %e, "Dropping malformed frame");
                return 0;
            }
        };
        let Some(senders) = self.listeners.get_mut(&frame.kind) else {
            warn!(kind = %frame.kind, "No listener for frame type");
            return 0;
        };
        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            if tx.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

pub struct Socket {
    url: String,
    reconnect_delay: Duration,
    roster: Vec<PlayerSummary>,
    dispatcher: Dispatcher,
    connected: Arc<AtomicBool>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl Socket {
    pub fn new(
        url: impl Into<String>,
        reconnect_delay: Duration,
        roster: Vec<PlayerSummary>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            reconnect_delay,
            roster,
            dispatcher: Dispatcher::default(),
            connected: Arc::new(AtomicBool::new(false)),
            outbound_tx,
            outbound_rx,
        }
    }

    pub fn handle(&self) -> SocketHandle {
        SocketHandle {
            connected: self.connected.clone(),
            outbound: self.outbound_tx.clone(),
        }
    }

    /// Receive every inbound frame whose `type` is one of `kinds`, in arrival order.
    pub fn subscribe(&mut self, kinds: &[&str]) -> mpsc::UnboundedReceiver<Frame> {
        debug!(?kinds, "Registered frame listener");
        self.dispatcher.subscribe(kinds)
    }

    /// Connection loop. Returns once `shutdown` flips to true or its sender is dropped.
    #[tracing::instrument(skip_all, fields(url = %self.url))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Socket {
            url,
            reconnect_delay,
            roster,
            mut dispatcher,
            connected,
            outbound_tx: _outbound_tx,
            mut outbound_rx,
        } = self;

        loop {
            if *shutdown.borrow() {
                break;
            }
            info!("Connecting to controller hub");
            let attempt = tokio::select! {
                res = connect_async(url.as_str()) => res,
                _ = shutdown.changed() => break,
            };
            match attempt {
                Ok((stream, _response)) => {
                    let stopping = serve_connection(
                        stream,
                        &roster,
                        &mut dispatcher,
                        &connected,
                        &mut outbound_rx,
                        &mut shutdown,
                    )
                    .await;
                    connected.store(false, Ordering::SeqCst);
                    if stopping {
                        break;
                    }
                    warn!("Connection to controller hub closed");
                }
                Err(e) => {
                    let e = AppError::from(e);
                    warn!(code = e.code(), error = %e, "Failed to connect to controller hub");
                }
            }

            info!(
                delay_ms = reconnect_delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        connected.store(false, Ordering::SeqCst);
        info!("Socket task stopped");
    }
}

/// Drive one open connection. Returns true when it ended because of shutdown.
async fn serve_connection(
    stream: HubStream,
    roster: &[PlayerSummary],
    dispatcher: &mut Dispatcher,
    connected: &AtomicBool,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = stream.split();

    let mut stale = 0usize;
    while outbound_rx.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        debug!(stale, "Discarded frames queued for a previous connection");
    }

    let hello = RegistrationMessage::receiver(RegistrationStatus::Connected, roster.to_vec());
    let hello = match serde_json::to_string(&hello) {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "Failed to encode receiver registration");
            return false;
        }
    };
    if let Err(e) = write.send(Message::Text(hello.into())).await {
        warn!(error = %e, "Failed to register with controller hub");
        return false;
    }
    connected.store(true, Ordering::SeqCst);
    info!(players = roster.len(), "Registered as receiver with controller hub");

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    dispatcher.dispatch(text.as_str());
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Controller hub closed the connection");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = AppError::from(e);
                    warn!(code = e.code(), error = %e, "Read from controller hub failed");
                    return false;
                }
                None => return false,
            },
            Some(raw) = outbound_rx.recv() => {
                trace!(target: PACKET_PROCESSING_TARGET, frame = %raw, "Sending frame");
                if let Err(e) = write.send(Message::Text(raw.into())).await {
                    warn!(error = %e, "Write to controller hub failed");
                    return false;
                }
            }
            _ = shutdown.changed() => {
                connected.store(false, Ordering::SeqCst);
                let bye = RegistrationMessage::receiver(
                    RegistrationStatus::Disconnected,
                    roster.to_vec(),
                );
                if let Ok(raw) = serde_json::to_string(&bye) {
                    if let Err(e) = write.send(Message::Text(raw.into())).await {
                        debug!(error = %e, "Failed to send goodbye registration");
                    }
                }
                let _ = write.close().await;
                return true;
            }
        }
    }
}
