// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket client session.
//!
//! Each connection registers one subscriber with the broadcaster and then:
//! - forwards every queued frame to the socket, bounded by a send timeout
//! - reads inbound messages only to notice close and errors
//!
//! Whichever side ends first ends the session, and the subscriber is
//! deregistered before the task returns.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use sensorcast::{Broadcaster, Frame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// Socket read or write failed.
    SocketError,
    /// A send did not finish within the timeout.
    SendTimeout,
    /// The broadcaster dropped this subscriber (queue overflow).
    Dropped,
    /// Server is shutting down.
    Shutdown,
    /// Registration failed before anything was sent.
    Rejected,
}

/// A WebSocket client session
pub struct ClientSession {
    broadcaster: Arc<Broadcaster>,
    send_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    /// Session ID for logging
    session_id: String,
}

impl ClientSession {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        send_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        debug!("[{}] New session created", session_id);

        Self {
            broadcaster,
            send_timeout,
            shutdown,
            session_id,
        }
    }

    /// Run the session until either side goes away.
    pub async fn run(self, socket: WebSocket) -> SessionEnd {
        let (ws_tx, ws_rx) = socket.split();
        self.serve(ws_tx, ws_rx).await
    }

    async fn serve<Tx, Rx, E>(mut self, ws_tx: Tx, mut ws_rx: Rx) -> SessionEnd
    where
        Tx: Sink<Message> + Unpin + Send + 'static,
        Tx::Error: fmt::Display + Send,
        Rx: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        if *self.shutdown.borrow() {
            return SessionEnd::Shutdown;
        }
        let subscription = match self.broadcaster.subscribe(self.session_id.clone()) {
            Ok(sub) => sub,
            Err(e) => {
                warn!("[{}] Registration failed: {}", self.session_id, e);
                return SessionEnd::Rejected;
            }
        };
        let token = subscription.token;
        info!("[{}] Subscribed as {}", self.session_id, token);

        let mut forward = tokio::spawn(forward_frames(
            subscription.receiver,
            ws_tx,
            self.send_timeout,
            self.session_id.clone(),
        ));

        let end = loop {
            tokio::select! {
                outbound = &mut forward => {
                    break outbound.unwrap_or(SessionEnd::SocketError);
                }
                inbound = ws_rx.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("[{}] Client closed connection", self.session_id);
                        break SessionEnd::ClientClosed;
                    }
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                        debug!("[{}] Ignoring inbound message", self.session_id);
                    }
                    Some(Ok(_)) => {
                        // Ping/pong, answered by axum.
                    }
                    Some(Err(e)) => {
                        debug!("[{}] WebSocket error: {}", self.session_id, e);
                        break SessionEnd::SocketError;
                    }
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break SessionEnd::Shutdown;
                    }
                }
            }
        };

        self.broadcaster.deregister(token);
        if !forward.is_finished() {
            forward.abort();
        }
        info!("[{}] Session ended: {:?}", self.session_id, end);
        end
    }
}

/// Drain the subscriber queue into the socket.
async fn forward_frames<Tx>(
    mut rx: mpsc::Receiver<Frame>,
    mut ws_tx: Tx,
    send_timeout: Duration,
    session_id: String,
) -> SessionEnd
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        match tokio::time::timeout(send_timeout, ws_tx.send(Message::Text(frame.to_string()))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("[{}] WebSocket send failed: {}", session_id, e);
                return SessionEnd::SocketError;
            }
            Err(_) => {
                warn!(
                    "[{}] Send exceeded {:?}, closing slow client",
                    session_id, send_timeout
                );
                return SessionEnd::SendTimeout;
            }
        }
    }

    // Queue closed: the broadcaster removed us.
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: axum::extract::ws::close_code::AGAIN,
            reason: "subscriber too slow".into(),
        })))
        .await;
    SessionEnd::Dropped
}
