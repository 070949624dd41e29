// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use crate::core::metrics;
use crate::core::notice::{NoticeFormat, ServerNotice};
use crate::core::pairing::ConnId;
use crate::core::relay::{Outbound, Payload};
use crate::core::state::ServerState;
use crate::core::RelayError;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};
use tracing::{debug, info, warn};

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(data) => Message::Binary(data),
        }
    }
}

/// Manages the full lifecycle of a client connection over a plain or TLS stream.
pub struct ConnectionHandler<S> {
    ws: WebSocketStream<S>,
    addr: SocketAddr,
    id: ConnId,
    state: Arc<ServerState>,
    global_shutdown_rx: broadcast::Receiver<()>,
    notice_format: NoticeFormat,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Performs the WebSocket handshake on an accepted stream.
    pub async fn accept(
        stream: S,
        addr: SocketAddr,
        id: ConnId,
        state: Arc<ServerState>,
        global_shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self, RelayError> {
        let handshake_timeout = state.config.limits.handshake_timeout;
        let max_message_size = state.config.limits.max_message_size;
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_message_size);
        ws_config.max_frame_size = Some(max_message_size);

        let ws = tokio::time::timeout(
            handshake_timeout,
            accept_async_with_config(stream, Some(ws_config)),
        )
        .await
        .map_err(|_| RelayError::Handshake(format!("timed out after {handshake_timeout:?}")))?
        .map_err(|e| RelayError::Handshake(e.to_string()))?;

        let notice_format = state.config.notice_format;
        Ok(Self {
            ws,
            addr,
            id,
            state,
            global_shutdown_rx,
            notice_format,
        })
    }

    /// Registers the connection with the relay, runs the event loop, and
    /// deregisters before the socket is released.
    pub async fn run(&mut self, mut guard: ConnectionGuard) -> Result<(), RelayError> {
        let (outbound_tx, mut outbound_rx) =
            mpsc::channel(self.state.config.limits.outbound_queue);

        if self
            .state
            .relay
            .connect(self.id, self.addr, outbound_tx)
            .await
            .is_err()
        {
            debug!("Relay coordinator unavailable; closing {}.", self.addr);
            let _ = self.ws.close(None).await;
            return Ok(());
        }
        guard.set_registered();
        debug!("{} ({}) registered with the relay.", self.id, self.addr);

        let result = self.event_loop(&mut outbound_rx).await;

        // Delivered before the socket is dropped so the partner learns about it first.
        let _ = self.state.relay.disconnect(self.id).await;
        guard.set_disconnected();
        result
    }

    /// The main event loop for the connection, handling outbound items, client frames and signals.
    async fn event_loop(
        &mut self,
        outbound_rx: &mut mpsc::Receiver<Outbound>,
    ) -> Result<(), RelayError> {
        loop {
            tokio::select! {
                // Prioritize shutdown signals, then anything queued for this client.
                biased;

                _ = self.global_shutdown_rx.recv() => {
                    info!("Connection handler for {} received GLOBAL shutdown signal.", self.addr);
                    let _ = self.send_notice(ServerNotice::ShuttingDown).await;
                    let _ = self.ws.close(None).await;
                    return Ok(());
                }

                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(Outbound::Relay(payload)) => {
                            self.ws.send(payload.into()).await?;
                        }
                        Some(Outbound::Notice(notice)) => {
                            self.send_notice(notice).await?;
                        }
                        Some(Outbound::Close(notice)) => {
                            if let Some(notice) = notice {
                                let _ = self.send_notice(notice).await;
                            }
                            debug!("Relay closed connection {} ({}).", self.id, self.addr);
                            let _ = self.ws.close(None).await;
                            return Ok(());
                        }
                        None => {
                            debug!("Relay dropped the outbound queue of {}; closing.", self.id);
                            let _ = self.ws.close(None).await;
                            return Ok(());
                        }
                    }
                }

                frame = self.ws.next() => {
                    let payload = match frame {
                        Some(Ok(Message::Text(text))) => Payload::Text(text),
                        Some(Ok(Message::Binary(data))) => Payload::Binary(data),
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Connection from {} sent close frame: {:?}", self.addr, frame);
                            let _ = self.ws.close(None).await;
                            return Ok(());
                        }
                        // Pings are answered by the WebSocket layer itself.
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            if is_normal_disconnect(&e) {
                                debug!("Connection from {} closed by peer: {}", self.addr, e);
                            } else {
                                warn!("Connection error for {}: {}", self.addr, e);
                            }
                            return Ok(());
                        }
                        None => {
                            debug!("Connection from {} closed by peer.", self.addr);
                            return Ok(());
                        }
                    };
                    if self.state.relay.relay(self.id, payload).await.is_err() {
                        debug!("Relay coordinator gone; closing {}.", self.addr);
                        let _ = self.ws.close(None).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn send_notice(&mut self, notice: ServerNotice) -> Result<(), RelayError> {
        self.ws
            .send(Message::Text(notice.encode(self.notice_format)))
            .await
            .map_err(RelayError::from)?;
        metrics::NOTICES_SENT_TOTAL
            .with_label_values(&[notice.status()])
            .inc();
        Ok(())
    }
}

/// Checks if a WebSocket error corresponds to a normal client disconnection.
fn is_normal_disconnect(e: &WsError) -> bool {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(err) => matches!(
            err.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionAborted
        ),
        _ => false,
    }
}
