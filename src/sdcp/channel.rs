//! Control channel to the printer's mainboard.
//!
//! The [`ControlChannel`] / [`ControlSession`] traits are the seam the
//! coordinator drives; [`SdcpChannel`] is the production implementation
//! speaking SDCP JSON over the mainboard's WebSocket endpoint. Tests
//! substitute scripted sessions behind the same traits.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::error::ChannelError;
use crate::sdcp::protocol::{self, ExportCommand, ExportTicket, Notification};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens control sessions against a printer.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Open a session scoped to one export.
    async fn open(&self, ticket: &ExportTicket) -> Result<Box<dyn ControlSession>, ChannelError>;
}

/// One live conversation about one export.
#[async_trait]
pub trait ControlSession: Send {
    /// Send the export trigger for the session's ticket.
    async fn send_trigger(&mut self) -> Result<(), ChannelError>;

    /// Wait for the next inbound frame, already classified.
    async fn recv(&mut self) -> Result<Notification, ChannelError>;

    /// Nudge the connection so the firmware keeps it open.
    async fn keepalive(&mut self) -> Result<(), ChannelError>;

    /// Tear the connection down.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Production channel: SDCP over `ws://<host>:<port>/websocket`.
pub struct SdcpChannel {
    port: u16,
}

impl SdcpChannel {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl ControlChannel for SdcpChannel {
    async fn open(&self, ticket: &ExportTicket) -> Result<Box<dyn ControlSession>, ChannelError> {
        // The host may carry an explicit web port; the control channel
        // always lives on its own.
        let bare_host = match ticket.host.split_once(':') {
            Some((host, _)) => host,
            None => ticket.host.as_str(),
        };
        let url = format!("ws://{}:{}/websocket", bare_host, self.port);
        debug!(url = %url, "Opening control channel");

        let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| ChannelError::Connect(format!("timed out connecting to {url}")))?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        Ok(Box::new(SdcpSession {
            stream,
            ticket: ticket.clone(),
        }))
    }
}

/// Live WebSocket session for one export.
pub struct SdcpSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ticket: ExportTicket,
}

#[async_trait]
impl ControlSession for SdcpSession {
    async fn send_trigger(&mut self) -> Result<(), ChannelError> {
        let command = ExportCommand::export_timelapse(&self.ticket);
        let payload =
            serde_json::to_string(&command).map_err(|e| ChannelError::Send(e.to_string()))?;
        debug!(payload = %payload, "Sending export trigger");
        self.stream
            .send(Message::Text(payload))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Notification, ChannelError> {
        loop {
            let frame = self
                .stream
                .next()
                .await
                .ok_or_else(|| ChannelError::Recv("connection closed".to_string()))?
                .map_err(|e| ChannelError::Recv(e.to_string()))?;

            match frame {
                Message::Text(raw) => {
                    let notification = protocol::decode(&raw, &self.ticket);
                    debug!(?notification, "Classified inbound frame");
                    return Ok(notification);
                }
                // The firmware never sends meaningful binary frames.
                Message::Binary(_) => return Ok(Notification::Unrelated),
                Message::Close(_) => {
                    return Err(ChannelError::Recv(
                        "server closed the connection".to_string(),
                    ));
                }
                // Transport-level frames, handled by the library.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn keepalive(&mut self) -> Result<(), ChannelError> {
        // The firmware expects a literal "ping" text frame, not a WS ping.
        self.stream
            .send(Message::Text("ping".to_string()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(ChannelError::Send(e.to_string())),
        }
    }
}
