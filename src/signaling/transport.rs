//! Duplex text channel to the signaling endpoint.
//!
//! A connected transport is split in two halves: [`Channel`] enqueues
//! outbound frames and [`Inbound`] yields inbound frames in arrival order.
//! Both are backed by in-process queues, so a [`Connector`] other than the
//! WebSocket one only has to pump frames into them.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::signaling::message::Outbound;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Channel {
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl Channel {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound: Arc::new(Mutex::new(Some(outbound))),
        }
    }

    /// Enqueues one JSON frame.
    pub fn send(&self, message: &Outbound) -> Result<()> {
        let text = message.encode()?;
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::send(format!("channel closed, dropping {}", message.id())));
        };
        tx.send(text)
            .map_err(|_| Error::send(format!("channel closed, dropping {}", message.id())))?;
        debug!(id = message.id(), "Sent signaling message");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Idempotent. The writer drains what was already queued and then closes
    /// the socket.
    pub fn close(&self) {
        if self.outbound.lock().take().is_some() {
            info!("Signaling channel closed");
        }
    }
}

/// Inbound half. Yields `Err` once if the underlying socket fails.
pub struct Inbound {
    frames: mpsc::UnboundedReceiver<Result<String>>,
}

impl Inbound {
    pub fn new(frames: mpsc::UnboundedReceiver<Result<String>>) -> Self {
        Self { frames }
    }

    pub async fn next(&mut self) -> Option<Result<String>> {
        self.frames.recv().await
    }

    /// Runs until the channel closes (`Ok`) or errors (`Err`), handing every
    /// frame to `on_message` in arrival order.
    pub async fn receive_loop<F, Fut>(&mut self, mut on_message: F) -> Result<()>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        while let Some(frame) = self.frames.recv().await {
            on_message(frame?).await;
        }
        Ok(())
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SessionConfig) -> Result<(Channel, Inbound)>;
}

/// WebSocket connector; the auth cookie rides on the handshake.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, config: &SessionConfig) -> Result<(Channel, Inbound)> {
        let mut request = config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(Error::connect)?;
        if !config.cookie.is_empty() {
            let cookie = HeaderValue::from_str(&config.cookie)
                .map_err(|e| Error::connect(format!("invalid cookie header: {e}")))?;
            request.headers_mut().insert(COOKIE, cookie);
        }

        let (ws_stream, _) = connect_async(request).await.map_err(Error::connect)?;
        info!(endpoint = %config.endpoint, "Connected to signaling server");

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<String>>();
        let channel = Channel::new(out_tx);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    error!(error = %e, "Failed to send signaling message");
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Signaling writer stopped");
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(Ok(text)).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        info!(?frame, "Signaling server closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Signaling WebSocket error");
                        let _ = in_tx.send(Err(Error::connect(e)));
                        break;
                    }
                }
            }
            info!("Disconnected from signaling server");
        });

        Ok((channel, Inbound::new(in_rx)))
    }
}
