//! WebSocket signaling channel
//!
//! One connection per router session. A writer task drains the outbound
//! frame queue; a reader task resolves responses and fans notifications out
//! to subscribers. When either side of the socket ends, in-flight requests
//! fail with `ChannelClosed` and subscribers see `Disconnected`.
//!
//! Each connection carries its own id. Tasks of a connection that has been
//! replaced or closed locally never touch the state of the current one.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use stage_core::SfuConfig;

use super::channel::{ChannelEvent, ConnectionState, SignalingChannel};
use super::client::RpcClient;
use super::protocol::{Frame, RouterMethod};
use crate::error::Result;
use crate::types::StageId;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Router login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

/// The socket currently serving requests
struct ActiveConnection {
    id: u64,
    shutdown: CancellationToken,
}

/// Shared between the channel and its reader tasks
struct Link {
    rpc: RpcClient,
    events: broadcast::Sender<ChannelEvent>,
    state: Mutex<ConnectionState>,
    active: Mutex<Option<ActiveConnection>>,
}

impl Link {
    /// Tear down connection `id` if it is still the active one. Returns
    /// false when it was already replaced or closed.
    fn close_connection(&self, id: u64, reason: String) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.id == id => {
                if let Some(current) = active.take() {
                    current.shutdown.cancel();
                }
            }
            _ => return false,
        }
        self.rpc.detach();
        *self.state.lock() = ConnectionState::Disconnected;
        drop(active);

        info!(connection = id, reason = %reason, "Router connection closed");
        let _ = self.events.send(ChannelEvent::Disconnected { reason });
        true
    }
}

pub struct WebSocketChannel {
    url: Url,
    link: Arc<Link>,
    next_connection: AtomicU64,
    outbound_capacity: usize,
}

impl WebSocketChannel {
    /// Credentials and stage travel as query parameters of the router URL.
    pub fn new(
        router_url: &str,
        stage_id: &StageId,
        credentials: &Credentials,
        config: &SfuConfig,
    ) -> Result<Self> {
        let mut url = Url::parse(router_url)?;
        url.query_pairs_mut()
            .append_pair("stage_id", stage_id.as_str())
            .append_pair("user_id", &credentials.user_id)
            .append_pair("token", &credentials.token);

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Self {
            url,
            link: Arc::new(Link {
                rpc: RpcClient::new(config.request_timeout()),
                events,
                state: Mutex::new(ConnectionState::Disconnected),
                active: Mutex::new(None),
            }),
            next_connection: AtomicU64::new(1),
            outbound_capacity: config.outbound_capacity.max(1),
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn set_state(&self, state: ConnectionState) {
        *self.link.state.lock() = state;
    }

    async fn write_loop(
        mut sink: SplitSink<WsStream, Message>,
        mut outbound: mpsc::Receiver<Frame>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode signaling frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(error = %e, "Signaling socket write failed");
                        break;
                    }
                }
            }
        }
        shutdown.cancel();
        debug!("Signaling writer stopped");
    }

    async fn read_loop(
        mut stream: SplitStream<WsStream>,
        link: Arc<Link>,
        id: u64,
        shutdown: CancellationToken,
    ) {
        let reason = loop {
            let message = tokio::select! {
                () = shutdown.cancelled() => break "connection shut down".to_string(),
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => {
                        if let Some(notification) = link.rpc.handle_frame(frame) {
                            let _ = link
                                .events
                                .send(ChannelEvent::Notification(notification));
                        }
                    }
                    Err(e) => warn!(error = %e, "Unrecognized signaling frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    break frame.map_or_else(
                        || "closed by router".to_string(),
                        |f| f.reason.to_string(),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            }
        };

        shutdown.cancel();
        if !link.close_connection(id, reason) {
            debug!(connection = id, "Reader of a retired connection stopped");
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.link.state.lock();
            if *state != ConnectionState::Disconnected {
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }

        debug!(host = ?self.url.host_str(), "Connecting to router");
        let stream = match connect_async(self.url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        let (sink, stream) = stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let shutdown = CancellationToken::new();
        {
            let mut active = self.link.active.lock();
            // a disconnect() while the handshake was running wins
            if *self.link.state.lock() != ConnectionState::Connecting {
                debug!(connection = id, "Connection closed before the handshake finished");
                return Ok(());
            }
            *active = Some(ActiveConnection {
                id,
                shutdown: shutdown.clone(),
            });
            self.link.rpc.attach(outbound_tx);
            self.set_state(ConnectionState::Connected);
        }

        let _ = self.link.events.send(ChannelEvent::Connected);
        info!(connection = id, host = ?self.url.host_str(), "Router connection established");

        tokio::spawn(Self::write_loop(sink, outbound_rx, shutdown.clone()));
        tokio::spawn(Self::read_loop(stream, self.link.clone(), id, shutdown));

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let id = self.link.active.lock().as_ref().map(|active| active.id);
        match id {
            Some(id) => {
                self.link.close_connection(id, "closed locally".to_string());
            }
            None => self.set_state(ConnectionState::Disconnected),
        }
        Ok(())
    }

    async fn request(&self, method: RouterMethod, data: Value) -> Result<Value> {
        self.link.rpc.request(method, data).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.link.events.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.link.state.lock()
    }
}
