//! Signaling RPC to the media router
//!
//! - [`protocol`]: JSON frames, request names and push notifications
//! - [`channel`]: the transport-agnostic [`SignalingChannel`] seam
//! - [`client`]: request id correlation and timeouts
//! - [`router`]: typed helpers for each router request
//! - [`websocket`]: `tokio-tungstenite` implementation

pub mod channel;
pub mod client;
pub mod protocol;
pub mod router;
pub mod websocket;

pub use channel::{ChannelEvent, ConnectionState, SignalingChannel};
pub use client::RpcClient;
pub use protocol::{Frame, RouterMethod, RouterNotification};
pub use router::RouterRpc;
pub use websocket::{Credentials, WebSocketChannel};
