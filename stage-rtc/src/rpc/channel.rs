use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;

use super::protocol::{RouterMethod, RouterNotification};
use crate::error::Result;

/// Events emitted by a signaling channel to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected { reason: String },
    Notification(RouterNotification),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Request/response and push channel to a media router
///
/// Reconnection policy belongs to the implementation; consumers only see
/// the [`ChannelEvent`] stream.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Single round trip. A router-side error string comes back as
    /// [`crate::RtcError::Rejected`] unchanged.
    async fn request(&self, method: RouterMethod, data: Value) -> Result<Value>;

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    fn connection_state(&self) -> ConnectionState;
}
