use thiserror::Error;

use crate::negotiation::SignalingState;

#[derive(Error, Debug)]
pub enum RtcError {
    /// Signaling state did not follow the expected offer/answer transition
    #[error("Protocol violation during {operation}: expected {expected}, found {actual}")]
    ProtocolViolation {
        operation: &'static str,
        expected: String,
        actual: String,
    },

    #[error("An offer is already being made")]
    OfferInProgress,

    #[error("Not connected")]
    NotConnected,

    /// Error string returned verbatim by the router
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Closed")]
    Closed,

    #[error("Request timeout")]
    Timeout,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error("Media device error: {0}")]
    Device(String),

    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl RtcError {
    pub(crate) fn unexpected_state(
        operation: &'static str,
        expected: SignalingState,
        actual: SignalingState,
    ) -> Self {
        Self::ProtocolViolation {
            operation,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Teardown that lost a race against a server-pushed close reports
    /// `NotFound`; owners may ignore it.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RtcError>;
