//! Router payloads passed between the router and the media device
//!
//! RTP capabilities, RTP parameters and DTLS parameters are produced and
//! consumed by the device library; the session manager only forwards them,
//! so they stay opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::track::TrackKind;
use crate::types::{ConsumerId, ProducerId, PublicTrackId, TransportId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub Value);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Receive,
}

impl TransportDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }
}

/// Server-side transport description returned by `create-transport`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportOptions {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: DtlsParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sctp_parameters: Option<Value>,
}

/// Server-side consumer description returned by `create-consumer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerOptions {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
    pub rtp_parameters: RtpParameters,
    /// Consumers are usually created paused and resumed by the client
    #[serde(default)]
    pub paused: bool,
}

/// Track descriptor from the stage's public track list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicTrack {
    pub id: PublicTrackId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
}

impl PublicTrack {
    pub fn new(
        id: impl Into<PublicTrackId>,
        producer_id: impl Into<ProducerId>,
        kind: TrackKind,
    ) -> Self {
        Self {
            id: id.into(),
            producer_id: producer_id.into(),
            kind,
        }
    }
}
