//! Peer-to-peer session negotiation
//!
//! One [`PeerConnectionNegotiator`] drives one peer connection towards a
//! glare-free offer/answer agreement with a single remote participant,
//! following the "perfect negotiation" pattern: both sides may offer at any
//! time, and when offers collide the polite side yields to the impolite one.

pub mod connection;
pub mod negotiator;
pub mod webrtc_peer;

pub use connection::{PeerConnection, PeerConnectionEvent};
pub use negotiator::{NegotiationHandler, PeerConnectionNegotiator};
pub use webrtc_peer::WebRtcPeerConnection;

use crate::types::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ICE candidate for WebRTC connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Full candidate string
    pub candidate: String,
    /// SDP mid
    pub sdp_mid: Option<String>,
    /// SDP mline index
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment of the session the candidate belongs to
    pub username_fragment: Option<String>,
}

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Discards a pending local or remote offer
    #[must_use]
    pub const fn rollback() -> Self {
        Self {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        }
    }
}

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

/// Signaling state of a peer connection (JSEP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::HaveLocalOffer => "have-local-offer",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::HaveLocalPranswer => "have-local-pranswer",
            Self::HaveRemotePranswer => "have-remote-pranswer",
            Self::Closed => "closed",
        })
    }
}

/// The peer whose id sorts lower is polite and yields on offer collision.
///
/// Both ends evaluate this with swapped arguments, so for distinct ids
/// exactly one of them is polite.
#[must_use]
pub fn is_polite(local: &PeerId, remote: &PeerId) -> bool {
    local < remote
}
