//! Peer connection abstraction
//!
//! Lets the negotiation logic run against the webrtc-rs implementation in
//! production and an in-memory double in tests.

use async_trait::async_trait;

use super::{IceCandidate, SessionDescription, SignalingState};
use crate::error::Result;
use crate::track::{LocalTrack, RemoteTrack};

/// Events raised by the underlying connection
#[derive(Debug)]
pub enum PeerConnectionEvent {
    /// Local media changed and a new offer is required
    NegotiationNeeded,
    /// A local ICE candidate was gathered; `None` marks the end of gathering
    IceCandidate(Option<IceCandidate>),
    /// A remote media track arrived
    Track(RemoteTrack),
}

/// One end of a peer-to-peer media link
///
/// Implementations deliver [`PeerConnectionEvent`]s through the channel
/// handed out at construction until [`PeerConnection::detach_handlers`] is
/// called.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn signaling_state(&self) -> SignalingState;

    async fn add_track(&self, track: &LocalTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Drop an unanswered local offer and return to `Stable`.
    ///
    /// Used by the polite side when offers collide. Implementations that
    /// cannot roll back may rebuild their connection instead, as long as
    /// local tracks survive and events keep arriving on the same channel.
    async fn discard_local_offer(&self) -> Result<()>;

    /// Stop delivering events
    fn detach_handlers(&self);

    async fn close(&self) -> Result<()>;
}
