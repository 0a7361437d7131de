//! Media session core for Digital Stage
//!
//! Two ways of getting media between stage members:
//!
//! - [`negotiation`]: direct peer connections, each driven by a
//!   [`PeerConnectionNegotiator`] that resolves offer collisions without
//!   dropping either side's changes
//! - [`sfu`]: an [`SfuSessionManager`] that publishes local tracks to a
//!   media router and mirrors the stage's public tracks as consumers
//!
//! Both sit behind traits ([`PeerConnection`], [`SignalingChannel`],
//! [`sfu::Device`]) so the state machines can run against in-memory doubles.
//!
//! Peer connections come with a webrtc-rs backend ([`WebRtcPeerConnection`])
//! and the router channel with a WebSocket one ([`WebSocketChannel`]). There
//! is no bundled media device for the SFU path: callers of
//! [`SfuSessionManager::new`] provide their own [`sfu::Device`].

pub mod error;
pub mod negotiation;
pub mod rpc;
pub mod sfu;
pub mod track;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{Result, RtcError};
pub use negotiation::{
    IceCandidate, NegotiationHandler, PeerConnection, PeerConnectionEvent,
    PeerConnectionNegotiator, SessionDescription, SignalingState, WebRtcPeerConnection,
};
pub use rpc::{ChannelEvent, ConnectionState, Credentials, SignalingChannel, WebSocketChannel};
pub use sfu::{ConsumerInfo, ProducerInfo, PublicTrack, SfuEvent, SfuSessionManager, SyncReport};
pub use track::{LocalTrack, RemoteTrack, TrackKind};
pub use types::{ConsumerId, PeerId, ProducerId, PublicTrackId, StageId, TrackId, TransportId};
