//! Media device seam
//!
//! The session manager drives a mediasoup-style client library through
//! these traits: a [`Device`] loaded with the router's capabilities creates
//! send and receive transports, which in turn create producers and
//! consumers. Transports call back into a [`TransportListener`] when they
//! need the router to connect them or to register a producer.
//!
//! No production implementation ships with this crate. Embedders supply the
//! [`Device`] and its transports, for example as bindings to a mediasoup
//! client; the in-crate doubles only exist for tests.

use async_trait::async_trait;
use std::sync::Arc;

use super::parameters::{
    ConsumerOptions, DtlsParameters, RtpCapabilities, RtpParameters, TransportOptions,
};
use crate::error::Result;
use crate::track::{LocalTrack, RemoteTrack, TrackKind};
use crate::types::{ConsumerId, ProducerId, PublicTrackId, StageId, TrackId, TransportId};

#[async_trait]
pub trait Device: Send + Sync {
    fn is_loaded(&self) -> bool;

    /// Load router capabilities. Only valid once per device.
    async fn load(&self, capabilities: RtpCapabilities) -> Result<()>;

    /// Capabilities to present when consuming; `None` until loaded
    fn rtp_capabilities(&self) -> Option<RtpCapabilities>;

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn SendTransport>>;

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn RecvTransport>>;
}

/// Router round trips a transport needs before media can flow
#[async_trait]
pub trait TransportListener: Send + Sync {
    /// First use of a transport: hand the local DTLS parameters to the router
    async fn on_connect(
        &self,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()>;

    /// A send transport is producing a track; returns the router's producer id
    async fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: TrackKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId>;
}

#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    async fn produce(&self, track: &LocalTrack) -> Result<Arc<dyn Producer>>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> &TransportId;

    async fn consume(&self, options: ConsumerOptions) -> Result<Arc<dyn Consumer>>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &ProducerId;

    /// Id of the local track being sent
    fn track_id(&self) -> &TrackId;

    fn kind(&self) -> TrackKind;

    fn is_paused(&self) -> bool;

    fn pause(&self);

    fn resume(&self);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &ConsumerId;

    fn producer_id(&self) -> &ProducerId;

    fn kind(&self) -> TrackKind;

    fn track(&self) -> RemoteTrack;

    fn is_paused(&self) -> bool;

    fn pause(&self);

    fn resume(&self);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Announces producers to the stage so other participants can consume them
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackPublisher: Send + Sync {
    async fn publish_track(
        &self,
        stage_id: &StageId,
        producer_id: &ProducerId,
        kind: TrackKind,
    ) -> Result<PublicTrackId>;

    async fn unpublish_track(&self, public_track_id: &PublicTrackId) -> Result<()>;
}
