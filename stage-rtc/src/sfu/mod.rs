//! SFU-routed stages
//!
//! [`SfuSessionManager`] publishes local tracks to a mediasoup-style router
//! and consumes the stage's public tracks from it.

pub mod device;
pub mod parameters;
pub mod session;

pub use device::{
    Consumer, Device, Producer, RecvTransport, SendTransport, TrackPublisher, TransportListener,
};
pub use parameters::{
    ConsumerOptions, DtlsParameters, PublicTrack, RtpCapabilities, RtpParameters,
    TransportDirection, TransportOptions,
};
pub use session::{ConsumerInfo, ProducerInfo, SfuEvent, SfuSessionManager, SyncReport};
