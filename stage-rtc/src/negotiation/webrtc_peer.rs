//! [`PeerConnection`] backed by webrtc-rs
//!
//! webrtc-rs refuses to roll back a local offer, so
//! [`PeerConnection::discard_local_offer`] replaces the underlying
//! `RTCPeerConnection` with a fresh one carrying the same local tracks.
//! Every connection built here tags its callbacks with a generation number;
//! callbacks of a replaced connection are dropped.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use stage_core::WebRtcConfig;

use super::{
    IceCandidate, PeerConnection, PeerConnectionEvent, SdpType, SessionDescription,
    SignalingState,
};
use crate::error::{Result, RtcError};
use crate::track::{LocalTrack, RemoteTrack};

type LocalTrackHandle = Arc<dyn TrackLocal + Send + Sync>;

/// Event forwarding shared by every generation of the connection
struct EventSink {
    tx: Mutex<Option<mpsc::UnboundedSender<PeerConnectionEvent>>>,
    generation: AtomicU64,
    /// Set while a rebuilt connection waits for the remote offer it was
    /// rebuilt for
    hold_negotiation: AtomicBool,
}

impl EventSink {
    fn emit(&self, generation: u64, event: PeerConnectionEvent) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if matches!(event, PeerConnectionEvent::NegotiationNeeded)
            && self.hold_negotiation.load(Ordering::SeqCst)
        {
            debug!("Negotiation needed held until the remote offer is applied");
            return;
        }
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

pub struct WebRtcPeerConnection {
    api: API,
    rtc_config: RTCConfiguration,
    connection: RwLock<Arc<RTCPeerConnection>>,
    local_tracks: Mutex<Vec<LocalTrackHandle>>,
    events: Arc<EventSink>,
}

impl WebRtcPeerConnection {
    /// Build a connection with the default codecs and interceptors.
    ///
    /// The returned receiver yields negotiation, candidate and track events
    /// until [`PeerConnection::detach_handlers`] is called.
    pub async fn new(
        config: &WebRtcConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerConnectionEvent>)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(config),
            ..Default::default()
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let events = Arc::new(EventSink {
            tx: Mutex::new(Some(tx)),
            generation: AtomicU64::new(0),
            hold_negotiation: AtomicBool::new(false),
        });

        let connection = Arc::new(api.new_peer_connection(rtc_config.clone()).await?);
        register_handlers(&connection, &events, 0);

        Ok((
            Self {
                api,
                rtc_config,
                connection: RwLock::new(connection),
                local_tracks: Mutex::new(Vec::new()),
                events,
            },
            rx,
        ))
    }

    /// Underlying webrtc-rs connection. Replaced when a local offer is
    /// discarded.
    #[must_use]
    pub fn inner(&self) -> Arc<RTCPeerConnection> {
        self.connection.read().clone()
    }
}

fn ice_servers(config: &WebRtcConfig) -> Vec<RTCIceServer> {
    let mut servers = vec![];
    if !config.stun_servers.is_empty() {
        servers.push(RTCIceServer {
            urls: config.stun_servers.clone(),
            ..Default::default()
        });
    }
    if let Some(turn) = &config.turn_config {
        servers.push(RTCIceServer {
            urls: vec![turn.server_url.clone()],
            username: turn.username.clone(),
            credential: turn.password.clone(),
            ..Default::default()
        });
    }
    servers
}

fn register_handlers(connection: &RTCPeerConnection, events: &Arc<EventSink>, generation: u64) {
    let sink = events.clone();
    connection.on_negotiation_needed(Box::new(move || {
        sink.emit(generation, PeerConnectionEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let sink = events.clone();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        match candidate.map(|c| c.to_json()).transpose() {
            Ok(init) => sink.emit(
                generation,
                PeerConnectionEvent::IceCandidate(init.map(IceCandidate::from)),
            ),
            Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
        }
        Box::pin(async {})
    }));

    let sink = events.clone();
    connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            sink.emit(
                generation,
                PeerConnectionEvent::Track(RemoteTrack::from_webrtc(track)),
            );
            Box::pin(async {})
        },
    ));
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::HaveLocalOffer => Self::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => Self::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => Self::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => Self::HaveRemotePranswer,
            RTCSignalingState::Closed => Self::Closed,
            _ => Self::Stable,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let desc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpType::Rollback => {
            return Err(RtcError::Unsupported(
                "webrtc-rs cannot apply rollback descriptions",
            ))
        }
    };
    Ok(desc)
}

fn from_rtc_description(description: RTCSessionDescription) -> SessionDescription {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        _ => SdpType::Answer,
    };
    SessionDescription {
        sdp_type,
        sdp: description.sdp,
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    fn signaling_state(&self) -> SignalingState {
        self.inner().signaling_state().into()
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<()> {
        let local: LocalTrackHandle = track.sample_track();
        self.inner().add_track(local.clone()).await?;
        self.local_tracks.lock().push(local);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.inner().create_offer(None).await?;
        Ok(from_rtc_description(offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.inner().create_answer(None).await?;
        Ok(from_rtc_description(answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(description)?;
        self.inner().set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = to_rtc_description(description)?;
        let applied = self.inner().set_remote_description(desc).await;
        self.events.hold_negotiation.store(false, Ordering::SeqCst);
        applied?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.inner().add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn discard_local_offer(&self) -> Result<()> {
        let state = self.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            return Err(RtcError::unexpected_state(
                "discard local offer",
                SignalingState::HaveLocalOffer,
                state,
            ));
        }

        // the fresh connection stays silent until its generation is current
        let generation = self.events.generation.load(Ordering::SeqCst) + 1;
        let fresh = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config.clone())
                .await?,
        );
        register_handlers(&fresh, &self.events, generation);

        let tracks = self.local_tracks.lock().clone();
        for track in tracks {
            if let Err(e) = fresh.add_track(track).await {
                let _ = fresh.close().await;
                return Err(e.into());
            }
        }

        self.events.hold_negotiation.store(true, Ordering::SeqCst);
        self.events.generation.store(generation, Ordering::SeqCst);
        let stale = std::mem::replace(&mut *self.connection.write(), fresh);
        if let Err(e) = stale.close().await {
            warn!(error = %e, "Closing the discarded connection failed");
        }

        info!(generation, "Peer connection rebuilt to discard local offer");
        Ok(())
    }

    fn detach_handlers(&self) {
        if self.events.tx.lock().take().is_some() {
            debug!("Peer connection handlers detached");
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner().close().await?;
        Ok(())
    }
}
