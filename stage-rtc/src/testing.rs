//! In-memory doubles for the connection, router and device seams

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Semaphore};

use crate::error::{Result, RtcError};
use crate::negotiation::{
    IceCandidate, NegotiationHandler, PeerConnection, PeerConnectionEvent, SdpType,
    SessionDescription, SignalingState,
};
use crate::rpc::{ChannelEvent, ConnectionState, RouterMethod, RouterNotification, SignalingChannel};
use crate::sfu::{
    Consumer, ConsumerOptions, Device, DtlsParameters, Producer, RecvTransport, RtpCapabilities,
    RtpParameters, SendTransport, TransportListener, TransportOptions,
};
use crate::track::{LocalTrack, RemoteTrack, TrackKind};
use crate::types::{ConsumerId, ProducerId, TrackId, TransportId};

/// Peer connection following the JSEP signaling state rules. Like
/// webrtc-rs it refuses rollback descriptions, so a colliding local offer
/// can only be dropped through `discard_local_offer`. Descriptions embed
/// `ice-ufrag:<label>`; candidates only apply against a remote description
/// with a matching ufrag.
pub struct MockPeerConnection {
    label: String,
    state: Mutex<SignalingState>,
    remote_description: Mutex<Option<SessionDescription>>,
    offers_created: AtomicUsize,
    offers_discarded: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<PeerConnectionEvent>>>,
}

impl MockPeerConnection {
    pub fn new(label: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(SignalingState::Stable),
            remote_description: Mutex::new(None),
            offers_created: AtomicUsize::new(0),
            offers_discarded: AtomicUsize::new(0),
            events: Mutex::new(Some(tx)),
        });
        (connection, rx)
    }

    pub fn candidate_for(label: &str) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{label} 1 udp 2130706431 10.0.0.1 5000 typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: Some(label.to_string()),
        }
    }

    pub fn force_state(&self, state: SignalingState) {
        *self.state.lock() = state;
    }

    pub fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn offers_discarded(&self) -> usize {
        self.offers_discarded.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.events.lock().is_none()
    }

    fn emit(&self, event: PeerConnectionEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    fn sdp(&self, kind: &str) -> String {
        format!("v=0\r\na=ice-ufrag:{}\r\na=x-kind:{kind}\r\n", self.label)
    }

    fn invalid(&self, side: &str, sdp_type: SdpType, state: SignalingState) -> RtcError {
        RtcError::Device(format!(
            "cannot apply {side} {} in state {state}",
            sdp_type.as_str()
        ))
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    fn signaling_state(&self) -> SignalingState {
        *self.state.lock()
    }

    async fn add_track(&self, _track: &LocalTrack) -> Result<()> {
        self.emit(PeerConnectionEvent::NegotiationNeeded);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.signaling_state() == SignalingState::Closed {
            return Err(RtcError::Closed);
        }
        let n = self.offers_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionDescription::offer(self.sdp(&format!("offer-{n}"))))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let state = self.signaling_state();
        if state != SignalingState::HaveRemoteOffer {
            return Err(self.invalid("local", SdpType::Answer, state));
        }
        Ok(SessionDescription::answer(self.sdp("answer")))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        {
            let mut state = self.state.lock();
            *state = match (description.sdp_type, *state) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (sdp_type, current) => return Err(self.invalid("local", sdp_type, current)),
            };
        }

        self.emit(PeerConnectionEvent::IceCandidate(Some(Self::candidate_for(
            &self.label,
        ))));
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        let next = match (description.sdp_type, *state) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (sdp_type, current) => return Err(self.invalid("remote", sdp_type, current)),
        };
        *state = next;
        *self.remote_description.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let remote = self.remote_description.lock();
        let matches = match (remote.as_ref(), candidate.username_fragment.as_deref()) {
            (Some(description), Some(ufrag)) => {
                description.sdp.contains(&format!("ice-ufrag:{ufrag}\r\n"))
            }
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            Ok(())
        } else {
            Err(RtcError::Device(format!(
                "no remote description for candidate {}",
                candidate.candidate
            )))
        }
    }

    async fn discard_local_offer(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != SignalingState::HaveLocalOffer {
            return Err(RtcError::unexpected_state(
                "discard local offer",
                SignalingState::HaveLocalOffer,
                *state,
            ));
        }
        *state = SignalingState::Stable;
        *self.remote_description.lock() = None;
        self.offers_discarded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach_handlers(&self) {
        self.events.lock().take();
    }

    async fn close(&self) -> Result<()> {
        *self.state.lock() = SignalingState::Closed;
        Ok(())
    }
}

/// Negotiation handler that queues everything it is handed
#[derive(Clone)]
pub struct RecordingHandler {
    descriptions_tx: mpsc::UnboundedSender<SessionDescription>,
    descriptions_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<SessionDescription>>>,
    candidates_tx: mpsc::UnboundedSender<IceCandidate>,
    candidates_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<IceCandidate>>>,
    tracks: Arc<Mutex<Vec<RemoteTrack>>>,
    errors: Arc<Mutex<Vec<String>>>,
    gate: Option<Arc<Semaphore>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        let (descriptions_tx, descriptions_rx) = mpsc::unbounded_channel();
        let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();
        Self {
            descriptions_tx,
            descriptions_rx: Arc::new(AsyncMutex::new(descriptions_rx)),
            candidates_tx,
            candidates_rx: Arc::new(AsyncMutex::new(candidates_rx)),
            tracks: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
            gate: None,
        }
    }

    /// Sending a description waits for a permit on `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    pub async fn next_description(&self, wait: Duration) -> SessionDescription {
        let mut rx = self.descriptions_rx.lock().await;
        tokio::time::timeout(wait, rx.recv())
            .await
            .expect("timed out waiting for a session description")
            .expect("description channel closed")
    }

    pub fn try_next_description(&self) -> Option<SessionDescription> {
        self.descriptions_rx.try_lock().ok()?.try_recv().ok()
    }

    pub async fn next_candidate(&self, wait: Duration) -> IceCandidate {
        let mut rx = self.candidates_rx.lock().await;
        tokio::time::timeout(wait, rx.recv())
            .await
            .expect("timed out waiting for a candidate")
            .expect("candidate channel closed")
    }

    pub fn tracks(&self) -> Vec<RemoteTrack> {
        self.tracks.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

#[async_trait]
impl NegotiationHandler for RecordingHandler {
    async fn on_ice_candidate(&self, candidate: Option<IceCandidate>) {
        if let Some(candidate) = candidate {
            let _ = self.candidates_tx.send(candidate);
        }
    }

    async fn on_session_description(&self, description: SessionDescription) -> Result<()> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| RtcError::Closed)?;
        }
        let _ = self.descriptions_tx.send(description);
        Ok(())
    }

    async fn on_remote_track(&self, track: RemoteTrack) {
        self.tracks.lock().push(track);
    }

    async fn on_negotiation_error(&self, error: RtcError) {
        self.errors.lock().push(error.to_string());
    }
}

/// Router that answers every request locally and records it
pub struct MockRouter {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ChannelEvent>,
    requests: Mutex<Vec<(RouterMethod, Value)>>,
    failures: Mutex<HashMap<RouterMethod, String>>,
    drop_after: Mutex<Option<RouterMethod>>,
    next_id: AtomicU64,
}

impl MockRouter {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            drop_after: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// Mark connected without notifying subscribers
    pub fn connect_now(&self) {
        *self.state.lock() = ConnectionState::Connected;
    }

    /// Reject every `method` request with `message`
    pub fn fail(&self, method: RouterMethod, message: &str) {
        self.failures.lock().insert(method, message.to_string());
    }

    /// Answer the next `method` request, but lose the connection before the
    /// answer arrives. Subscribers see the drop first.
    pub fn drop_after(&self, method: RouterMethod) {
        *self.drop_after.lock() = Some(method);
    }

    pub fn notify(&self, notification: RouterNotification) {
        let _ = self.events.send(ChannelEvent::Notification(notification));
    }

    pub fn drop_connection(&self, reason: &str) {
        *self.state.lock() = ConnectionState::Disconnected;
        let _ = self.events.send(ChannelEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    pub fn requests(&self) -> Vec<(RouterMethod, Value)> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<(RouterMethod, Value)> {
        self.requests.lock().last().cloned()
    }

    pub fn count(&self, method: RouterMethod) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(m, _)| *m == method)
            .count()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn respond(&self, method: RouterMethod, data: &Value) -> Value {
        match method {
            RouterMethod::GetRtpCapabilities => json!({
                "codecs": [
                    { "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 },
                    { "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }
                ]
            }),
            RouterMethod::CreateTransport => json!({
                "id": self.next_id("transport"),
                "ice_parameters": { "usernameFragment": "router", "password": "router" },
                "ice_candidates": [],
                "dtls_parameters": { "role": "auto", "fingerprints": [] }
            }),
            RouterMethod::CreateProducer => json!({ "id": self.next_id("producer") }),
            RouterMethod::CreateConsumer => json!({
                "id": self.next_id("consumer"),
                "producer_id": data["producer_id"].clone(),
                "kind": "video",
                "rtp_parameters": { "codecs": [] },
                "paused": true
            }),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl SignalingChannel for MockRouter {
    async fn connect(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Connected {
                return Ok(());
            }
            *state = ConnectionState::Connected;
        }
        let _ = self.events.send(ChannelEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let was_connected = {
            let mut state = self.state.lock();
            let was = *state == ConnectionState::Connected;
            *state = ConnectionState::Disconnected;
            was
        };
        if was_connected {
            let _ = self.events.send(ChannelEvent::Disconnected {
                reason: "closed locally".to_string(),
            });
        }
        Ok(())
    }

    async fn request(&self, method: RouterMethod, data: Value) -> Result<Value> {
        if *self.state.lock() != ConnectionState::Connected {
            return Err(RtcError::NotConnected);
        }
        let response = self.respond(method, &data);
        self.requests.lock().push((method, data));

        if let Some(message) = self.failures.lock().get(&method) {
            return Err(RtcError::Rejected(message.clone()));
        }

        let dropping = {
            let mut drop_after = self.drop_after.lock();
            let hit = *drop_after == Some(method);
            if hit {
                *drop_after = None;
            }
            hit
        };
        if dropping {
            self.drop_connection("router went away");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(response)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

/// Device whose transports call their listener the way mediasoup-client
/// does: `connect` on first use, `produce` for every new producer.
pub struct MockDevice {
    capabilities: Mutex<Option<RtpCapabilities>>,
    loads: AtomicUsize,
    send_transports: Mutex<Vec<Arc<MockSendTransport>>>,
    recv_transports: Mutex<Vec<Arc<MockRecvTransport>>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            capabilities: Mutex::new(None),
            loads: AtomicUsize::new(0),
            send_transports: Mutex::new(Vec::new()),
            recv_transports: Mutex::new(Vec::new()),
        })
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn send_transports(&self) -> Vec<Arc<MockSendTransport>> {
        self.send_transports.lock().clone()
    }

    pub fn recv_transports(&self) -> Vec<Arc<MockRecvTransport>> {
        self.recv_transports.lock().clone()
    }
}

#[async_trait]
impl Device for MockDevice {
    fn is_loaded(&self) -> bool {
        self.capabilities.lock().is_some()
    }

    async fn load(&self, capabilities: RtpCapabilities) -> Result<()> {
        let mut current = self.capabilities.lock();
        if current.is_some() {
            return Err(RtcError::Device("device already loaded".to_string()));
        }
        *current = Some(capabilities);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.capabilities.lock().clone()
    }

    async fn create_send_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn SendTransport>> {
        let transport = Arc::new(MockSendTransport {
            id: options.id,
            dtls_parameters: options.dtls_parameters,
            listener,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
        });
        self.send_transports.lock().push(transport.clone());
        Ok(transport as Arc<dyn SendTransport>)
    }

    async fn create_recv_transport(
        &self,
        options: TransportOptions,
        listener: Arc<dyn TransportListener>,
    ) -> Result<Arc<dyn RecvTransport>> {
        let transport = Arc::new(MockRecvTransport {
            id: options.id,
            dtls_parameters: options.dtls_parameters,
            listener,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        });
        self.recv_transports.lock().push(transport.clone());
        Ok(transport as Arc<dyn RecvTransport>)
    }
}

pub struct MockSendTransport {
    id: TransportId,
    dtls_parameters: DtlsParameters,
    listener: Arc<dyn TransportListener>,
    connected: AtomicBool,
    closed: AtomicBool,
    producers: Mutex<Vec<Arc<MockProducer>>>,
}

impl MockSendTransport {
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.producers.lock().clone()
    }
}

#[async_trait]
impl SendTransport for MockSendTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    async fn produce(&self, track: &LocalTrack) -> Result<Arc<dyn Producer>> {
        if self.is_closed() {
            return Err(RtcError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            self.listener
                .on_connect(&self.id, self.dtls_parameters.clone())
                .await?;
            self.connected.store(true, Ordering::SeqCst);
        }

        let rtp_parameters = RtpParameters(json!({ "mid": track.id().as_str(), "codecs": [] }));
        let id = self
            .listener
            .on_produce(&self.id, track.kind(), rtp_parameters)
            .await?;

        let producer = Arc::new(MockProducer {
            id,
            track_id: track.id().clone(),
            kind: track.kind(),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.producers.lock().push(producer.clone());
        Ok(producer as Arc<dyn Producer>)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockRecvTransport {
    id: TransportId,
    dtls_parameters: DtlsParameters,
    listener: Arc<dyn TransportListener>,
    connected: AtomicBool,
    closed: AtomicBool,
    consumers: Mutex<Vec<Arc<MockConsumer>>>,
}

impl MockRecvTransport {
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers.lock().clone()
    }
}

#[async_trait]
impl RecvTransport for MockRecvTransport {
    fn id(&self) -> &TransportId {
        &self.id
    }

    async fn consume(&self, options: ConsumerOptions) -> Result<Arc<dyn Consumer>> {
        if self.is_closed() {
            return Err(RtcError::Closed);
        }
        if !self.connected.load(Ordering::SeqCst) {
            self.listener
                .on_connect(&self.id, self.dtls_parameters.clone())
                .await?;
            self.connected.store(true, Ordering::SeqCst);
        }

        let consumer = Arc::new(MockConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            paused: AtomicBool::new(options.paused),
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(consumer.clone());
        Ok(consumer as Arc<dyn Consumer>)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockProducer {
    id: ProducerId,
    track_id: TrackId,
    kind: TrackKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl Producer for MockProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: TrackKind,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl Consumer for MockConsumer {
    fn id(&self) -> &ConsumerId {
        &self.id
    }

    fn producer_id(&self) -> &ProducerId {
        &self.producer_id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> RemoteTrack {
        let mut track = RemoteTrack::new(self.id.as_str(), self.kind);
        track.stream_id = Some(self.producer_id.to_string());
        track
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
