//! SFU session manager
//!
//! One manager per SFU-routed stage. It owns the router signaling channel,
//! the media device and at most one send and one receive transport, and
//! keeps two maps:
//!
//! - producers, keyed by the public track id the stage assigned when the
//!   producer was published
//! - consumers, keyed by the public track id they were consumed from
//!
//! Router pushes and connection changes are handled by a background task
//! that only holds a weak reference to the manager.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stage_core::SfuConfig;

use super::device::{
    Consumer, Device, Producer, RecvTransport, SendTransport, TrackPublisher, TransportListener,
};
use super::parameters::{DtlsParameters, PublicTrack, RtpParameters, TransportDirection};
use crate::error::{Result, RtcError};
use crate::rpc::{
    ChannelEvent, ConnectionState, Credentials, RouterNotification, RouterRpc, SignalingChannel,
    WebSocketChannel,
};
use crate::track::{LocalTrack, RemoteTrack, TrackKind};
use crate::types::{ConsumerId, ProducerId, PublicTrackId, StageId, TrackId, TransportId};

/// Events surfaced to the session owner
#[derive(Debug, Clone)]
pub enum SfuEvent {
    /// Capabilities are loaded and both transports exist
    Connected,
    Disconnected,
    ProducerAdded {
        public_track_id: PublicTrackId,
        producer_id: ProducerId,
        kind: TrackKind,
    },
    ProducerRemoved {
        public_track_id: PublicTrackId,
        producer_id: ProducerId,
    },
    ConsumerAdded {
        public_track_id: PublicTrackId,
        consumer_id: ConsumerId,
        track: RemoteTrack,
    },
    ConsumerRemoved {
        public_track_id: PublicTrackId,
        consumer_id: ConsumerId,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub track_id: TrackId,
    pub kind: TrackKind,
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: TrackKind,
    pub paused: bool,
}

/// Outcome of [`SfuSessionManager::sync_with_public_tracks`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub consumed: Vec<PublicTrackId>,
    pub stopped: Vec<PublicTrackId>,
    pub failed: Vec<(PublicTrackId, String)>,
}

impl SyncReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.consumed.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

struct ProducerEntry {
    producer: Arc<dyn Producer>,
    /// Cancelled to stop watching the local track's ended signal
    ended_watch: CancellationToken,
}

fn producer_info(producer: &dyn Producer) -> ProducerInfo {
    ProducerInfo {
        producer_id: producer.id().clone(),
        track_id: producer.track_id().clone(),
        kind: producer.kind(),
        paused: producer.is_paused(),
    }
}

fn consumer_info(consumer: &dyn Consumer) -> ConsumerInfo {
    ConsumerInfo {
        consumer_id: consumer.id().clone(),
        producer_id: consumer.producer_id().clone(),
        kind: consumer.kind(),
        paused: consumer.is_paused(),
    }
}

/// Answers transport callbacks with router round trips
struct RouterTransportListener {
    rpc: RouterRpc,
}

#[async_trait]
impl TransportListener for RouterTransportListener {
    async fn on_connect(
        &self,
        transport_id: &TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        debug!(transport_id = %transport_id, "Connecting transport");
        self.rpc
            .connect_transport(transport_id, &dtls_parameters)
            .await
    }

    async fn on_produce(
        &self,
        transport_id: &TransportId,
        kind: TrackKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId> {
        self.rpc
            .create_producer(transport_id, kind, &rtp_parameters)
            .await
    }
}

pub struct SfuSessionManager {
    this: Weak<Self>,
    stage_id: StageId,
    channel: Arc<dyn SignalingChannel>,
    rpc: RouterRpc,
    device: Arc<dyn Device>,
    publisher: Arc<dyn TrackPublisher>,
    send_transport: RwLock<Option<Arc<dyn SendTransport>>>,
    recv_transport: RwLock<Option<Arc<dyn RecvTransport>>>,
    /// Serializes lazy transport creation
    transport_setup: AsyncMutex<()>,
    producers: DashMap<PublicTrackId, ProducerEntry>,
    consumers: DashMap<PublicTrackId, Arc<dyn Consumer>>,
    events: broadcast::Sender<SfuEvent>,
    router_up: AtomicBool,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl SfuSessionManager {
    /// Create a manager and start listening to `channel`.
    ///
    /// Must be called from within a tokio runtime. Nothing is sent to the
    /// router until [`Self::connect`].
    pub fn new(
        stage_id: StageId,
        channel: Arc<dyn SignalingChannel>,
        device: Arc<dyn Device>,
        publisher: Arc<dyn TrackPublisher>,
        config: &SfuConfig,
    ) -> Arc<Self> {
        let channel_events = channel.subscribe();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            stage_id,
            rpc: RouterRpc::new(channel.clone()),
            channel,
            device,
            publisher,
            send_transport: RwLock::new(None),
            recv_transport: RwLock::new(None),
            transport_setup: AsyncMutex::new(()),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            events,
            router_up: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Self::event_loop(
            manager.this.clone(),
            channel_events,
            manager.shutdown.clone(),
        ));

        manager
    }

    /// Create a manager talking to the router over a WebSocket
    pub fn connect_to_router(
        credentials: &Credentials,
        router_url: &str,
        stage_id: StageId,
        device: Arc<dyn Device>,
        publisher: Arc<dyn TrackPublisher>,
        config: &SfuConfig,
    ) -> Result<Arc<Self>> {
        let channel = WebSocketChannel::new(router_url, &stage_id, credentials, config)?;
        Ok(Self::new(
            stage_id,
            Arc::new(channel),
            device,
            publisher,
            config,
        ))
    }

    async fn event_loop(
        this: Weak<Self>,
        mut channel_events: broadcast::Receiver<ChannelEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = channel_events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session manager fell behind router events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let Some(manager) = this.upgrade() else {
                break;
            };
            manager.handle_channel_event(event).await;
        }

        debug!("Session event loop stopped");
    }

    async fn handle_channel_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                if let Err(e) = self.handle_connected().await {
                    error!(stage_id = %self.stage_id, error = %e, "Router session setup failed");
                    self.emit(SfuEvent::Error(e.to_string()));
                }
            }
            ChannelEvent::Disconnected { reason } => self.handle_disconnected(&reason).await,
            ChannelEvent::Notification(notification) => {
                self.handle_notification(notification).await;
            }
        }
    }

    async fn handle_connected(&self) -> Result<()> {
        self.router_up.store(true, Ordering::SeqCst);

        if !self.device.is_loaded() {
            let capabilities = self.rpc.get_rtp_capabilities().await?;
            self.device.load(capabilities).await?;
            debug!(stage_id = %self.stage_id, "Device loaded router capabilities");
        }

        self.send_transport().await?;
        self.recv_transport().await?;

        info!(stage_id = %self.stage_id, "Router session ready");
        self.emit(SfuEvent::Connected);
        Ok(())
    }

    async fn handle_disconnected(&self, reason: &str) {
        if !self.router_up.swap(false, Ordering::SeqCst) {
            return;
        }

        self.close_transports();
        self.retract_producers().await;
        self.release_consumers();

        info!(stage_id = %self.stage_id, reason, "Router session lost");
        self.emit(SfuEvent::Disconnected);
    }

    async fn handle_notification(&self, notification: RouterNotification) {
        match notification {
            RouterNotification::ProducerClosed { producer_id } => {
                match self.producer_key(&producer_id) {
                    Some(key) => self.retract_producer(&key).await,
                    None => debug!(producer_id = %producer_id, "Router closed an unknown producer"),
                }
            }
            RouterNotification::ProducerPaused { producer_id } => {
                if let Some(producer) = self.find_producer(&producer_id) {
                    producer.pause();
                    debug!(producer_id = %producer_id, "Producer paused by router");
                }
            }
            RouterNotification::ProducerResumed { producer_id } => {
                if let Some(producer) = self.find_producer(&producer_id) {
                    producer.resume();
                    debug!(producer_id = %producer_id, "Producer resumed by router");
                }
            }
            RouterNotification::ConsumerClosed { consumer_id } => {
                match self.consumer_key(&consumer_id) {
                    Some(key) => {
                        self.release_consumer(&key);
                    }
                    None => debug!(consumer_id = %consumer_id, "Router closed an unknown consumer"),
                }
            }
            RouterNotification::ConsumerPaused { consumer_id } => {
                if let Some(consumer) = self.find_consumer(&consumer_id) {
                    consumer.pause();
                    debug!(consumer_id = %consumer_id, "Consumer paused by router");
                }
            }
            RouterNotification::ConsumerResumed { consumer_id } => {
                if let Some(consumer) = self.find_consumer(&consumer_id) {
                    consumer.resume();
                    debug!(consumer_id = %consumer_id, "Consumer resumed by router");
                }
            }
            RouterNotification::TransportClosed { transport_id } => {
                self.handle_transport_closed(&transport_id).await;
            }
            RouterNotification::TransportPaused { transport_id }
            | RouterNotification::TransportResumed { transport_id } => {
                debug!(transport_id = %transport_id, "Transport state change has no local effect");
            }
        }
    }

    /// Drop the transport and everything running on it. The next
    /// `add_track`/`consume` creates a new one.
    async fn handle_transport_closed(&self, transport_id: &TransportId) {
        let send = self
            .send_transport
            .read()
            .as_ref()
            .filter(|t| t.id() == transport_id)
            .cloned();
        if let Some(transport) = send {
            self.send_transport.write().take();
            transport.close();
            self.retract_producers().await;
            error!(transport_id = %transport_id, "Send transport closed by router");
            self.emit(SfuEvent::Error(format!(
                "send transport {transport_id} closed by router"
            )));
            return;
        }

        let recv = self
            .recv_transport
            .read()
            .as_ref()
            .filter(|t| t.id() == transport_id)
            .cloned();
        if let Some(transport) = recv {
            self.recv_transport.write().take();
            transport.close();
            self.release_consumers();
            error!(transport_id = %transport_id, "Receive transport closed by router");
            self.emit(SfuEvent::Error(format!(
                "receive transport {transport_id} closed by router"
            )));
            return;
        }

        debug!(transport_id = %transport_id, "Router closed an unknown transport");
    }

    pub async fn connect(&self) -> Result<()> {
        self.ensure_open()?;
        self.channel.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.channel.disconnect().await?;
        self.handle_disconnected("disconnected locally").await;
        Ok(())
    }

    async fn send_transport(&self) -> Result<Arc<dyn SendTransport>> {
        if let Some(transport) = self.current_send_transport() {
            return Ok(transport);
        }
        self.ensure_router_ready()?;

        let _setup = self.transport_setup.lock().await;
        if let Some(transport) = self.current_send_transport() {
            return Ok(transport);
        }

        let options = self.rpc.create_transport(TransportDirection::Send).await?;
        let transport = self
            .device
            .create_send_transport(options, self.transport_listener())
            .await?;
        debug!(transport_id = %transport.id(), "Send transport created");
        *self.send_transport.write() = Some(transport.clone());
        Ok(transport)
    }

    async fn recv_transport(&self) -> Result<Arc<dyn RecvTransport>> {
        if let Some(transport) = self.current_recv_transport() {
            return Ok(transport);
        }
        self.ensure_router_ready()?;

        let _setup = self.transport_setup.lock().await;
        if let Some(transport) = self.current_recv_transport() {
            return Ok(transport);
        }

        let options = self
            .rpc
            .create_transport(TransportDirection::Receive)
            .await?;
        let transport = self
            .device
            .create_recv_transport(options, self.transport_listener())
            .await?;
        debug!(transport_id = %transport.id(), "Receive transport created");
        *self.recv_transport.write() = Some(transport.clone());
        Ok(transport)
    }

    fn current_send_transport(&self) -> Option<Arc<dyn SendTransport>> {
        self.send_transport
            .read()
            .as_ref()
            .filter(|t| !t.is_closed())
            .cloned()
    }

    fn current_recv_transport(&self) -> Option<Arc<dyn RecvTransport>> {
        self.recv_transport
            .read()
            .as_ref()
            .filter(|t| !t.is_closed())
            .cloned()
    }

    /// The router session is up and `transport` is still the send transport
    fn send_transport_is(&self, transport: &Arc<dyn SendTransport>) -> bool {
        self.router_up.load(Ordering::SeqCst)
            && !self.closed.load(Ordering::SeqCst)
            && self
                .current_send_transport()
                .is_some_and(|current| current.id() == transport.id())
    }

    fn recv_transport_is(&self, transport_id: &TransportId) -> bool {
        self.router_up.load(Ordering::SeqCst)
            && !self.closed.load(Ordering::SeqCst)
            && self
                .current_recv_transport()
                .is_some_and(|current| current.id() == transport_id)
    }

    fn transport_listener(&self) -> Arc<dyn TransportListener> {
        Arc::new(RouterTransportListener {
            rpc: self.rpc.clone(),
        })
    }

    fn close_transports(&self) {
        let send = self.send_transport.write().take();
        if let Some(transport) = send {
            transport.close();
        }
        let recv = self.recv_transport.write().take();
        if let Some(transport) = recv {
            transport.close();
        }
    }

    /// Produce `track` and publish it to the stage.
    ///
    /// Returns the producer map after the insert. If publishing fails the
    /// producer is closed again before the error is returned. If the router
    /// session was lost while publishing, the producer is closed, the track
    /// unpublished, and `NotConnected` returned.
    pub async fn add_track(
        &self,
        track: &LocalTrack,
    ) -> Result<BTreeMap<PublicTrackId, ProducerInfo>> {
        self.ensure_open()?;
        let transport = self.send_transport().await?;

        let producer = transport.produce(track).await?;
        debug!(
            producer_id = %producer.id(),
            track_id = %track.id(),
            kind = %track.kind(),
            "Producer created"
        );

        let public_track_id = match self
            .publisher
            .publish_track(&self.stage_id, producer.id(), track.kind())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(producer_id = %producer.id(), error = %e, "Publishing failed, closing producer");
                producer.close();
                if let Err(close_err) = self.rpc.close_producer(producer.id()).await {
                    debug!(error = %close_err, "Router close of unpublished producer failed");
                }
                return Err(e);
            }
        };

        let ended_watch = self.shutdown.child_token();
        self.producers.insert(
            public_track_id.clone(),
            ProducerEntry {
                producer: producer.clone(),
                ended_watch: ended_watch.clone(),
            },
        );
        self.watch_track_end(track, public_track_id.clone(), ended_watch);

        // checked after the insert so a concurrent teardown either sees the
        // entry or leaves it to us
        if !self.send_transport_is(&transport) {
            warn!(producer_id = %producer.id(), "Router session lost while publishing");
            if let Some((_, entry)) = self.producers.remove(&public_track_id) {
                entry.ended_watch.cancel();
                entry.producer.close();
                if let Err(e) = self.publisher.unpublish_track(&public_track_id).await {
                    debug!(error = %e, "Unpublish of stale producer failed");
                }
            }
            producer.close();
            return Err(RtcError::NotConnected);
        }

        info!(
            stage_id = %self.stage_id,
            public_track_id = %public_track_id,
            producer_id = %producer.id(),
            "Track published"
        );
        self.emit(SfuEvent::ProducerAdded {
            public_track_id,
            producer_id: producer.id().clone(),
            kind: track.kind(),
        });

        Ok(self.producers())
    }

    fn watch_track_end(
        &self,
        track: &LocalTrack,
        public_track_id: PublicTrackId,
        watch: CancellationToken,
    ) {
        let ended = track.ended_token();
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = watch.cancelled() => {}
                () = ended.cancelled() => {
                    let Some(manager) = this.upgrade() else { return };
                    debug!(public_track_id = %public_track_id, "Local track ended");
                    if let Err(e) = manager.teardown_producer(&public_track_id).await {
                        if e.is_not_found() {
                            debug!(error = %e, "Ended track was already torn down");
                        } else {
                            warn!(public_track_id = %public_track_id, error = %e, "Teardown of ended track failed");
                        }
                    }
                }
            }
        });
    }

    /// Stop sending the local track with id `track_id`
    pub async fn remove_track(&self, track_id: &TrackId) -> Result<()> {
        let public_track_id = self
            .producers
            .iter()
            .find(|entry| entry.producer.track_id() == track_id)
            .map(|entry| entry.key().clone())
            .ok_or_else(|| RtcError::NotFound(format!("track {track_id}")))?;

        self.teardown_producer(&public_track_id).await
    }

    /// Close locally, then on the router, then unpublish. Every step runs;
    /// the first failure is returned.
    async fn teardown_producer(&self, public_track_id: &PublicTrackId) -> Result<()> {
        let producer = self
            .release_producer(public_track_id)
            .ok_or_else(|| RtcError::NotFound(format!("producer for {public_track_id}")))?;

        let closed = self.rpc.close_producer(producer.id()).await;
        let unpublished = self.publisher.unpublish_track(public_track_id).await;
        closed.and(unpublished)
    }

    /// Local teardown plus unpublish, for producers the router already closed
    async fn retract_producer(&self, public_track_id: &PublicTrackId) {
        if self.release_producer(public_track_id).is_none() {
            return;
        }
        if let Err(e) = self.publisher.unpublish_track(public_track_id).await {
            warn!(public_track_id = %public_track_id, error = %e, "Unpublish failed");
        }
    }

    async fn retract_producers(&self) {
        let keys: Vec<PublicTrackId> = self.producers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.retract_producer(&key).await;
        }
    }

    fn release_producer(&self, public_track_id: &PublicTrackId) -> Option<Arc<dyn Producer>> {
        let (_, entry) = self.producers.remove(public_track_id)?;
        entry.ended_watch.cancel();
        entry.producer.close();

        debug!(
            public_track_id = %public_track_id,
            producer_id = %entry.producer.id(),
            "Producer removed"
        );
        self.emit(SfuEvent::ProducerRemoved {
            public_track_id: public_track_id.clone(),
            producer_id: entry.producer.id().clone(),
        });
        Some(entry.producer)
    }

    /// Consume a public track. Consumers the router creates paused are
    /// resumed before this returns. Consuming a track twice returns the
    /// existing consumer.
    pub async fn consume(&self, track: &PublicTrack) -> Result<ConsumerInfo> {
        self.ensure_open()?;
        if let Some(existing) = self.consumers.get(&track.id) {
            return Ok(consumer_info(existing.value().as_ref()));
        }

        let transport = self.recv_transport().await?;
        let capabilities = self.device.rtp_capabilities().ok_or(RtcError::NotConnected)?;

        let options = self
            .rpc
            .create_consumer(transport.id(), &track.producer_id, &capabilities)
            .await?;
        let paused = options.paused;
        let consumer = transport.consume(options).await?;

        if paused {
            if let Err(e) = self.rpc.resume_consumer(consumer.id()).await {
                consumer.close();
                if let Err(close_err) = self.rpc.close_consumer(consumer.id()).await {
                    debug!(error = %close_err, "Router close of unresumed consumer failed");
                }
                return Err(e);
            }
            consumer.resume();
        }

        self.consumers.insert(track.id.clone(), consumer.clone());
        if !self.recv_transport_is(transport.id()) {
            warn!(consumer_id = %consumer.id(), "Router session lost while consuming");
            self.consumers
                .remove_if(&track.id, |_, current| current.id() == consumer.id());
            consumer.close();
            return Err(RtcError::NotConnected);
        }
        info!(
            stage_id = %self.stage_id,
            public_track_id = %track.id,
            consumer_id = %consumer.id(),
            "Consuming track"
        );
        self.emit(SfuEvent::ConsumerAdded {
            public_track_id: track.id.clone(),
            consumer_id: consumer.id().clone(),
            track: consumer.track(),
        });

        Ok(consumer_info(consumer.as_ref()))
    }

    /// Close the consumer for `public_track_id`. The local consumer is gone
    /// even when the router close fails.
    ///
    /// Returns `NotFound` if the router already closed it; see
    /// [`RtcError::is_not_found`].
    pub async fn stop_consuming(&self, public_track_id: &PublicTrackId) -> Result<()> {
        let consumer = self
            .release_consumer(public_track_id)
            .ok_or_else(|| RtcError::NotFound(format!("consumer for {public_track_id}")))?;
        self.rpc.close_consumer(consumer.id()).await
    }

    fn release_consumer(&self, public_track_id: &PublicTrackId) -> Option<Arc<dyn Consumer>> {
        let (_, consumer) = self.consumers.remove(public_track_id)?;
        consumer.close();

        debug!(
            public_track_id = %public_track_id,
            consumer_id = %consumer.id(),
            "Consumer removed"
        );
        self.emit(SfuEvent::ConsumerRemoved {
            public_track_id: public_track_id.clone(),
            consumer_id: consumer.id().clone(),
        });
        Some(consumer)
    }

    fn release_consumers(&self) {
        let keys: Vec<PublicTrackId> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.release_consumer(&key);
        }
    }

    /// Converge consumers onto `public_tracks`.
    ///
    /// Consumers missing from the list are stopped, new entries are
    /// consumed, everything else is left alone. Tracks backed by this
    /// session's own producers are skipped. A failing track does not stop
    /// the rest; it is reported in [`SyncReport::failed`].
    pub async fn sync_with_public_tracks(
        &self,
        public_tracks: &[PublicTrack],
    ) -> Result<SyncReport> {
        self.ensure_open()?;
        self.ensure_router_ready()?;

        let own: HashSet<ProducerId> = self
            .producers
            .iter()
            .map(|entry| entry.producer.id().clone())
            .collect();
        let wanted: Vec<&PublicTrack> = public_tracks
            .iter()
            .filter(|t| !own.contains(&t.producer_id))
            .collect();
        let wanted_ids: HashSet<&PublicTrackId> = wanted.iter().map(|t| &t.id).collect();

        let stale: Vec<PublicTrackId> = self
            .consumers
            .iter()
            .filter(|entry| !wanted_ids.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut report = SyncReport::default();

        for id in stale {
            match self.stop_consuming(&id).await {
                Ok(()) => report.stopped.push(id),
                Err(e) if e.is_not_found() => {
                    debug!(public_track_id = %id, "Consumer already gone");
                }
                Err(e) => {
                    warn!(public_track_id = %id, error = %e, "Failed to stop consuming");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        for track in wanted {
            if self.consumers.contains_key(&track.id) {
                continue;
            }
            match self.consume(track).await {
                Ok(_) => report.consumed.push(track.id.clone()),
                Err(e) => {
                    warn!(public_track_id = %track.id, error = %e, "Failed to consume");
                    report.failed.push((track.id.clone(), e.to_string()));
                }
            }
        }

        debug!(
            stage_id = %self.stage_id,
            consumed = report.consumed.len(),
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            "Public tracks synced"
        );
        Ok(report)
    }

    /// Detach from the router and release every transport, producer and
    /// consumer. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.router_up.store(false, Ordering::SeqCst);
        self.close_transports();
        self.retract_producers().await;
        self.release_consumers();

        let result = self.channel.disconnect().await;
        info!(stage_id = %self.stage_id, "SFU session closed");
        result
    }

    fn producer_key(&self, producer_id: &ProducerId) -> Option<PublicTrackId> {
        self.producers
            .iter()
            .find(|entry| entry.producer.id() == producer_id)
            .map(|entry| entry.key().clone())
    }

    fn find_producer(&self, producer_id: &ProducerId) -> Option<Arc<dyn Producer>> {
        self.producers
            .iter()
            .find(|entry| entry.producer.id() == producer_id)
            .map(|entry| entry.producer.clone())
    }

    fn consumer_key(&self, consumer_id: &ConsumerId) -> Option<PublicTrackId> {
        self.consumers
            .iter()
            .find(|entry| entry.value().id() == consumer_id)
            .map(|entry| entry.key().clone())
    }

    fn find_consumer(&self, consumer_id: &ConsumerId) -> Option<Arc<dyn Consumer>> {
        self.consumers
            .iter()
            .find(|entry| entry.value().id() == consumer_id)
            .map(|entry| entry.value().clone())
    }

    fn emit(&self, event: SfuEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtcError::Closed);
        }
        Ok(())
    }

    fn ensure_router_ready(&self) -> Result<()> {
        if self.router_up.load(Ordering::SeqCst) && self.device.is_loaded() {
            Ok(())
        } else {
            Err(RtcError::NotConnected)
        }
    }

    #[must_use]
    pub fn stage_id(&self) -> &StageId {
        &self.stage_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SfuEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn producers(&self) -> BTreeMap<PublicTrackId, ProducerInfo> {
        self.producers
            .iter()
            .map(|entry| (entry.key().clone(), producer_info(entry.producer.as_ref())))
            .collect()
    }

    #[must_use]
    pub fn consumers(&self) -> BTreeMap<PublicTrackId, ConsumerInfo> {
        self.consumers
            .iter()
            .map(|entry| (entry.key().clone(), consumer_info(entry.value().as_ref())))
            .collect()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.connection_state()
    }

    /// Both transports exist
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.current_send_transport().is_some() && self.current_recv_transport().is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SfuSessionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
