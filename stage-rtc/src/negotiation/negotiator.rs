//! Perfect negotiation state machine
//!
//! The negotiator owns one [`PeerConnection`] and keeps two flags next to the
//! connection's own signaling state:
//!
//! - `making_offer`: set while a local offer is being created, applied and
//!   handed to the signaling layer.
//! - `pending_answer`: set while a remote answer is being applied, so the
//!   connection counts as stable for collision detection.
//!
//! `ignore_offer` records that the last remote offer was dropped because of
//! glare; candidates that fail to apply while it is set are discarded.
//!
//! Flags live behind a synchronous lock that is never held across an
//! `.await`, so offers, remote descriptions and candidates may interleave at
//! every suspension point exactly as they would on a browser event loop.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{
    is_polite, IceCandidate, PeerConnection, PeerConnectionEvent, SdpType, SessionDescription,
    SignalingState,
};
use crate::error::{Result, RtcError};
use crate::track::{LocalTrack, RemoteTrack};
use crate::types::PeerId;

/// Capabilities the owner supplies to a negotiator
#[async_trait]
pub trait NegotiationHandler: Send + Sync {
    /// A local candidate was gathered (`None` when gathering completes)
    async fn on_ice_candidate(&self, candidate: Option<IceCandidate>);

    /// A local offer or answer must reach the remote peer. The offer path
    /// waits for this to finish before clearing `making_offer`.
    async fn on_session_description(&self, description: SessionDescription) -> Result<()>;

    async fn on_remote_track(&self, track: RemoteTrack);

    /// An automatically triggered offer failed; the owner usually closes and
    /// recreates the negotiator.
    async fn on_negotiation_error(&self, _error: RtcError) {}
}

#[derive(Debug, Default)]
struct NegotiationFlags {
    making_offer: bool,
    ignore_offer: bool,
    pending_answer: bool,
}

pub struct PeerConnectionNegotiator {
    local_peer_id: PeerId,
    remote_peer_id: PeerId,
    polite: bool,
    connection: Arc<dyn PeerConnection>,
    handler: Arc<dyn NegotiationHandler>,
    flags: Mutex<NegotiationFlags>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl PeerConnectionNegotiator {
    /// Create a negotiator and start draining `events` from `connection`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        local_peer_id: PeerId,
        remote_peer_id: PeerId,
        connection: Arc<dyn PeerConnection>,
        events: mpsc::UnboundedReceiver<PeerConnectionEvent>,
        handler: Arc<dyn NegotiationHandler>,
    ) -> Result<Arc<Self>> {
        if local_peer_id == remote_peer_id {
            return Err(RtcError::ProtocolViolation {
                operation: "create negotiator",
                expected: "distinct peer ids".to_string(),
                actual: local_peer_id.to_string(),
            });
        }

        let polite = is_polite(&local_peer_id, &remote_peer_id);
        let negotiator = Arc::new(Self {
            local_peer_id,
            remote_peer_id,
            polite,
            connection,
            handler,
            flags: Mutex::new(NegotiationFlags::default()),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        info!(
            local_peer_id = %negotiator.local_peer_id,
            remote_peer_id = %negotiator.remote_peer_id,
            polite,
            "Peer negotiator created"
        );

        tokio::spawn(Self::event_loop(
            Arc::downgrade(&negotiator),
            events,
            negotiator.shutdown.clone(),
        ));

        Ok(negotiator)
    }

    /// Connection events are handled one at a time, in arrival order.
    async fn event_loop(
        negotiator: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<PeerConnectionEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(negotiator) = negotiator.upgrade() else {
                break;
            };
            negotiator.handle_event(event).await;
        }

        debug!("Negotiator event loop stopped");
    }

    async fn handle_event(&self, event: PeerConnectionEvent) {
        match event {
            // connections signal again once they are back to stable
            PeerConnectionEvent::NegotiationNeeded
                if self.connection.signaling_state() != SignalingState::Stable =>
            {
                debug!(
                    remote_peer_id = %self.remote_peer_id,
                    state = %self.connection.signaling_state(),
                    "Negotiation needed outside stable state, deferred"
                );
            }
            PeerConnectionEvent::NegotiationNeeded => match self.make_offer().await {
                Ok(()) | Err(RtcError::Closed) => {}
                Err(RtcError::OfferInProgress) => {
                    debug!(
                        remote_peer_id = %self.remote_peer_id,
                        "Negotiation needed while an offer is in flight, dropped"
                    );
                }
                Err(e) => {
                    error!(
                        remote_peer_id = %self.remote_peer_id,
                        error = %e,
                        "Automatic offer failed"
                    );
                    self.handler.on_negotiation_error(e).await;
                }
            },
            PeerConnectionEvent::IceCandidate(candidate) => {
                self.handler.on_ice_candidate(candidate).await;
            }
            PeerConnectionEvent::Track(track) => {
                debug!(
                    remote_peer_id = %self.remote_peer_id,
                    track_id = %track.id,
                    kind = %track.kind,
                    "Remote track received"
                );
                self.handler.on_remote_track(track).await;
            }
        }
    }

    /// Attach a local track. The connection reports that negotiation is
    /// needed, which triggers [`Self::make_offer`] from the event loop.
    pub async fn add_local_track(&self, track: &LocalTrack) -> Result<()> {
        self.ensure_open()?;
        self.connection.add_track(track).await?;
        debug!(
            remote_peer_id = %self.remote_peer_id,
            track_id = %track.id(),
            kind = %track.kind(),
            "Local track attached"
        );
        Ok(())
    }

    /// Create, apply and send a local offer.
    ///
    /// Fails fast with [`RtcError::OfferInProgress`] instead of queuing when
    /// another offer is still being made.
    pub async fn make_offer(&self) -> Result<()> {
        self.ensure_open()?;
        {
            let mut flags = self.flags.lock();
            if flags.making_offer {
                return Err(RtcError::OfferInProgress);
            }
            flags.making_offer = true;
        }

        let result = self.send_offer().await;
        self.flags.lock().making_offer = false;
        result
    }

    async fn send_offer(&self) -> Result<()> {
        let state = self.connection.signaling_state();
        if state != SignalingState::Stable {
            return Err(RtcError::unexpected_state(
                "make offer",
                SignalingState::Stable,
                state,
            ));
        }

        let offer = self.connection.create_offer().await?;
        self.connection.set_local_description(offer.clone()).await?;

        let state = self.connection.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            return Err(RtcError::unexpected_state(
                "apply local offer",
                SignalingState::HaveLocalOffer,
                state,
            ));
        }

        debug!(remote_peer_id = %self.remote_peer_id, "Sending offer");
        self.handler.on_session_description(offer).await
    }

    /// Apply an offer or answer delivered by the signaling layer.
    ///
    /// A colliding offer is dropped on the impolite side; the polite side
    /// discards its own offer and answers instead.
    pub async fn receive_session_description(
        &self,
        description: SessionDescription,
    ) -> Result<()> {
        self.ensure_open()?;
        let is_offer = description.sdp_type == SdpType::Offer;

        let collision = {
            let mut flags = self.flags.lock();
            let state = self.connection.signaling_state();
            let is_stable = state == SignalingState::Stable
                || (state == SignalingState::HaveLocalOffer && flags.pending_answer);
            let collision = is_offer && (flags.making_offer || !is_stable);

            flags.ignore_offer = !self.polite && collision;
            if flags.ignore_offer {
                info!(
                    remote_peer_id = %self.remote_peer_id,
                    state = %state,
                    "Ignoring colliding offer"
                );
                return Ok(());
            }
            flags.pending_answer = description.sdp_type == SdpType::Answer;
            collision
        };

        if collision && self.connection.signaling_state() == SignalingState::HaveLocalOffer {
            debug!(remote_peer_id = %self.remote_peer_id, "Discarding local offer");
            self.connection.discard_local_offer().await?;
        }

        let applied = self.connection.set_remote_description(description).await;
        self.flags.lock().pending_answer = false;
        applied?;

        if is_offer {
            let answer = self.connection.create_answer().await?;
            self.connection.set_local_description(answer.clone()).await?;

            let state = self.connection.signaling_state();
            if state != SignalingState::Stable {
                return Err(RtcError::unexpected_state(
                    "apply local answer",
                    SignalingState::Stable,
                    state,
                ));
            }

            debug!(remote_peer_id = %self.remote_peer_id, "Sending answer");
            self.handler.on_session_description(answer).await?;
        } else {
            let state = self.connection.signaling_state();
            if state != SignalingState::Stable {
                return Err(RtcError::unexpected_state(
                    "apply remote answer",
                    SignalingState::Stable,
                    state,
                ));
            }
            debug!(remote_peer_id = %self.remote_peer_id, "Negotiation round complete");
        }

        Ok(())
    }

    /// Apply a remote ICE candidate. Failures are swallowed while the offer
    /// round they belong to is being ignored.
    pub async fn receive_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.ensure_open()?;
        match self.connection.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.is_ignoring_offer() {
                    debug!(
                        remote_peer_id = %self.remote_peer_id,
                        error = %e,
                        "Dropped candidate of an ignored offer"
                    );
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Detach event handlers, then close the connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();
        self.connection.detach_handlers();
        self.connection.close().await?;

        info!(
            local_peer_id = %self.local_peer_id,
            remote_peer_id = %self.remote_peer_id,
            "Peer negotiator closed"
        );
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RtcError::Closed);
        }
        Ok(())
    }

    #[must_use]
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    #[must_use]
    pub fn remote_peer_id(&self) -> &PeerId {
        &self.remote_peer_id
    }

    #[must_use]
    pub const fn is_polite(&self) -> bool {
        self.polite
    }

    #[must_use]
    pub fn is_making_offer(&self) -> bool {
        self.flags.lock().making_offer
    }

    #[must_use]
    pub fn is_ignoring_offer(&self) -> bool {
        self.flags.lock().ignore_offer
    }

    #[must_use]
    pub fn signaling_state(&self) -> SignalingState {
        self.connection.signaling_state()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for PeerConnectionNegotiator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
