//! Local and remote media track handles
//!
//! - [`LocalTrack`] wraps a sample-fed webrtc track that can be attached to a
//!   peer connection or produced through an SFU send transport. Stopping it
//!   fires the "ended" signal that tears its producer down.
//! - [`RemoteTrack`] describes a track received from a peer or consumed from
//!   the router.

use crate::types::TrackId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Codec used when a local track is created without an explicit one
    #[must_use]
    pub fn default_codec(&self) -> RTCRtpCodecCapability {
        match self {
            Self::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            Self::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// Locally captured media track
///
/// Clones share the same underlying track and the same ended signal.
#[derive(Clone)]
pub struct LocalTrack {
    id: TrackId,
    kind: TrackKind,
    sample_track: Arc<TrackLocalStaticSample>,
    ended: CancellationToken,
}

impl LocalTrack {
    /// Create a track with the default codec for `kind`
    pub fn new(kind: TrackKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let sample_track = Arc::new(TrackLocalStaticSample::new(
            kind.default_codec(),
            id.into(),
            stream_id.into(),
        ));
        Self::from_sample_track(sample_track)
    }

    /// Wrap an existing sample track
    pub fn from_sample_track(sample_track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            id: TrackId::new(sample_track.id()),
            kind: TrackKind::from(sample_track.kind()),
            sample_track,
            ended: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        self.sample_track.stream_id()
    }

    /// Underlying track samples are written to
    #[must_use]
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sample_track)
    }

    /// Stop the track, firing its ended signal
    pub fn stop(&self) {
        self.ended.cancel();
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Token cancelled when the track ends; cloned so watchers can own it
    #[must_use]
    pub fn ended_token(&self) -> CancellationToken {
        self.ended.clone()
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Media track received from a remote participant
#[derive(Clone)]
pub struct RemoteTrack {
    pub id: TrackId,
    pub kind: TrackKind,
    pub stream_id: Option<String>,
    /// Present when the track arrived over a webrtc-rs peer connection
    pub source: Option<Arc<TrackRemote>>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<TrackId>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            stream_id: None,
            source: None,
        }
    }

    pub fn from_webrtc(track: Arc<TrackRemote>) -> Self {
        Self {
            id: TrackId::new(track.id().to_string()),
            kind: TrackKind::from(track.kind()),
            stream_id: Some(track.stream_id().to_string()),
            source: Some(track),
        }
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}
