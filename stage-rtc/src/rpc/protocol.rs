//! Router signaling wire format
//!
//! Every WebSocket text message carries one JSON [`Frame`]:
//!
//! ```text
//! {"kind":"request","id":7,"method":"create-transport","data":{"direction":"send"}}
//! {"kind":"response","id":7,"ok":true,"data":{...}}
//! {"kind":"response","id":7,"ok":false,"error":"transport limit reached"}
//! {"kind":"notification","method":"producer-closed","data":{"producer_id":"p1"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::types::{ConsumerId, ProducerId, TransportId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Frame {
    Request {
        id: u64,
        method: RouterMethod,
        #[serde(default)]
        data: Value,
    },
    Response {
        id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Notification(RouterNotification),
}

/// Request names understood by the media router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouterMethod {
    GetRtpCapabilities,
    CreateTransport,
    ConnectTransport,
    CreateProducer,
    PauseProducer,
    ResumeProducer,
    CloseProducer,
    CreateConsumer,
    PauseConsumer,
    ResumeConsumer,
    CloseConsumer,
}

impl RouterMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetRtpCapabilities => "get-rtp-capabilities",
            Self::CreateTransport => "create-transport",
            Self::ConnectTransport => "connect-transport",
            Self::CreateProducer => "create-producer",
            Self::PauseProducer => "pause-producer",
            Self::ResumeProducer => "resume-producer",
            Self::CloseProducer => "close-producer",
            Self::CreateConsumer => "create-consumer",
            Self::PauseConsumer => "pause-consumer",
            Self::ResumeConsumer => "resume-consumer",
            Self::CloseConsumer => "close-consumer",
        }
    }
}

impl fmt::Display for RouterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events pushed by the router without a preceding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "kebab-case")]
pub enum RouterNotification {
    ProducerClosed { producer_id: ProducerId },
    ProducerPaused { producer_id: ProducerId },
    ProducerResumed { producer_id: ProducerId },
    ConsumerClosed { consumer_id: ConsumerId },
    ConsumerPaused { consumer_id: ConsumerId },
    ConsumerResumed { consumer_id: ConsumerId },
    TransportClosed { transport_id: TransportId },
    TransportPaused { transport_id: TransportId },
    TransportResumed { transport_id: TransportId },
}
