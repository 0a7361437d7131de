//! Typed router requests

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::channel::SignalingChannel;
use super::protocol::RouterMethod;
use crate::error::Result;
use crate::sfu::parameters::{
    ConsumerOptions, DtlsParameters, RtpCapabilities, RtpParameters, TransportDirection,
    TransportOptions,
};
use crate::track::TrackKind;
use crate::types::{ConsumerId, ProducerId, TransportId};

#[derive(Deserialize)]
struct Created<T> {
    id: T,
}

/// Router request helpers over a [`SignalingChannel`]
#[derive(Clone)]
pub struct RouterRpc {
    channel: Arc<dyn SignalingChannel>,
}

impl RouterRpc {
    pub fn new(channel: Arc<dyn SignalingChannel>) -> Self {
        Self { channel }
    }

    async fn call<T: DeserializeOwned>(&self, method: RouterMethod, data: Value) -> Result<T> {
        let value = self.channel.request(method, data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// For requests whose response body carries nothing of interest
    async fn call_unit(&self, method: RouterMethod, data: Value) -> Result<()> {
        self.channel.request(method, data).await?;
        Ok(())
    }

    pub async fn get_rtp_capabilities(&self) -> Result<RtpCapabilities> {
        self.call(RouterMethod::GetRtpCapabilities, Value::Null).await
    }

    pub async fn create_transport(&self, direction: TransportDirection) -> Result<TransportOptions> {
        self.call(
            RouterMethod::CreateTransport,
            json!({ "direction": direction }),
        )
        .await
    }

    pub async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &DtlsParameters,
    ) -> Result<()> {
        self.call_unit(
            RouterMethod::ConnectTransport,
            json!({
                "transport_id": transport_id,
                "dtls_parameters": dtls_parameters,
            }),
        )
        .await
    }

    pub async fn create_producer(
        &self,
        transport_id: &TransportId,
        kind: TrackKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<ProducerId> {
        let created: Created<ProducerId> = self
            .call(
                RouterMethod::CreateProducer,
                json!({
                    "transport_id": transport_id,
                    "kind": kind,
                    "rtp_parameters": rtp_parameters,
                }),
            )
            .await?;
        Ok(created.id)
    }

    pub async fn pause_producer(&self, producer_id: &ProducerId) -> Result<()> {
        self.call_unit(
            RouterMethod::PauseProducer,
            json!({ "producer_id": producer_id }),
        )
        .await
    }

    pub async fn resume_producer(&self, producer_id: &ProducerId) -> Result<()> {
        self.call_unit(
            RouterMethod::ResumeProducer,
            json!({ "producer_id": producer_id }),
        )
        .await
    }

    pub async fn close_producer(&self, producer_id: &ProducerId) -> Result<()> {
        self.call_unit(
            RouterMethod::CloseProducer,
            json!({ "producer_id": producer_id }),
        )
        .await
    }

    pub async fn create_consumer(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumerOptions> {
        self.call(
            RouterMethod::CreateConsumer,
            json!({
                "transport_id": transport_id,
                "producer_id": producer_id,
                "rtp_capabilities": rtp_capabilities,
            }),
        )
        .await
    }

    pub async fn pause_consumer(&self, consumer_id: &ConsumerId) -> Result<()> {
        self.call_unit(
            RouterMethod::PauseConsumer,
            json!({ "consumer_id": consumer_id }),
        )
        .await
    }

    pub async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<()> {
        self.call_unit(
            RouterMethod::ResumeConsumer,
            json!({ "consumer_id": consumer_id }),
        )
        .await
    }

    pub async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<()> {
        self.call_unit(
            RouterMethod::CloseConsumer,
            json!({ "consumer_id": consumer_id }),
        )
        .await
    }
}
