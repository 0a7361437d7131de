//! Request/response correlation over an outbound frame queue

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::protocol::{Frame, RouterMethod, RouterNotification};
use crate::error::{Result, RtcError};

pub struct RpcClient {
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Result<Value>>>,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    timeout: Duration,
}

impl RpcClient {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            outbound: Mutex::new(None),
            timeout,
        }
    }

    /// Route requests to a freshly opened connection
    pub fn attach(&self, outbound: mpsc::Sender<Frame>) {
        *self.outbound.lock() = Some(outbound);
    }

    /// Stop accepting requests and fail the ones still in flight
    pub fn detach(&self) {
        self.outbound.lock().take();
        self.fail_all();
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.outbound.lock().is_some()
    }

    pub async fn request(&self, method: RouterMethod, data: Value) -> Result<Value> {
        let outbound = self.outbound.lock().clone().ok_or(RtcError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        debug!(id, method = %method, "Sending router request");
        if outbound
            .send(Frame::Request { id, method, data })
            .await
            .is_err()
        {
            self.pending.remove(&id);
            return Err(RtcError::ChannelClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RtcError::ChannelClosed),
            Err(_) => {
                self.pending.remove(&id);
                warn!(id, method = %method, "Router request timed out");
                Err(RtcError::Timeout)
            }
        }
    }

    /// Resolve a pending request. Responses nobody waits for any more are
    /// dropped.
    pub fn resolve(&self, id: u64, ok: bool, data: Option<Value>, error: Option<String>) {
        let Some((_, tx)) = self.pending.remove(&id) else {
            debug!(id, "Dropping response for unknown request");
            return;
        };

        let result = if ok {
            Ok(data.unwrap_or(Value::Null))
        } else {
            Err(RtcError::Rejected(error.unwrap_or_default()))
        };
        let _ = tx.send(result);
    }

    /// Dispatch an inbound frame, handing notifications back to the caller
    pub fn handle_frame(&self, frame: Frame) -> Option<RouterNotification> {
        match frame {
            Frame::Response {
                id,
                ok,
                data,
                error,
            } => {
                self.resolve(id, ok, data, error);
                None
            }
            Frame::Notification(notification) => Some(notification),
            Frame::Request { id, method, .. } => {
                warn!(id, method = %method, "Ignoring request sent by router");
                None
            }
        }
    }

    pub fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(RtcError::ChannelClosed));
            }
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
