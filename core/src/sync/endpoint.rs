//! Online web side of the exchange
//!
//! `OnlineWebEndpoint` serves push and pull for every local machine.
//! `InProcessTransport` connects a local machine to an endpoint living in the
//! same process, passing every request and response through the CBOR wire
//! encoding.

use super::exchange::{PullRequest, PullResponse, PushRequest, PushResponse, Transport};
use super::import::Importer;
use crate::store::EventStore;
use crate::version::is_protocol_compatible;
use crate::{Error, Result};
use async_trait::async_trait;
use minicbor::{Decode, Encode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct OnlineWebEndpoint {
    store: Arc<dyn EventStore>,
    importer: Arc<Importer>,
}

impl OnlineWebEndpoint {
    /// `importer` must be built with the online web policy
    pub fn new(store: Arc<dyn EventStore>, importer: Arc<Importer>) -> Self {
        Self { store, importer }
    }

    /// Accept pushed events; refusals are reported per event
    pub async fn handle_push(&self, request: PushRequest) -> Result<PushResponse> {
        let mut errors = HashMap::new();
        let mut candidates = Vec::with_capacity(request.events.len());

        for event in request.events {
            if event.sender_id != request.sender {
                errors.insert(event.id, format!("event sent on behalf of {}", event.sender_id));
            } else if !is_protocol_compatible(event.protocol_version) {
                errors.insert(
                    event.id,
                    format!("incompatible protocol version {}", event.protocol_version),
                );
            } else {
                candidates.push(event);
            }
        }

        let ids: Vec<_> = candidates.iter().map(|e| e.id).collect();
        if let Err(e) = self.importer.import(candidates).await {
            // The batch was not stored at all, so none of it is acknowledged
            tracing::warn!(sender = %request.sender, error = %e, "Push import failed");
            for id in ids {
                errors.insert(id, e.to_string());
            }
        }

        if !errors.is_empty() {
            tracing::info!(sender = %request.sender, refused = errors.len(), "Refused pushed events");
        }
        Ok(PushResponse { errors })
    }

    /// Take receipts, then hand out addressed events and acknowledgements
    pub async fn handle_pull(&self, request: PullRequest) -> Result<PullResponse> {
        self.store.mark_receiver_synced(&request.received)?;

        let events = self.store.find_for_receivers(&request.facility_ids)?;
        let acknowledged = self.store.find_receiver_confirmed(&request.facility_ids)?;

        tracing::debug!(
            events = events.len(),
            acknowledged = acknowledged.len(),
            receipts = request.received.len(),
            "Served pull"
        );
        Ok(PullResponse {
            events,
            acknowledged,
            max_sequence: self.store.last_sequence(),
        })
    }
}

/// Transport to an endpoint in the same process
pub struct InProcessTransport {
    endpoint: Arc<OnlineWebEndpoint>,
    online: AtomicBool,
}

impl InProcessTransport {
    pub fn new(endpoint: Arc<OnlineWebEndpoint>) -> Self {
        Self {
            endpoint,
            online: AtomicBool::new(true),
        }
    }

    /// Simulate connectivity loss or recovery
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Network("online web unreachable".to_string()))
        }
    }
}

/// Encode and decode a message the way it would cross the wire
fn over_wire<T>(message: &T) -> Result<T>
where
    T: Encode<()> + for<'b> Decode<'b, ()>,
{
    let bytes = minicbor::to_vec(message)
        .map_err(|e| Error::Serialization(format!("Failed to encode message: {}", e)))?;
    minicbor::decode(&bytes).map_err(|e| Error::Serialization(format!("Failed to decode message: {}", e)))
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn heartbeat(&self) -> Result<()> {
        self.ensure_online()
    }

    async fn push(&self, request: PushRequest) -> Result<PushResponse> {
        self.ensure_online()?;
        let response = self.endpoint.handle_push(over_wire(&request)?).await?;
        over_wire(&response)
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse> {
        self.ensure_online()?;
        let response = self.endpoint.handle_pull(over_wire(&request)?).await?;
        over_wire(&response)
    }
}
