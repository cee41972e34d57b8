//! Event envelope
//!
//! The durable unit of replication. Every change that crosses node boundaries
//! is wrapped in an `Event`, which carries the ordering metadata needed to
//! replay it and the three confirmation flags that track how far it has
//! travelled.

use crate::event::ordering::now_millis;
use crate::types::*;
use crate::version::PROTOCOL_VERSION;
use crate::{Error, Result};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Replicated event
#[derive(Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize, Debug)]
pub struct Event {
    /// Globally unique identifier, the dedup key on import
    #[n(0)]
    pub id: EventId,

    /// Envelope protocol version of the producing node
    #[n(1)]
    pub protocol_version: u32,

    /// Sequence assigned by the origin's store on append
    #[n(2)]
    pub local_sequence_number: u64,

    /// Creation time in milliseconds since UNIX epoch
    #[n(3)]
    pub occurred_time: u64,

    /// Facility that produced the event
    #[n(4)]
    pub sender_id: FacilityId,

    /// Facility the event is addressed to, if any
    #[n(5)]
    pub receiver_id: Option<FacilityId>,

    /// Causal group; group members replay in strict sequence order
    #[n(6)]
    pub group_id: Option<GroupId>,

    /// Position inside the group (dense, starting at zero)
    #[n(7)]
    pub group_sequence_number: Option<u64>,

    /// Optional causal parent
    #[n(8)]
    pub parent_id: Option<EventId>,

    /// Serialized business object. `None` once archived.
    #[n(9)]
    pub payload: Option<Vec<u8>>,

    #[n(10)]
    pub category: EventCategory,

    /// The online web holds this event
    #[n(11)]
    pub online_web_synced: bool,

    /// The receiving facility holds this event
    #[n(12)]
    pub receiver_synced: bool,

    /// This node has applied the event to its ledger
    #[n(13)]
    pub local_replayed: bool,

    /// When the online web accepted the event (milliseconds)
    #[n(14)]
    pub synced_time: Option<u64>,

    /// Payload moved to the backup store. Terminal.
    #[n(15)]
    pub archived: bool,
}

/// Business category of an event payload
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize, Debug)]
#[cbor(index_only)]
pub enum EventCategory {
    /// Batch of stock card movements
    #[n(0)]
    StockCard,

    /// Physical inventory count submitted as stock card movements
    #[n(1)]
    PhysicalInventory,

    /// Requisition document; no direct ledger effect
    #[n(2)]
    Requisition,
}

impl Event {
    /// Create an unconfirmed event produced by `sender`
    ///
    /// Events without a receiver need no receiver confirmation, so that flag
    /// starts out set.
    pub fn new(sender_id: FacilityId, category: EventCategory, payload: Vec<u8>) -> Self {
        Self {
            id: EventId::new(),
            protocol_version: PROTOCOL_VERSION,
            local_sequence_number: 0,
            occurred_time: now_millis(),
            sender_id,
            receiver_id: None,
            group_id: None,
            group_sequence_number: None,
            parent_id: None,
            payload: Some(payload),
            category,
            online_web_synced: false,
            receiver_synced: true,
            local_replayed: false,
            synced_time: None,
            archived: false,
        }
    }

    /// Address the event to another facility
    pub fn with_receiver(mut self, receiver: FacilityId) -> Self {
        self.receiver_id = Some(receiver);
        self.receiver_synced = false;
        self
    }

    /// Place the event at `sequence` inside `group`
    pub fn with_group(mut self, group: GroupId, sequence: u64) -> Self {
        self.group_id = Some(group);
        self.group_sequence_number = Some(sequence);
        self
    }

    pub fn with_parent(mut self, parent: EventId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// All three confirmation flags are set
    pub fn is_fully_confirmed(&self) -> bool {
        self.online_web_synced && self.receiver_synced && self.local_replayed
    }

    /// Eligible for the archival task
    pub fn is_archivable(&self) -> bool {
        self.is_fully_confirmed() && !self.archived
    }

    /// Sort key for default-group replay: (synced time, local sequence)
    pub fn replay_key(&self) -> (u64, u64) {
        (self.synced_time.unwrap_or(0), self.local_sequence_number)
    }

    /// Canonical CBOR encoding (wire and storage format)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        minicbor::to_vec(self)
            .map_err(|e| Error::Serialization(format!("Failed to encode event: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        minicbor::decode(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to decode event: {}", e)))
    }

    /// Size of the encoded envelope, used for push budgeting
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(self.to_bytes()?.len())
    }
}
