//! Frames exchanged between peers of one room.
//!
//! Wire format (bincode, standard config):
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────┐
//! │ msg_type │ from      │ to (option)  │ payload  │
//! │ 1 byte   │ varint    │ 1 + varint   │ variable │
//! └──────────┴───────────┴──────────────┴──────────┘
//! ```
//!
//! Document payloads are yrs v1 updates / state vectors passed through
//! untouched. Awareness payloads are a bincode [`AwarenessUpdate`] whose
//! states travel as JSON text.

use crate::awareness::{AwarenessUpdate, ClientId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// State vector; the receiver answers with what the sender is missing.
    SyncStep1 = 1,
    /// Diff answering a SyncStep1.
    SyncStep2 = 2,
    /// Incremental document update.
    Update = 3,
    /// Awareness states.
    Awareness = 4,
    /// A member left the room; the hub sends it on disconnect.
    Leave = 5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub msg_type: MessageType,
    pub from: ClientId,
    /// Addressed to one peer; `None` is for everyone in the room.
    pub to: Option<ClientId>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn sync_step1(from: ClientId, state_vector: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep1,
            from,
            to: None,
            payload: state_vector,
        }
    }

    pub fn sync_step2(from: ClientId, to: ClientId, diff: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::SyncStep2,
            from,
            to: Some(to),
            payload: diff,
        }
    }

    pub fn update(from: ClientId, update: Vec<u8>) -> Self {
        Self {
            msg_type: MessageType::Update,
            from,
            to: None,
            payload: update,
        }
    }

    pub fn awareness(from: ClientId, update: &AwarenessUpdate) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(update, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            msg_type: MessageType::Awareness,
            from,
            to: None,
            payload,
        })
    }

    pub fn leave(from: ClientId) -> Self {
        Self {
            msg_type: MessageType::Leave,
            from,
            to: None,
            payload: Vec::new(),
        }
    }

    /// Address this frame to a single peer.
    pub fn addressed_to(mut self, to: ClientId) -> Self {
        self.to = Some(to);
        self
    }

    /// Whether `client` should process this frame.
    pub fn is_for(&self, client: ClientId) -> bool {
        self.from != client && self.to.map_or(true, |to| to == client)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (frame, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(frame)
    }

    /// Parse an awareness payload.
    pub fn awareness_update(&self) -> Result<AwarenessUpdate, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType);
        }
        let (update, _) = bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(update)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("invalid message type")]
    InvalidMessageType,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("receiver lagged, {0} frames skipped")]
    Lagged(u64),
}
