//! Outbound message abstraction consumed by the scheduler
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stable identifier for an outbound message
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters of the identifier, used in log lines and summaries
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        MessageId::new(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        MessageId::new(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the scheduler needs to know about a message.
///
/// Messages are read-only to the scheduler: it never inspects the payload,
/// only the identity, whether it is a control message, and its size for
/// rate-limiter accounting.
pub trait Message {
    fn identifier(&self) -> &MessageId;
    /// System messages skip the send delay and the rate limiter
    fn is_system_message(&self) -> bool;
    fn byte_len(&self) -> usize;
}

impl<T: Message + ?Sized> Message for Arc<T> {
    fn identifier(&self) -> &MessageId {
        (**self).identifier()
    }

    fn is_system_message(&self) -> bool {
        (**self).is_system_message()
    }

    fn byte_len(&self) -> usize {
        (**self).byte_len()
    }
}

impl<T: Message + ?Sized> Message for Box<T> {
    fn identifier(&self) -> &MessageId {
        (**self).identifier()
    }

    fn is_system_message(&self) -> bool {
        (**self).is_system_message()
    }

    fn byte_len(&self) -> usize {
        (**self).byte_len()
    }
}

/// Plain serialized message ready for a peer
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub payload: Vec<u8>,
    pub system: bool,
}

impl OutboundMessage {
    pub fn new(id: impl Into<MessageId>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            system: false,
        }
    }

    pub fn system(id: impl Into<MessageId>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
            system: true,
        }
    }
}

impl Message for OutboundMessage {
    fn identifier(&self) -> &MessageId {
        &self.id
    }

    fn is_system_message(&self) -> bool {
        self.system
    }

    fn byte_len(&self) -> usize {
        self.payload.len()
    }
}
