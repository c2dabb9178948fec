//! Message envelopes and correlation identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Token linking a transport acknowledgment back to its envelope.
///
/// Assigned once at submission and reused for every retry of the same
/// envelope, so a late acknowledgment for an earlier attempt still resolves
/// the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One message submission: destination, payload and retry state.
///
/// Envelopes are moved, never cloned, between the queue, the in-flight table
/// and the retry buffer. Topic and payload are reference counted so the
/// transport can be handed a view without taking ownership.
#[derive(Debug)]
pub struct Envelope {
    correlation_id: CorrelationId,
    topic: Arc<str>,
    payload: Arc<[u8]>,
    attempt: u32,
    created_at: DateTime<Utc>,
}

impl Envelope {
    /// Create a first-attempt envelope with a new correlation id.
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            topic: topic.into(),
            payload: payload.into(),
            attempt: 1,
            created_at: Utc::now(),
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1-based attempt number of the next (or current) send.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn bump_attempt(&mut self) {
        self.attempt += 1;
    }

    /// Borrow-free view handed to the transport.
    pub fn to_outbound(&self) -> OutboundMessage {
        OutboundMessage {
            correlation_id: self.correlation_id,
            topic: Arc::clone(&self.topic),
            payload: Arc::clone(&self.payload),
            attempt: self.attempt,
        }
    }
}

/// What a transport receives for a single send.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub correlation_id: CorrelationId,
    pub topic: Arc<str>,
    pub payload: Arc<[u8]>,
    pub attempt: u32,
}
