//! Protocol messages and their wire shape.
//!
//! A [`Message`] is either a bare clock announcement or a clock plus a
//! non-empty list of opaque changes. "No changes" and "empty changes" are not
//! the same thing on the wire: `changes` is omitted for the former and the
//! latter is rejected at decode time, so the distinction never reaches the
//! reconciliation code.
//!
//! Wire form (JSON shown):
//!
//! ```json
//! {"docId": "notes", "clock": {"alice": 3}, "changes": [ ... ]}
//! ```
//!
//! `docId` only appears on [`DocMessage`]. A missing or `null` `clock`
//! decodes as the empty clock.

use std::ops::Deref;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::VectorClock;
use crate::error::MessageError;

/// Opaque identity of a remote party.
pub type PeerId = String;

/// Identity of a replicated document in the multi-document protocol.
pub type DocId = String;

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// A non-empty, ordered list of opaque changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Changes<C>(Vec<C>);

impl<C> Changes<C> {
    /// Wrap `changes`, or `None` when the vector is empty.
    #[must_use]
    pub fn new(changes: Vec<C>) -> Option<Self> {
        if changes.is_empty() {
            None
        } else {
            Some(Self(changes))
        }
    }

    /// A single-change list.
    #[must_use]
    pub fn one(change: C) -> Self {
        Self(vec![change])
    }

    /// Append every change of `other`, keeping order.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<C> {
        self.0
    }
}

impl<C> Deref for Changes<C> {
    type Target = [C];

    fn deref(&self) -> &[C] {
        &self.0
    }
}

impl<C> AsRef<[C]> for Changes<C> {
    fn as_ref(&self) -> &[C] {
        &self.0
    }
}

impl<C> IntoIterator for Changes<C> {
    type Item = C;
    type IntoIter = std::vec::IntoIter<C>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, C> IntoIterator for &'a Changes<C> {
    type Item = &'a C;
    type IntoIter = std::slice::Iter<'a, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One protocol message: the sender's clock and, optionally, changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<C> {
    /// Clock announcement (or a request when the clock is empty).
    ClockOnly { clock: VectorClock },
    /// Clock plus changes the receiver may be missing.
    WithChanges {
        clock: VectorClock,
        changes: Changes<C>,
    },
}

impl<C> Message<C> {
    #[must_use]
    pub const fn clock_only(clock: VectorClock) -> Self {
        Self::ClockOnly { clock }
    }

    #[must_use]
    pub const fn with_changes(clock: VectorClock, changes: Changes<C>) -> Self {
        Self::WithChanges { clock, changes }
    }

    /// Build a message from a clock and a possibly empty change vector.
    #[must_use]
    pub fn from_parts(clock: VectorClock, changes: Vec<C>) -> Self {
        match Changes::new(changes) {
            Some(changes) => Self::WithChanges { clock, changes },
            None => Self::ClockOnly { clock },
        }
    }

    /// An empty-clock message: "I know nothing, send me everything".
    #[must_use]
    pub fn request() -> Self {
        Self::ClockOnly {
            clock: VectorClock::new(),
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &VectorClock {
        match self {
            Self::ClockOnly { clock } | Self::WithChanges { clock, .. } => clock,
        }
    }

    #[must_use]
    pub const fn changes(&self) -> Option<&Changes<C>> {
        match self {
            Self::ClockOnly { .. } => None,
            Self::WithChanges { changes, .. } => Some(changes),
        }
    }

    #[must_use]
    pub const fn has_changes(&self) -> bool {
        matches!(self, Self::WithChanges { .. })
    }

    /// Number of changes carried (0 for clock-only).
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes().map_or(0, |changes| changes.len())
    }

    /// Split into the clock and a (possibly empty) change vector.
    #[must_use]
    pub fn into_parts(self) -> (VectorClock, Vec<C>) {
        match self {
            Self::ClockOnly { clock } => (clock, Vec::new()),
            Self::WithChanges { clock, changes } => (clock, changes.into_vec()),
        }
    }

    #[must_use]
    pub fn into_clock(self) -> VectorClock {
        match self {
            Self::ClockOnly { clock } | Self::WithChanges { clock, .. } => clock,
        }
    }
}

/// A message scoped to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMessage<C> {
    pub doc_id: DocId,
    pub message: Message<C>,
}

impl<C> DocMessage<C> {
    #[must_use]
    pub fn new(doc_id: impl Into<DocId>, message: Message<C>) -> Self {
        Self {
            doc_id: doc_id.into(),
            message,
        }
    }

    /// Empty-clock request for `doc_id`.
    #[must_use]
    pub fn request(doc_id: impl Into<DocId>) -> Self {
        Self::new(doc_id, Message::request())
    }
}

/// One entry of a buffered Hub batch: who sent it and what they sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming<C> {
    pub peer_id: PeerId,
    pub message: Message<C>,
}

impl<C> Incoming<C> {
    #[must_use]
    pub fn new(peer_id: impl Into<PeerId>, message: Message<C>) -> Self {
        Self {
            peer_id: peer_id.into(),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MessageOut<'a, C> {
    clock: &'a VectorClock,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<&'a [C]>,
}

#[derive(Serialize)]
struct DocMessageOut<'a, C> {
    #[serde(rename = "docId")]
    doc_id: &'a str,
    clock: &'a VectorClock,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<&'a [C]>,
}

#[derive(Deserialize)]
struct MessageIn<C> {
    clock: Option<VectorClock>,
    changes: Option<Vec<C>>,
}

#[derive(Deserialize)]
struct DocMessageIn<C> {
    #[serde(rename = "docId")]
    doc_id: String,
    clock: Option<VectorClock>,
    changes: Option<Vec<C>>,
}

fn decode<C>(clock: Option<VectorClock>, changes: Option<Vec<C>>) -> Result<Message<C>, MessageError> {
    let clock = clock.unwrap_or_default();
    match changes {
        None => Ok(Message::ClockOnly { clock }),
        Some(changes) => Changes::new(changes)
            .map(|changes| Message::WithChanges { clock, changes })
            .ok_or(MessageError::EmptyChanges),
    }
}

impl<C: Serialize> Serialize for Message<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageOut {
            clock: self.clock(),
            changes: self.changes().map(|changes| &**changes),
        }
        .serialize(serializer)
    }
}

impl<'de, C: Deserialize<'de>> Deserialize<'de> for Message<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = MessageIn::<C>::deserialize(deserializer)?;
        decode(wire.clock, wire.changes).map_err(D::Error::custom)
    }
}

impl<C: Serialize> Serialize for DocMessage<C> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DocMessageOut {
            doc_id: &self.doc_id,
            clock: self.message.clock(),
            changes: self.message.changes().map(|changes| &**changes),
        }
        .serialize(serializer)
    }
}

impl<'de, C: Deserialize<'de>> Deserialize<'de> for DocMessage<C> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = DocMessageIn::<C>::deserialize(deserializer)?;
        let message = decode(wire.clock, wire.changes).map_err(D::Error::custom)?;
        Ok(Self {
            doc_id: wire.doc_id,
            message,
        })
    }
}
