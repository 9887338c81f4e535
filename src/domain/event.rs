//! Log records: the mutation a producer enqueues and the sequenced event
//! a backend persists.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LogError;

/// Kind of mutation carried by an event.
///
/// Stored as a small integer. `0` is never written so that zeroed or
/// uninitialized records are rejected on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum EventKind {
    /// The key was removed.
    Delete = 1,
    /// The key was set to a value.
    Put = 2,
}

impl EventKind {
    /// Returns the kind as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Put => "put",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> Self {
        kind as Self
    }
}

impl From<EventKind> for i16 {
    fn from(kind: EventKind) -> Self {
        Self::from(u8::from(kind))
    }
}

impl TryFrom<u8> for EventKind {
    type Error = LogError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::try_from(i16::from(raw))
    }
}

impl TryFrom<i16> for EventKind {
    type Error = LogError;

    fn try_from(raw: i16) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::Delete),
            2 => Ok(Self::Put),
            other => Err(LogError::InvalidKind(other)),
        }
    }
}

/// A mutation waiting in the logger queue. It has no sequence number yet;
/// the writer assigns one when it persists the mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Put or delete.
    pub kind: EventKind,
    /// Affected key.
    pub key: Vec<u8>,
    /// New value. Empty for deletes.
    pub value: Vec<u8>,
}

impl Mutation {
    /// A put of `value` under `key`.
    #[must_use]
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    /// A delete of `key`.
    #[must_use]
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Attaches the sequence number it was persisted under.
    #[must_use]
    pub fn into_event(self, sequence: u64) -> Event {
        Event {
            sequence,
            kind: self.kind,
            key: self.key,
            value: self.value,
        }
    }
}

/// One durable record of a key mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Position in the log. Strictly increasing, starting at 1.
    pub sequence: u64,
    /// Put or delete.
    pub kind: EventKind,
    /// Affected key.
    pub key: Vec<u8>,
    /// New value. Ignored for deletes.
    pub value: Vec<u8>,
}
