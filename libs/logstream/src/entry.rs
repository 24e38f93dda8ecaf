//! Log entry model and its wire encoding.
//!
//! Entries ride dispatcher frames: a packed entry header followed by the
//! bincode-encoded value. The frame's stream id carries the partition id, so
//! one log buffer can host several partitions without touching the entry
//! bytes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{LogStreamError, Result};

/// Domain-assigned discriminator for an entry's value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKind(pub u16);

/// Lifecycle state recorded with each entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u16)]
pub enum EntryState {
    /// Command requesting a creation.
    Create = 0,
    /// The creation was accepted and applied.
    Created = 1,
    /// The creation was a duplicate of an already applied one.
    CreateCompleteRejected = 2,
}

/// Packed header preceding every entry value on the log.
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy)]
#[repr(C, packed)]
pub(crate) struct EntryHeader {
    pub key: u64,
    pub kind: u16,
    pub state: u16,
    pub value_length: u32,
}

pub(crate) const ENTRY_HEADER_LENGTH: usize = std::mem::size_of::<EntryHeader>();

/// An entry as read off the log, value still encoded.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub position: u64,
    pub partition_id: u32,
    pub key: u64,
    pub kind: EntryKind,
    pub state: EntryState,
    pub value_bytes: Vec<u8>,
}

impl RawEntry {
    /// Decodes one dispatcher fragment into an entry.
    pub fn decode(position: u64, partition_id: u32, payload: &[u8]) -> Result<Self> {
        let header = EntryHeader::read_from_prefix(payload).ok_or_else(|| {
            LogStreamError::codec(format!("entry shorter than header: {} bytes", payload.len()))
        })?;

        let value_length = header.value_length as usize;
        let value_end = ENTRY_HEADER_LENGTH + value_length;
        if payload.len() < value_end {
            return Err(LogStreamError::codec(format!(
                "entry value truncated: expected {value_length} bytes"
            )));
        }

        let state_raw = header.state;
        let state = EntryState::try_from(state_raw)
            .map_err(|_| LogStreamError::codec(format!("unknown entry state {state_raw}")))?;

        Ok(Self {
            position,
            partition_id,
            key: header.key,
            kind: EntryKind(header.kind),
            state,
            value_bytes: payload[ENTRY_HEADER_LENGTH..value_end].to_vec(),
        })
    }

    /// Decodes the value into its typed representation.
    pub fn typed<V: DeserializeOwned>(&self) -> Result<TypedEntry<V>> {
        Ok(TypedEntry {
            position: self.position,
            partition_id: self.partition_id,
            key: self.key,
            kind: self.kind,
            state: self.state,
            value: bincode::deserialize(&self.value_bytes)?,
        })
    }
}

/// A fully decoded entry handed to processors.
#[derive(Debug, Clone)]
pub struct TypedEntry<V> {
    pub position: u64,
    pub partition_id: u32,
    pub key: u64,
    pub kind: EntryKind,
    /// Set by the processor's decision step before any side effect runs.
    pub state: EntryState,
    pub value: V,
}
