//! Writers: log appends and dispatcher-backed responses.

use dispatch::Dispatcher;
use serde::Serialize;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::entry::{EntryHeader, EntryKind, EntryState, ENTRY_HEADER_LENGTH};
use crate::error::Result;

/// Appends entries to one partition of a ring-buffer backed log.
///
/// The partition id travels as the frame's stream id; single-writer ordering
/// per partition is the caller's construction-time responsibility (one
/// controller per partition).
pub struct LogStreamWriter {
    log_buffer: Dispatcher,
    partition_id: u32,
}

impl LogStreamWriter {
    pub fn new(log_buffer: Dispatcher, partition_id: u32) -> Self {
        Self {
            log_buffer,
            partition_id,
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Appends one entry; returns its position in the log.
    pub fn append<V: Serialize>(
        &self,
        key: u64,
        kind: EntryKind,
        state: EntryState,
        value: &V,
    ) -> Result<u64> {
        let value_length = bincode::serialized_size(value)? as usize;
        let mut claim = self
            .log_buffer
            .claim(ENTRY_HEADER_LENGTH + value_length, self.partition_id)?;

        let header = EntryHeader {
            key,
            kind: kind.0,
            state: state.into(),
            value_length: value_length as u32,
        };
        let payload = claim.payload_mut();
        payload[..ENTRY_HEADER_LENGTH].copy_from_slice(header.as_bytes());
        bincode::serialize_into(&mut payload[ENTRY_HEADER_LENGTH..], value)?;

        let position = claim.position();
        claim.commit();
        Ok(position)
    }

    /// Appends the follow-up entry recording a processed entry's outcome,
    /// preserving its key.
    pub fn append_follow_up<V: Serialize>(
        &self,
        key: u64,
        kind: EntryKind,
        state: EntryState,
        value: &V,
    ) -> Result<u64> {
        self.append(key, kind, state, value)
    }
}

/// Packed header of a response frame on a send buffer.
#[derive(AsBytes, FromBytes, FromZeroes, Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct ResponseHeader {
    pub partition_id: u32,
    pub request_id: u64,
    pub key: u64,
    pub payload_length: u32,
}

pub const RESPONSE_HEADER_LENGTH: usize = std::mem::size_of::<ResponseHeader>();

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub partition_id: u32,
    pub request_id: u64,
    pub key: u64,
    pub payload: Vec<u8>,
}

impl Response {
    /// Decodes a response frame's payload as written by [`ResponseWriter`].
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let header = ResponseHeader::read_from_prefix(payload)?;
        let end = RESPONSE_HEADER_LENGTH + header.payload_length as usize;
        if payload.len() < end {
            return None;
        }
        Some(Self {
            partition_id: header.partition_id,
            request_id: header.request_id,
            key: header.key,
            payload: payload[RESPONSE_HEADER_LENGTH..end].to_vec(),
        })
    }
}

/// Reusable builder writing responses into a dispatcher-backed send buffer.
///
/// One claim per response: if the contiguous space before the buffer wrap is
/// too small the dispatcher pads and retries internally, and genuine
/// backpressure surfaces as an error for the caller to retry.
pub struct ResponseWriter {
    send_buffer: Dispatcher,
    stream_id: u32,
    request_id: u64,
    partition_id: u32,
    key: u64,
    payload: Vec<u8>,
}

impl ResponseWriter {
    pub fn new(send_buffer: Dispatcher) -> Self {
        Self {
            send_buffer,
            stream_id: 0,
            request_id: 0,
            partition_id: 0,
            key: 0,
            payload: Vec::new(),
        }
    }

    /// Channel stream the requester is reachable on.
    pub fn stream_id(&mut self, stream_id: u32) -> &mut Self {
        self.stream_id = stream_id;
        self
    }

    pub fn request_id(&mut self, request_id: u64) -> &mut Self {
        self.request_id = request_id;
        self
    }

    pub fn partition_id(&mut self, partition_id: u32) -> &mut Self {
        self.partition_id = partition_id;
        self
    }

    pub fn key(&mut self, key: u64) -> &mut Self {
        self.key = key;
        self
    }

    pub fn payload(&mut self, payload: &[u8]) -> &mut Self {
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        self
    }

    /// Claims, fills and commits the response frame; returns its position.
    /// The staged fields reset on success so the writer can be reused.
    pub fn try_write(&mut self) -> Result<u64> {
        let total = RESPONSE_HEADER_LENGTH + self.payload.len();
        let mut claim = self.send_buffer.claim(total, self.stream_id)?;

        let header = ResponseHeader {
            partition_id: self.partition_id,
            request_id: self.request_id,
            key: self.key,
            payload_length: self.payload.len() as u32,
        };
        let frame = claim.payload_mut();
        frame[..RESPONSE_HEADER_LENGTH].copy_from_slice(header.as_bytes());
        frame[RESPONSE_HEADER_LENGTH..].copy_from_slice(&self.payload);

        let position = claim.position();
        claim.commit();
        self.reset();
        Ok(position)
    }

    fn reset(&mut self) {
        self.stream_id = 0;
        self.request_id = 0;
        self.partition_id = 0;
        self.key = 0;
        self.payload.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogStreamError;
    use dispatch::{DispatcherConfig, Fragment};
    use serde::Deserialize;

    const EVENT: &[u8] = b"eventType";

    fn send_buffer(capacity: usize) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            name: "send-buffer".to_string(),
            buffer_capacity: capacity,
            max_fragment_length: capacity / 4,
        })
        .unwrap()
    }

    #[test]
    fn response_round_trips_through_a_one_mib_send_buffer() {
        let dispatcher = send_buffer(1024 * 1024);
        let mut subscription = dispatcher.open_subscription("decoder");

        let mut writer = ResponseWriter::new(dispatcher.clone());
        writer
            .stream_id(1)
            .request_id(3)
            .partition_id(1)
            .key(2)
            .payload(EVENT);
        writer.try_write().expect("response fits");

        let mut decoded = None;
        subscription.poll(
            &mut |fragment: Fragment<'_>| {
                assert_eq!(fragment.stream_id, 1);
                decoded = Response::decode(fragment.payload);
            },
            1,
        );

        let response = decoded.expect("one response frame");
        assert_eq!(response.partition_id, 1);
        assert_eq!(response.request_id, 3);
        assert_eq!(response.key, 2);
        assert_eq!(response.payload, EVENT);
    }

    #[test]
    fn response_write_retries_over_the_buffer_wrap() {
        let dispatcher = send_buffer(256);
        let mut subscription = dispatcher.open_subscription("consumer");

        // Walk the tail to offset 216, leaving 40 contiguous bytes, less than
        // the 48-byte response frame needs; then free the space again.
        for _ in 0..3 {
            dispatcher.publish(&[0u8; 60], 9).unwrap();
        }
        subscription.poll(&mut |_: Fragment<'_>| {}, usize::MAX);

        let mut writer = ResponseWriter::new(dispatcher);
        let position = writer
            .stream_id(1)
            .request_id(2)
            .partition_id(1)
            .key(2)
            .payload(EVENT)
            .try_write()
            .expect("write succeeds after internal padding");
        assert!(position > 0);
    }

    #[test]
    fn response_write_fails_cleanly_when_the_buffer_is_full() {
        let dispatcher = send_buffer(256);
        let _subscription = dispatcher.open_subscription("laggard");
        while dispatcher.publish(&[0u8; 50], 9).is_ok() {}

        let mut writer = ResponseWriter::new(dispatcher);
        let err = writer
            .stream_id(1)
            .partition_id(1)
            .key(2)
            .payload(EVENT)
            .try_write()
            .unwrap_err();
        assert!(err.is_backpressure());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    #[test]
    fn appended_entries_decode_back_from_the_log() {
        use crate::entry::{EntryKind, EntryState, RawEntry};

        let log = send_buffer(64 * 1024);
        let mut subscription = log.open_subscription("reader");
        let writer = LogStreamWriter::new(log.clone(), 7);

        let value = Note {
            text: "hello".to_string(),
        };
        let position = writer
            .append(11, EntryKind(1), EntryState::Create, &value)
            .unwrap();

        let mut read = None;
        subscription.poll(
            &mut |fragment: Fragment<'_>| {
                read = Some(
                    RawEntry::decode(fragment.position, fragment.stream_id, fragment.payload)
                        .unwrap(),
                );
            },
            1,
        );

        let raw = read.expect("one entry");
        assert_eq!(raw.position, position);
        assert_eq!(raw.partition_id, 7);
        assert_eq!(raw.key, 11);
        let typed = raw.typed::<Note>().unwrap();
        assert_eq!(typed.value, value);
    }
}
