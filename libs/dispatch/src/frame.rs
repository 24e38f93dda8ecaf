//! Frame descriptor for the ring-buffer wire layout.
//!
//! Every fragment on a ring buffer is a frame:
//!
//! ```text
//! offset 0   i32  frame length (header + payload)
//!                 negative: claimed, write in progress
//!                 zero:     untouched memory
//!                 positive: committed, safe to read
//! offset 4   u8   frame version
//! offset 5   u8   flags
//! offset 6   u16  frame type (message or padding)
//! offset 8   u32  stream id
//! offset 12       payload
//! ```
//!
//! Frames start on 8-byte aligned positions. A padding frame can be as small
//! as one alignment unit, in which case only its length and type fields exist;
//! readers must never touch the stream id of a padding frame.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Frames are laid out on positions aligned to this many bytes.
pub const FRAME_ALIGNMENT: usize = 8;

/// Length of the frame header preceding the payload.
pub const HEADER_LENGTH: usize = 12;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

pub const LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const STREAM_ID_OFFSET: usize = 8;

/// Discriminates data frames from skip-only padding by header alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum FrameType {
    Message = 0,
    Padding = 1,
}

/// Total frame length for a payload of `payload_length` bytes.
#[inline]
pub const fn framed_length(payload_length: usize) -> usize {
    HEADER_LENGTH + payload_length
}

/// Rounds a frame length up to the next aligned position advance.
#[inline]
pub const fn aligned_length(framed_length: usize) -> usize {
    (framed_length + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_rounds_up_to_frame_boundary() {
        assert_eq!(aligned_length(HEADER_LENGTH), 16);
        assert_eq!(aligned_length(framed_length(0)), 16);
        assert_eq!(aligned_length(framed_length(4)), 16);
        assert_eq!(aligned_length(framed_length(5)), 24);
        assert_eq!(aligned_length(framed_length(9)), 24);
    }

    #[test]
    fn frame_type_round_trips_through_primitive() {
        assert_eq!(FrameType::try_from(0u16), Ok(FrameType::Message));
        assert_eq!(FrameType::try_from(1u16), Ok(FrameType::Padding));
        assert!(FrameType::try_from(7u16).is_err());
    }
}
