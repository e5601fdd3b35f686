//! KEEPALIVE frame codec.
//!
//! Body: a fixed u64 last-received-position followed by the data payload.
//! The position is a resumption artifact; it is always written as zero and
//! never interpreted on decode. No metadata is permitted on this frame
//! kind.

use crate::{
    error::{Result, RmuxError},
    frame::flags,
    header::{self, HEADER_SIZE},
};
use bytes::{BufMut, Bytes, BytesMut};

pub const LAST_POSITION_SIZE: usize = 8;

/// The data payload always starts here; the position field is fixed width.
pub const PAYLOAD_OFFSET: usize = HEADER_SIZE + LAST_POSITION_SIZE;

pub fn frame_length(data_len: usize) -> usize {
    PAYLOAD_OFFSET + data_len
}

/// Write the KEEPALIVE body after the header.
pub fn encode(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u64(0);
    dst.put_slice(data);
}

/// The wire value of the last-position field. Carried for wire
/// compatibility; always zero when produced by this implementation.
pub fn last_position(frame: &[u8]) -> Result<u64> {
    header::get_u64(frame, HEADER_SIZE)
}

/// Decode into (respond-requested, data).
pub fn decode(frame: &Bytes, frame_flags: u16) -> Result<(bool, Bytes)> {
    if frame_flags & flags::METADATA != 0 {
        return Err(RmuxError::MalformedFrame(
            "KEEPALIVE frames cannot carry metadata".to_string(),
        ));
    }
    last_position(frame)?;
    Ok((
        frame_flags & flags::RESPOND != 0,
        frame.slice(PAYLOAD_OFFSET..),
    ))
}
