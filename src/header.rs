//! Fixed-size frame header codec and the metadata/data trailer shared by
//! every frame kind.
//!
//! Header layout (all integers big-endian):
//!
//! ```text
//! u24 frame length   total encoded size of the frame, header included
//! u32 stream id      top bit reserved zero (31-bit id); 0 = connection
//! u16 type/flags     frame type in the top 6 bits, flags in the low 10
//! ```

use crate::error::{Result, RmuxError};
use bytes::{BufMut, Bytes, BytesMut};

pub const FRAME_LENGTH_SIZE: usize = 3;
pub const HEADER_SIZE: usize = 9;
pub const METADATA_LENGTH_SIZE: usize = 3;

/// Largest value representable in the u24 length field.
pub const MAX_FRAME_LENGTH: usize = 0x00FF_FFFF;

pub const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;
pub const FLAGS_MASK: u16 = 0x03FF;

const FRAME_TYPE_SHIFT: u16 = 10;

pub fn put_u24(dst: &mut BytesMut, value: usize) {
    debug_assert!(value <= MAX_FRAME_LENGTH);
    dst.put_u8((value >> 16) as u8);
    dst.put_u8((value >> 8) as u8);
    dst.put_u8(value as u8);
}

pub fn get_u24(buf: &[u8], offset: usize) -> Result<usize> {
    let field = field_slice(buf, offset, 3)?;
    Ok(((field[0] as usize) << 16) | ((field[1] as usize) << 8) | field[2] as usize)
}

pub fn get_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let field = field_slice(buf, offset, 2)?;
    Ok(u16::from_be_bytes([field[0], field[1]]))
}

pub fn get_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let field = field_slice(buf, offset, 4)?;
    Ok(u32::from_be_bytes([field[0], field[1], field[2], field[3]]))
}

pub fn get_u64(buf: &[u8], offset: usize) -> Result<u64> {
    let field = field_slice(buf, offset, 8)?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(field);
    Ok(u64::from_be_bytes(bytes))
}

fn field_slice(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    match offset.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(&buf[offset..end]),
        _ => Err(RmuxError::MalformedFrame(format!(
            "field at offset {offset} (+{len}) exceeds frame of {} bytes",
            buf.len()
        ))),
    }
}

/// Write the fixed header. Returns the number of bytes written.
///
/// The caller supplies `frame_len` after sizing the variable fields, since
/// frames like SETUP must be measured field-by-field before the buffer is
/// allocated.
pub fn encode_header(
    dst: &mut BytesMut,
    frame_len: usize,
    flags: u16,
    type_code: u8,
    stream_id: u32,
) -> usize {
    put_u24(dst, frame_len);
    dst.put_u32(stream_id & STREAM_ID_MASK);
    dst.put_u16(((type_code as u16) << FRAME_TYPE_SHIFT) | (flags & FLAGS_MASK));
    HEADER_SIZE
}

fn check_header(buf: &[u8]) -> Result<()> {
    if buf.len() < HEADER_SIZE {
        return Err(RmuxError::MalformedFrame(format!(
            "header truncated: {} bytes",
            buf.len()
        )));
    }
    Ok(())
}

pub fn decode_frame_length(buf: &[u8]) -> Result<usize> {
    check_header(buf)?;
    get_u24(buf, 0)
}

pub fn decode_stream_id(buf: &[u8]) -> Result<u32> {
    check_header(buf)?;
    Ok(get_u32(buf, FRAME_LENGTH_SIZE)? & STREAM_ID_MASK)
}

/// The raw 6-bit frame type code; unknown codes are returned as-is so the
/// caller can classify them without losing the payload.
pub fn decode_type(buf: &[u8]) -> Result<u8> {
    check_header(buf)?;
    Ok((get_u16(buf, FRAME_LENGTH_SIZE + 4)? >> FRAME_TYPE_SHIFT) as u8)
}

pub fn decode_flags(buf: &[u8]) -> Result<u16> {
    check_header(buf)?;
    Ok(get_u16(buf, FRAME_LENGTH_SIZE + 4)? & FLAGS_MASK)
}

/// Encoded size of the metadata/data trailer.
pub fn trailer_length(metadata_len: Option<usize>, data_len: usize) -> usize {
    match metadata_len {
        Some(len) => METADATA_LENGTH_SIZE + len + data_len,
        None => data_len,
    }
}

/// Write the trailer: an optional u24-length-prefixed metadata block
/// followed by the data, which runs to the end of the frame with no length
/// of its own.
pub fn encode_trailer(dst: &mut BytesMut, metadata: Option<&[u8]>, data: &[u8]) {
    if let Some(metadata) = metadata {
        put_u24(dst, metadata.len());
        dst.put_slice(metadata);
    }
    dst.put_slice(data);
}

/// Split the trailer starting at `offset` into metadata and data. The
/// metadata block is present iff `has_metadata` (the header's M flag).
pub fn decode_trailer(
    frame: &Bytes,
    offset: usize,
    has_metadata: bool,
) -> Result<(Option<Bytes>, Bytes)> {
    if offset > frame.len() {
        return Err(RmuxError::MalformedFrame(format!(
            "payload offset {offset} exceeds frame of {} bytes",
            frame.len()
        )));
    }
    if !has_metadata {
        return Ok((None, frame.slice(offset..)));
    }
    let metadata_len = get_u24(frame, offset)?;
    let metadata_start = offset + METADATA_LENGTH_SIZE;
    let metadata_end = metadata_start.checked_add(metadata_len).ok_or_else(|| {
        RmuxError::MalformedFrame("metadata length overflows frame".to_string())
    })?;
    if metadata_end > frame.len() {
        return Err(RmuxError::MalformedFrame(format!(
            "metadata of {metadata_len} bytes exceeds frame of {} bytes",
            frame.len()
        )));
    }
    Ok((
        Some(frame.slice(metadata_start..metadata_end)),
        frame.slice(metadata_end..),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut buf = BytesMut::new();
        let written = encode_header(&mut buf, 42, 0x180, 0x0A, 77);
        assert_eq!(written, HEADER_SIZE);
        assert_eq!(buf.len(), HEADER_SIZE);

        assert_eq!(decode_frame_length(&buf).unwrap(), 42);
        assert_eq!(decode_stream_id(&buf).unwrap(), 77);
        assert_eq!(decode_type(&buf).unwrap(), 0x0A);
        assert_eq!(decode_flags(&buf).unwrap(), 0x180);
    }

    #[test]
    fn test_stream_id_top_bit_masked() {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, HEADER_SIZE, 0, 0x09, 0xFFFF_FFFF);
        assert_eq!(decode_stream_id(&buf).unwrap(), STREAM_ID_MASK);
    }

    #[test]
    fn test_truncated_header_is_malformed() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(matches!(
            decode_type(&buf),
            Err(RmuxError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_stream_id(&buf),
            Err(RmuxError::MalformedFrame(_))
        ));
        assert!(matches!(
            decode_flags(&buf),
            Err(RmuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_u24_boundaries() {
        let mut buf = BytesMut::new();
        put_u24(&mut buf, MAX_FRAME_LENGTH);
        put_u24(&mut buf, 0);
        put_u24(&mut buf, 0x010203);

        assert_eq!(get_u24(&buf, 0).unwrap(), MAX_FRAME_LENGTH);
        assert_eq!(get_u24(&buf, 3).unwrap(), 0);
        assert_eq!(get_u24(&buf, 6).unwrap(), 0x010203);
        assert!(get_u24(&buf, 7).is_err());
    }

    #[test]
    fn test_trailer_round_trip_with_metadata() {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 0, 0x100, 0x0A, 1);
        encode_trailer(&mut buf, Some(b"meta"), b"data");

        let frame = buf.freeze();
        let (metadata, data) = decode_trailer(&frame, HEADER_SIZE, true).unwrap();
        assert_eq!(metadata.unwrap(), Bytes::from_static(b"meta"));
        assert_eq!(data, Bytes::from_static(b"data"));
    }

    #[test]
    fn test_trailer_without_metadata() {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 0, 0, 0x0A, 1);
        encode_trailer(&mut buf, None, b"payload");

        let frame = buf.freeze();
        let (metadata, data) = decode_trailer(&frame, HEADER_SIZE, false).unwrap();
        assert!(metadata.is_none());
        assert_eq!(data, Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_empty_metadata_is_preserved() {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 0, 0x100, 0x0A, 1);
        encode_trailer(&mut buf, Some(b""), b"");

        let frame = buf.freeze();
        let (metadata, data) = decode_trailer(&frame, HEADER_SIZE, true).unwrap();
        assert_eq!(metadata.unwrap(), Bytes::new());
        assert!(data.is_empty());
    }

    #[test]
    fn test_trailer_length_matches_encoding() {
        for (metadata, data) in [
            (Some(&b"abc"[..]), &b"defg"[..]),
            (None, &b"defg"[..]),
            (Some(&b""[..]), &b""[..]),
        ] {
            let mut buf = BytesMut::new();
            encode_trailer(&mut buf, metadata, data);
            assert_eq!(
                buf.len(),
                trailer_length(metadata.map(<[u8]>::len), data.len())
            );
        }
    }

    #[test]
    fn test_metadata_overrunning_frame_is_malformed() {
        let mut buf = BytesMut::new();
        encode_header(&mut buf, 0, 0x100, 0x0A, 1);
        put_u24(&mut buf, 100);
        buf.put_slice(b"short");

        let frame = buf.freeze();
        assert!(matches!(
            decode_trailer(&frame, HEADER_SIZE, true),
            Err(RmuxError::MalformedFrame(_))
        ));
    }
}
