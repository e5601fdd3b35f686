//! SETUP frame codec.
//!
//! Body layout, immediately after the frame header:
//!
//! ```text
//! u32 version            major << 16 | minor
//! u32 keepalive interval milliseconds
//! u32 max lifetime       milliseconds
//! [u16 token length + token bytes]   iff RESUME_ENABLE
//! u8 length + UTF-8 bytes            metadata MIME type
//! u8 length + UTF-8 bytes            data MIME type
//! metadata/data trailer
//! ```
//!
//! Offsets past the fixed fields depend on the flag state and are
//! recomputed from the buffer on every accessor call.

use crate::{
    error::{Result, RmuxError},
    frame::flags,
    header::{self, HEADER_SIZE},
};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Longest MIME type the u8 length prefix can describe, in UTF-8 bytes.
pub const MAX_MIME_LENGTH: usize = 255;

const VERSION_OFFSET: usize = HEADER_SIZE;
const KEEPALIVE_OFFSET: usize = VERSION_OFFSET + 4;
const LIFETIME_OFFSET: usize = KEEPALIVE_OFFSET + 4;
const RESUME_OFFSET: usize = LIFETIME_OFFSET + 4;
const FIXED_FIELDS_SIZE: usize = 12;

/// Protocol version advertised in SETUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const CURRENT: Version = Version { major: 1, minor: 0 };

    pub fn pack(self) -> u32 {
        (self.major as u32) << 16 | self.minor as u32
    }

    pub fn unpack(value: u32) -> Self {
        Self {
            major: (value >> 16) as u16,
            minor: value as u16,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded SETUP frame fields.
///
/// `resume_token` exists because the wire format accommodates it; this
/// implementation never populates it on encode and refuses to serialize a
/// frame that carries one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    pub version: Version,
    pub honor_lease: bool,
    pub keepalive_interval_millis: u32,
    pub max_lifetime_millis: u32,
    pub resume_token: Option<Bytes>,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub metadata: Option<Bytes>,
    pub data: Bytes,
}

fn mime_field_length(mime_type: &str) -> Result<usize> {
    let len = mime_type.len();
    if len > MAX_MIME_LENGTH {
        return Err(RmuxError::MimeTypeTooLong { len });
    }
    Ok(1 + len)
}

/// Total encoded frame size, header included. This is the authoritative
/// value used to allocate the buffer and populate the length header field;
/// it always equals the byte count [`encode`] produces.
pub fn frame_length(setup: &Setup) -> Result<usize> {
    if setup.resume_token.is_some() {
        return Err(RmuxError::UnsupportedResumption);
    }
    Ok(HEADER_SIZE
        + FIXED_FIELDS_SIZE
        + mime_field_length(&setup.metadata_mime_type)?
        + mime_field_length(&setup.data_mime_type)?
        + header::trailer_length(setup.metadata.as_ref().map(Bytes::len), setup.data.len()))
}

/// Write the SETUP body after the header. Fails before writing anything:
/// with `UnsupportedResumption` if a resume token is present, or
/// `MimeTypeTooLong` if either MIME type exceeds 255 UTF-8 bytes.
pub fn encode(dst: &mut BytesMut, setup: &Setup) -> Result<()> {
    if setup.resume_token.is_some() {
        return Err(RmuxError::UnsupportedResumption);
    }
    mime_field_length(&setup.metadata_mime_type)?;
    mime_field_length(&setup.data_mime_type)?;

    dst.put_u32(setup.version.pack());
    dst.put_u32(setup.keepalive_interval_millis);
    dst.put_u32(setup.max_lifetime_millis);
    put_mime(dst, &setup.metadata_mime_type);
    put_mime(dst, &setup.data_mime_type);
    header::encode_trailer(dst, setup.metadata.as_deref(), &setup.data);
    Ok(())
}

fn put_mime(dst: &mut BytesMut, mime_type: &str) {
    dst.put_u8(mime_type.len() as u8);
    dst.put_slice(mime_type.as_bytes());
}

pub fn version(frame: &[u8]) -> Result<Version> {
    Ok(Version::unpack(header::get_u32(frame, VERSION_OFFSET)?))
}

pub fn keepalive_interval(frame: &[u8]) -> Result<u32> {
    header::get_u32(frame, KEEPALIVE_OFFSET)
}

pub fn max_lifetime(frame: &[u8]) -> Result<u32> {
    header::get_u32(frame, LIFETIME_OFFSET)
}

/// Size of the resume-token block: 0 when RESUME_ENABLE is clear, otherwise
/// the 2-byte length prefix plus the token bytes. Every later field offset
/// depends on this.
fn resume_block_length(frame: &[u8]) -> Result<usize> {
    if header::decode_flags(frame)? & flags::RESUME_ENABLE == 0 {
        return Ok(0);
    }
    Ok(2 + header::get_u16(frame, RESUME_OFFSET)? as usize)
}

fn mime_field(frame: &[u8], offset: usize) -> Result<(&str, usize)> {
    let len = *frame.get(offset).ok_or_else(|| {
        RmuxError::MalformedFrame(format!("MIME length prefix at {offset} exceeds frame"))
    })? as usize;
    let start = offset + 1;
    let end = start + len;
    let raw = frame.get(start..end).ok_or_else(|| {
        RmuxError::MalformedFrame(format!("MIME type of {len} bytes exceeds frame"))
    })?;
    let text = std::str::from_utf8(raw)
        .map_err(|_| RmuxError::MalformedFrame("MIME type is not valid UTF-8".to_string()))?;
    Ok((text, end))
}

pub fn metadata_mime_type(frame: &[u8]) -> Result<&str> {
    let offset = RESUME_OFFSET + resume_block_length(frame)?;
    Ok(mime_field(frame, offset)?.0)
}

pub fn data_mime_type(frame: &[u8]) -> Result<&str> {
    let offset = RESUME_OFFSET + resume_block_length(frame)?;
    let (_, next) = mime_field(frame, offset)?;
    Ok(mime_field(frame, next)?.0)
}

/// Offset of the metadata/data trailer, past both MIME-type fields.
pub fn payload_offset(frame: &[u8]) -> Result<usize> {
    let offset = RESUME_OFFSET + resume_block_length(frame)?;
    let (_, next) = mime_field(frame, offset)?;
    let (_, end) = mime_field(frame, next)?;
    Ok(end)
}

/// Decode the whole SETUP body into an owned value.
pub fn decode(frame: &Bytes) -> Result<Setup> {
    let frame_flags = header::decode_flags(frame)?;
    let resume_token = if frame_flags & flags::RESUME_ENABLE != 0 {
        let token_len = header::get_u16(frame, RESUME_OFFSET)? as usize;
        let start = RESUME_OFFSET + 2;
        let end = start + token_len;
        if end > frame.len() {
            return Err(RmuxError::MalformedFrame(format!(
                "resume token of {token_len} bytes exceeds frame"
            )));
        }
        Some(frame.slice(start..end))
    } else {
        None
    };
    let (metadata, data) = header::decode_trailer(
        frame,
        payload_offset(frame)?,
        frame_flags & flags::METADATA != 0,
    )?;
    Ok(Setup {
        version: version(frame)?,
        honor_lease: frame_flags & flags::LEASE != 0,
        keepalive_interval_millis: keepalive_interval(frame)?,
        max_lifetime_millis: max_lifetime(frame)?,
        resume_token,
        metadata_mime_type: metadata_mime_type(frame)?.to_string(),
        data_mime_type: data_mime_type(frame)?.to_string(),
        metadata,
        data,
    })
}
