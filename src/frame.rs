use crate::{
    error::{Result, RmuxError},
    header::{self, HEADER_SIZE},
    keepalive, setup,
    setup::Setup,
    stream::Payload,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Largest request-n value representable on the wire (31 bits).
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Frame flag bits (low 10 bits of the type/flags field).
pub mod flags {
    /// Ignore the frame if not understood.
    pub const IGNORE: u16 = 0x200;
    /// Metadata block present ("M" flag); universal.
    pub const METADATA: u16 = 0x100;
    /// SETUP: client will attempt resumption. Never set by this
    /// implementation on encode.
    pub const RESUME_ENABLE: u16 = 0x080;
    /// SETUP: client honors LEASE semantics.
    pub const LEASE: u16 = 0x040;
    /// KEEPALIVE: the receiver must reply with a KEEPALIVE of its own.
    pub const RESPOND: u16 = 0x080;
    /// PAYLOAD / REQUEST_*: more fragments follow.
    pub const FOLLOWS: u16 = 0x080;
    /// PAYLOAD / REQUEST_CHANNEL: the sender's half of the stream is done.
    pub const COMPLETE: u16 = 0x040;
    /// PAYLOAD: carries a value.
    pub const NEXT: u16 = 0x020;
}

/// Wire error codes carried by ERROR frames.
pub mod error_code {
    pub const INVALID_SETUP: u32 = 0x0001;
    pub const UNSUPPORTED_SETUP: u32 = 0x0002;
    pub const REJECTED_SETUP: u32 = 0x0003;
    pub const CONNECTION_ERROR: u32 = 0x0101;
    pub const CONNECTION_CLOSE: u32 = 0x0102;
    pub const APPLICATION_ERROR: u32 = 0x0201;
    pub const REJECTED: u32 = 0x0202;
    pub const CANCELED: u32 = 0x0203;
    pub const INVALID: u32 = 0x0204;
}

/// The frame kinds this implementation interprets.
///
/// Resumption (0x0D/0x0E) and extension (0x3F) codes decode to
/// [`FrameBody::Unknown`]: their payload is preserved but never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Setup,
    Lease,
    Keepalive,
    RequestResponse,
    RequestFnf,
    RequestStream,
    RequestChannel,
    RequestN,
    Cancel,
    Payload,
    Error,
    MetadataPush,
}

impl FrameType {
    pub const SETUP: u8 = 0x01;
    pub const LEASE: u8 = 0x02;
    pub const KEEPALIVE: u8 = 0x03;
    pub const REQUEST_RESPONSE: u8 = 0x04;
    pub const REQUEST_FNF: u8 = 0x05;
    pub const REQUEST_STREAM: u8 = 0x06;
    pub const REQUEST_CHANNEL: u8 = 0x07;
    pub const REQUEST_N: u8 = 0x08;
    pub const CANCEL: u8 = 0x09;
    pub const PAYLOAD: u8 = 0x0A;
    pub const ERROR: u8 = 0x0B;
    pub const METADATA_PUSH: u8 = 0x0C;

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            Self::SETUP => Some(FrameType::Setup),
            Self::LEASE => Some(FrameType::Lease),
            Self::KEEPALIVE => Some(FrameType::Keepalive),
            Self::REQUEST_RESPONSE => Some(FrameType::RequestResponse),
            Self::REQUEST_FNF => Some(FrameType::RequestFnf),
            Self::REQUEST_STREAM => Some(FrameType::RequestStream),
            Self::REQUEST_CHANNEL => Some(FrameType::RequestChannel),
            Self::REQUEST_N => Some(FrameType::RequestN),
            Self::CANCEL => Some(FrameType::Cancel),
            Self::PAYLOAD => Some(FrameType::Payload),
            Self::ERROR => Some(FrameType::Error),
            Self::METADATA_PUSH => Some(FrameType::MetadataPush),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FrameType::Setup => Self::SETUP,
            FrameType::Lease => Self::LEASE,
            FrameType::Keepalive => Self::KEEPALIVE,
            FrameType::RequestResponse => Self::REQUEST_RESPONSE,
            FrameType::RequestFnf => Self::REQUEST_FNF,
            FrameType::RequestStream => Self::REQUEST_STREAM,
            FrameType::RequestChannel => Self::REQUEST_CHANNEL,
            FrameType::RequestN => Self::REQUEST_N,
            FrameType::Cancel => Self::CANCEL,
            FrameType::Payload => Self::PAYLOAD,
            FrameType::Error => Self::ERROR,
            FrameType::MetadataPush => Self::METADATA_PUSH,
        }
    }

    /// Frame kinds addressed to the connection itself (stream id 0).
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            FrameType::Setup | FrameType::Lease | FrameType::Keepalive | FrameType::MetadataPush
        )
    }

    /// Frame kinds that open a new stream.
    pub fn is_request(self) -> bool {
        matches!(
            self,
            FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestChannel
        )
    }
}

/// One decoded frame: a stream id plus a typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: u32,
    pub body: FrameBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameBody {
    Setup(Setup),
    Lease {
        ttl_millis: u32,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    Keepalive {
        respond: bool,
        data: Bytes,
    },
    RequestResponse {
        payload: Payload,
    },
    RequestFnf {
        payload: Payload,
    },
    RequestStream {
        initial_request_n: u32,
        payload: Payload,
    },
    RequestChannel {
        initial_request_n: u32,
        complete: bool,
        payload: Payload,
    },
    RequestN {
        n: u32,
    },
    Cancel,
    Payload {
        follows: bool,
        complete: bool,
        next: bool,
        payload: Payload,
    },
    Error {
        code: u32,
        data: Bytes,
    },
    MetadataPush {
        metadata: Bytes,
    },
    /// Unrecognized or uninterpreted (resumption, extension) frame. The raw
    /// body is preserved for forward compatibility but never acted on.
    Unknown {
        type_code: u8,
        flags: u16,
        body: Bytes,
    },
}

impl Frame {
    pub fn new_setup(setup: Setup) -> Self {
        Self {
            stream_id: 0,
            body: FrameBody::Setup(setup),
        }
    }

    pub fn new_keepalive(respond: bool, data: Bytes) -> Self {
        Self {
            stream_id: 0,
            body: FrameBody::Keepalive { respond, data },
        }
    }

    pub fn new_metadata_push(metadata: Bytes) -> Self {
        Self {
            stream_id: 0,
            body: FrameBody::MetadataPush { metadata },
        }
    }

    pub fn new_request_response(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::RequestResponse { payload },
        }
    }

    pub fn new_request_fnf(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::RequestFnf { payload },
        }
    }

    pub fn new_request_stream(stream_id: u32, initial_request_n: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::RequestStream {
                initial_request_n,
                payload,
            },
        }
    }

    pub fn new_request_channel(stream_id: u32, initial_request_n: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::RequestChannel {
                initial_request_n,
                complete: false,
                payload,
            },
        }
    }

    pub fn new_request_n(stream_id: u32, n: u32) -> Self {
        Self {
            stream_id,
            body: FrameBody::RequestN { n },
        }
    }

    pub fn new_cancel(stream_id: u32) -> Self {
        Self {
            stream_id,
            body: FrameBody::Cancel,
        }
    }

    pub fn new_payload_next(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::Payload {
                follows: false,
                complete: false,
                next: true,
                payload,
            },
        }
    }

    pub fn new_payload_next_complete(stream_id: u32, payload: Payload) -> Self {
        Self {
            stream_id,
            body: FrameBody::Payload {
                follows: false,
                complete: true,
                next: true,
                payload,
            },
        }
    }

    pub fn new_payload_complete(stream_id: u32) -> Self {
        Self {
            stream_id,
            body: FrameBody::Payload {
                follows: false,
                complete: true,
                next: false,
                payload: Payload::empty(),
            },
        }
    }

    pub fn new_error(stream_id: u32, code: u32, message: &str) -> Self {
        Self {
            stream_id,
            body: FrameBody::Error {
                code,
                data: Bytes::copy_from_slice(message.as_bytes()),
            },
        }
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        match &self.body {
            FrameBody::Setup(_) => Some(FrameType::Setup),
            FrameBody::Lease { .. } => Some(FrameType::Lease),
            FrameBody::Keepalive { .. } => Some(FrameType::Keepalive),
            FrameBody::RequestResponse { .. } => Some(FrameType::RequestResponse),
            FrameBody::RequestFnf { .. } => Some(FrameType::RequestFnf),
            FrameBody::RequestStream { .. } => Some(FrameType::RequestStream),
            FrameBody::RequestChannel { .. } => Some(FrameType::RequestChannel),
            FrameBody::RequestN { .. } => Some(FrameType::RequestN),
            FrameBody::Cancel => Some(FrameType::Cancel),
            FrameBody::Payload { .. } => Some(FrameType::Payload),
            FrameBody::Error { .. } => Some(FrameType::Error),
            FrameBody::MetadataPush { .. } => Some(FrameType::MetadataPush),
            FrameBody::Unknown { .. } => None,
        }
    }

    fn type_code(&self) -> u8 {
        match &self.body {
            FrameBody::Unknown { type_code, .. } => *type_code,
            _ => self
                .frame_type()
                .map(FrameType::code)
                .unwrap_or_default(),
        }
    }

    /// The flag bits this frame encodes with, derived from its body.
    pub fn flags(&self) -> u16 {
        fn metadata_flag(present: bool) -> u16 {
            if present {
                flags::METADATA
            } else {
                0
            }
        }

        match &self.body {
            FrameBody::Setup(setup) => {
                let mut value = metadata_flag(setup.metadata.is_some());
                if setup.resume_token.is_some() {
                    value |= flags::RESUME_ENABLE;
                }
                if setup.honor_lease {
                    value |= flags::LEASE;
                }
                value
            }
            FrameBody::Lease { metadata, .. } => metadata_flag(metadata.is_some()),
            FrameBody::Keepalive { respond, .. } => {
                if *respond {
                    flags::RESPOND
                } else {
                    0
                }
            }
            FrameBody::RequestResponse { payload } | FrameBody::RequestFnf { payload } => {
                metadata_flag(payload.metadata.is_some())
            }
            FrameBody::RequestStream { payload, .. } => metadata_flag(payload.metadata.is_some()),
            FrameBody::RequestChannel {
                complete, payload, ..
            } => {
                let mut value = metadata_flag(payload.metadata.is_some());
                if *complete {
                    value |= flags::COMPLETE;
                }
                value
            }
            FrameBody::RequestN { .. } | FrameBody::Cancel | FrameBody::Error { .. } => 0,
            FrameBody::Payload {
                follows,
                complete,
                next,
                payload,
            } => {
                let mut value = metadata_flag(payload.metadata.is_some());
                if *follows {
                    value |= flags::FOLLOWS;
                }
                if *complete {
                    value |= flags::COMPLETE;
                }
                if *next {
                    value |= flags::NEXT;
                }
                value
            }
            FrameBody::MetadataPush { .. } => flags::METADATA,
            FrameBody::Unknown { flags, .. } => *flags,
        }
    }

    /// The exact number of bytes [`encode`](Self::encode) will produce.
    pub fn encoded_len(&self) -> Result<usize> {
        let body_len = match &self.body {
            FrameBody::Setup(setup) => return setup::frame_length(setup),
            FrameBody::Lease { metadata, .. } => {
                8 + header::trailer_length(metadata.as_ref().map(Bytes::len), 0)
            }
            FrameBody::Keepalive { data, .. } => return Ok(keepalive::frame_length(data.len())),
            FrameBody::RequestResponse { payload } | FrameBody::RequestFnf { payload } => {
                payload.trailer_length()
            }
            FrameBody::RequestStream { payload, .. }
            | FrameBody::RequestChannel { payload, .. } => 4 + payload.trailer_length(),
            FrameBody::RequestN { .. } => 4,
            FrameBody::Cancel => 0,
            FrameBody::Payload { payload, .. } => payload.trailer_length(),
            FrameBody::Error { data, .. } => 4 + data.len(),
            FrameBody::MetadataPush { metadata } => {
                header::trailer_length(Some(metadata.len()), 0)
            }
            FrameBody::Unknown { body, .. } => body.len(),
        };
        Ok(HEADER_SIZE + body_len)
    }

    /// Serialize this frame. The length header equals the returned buffer's
    /// size; nothing is written when validation or sizing fails.
    pub fn encode(&self) -> Result<Bytes> {
        self.validate()?;
        let frame_len = self.encoded_len()?;
        if frame_len > header::MAX_FRAME_LENGTH {
            return Err(RmuxError::FrameTooLarge {
                size: frame_len,
                max: header::MAX_FRAME_LENGTH,
            });
        }

        let mut dst = BytesMut::with_capacity(frame_len);
        header::encode_header(&mut dst, frame_len, self.flags(), self.type_code(), self.stream_id);

        match &self.body {
            FrameBody::Setup(setup) => setup::encode(&mut dst, setup)?,
            FrameBody::Lease {
                ttl_millis,
                number_of_requests,
                metadata,
            } => {
                dst.put_u32(*ttl_millis);
                dst.put_u32(*number_of_requests);
                header::encode_trailer(&mut dst, metadata.as_deref(), &[]);
            }
            FrameBody::Keepalive { data, .. } => keepalive::encode(&mut dst, data),
            FrameBody::RequestResponse { payload } | FrameBody::RequestFnf { payload } => {
                payload.encode_trailer(&mut dst);
            }
            FrameBody::RequestStream {
                initial_request_n,
                payload,
            } => {
                dst.put_u32(*initial_request_n);
                payload.encode_trailer(&mut dst);
            }
            FrameBody::RequestChannel {
                initial_request_n,
                payload,
                ..
            } => {
                dst.put_u32(*initial_request_n);
                payload.encode_trailer(&mut dst);
            }
            FrameBody::RequestN { n } => dst.put_u32(*n),
            FrameBody::Cancel => {}
            FrameBody::Payload { payload, .. } => payload.encode_trailer(&mut dst),
            FrameBody::Error { code, data } => {
                dst.put_u32(*code);
                dst.put_slice(data);
            }
            FrameBody::MetadataPush { metadata } => {
                header::encode_trailer(&mut dst, Some(metadata), &[]);
            }
            FrameBody::Unknown { body, .. } => dst.put_slice(body),
        }

        debug_assert_eq!(dst.len(), frame_len);
        Ok(dst.freeze())
    }

    /// Parse one complete frame buffer (as produced by the framing codec).
    pub fn decode(buf: Bytes) -> Result<Frame> {
        let declared = header::decode_frame_length(&buf)?;
        if declared != buf.len() {
            return Err(RmuxError::MalformedFrame(format!(
                "length field says {declared} bytes but frame has {}",
                buf.len()
            )));
        }
        let stream_id = header::decode_stream_id(&buf)?;
        let frame_flags = header::decode_flags(&buf)?;
        let type_code = header::decode_type(&buf)?;
        let has_metadata = frame_flags & flags::METADATA != 0;

        let body = match FrameType::from_code(type_code) {
            None => FrameBody::Unknown {
                type_code,
                flags: frame_flags,
                body: buf.slice(HEADER_SIZE..),
            },
            Some(FrameType::Setup) => FrameBody::Setup(setup::decode(&buf)?),
            Some(FrameType::Lease) => {
                let (metadata, _) =
                    header::decode_trailer(&buf, HEADER_SIZE + 8, has_metadata)?;
                FrameBody::Lease {
                    ttl_millis: header::get_u32(&buf, HEADER_SIZE)?,
                    number_of_requests: header::get_u32(&buf, HEADER_SIZE + 4)?,
                    metadata,
                }
            }
            Some(FrameType::Keepalive) => {
                let (respond, data) = keepalive::decode(&buf, frame_flags)?;
                FrameBody::Keepalive { respond, data }
            }
            Some(FrameType::RequestResponse) => FrameBody::RequestResponse {
                payload: Payload::decode_trailer(&buf, HEADER_SIZE, has_metadata)?,
            },
            Some(FrameType::RequestFnf) => FrameBody::RequestFnf {
                payload: Payload::decode_trailer(&buf, HEADER_SIZE, has_metadata)?,
            },
            Some(FrameType::RequestStream) => FrameBody::RequestStream {
                initial_request_n: header::get_u32(&buf, HEADER_SIZE)?,
                payload: Payload::decode_trailer(&buf, HEADER_SIZE + 4, has_metadata)?,
            },
            Some(FrameType::RequestChannel) => FrameBody::RequestChannel {
                initial_request_n: header::get_u32(&buf, HEADER_SIZE)?,
                complete: frame_flags & flags::COMPLETE != 0,
                payload: Payload::decode_trailer(&buf, HEADER_SIZE + 4, has_metadata)?,
            },
            Some(FrameType::RequestN) => FrameBody::RequestN {
                n: header::get_u32(&buf, HEADER_SIZE)?,
            },
            Some(FrameType::Cancel) => FrameBody::Cancel,
            Some(FrameType::Payload) => FrameBody::Payload {
                follows: frame_flags & flags::FOLLOWS != 0,
                complete: frame_flags & flags::COMPLETE != 0,
                next: frame_flags & flags::NEXT != 0,
                payload: Payload::decode_trailer(&buf, HEADER_SIZE, has_metadata)?,
            },
            Some(FrameType::Error) => FrameBody::Error {
                code: header::get_u32(&buf, HEADER_SIZE)?,
                data: buf.slice(HEADER_SIZE + 4..),
            },
            Some(FrameType::MetadataPush) => {
                let (metadata, _) = header::decode_trailer(&buf, HEADER_SIZE, has_metadata)?;
                FrameBody::MetadataPush {
                    metadata: metadata.unwrap_or_default(),
                }
            }
        };

        let frame = Frame { stream_id, body };
        frame.validate()?;
        Ok(frame)
    }

    /// Structural checks: stream id parity with the frame kind, and
    /// request-n bounds.
    pub fn validate(&self) -> Result<()> {
        match self.frame_type() {
            Some(frame_type) if frame_type.is_connection_level() => {
                if self.stream_id != 0 {
                    return Err(RmuxError::ProtocolViolation(format!(
                        "{frame_type:?} frame must use stream id 0, got {}",
                        self.stream_id
                    )));
                }
            }
            Some(FrameType::Error) | None => {}
            Some(frame_type) => {
                if self.stream_id == 0 {
                    return Err(RmuxError::ProtocolViolation(format!(
                        "{frame_type:?} frame requires a non-zero stream id"
                    )));
                }
            }
        }

        match &self.body {
            FrameBody::RequestN { n } => {
                if *n == 0 || *n > MAX_REQUEST_N {
                    return Err(RmuxError::ProtocolViolation(format!(
                        "request-n out of range: {n}"
                    )));
                }
            }
            FrameBody::RequestStream {
                initial_request_n, ..
            }
            | FrameBody::RequestChannel {
                initial_request_n, ..
            } => {
                if *initial_request_n == 0 || *initial_request_n > MAX_REQUEST_N {
                    return Err(RmuxError::ProtocolViolation(format!(
                        "initial request-n out of range: {initial_request_n}"
                    )));
                }
            }
            FrameBody::Payload { complete, next, .. } => {
                if !complete && !next {
                    return Err(RmuxError::ProtocolViolation(
                        "payload frame carries neither NEXT nor COMPLETE".to_string(),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) -> Frame {
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), frame.encoded_len().unwrap());
        Frame::decode(encoded).unwrap()
    }

    #[test]
    fn test_type_code_round_trip() {
        for code in 0x01..=0x0C {
            let frame_type = FrameType::from_code(code).unwrap();
            assert_eq!(frame_type.code(), code);
        }
        assert!(FrameType::from_code(0x00).is_none());
        assert!(FrameType::from_code(0x3F).is_none());
    }

    #[test]
    fn test_cancel_round_trip() {
        let frame = Frame::new_cancel(7);
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_request_n_round_trip() {
        let frame = Frame::new_request_n(5, 128);
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_request_n_zero_rejected() {
        let frame = Frame::new_request_n(5, 0);
        assert!(matches!(
            frame.encode(),
            Err(RmuxError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_payload_round_trip_with_metadata() {
        let frame = Frame {
            stream_id: 3,
            body: FrameBody::Payload {
                follows: false,
                complete: true,
                next: true,
                payload: Payload::with_metadata(
                    Bytes::from_static(b"route"),
                    Bytes::from_static(b"value"),
                ),
            },
        };
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_payload_without_next_or_complete_rejected() {
        let frame = Frame {
            stream_id: 3,
            body: FrameBody::Payload {
                follows: true,
                complete: false,
                next: false,
                payload: Payload::empty(),
            },
        };
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_request_stream_round_trip() {
        let frame = Frame::new_request_stream(9, 42, Payload::new(Bytes::from_static(b"query")));
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_error_frame_round_trip() {
        let frame = Frame::new_error(11, error_code::APPLICATION_ERROR, "bad request");
        let decoded = round_trip(frame);
        match decoded.body {
            FrameBody::Error { code, data } => {
                assert_eq!(code, error_code::APPLICATION_ERROR);
                assert_eq!(data, Bytes::from_static(b"bad request"));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_connection_frame_with_stream_id_rejected() {
        let frame = Frame {
            stream_id: 4,
            body: FrameBody::Keepalive {
                respond: true,
                data: Bytes::new(),
            },
        };
        assert!(matches!(
            frame.encode(),
            Err(RmuxError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_stream_frame_on_connection_id_rejected() {
        let frame = Frame::new_cancel(0);
        assert!(matches!(
            frame.encode(),
            Err(RmuxError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_unknown_frame_type_preserved() {
        let frame = Frame {
            stream_id: 0,
            body: FrameBody::Unknown {
                type_code: 0x3F,
                flags: flags::IGNORE,
                body: Bytes::from_static(b"extension payload"),
            },
        };
        let decoded = round_trip(frame.clone());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_metadata_push_round_trip() {
        let frame = Frame::new_metadata_push(Bytes::from_static(b"tracing-context"));
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn test_decode_rejects_wrong_length_field() {
        let encoded = Frame::new_cancel(1).encode().unwrap();
        let mut tampered = BytesMut::from(&encoded[..]);
        tampered[2] = tampered[2].wrapping_add(1);
        assert!(matches!(
            Frame::decode(tampered.freeze()),
            Err(RmuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_flags_reflect_body() {
        let frame = Frame::new_payload_next_complete(
            1,
            Payload::with_metadata(Bytes::from_static(b"m"), Bytes::from_static(b"d")),
        );
        assert_eq!(
            frame.flags(),
            flags::METADATA | flags::NEXT | flags::COMPLETE
        );

        let keepalive = Frame::new_keepalive(true, Bytes::new());
        assert_eq!(keepalive.flags(), flags::RESPOND);
    }
}
