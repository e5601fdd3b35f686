//! Length-delimited framing over a byte-stream transport.
//!
//! The u24 length field at the front of every frame doubles as the framing
//! prefix, so the decoder slices the inbound byte stream into complete
//! frame buffers and leaves body parsing to [`Frame::decode`]. That split
//! keeps body-level decode failures recoverable: the session drops the one
//! bad frame and stays in sync, while framing-level failures (a declared
//! length shorter than a header, or past the size cap) poison the byte
//! stream and are fatal.

use crate::{
    config::Config,
    error::RmuxError,
    frame::Frame,
    header::{self, FRAME_LENGTH_SIZE, HEADER_SIZE},
};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
pub struct Codec {
    max_frame_size: usize,
}

impl Codec {
    pub fn new(config: &Config) -> Self {
        Self {
            max_frame_size: config.max_frame_size,
        }
    }
}

impl Decoder for Codec {
    type Item = Bytes;
    type Error = RmuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_LENGTH_SIZE {
            return Ok(None);
        }

        let frame_len = header::get_u24(src, 0)?;
        if frame_len < HEADER_SIZE {
            return Err(RmuxError::MalformedFrame(format!(
                "declared frame length {frame_len} is shorter than a header"
            )));
        }
        if frame_len > self.max_frame_size {
            return Err(RmuxError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

impl Encoder<Frame> for Codec {
    type Error = RmuxError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let encoded = frame.encode()?;
        if encoded.len() > self.max_frame_size {
            return Err(RmuxError::FrameTooLarge {
                size: encoded.len(),
                max: self.max_frame_size,
            });
        }
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Payload;

    fn test_codec() -> Codec {
        Codec::new(&Config::default())
    }

    #[test]
    fn test_round_trip() {
        let mut codec = test_codec();
        let frame = Frame::new_payload_next(3, Payload::new(Bytes::from_static(b"hello")));

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Frame::decode(raw).unwrap(), frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_partial_length_prefix() {
        let mut codec = test_codec();
        let mut buf = BytesMut::from(&[0u8, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = test_codec();
        let frame = Frame::new_payload_next(3, Payload::new(Bytes::from_static(b"hello world")));

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let mut partial = BytesMut::from(&buf[..HEADER_SIZE + 3]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_decode_multiple_frames() {
        let mut codec = test_codec();
        let first = Frame::new_cancel(1);
        let second = Frame::new_request_n(1, 10);

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Frame::decode(raw).unwrap(), first);
        let raw = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Frame::decode(raw).unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_inbound_frame_is_fatal() {
        let config = Config {
            max_frame_size: 64,
            ..Default::default()
        };
        let mut codec = Codec::new(&config);

        let mut buf = BytesMut::new();
        header::put_u24(&mut buf, 1000);
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(RmuxError::FrameTooLarge { size: 1000, .. })
        ));
    }

    #[test]
    fn test_undersized_length_field_is_fatal() {
        let mut codec = test_codec();
        let mut buf = BytesMut::new();
        header::put_u24(&mut buf, HEADER_SIZE - 1);
        buf.extend_from_slice(&[0u8; 16]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(RmuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encode_oversized_frame_rejected() {
        let config = Config {
            max_frame_size: 32,
            ..Default::default()
        };
        let mut codec = Codec::new(&config);
        let frame = Frame::new_payload_next(3, Payload::new(Bytes::from(vec![0u8; 64])));

        let mut buf = BytesMut::new();
        assert!(codec.encode(frame, &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
