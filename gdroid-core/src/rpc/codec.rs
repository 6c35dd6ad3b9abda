use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{GatewayError, Result};
use crate::rpc::header::{FrameHeader, HEADER_SIZE, HeaderBytes};
use crate::rpc::packet::{Frame, MAX_PAYLOAD_SIZE};

/// Length-delimited codec for [`Frame`]s, for use with `Framed`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayCodec;

impl Decoder for GatewayCodec {
    type Item = Frame;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut raw: HeaderBytes = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&src[..HEADER_SIZE]);
        let header = FrameHeader::from_bytes(&raw)?;

        let length = header.length as usize;
        if length > MAX_PAYLOAD_SIZE {
            return Err(GatewayError::PayloadTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if src.len() < HEADER_SIZE + length {
            src.reserve(HEADER_SIZE + length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(HEADER_SIZE + length);
        let payload = frame.split_off(HEADER_SIZE).freeze();
        Frame::from_parts(header, payload).map(Some)
    }
}

impl Encoder<Frame> for GatewayCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::header::FrameKind;
    use bytes::Bytes;

    #[test]
    fn decodes_across_partial_reads() {
        let mut codec = GatewayCodec;
        let mut encoded = BytesMut::new();
        codec
            .encode(Frame::message(42, Bytes::from_static(b"payload")).unwrap(), &mut encoded)
            .unwrap();
        codec.encode(Frame::half_close(42), &mut encoded).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[10..HEADER_SIZE + 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[HEADER_SIZE + 3..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.kind(), FrameKind::Message);
        assert_eq!(first.call_id(), 42);
        assert_eq!(first.payload(), b"payload");

        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.kind(), FrameKind::HalfClose);
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_length_before_buffering() {
        let header = FrameHeader {
            checksum: 1,
            kind: FrameKind::Message,
            call_id: 1,
            length: (MAX_PAYLOAD_SIZE + 1) as u32,
        };
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        let err = GatewayCodec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut buf = BytesMut::new();
        GatewayCodec
            .encode(Frame::message(1, Bytes::from_static(b"abc")).unwrap(), &mut buf)
            .unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            GatewayCodec.decode(&mut buf),
            Err(GatewayError::InvalidFrame("checksum mismatch"))
        ));
    }
}
