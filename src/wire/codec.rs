//! `tokio_util::codec` implementation of the Framer contract (§4.1).
//!
//! `PacketCodec` implements `Decoder` and `Encoder<Packet>`, so it composes
//! with `tokio_util::codec::Framed<T, PacketCodec>` over any
//! `AsyncRead + AsyncWrite` transport.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

// Layer 3: Internal module imports
use crate::error::WireError;
use crate::util::ids::StageId;
use crate::wire::compress::{self, DEFAULT_COMPRESSION_THRESHOLD};
use crate::wire::packet::{Packet, PacketFlags, MAX_MSG_ID_LEN, MAX_PAYLOAD_LEN};
use crate::wire::pool::BufferPool;

/// Header size excluding the leading `total_length` field and the
/// variable-length `msg_id`/`payload` tails.
const FIXED_HEADER_LEN: usize = 1 /* flags */ + 2 /* msg_seq */ + 8 /* stage_id */
    + 2 /* error_code */ + 1 /* msg_id_len */ + 4 /* payload_len */;

/// `total_length` is capped well above the max payload to leave room for
/// the fixed header and a full 255-byte `msg_id`.
const MAX_TOTAL_LENGTH: u32 = (MAX_PAYLOAD_LEN + FIXED_HEADER_LEN + MAX_MSG_ID_LEN) as u32;

/// Streaming decoder/encoder for the wire frame format.
///
/// Holds a `BufferPool` so payload bytes on the decode path are pulled from
/// a recycled buffer rather than allocated fresh per frame; the pool
/// reference is cheap to clone (`Arc`) so one `BufferPool` is normally
/// shared across every connection's codec.
pub struct PacketCodec {
    pool: Arc<BufferPool>,
    compression_threshold: usize,
    /// Set once the decoder has seen `total_length` for the frame in
    /// progress; cleared after a full frame is emitted.
    pending_len: Option<u32>,
}

impl PacketCodec {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            pending_len: None,
        }
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, WireError> {
        let total_length = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < 4 {
                    return Ok(None);
                }
                let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
                if len > MAX_TOTAL_LENGTH {
                    return Err(WireError::FrameTooLarge {
                        actual: len,
                        max: MAX_TOTAL_LENGTH,
                    });
                }
                self.pending_len = Some(len);
                len
            }
        };

        let full_frame_len = 4 + total_length as usize;
        if src.len() < full_frame_len {
            src.reserve(full_frame_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(full_frame_len);
        self.pending_len = None;
        frame.advance(4);

        if frame.len() < FIXED_HEADER_LEN {
            return Err(WireError::Malformed("frame shorter than fixed header".into()));
        }

        let flags = PacketFlags::from_bits_truncate(frame.get_u8());
        let msg_seq = frame.get_u16();
        let stage_id = StageId::from_raw(frame.get_i64());
        let error_code = frame.get_u16();
        let msg_id_len = frame.get_u8() as usize;
        if msg_id_len == 0 {
            return Err(WireError::EmptyMsgId);
        }
        if msg_id_len > MAX_MSG_ID_LEN {
            return Err(WireError::MsgIdTooLong(msg_id_len));
        }
        if frame.len() < msg_id_len {
            return Err(WireError::Malformed("truncated msg_id".into()));
        }
        let msg_id_bytes = frame.split_to(msg_id_len);
        let msg_id = std::str::from_utf8(&msg_id_bytes)
            .map_err(|e| WireError::Malformed(format!("msg_id is not utf8: {e}")))?
            .to_owned();

        if frame.len() < 4 {
            return Err(WireError::Malformed("truncated payload_len".into()));
        }
        let payload_len = frame.get_u32() as usize;
        if frame.len() != payload_len {
            return Err(WireError::LengthMismatch {
                declared: payload_len as u32,
                header_consumed: (full_frame_len - frame.len() - 4) as u32,
                total_length,
            });
        }

        let payload = if flags.contains(PacketFlags::COMPRESSED) {
            compress::decompress(&frame)?
        } else {
            let mut pooled = self.pool.acquire(frame.len());
            pooled.put_slice(&frame);
            Bytes::copy_from_slice(&pooled)
        };

        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(WireError::FrameTooLarge {
                actual: payload.len() as u32,
                max: MAX_PAYLOAD_LEN as u32,
            });
        }

        let packet = Packet::new(msg_id, msg_seq, stage_id, error_code, flags, payload)?;
        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), WireError> {
        let msg_id_bytes = packet.msg_id().as_bytes();
        if msg_id_bytes.is_empty() {
            return Err(WireError::EmptyMsgId);
        }
        if msg_id_bytes.len() > MAX_MSG_ID_LEN {
            return Err(WireError::MsgIdTooLong(msg_id_bytes.len()));
        }

        let mut flags = packet.flags();
        let raw_payload = packet.payload();
        let (payload, flags) = match compress::maybe_compress(raw_payload, self.compression_threshold) {
            Some(compressed) => {
                flags.insert(PacketFlags::COMPRESSED);
                (compressed, flags)
            }
            None => (raw_payload.clone(), flags),
        };

        let total_length = FIXED_HEADER_LEN as u32 + msg_id_bytes.len() as u32 + payload.len() as u32;

        dst.reserve(4 + total_length as usize);
        dst.put_u32(total_length);
        dst.put_u8(flags.bits());
        dst.put_u16(packet.msg_seq());
        dst.put_i64(packet.stage_id().get());
        dst.put_u16(packet.error_code());
        dst.put_u8(msg_id_bytes.len() as u8);
        dst.put_slice(msg_id_bytes);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn codec() -> PacketCodec {
        PacketCodec::new(BufferPool::new())
    }

    #[test]
    fn encode_then_decode_roundtrips_a_small_frame() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let packet = Packet::new(
            "Echo",
            7,
            StageId::from_raw(42),
            0,
            PacketFlags::empty(),
            Bytes::from_static(b"hi"),
        )
        .unwrap();
        codec.encode(packet, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("full frame present");
        assert_eq!(decoded.msg_id(), "Echo");
        assert_eq!(decoded.msg_seq(), 7);
        assert_eq!(decoded.stage_id(), StageId::from_raw(42));
        assert_eq!(decoded.payload().as_ref(), b"hi");
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let packet = Packet::new(
            "Echo",
            1,
            StageId::from_raw(1),
            0,
            PacketFlags::empty(),
            Bytes::from_static(b"hello world"),
        )
        .unwrap();
        codec.encode(packet, &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 2);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn decode_accumulates_across_multiple_feeds() {
        let mut codec = codec();
        let mut full = BytesMut::new();
        let packet = Packet::new(
            "Echo",
            1,
            StageId::from_raw(1),
            0,
            PacketFlags::empty(),
            Bytes::from_static(b"streamed payload"),
        )
        .unwrap();
        codec.encode(packet, &mut full).unwrap();

        let mid = full.len() / 2;
        let mut buf = full.split_to(mid);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.unsplit(full);
        let decoded = codec.decode(&mut buf).unwrap().expect("now complete");
        assert_eq!(decoded.payload().as_ref(), b"streamed payload");
    }

    #[test]
    fn large_compressible_payload_roundtrips_through_compression() {
        let mut codec = codec().with_compression_threshold(16);
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![3u8; 4096]);
        let packet = Packet::new("Bulk", 0, StageId::from_raw(1), 0, PacketFlags::empty(), payload.clone()).unwrap();
        codec.encode(packet, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload().as_ref(), payload.as_ref());
    }

    #[test]
    fn empty_payload_is_accepted() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let packet = Packet::new("Ping", 0, StageId::from_raw(1), 0, PacketFlags::empty(), Bytes::new()).unwrap();
        codec.encode(packet, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload().len(), 0);
    }

    #[test]
    fn oversize_total_length_is_rejected_without_buffering_payload() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_TOTAL_LENGTH + 1);
        let result = codec.decode(&mut buf);
        assert!(result.is_err());
    }
}
