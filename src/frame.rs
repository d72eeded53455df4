//! AMQP 1.0 Frame Codec
//!
//! A frame is the unit the connection actually puts on the wire: a fixed
//! 8-byte header (size, data offset, frame type, channel) followed by an
//! optional extended header and a type-specific body. This module decodes
//! frames incrementally from a byte stream — no assumption is made that a
//! whole frame (let alone more than one) has arrived in a single read — and
//! encodes frames from an already-serialized body.
//!
//! Frame body interpretation (performative + payload) is layered on top in
//! [`crate::amqp_frame`]; this module only knows about frame shape.

use crate::constants;
use crate::{AmqpError, AmqpResult};
use bytes::{Buf, BufMut, BytesMut};

/// AMQP-defined frame types carried in the frame header's type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Amqp = 0x00,
    Sasl = 0x01,
}

impl FrameType {
    pub fn from_u8(byte: u8) -> AmqpResult<Self> {
        match byte {
            0x00 => Ok(FrameType::Amqp),
            0x01 => Ok(FrameType::Sasl),
            other => Err(AmqpError::decoding(format!("unknown frame type {other}"))),
        }
    }
}

/// A decoded frame: header fields plus the extended header and body, split
/// apart but not yet interpreted as a performative.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub channel: u16,
    /// Bytes between the fixed header and the body, as declared by the
    /// data offset. Empty for ordinary AMQP frames; transfer frames' own
    /// payload offset is tracked separately by `amqp_frame`.
    pub extended_header: Vec<u8>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, channel: u16, body: Vec<u8>) -> Self {
        Frame { frame_type, channel, extended_header: Vec::new(), body }
    }

    /// Total wire size of this frame once encoded, including the 8-byte
    /// fixed header.
    pub fn encoded_len(&self) -> usize {
        8 + self.extended_header.len() + self.body.len()
    }

    pub fn encode(&self) -> AmqpResult<Vec<u8>> {
        let doff_words = 2 + self.extended_header.len().div_ceil(4);
        if doff_words > u8::MAX as usize {
            return Err(AmqpError::encoding("extended header too large to encode in data offset"));
        }
        let size = self.encoded_len() + (doff_words * 4 - 8 - self.extended_header.len());
        if size > constants::MAX_FRAME_SIZE as usize {
            return Err(AmqpError::encoding("frame exceeds maximum frame size"));
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u32(size as u32);
        buf.put_u8(doff_words as u8);
        buf.put_u8(self.frame_type as u8);
        buf.put_u16(self.channel);
        buf.extend_from_slice(&self.extended_header);
        // Pad the extended header out to a 4-byte doff boundary.
        let padding = doff_words * 4 - 8 - self.extended_header.len();
        buf.extend_from_slice(&vec![0u8; padding]);
        buf.extend_from_slice(&self.body);
        Ok(buf.to_vec())
    }
}

/// Where [`FrameDecoder`] is within one frame's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeStage {
    AwaitSize,
    AwaitDoff,
    AwaitType,
    AwaitChannel,
    AwaitExtHeader,
    AwaitBody,
}

/// Incrementally decodes a byte stream into [`Frame`]s.
///
/// Bytes arrive via [`feed`](FrameDecoder::feed) in whatever chunks the
/// transport happens to deliver them; [`poll_frame`] returns a frame as
/// soon as its declared size is fully buffered, or `Ok(None)` if more
/// bytes are required. State carries across calls explicitly (`stage`,
/// partially-read header fields), so a frame split across many reads
/// decodes identically to one delivered whole.
pub struct FrameDecoder {
    buf: BytesMut,
    stage: DecodeStage,
    size: u32,
    doff: u8,
    frame_type: u8,
    channel: u16,
    max_frame_size: u32,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u32) -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            stage: DecodeStage::AwaitSize,
            size: 0,
            doff: 0,
            frame_type: 0,
            channel: 0,
            max_frame_size,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempt to decode one frame from buffered bytes. `Ok(None)` means
    /// more bytes are needed before this frame is complete.
    pub fn poll_frame(&mut self) -> AmqpResult<Option<Frame>> {
        loop {
            match self.stage {
                DecodeStage::AwaitSize => {
                    if self.buf.len() < 4 {
                        return Ok(None);
                    }
                    self.size = u32::from_be_bytes(self.buf[0..4].try_into().unwrap());
                    if self.size < 8 {
                        return Err(AmqpError::decoding("frame size smaller than fixed header"));
                    }
                    if self.size > self.max_frame_size {
                        return Err(AmqpError::decoding(format!(
                            "frame size {} exceeds negotiated max frame size {}",
                            self.size, self.max_frame_size
                        )));
                    }
                    self.stage = DecodeStage::AwaitDoff;
                }
                DecodeStage::AwaitDoff => {
                    if self.buf.len() < 5 {
                        return Ok(None);
                    }
                    self.doff = self.buf[4];
                    if self.doff < 2 {
                        return Err(AmqpError::decoding("data offset smaller than fixed header"));
                    }
                    self.stage = DecodeStage::AwaitType;
                }
                DecodeStage::AwaitType => {
                    if self.buf.len() < 6 {
                        return Ok(None);
                    }
                    self.frame_type = self.buf[5];
                    self.stage = DecodeStage::AwaitChannel;
                }
                DecodeStage::AwaitChannel => {
                    if self.buf.len() < 8 {
                        return Ok(None);
                    }
                    self.channel = u16::from_be_bytes(self.buf[6..8].try_into().unwrap());
                    self.stage = DecodeStage::AwaitExtHeader;
                }
                DecodeStage::AwaitExtHeader | DecodeStage::AwaitBody => {
                    let doff_bytes = self.doff as usize * 4;
                    if doff_bytes > self.size as usize {
                        return Err(AmqpError::decoding("data offset larger than frame size"));
                    }
                    if self.buf.len() < self.size as usize {
                        return Ok(None);
                    }

                    let frame_type = FrameType::from_u8(self.frame_type)?;
                    let extended_header = self.buf[8..doff_bytes].to_vec();
                    let body = self.buf[doff_bytes..self.size as usize].to_vec();
                    self.buf.advance(self.size as usize);

                    self.stage = DecodeStage::AwaitSize;
                    return Ok(Some(Frame { frame_type, channel: self.channel, extended_header, body }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let frame = Frame::new(FrameType::Amqp, 3, vec![1, 2, 3, 4]);
        let encoded = frame.encode().unwrap();

        let mut decoder = FrameDecoder::new(constants::MAX_FRAME_SIZE);
        decoder.feed(&encoded);
        let decoded = decoder.poll_frame().unwrap().unwrap();
        assert_eq!(decoded.frame_type, FrameType::Amqp);
        assert_eq!(decoded.channel, 3);
        assert_eq!(decoded.body, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let frame = Frame::new(FrameType::Sasl, 0, vec![9, 9, 9]);
        let encoded = frame.encode().unwrap();

        let mut decoder = FrameDecoder::new(constants::MAX_FRAME_SIZE);
        let mut result = None;
        for byte in &encoded {
            decoder.feed(std::slice::from_ref(byte));
            if let Some(frame) = decoder.poll_frame().unwrap() {
                result = Some(frame);
                break;
            }
        }
        let decoded = result.expect("frame should decode once all bytes are fed");
        assert_eq!(decoded.channel, 0);
        assert_eq!(decoded.body, vec![9, 9, 9]);
    }

    #[test]
    fn test_decode_multiple_frames_from_one_feed() {
        let f1 = Frame::new(FrameType::Amqp, 1, vec![1]);
        let f2 = Frame::new(FrameType::Amqp, 2, vec![2, 2]);
        let mut combined = f1.encode().unwrap();
        combined.extend(f2.encode().unwrap());

        let mut decoder = FrameDecoder::new(constants::MAX_FRAME_SIZE);
        decoder.feed(&combined);
        let first = decoder.poll_frame().unwrap().unwrap();
        let second = decoder.poll_frame().unwrap().unwrap();
        assert_eq!(first.channel, 1);
        assert_eq!(second.channel, 2);
        assert_eq!(decoder.poll_frame().unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed(&[0, 0, 10, 0]);
        decoder.feed(&[2, 0, 0, 0]);
        assert!(decoder.poll_frame().is_err());
    }

    #[test]
    fn test_heartbeat_frame_has_empty_body() {
        let frame = Frame::new(FrameType::Amqp, 0, Vec::new());
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), 8);

        let mut decoder = FrameDecoder::new(constants::MAX_FRAME_SIZE);
        decoder.feed(&encoded);
        let decoded = decoder.poll_frame().unwrap().unwrap();
        assert!(decoded.body.is_empty());
    }
}
