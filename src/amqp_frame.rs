//! AMQP-Frame Codec
//!
//! Sits on top of [`crate::frame`]: interprets a frame's body as a
//! performative (a described value, per AMQP §2.8.1) followed by an
//! optional opaque payload (message bytes, for TRANSFER frames). A frame
//! whose body is empty is a heartbeat, not a performative, and is reported
//! as such rather than forcing callers to special-case "decoded nothing."

use crate::codec::{Decoder, Encoder};
use crate::frame::{Frame, FrameType};
use crate::types::AmqpValue;
use crate::{AmqpError, AmqpResult};

/// One decoded AMQP frame, classified as either a performative (with any
/// trailing payload bytes) or a heartbeat.
#[derive(Debug, Clone)]
pub enum AmqpFrameEvent {
    Performative {
        channel: u16,
        performative: AmqpValue,
        payload: Vec<u8>,
    },
    Heartbeat {
        channel: u16,
    },
}

/// Decode one already-framed [`Frame`] (from `frame::FrameDecoder`) into an
/// [`AmqpFrameEvent`].
pub fn decode_amqp_frame(frame: Frame) -> AmqpResult<AmqpFrameEvent> {
    if frame.frame_type != FrameType::Amqp {
        return Err(AmqpError::protocol("expected an AMQP frame type"));
    }
    if frame.body.is_empty() {
        return Ok(AmqpFrameEvent::Heartbeat { channel: frame.channel });
    }

    let mut decoder = Decoder::empty();
    decoder.feed(&frame.body);
    let performative = decoder.decode_value()?;

    // Whatever bytes the decoder didn't need for the performative are the
    // message payload (only meaningful for TRANSFER frames). Read the
    // decoder's own remaining-byte count rather than re-encoding the
    // performative — a non-minimally-encoded peer value would re-encode to
    // a different length than what was actually consumed.
    let consumed = frame.body.len() - decoder.remaining_len();
    let payload = frame.body[consumed..].to_vec();

    Ok(AmqpFrameEvent::Performative { channel: frame.channel, performative, payload })
}

/// Builds one AMQP frame (or, if the payload is too large for the
/// connection's negotiated max frame size, returns an error — this layer
/// does not fragment a TRANSFER across continuation frames; that's
/// `link.rs`'s job) carrying `performative` and `payload`.
pub fn encode_amqp_frame(channel: u16, performative: &AmqpValue, payload: &[u8], max_frame_size: u32) -> AmqpResult<Frame> {
    let mut encoder = Encoder::new();
    encoder.encode_value(performative)?;
    let mut body = encoder.finish();
    body.extend_from_slice(payload);

    let frame = Frame::new(FrameType::Amqp, channel, body);
    if frame.encoded_len() as u32 > max_frame_size {
        return Err(AmqpError::argument(format!(
            "performative plus payload ({} bytes) exceeds max frame size {}",
            frame.encoded_len(),
            max_frame_size
        )));
    }
    Ok(frame)
}

/// Builds an empty-body heartbeat frame for `channel` (conventionally 0).
pub fn encode_heartbeat(channel: u16) -> Frame {
    Frame::new(FrameType::Amqp, channel, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;
    use crate::types::{AmqpMap, AmqpSymbol};

    fn open_performative() -> AmqpValue {
        let mut fields = AmqpMap::new();
        fields.insert(AmqpSymbol::from("container-id"), AmqpValue::String("test".into()));
        AmqpValue::described(AmqpValue::Ulong(0x10), AmqpValue::List(vec![AmqpValue::Map(fields)]))
    }

    #[test]
    fn test_encode_decode_performative_round_trip() {
        let performative = open_performative();
        let frame = encode_amqp_frame(0, &performative, &[], 65536).unwrap();

        let mut decoder = FrameDecoder::new(65536);
        decoder.feed(&frame.encode().unwrap());
        let decoded_frame = decoder.poll_frame().unwrap().unwrap();

        match decode_amqp_frame(decoded_frame).unwrap() {
            AmqpFrameEvent::Performative { channel, performative: decoded, payload } => {
                assert_eq!(channel, 0);
                assert_eq!(decoded, performative);
                assert!(payload.is_empty());
            }
            AmqpFrameEvent::Heartbeat { .. } => panic!("expected a performative"),
        }
    }

    #[test]
    fn test_transfer_with_payload_splits_correctly() {
        let performative = AmqpValue::described(AmqpValue::Ulong(0x14), AmqpValue::List(vec![AmqpValue::Uint(1)]));
        let payload = b"message body bytes".to_vec();
        let frame = encode_amqp_frame(2, &performative, &payload, 65536).unwrap();

        match decode_amqp_frame(frame).unwrap() {
            AmqpFrameEvent::Performative { performative: decoded, payload: decoded_payload, .. } => {
                assert_eq!(decoded, performative);
                assert_eq!(decoded_payload, payload);
            }
            AmqpFrameEvent::Heartbeat { .. } => panic!("expected a performative"),
        }
    }

    #[test]
    fn test_empty_body_is_heartbeat() {
        let frame = encode_heartbeat(0);
        assert!(frame.body.is_empty());
        match decode_amqp_frame(frame).unwrap() {
            AmqpFrameEvent::Heartbeat { channel } => assert_eq!(channel, 0),
            AmqpFrameEvent::Performative { .. } => panic!("expected a heartbeat"),
        }
    }

    #[test]
    fn test_oversized_performative_rejected() {
        let big_string = AmqpValue::String("x".repeat(1000));
        let performative = AmqpValue::described(AmqpValue::Ulong(0x10), AmqpValue::List(vec![big_string]));
        let result = encode_amqp_frame(0, &performative, &[], 64);
        assert!(result.is_err());
    }
}
