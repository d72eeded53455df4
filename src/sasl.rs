//! SASL Layer
//!
//! Client-side SASL negotiation (AMQP 1.0 §5.3). A [`SaslMechanism`]
//! supplies a name and an initial response; [`SaslIo`] drives the
//! handshake itself — sending the SASL protocol header, reading the
//! mechanisms the server offers, sending `sasl-init`, and reacting to
//! `sasl-outcome` — before falling back to an ordinary AMQP header exchange
//! and becoming a transparent pass-through for everything after.

use crate::amqp_frame::{decode_amqp_frame, encode_amqp_frame, AmqpFrameEvent};
use crate::codec::{Decoder, Encoder};
use crate::constants;
use crate::frame::FrameDecoder;
use crate::io::{IoState, IoTransport, StateListener};
use crate::types::{AmqpList, AmqpValue};
use crate::{AmqpError, AmqpResult};
use async_trait::async_trait;

/// Descriptor codes for the SASL performatives this client sends or reads.
mod descriptor {
    pub const SASL_MECHANISMS: u64 = 0x40;
    pub const SASL_INIT: u64 = 0x41;
    pub const SASL_OUTCOME: u64 = 0x44;
}

/// A SASL mechanism a client can use to authenticate.
pub trait SaslMechanism: Send + Sync {
    /// The mechanism name as advertised in `sasl-init`'s `mechanism` field.
    fn name(&self) -> &str;

    /// The bytes sent as `sasl-init`'s `initial-response`.
    fn init_bytes(&self) -> Vec<u8>;
}

/// `PLAIN` (RFC 4616): `[authzid] NUL authcid NUL passwd`, no normalization.
pub struct PlainMechanism {
    authcid: String,
    passwd: String,
}

impl PlainMechanism {
    pub fn new(authcid: impl Into<String>, passwd: impl Into<String>) -> Self {
        PlainMechanism { authcid: authcid.into(), passwd: passwd.into() }
    }
}

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn init_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.authcid.len() + 1 + self.passwd.len());
        bytes.push(0u8);
        bytes.extend_from_slice(self.authcid.as_bytes());
        bytes.push(0u8);
        bytes.extend_from_slice(self.passwd.as_bytes());
        bytes
    }
}

/// Where [`SaslIo`] is in the §5.3 handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaslStage {
    /// Sending the SASL header, awaiting `sasl-mechanisms`.
    AwaitMechanisms,
    /// `sasl-init` sent, awaiting `sasl-outcome`.
    AwaitOutcome,
    /// Outcome was success; now re-exchanging the plain AMQP header.
    AwaitAmqpHeaderEcho,
    /// Negotiation complete; transparent pass-through.
    PassThrough,
}

/// Wraps any [`IoTransport`] and performs SASL negotiation before becoming
/// a transparent pass-through, matching AMQP 1.0 §5.3's state machine.
pub struct SaslIo<T: IoTransport> {
    inner: T,
    mechanism: Box<dyn SaslMechanism>,
    stage: SaslStage,
    frame_decoder: FrameDecoder,
    state: IoState,
    listener: Option<StateListener>,
}

impl<T: IoTransport> SaslIo<T> {
    pub fn new(inner: T, mechanism: Box<dyn SaslMechanism>) -> Self {
        SaslIo {
            inner,
            mechanism,
            stage: SaslStage::AwaitMechanisms,
            frame_decoder: FrameDecoder::new(constants::MAX_FRAME_SIZE),
            state: IoState::NotOpen,
            listener: None,
        }
    }

    fn set_state(&mut self, new_state: IoState) {
        if new_state == self.state {
            return;
        }
        let previous = self.state;
        self.state = new_state;
        if let Some(listener) = &mut self.listener {
            listener(new_state, previous);
        }
    }

    async fn send_init(&mut self) -> AmqpResult<()> {
        let init = AmqpValue::described(
            AmqpValue::Ulong(descriptor::SASL_INIT),
            AmqpValue::List(vec![
                AmqpValue::Symbol(self.mechanism.name().into()),
                AmqpValue::Binary(self.mechanism.init_bytes()),
                AmqpValue::Null,
            ]),
        );
        let frame = encode_amqp_frame(0, &init, &[], constants::MAX_FRAME_SIZE)?;
        self.inner.send(&frame.encode()?).await?;
        self.stage = SaslStage::AwaitOutcome;
        Ok(())
    }

    fn handle_frame_body(&mut self, body: &[u8]) -> AmqpResult<()> {
        let mut decoder = Decoder::empty();
        decoder.feed(body);
        let value = decoder.decode_value()?;
        let descriptor = value
            .descriptor()
            .and_then(|d| match d {
                AmqpValue::Ulong(code) => Some(*code),
                _ => None,
            })
            .ok_or_else(|| AmqpError::protocol("SASL frame missing a described performative"))?;

        match (self.stage, descriptor) {
            (SaslStage::AwaitMechanisms, descriptor::SASL_MECHANISMS) => {
                // Mechanism selection is out of scope here: the configured
                // mechanism is sent regardless of what the server offers,
                // matching the spec's "supplement, don't negotiate" scope.
                Ok(())
            }
            (SaslStage::AwaitOutcome, descriptor::SASL_OUTCOME) => {
                let fields = value.strip_descriptor().as_list().ok_or_else(|| {
                    AmqpError::protocol("sasl-outcome performative is not a list")
                })?;
                let code = fields.first().and_then(|v| match v {
                    AmqpValue::Ubyte(c) => Some(*c),
                    _ => None,
                });
                match code {
                    Some(0) => {
                        self.stage = SaslStage::AwaitAmqpHeaderEcho;
                        Ok(())
                    }
                    other => {
                        self.set_state(IoState::Error);
                        Err(AmqpError::protocol(format!("SASL negotiation failed, outcome code {other:?}")))
                    }
                }
            }
            (stage, descriptor) => Err(AmqpError::protocol(format!(
                "unexpected SASL performative 0x{descriptor:02x} in stage {stage:?}"
            ))),
        }
    }
}

#[async_trait]
impl<T: IoTransport> IoTransport for SaslIo<T> {
    async fn open(&mut self) -> AmqpResult<()> {
        self.inner.open().await?;
        self.set_state(IoState::Opening);
        self.inner.send(&constants::SASL_HEADER).await?;
        Ok(())
    }

    async fn close(&mut self) -> AmqpResult<()> {
        self.inner.close().await?;
        self.set_state(IoState::NotOpen);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> AmqpResult<()> {
        if self.stage != SaslStage::PassThrough {
            return Err(AmqpError::not_open("SASL negotiation has not completed"));
        }
        self.inner.send(data).await
    }

    async fn poll_dowork(&mut self) -> AmqpResult<Vec<u8>> {
        if self.stage == SaslStage::PassThrough {
            return self.inner.poll_dowork().await;
        }

        let received = self.inner.poll_dowork().await?;
        if received.is_empty() {
            return Ok(Vec::new());
        }
        self.frame_decoder.feed(&received);

        while let Some(frame) = self.frame_decoder.poll_frame()? {
            match self.stage {
                SaslStage::AwaitMechanisms => {
                    self.handle_frame_body(&frame.body)?;
                    self.send_init().await?;
                }
                SaslStage::AwaitOutcome => {
                    self.handle_frame_body(&frame.body)?;
                    if self.stage == SaslStage::AwaitAmqpHeaderEcho {
                        self.inner.send(&constants::AMQP_HEADER).await?;
                        self.stage = SaslStage::PassThrough;
                        self.set_state(IoState::Open);
                    }
                }
                SaslStage::AwaitAmqpHeaderEcho | SaslStage::PassThrough => {
                    // Frames arriving after negotiation belong to the AMQP
                    // layer above; this should not happen once PassThrough
                    // is active because poll_dowork returns early above.
                    return Err(AmqpError::protocol("unexpected frame during SASL header re-exchange"));
                }
            }
        }
        Ok(Vec::new())
    }

    fn state(&self) -> IoState {
        self.state
    }

    fn on_state_changed(&mut self, listener: StateListener) {
        self.listener = Some(listener);
    }
}

/// Ensures a decoded SASL performative round-trips through `AmqpFrameEvent`
/// classification the same way a normal AMQP performative would; kept as a
/// free function so `handle_frame_body` doesn't need to depend on frame.rs
/// event types directly.
#[allow(dead_code)]
fn classify(body: &[u8]) -> AmqpResult<AmqpFrameEvent> {
    use crate::frame::{Frame, FrameType};
    decode_amqp_frame(Frame::new(FrameType::Sasl, 0, body.to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_mechanism_encodes_authcid_and_passwd() {
        let mech = PlainMechanism::new("user", "pass");
        let bytes = mech.init_bytes();
        assert_eq!(bytes, vec![0, b'u', b's', b'e', b'r', 0, b'p', b'a', b's', b's']);
        assert_eq!(mech.name(), "PLAIN");
    }

    #[test]
    fn test_sasl_init_performative_shape() {
        let mech = PlainMechanism::new("a", "b");
        let mut encoder = Encoder::new();
        let init = AmqpValue::described(
            AmqpValue::Ulong(descriptor::SASL_INIT),
            AmqpValue::List(vec![
                AmqpValue::Symbol(mech.name().into()),
                AmqpValue::Binary(mech.init_bytes()),
                AmqpValue::Null,
            ]),
        );
        encoder.encode_value(&init).unwrap();
        let bytes = encoder.finish();

        let mut decoder = Decoder::new(bytes);
        let decoded = decoder.decode_value().unwrap();
        let descriptor = decoded.descriptor().cloned().unwrap();
        assert_eq!(descriptor, AmqpValue::Ulong(descriptor::SASL_INIT));
        let fields: &AmqpList = decoded.strip_descriptor().as_list().unwrap();
        assert_eq!(fields[0], AmqpValue::Symbol("PLAIN".into()));
    }
}
