//! AMQP 1.0 Message System
//!
//! This module provides the message structures and manipulation utilities for AMQP 1.0.
//! Messages are the primary unit of data transfer in AMQP 1.0 and can contain various
//! types of content and metadata.
//!
//! # Overview
//!
//! AMQP 1.0 messages consist of several sections:
//!
//! - **Header**: Contains delivery-related information
//! - **Delivery Annotations**: Transport-level annotations
//! - **Message Annotations**: Application-level annotations
//! - **Properties**: Application-level properties
//! - **Application Properties**: Custom application data
//! - **Body**: The actual message content
//! - **Footer**: Transport-level trailing information
//!
//! # Examples
//!
//! ## Creating Simple Messages
//!
//! ```rust
//! use amqp1_engine::message::Message;
//!
//! // Text message
//! let text_msg = Message::text("Hello, World!");
//!
//! // Binary message
//! let binary_msg = Message::binary(b"Binary data");
//! ```
//!
//! ## Creating Complex Messages
//!
//! ```rust
//! use amqp1_engine::message::{Message, MessageBuilder, Body};
//! use amqp1_engine::types::{AmqpValue, AmqpSymbol};
//!
//! let message = Message::builder()
//!     .body(Body::Value(AmqpValue::String("Custom content".to_string())))
//!     .build()
//!     .with_message_id("msg-001")
//!     .with_subject("Test Message")
//!     .with_content_type(AmqpSymbol::from("text/plain"));
//! ```
//!
//! ## Accessing Message Content
//!
//! ```rust
//! use amqp1_engine::message::Message;
//!
//! let message = Message::text("Hello, World!");
//!
//! // Get text content
//! if let Some(text) = message.body_as_text() {
//!     println!("Message text: {}", text);
//! }
//!
//! // Get binary content
//! if let Some(binary) = message.body_as_binary() {
//!     println!("Message binary: {:?}", binary);
//! }
//! ```

use crate::codec::{Decoder, Encoder};
use crate::{AmqpError, AmqpMap, AmqpResult, AmqpSymbol, AmqpValue, types::AmqpList};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Section descriptor codes (AMQP 1.0 §3.2).
mod descriptor {
    pub const HEADER: u64 = 0x70;
    pub const DELIVERY_ANNOTATIONS: u64 = 0x71;
    pub const MESSAGE_ANNOTATIONS: u64 = 0x72;
    pub const PROPERTIES: u64 = 0x73;
    pub const APPLICATION_PROPERTIES: u64 = 0x74;
    pub const DATA: u64 = 0x75;
    pub const AMQP_SEQUENCE: u64 = 0x76;
    pub const AMQP_VALUE: u64 = 0x77;
    pub const FOOTER: u64 = 0x78;
}

/// AMQP 1.0 Message structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message header
    pub header: Option<Header>,
    /// Message delivery annotations
    pub delivery_annotations: Option<AmqpMap>,
    /// Message annotations
    pub message_annotations: Option<AmqpMap>,
    /// Message properties
    pub properties: Option<Properties>,
    /// Application properties
    pub application_properties: Option<AmqpMap>,
    /// Message body
    pub body: Option<Body>,
    /// Footer
    pub footer: Option<AmqpMap>,
}

/// AMQP 1.0 Message Header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Whether the message is durable
    pub durable: Option<bool>,
    /// Priority of the message
    pub priority: Option<u8>,
    /// Time to live in milliseconds
    pub ttl: Option<u32>,
    /// Whether the message should be delivered at first head
    pub first_acquirer: Option<bool>,
    /// Delivery count
    pub delivery_count: Option<u32>,
}

impl Header {
    /// Create a new empty header
    pub fn new() -> Self {
        Header {
            durable: None,
            priority: None,
            ttl: None,
            first_acquirer: None,
            delivery_count: None,
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new()
    }
}

/// AMQP 1.0 Message Properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// Message ID
    pub message_id: Option<AmqpValue>,
    /// User ID
    pub user_id: Option<Vec<u8>>,
    /// To address
    pub to: Option<String>,
    /// Subject
    pub subject: Option<String>,
    /// Reply to address
    pub reply_to: Option<String>,
    /// Correlation ID
    pub correlation_id: Option<AmqpValue>,
    /// Content type
    pub content_type: Option<AmqpSymbol>,
    /// Content encoding
    pub content_encoding: Option<AmqpSymbol>,
    /// Absolute expiry time
    pub absolute_expiry_time: Option<i64>,
    /// Creation time
    pub creation_time: Option<i64>,
    /// Group ID
    pub group_id: Option<String>,
    /// Group sequence
    pub group_sequence: Option<u32>,
    /// Reply to group ID
    pub reply_to_group_id: Option<String>,
}

impl Default for Properties {
    fn default() -> Self {
        Properties {
            message_id: None,
            user_id: None,
            to: None,
            subject: None,
            reply_to: None,
            correlation_id: None,
            content_type: None,
            content_encoding: None,
            absolute_expiry_time: None,
            creation_time: None,
            group_id: None,
            group_sequence: None,
            reply_to_group_id: None,
        }
    }
}

impl Properties {
    /// Create a new empty properties
    pub fn new() -> Self {
        Properties::default()
    }
}

/// AMQP 1.0 Message Body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Data body (binary)
    Data(Vec<u8>),
    /// Amqp value body
    Value(AmqpValue),
    /// Amqp sequence body
    Sequence(AmqpList),
    /// Multiple data sections
    Multiple(Vec<Body>),
}

/// Message Builder for constructing AMQP 1.0 messages
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Create a new message builder
    pub fn new() -> Self {
        MessageBuilder {
            message: Message {
                header: None,
                delivery_annotations: None,
                message_annotations: None,
                properties: None,
                application_properties: None,
                body: None,
                footer: None,
            },
        }
    }

    /// Set the message header
    pub fn header(mut self, header: Header) -> Self {
        self.message.header = Some(header);
        self
    }

    /// Set delivery annotations
    pub fn delivery_annotations(mut self, annotations: AmqpMap) -> Self {
        self.message.delivery_annotations = Some(annotations);
        self
    }

    /// Set message annotations
    pub fn message_annotations(mut self, annotations: AmqpMap) -> Self {
        self.message.message_annotations = Some(annotations);
        self
    }

    /// Set message properties
    pub fn properties(mut self, properties: Properties) -> Self {
        self.message.properties = Some(properties);
        self
    }

    /// Set application properties
    pub fn application_properties(mut self, properties: AmqpMap) -> Self {
        self.message.application_properties = Some(properties);
        self
    }

    /// Set message body
    pub fn body(mut self, body: Body) -> Self {
        self.message.body = Some(body);
        self
    }

    /// Set footer
    pub fn footer(mut self, footer: AmqpMap) -> Self {
        self.message.footer = Some(footer);
        self
    }

    /// Build the message
    pub fn build(self) -> Message {
        self.message
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Message {
    /// Create a new empty message
    pub fn new() -> Self {
        Message {
            header: None,
            delivery_annotations: None,
            message_annotations: None,
            properties: None,
            application_properties: None,
            body: None,
            footer: None,
        }
    }

    /// Create a new message builder
    pub fn builder() -> MessageBuilder {
        MessageBuilder::new()
    }

    /// Create a simple text message
    pub fn text(text: impl Into<String>) -> Self {
        MessageBuilder::new()
            .body(Body::Value(AmqpValue::String(text.into())))
            .build()
    }

    /// Create a simple binary message
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        MessageBuilder::new()
            .body(Body::Data(data.into()))
            .build()
    }

    /// Get the message body as text if it's a string value
    pub fn body_as_text(&self) -> Option<&str> {
        match &self.body {
            Some(Body::Value(AmqpValue::String(s))) => Some(s),
            _ => None,
        }
    }

    /// Get the message body as binary data
    pub fn body_as_binary(&self) -> Option<&[u8]> {
        match &self.body {
            Some(Body::Data(data)) => Some(data),
            _ => None,
        }
    }

    /// Get the message ID as a string
    pub fn message_id_as_string(&self) -> Option<String> {
        match &self.properties {
            Some(props) => match &props.message_id {
                Some(AmqpValue::String(s)) => Some(s.clone()),
                Some(AmqpValue::Uuid(uuid)) => Some(uuid.to_string()),
                _ => None,
            },
            None => None,
        }
    }

    /// Set a simple message ID (string)
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        if self.properties.is_none() {
            self.properties = Some(Properties {
                message_id: None,
                user_id: None,
                to: None,
                subject: None,
                reply_to: None,
                correlation_id: None,
                content_type: None,
                content_encoding: None,
                absolute_expiry_time: None,
                creation_time: None,
                group_id: None,
                group_sequence: None,
                reply_to_group_id: None,
            });
        }
        
        if let Some(props) = &mut self.properties {
            props.message_id = Some(AmqpValue::String(id.into()));
        }
        
        self
    }

    /// Set a UUID message ID
    pub fn with_uuid_message_id(mut self, id: Uuid) -> Self {
        if self.properties.is_none() {
            self.properties = Some(Properties {
                message_id: None,
                user_id: None,
                to: None,
                subject: None,
                reply_to: None,
                correlation_id: None,
                content_type: None,
                content_encoding: None,
                absolute_expiry_time: None,
                creation_time: None,
                group_id: None,
                group_sequence: None,
                reply_to_group_id: None,
            });
        }
        
        if let Some(props) = &mut self.properties {
            props.message_id = Some(AmqpValue::Uuid(id));
        }
        
        self
    }

    /// Set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        if self.properties.is_none() {
            self.properties = Some(Properties {
                message_id: None,
                user_id: None,
                to: None,
                subject: None,
                reply_to: None,
                correlation_id: None,
                content_type: None,
                content_encoding: None,
                absolute_expiry_time: None,
                creation_time: None,
                group_id: None,
                group_sequence: None,
                reply_to_group_id: None,
            });
        }
        
        if let Some(props) = &mut self.properties {
            props.subject = Some(subject.into());
        }
        
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<AmqpSymbol>) -> Self {
        if self.properties.is_none() {
            self.properties = Some(Properties {
                message_id: None,
                user_id: None,
                to: None,
                subject: None,
                reply_to: None,
                correlation_id: None,
                content_type: None,
                content_encoding: None,
                absolute_expiry_time: None,
                creation_time: None,
                group_id: None,
                group_sequence: None,
                reply_to_group_id: None,
            });
        }
        
        if let Some(props) = &mut self.properties {
            props.content_type = Some(content_type.into());
        }
        
        self
    }
}

impl Message {
    /// Encode this message as the concatenation of its AMQP sections, ready
    /// to become a TRANSFER frame's payload.
    pub fn encode(&self) -> AmqpResult<Vec<u8>> {
        let mut encoder = Encoder::new();

        if let Some(header) = &self.header {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::HEADER),
                AmqpValue::List(vec![
                    header.durable.map(AmqpValue::Boolean).unwrap_or(AmqpValue::Null),
                    header.priority.map(AmqpValue::Ubyte).unwrap_or(AmqpValue::Null),
                    header.ttl.map(AmqpValue::Uint).unwrap_or(AmqpValue::Null),
                    header.first_acquirer.map(AmqpValue::Boolean).unwrap_or(AmqpValue::Null),
                    header.delivery_count.map(AmqpValue::Uint).unwrap_or(AmqpValue::Null),
                ]),
            ))?;
        }
        if let Some(annotations) = &self.delivery_annotations {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::DELIVERY_ANNOTATIONS),
                AmqpValue::Map(annotations.clone()),
            ))?;
        }
        if let Some(annotations) = &self.message_annotations {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::MESSAGE_ANNOTATIONS),
                AmqpValue::Map(annotations.clone()),
            ))?;
        }
        if let Some(properties) = &self.properties {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::PROPERTIES),
                AmqpValue::List(vec![
                    properties.message_id.clone().unwrap_or(AmqpValue::Null),
                    properties.user_id.clone().map(AmqpValue::Binary).unwrap_or(AmqpValue::Null),
                    properties.to.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null),
                    properties.subject.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null),
                    properties.reply_to.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null),
                    properties.correlation_id.clone().unwrap_or(AmqpValue::Null),
                    properties.content_type.clone().map(AmqpValue::Symbol).unwrap_or(AmqpValue::Null),
                    properties.content_encoding.clone().map(AmqpValue::Symbol).unwrap_or(AmqpValue::Null),
                    properties.absolute_expiry_time.map(AmqpValue::Timestamp).unwrap_or(AmqpValue::Null),
                    properties.creation_time.map(AmqpValue::Timestamp).unwrap_or(AmqpValue::Null),
                    properties.group_id.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null),
                    properties.group_sequence.map(AmqpValue::Uint).unwrap_or(AmqpValue::Null),
                    properties.reply_to_group_id.clone().map(AmqpValue::String).unwrap_or(AmqpValue::Null),
                ]),
            ))?;
        }
        if let Some(props) = &self.application_properties {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::APPLICATION_PROPERTIES),
                AmqpValue::Map(props.clone()),
            ))?;
        }
        if let Some(body) = &self.body {
            encode_body(&mut encoder, body)?;
        }
        if let Some(footer) = &self.footer {
            encoder.encode_value(&AmqpValue::described(
                AmqpValue::Ulong(descriptor::FOOTER),
                AmqpValue::Map(footer.clone()),
            ))?;
        }

        Ok(encoder.finish())
    }

    /// Decode a message from a TRANSFER frame's payload bytes.
    pub fn decode(bytes: &[u8]) -> AmqpResult<Self> {
        let mut decoder = Decoder::new(bytes.to_vec());
        let mut message = Message::new();
        let mut bodies = Vec::new();

        while decoder.remaining_len() > 0 {
            let value = decoder.decode_value()?;
            let code = value
                .descriptor()
                .and_then(|d| match d {
                    AmqpValue::Ulong(code) => Some(*code),
                    _ => None,
                })
                .ok_or_else(|| AmqpError::decoding("message section missing a descriptor"))?;
            let inner = value.strip_descriptor();

            match code {
                descriptor::HEADER => {
                    let fields = inner.as_list().ok_or_else(|| AmqpError::decoding("header is not a list"))?;
                    message.header = Some(Header {
                        durable: fields.first().and_then(as_bool),
                        priority: fields.get(1).and_then(as_ubyte),
                        ttl: fields.get(2).and_then(as_uint),
                        first_acquirer: fields.get(3).and_then(as_bool),
                        delivery_count: fields.get(4).and_then(as_uint),
                    });
                }
                descriptor::DELIVERY_ANNOTATIONS => {
                    message.delivery_annotations = inner.as_map().cloned();
                }
                descriptor::MESSAGE_ANNOTATIONS => {
                    message.message_annotations = inner.as_map().cloned();
                }
                descriptor::PROPERTIES => {
                    let fields = inner.as_list().ok_or_else(|| AmqpError::decoding("properties is not a list"))?;
                    message.properties = Some(Properties {
                        message_id: non_null(fields.first()),
                        user_id: fields.get(1).and_then(as_binary),
                        to: fields.get(2).and_then(as_string),
                        subject: fields.get(3).and_then(as_string),
                        reply_to: fields.get(4).and_then(as_string),
                        correlation_id: non_null(fields.get(5)),
                        content_type: fields.get(6).and_then(as_symbol),
                        content_encoding: fields.get(7).and_then(as_symbol),
                        absolute_expiry_time: fields.get(8).and_then(as_timestamp),
                        creation_time: fields.get(9).and_then(as_timestamp),
                        group_id: fields.get(10).and_then(as_string),
                        group_sequence: fields.get(11).and_then(as_uint),
                        reply_to_group_id: fields.get(12).and_then(as_string),
                    });
                }
                descriptor::APPLICATION_PROPERTIES => {
                    message.application_properties = inner.as_map().cloned();
                }
                descriptor::DATA => bodies.push(Body::Data(as_binary(inner).unwrap_or_default())),
                descriptor::AMQP_SEQUENCE => {
                    bodies.push(Body::Sequence(inner.as_list().cloned().unwrap_or_default()))
                }
                descriptor::AMQP_VALUE => bodies.push(Body::Value(inner.clone())),
                descriptor::FOOTER => message.footer = inner.as_map().cloned(),
                other => return Err(AmqpError::decoding(format!("unknown message section descriptor 0x{other:x}"))),
            }
        }

        message.body = match bodies.len() {
            0 => None,
            1 => bodies.into_iter().next(),
            _ => Some(Body::Multiple(bodies)),
        };

        Ok(message)
    }
}

fn encode_body(encoder: &mut Encoder, body: &Body) -> AmqpResult<()> {
    match body {
        Body::Data(data) => {
            encoder.encode_value(&AmqpValue::described(AmqpValue::Ulong(descriptor::DATA), AmqpValue::Binary(data.clone())))
        }
        Body::Sequence(list) => encoder.encode_value(&AmqpValue::described(
            AmqpValue::Ulong(descriptor::AMQP_SEQUENCE),
            AmqpValue::List(list.clone()),
        )),
        Body::Value(value) => {
            encoder.encode_value(&AmqpValue::described(AmqpValue::Ulong(descriptor::AMQP_VALUE), value.clone()))
        }
        Body::Multiple(parts) => {
            for part in parts {
                encode_body(encoder, part)?;
            }
            Ok(())
        }
    }
}

fn non_null(value: Option<&AmqpValue>) -> Option<AmqpValue> {
    value.filter(|v| !v.is_null()).cloned()
}
fn as_bool(value: &AmqpValue) -> Option<bool> {
    match value {
        AmqpValue::Boolean(b) => Some(*b),
        _ => None,
    }
}
fn as_ubyte(value: &AmqpValue) -> Option<u8> {
    match value {
        AmqpValue::Ubyte(b) => Some(*b),
        _ => None,
    }
}
fn as_uint(value: &AmqpValue) -> Option<u32> {
    match value {
        AmqpValue::Uint(v) => Some(*v),
        _ => None,
    }
}
fn as_timestamp(value: &AmqpValue) -> Option<i64> {
    match value {
        AmqpValue::Timestamp(v) => Some(*v),
        _ => None,
    }
}
fn as_string(value: &AmqpValue) -> Option<String> {
    match value {
        AmqpValue::String(s) => Some(s.clone()),
        _ => None,
    }
}
fn as_symbol(value: &AmqpValue) -> Option<AmqpSymbol> {
    match value {
        AmqpValue::Symbol(s) => Some(s.clone()),
        _ => None,
    }
}
fn as_binary(value: &AmqpValue) -> Option<Vec<u8>> {
    match value {
        AmqpValue::Binary(b) => Some(b.clone()),
        _ => None,
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::binary(data)
    }
} 