//! AMQP 1.0 Protocol Implementation in Rust
//! 
//! This library provides a complete implementation of the AMQP 1.0 messaging protocol.
//! It supports both client and server roles, with async/await support.
//!
//! # Features
//!
//! - **Full AMQP 1.0 Protocol Support**: Complete implementation of the AMQP 1.0 specification
//! - **Async/Await**: Built on top of Tokio for high-performance async operations
//! - **Type Safety**: Strongly typed AMQP values and messages
//! - **Builder Pattern**: Fluent builder APIs for easy configuration
//! - **Error Handling**: Comprehensive error types with detailed error messages
//! - **Extensible**: Modular design for easy extension and customization
//!
//! # Quick Start
//!
//! ```rust
//! use amqp1_engine::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Create a connection
//!     let mut connection = ConnectionBuilder::new()
//!         .hostname("localhost")
//!         .port(5672)
//!         .idle_timeout_ms(30_000)
//!         .container_id("my-app")
//!         .build();
//!
//!     // Open the connection
//!     connection.open().await?;
//!
//!     // Begin a session
//!     let mut session = SessionBuilder::new().build();
//!     session.begin(&mut connection).await?;
//!
//!     // Attach a sender
//!     let config = LinkBuilder::new()
//!         .name("my-sender")
//!         .target("my-queue")
//!         .build();
//!     let sender = session.create_sender(&mut connection, config).await?;
//!
//!     // Send a message
//!     let message = Message::text("Hello, AMQP!");
//!     session.send(&mut connection, &sender, message, None).await?;
//!
//!     // Clean up
//!     session.end(&mut connection, None).await?;
//!     connection.close(None).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Core Concepts
//!
//! ## AMQP Values
//!
//! The library provides strongly typed AMQP values:
//!
//! ```rust
//! use amqp1_engine::types::AmqpValue;
//!
//! let values = vec![
//!     AmqpValue::String("Hello".to_string()),
//!     AmqpValue::Int(42),
//!     AmqpValue::Boolean(true),
//!     AmqpValue::Double(3.14159),
//!     AmqpValue::Uuid(uuid::Uuid::new_v4()),
//!     AmqpValue::Binary(vec![1, 2, 3, 4]),
//! ];
//! ```
//!
//! ## Messages
//!
//! Create and manipulate AMQP messages:
//!
//! ```rust
//! use amqp1_engine::message::Message;
//!
//! // Simple text message
//! let text_msg = Message::text("Hello, World!");
//!
//! // Binary message
//! let binary_msg = Message::binary(b"Binary data");
//!
//! // Message with properties
//! let complex_msg = Message::builder()
//!     .body(message::Body::Value(AmqpValue::String("Custom content".to_string())))
//!     .build()
//!     .with_message_id("msg-001")
//!     .with_subject("Test Message")
//!     .with_content_type(AmqpSymbol::from("text/plain"));
//! ```
//!
//! ## Encoding/Decoding
//!
//! The library includes efficient binary encoding and decoding:
//!
//! ```rust
//! use amqp1_engine::codec::{Encoder, Decoder};
//!
//! let value = AmqpValue::String("Hello, AMQP!".to_string());
//!
//! // Encode
//! let mut encoder = Encoder::new();
//! encoder.encode_value(&value)?;
//! let encoded = encoder.finish();
//!
//! // Decode
//! let mut decoder = Decoder::new(encoded);
//! let decoded = decoder.decode_value()?;
//! assert_eq!(value, decoded);
//! ```
//!
//! # Architecture
//!
//! The library is organized into several key modules:
//!
//! - **`connection`**: Connection management and lifecycle
//! - **`session`**: Session handling and flow control
//! - **`link`**: Sender and receiver link management
//! - **`message`**: AMQP message structures and manipulation
//! - **`types`**: AMQP value types and data structures
//! - **`codec`**: Binary encoding and decoding
//! - **`io`**: Polymorphic transport abstraction (socket, TLS, SASL)
//! - **`error`**: Comprehensive error handling

pub mod types;
pub mod condition;
pub mod error;
pub mod constants;
pub mod codec;
pub mod frame;
pub mod amqp_frame;
pub mod io;
pub mod sasl;
pub mod connection;
pub mod session;
pub mod link;
pub mod message;

pub use types::{AmqpValue, AmqpSymbol, AmqpList, AmqpMap, SenderSettleMode, ReceiverSettleMode, TerminusDurability, TerminusExpiryPolicy};
pub use condition::{AmqpCondition, AmqpErrorCondition, ConditionCategory};
pub use message::{Message, MessageBuilder, Properties, Header, Body};
pub use error::{AmqpError, AmqpResult};
pub use io::{IoState, IoTransport};
pub use sasl::{PlainMechanism, SaslMechanism};
pub use connection::{Connection, ConnectionBuilder};
pub use session::{Session, SessionBuilder};
pub use link::{Link, LinkBuilder, Sender, Receiver};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        Connection, ConnectionBuilder,
        Session, SessionBuilder,
        Link, LinkBuilder, Sender, Receiver,
        Message, MessageBuilder,
        AmqpError, AmqpResult,
        AmqpValue, AmqpSymbol, AmqpList, AmqpMap, AmqpCondition, AmqpErrorCondition, ConditionCategory,
        SenderSettleMode, ReceiverSettleMode, Properties, Header, Body,
        IoState, IoTransport, PlainMechanism, SaslMechanism,
    };
}
