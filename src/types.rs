//! AMQP 1.0 Type System
//!
//! This module provides the core type system for AMQP 1.0, including all value types,
//! symbols, lists, maps, and other data structures defined in the AMQP 1.0 specification.
//!
//! # Overview
//!
//! The AMQP 1.0 type system is designed to be rich and flexible, supporting a wide
//! range of data types from simple primitives to complex composite types.
//!
//! # Core Types
//!
//! ## AmqpValue
//!
//! The main enum representing all possible AMQP 1.0 value types:
//!
//! ```rust
//! use amqp1_engine::types::AmqpValue;
//!
//! // Primitive types
//! let null = AmqpValue::Null;
//! let boolean = AmqpValue::Boolean(true);
//! let integer = AmqpValue::Int(42);
//! let float = AmqpValue::Double(3.14159);
//! let string = AmqpValue::String("Hello".to_string());
//!
//! // Complex types
//! let uuid = AmqpValue::Uuid(uuid::Uuid::new_v4());
//! let binary = AmqpValue::Binary(vec![1, 2, 3, 4]);
//! let symbol = AmqpValue::Symbol(AmqpSymbol::from("my-symbol"));
//! ```
//!
//! ## AmqpSymbol
//!
//! Symbols are used for identifiers, property names, and other string-like values
//! that are frequently used and can be optimized:
//!
//! ```rust
//! use amqp1_engine::types::AmqpSymbol;
//!
//! let symbol = AmqpSymbol::from("my-symbol");
//! assert_eq!(symbol.as_str(), "my-symbol");
//! ```
//!
//! ## AmqpList and AmqpMap
//!
//! Composite types for structured data. `AmqpMap` preserves insertion order,
//! since two AMQP maps with the same pairs in different orders are distinct
//! values on the wire (and therefore compare unequal here).
//!
//! ```rust
//! use amqp1_engine::types::{AmqpList, AmqpMap, AmqpValue, AmqpSymbol};
//!
//! let list = AmqpList::from(vec![
//!     AmqpValue::String("item1".to_string()),
//!     AmqpValue::Int(42),
//!     AmqpValue::Boolean(true),
//! ]);
//!
//! let mut map = AmqpMap::new();
//! map.insert(AmqpSymbol::from("key1"), AmqpValue::String("value1".to_string()));
//! map.insert(AmqpSymbol::from("key2"), AmqpValue::Int(123));
//! ```

use serde::{Deserialize, Serialize};

/// AMQP Symbol type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AmqpSymbol(pub String);

impl AmqpSymbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for AmqpSymbol {
    fn from(s: String) -> Self {
        AmqpSymbol(s)
    }
}

impl From<&str> for AmqpSymbol {
    fn from(s: &str) -> Self {
        AmqpSymbol(s.to_string())
    }
}

impl std::fmt::Display for AmqpSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// AMQP List type
pub type AmqpList = Vec<AmqpValue>;

/// Grow `list` to `index + 1` entries, padding newly created slots with
/// `AmqpValue::Null`, then write `value` at `index`.
pub fn list_set_item(list: &mut AmqpList, index: usize, value: AmqpValue) {
    if index >= list.len() {
        list.resize(index + 1, AmqpValue::Null);
    }
    list[index] = value;
}

/// AMQP Map type.
///
/// Backed by an insertion-ordered association list rather than a `HashMap`:
/// AMQP §1.6.23 defines map equality over the encoded key/value sequence, so
/// two maps built from the same pairs in a different order are not equal.
/// `insert` on an existing key overwrites the value in place without moving
/// the key to the end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmqpMap(Vec<(AmqpSymbol, AmqpValue)>);

impl AmqpMap {
    pub fn new() -> Self {
        AmqpMap(Vec::new())
    }

    pub fn with_capacity(cap: usize) -> Self {
        AmqpMap(Vec::with_capacity(cap))
    }

    /// Insert a key/value pair. Returns the previous value if the key was
    /// already present (in which case its position is preserved).
    pub fn insert(&mut self, key: AmqpSymbol, value: AmqpValue) -> Option<AmqpValue> {
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(std::mem::replace(&mut entry.1, value))
        } else {
            self.0.push((key, value));
            None
        }
    }

    pub fn get(&self, key: &AmqpSymbol) -> Option<&AmqpValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &AmqpSymbol) -> Option<AmqpValue> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn contains_key(&self, key: &AmqpSymbol) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(AmqpSymbol, AmqpValue)> {
        self.0.iter()
    }

    pub fn entries(&self) -> &[(AmqpSymbol, AmqpValue)] {
        &self.0
    }
}

impl PartialEq for AmqpMap {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl FromIterator<(AmqpSymbol, AmqpValue)> for AmqpMap {
    fn from_iter<T: IntoIterator<Item = (AmqpSymbol, AmqpValue)>>(iter: T) -> Self {
        AmqpMap(iter.into_iter().collect())
    }
}

impl IntoIterator for AmqpMap {
    type Item = (AmqpSymbol, AmqpValue);
    type IntoIter = std::vec::IntoIter<(AmqpSymbol, AmqpValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a AmqpMap {
    type Item = &'a (AmqpSymbol, AmqpValue);
    type IntoIter = std::slice::Iter<'a, (AmqpSymbol, AmqpValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<std::collections::HashMap<AmqpSymbol, AmqpValue>> for AmqpMap {
    fn from(map: std::collections::HashMap<AmqpSymbol, AmqpValue>) -> Self {
        AmqpMap(map.into_iter().collect())
    }
}

/// AMQP Value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AmqpValue {
    Null,
    Boolean(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal32(u32),
    Decimal64(u64),
    Decimal128(u128),
    Char(char),
    Timestamp(i64),
    Uuid(uuid::Uuid),
    Binary(Vec<u8>),
    String(String),
    Symbol(AmqpSymbol),
    List(AmqpList),
    Map(AmqpMap),
    Array(Vec<AmqpValue>),
    /// A described value: `0x00 descriptor value`. Performatives are
    /// described values whose descriptor is a ulong or symbol naming the
    /// performative and whose body is a list of fields.
    Described {
        descriptor: Box<AmqpValue>,
        value: Box<AmqpValue>,
    },
}

impl AmqpValue {
    /// Build a described value.
    pub fn described(descriptor: AmqpValue, value: AmqpValue) -> Self {
        AmqpValue::Described {
            descriptor: Box::new(descriptor),
            value: Box::new(value),
        }
    }

    /// Construct a `Char` from a raw Unicode scalar value, rejecting
    /// surrogate code points and values above `0x10FFFF` the way AMQP's
    /// 4-byte `char` constructor requires.
    pub fn char_from_u32(code_point: u32) -> Option<AmqpValue> {
        char::from_u32(code_point).map(AmqpValue::Char)
    }

    /// Descriptor of this value if it is a described value.
    pub fn descriptor(&self) -> Option<&AmqpValue> {
        match self {
            AmqpValue::Described { descriptor, .. } => Some(descriptor),
            _ => None,
        }
    }

    /// Underlying value of a described value, or `self` otherwise.
    pub fn strip_descriptor(&self) -> &AmqpValue {
        match self {
            AmqpValue::Described { value, .. } => value,
            other => other,
        }
    }

    pub fn as_list(&self) -> Option<&AmqpList> {
        match self.strip_descriptor() {
            AmqpValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&AmqpMap> {
        match self.strip_descriptor() {
            AmqpValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmqpValue::String(s) => Some(s),
            AmqpValue::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AmqpValue::Null)
    }
}

/// AMQP Error — a condition-bearing error value carried in performative
/// error fields (e.g. `close.error`, `detach.error`), distinct from the
/// crate-level [`crate::error::AmqpError`] used for Rust-side `Result`s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmqpError {
    pub condition: crate::condition::AmqpCondition,
    pub description: Option<String>,
    pub info: Option<AmqpMap>,
}

impl AmqpError {
    pub fn new(condition: crate::condition::AmqpCondition) -> Self {
        AmqpError {
            condition,
            description: None,
            info: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_info(mut self, info: AmqpMap) -> Self {
        self.info = Some(info);
        self
    }
}

/// Sender Settle Mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderSettleMode {
    Unsettled = 0,
    Settled = 1,
    Mixed = 2,
}

/// Receiver Settle Mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverSettleMode {
    First = 0,
    Second = 1,
}

/// Terminus Durability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminusDurability {
    None = 0,
    Configuration = 1,
    UnsettledState = 2,
}

/// Terminus Expiry Policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminusExpiryPolicy {
    SessionEnd = 0,
    ConnectionClose = 1,
    Never = 2,
}

/// Message Properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageProperties {
    pub message_id: Option<AmqpValue>,
    pub user_id: Option<Vec<u8>>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<AmqpValue>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub absolute_expiry_time: Option<i64>,
    pub creation_time: Option<i64>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

/// Message Annotations
pub type MessageAnnotations = AmqpMap;

/// Application Properties
pub type ApplicationProperties = AmqpMap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amqp_map_preserves_insertion_order() {
        let mut a = AmqpMap::new();
        a.insert(AmqpSymbol::from("k1"), AmqpValue::Int(1));
        a.insert(AmqpSymbol::from("k2"), AmqpValue::Int(2));

        let mut b = AmqpMap::new();
        b.insert(AmqpSymbol::from("k2"), AmqpValue::Int(2));
        b.insert(AmqpSymbol::from("k1"), AmqpValue::Int(1));

        assert_eq!(a.get(&AmqpSymbol::from("k1")), Some(&AmqpValue::Int(1)));
        assert_ne!(a, b, "maps with the same pairs in different order must not be equal");
    }

    #[test]
    fn test_amqp_map_overwrite_keeps_position() {
        let mut a = AmqpMap::new();
        a.insert(AmqpSymbol::from("k1"), AmqpValue::Int(1));
        a.insert(AmqpSymbol::from("k2"), AmqpValue::Int(2));
        a.insert(AmqpSymbol::from("k1"), AmqpValue::Int(99));

        assert_eq!(a.entries()[0].0, AmqpSymbol::from("k1"));
        assert_eq!(a.get(&AmqpSymbol::from("k1")), Some(&AmqpValue::Int(99)));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_list_set_item_pads_with_null() {
        let mut list: AmqpList = vec![AmqpValue::Int(1)];
        list_set_item(&mut list, 3, AmqpValue::Boolean(true));

        assert_eq!(list.len(), 4);
        assert_eq!(list[1], AmqpValue::Null);
        assert_eq!(list[2], AmqpValue::Null);
        assert_eq!(list[3], AmqpValue::Boolean(true));
    }

    #[test]
    fn test_char_from_u32_rejects_surrogates() {
        assert!(AmqpValue::char_from_u32(0xD800).is_none());
        assert!(AmqpValue::char_from_u32(0x41).is_some());
        assert!(AmqpValue::char_from_u32(0x10FFFF).is_some());
        assert!(AmqpValue::char_from_u32(0x110000).is_none());
    }

    #[test]
    fn test_described_value_round_trip_shape() {
        let v = AmqpValue::described(
            AmqpValue::Ulong(0x10),
            AmqpValue::List(vec![AmqpValue::String("x".to_string())]),
        );
        assert_eq!(v.descriptor(), Some(&AmqpValue::Ulong(0x10)));
        assert_eq!(
            v.as_list(),
            Some(&vec![AmqpValue::String("x".to_string())])
        );
    }

    #[test]
    fn test_amqp_value_creation() {
        let string_value = AmqpValue::String("test".to_string());
        let int_value = AmqpValue::Int(42);
        let bool_value = AmqpValue::Boolean(true);

        assert!(matches!(string_value, AmqpValue::String(_)));
        assert!(matches!(int_value, AmqpValue::Int(_)));
        assert!(matches!(bool_value, AmqpValue::Boolean(_)));
    }

    #[test]
    fn test_amqp_symbol_creation() {
        let symbol = AmqpSymbol::from("test-symbol");
        assert_eq!(symbol.as_str(), "test-symbol");
    }
}
