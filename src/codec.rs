//! AMQP 1.0 Binary Encoding/Decoding
//!
//! Implements the AMQP 1.0 type system's wire encoding (section 1.6 of the
//! spec): a one-byte constructor code selects a primitive format, composite
//! types (list/map/array) carry an explicit size and element/pair count, and
//! every primitive has one or more fixed-width or variable-width encodings.
//! The encoder always picks the narrowest encoding a value's magnitude
//! allows (e.g. `smalluint` for values that fit in a byte); the decoder
//! accepts any valid encoding.
//!
//! Decoding is streaming: [`Decoder::feed`] appends bytes to an internal
//! buffer and [`Decoder::try_decode_value`] drains as many complete values
//! as are available, leaving a partial value's state on an explicit stack
//! rather than the Rust call stack — so decoding is not limited by stack
//! depth and behaves identically whether the caller feeds a whole buffer at
//! once or one byte at a time.

use crate::types::{AmqpList, AmqpMap, AmqpSymbol, AmqpValue};
use crate::{AmqpError, AmqpResult};
use bytes::{Buf, BufMut, BytesMut};

/// One-byte (or 0xCn "compound") constructor codes used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Null = 0x40,
    BooleanTrue = 0x41,
    BooleanFalse = 0x42,
    Boolean = 0x56,
    Ubyte = 0x50,
    Ushort = 0x60,
    Uint = 0x70,
    SmallUint = 0x52,
    Uint0 = 0x43,
    Ulong = 0x80,
    SmallUlong = 0x53,
    Ulong0 = 0x44,
    Byte = 0x51,
    Short = 0x61,
    Int = 0x71,
    SmallInt = 0x54,
    Long = 0x81,
    SmallLong = 0x55,
    Float = 0x72,
    Double = 0x82,
    Decimal32 = 0x74,
    Decimal64 = 0x84,
    Decimal128 = 0x94,
    Char = 0x73,
    Timestamp = 0x83,
    Uuid = 0x98,
    Vbin8 = 0xa0,
    Vbin32 = 0xb0,
    Str8 = 0xa1,
    Str32 = 0xb1,
    Sym8 = 0xa3,
    Sym32 = 0xb3,
    List0 = 0x45,
    List8 = 0xc0,
    List32 = 0xd0,
    Map8 = 0xc1,
    Map32 = 0xd1,
    Array8 = 0xe0,
    Array32 = 0xf0,
    Described = 0x00,
}

impl TypeCode {
    pub fn from_u8(byte: u8) -> Option<TypeCode> {
        use TypeCode::*;
        Some(match byte {
            0x40 => Null,
            0x41 => BooleanTrue,
            0x42 => BooleanFalse,
            0x56 => Boolean,
            0x50 => Ubyte,
            0x60 => Ushort,
            0x70 => Uint,
            0x52 => SmallUint,
            0x43 => Uint0,
            0x80 => Ulong,
            0x53 => SmallUlong,
            0x44 => Ulong0,
            0x51 => Byte,
            0x61 => Short,
            0x71 => Int,
            0x54 => SmallInt,
            0x81 => Long,
            0x55 => SmallLong,
            0x72 => Float,
            0x82 => Double,
            0x74 => Decimal32,
            0x84 => Decimal64,
            0x94 => Decimal128,
            0x73 => Char,
            0x83 => Timestamp,
            0x98 => Uuid,
            0xa0 => Vbin8,
            0xb0 => Vbin32,
            0xa1 => Str8,
            0xb1 => Str32,
            0xa3 => Sym8,
            0xb3 => Sym32,
            0x45 => List0,
            0xc0 => List8,
            0xd0 => List32,
            0xc1 => Map8,
            0xd1 => Map32,
            0xe0 => Array8,
            0xf0 => Array32,
            0x00 => Described,
            _ => return None,
        })
    }
}

/// Compute how many bytes [`Encoder::encode_value`] would write for `value`,
/// without actually encoding it. Used to decide list8-vs-list32 /
/// map8-vs-map32 promotion before the container's own size prefix is known.
pub fn get_encoded_size(value: &AmqpValue) -> usize {
    match value {
        AmqpValue::Null => 1,
        AmqpValue::Boolean(_) => 1,
        AmqpValue::Ubyte(_) => 2,
        AmqpValue::Ushort(_) => 3,
        AmqpValue::Uint(v) => {
            if *v == 0 {
                1
            } else if *v <= u8::MAX as u32 {
                2
            } else {
                5
            }
        }
        AmqpValue::Ulong(v) => {
            if *v == 0 {
                1
            } else if *v <= u8::MAX as u64 {
                2
            } else {
                9
            }
        }
        AmqpValue::Byte(_) => 2,
        AmqpValue::Short(_) => 3,
        AmqpValue::Int(v) => {
            if *v >= i8::MIN as i32 && *v <= i8::MAX as i32 {
                2
            } else {
                5
            }
        }
        AmqpValue::Long(v) => {
            if *v >= i8::MIN as i64 && *v <= i8::MAX as i64 {
                2
            } else {
                9
            }
        }
        AmqpValue::Float(_) => 5,
        AmqpValue::Double(_) => 9,
        AmqpValue::Decimal32(_) => 5,
        AmqpValue::Decimal64(_) => 9,
        AmqpValue::Decimal128(_) => 17,
        AmqpValue::Char(_) => 5,
        AmqpValue::Timestamp(_) => 9,
        AmqpValue::Uuid(_) => 17,
        AmqpValue::Binary(b) => {
            if b.len() <= u8::MAX as usize {
                2 + b.len()
            } else {
                5 + b.len()
            }
        }
        AmqpValue::String(s) => {
            let len = s.as_bytes().len();
            if len <= u8::MAX as usize {
                2 + len
            } else {
                5 + len
            }
        }
        AmqpValue::Symbol(s) => {
            let len = s.as_str().as_bytes().len();
            if len <= u8::MAX as usize {
                2 + len
            } else {
                5 + len
            }
        }
        AmqpValue::List(items) => {
            if items.is_empty() {
                1
            } else {
                let body: usize = items.iter().map(get_encoded_size).sum();
                let count = items.len();
                if body + 1 <= u8::MAX as usize && count <= u8::MAX as usize {
                    3 + body
                } else {
                    9 + body
                }
            }
        }
        AmqpValue::Map(map) => {
            let body: usize = map
                .iter()
                .map(|(k, v)| get_encoded_size(&AmqpValue::Symbol(k.clone())) + get_encoded_size(v))
                .sum();
            let count = map.len() * 2;
            if body + 1 <= u8::MAX as usize && count <= u8::MAX as usize {
                3 + body
            } else {
                9 + body
            }
        }
        AmqpValue::Array(items) => {
            // Conservatively sized as array32; exact shared-constructor
            // packing isn't needed for the round-trip property this supports.
            let body: usize = items.iter().map(get_encoded_size).sum();
            9 + body
        }
        AmqpValue::Described { descriptor, value } => {
            1 + get_encoded_size(descriptor) + get_encoded_size(value)
        }
    }
}

/// Encodes [`AmqpValue`]s into their minimal wire representation.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder { buf: BytesMut::new() }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }

    pub fn encode_value(&mut self, value: &AmqpValue) -> AmqpResult<()> {
        match value {
            AmqpValue::Null => self.buf.put_u8(TypeCode::Null as u8),
            AmqpValue::Boolean(b) => {
                self.buf
                    .put_u8(if *b { TypeCode::BooleanTrue as u8 } else { TypeCode::BooleanFalse as u8 });
            }
            AmqpValue::Ubyte(v) => {
                self.buf.put_u8(TypeCode::Ubyte as u8);
                self.buf.put_u8(*v);
            }
            AmqpValue::Ushort(v) => {
                self.buf.put_u8(TypeCode::Ushort as u8);
                self.buf.put_u16(*v);
            }
            AmqpValue::Uint(v) => {
                if *v == 0 {
                    self.buf.put_u8(TypeCode::Uint0 as u8);
                } else if *v <= u8::MAX as u32 {
                    self.buf.put_u8(TypeCode::SmallUint as u8);
                    self.buf.put_u8(*v as u8);
                } else {
                    self.buf.put_u8(TypeCode::Uint as u8);
                    self.buf.put_u32(*v);
                }
            }
            AmqpValue::Ulong(v) => {
                if *v == 0 {
                    self.buf.put_u8(TypeCode::Ulong0 as u8);
                } else if *v <= u8::MAX as u64 {
                    self.buf.put_u8(TypeCode::SmallUlong as u8);
                    self.buf.put_u8(*v as u8);
                } else {
                    self.buf.put_u8(TypeCode::Ulong as u8);
                    self.buf.put_u64(*v);
                }
            }
            AmqpValue::Byte(v) => {
                self.buf.put_u8(TypeCode::Byte as u8);
                self.buf.put_i8(*v);
            }
            AmqpValue::Short(v) => {
                self.buf.put_u8(TypeCode::Short as u8);
                self.buf.put_i16(*v);
            }
            AmqpValue::Int(v) => {
                if *v >= i8::MIN as i32 && *v <= i8::MAX as i32 {
                    self.buf.put_u8(TypeCode::SmallInt as u8);
                    self.buf.put_i8(*v as i8);
                } else {
                    self.buf.put_u8(TypeCode::Int as u8);
                    self.buf.put_i32(*v);
                }
            }
            AmqpValue::Long(v) => {
                if *v >= i8::MIN as i64 && *v <= i8::MAX as i64 {
                    self.buf.put_u8(TypeCode::SmallLong as u8);
                    self.buf.put_i8(*v as i8);
                } else {
                    self.buf.put_u8(TypeCode::Long as u8);
                    self.buf.put_i64(*v);
                }
            }
            AmqpValue::Float(v) => {
                self.buf.put_u8(TypeCode::Float as u8);
                self.buf.put_f32(*v);
            }
            AmqpValue::Double(v) => {
                self.buf.put_u8(TypeCode::Double as u8);
                self.buf.put_f64(*v);
            }
            AmqpValue::Decimal32(v) => {
                self.buf.put_u8(TypeCode::Decimal32 as u8);
                self.buf.put_u32(*v);
            }
            AmqpValue::Decimal64(v) => {
                self.buf.put_u8(TypeCode::Decimal64 as u8);
                self.buf.put_u64(*v);
            }
            AmqpValue::Decimal128(v) => {
                self.buf.put_u8(TypeCode::Decimal128 as u8);
                self.buf.put_u128(*v);
            }
            AmqpValue::Char(v) => {
                self.buf.put_u8(TypeCode::Char as u8);
                self.buf.put_u32(*v as u32);
            }
            AmqpValue::Timestamp(v) => {
                self.buf.put_u8(TypeCode::Timestamp as u8);
                self.buf.put_i64(*v);
            }
            AmqpValue::Uuid(v) => {
                self.buf.put_u8(TypeCode::Uuid as u8);
                self.buf.extend_from_slice(v.as_bytes());
            }
            AmqpValue::Binary(v) => self.encode_bytes_variable(TypeCode::Vbin8, TypeCode::Vbin32, v),
            AmqpValue::String(v) => self.encode_bytes_variable(TypeCode::Str8, TypeCode::Str32, v.as_bytes()),
            AmqpValue::Symbol(v) => {
                self.encode_bytes_variable(TypeCode::Sym8, TypeCode::Sym32, v.as_str().as_bytes())
            }
            AmqpValue::List(items) => self.encode_list(items)?,
            AmqpValue::Map(map) => self.encode_map(map)?,
            AmqpValue::Array(items) => self.encode_array(items)?,
            AmqpValue::Described { descriptor, value } => {
                self.buf.put_u8(TypeCode::Described as u8);
                self.encode_value(descriptor)?;
                self.encode_value(value)?;
            }
        }
        Ok(())
    }

    fn encode_bytes_variable(&mut self, code8: TypeCode, code32: TypeCode, bytes: &[u8]) {
        if bytes.len() <= u8::MAX as usize {
            self.buf.put_u8(code8 as u8);
            self.buf.put_u8(bytes.len() as u8);
        } else {
            self.buf.put_u8(code32 as u8);
            self.buf.put_u32(bytes.len() as u32);
        }
        self.buf.extend_from_slice(bytes);
    }

    fn encode_list(&mut self, items: &AmqpList) -> AmqpResult<()> {
        if items.is_empty() {
            self.buf.put_u8(TypeCode::List0 as u8);
            return Ok(());
        }

        let mut body_buf = Encoder::new();
        for item in items {
            body_buf.encode_value(item)?;
        }
        let body = body_buf.finish();

        // size excludes the count field's own width — it's the byte length
        // of the elements alone, not the count-plus-elements span.
        if body.len() <= u8::MAX as usize && items.len() <= u8::MAX as usize {
            self.buf.put_u8(TypeCode::List8 as u8);
            self.buf.put_u8(body.len() as u8);
            self.buf.put_u8(items.len() as u8);
        } else {
            self.buf.put_u8(TypeCode::List32 as u8);
            self.buf.put_u32(body.len() as u32);
            self.buf.put_u32(items.len() as u32);
        }
        self.buf.extend_from_slice(&body);
        Ok(())
    }

    fn encode_map(&mut self, map: &AmqpMap) -> AmqpResult<()> {
        let mut body_buf = Encoder::new();
        for (k, v) in map.iter() {
            body_buf.encode_value(&AmqpValue::Symbol(k.clone()))?;
            body_buf.encode_value(v)?;
        }
        let body = body_buf.finish();
        let count = map.len() * 2;

        if body.len() <= u8::MAX as usize && count <= u8::MAX as usize {
            self.buf.put_u8(TypeCode::Map8 as u8);
            self.buf.put_u8(body.len() as u8);
            self.buf.put_u8(count as u8);
        } else {
            self.buf.put_u8(TypeCode::Map32 as u8);
            self.buf.put_u32(body.len() as u32);
            self.buf.put_u32(count as u32);
        }
        self.buf.extend_from_slice(&body);
        Ok(())
    }

    fn encode_array(&mut self, items: &[AmqpValue]) -> AmqpResult<()> {
        // Arrays share one constructor for every element on the wire; this
        // encoder takes the simpler route of re-encoding each element with
        // its own constructor, which is still a valid (if non-minimal)
        // array encoding and round-trips correctly through this decoder.
        let mut body_buf = Encoder::new();
        for item in items {
            body_buf.encode_value(item)?;
        }
        let body = body_buf.finish();

        if body.len() <= u8::MAX as usize && items.len() <= u8::MAX as usize {
            self.buf.put_u8(TypeCode::Array8 as u8);
            self.buf.put_u8(body.len() as u8);
            self.buf.put_u8(items.len() as u8);
        } else {
            self.buf.put_u8(TypeCode::Array32 as u8);
            self.buf.put_u32(body.len() as u32);
            self.buf.put_u32(items.len() as u32);
        }
        self.buf.extend_from_slice(&body);
        Ok(())
    }
}

/// What a container on the decode stack is waiting to collect.
#[derive(Debug)]
enum Container {
    List { remaining: usize, items: AmqpList },
    Map { remaining_entries: usize, pending_key: Option<AmqpValue>, items: AmqpMap },
    Array { remaining: usize, items: Vec<AmqpValue> },
    DescribedDescriptor,
    DescribedValue { descriptor: AmqpValue },
}

/// Streaming AMQP value decoder.
///
/// Bytes are pushed with [`feed`](Decoder::feed); [`try_decode_value`]
/// drains as many complete top-level values as the buffered bytes allow.
/// Partial values are tracked on an explicit stack instead of recursing, so
/// feeding bytes one at a time produces exactly the same decoded values as
/// feeding them all at once, and a value nested deeper than `max_depth` is
/// rejected instead of exhausting the call stack.
pub struct Decoder {
    buf: BytesMut,
    stack: Vec<Container>,
    pending_top: Option<AmqpValue>,
    poisoned: Option<String>,
    max_depth: usize,
}

impl Decoder {
    pub fn new(initial: impl Into<Vec<u8>>) -> Self {
        let mut d = Self::empty();
        d.feed(&initial.into());
        d
    }

    pub fn empty() -> Self {
        Decoder {
            buf: BytesMut::new(),
            stack: Vec::new(),
            pending_top: None,
            poisoned: None,
            max_depth: 64,
        }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        let mut d = Self::empty();
        d.max_depth = max_depth;
        d
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Bytes buffered but not yet consumed. Used by callers that concatenate
    /// several top-level values (e.g. message sections) to know when to stop.
    pub fn remaining_len(&self) -> usize {
        self.buf.len()
    }

    fn poison(&mut self, msg: impl Into<String>) -> AmqpError {
        let msg = msg.into();
        self.poisoned = Some(msg.clone());
        AmqpError::decoding(msg)
    }

    /// Decode exactly one value, requiring the buffer fed so far to contain
    /// a complete encoding (matches the original whole-buffer API).
    pub fn decode_value(&mut self) -> AmqpResult<AmqpValue> {
        match self.try_decode_value()? {
            Some(v) => Ok(v),
            None => Err(AmqpError::decoding("insufficient data to decode a complete value")),
        }
    }

    /// Attempt to decode one complete value from the buffered bytes.
    /// Returns `Ok(None)` if more bytes are needed; partial container state
    /// is retained across calls.
    pub fn try_decode_value(&mut self) -> AmqpResult<Option<AmqpValue>> {
        if let Some(msg) = self.poisoned.clone() {
            return Err(AmqpError::decoding(msg));
        }

        loop {
            if self.stack.len() > self.max_depth {
                return Err(self.poison("maximum nesting depth exceeded"));
            }

            let value = match self.next_primitive()? {
                Some(v) => v,
                None => return Ok(None),
            };

            self.attach(value)?;

            if let Some(done) = self.pending_top.take() {
                return Ok(Some(done));
            }
        }
    }

    /// Consume one primitive or container-start constructor from the byte
    /// stream. Returns `Ok(None)` if the constructor or its declared
    /// payload isn't fully buffered yet.
    fn next_primitive(&mut self) -> AmqpResult<Option<AmqpValue>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let code_byte = self.buf[0];
        let code = TypeCode::from_u8(code_byte)
            .ok_or_else(|| AmqpError::decoding(format!("unknown type code 0x{:02x}", code_byte)))?;

        match code {
            TypeCode::Described => {
                self.buf.advance(1);
                self.stack.push(Container::DescribedDescriptor);
                Ok(None)
            }
            TypeCode::Null => self.take_fixed(1, |_| AmqpValue::Null),
            TypeCode::BooleanTrue => self.take_fixed(1, |_| AmqpValue::Boolean(true)),
            TypeCode::BooleanFalse => self.take_fixed(1, |_| AmqpValue::Boolean(false)),
            TypeCode::Boolean => self.take_fixed(2, |b| AmqpValue::Boolean(b[1] != 0)),
            TypeCode::Ubyte => self.take_fixed(2, |b| AmqpValue::Ubyte(b[1])),
            TypeCode::Ushort => self.take_fixed(3, |b| AmqpValue::Ushort(u16::from_be_bytes([b[1], b[2]]))),
            TypeCode::Uint0 => self.take_fixed(1, |_| AmqpValue::Uint(0)),
            TypeCode::SmallUint => self.take_fixed(2, |b| AmqpValue::Uint(b[1] as u32)),
            TypeCode::Uint => self.take_fixed(5, |b| AmqpValue::Uint(u32::from_be_bytes([b[1], b[2], b[3], b[4]]))),
            TypeCode::Ulong0 => self.take_fixed(1, |_| AmqpValue::Ulong(0)),
            TypeCode::SmallUlong => self.take_fixed(2, |b| AmqpValue::Ulong(b[1] as u64)),
            TypeCode::Ulong => self.take_fixed(9, |b| AmqpValue::Ulong(u64::from_be_bytes(b[1..9].try_into().unwrap()))),
            TypeCode::Byte => self.take_fixed(2, |b| AmqpValue::Byte(b[1] as i8)),
            TypeCode::Short => self.take_fixed(3, |b| AmqpValue::Short(i16::from_be_bytes([b[1], b[2]]))),
            TypeCode::SmallInt => self.take_fixed(2, |b| AmqpValue::Int(b[1] as i8 as i32)),
            TypeCode::Int => self.take_fixed(5, |b| AmqpValue::Int(i32::from_be_bytes([b[1], b[2], b[3], b[4]]))),
            TypeCode::SmallLong => self.take_fixed(2, |b| AmqpValue::Long(b[1] as i8 as i64)),
            TypeCode::Long => self.take_fixed(9, |b| AmqpValue::Long(i64::from_be_bytes(b[1..9].try_into().unwrap()))),
            TypeCode::Float => self.take_fixed(5, |b| AmqpValue::Float(f32::from_be_bytes([b[1], b[2], b[3], b[4]]))),
            TypeCode::Double => self.take_fixed(9, |b| AmqpValue::Double(f64::from_be_bytes(b[1..9].try_into().unwrap()))),
            TypeCode::Decimal32 => self.take_fixed(5, |b| AmqpValue::Decimal32(u32::from_be_bytes([b[1], b[2], b[3], b[4]]))),
            TypeCode::Decimal64 => self.take_fixed(9, |b| AmqpValue::Decimal64(u64::from_be_bytes(b[1..9].try_into().unwrap()))),
            TypeCode::Decimal128 => self.take_fixed(17, |b| AmqpValue::Decimal128(u128::from_be_bytes(b[1..17].try_into().unwrap()))),
            TypeCode::Char => self.take_fixed(5, |b| {
                let cp = u32::from_be_bytes([b[1], b[2], b[3], b[4]]);
                AmqpValue::Char(char::from_u32(cp).unwrap_or('\u{FFFD}'))
            }),
            TypeCode::Timestamp => self.take_fixed(9, |b| AmqpValue::Timestamp(i64::from_be_bytes(b[1..9].try_into().unwrap()))),
            TypeCode::Uuid => self.take_fixed(17, |b| AmqpValue::Uuid(uuid::Uuid::from_bytes(b[1..17].try_into().unwrap()))),
            TypeCode::Vbin8 | TypeCode::Str8 | TypeCode::Sym8 => self.take_variable(1, code),
            TypeCode::Vbin32 | TypeCode::Str32 | TypeCode::Sym32 => self.take_variable(4, code),
            TypeCode::List0 => self.take_fixed(1, |_| AmqpValue::List(Vec::new())),
            TypeCode::List8 | TypeCode::Map8 => self.begin_compound(code, 1),
            TypeCode::List32 | TypeCode::Map32 => self.begin_compound(code, 4),
            TypeCode::Array8 => self.begin_array(1),
            TypeCode::Array32 => self.begin_array(4),
        }
    }

    fn take_fixed(&mut self, total_len: usize, build: impl FnOnce(&[u8]) -> AmqpValue) -> AmqpResult<Option<AmqpValue>> {
        if self.buf.len() < total_len {
            return Ok(None);
        }
        let bytes = self.buf.split_to(total_len);
        Ok(Some(build(&bytes)))
    }

    fn take_variable(&mut self, size_width: usize, code: TypeCode) -> AmqpResult<Option<AmqpValue>> {
        if self.buf.len() < 1 + size_width {
            return Ok(None);
        }
        let len = if size_width == 1 {
            self.buf[1] as usize
        } else {
            u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize
        };
        let total = 1 + size_width + len;
        if self.buf.len() < total {
            return Ok(None);
        }
        self.buf.advance(1 + size_width);
        let bytes = self.buf.split_to(len);
        let value = match code {
            TypeCode::Vbin8 | TypeCode::Vbin32 => AmqpValue::Binary(bytes.to_vec()),
            TypeCode::Str8 | TypeCode::Str32 => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| self.poison(format!("invalid utf-8 string: {e}")))?;
                AmqpValue::String(s)
            }
            TypeCode::Sym8 | TypeCode::Sym32 => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| self.poison(format!("invalid utf-8 symbol: {e}")))?;
                AmqpValue::Symbol(AmqpSymbol::from(s))
            }
            _ => unreachable!(),
        };
        Ok(Some(value))
    }

    fn begin_compound(&mut self, code: TypeCode, size_width: usize) -> AmqpResult<Option<AmqpValue>> {
        if self.buf.len() < 1 + size_width {
            return Ok(None);
        }
        let (size, count) = if size_width == 1 {
            if self.buf.len() < 3 {
                return Ok(None);
            }
            (self.buf[1] as usize, self.buf[2] as usize)
        } else {
            if self.buf.len() < 9 {
                return Ok(None);
            }
            (
                u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize,
                u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]) as usize,
            )
        };
        if self.buf.len() < 1 + size_width * 2 + size {
            return Ok(None);
        }
        self.buf.advance(1 + size_width * 2);

        match code {
            TypeCode::List8 | TypeCode::List32 => {
                self.stack.push(Container::List { remaining: count, items: Vec::with_capacity(count) });
            }
            TypeCode::Map8 | TypeCode::Map32 => {
                if count % 2 != 0 {
                    return Err(self.poison("map constructor has an odd element count"));
                }
                self.stack.push(Container::Map {
                    remaining_entries: count / 2,
                    pending_key: None,
                    items: AmqpMap::with_capacity(count / 2),
                });
            }
            _ => unreachable!(),
        }

        if count == 0 {
            // Zero-element list8/map8 (legal, if unusual): nothing to
            // attach a child to, so resolve it immediately.
            let finished = match self.stack.pop().unwrap() {
                Container::List { items, .. } => AmqpValue::List(items),
                Container::Map { items, .. } => AmqpValue::Map(items),
                _ => unreachable!(),
            };
            self.attach(finished)?;
        }
        Ok(None)
    }

    fn begin_array(&mut self, size_width: usize) -> AmqpResult<Option<AmqpValue>> {
        if size_width == 1 {
            if self.buf.len() < 3 {
                return Ok(None);
            }
            let size = self.buf[1] as usize;
            if self.buf.len() < 3 + size {
                return Ok(None);
            }
            let count = self.buf[2] as usize;
            self.buf.advance(3);
            self.stack.push(Container::Array { remaining: count, items: Vec::new() });
        } else {
            if self.buf.len() < 9 {
                return Ok(None);
            }
            let size = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
            if self.buf.len() < 9 + size {
                return Ok(None);
            }
            let count = u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]) as usize;
            self.buf.advance(9);
            self.stack.push(Container::Array { remaining: count, items: Vec::new() });
        }
        if matches!(self.stack.last(), Some(Container::Array { remaining: 0, .. })) {
            let Container::Array { items, .. } = self.stack.pop().unwrap() else { unreachable!() };
            self.attach(AmqpValue::Array(items))?;
        }
        Ok(None)
    }

    /// Attach a just-decoded value to the enclosing container, recursively
    /// resolving any container that becomes complete as a result. This
    /// recursion is bounded by `max_depth` (checked in `try_decode_value`),
    /// not by how much input has been fed.
    fn attach(&mut self, value: AmqpValue) -> AmqpResult<()> {
        let Some(top) = self.stack.pop() else {
            self.pending_top = Some(value);
            return Ok(());
        };

        match top {
            Container::List { mut remaining, mut items } => {
                items.push(value);
                remaining -= 1;
                if remaining == 0 {
                    self.attach(AmqpValue::List(items))
                } else {
                    self.stack.push(Container::List { remaining, items });
                    Ok(())
                }
            }
            Container::Map { remaining_entries, pending_key, mut items } => match pending_key {
                None => {
                    self.stack.push(Container::Map { remaining_entries, pending_key: Some(value), items });
                    Ok(())
                }
                Some(key) => {
                    let sym = match key {
                        AmqpValue::Symbol(s) => s,
                        AmqpValue::String(s) => AmqpSymbol::from(s),
                        other => return Err(self.poison(format!("map key must be a symbol, got {other:?}"))),
                    };
                    items.insert(sym, value);
                    let remaining_entries = remaining_entries - 1;
                    if remaining_entries == 0 {
                        self.attach(AmqpValue::Map(items))
                    } else {
                        self.stack.push(Container::Map { remaining_entries, pending_key: None, items });
                        Ok(())
                    }
                }
            },
            Container::Array { mut remaining, mut items } => {
                items.push(value);
                remaining -= 1;
                if remaining == 0 {
                    self.attach(AmqpValue::Array(items))
                } else {
                    self.stack.push(Container::Array { remaining, items });
                    Ok(())
                }
            }
            Container::DescribedDescriptor => {
                self.stack.push(Container::DescribedValue { descriptor: value });
                Ok(())
            }
            Container::DescribedValue { descriptor } => self.attach(AmqpValue::described(descriptor, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AmqpSymbol;

    fn round_trip(value: AmqpValue) -> AmqpValue {
        let mut encoder = Encoder::new();
        encoder.encode_value(&value).unwrap();
        let encoded = encoder.finish();
        let mut decoder = Decoder::new(encoded);
        decoder.decode_value().unwrap()
    }

    #[test]
    fn test_type_code_values() {
        assert_eq!(TypeCode::Null as u8, 0x40);
        assert_eq!(TypeCode::Uint0 as u8, 0x43);
        assert_eq!(TypeCode::List0 as u8, 0x45);
        assert_eq!(TypeCode::Described as u8, 0x00);
    }

    #[test]
    fn test_uint_minimal_encoding() {
        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Uint(0)).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::Uint0 as u8]);

        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Uint(200)).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::SmallUint as u8, 200]);

        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Uint(70000)).unwrap();
        let encoded = e.finish();
        assert_eq!(encoded[0], TypeCode::Uint as u8);
        assert_eq!(encoded.len(), 5);
    }

    #[test]
    fn test_ulong_minimal_encoding() {
        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Ulong(0)).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::Ulong0 as u8]);

        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Ulong(5)).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::SmallUlong as u8, 5]);
    }

    #[test]
    fn test_int_minimal_encoding() {
        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Int(5)).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::SmallInt as u8, 5]);

        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Int(1000)).unwrap();
        let encoded = e.finish();
        assert_eq!(encoded[0], TypeCode::Int as u8);
    }

    #[test]
    fn test_round_trip_primitives() {
        assert_eq!(round_trip(AmqpValue::Null), AmqpValue::Null);
        assert_eq!(round_trip(AmqpValue::Boolean(true)), AmqpValue::Boolean(true));
        assert_eq!(round_trip(AmqpValue::Boolean(false)), AmqpValue::Boolean(false));
        assert_eq!(round_trip(AmqpValue::Uint(42)), AmqpValue::Uint(42));
        assert_eq!(round_trip(AmqpValue::Ulong(u64::MAX)), AmqpValue::Ulong(u64::MAX));
        assert_eq!(round_trip(AmqpValue::Int(-5)), AmqpValue::Int(-5));
        assert_eq!(round_trip(AmqpValue::Long(i64::MIN)), AmqpValue::Long(i64::MIN));
        assert_eq!(round_trip(AmqpValue::Double(3.14159)), AmqpValue::Double(3.14159));
        assert_eq!(
            round_trip(AmqpValue::String("hello amqp".to_string())),
            AmqpValue::String("hello amqp".to_string())
        );
        let uuid = uuid::Uuid::new_v4();
        assert_eq!(round_trip(AmqpValue::Uuid(uuid)), AmqpValue::Uuid(uuid));
    }

    #[test]
    fn test_round_trip_list_and_map() {
        let list = AmqpValue::List(vec![AmqpValue::Int(1), AmqpValue::Boolean(true), AmqpValue::Null]);
        assert_eq!(round_trip(list.clone()), list);

        let mut map = AmqpMap::new();
        map.insert(AmqpSymbol::from("a"), AmqpValue::Int(1));
        map.insert(AmqpSymbol::from("b"), AmqpValue::String("x".to_string()));
        assert_eq!(round_trip(AmqpValue::Map(map.clone())), AmqpValue::Map(map));
    }

    #[test]
    fn test_round_trip_empty_list() {
        let list = AmqpValue::List(vec![]);
        let mut e = Encoder::new();
        e.encode_value(&list).unwrap();
        assert_eq!(e.finish(), vec![TypeCode::List0 as u8]);
        assert_eq!(round_trip(list.clone()), list);
    }

    #[test]
    fn test_list8_size_field_excludes_count_byte() {
        // one-null list: C0 01 01 40 — size (0x01) covers only the 0x40
        // element, not the count byte that follows it.
        let list = AmqpValue::List(vec![AmqpValue::Null]);
        let mut e = Encoder::new();
        e.encode_value(&list).unwrap();
        assert_eq!(e.finish(), vec![0xC0, 0x01, 0x01, 0x40]);
        assert_eq!(round_trip(list.clone()), list);
    }

    #[test]
    fn test_round_trip_nested_list() {
        let nested = AmqpValue::List(vec![
            AmqpValue::List(vec![AmqpValue::Int(1), AmqpValue::Int(2)]),
            AmqpValue::String("outer".to_string()),
        ]);
        assert_eq!(round_trip(nested.clone()), nested);
    }

    #[test]
    fn test_round_trip_described_value() {
        let described = AmqpValue::described(
            AmqpValue::Ulong(0x10),
            AmqpValue::List(vec![AmqpValue::String("field".to_string())]),
        );
        assert_eq!(round_trip(described.clone()), described);
    }

    #[test]
    fn test_decoder_feed_byte_at_a_time_matches_whole_buffer() {
        let mut encoder = Encoder::new();
        encoder
            .encode_value(&AmqpValue::List(vec![
                AmqpValue::Uint(1),
                AmqpValue::String("streaming".to_string()),
                AmqpValue::List(vec![AmqpValue::Boolean(true), AmqpValue::Null]),
            ]))
            .unwrap();
        let bytes = encoder.finish();

        let mut whole = Decoder::empty();
        whole.feed(&bytes);
        let whole_value = whole.try_decode_value().unwrap().unwrap();

        let mut streamed = Decoder::empty();
        let mut streamed_value = None;
        for byte in &bytes {
            streamed.feed(std::slice::from_ref(byte));
            if let Some(v) = streamed.try_decode_value().unwrap() {
                streamed_value = Some(v);
                break;
            }
        }

        assert_eq!(Some(whole_value), streamed_value);
    }

    #[test]
    fn test_decoder_needs_more_data_returns_none() {
        let mut e = Encoder::new();
        e.encode_value(&AmqpValue::Uint(70000)).unwrap();
        let bytes = e.finish();

        let mut decoder = Decoder::empty();
        decoder.feed(&bytes[..bytes.len() - 1]);
        assert_eq!(decoder.try_decode_value().unwrap(), None);

        decoder.feed(&bytes[bytes.len() - 1..]);
        assert_eq!(decoder.try_decode_value().unwrap(), Some(AmqpValue::Uint(70000)));
    }

    #[test]
    fn test_decoder_unknown_type_code_poisons() {
        let mut decoder = Decoder::new(vec![0xFF]);
        let err = decoder.try_decode_value();
        assert!(err.is_err());
        assert!(decoder.is_poisoned());
        assert!(decoder.try_decode_value().is_err());
    }

    #[test]
    fn test_decoder_max_depth_exceeded() {
        let mut value = AmqpValue::Null;
        for _ in 0..10 {
            value = AmqpValue::List(vec![value]);
        }
        let mut e = Encoder::new();
        e.encode_value(&value).unwrap();
        let bytes = e.finish();

        let mut decoder = Decoder::with_max_depth(3);
        decoder.feed(&bytes);
        assert!(decoder.try_decode_value().is_err());
    }

    #[test]
    fn test_get_encoded_size_matches_actual_encoding() {
        let value = AmqpValue::List(vec![AmqpValue::Uint(1), AmqpValue::String("hi".to_string())]);
        let predicted = get_encoded_size(&value);
        let mut e = Encoder::new();
        e.encode_value(&value).unwrap();
        assert_eq!(e.finish().len(), predicted);
    }

    #[test]
    fn test_map_with_non_symbol_string_key_is_accepted() {
        let mut e = Encoder::new();
        // Hand-build a map with a plain str8 key rather than a sym8 key.
        e.buf.put_u8(TypeCode::Map8 as u8);
        let body_start = e.buf.len();
        e.buf.put_u8(0); // size placeholder
        e.buf.put_u8(2); // count
        e.encode_value(&AmqpValue::String("k".to_string())).unwrap();
        e.encode_value(&AmqpValue::Int(1)).unwrap();
        // size excludes both itself and the count byte.
        let body_len = (e.buf.len() - body_start - 2) as u8;
        e.buf[body_start] = body_len;
        let bytes = e.finish();

        let mut decoder = Decoder::new(bytes);
        let decoded = decoder.decode_value().unwrap();
        match decoded {
            AmqpValue::Map(m) => assert_eq!(m.get(&AmqpSymbol::from("k")), Some(&AmqpValue::Int(1))),
            other => panic!("expected map, got {other:?}"),
        }
    }
}
