//! # Value codec
//!
//! Values are stored as tagged byte strings:
//!
//! ```text
//! text:    's' <bytes> '\0'
//! numeric: 'n' <decimal, six fractional digits> '\0'
//! boolean: 'b' ('0' | '1') '\0'
//! ```
//!
//! Numbers are rendered like C's `%f`: six digits after the point, no
//! exponent. This is a lossy contract: `decode(encode(x))` is `x` rounded to
//! six decimal places, not `x`. Non-finite numbers render as `inf`, `-inf`
//! and `nan`.
//!
//! A value whose first byte is not one of the three tags decodes to
//! [`Decoded::Unknown`] instead of failing, so foreign data in a table never
//! makes a read error out. A known tag with a malformed payload is an
//! [`Error::DecodeError`]. Text is strict about its terminator: without the
//! trailing NUL it is malformed. Numbers and booleans accept a missing one.

use crate::{Error, Result};
use std::fmt;

/// Tag of a text value.
pub const TAG_TEXT: u8 = b's';
/// Tag of a numeric value.
pub const TAG_NUMBER: u8 = b'n';
/// Tag of a boolean value.
pub const TAG_BOOLEAN: u8 = b'b';

const TERMINATOR: u8 = 0;

/// A storable scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Raw text bytes; not required to be UTF-8.
    Text(Vec<u8>),
    /// A 64-bit float.
    Number(f64),
    /// A boolean.
    Boolean(bool),
}

impl Value {
    /// The text as UTF-8, if this is valid UTF-8 text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    /// The raw text bytes, if this is text.
    pub fn as_text(&self) -> Option<&[u8]> {
        match self {
            Value::Text(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The number, if this is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the variant, for messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Number(_) => "numeric",
            Value::Boolean(_) => "boolean",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Text(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Text(bytes)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// Result of decoding a stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A value with a recognised tag.
    Value(Value),
    /// Data whose first byte is not a known tag (`None` for an empty blob).
    Unknown {
        /// The unrecognised first byte.
        tag: Option<u8>,
    },
}

impl Decoded {
    /// The value, dropping unknown data.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Decoded::Value(value) => Some(value),
            Decoded::Unknown { .. } => None,
        }
    }

    /// Borrows the value, if the tag was recognised.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Decoded::Value(value) => Some(value),
            Decoded::Unknown { .. } => None,
        }
    }

    /// Whether the tag was not recognised.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Decoded::Unknown { .. })
    }
}

/// Renders a number the way the numeric payload stores it.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "nan".to_string()
    } else if n == f64::INFINITY {
        "inf".to_string()
    } else if n == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:.6}", n)
    }
}

/// Encodes `value` into its stored form.
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Text(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 2);
            out.push(TAG_TEXT);
            out.extend_from_slice(bytes);
            out.push(TERMINATOR);
            out
        }
        Value::Number(n) => {
            let rendered = format_number(*n);
            let mut out = Vec::with_capacity(rendered.len() + 2);
            out.push(TAG_NUMBER);
            out.extend_from_slice(rendered.as_bytes());
            out.push(TERMINATOR);
            out
        }
        Value::Boolean(b) => vec![TAG_BOOLEAN, if *b { b'1' } else { b'0' }, TERMINATOR],
    }
}

/// Decodes a stored value.
pub fn decode(data: &[u8]) -> Result<Decoded> {
    let Some((&tag, payload)) = data.split_first() else {
        return Ok(Decoded::Unknown { tag: None });
    };

    let value = match tag {
        TAG_TEXT => match payload.split_last() {
            Some((&TERMINATOR, text)) => Value::Text(text.to_vec()),
            _ => return Err(Error::decode("text value is not terminated")),
        },
        TAG_NUMBER => {
            let digits = strip_terminator(payload);
            let text = std::str::from_utf8(digits).map_err(|_| Error::decode("numeric value is not ASCII"))?;
            let n = text
                .parse::<f64>()
                .map_err(|_| Error::decode(format!("numeric value {:?} is not a number", text)))?;
            Value::Number(n)
        }
        TAG_BOOLEAN => Value::Boolean(payload.first() == Some(&b'1')),
        other => return Ok(Decoded::Unknown { tag: Some(other) }),
    };
    Ok(Decoded::Value(value))
}

fn strip_terminator(payload: &[u8]) -> &[u8] {
    match payload.split_last() {
        Some((&TERMINATOR, rest)) => rest,
        _ => payload,
    }
}
