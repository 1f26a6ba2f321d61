//! Canonical CBOR encoder.

use crate::value::Value;

pub(crate) const MAJOR_UNSIGNED: u8 = 0;
pub(crate) const MAJOR_NEGATIVE: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_MAP: u8 = 5;
pub(crate) const MAJOR_TAG: u8 = 6;
pub(crate) const MAJOR_SIMPLE: u8 = 7;

pub(crate) const SIMPLE_FALSE: u8 = 0xf4;
pub(crate) const SIMPLE_TRUE: u8 = 0xf5;
pub(crate) const SIMPLE_NULL: u8 = 0xf6;

/// Encode a value to canonical CBOR bytes.
///
/// Integers and lengths use the shortest form, map keys are ordered by their
/// encoded bytes (shorter first, then bytewise) and nothing is
/// indefinite-length, so equal values always produce equal bytes.
#[must_use]
pub fn to_canonical_cbor(value: &Value) -> Vec<u8> {
    value.to_bytes()
}

/// A streaming canonical CBOR encoder.
///
/// Items are written in order; containers are opened with a header carrying
/// their element count and then filled by the following calls.
///
/// ```
/// use kindb_codec::{CanonicalEncoder, from_cbor, Value};
///
/// let mut enc = CanonicalEncoder::new();
/// enc.tag(40).array(2).uint(1).text("I0001");
/// let value = from_cbor(enc.as_bytes()).unwrap();
/// assert_eq!(
///     value,
///     Value::tagged(40, Value::Array(vec![Value::Integer(1), Value::from("I0001")]))
/// );
/// ```
#[derive(Debug, Default, Clone)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new encoder with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Writes null.
    pub fn null(&mut self) -> &mut Self {
        self.buffer.push(SIMPLE_NULL);
        self
    }

    /// Writes a boolean.
    pub fn bool(&mut self, b: bool) -> &mut Self {
        self.buffer.push(if b { SIMPLE_TRUE } else { SIMPLE_FALSE });
        self
    }

    /// Writes an unsigned integer.
    pub fn uint(&mut self, n: u64) -> &mut Self {
        self.head(MAJOR_UNSIGNED, n);
        self
    }

    /// Writes a signed integer.
    #[allow(clippy::cast_sign_loss)]
    pub fn int(&mut self, n: i64) -> &mut Self {
        if n >= 0 {
            self.head(MAJOR_UNSIGNED, n as u64);
        } else {
            // -1 - n is non-negative for every negative i64
            self.head(MAJOR_NEGATIVE, (-1 - n) as u64);
        }
        self
    }

    /// Writes a byte string.
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.head(MAJOR_BYTES, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
        self
    }

    /// Writes a text string.
    pub fn text(&mut self, text: &str) -> &mut Self {
        self.head(MAJOR_TEXT, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
        self
    }

    /// Opens an array of `len` items.
    pub fn array(&mut self, len: usize) -> &mut Self {
        self.head(MAJOR_ARRAY, len as u64);
        self
    }

    /// Opens a map of `len` pairs. The caller must write keys in canonical
    /// order; [`CanonicalEncoder::value`] does this for [`Value::Map`].
    pub fn map(&mut self, len: usize) -> &mut Self {
        self.head(MAJOR_MAP, len as u64);
        self
    }

    /// Writes a tag number; the next item is the tagged content.
    pub fn tag(&mut self, tag: u64) -> &mut Self {
        self.head(MAJOR_TAG, tag);
        self
    }

    /// Writes an optional text string as text or null.
    pub fn opt_text(&mut self, text: Option<&str>) -> &mut Self {
        match text {
            Some(t) => self.text(t),
            None => self.null(),
        }
    }

    /// Writes a dynamic value.
    pub fn value(&mut self, value: &Value) -> &mut Self {
        match value {
            Value::Null => self.null(),
            Value::Bool(b) => self.bool(*b),
            Value::Integer(n) => self.int(*n),
            Value::Bytes(b) => self.bytes(b),
            Value::Text(s) => self.text(s),
            Value::Array(items) => {
                self.array(items.len());
                for item in items {
                    self.value(item);
                }
                self
            }
            Value::Map(pairs) => self.canonical_map(pairs),
            Value::Tag(tag, inner) => {
                self.tag(*tag);
                self.value(inner)
            }
        }
    }

    /// Appends bytes that are already a complete canonical item.
    pub fn raw(&mut self, encoded: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(encoded);
        self
    }

    fn canonical_map(&mut self, pairs: &[(Value, Value)]) -> &mut Self {
        let mut encoded: Vec<(Vec<u8>, &Value)> = pairs
            .iter()
            .map(|(key, value)| (key.to_bytes(), value))
            .collect();
        encoded.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));

        self.map(encoded.len());
        for (key, value) in encoded {
            self.buffer.extend_from_slice(&key);
            self.value(value);
        }
        self
    }

    #[allow(clippy::cast_possible_truncation)]
    fn head(&mut self, major: u8, arg: u64) {
        let mt = major << 5;
        if arg < 24 {
            self.buffer.push(mt | arg as u8);
        } else if arg <= u64::from(u8::MAX) {
            self.buffer.push(mt | 24);
            self.buffer.push(arg as u8);
        } else if arg <= u64::from(u16::MAX) {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(arg as u16).to_be_bytes());
        } else if arg <= u64::from(u32::MAX) {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(arg as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&arg.to_be_bytes());
        }
    }
}
