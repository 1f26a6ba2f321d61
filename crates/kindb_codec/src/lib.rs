//! # kindb codec
//!
//! Canonical CBOR for kindb record payloads.
//!
//! Encoding is deterministic: the same record always produces the same bytes,
//! so payloads can be compared byte-for-byte. Decoding is pull-based:
//! [`CanonicalDecoder`] exposes typed reads and [`CanonicalDecoder::skip`],
//! so a reader can pull the leading fields of a record and stop.
//!
//! ## Canonical rules
//!
//! - Integers and lengths use the shortest encoding
//! - Map keys are ordered by encoded bytes, shorter first
//! - No floats, no indefinite-length items
//! - Text must be UTF-8
//!
//! ## Usage
//!
//! ```
//! use kindb_codec::{to_canonical_cbor, from_cbor, Value};
//!
//! let value = Value::tagged(40, Value::Array(vec![Value::Integer(1)]));
//! let bytes = to_canonical_cbor(&value);
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Types that write themselves as one canonical CBOR item.
pub trait CborEncode {
    /// Writes `self` to the encoder.
    fn encode_cbor(&self, enc: &mut CanonicalEncoder);

    /// Encodes `self` into a fresh buffer.
    fn to_cbor(&self) -> Vec<u8> {
        let mut enc = CanonicalEncoder::new();
        self.encode_cbor(&mut enc);
        enc.into_bytes()
    }
}

/// Types that read themselves from one CBOR item.
pub trait CborDecode: Sized {
    /// Reads one item from the decoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is malformed or of the wrong shape.
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self>;

    /// Decodes `bytes`, which must hold exactly one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is malformed or bytes remain.
    fn from_cbor_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut dec = CanonicalDecoder::new(bytes);
        let value = Self::decode_cbor(&mut dec)?;
        dec.finish()?;
        Ok(value)
    }
}

impl CborEncode for Value {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.value(self);
    }
}

impl CborDecode for Value {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.decode()
    }
}

impl CborEncode for String {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.text(self);
    }
}

impl CborDecode for String {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.read_text().map(str::to_string)
    }
}

impl CborEncode for i64 {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.int(*self);
    }
}

impl CborDecode for i64 {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.read_int()
    }
}

impl CborEncode for u64 {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.uint(*self);
    }
}

impl CborDecode for u64 {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.read_uint()
    }
}

impl CborEncode for u32 {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.uint(u64::from(*self));
    }
}

impl CborDecode for u32 {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        let offset = dec.position();
        u32::try_from(dec.read_uint()?).map_err(|_| CodecError::IntegerOverflow { offset })
    }
}

impl CborEncode for bool {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.bool(*self);
    }
}

impl CborDecode for bool {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.read_bool()
    }
}

impl<T: CborEncode> CborEncode for Option<T> {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        match self {
            Some(inner) => inner.encode_cbor(enc),
            None => {
                enc.null();
            }
        }
    }
}

impl<T: CborDecode> CborDecode for Option<T> {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        if dec.peek_is_null() {
            dec.read_null()?;
            Ok(None)
        } else {
            T::decode_cbor(dec).map(Some)
        }
    }
}

impl<T: CborEncode> CborEncode for Vec<T> {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(self.len());
        for item in self {
            item.encode_cbor(enc);
        }
    }
}

impl<T: CborDecode> CborDecode for Vec<T> {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        let len = dec.read_array_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode_cbor(dec)?);
        }
        Ok(items)
    }
}

impl<A: CborEncode, B: CborEncode> CborEncode for (A, B) {
    fn encode_cbor(&self, enc: &mut CanonicalEncoder) {
        enc.array(2);
        self.0.encode_cbor(enc);
        self.1.encode_cbor(enc);
    }
}

impl<A: CborDecode, B: CborDecode> CborDecode for (A, B) {
    fn decode_cbor(dec: &mut CanonicalDecoder<'_>) -> CodecResult<Self> {
        dec.expect_array(2)?;
        Ok((A::decode_cbor(dec)?, B::decode_cbor(dec)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::vec(("[a-z]{1,4}", inner.clone()), 0..4).prop_map(|pairs| {
                    let mut seen = std::collections::BTreeSet::new();
                    let pairs = pairs
                        .into_iter()
                        .filter(|(k, _)| seen.insert(k.clone()))
                        .map(|(k, v)| (Value::Text(k), v))
                        .collect();
                    Value::map(pairs)
                }),
                (100u64..1000, inner).prop_map(|(t, v)| Value::tagged(t, v)),
            ]
        })
    }

    fn to_ciborium(value: &Value) -> ciborium::value::Value {
        use ciborium::value::Value as C;
        match value {
            Value::Null => C::Null,
            Value::Bool(b) => C::Bool(*b),
            Value::Integer(n) => C::Integer((*n).into()),
            Value::Bytes(b) => C::Bytes(b.clone()),
            Value::Text(t) => C::Text(t.clone()),
            Value::Array(items) => C::Array(items.iter().map(to_ciborium).collect()),
            Value::Map(pairs) => C::Map(
                pairs
                    .iter()
                    .map(|(k, v)| (to_ciborium(k), to_ciborium(v)))
                    .collect(),
            ),
            Value::Tag(tag, inner) => C::Tag(*tag, Box::new(to_ciborium(inner))),
        }
    }

    proptest! {
        #[test]
        fn value_roundtrip(value in arb_value()) {
            let bytes = to_canonical_cbor(&value);
            prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
        }

        #[test]
        fn skip_lands_after_item(value in arb_value(), trailer in any::<u32>()) {
            let mut enc = CanonicalEncoder::new();
            enc.value(&value).uint(u64::from(trailer));
            let bytes = enc.into_bytes();
            let mut dec = CanonicalDecoder::new(&bytes);
            dec.skip().unwrap();
            prop_assert_eq!(dec.read_uint().unwrap(), u64::from(trailer));
            prop_assert!(dec.is_empty());
        }

        #[test]
        fn readable_by_ciborium(value in arb_value()) {
            let bytes = to_canonical_cbor(&value);
            let parsed: ciborium::value::Value = ciborium::de::from_reader(&bytes[..]).unwrap();
            prop_assert_eq!(parsed, to_ciborium(&value));
        }
    }

    #[test]
    fn typed_roundtrip() {
        let original: (String, Vec<Option<i64>>) =
            ("I0001".to_string(), vec![Some(-3), None, Some(70_000)]);
        let bytes = original.to_cbor();
        let decoded = <(String, Vec<Option<i64>>)>::from_cbor_bytes(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn u32_overflow_detected() {
        let bytes = (u64::from(u32::MAX) + 1).to_cbor();
        assert!(matches!(
            u32::from_cbor_bytes(&bytes),
            Err(CodecError::IntegerOverflow { offset: 0 })
        ));
    }
}
