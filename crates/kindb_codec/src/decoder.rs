//! Canonical CBOR decoder with typed, lazy reads.

use crate::encoder::{
    MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NEGATIVE, MAJOR_SIMPLE, MAJOR_TAG, MAJOR_TEXT,
    MAJOR_UNSIGNED,
};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Maximum element count accepted for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum byte/text string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// Maximum container nesting.
const MAX_DEPTH: usize = 64;

/// Decode one complete value, rejecting trailing bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not a single canonical CBOR item.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    decoder.finish()?;
    Ok(value)
}

#[derive(Debug, Clone, Copy)]
struct Head {
    major: u8,
    info: u8,
    arg: u64,
    offset: usize,
}

fn major_name(major: u8, info: u8) -> &'static str {
    match major {
        MAJOR_UNSIGNED | MAJOR_NEGATIVE => "integer",
        MAJOR_BYTES => "bytes",
        MAJOR_TEXT => "text",
        MAJOR_ARRAY => "array",
        MAJOR_MAP => "map",
        MAJOR_TAG => "tag",
        _ => match info {
            20 | 21 => "bool",
            22 | 23 => "null",
            _ => "simple",
        },
    }
}

/// A pull decoder over a byte slice.
///
/// Typed `read_*` calls consume exactly one item and fail with
/// [`CodecError::TypeMismatch`] if the next item is of another kind.
/// [`CanonicalDecoder::skip`] consumes an item without materializing it,
/// which lets callers decode a prefix of a record and ignore the rest.
#[derive(Debug, Clone)]
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if all bytes have been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Fails unless every byte has been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TrailingBytes`] if input remains.
    pub fn finish(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                remaining: self.data.len() - self.pos,
            })
        }
    }

    /// Returns true if the next item is null, without consuming it.
    #[must_use]
    pub fn peek_is_null(&self) -> bool {
        self.data.get(self.pos) == Some(&0xf6)
    }

    /// Decode the next item into a dynamic [`Value`].
    ///
    /// # Errors
    ///
    /// Returns an error on malformed or non-canonical input.
    pub fn decode(&mut self) -> CodecResult<Value> {
        self.decode_at_depth(0)
    }

    /// Skip the next item, including any nested content.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input.
    pub fn skip(&mut self) -> CodecResult<()> {
        self.skip_at_depth(0)
    }

    /// Reads null.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not null.
    pub fn read_null(&mut self) -> CodecResult<()> {
        let head = self.read_head()?;
        if head.major == MAJOR_SIMPLE && matches!(head.info, 22 | 23) {
            Ok(())
        } else {
            Err(self.mismatch("null", head))
        }
    }

    /// Reads a boolean.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not a boolean.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        let head = self.read_head()?;
        match (head.major, head.info) {
            (MAJOR_SIMPLE, 20) => Ok(false),
            (MAJOR_SIMPLE, 21) => Ok(true),
            _ => Err(self.mismatch("bool", head)),
        }
    }

    /// Reads an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not a non-negative integer.
    pub fn read_uint(&mut self) -> CodecResult<u64> {
        let head = self.read_head()?;
        if head.major == MAJOR_UNSIGNED {
            Ok(head.arg)
        } else {
            Err(self.mismatch("unsigned integer", head))
        }
    }

    /// Reads a signed integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not an integer or does not fit
    /// in an `i64`.
    pub fn read_int(&mut self) -> CodecResult<i64> {
        let head = self.read_head()?;
        let magnitude = i64::try_from(head.arg).map_err(|_| CodecError::IntegerOverflow {
            offset: head.offset,
        })?;
        match head.major {
            MAJOR_UNSIGNED => Ok(magnitude),
            MAJOR_NEGATIVE => Ok(-1 - magnitude),
            _ => Err(self.mismatch("integer", head)),
        }
    }

    /// Reads a byte string, borrowing from the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not a byte string.
    pub fn read_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let head = self.read_head()?;
        if head.major != MAJOR_BYTES {
            return Err(self.mismatch("bytes", head));
        }
        self.take_payload(head.arg)
    }

    /// Reads a text string, borrowing from the input.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not valid UTF-8 text.
    pub fn read_text(&mut self) -> CodecResult<&'a str> {
        let head = self.read_head()?;
        if head.major != MAJOR_TEXT {
            return Err(self.mismatch("text", head));
        }
        let bytes = self.take_payload(head.arg)?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 {
            offset: head.offset,
        })
    }

    /// Reads text or null.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is neither.
    pub fn read_opt_text(&mut self) -> CodecResult<Option<&'a str>> {
        if self.peek_is_null() {
            self.pos += 1;
            return Ok(None);
        }
        self.read_text().map(Some)
    }

    /// Reads an array header and returns the element count.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not an array.
    pub fn read_array_len(&mut self) -> CodecResult<usize> {
        let head = self.read_head()?;
        if head.major != MAJOR_ARRAY {
            return Err(self.mismatch("array", head));
        }
        self.container_len(head.arg)
    }

    /// Reads a map header and returns the pair count.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not a map.
    pub fn read_map_len(&mut self) -> CodecResult<usize> {
        let head = self.read_head()?;
        if head.major != MAJOR_MAP {
            return Err(self.mismatch("map", head));
        }
        self.container_len(head.arg)
    }

    /// Reads a tag number.
    ///
    /// # Errors
    ///
    /// Returns an error if the next item is not a tag.
    pub fn read_tag(&mut self) -> CodecResult<u64> {
        let head = self.read_head()?;
        if head.major == MAJOR_TAG {
            Ok(head.arg)
        } else {
            Err(self.mismatch("tag", head))
        }
    }

    /// Reads a tag and checks its number.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedTag`] on a different tag number.
    pub fn expect_tag(&mut self, expected: u64) -> CodecResult<()> {
        let found = self.read_tag()?;
        if found == expected {
            Ok(())
        } else {
            Err(CodecError::UnexpectedTag { expected, found })
        }
    }

    /// Reads an array header and checks its length.
    ///
    /// # Errors
    ///
    /// Returns an error if the length differs.
    pub fn expect_array(&mut self, expected: usize) -> CodecResult<()> {
        let len = self.read_array_len()?;
        if len == expected {
            Ok(())
        } else {
            Err(CodecError::invalid_structure(format!(
                "expected array of {expected} items, found {len}"
            )))
        }
    }

    fn mismatch(&self, expected: &'static str, head: Head) -> CodecError {
        CodecError::TypeMismatch {
            expected,
            found: major_name(head.major, head.info),
            offset: head.offset,
        }
    }

    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof { offset: self.pos })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_payload(&mut self, len: u64) -> CodecResult<&'a [u8]> {
        if len > MAX_BYTES_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_BYTES_LENGTH,
            });
        }
        self.read_slice(len as usize)
    }

    fn container_len(&self, len: u64) -> CodecResult<usize> {
        if len > MAX_CONTAINER_ELEMENTS {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_CONTAINER_ELEMENTS,
            });
        }
        // every element needs at least one byte
        if len as usize > self.data.len() - self.pos {
            return Err(CodecError::UnexpectedEof {
                offset: self.data.len(),
            });
        }
        Ok(len as usize)
    }

    fn read_head(&mut self) -> CodecResult<Head> {
        let offset = self.pos;
        let initial = self.read_byte()?;
        let major = initial >> 5;
        let info = initial & 0x1f;

        if major == MAJOR_SIMPLE {
            return match info {
                20..=23 => Ok(Head {
                    major,
                    info,
                    arg: u64::from(info),
                    offset,
                }),
                24 => {
                    let simple = self.read_byte()?;
                    if simple < 32 {
                        Err(CodecError::NonCanonical {
                            offset,
                            reason: "simple value should use direct encoding",
                        })
                    } else {
                        Err(CodecError::unsupported(format!("simple value {simple}")))
                    }
                }
                25..=27 => Err(CodecError::FloatForbidden),
                31 => Err(CodecError::invalid_structure("break without indefinite item")),
                _ => Err(CodecError::unsupported(format!("simple value {info}"))),
            };
        }

        let arg = match info {
            0..=23 => u64::from(info),
            24 => {
                let v = u64::from(self.read_byte()?);
                self.check_shortest(v >= 24, offset)?;
                v
            }
            25 => {
                let b = self.read_slice(2)?;
                let v = u64::from(u16::from_be_bytes([b[0], b[1]]));
                self.check_shortest(v > u64::from(u8::MAX), offset)?;
                v
            }
            26 => {
                let b = self.read_slice(4)?;
                let v = u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]));
                self.check_shortest(v > u64::from(u16::MAX), offset)?;
                v
            }
            27 => {
                let b = self.read_slice(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                let v = u64::from_be_bytes(raw);
                self.check_shortest(v > u64::from(u32::MAX), offset)?;
                v
            }
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };

        Ok(Head {
            major,
            info,
            arg,
            offset,
        })
    }

    fn check_shortest(&self, ok: bool, offset: usize) -> CodecResult<()> {
        if ok {
            Ok(())
        } else {
            Err(CodecError::NonCanonical {
                offset,
                reason: "value could be encoded in fewer bytes",
            })
        }
    }

    fn decode_at_depth(&mut self, depth: usize) -> CodecResult<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded { max: MAX_DEPTH });
        }
        let head = self.read_head()?;
        match head.major {
            MAJOR_UNSIGNED => i64::try_from(head.arg)
                .map(Value::Integer)
                .map_err(|_| CodecError::IntegerOverflow {
                    offset: head.offset,
                }),
            MAJOR_NEGATIVE => i64::try_from(head.arg)
                .map(|m| Value::Integer(-1 - m))
                .map_err(|_| CodecError::IntegerOverflow {
                    offset: head.offset,
                }),
            MAJOR_BYTES => Ok(Value::Bytes(self.take_payload(head.arg)?.to_vec())),
            MAJOR_TEXT => {
                let bytes = self.take_payload(head.arg)?;
                std::str::from_utf8(bytes)
                    .map(|s| Value::Text(s.to_string()))
                    .map_err(|_| CodecError::InvalidUtf8 {
                        offset: head.offset,
                    })
            }
            MAJOR_ARRAY => {
                let len = self.container_len(head.arg)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.decode_at_depth(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                let len = self.container_len(head.arg)?;
                let mut pairs = Vec::with_capacity(len);
                let mut prev_key: Option<&'a [u8]> = None;
                for _ in 0..len {
                    let key_start = self.pos;
                    let key = self.decode_at_depth(depth + 1)?;
                    let key_bytes = &self.data[key_start..self.pos];
                    if let Some(prev) = prev_key {
                        let ordered = prev.len() < key_bytes.len()
                            || (prev.len() == key_bytes.len() && prev < key_bytes);
                        if !ordered {
                            return Err(CodecError::NonCanonical {
                                offset: key_start,
                                reason: "map keys not in sorted order",
                            });
                        }
                    }
                    prev_key = Some(key_bytes);
                    let value = self.decode_at_depth(depth + 1)?;
                    pairs.push((key, value));
                }
                Ok(Value::Map(pairs))
            }
            MAJOR_TAG => {
                let inner = self.decode_at_depth(depth + 1)?;
                Ok(Value::Tag(head.arg, Box::new(inner)))
            }
            _ => match head.info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                _ => Ok(Value::Null),
            },
        }
    }

    fn skip_at_depth(&mut self, depth: usize) -> CodecResult<()> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthLimitExceeded { max: MAX_DEPTH });
        }
        let head = self.read_head()?;
        match head.major {
            MAJOR_BYTES | MAJOR_TEXT => {
                self.take_payload(head.arg)?;
            }
            MAJOR_ARRAY => {
                for _ in 0..self.container_len(head.arg)? {
                    self.skip_at_depth(depth + 1)?;
                }
            }
            MAJOR_MAP => {
                for _ in 0..self.container_len(head.arg)? {
                    self.skip_at_depth(depth + 1)?;
                    self.skip_at_depth(depth + 1)?;
                }
            }
            MAJOR_TAG => self.skip_at_depth(depth + 1)?,
            _ => {}
        }
        Ok(())
    }
}
