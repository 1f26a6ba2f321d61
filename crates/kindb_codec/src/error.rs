//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding.
///
/// Offsets are byte positions in the input where the offending item starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended in the middle of an item.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Offset where more input was needed.
        offset: usize,
    },

    /// An item of a different kind was found.
    #[error("expected {expected} at offset {offset}, found {found}")]
    TypeMismatch {
        /// What the caller asked for.
        expected: &'static str,
        /// What was found.
        found: &'static str,
        /// Offset of the item.
        offset: usize,
    },

    /// A tag other than the expected one was found.
    #[error("expected tag {expected}, found tag {found}")]
    UnexpectedTag {
        /// The expected tag number.
        expected: u64,
        /// The tag number found.
        found: u64,
    },

    /// The encoding is valid CBOR but not canonical.
    #[error("non-canonical encoding at offset {offset}: {reason}")]
    NonCanonical {
        /// Offset of the item.
        offset: usize,
        /// What rule was broken.
        reason: &'static str,
    },

    /// Float values are not used by kindb.
    #[error("float values are forbidden")]
    FloatForbidden,

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// A text string is not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 {
        /// Offset of the string.
        offset: usize,
    },

    /// A length prefix exceeds the decoder's limits.
    #[error("size limit exceeded: claimed {claimed}, max allowed {max_allowed}")]
    SizeLimitExceeded {
        /// The length found in the input.
        claimed: u64,
        /// The configured limit.
        max_allowed: u64,
    },

    /// Containers are nested deeper than the decoder allows.
    #[error("nesting deeper than {max} levels")]
    DepthLimitExceeded {
        /// The nesting limit.
        max: usize,
    },

    /// An integer does not fit the requested type.
    #[error("integer overflow at offset {offset}")]
    IntegerOverflow {
        /// Offset of the integer.
        offset: usize,
    },

    /// Bytes remain after a complete top-level item.
    #[error("{remaining} trailing bytes after value")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        remaining: usize,
    },

    /// A structurally valid item has an invalid shape for its consumer.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the problem.
        message: String,
    },

    /// Unsupported simple value or reserved encoding.
    #[error("unsupported CBOR item: {what}")]
    Unsupported {
        /// What was found.
        what: String,
    },
}

impl CodecError {
    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsupported item error.
    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported { what: what.into() }
    }
}
