//! Decode error types.

use thiserror::Error;

/// Result type alias for protocol operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Low-level BER/LDAP decoding error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// The outermost element is not the LDAPMessage SEQUENCE.
    #[error("PDU does not start with a BER sequence (tag 0x{tag:02x})")]
    NotASequence { tag: u8 },

    /// Indefinite lengths are forbidden by LDAP's BER subset.
    #[error("indefinite BER length is not supported")]
    IndefiniteLength,

    /// Length field wider than the codec accepts.
    #[error("BER length field of {octets} octets exceeds the supported width")]
    LengthTooWide { octets: usize },

    /// A single PDU larger than the frame cap.
    #[error("PDU of {len} bytes exceeds the {max} byte frame cap")]
    FrameTooLarge { len: usize, max: usize },

    /// An element claimed more content than the buffer holds.
    #[error("truncated BER element")]
    Truncated,

    /// Got one tag where another was required.
    #[error("unexpected tag 0x{got:02x}, expected 0x{expected:02x}")]
    UnexpectedTag { expected: u8, got: u8 },

    /// INTEGER/ENUMERATED content was empty or too wide.
    #[error("invalid BER integer encoding")]
    InvalidInteger,

    /// An enumerated field carried a value outside its defined range.
    #[error("enumerated value {value} is invalid for {field}")]
    InvalidEnumerated { field: &'static str, value: i64 },

    /// Catch-all for structurally broken sub-elements.
    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// A decode failure, carrying the message id of the offending PDU when the
/// decoder got far enough to learn it. The connection layer answers
/// `protocolError` on that id before closing; without an id it just closes.
#[derive(Debug, Error)]
#[error("failed to decode LDAP message: {source}")]
pub struct DecodeFailure {
    pub message_id: Option<i32>,
    #[source]
    pub source: ProtoError,
}

impl DecodeFailure {
    pub(crate) fn bare(source: ProtoError) -> Self {
        Self {
            message_id: None,
            source,
        }
    }

    pub(crate) fn at(message_id: i32, source: ProtoError) -> Self {
        Self {
            message_id: Some(message_id),
            source,
        }
    }
}
