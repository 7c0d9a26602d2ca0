//! Protocol error types.

use thiserror::Error;

/// Errors parsing a ledger identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Identifier has no digits or more than 64 of them.
    #[error("identifier must have 1 to 64 hex digits, got {len}")]
    Length {
        /// Number of hex digits seen (prefix excluded).
        len: usize,
    },

    /// Identifier contains a non-hex character.
    #[error("invalid hex in identifier: {0}")]
    Hex(String),
}

/// Errors crossing the ledger wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A reference or address field is not a valid identifier.
    #[error("invalid {field}: {source}")]
    Id {
        /// Name of the offending field.
        field: &'static str,
        /// Underlying parse failure.
        #[source]
        source: IdError,
    },

    /// A scalar field has an unusable value.
    #[error("invalid {field}: {reason}")]
    Field {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// CBOR serialization failed.
    #[error("record encoding failed: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("record decoding failed: {0}")]
    Decode(String),
}

impl WireError {
    pub(crate) fn id(field: &'static str) -> impl FnOnce(IdError) -> Self {
        move |source| Self::Id { field, source }
    }
}
