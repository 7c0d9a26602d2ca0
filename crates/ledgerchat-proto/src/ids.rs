//! Ledger identifiers.
//!
//! Chatrooms, chain nodes and members are all addressed by 32-byte ledger
//! identifiers. They render as `0x`-prefixed lowercase hex, which is also the
//! form the ledger uses on the wire. Short forms such as `0x2` are accepted
//! and left-padded with zeros.

use std::{fmt, str::FromStr};

use crate::error::IdError;

/// Length of every ledger identifier in bytes.
pub const ID_LEN: usize = 32;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            /// Wrap raw identifier bytes.
            pub const fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            /// Raw identifier bytes.
            pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Parse from hex, with or without a `0x` prefix.
            pub fn from_hex(s: &str) -> Result<Self, IdError> {
                parse_hex(s).map(Self)
            }

            /// Full `0x`-prefixed lowercase hex.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}(0x{}..)", stringify!($name), hex::encode(&self.0[..4]))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }
        }
    };
}

ledger_id!(
    /// Identifier of a chatroom object.
    ChatroomId
);

ledger_id!(
    /// Identifier of a chain node (one message record).
    NodeId
);

ledger_id!(
    /// Ledger address of a chatroom member.
    MemberId
);

fn parse_hex(s: &str) -> Result<[u8; ID_LEN], IdError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if digits.is_empty() || digits.len() > ID_LEN * 2 {
        return Err(IdError::Length { len: digits.len() });
    }

    let padded = format!("{digits:0>64}");
    let mut out = [0u8; ID_LEN];
    hex::decode_to_slice(&padded, &mut out).map_err(|e| IdError::Hex(e.to_string()))?;
    Ok(out)
}
