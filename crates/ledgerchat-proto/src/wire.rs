//! Raw ledger record shapes.
//!
//! Ledger RPC responses are loose about field shapes: an object reference may
//! arrive as a bare id string, as `{ "id": .. }`, or wrapped again as
//! `{ "fields": { "id": .. } }`; byte vectors may be a hex string or an array
//! of numbers; `u64` values are often decimal strings. The `Raw*` types
//! accept every one of those shapes and [`normalize`](RawChatNode::normalize)
//! turns them into the strict records from [`crate::node`]. Nothing past this
//! module sees the raw shapes.
//!
//! Records are encoded with CBOR for storage.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::WireError,
    ids::{ChatroomId, ID_LEN, MemberId, NodeId},
    node::{ChatNode, Chatroom, ChatroomTip},
};

/// Object reference in any of the shapes a ledger emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawObjectRef {
    /// `"0x.."`
    Bare(String),
    /// `{ "id": "0x.." }`
    Nested {
        /// Referenced id.
        id: String,
    },
    /// `{ "fields": { "id": "0x.." } }`
    Wrapped {
        /// Inner id holder.
        fields: RawIdField,
    },
}

/// Inner `{ "id": .. }` object of a wrapped reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIdField {
    /// Referenced id.
    pub id: String,
}

impl RawObjectRef {
    /// The referenced id string, whatever the shape.
    pub fn id_str(&self) -> &str {
        match self {
            Self::Bare(id) | Self::Nested { id } | Self::Wrapped { fields: RawIdField { id } } => {
                id
            },
        }
    }

    fn parse<T>(&self, field: &'static str, parse: fn(&str) -> Result<T, crate::IdError>) -> Result<T, WireError> {
        parse(self.id_str()).map_err(WireError::id(field))
    }
}

/// Byte vector as hex text or as an array of numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawBytes {
    /// Hex text, optionally `0x`-prefixed.
    Hex(String),
    /// Array of byte values.
    Array(Vec<u8>),
}

impl RawBytes {
    /// Decode to raw bytes.
    pub fn to_bytes(&self, field: &'static str) -> Result<Vec<u8>, WireError> {
        match self {
            Self::Hex(text) => {
                let digits = text.strip_prefix("0x").unwrap_or(text);
                hex::decode(digits)
                    .map_err(|e| WireError::Field { field, reason: e.to_string() })
            },
            Self::Array(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Unsigned integer as a number or a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    /// Plain number.
    Number(u64),
    /// Decimal text.
    Text(String),
}

impl RawNumber {
    /// Parse to `u64`.
    pub fn to_u64(&self, field: &'static str) -> Result<u64, WireError> {
        match self {
            Self::Number(n) => Ok(*n),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| WireError::Field { field, reason: e.to_string() }),
        }
    }
}

/// Chain node as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChatNode {
    /// Owning chatroom.
    pub chatroom_id: RawObjectRef,
    /// Sender address.
    pub sender: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: RawNumber,
    /// Predecessor reference, absent or `null` for the system marker.
    #[serde(default)]
    pub previous_chat_id: Option<RawObjectRef>,
    /// Payload bytes.
    pub encrypted_content: RawBytes,
}

impl RawChatNode {
    /// Canonical raw shape of a node: bare ids, hex payload, numeric time.
    pub fn from_node(node: &ChatNode) -> Self {
        Self {
            chatroom_id: RawObjectRef::Bare(node.chatroom_id.to_hex()),
            sender: node.sender.to_hex(),
            timestamp: RawNumber::Number(node.timestamp_ms),
            previous_chat_id: node.previous.map(|id| RawObjectRef::Bare(id.to_hex())),
            encrypted_content: RawBytes::Hex(hex::encode(&node.payload)),
        }
    }

    /// Convert to the strict node record.
    pub fn normalize(&self) -> Result<ChatNode, WireError> {
        let previous = self
            .previous_chat_id
            .as_ref()
            .map(|r| r.parse("previous_chat_id", NodeId::from_hex))
            .transpose()?;

        Ok(ChatNode {
            chatroom_id: self.chatroom_id.parse("chatroom_id", ChatroomId::from_hex)?,
            sender: MemberId::from_hex(&self.sender).map_err(WireError::id("sender"))?,
            timestamp_ms: self.timestamp.to_u64("timestamp")?,
            previous,
            payload: Bytes::from(self.encrypted_content.to_bytes("encrypted_content")?),
        })
    }
}

/// Chatroom object as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChatroom {
    /// Chatroom id.
    pub id: RawObjectRef,
    /// Creator address.
    pub creator: String,
    /// Creation time in milliseconds.
    pub created_at: RawNumber,
    /// Tip reference, absent while uninitialised.
    #[serde(default)]
    pub last_chat_id: Option<RawObjectRef>,
    /// Append counter.
    pub version: RawNumber,
}

impl RawChatroom {
    /// Canonical raw shape of a chatroom.
    pub fn from_chatroom(chatroom: &Chatroom) -> Self {
        Self {
            id: RawObjectRef::Bare(chatroom.id.to_hex()),
            creator: chatroom.creator.to_hex(),
            created_at: RawNumber::Number(chatroom.created_at_ms),
            last_chat_id: chatroom.tip.tip.map(|id| RawObjectRef::Bare(id.to_hex())),
            version: RawNumber::Number(chatroom.tip.version),
        }
    }

    /// Convert to the strict chatroom record.
    pub fn normalize(&self) -> Result<Chatroom, WireError> {
        let tip = self
            .last_chat_id
            .as_ref()
            .map(|r| r.parse("last_chat_id", NodeId::from_hex))
            .transpose()?;

        Ok(Chatroom {
            id: self.id.parse("id", ChatroomId::from_hex)?,
            creator: MemberId::from_hex(&self.creator).map_err(WireError::id("creator"))?,
            created_at_ms: self.created_at.to_u64("created_at")?,
            tip: ChatroomTip { tip, version: self.version.to_u64("version")? },
        })
    }
}

/// Chatroom key credential as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChatroomKey {
    /// Owning member address.
    pub owner: String,
    /// Chatroom the key opens.
    pub chatroom_id: RawObjectRef,
    /// 32 key bytes.
    pub key: RawBytes,
}

/// Normalised key credential fields.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Owning member.
    pub member: MemberId,
    /// Chatroom the key opens.
    pub chatroom: ChatroomId,
    /// Raw key bytes.
    pub key: [u8; ID_LEN],
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("member", &self.member)
            .field("chatroom", &self.chatroom)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl RawChatroomKey {
    /// Convert to a key record, checking the key length.
    pub fn normalize(&self) -> Result<KeyRecord, WireError> {
        let bytes = self.key.to_bytes("key")?;
        let key: [u8; ID_LEN] = bytes.as_slice().try_into().map_err(|_| WireError::Field {
            field: "key",
            reason: format!("expected {ID_LEN} bytes, got {}", bytes.len()),
        })?;

        Ok(KeyRecord {
            member: MemberId::from_hex(&self.owner).map_err(WireError::id("owner"))?,
            chatroom: self.chatroom_id.parse("chatroom_id", ChatroomId::from_hex)?,
            key,
        })
    }
}

/// Encode a record as CBOR.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(record, &mut buf).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR record.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}
