use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ProtocolError;
use super::peer::Peer;
use crate::blockchain::Block;

/// Delivery mode of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketType {
    Single,
    Broadcast,
}

/// Operation carried by a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PacketName {
    Join,
    JoinAnswer,
    GetLatestBlock,
    GetLatestBlockAnswer,
    DownloadBlock,
    DownloadBlockAnswer,
    FoundBlock,
}

impl PacketName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "JOIN",
            Self::JoinAnswer => "JOINANSWER",
            Self::GetLatestBlock => "GETLATESTBLOCK",
            Self::GetLatestBlockAnswer => "GETLATESTBLOCKANSWER",
            Self::DownloadBlock => "DOWNLOADBLOCK",
            Self::DownloadBlockAnswer => "DOWNLOADBLOCKANSWER",
            Self::FoundBlock => "FOUNDBLOCK",
        }
    }
}

impl fmt::Display for PacketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a node tells a joining peer about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSummary {
    pub me: Peer,
    pub last_block_index: u64,
}

/// Requested block range. Signed because requests come from untrusted peers
/// and are normalized by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start_index: i64,
    pub end_index: i64,
}

impl BlockRange {
    pub fn new(start_index: i64, end_index: i64) -> Self {
        Self {
            start_index,
            end_index,
        }
    }

    /// Swap reversed bounds and clamp a negative start to 0.
    /// `None` when nothing non-negative remains.
    pub fn normalized(&self) -> Option<(u64, u64)> {
        let (start, end) = if self.start_index > self.end_index {
            (self.end_index, self.start_index)
        } else {
            (self.start_index, self.end_index)
        };
        if end < 0 {
            return None;
        }
        Some((start.max(0) as u64, end as u64))
    }
}

/// Typed content of a packet, one variant per name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Join,
    JoinAnswer(ManagerSummary),
    GetLatestBlock,
    GetLatestBlockAnswer(Block),
    DownloadBlock(BlockRange),
    DownloadBlockAnswer(Vec<Block>),
    FoundBlock(u64),
}

impl Payload {
    pub fn name(&self) -> PacketName {
        match self {
            Self::Join => PacketName::Join,
            Self::JoinAnswer(_) => PacketName::JoinAnswer,
            Self::GetLatestBlock => PacketName::GetLatestBlock,
            Self::GetLatestBlockAnswer(_) => PacketName::GetLatestBlockAnswer,
            Self::DownloadBlock(_) => PacketName::DownloadBlock,
            Self::DownloadBlockAnswer(_) => PacketName::DownloadBlockAnswer,
            Self::FoundBlock(_) => PacketName::FoundBlock,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let bytes = match self {
            Self::Join | Self::GetLatestBlock => Vec::new(),
            Self::JoinAnswer(summary) => serde_json::to_vec(summary)?,
            Self::GetLatestBlockAnswer(block) => serde_json::to_vec(block)?,
            Self::DownloadBlock(range) => serde_json::to_vec(range)?,
            Self::DownloadBlockAnswer(blocks) => serde_json::to_vec(blocks)?,
            Self::FoundBlock(index) => index.to_string().into_bytes(),
        };
        Ok(bytes)
    }

    fn decode(name: PacketName, content: &[u8]) -> Result<Self, ProtocolError> {
        let payload = match name {
            PacketName::Join => Self::Join,
            PacketName::GetLatestBlock => Self::GetLatestBlock,
            PacketName::JoinAnswer => Self::JoinAnswer(serde_json::from_slice(content)?),
            PacketName::GetLatestBlockAnswer => {
                Self::GetLatestBlockAnswer(Block::from_json(content)?)
            }
            PacketName::DownloadBlock => Self::DownloadBlock(serde_json::from_slice(content)?),
            PacketName::DownloadBlockAnswer => {
                Self::DownloadBlockAnswer(serde_json::from_slice(content)?)
            }
            PacketName::FoundBlock => {
                let text = String::from_utf8_lossy(content);
                let index = text
                    .trim()
                    .parse()
                    .map_err(|_| ProtocolError::InvalidBlockIndex(text.to_string()))?;
                Self::FoundBlock(index)
            }
        };
        Ok(payload)
    }
}

/// A protocol message. `index` is the broadcast dedup id and is only
/// present on broadcast packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sender: Peer,
    pub kind: PacketType,
    pub index: Option<u64>,
    pub payload: Payload,
}

/// JSON envelope as it travels on the wire.
#[derive(Serialize, Deserialize)]
struct WirePacket {
    sender: Peer,
    #[serde(rename = "type")]
    kind: PacketType,
    name: PacketName,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    index: WireIndex,
}

/// Dedup ids are accepted as a JSON number or a decimal string.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireIndex {
    Number(u64),
    Text(String),
}

impl Default for WireIndex {
    fn default() -> Self {
        Self::Number(0)
    }
}

impl Packet {
    pub fn single(sender: Peer, payload: Payload) -> Self {
        Self {
            sender,
            kind: PacketType::Single,
            index: None,
            payload,
        }
    }

    /// Broadcast packet with a fresh random non-zero dedup id.
    pub fn broadcast(sender: Peer, payload: Payload) -> Self {
        Self {
            sender,
            kind: PacketType::Broadcast,
            index: Some(rand::thread_rng().gen_range(1..=u64::MAX)),
            payload,
        }
    }

    pub fn name(&self) -> PacketName {
        self.payload.name()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let wire = WirePacket {
            sender: self.sender.clone(),
            kind: self.kind,
            name: self.name(),
            content: Some(STANDARD.encode(self.payload.encode()?)),
            index: WireIndex::Number(self.index.unwrap_or(0)),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let wire: WirePacket = serde_json::from_slice(bytes)?;
        let content = match wire.content {
            Some(encoded) => STANDARD.decode(encoded)?,
            None => Vec::new(),
        };
        let payload = Payload::decode(wire.name, &content)?;

        let raw_index = match wire.index {
            WireIndex::Number(n) => n,
            WireIndex::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| ProtocolError::InvalidIndex(text))?,
        };
        let index = match wire.kind {
            PacketType::Single => None,
            PacketType::Broadcast if raw_index == 0 => {
                return Err(ProtocolError::MissingIndex(wire.name));
            }
            PacketType::Broadcast => Some(raw_index),
        };

        Ok(Self {
            sender: wire.sender,
            kind: wire.kind,
            index,
            payload,
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet{{type: {:?}, name: {}, sender: {}}}",
            self.kind,
            self.name(),
            self.sender.id
        )
    }
}
