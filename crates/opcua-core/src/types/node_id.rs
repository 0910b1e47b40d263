//! NodeId — the address-space identifier, in its four identifier flavors.
//!
//! Numeric ids have three wire encodings of increasing width; the writer must
//! pick the most compact one that fits and the reader must accept all three.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::codec::{write_byte_buf, BinaryDecode, BinaryEncode, BinaryReader, CodecError};

// Encoding-byte values. The upper bits are reserved for ExpandedNodeId flags.
const TWO_BYTE: u8 = 0x00;
const FOUR_BYTE: u8 = 0x01;
const NUMERIC: u8 = 0x02;
const STRING: u8 = 0x03;
const GUID: u8 = 0x04;
const BYTE_STRING: u8 = 0x05;

const HAS_SERVER_INDEX: u8 = 0x40;
const HAS_NAMESPACE_URI: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Uuid),
    Opaque(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub const fn numeric(namespace: u16, id: u32) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    pub const fn guid(namespace: u16, id: Uuid) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Guid(id),
        }
    }

    pub fn opaque(namespace: u16, id: impl Into<Vec<u8>>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Opaque(id.into()),
        }
    }

    pub const NULL: NodeId = NodeId::numeric(0, 0);

    pub fn is_null(&self) -> bool {
        matches!(
            self,
            NodeId {
                namespace: 0,
                identifier: Identifier::Numeric(0)
            }
        )
    }

    /// The numeric id if this is a namespace-0 numeric node, else `None`.
    /// Type ids of binary-encoded structures live in namespace 0.
    pub fn as_type_id(&self) -> Option<u32> {
        match self {
            NodeId {
                namespace: 0,
                identifier: Identifier::Numeric(id),
            } => Some(*id),
            _ => None,
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::NULL
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "i={id}"),
            Identifier::String(s) => write!(f, "s={s}"),
            Identifier::Guid(g) => write!(f, "g={g}"),
            Identifier::Opaque(b) => write!(f, "b={}", hex::encode(b)),
        }
    }
}

impl BinaryEncode for NodeId {
    fn encode(&self, out: &mut BytesMut) {
        match &self.identifier {
            Identifier::Numeric(id) => {
                if self.namespace == 0 && *id <= u32::from(u8::MAX) {
                    out.put_u8(TWO_BYTE);
                    out.put_u8(*id as u8);
                } else if self.namespace <= u16::from(u8::MAX) && *id <= u32::from(u16::MAX) {
                    out.put_u8(FOUR_BYTE);
                    out.put_u8(self.namespace as u8);
                    out.put_u16_le(*id as u16);
                } else {
                    out.put_u8(NUMERIC);
                    out.put_u16_le(self.namespace);
                    out.put_u32_le(*id);
                }
            }
            Identifier::String(s) => {
                out.put_u8(STRING);
                out.put_u16_le(self.namespace);
                crate::codec::write_string(out, Some(s));
            }
            Identifier::Guid(g) => {
                out.put_u8(GUID);
                out.put_u16_le(self.namespace);
                g.encode(out);
            }
            Identifier::Opaque(b) => {
                out.put_u8(BYTE_STRING);
                out.put_u16_le(self.namespace);
                write_byte_buf(out, Some(b));
            }
        }
    }
}

fn decode_body(input: &mut BinaryReader<'_>, encoding: u8) -> Result<NodeId, CodecError> {
    match encoding {
        TWO_BYTE => Ok(NodeId::numeric(0, u32::from(input.read_u8()?))),
        FOUR_BYTE => {
            let namespace = u16::from(input.read_u8()?);
            let id = u32::from(input.read_u16()?);
            Ok(NodeId::numeric(namespace, id))
        }
        NUMERIC => {
            let namespace = input.read_u16()?;
            let id = input.read_u32()?;
            Ok(NodeId::numeric(namespace, id))
        }
        STRING => {
            let namespace = input.read_u16()?;
            let id = input.read_string()?.unwrap_or_default();
            Ok(NodeId::string(namespace, id))
        }
        GUID => {
            let namespace = input.read_u16()?;
            Ok(NodeId::guid(namespace, Uuid::decode(input)?))
        }
        BYTE_STRING => {
            let namespace = input.read_u16()?;
            let id = input.read_byte_buf()?.unwrap_or_default();
            Ok(NodeId::opaque(namespace, id))
        }
        value => Err(CodecError::UnknownByte {
            field: "NodeId encoding",
            value,
        }),
    }
}

impl BinaryDecode for NodeId {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let encoding = input.read_u8()?;
        if encoding & (HAS_NAMESPACE_URI | HAS_SERVER_INDEX) != 0 {
            return Err(CodecError::UnknownByte {
                field: "NodeId encoding",
                value: encoding,
            });
        }
        decode_body(input, encoding)
    }
}

// ── ExpandedNodeId ────────────────────────────────────────────────────────────

/// NodeId plus an optional namespace URI and server index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: Option<String>,
    pub server_index: u32,
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        ExpandedNodeId {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl BinaryEncode for ExpandedNodeId {
    fn encode(&self, out: &mut BytesMut) {
        let mut inner = BytesMut::new();
        self.node_id.encode(&mut inner);
        let mut encoding = inner[0];
        if self.namespace_uri.is_some() {
            encoding |= HAS_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            encoding |= HAS_SERVER_INDEX;
        }
        out.put_u8(encoding);
        out.put_slice(&inner[1..]);
        if let Some(uri) = &self.namespace_uri {
            crate::codec::write_string(out, Some(uri));
        }
        if self.server_index != 0 {
            out.put_u32_le(self.server_index);
        }
    }
}

impl BinaryDecode for ExpandedNodeId {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let encoding = input.read_u8()?;
        let node_id = decode_body(input, encoding & !(HAS_NAMESPACE_URI | HAS_SERVER_INDEX))?;
        let namespace_uri = if encoding & HAS_NAMESPACE_URI != 0 {
            input.read_string()?
        } else {
            None
        };
        let server_index = if encoding & HAS_SERVER_INDEX != 0 {
            input.read_u32()?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl std::fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if let Some(uri) = &self.namespace_uri {
            write!(f, "nsu={uri};")?;
        }
        write!(f, "{}", self.node_id)
    }
}
