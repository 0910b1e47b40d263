//! opcua-core — binary codec, built-in types, wire framing and the
//! per-policy crypto suite. No sockets and no async; everything here operates
//! on byte buffers so the client crate can drive it from its I/O task.

pub mod codec;
pub mod crypto;
pub mod types;
pub mod wire;

pub use codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};
pub use types::{
    ByteString, DataValue, DateTime, ExpandedNodeId, ExtensionObject, LocalizedText, NodeId,
    QualifiedName, StatusCode, Variant,
};
