//! ExtensionObject — a polymorphic payload identified by its encoding NodeId.
//!
//! Payloads this client does not recognise keep their raw body so they
//! round-trip untouched; typed decoding happens at the layers that know the
//! encoding ids they expect.

use bytes::{BufMut, BytesMut};

use super::{ByteString, NodeId};
use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};

const ENCODING_NONE: u8 = 0;
const ENCODING_BINARY: u8 = 1;
const ENCODING_XML: u8 = 2;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExtensionBody {
    #[default]
    None,
    /// Length-prefixed binary encoding.
    Binary(Vec<u8>),
    /// XML element body, carried opaque.
    Xml(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    /// Encoding-type id, namespace-0 numeric for the built-in structures.
    pub type_id: NodeId,
    pub body: ExtensionBody,
}

impl ExtensionObject {
    pub const NULL: ExtensionObject = ExtensionObject {
        type_id: NodeId::NULL,
        body: ExtensionBody::None,
    };

    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && matches!(self.body, ExtensionBody::None)
    }

    /// Wrap an encodable structure under its binary encoding id.
    pub fn from_encodable<T: BinaryEncode>(type_id: u32, value: &T) -> Self {
        ExtensionObject {
            type_id: NodeId::numeric(0, type_id),
            body: ExtensionBody::Binary(value.encode_to_vec()),
        }
    }

    /// Decode the binary body as `T`. Fails on a non-binary body or when the
    /// body has trailing bytes the decoder did not consume.
    pub fn decode_inner<T: BinaryDecode>(&self) -> Result<T, CodecError> {
        let bytes = match &self.body {
            ExtensionBody::Binary(bytes) => bytes,
            _ => {
                return Err(CodecError::UnknownByte {
                    field: "ExtensionObject encoding",
                    value: match self.body {
                        ExtensionBody::None => ENCODING_NONE,
                        ExtensionBody::Xml(_) => ENCODING_XML,
                        ExtensionBody::Binary(_) => unreachable!(),
                    },
                })
            }
        };
        let mut reader = BinaryReader::new(bytes);
        let value = T::decode(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::OutOfRange {
                field: "ExtensionObject body length",
            });
        }
        Ok(value)
    }
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, out: &mut BytesMut) {
        self.type_id.encode(out);
        match &self.body {
            ExtensionBody::None => out.put_u8(ENCODING_NONE),
            ExtensionBody::Binary(bytes) => {
                out.put_u8(ENCODING_BINARY);
                crate::codec::write_byte_buf(out, Some(bytes));
            }
            ExtensionBody::Xml(text) => {
                out.put_u8(ENCODING_XML);
                crate::codec::write_string(out, Some(text));
            }
        }
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let type_id = NodeId::decode(input)?;
        let encoding = input.read_u8()?;
        input.enter_nested()?;
        let body = match encoding {
            ENCODING_NONE => Ok(ExtensionBody::None),
            ENCODING_BINARY => {
                // A null body is treated as an empty payload.
                let bytes = ByteString::decode(input)?;
                Ok(ExtensionBody::Binary(bytes.0.unwrap_or_default()))
            }
            ENCODING_XML => Ok(ExtensionBody::Xml(input.read_string()?.unwrap_or_default())),
            value => Err(CodecError::UnknownByte {
                field: "ExtensionObject encoding",
                value,
            }),
        };
        input.leave_nested();
        Ok(ExtensionObject {
            type_id,
            body: body?,
        })
    }
}
