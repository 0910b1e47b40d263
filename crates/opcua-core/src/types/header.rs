//! Request and response headers shared by every service message.

use bytes::{BufMut, BytesMut};

use super::{DateTime, DiagnosticInfo, ExtensionObject, NodeId, StatusCode};
use crate::codec::{
    decode_array, encode_array_opt, BinaryDecode, BinaryEncode, BinaryReader, CodecError,
};

/// Default service timeout hint, milliseconds.
pub const DEFAULT_TIMEOUT_HINT_MS: u32 = 15_000;

#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    /// Session authentication token; null before a session exists.
    pub authentication_token: NodeId,
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub return_diagnostics: u32,
    pub audit_entry_id: Option<String>,
    pub timeout_hint: u32,
    pub additional_header: ExtensionObject,
}

impl RequestHeader {
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        RequestHeader {
            authentication_token,
            timestamp: DateTime::now(),
            request_handle,
            return_diagnostics: 0,
            audit_entry_id: None,
            timeout_hint,
            additional_header: ExtensionObject::NULL,
        }
    }
}

impl Default for RequestHeader {
    fn default() -> Self {
        RequestHeader::new(NodeId::NULL, 0, DEFAULT_TIMEOUT_HINT_MS)
    }
}

impl BinaryEncode for RequestHeader {
    fn encode(&self, out: &mut BytesMut) {
        self.authentication_token.encode(out);
        self.timestamp.encode(out);
        out.put_u32_le(self.request_handle);
        out.put_u32_le(self.return_diagnostics);
        crate::codec::write_string(out, self.audit_entry_id.as_deref());
        out.put_u32_le(self.timeout_hint);
        self.additional_header.encode(out);
    }
}

impl BinaryDecode for RequestHeader {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(RequestHeader {
            authentication_token: NodeId::decode(input)?,
            timestamp: DateTime::decode(input)?,
            request_handle: input.read_u32()?,
            return_diagnostics: input.read_u32()?,
            audit_entry_id: input.read_string()?,
            timeout_hint: input.read_u32()?,
            additional_header: ExtensionObject::decode(input)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseHeader {
    pub timestamp: DateTime,
    pub request_handle: u32,
    pub service_result: StatusCode,
    pub service_diagnostics: DiagnosticInfo,
    pub string_table: Option<Vec<Option<String>>>,
    pub additional_header: ExtensionObject,
}

impl BinaryEncode for ResponseHeader {
    fn encode(&self, out: &mut BytesMut) {
        self.timestamp.encode(out);
        out.put_u32_le(self.request_handle);
        self.service_result.encode(out);
        self.service_diagnostics.encode(out);
        encode_array_opt(self.string_table.as_deref(), out);
        self.additional_header.encode(out);
    }
}

impl BinaryDecode for ResponseHeader {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(ResponseHeader {
            timestamp: DateTime::decode(input)?,
            request_handle: input.read_u32()?,
            service_result: StatusCode::decode(input)?,
            service_diagnostics: DiagnosticInfo::decode(input)?,
            string_table: decode_array(input)?,
            additional_header: ExtensionObject::decode(input)?,
        })
    }
}
