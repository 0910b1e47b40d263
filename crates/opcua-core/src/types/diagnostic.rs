//! DiagnosticInfo — optional vendor diagnostics attached to responses.
//!
//! Every field sits behind a mask bit; the string-valued fields are indexes
//! into the response's string table. Inner diagnostics nest recursively and
//! are depth-limited by the reader.

use bytes::{BufMut, BytesMut};

use super::StatusCode;
use crate::codec::{write_string, BinaryDecode, BinaryEncode, BinaryReader, CodecError};

const HAS_SYMBOLIC_ID: u8 = 0x01;
const HAS_NAMESPACE_URI: u8 = 0x02;
const HAS_LOCALIZED_TEXT: u8 = 0x04;
const HAS_LOCALE: u8 = 0x08;
const HAS_ADDITIONAL_INFO: u8 = 0x10;
const HAS_INNER_STATUS: u8 = 0x20;
const HAS_INNER_DIAGNOSTIC: u8 = 0x40;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub locale: Option<i32>,
    pub localized_text: Option<i32>,
    pub additional_info: Option<String>,
    pub inner_status: Option<StatusCode>,
    pub inner_diagnostic: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, out: &mut BytesMut) {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= HAS_NAMESPACE_URI;
        }
        if self.localized_text.is_some() {
            mask |= HAS_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= HAS_LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= HAS_ADDITIONAL_INFO;
        }
        if self.inner_status.is_some() {
            mask |= HAS_INNER_STATUS;
        }
        if self.inner_diagnostic.is_some() {
            mask |= HAS_INNER_DIAGNOSTIC;
        }
        out.put_u8(mask);
        if let Some(v) = self.symbolic_id {
            out.put_i32_le(v);
        }
        if let Some(v) = self.namespace_uri {
            out.put_i32_le(v);
        }
        if let Some(v) = self.locale {
            out.put_i32_le(v);
        }
        if let Some(v) = self.localized_text {
            out.put_i32_le(v);
        }
        if let Some(v) = &self.additional_info {
            write_string(out, Some(v));
        }
        if let Some(v) = self.inner_status {
            v.encode(out);
        }
        if let Some(v) = &self.inner_diagnostic {
            v.encode(out);
        }
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let mask = input.read_u8()?;
        if mask & 0x80 != 0 {
            return Err(CodecError::UnknownByte {
                field: "DiagnosticInfo mask",
                value: mask,
            });
        }
        let symbolic_id = (mask & HAS_SYMBOLIC_ID != 0)
            .then(|| input.read_i32())
            .transpose()?;
        let namespace_uri = (mask & HAS_NAMESPACE_URI != 0)
            .then(|| input.read_i32())
            .transpose()?;
        let locale = (mask & HAS_LOCALE != 0)
            .then(|| input.read_i32())
            .transpose()?;
        let localized_text = (mask & HAS_LOCALIZED_TEXT != 0)
            .then(|| input.read_i32())
            .transpose()?;
        let additional_info = if mask & HAS_ADDITIONAL_INFO != 0 {
            input.read_string()?
        } else {
            None
        };
        let inner_status = (mask & HAS_INNER_STATUS != 0)
            .then(|| StatusCode::decode(input))
            .transpose()?;
        let inner_diagnostic = if mask & HAS_INNER_DIAGNOSTIC != 0 {
            input.enter_nested()?;
            let inner = DiagnosticInfo::decode(input);
            input.leave_nested();
            Some(Box::new(inner?))
        } else {
            None
        };
        Ok(DiagnosticInfo {
            symbolic_id,
            namespace_uri,
            locale,
            localized_text,
            additional_info,
            inner_status,
            inner_diagnostic,
        })
    }
}
