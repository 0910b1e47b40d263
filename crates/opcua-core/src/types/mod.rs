//! The OPC UA built-in composite types.

use bytes::{BufMut, BytesMut};

use crate::codec::{
    write_byte_buf, write_string, BinaryDecode, BinaryEncode, BinaryReader, CodecError,
};

mod data_value;
mod date_time;
mod diagnostic;
mod extension_object;
mod header;
mod node_id;
mod status;
mod variant;

pub use data_value::DataValue;
pub use date_time::DateTime;
pub use diagnostic::DiagnosticInfo;
pub use extension_object::{ExtensionBody, ExtensionObject};
pub use header::{RequestHeader, ResponseHeader, DEFAULT_TIMEOUT_HINT_MS};
pub use node_id::{ExpandedNodeId, Identifier, NodeId};
pub use status::StatusCode;
pub use variant::{Variant, VariantArray, VariantType};

// ── ByteString ────────────────────────────────────────────────────────────────

/// Length-prefixed raw bytes; wire-null is distinct from empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(pub Option<Vec<u8>>);

impl ByteString {
    pub const NULL: ByteString = ByteString(None);

    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ByteString(Some(bytes.into()))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(bytes: Vec<u8>) -> Self {
        ByteString(Some(bytes))
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        ByteString(Some(bytes.to_vec()))
    }
}

impl BinaryEncode for ByteString {
    fn encode(&self, out: &mut BytesMut) {
        write_byte_buf(out, self.0.as_deref());
    }
}

impl BinaryDecode for ByteString {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(ByteString(input.read_byte_buf()?))
    }
}

// ── QualifiedName ─────────────────────────────────────────────────────────────

/// Namespace-qualified browse name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: Option<String>,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        QualifiedName {
            namespace,
            name: Some(name.into()),
        }
    }
}

impl BinaryEncode for QualifiedName {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u16_le(self.namespace);
        write_string(out, self.name.as_deref());
    }
}

impl BinaryDecode for QualifiedName {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(QualifiedName {
            namespace: input.read_u16()?,
            name: input.read_string()?,
        })
    }
}

// ── LocalizedText ─────────────────────────────────────────────────────────────

const HAS_LOCALE: u8 = 0x01;
const HAS_TEXT: u8 = 0x02;

/// Human-readable text with an optional locale, gated by a two-bit mask.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: Option<String>,
    pub text: Option<String>,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        LocalizedText {
            locale: None,
            text: Some(text.into()),
        }
    }

    pub fn with_locale(locale: impl Into<String>, text: impl Into<String>) -> Self {
        LocalizedText {
            locale: Some(locale.into()),
            text: Some(text.into()),
        }
    }
}

impl BinaryEncode for LocalizedText {
    fn encode(&self, out: &mut BytesMut) {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= HAS_LOCALE;
        }
        if self.text.is_some() {
            mask |= HAS_TEXT;
        }
        out.put_u8(mask);
        if let Some(locale) = &self.locale {
            write_string(out, Some(locale));
        }
        if let Some(text) = &self.text {
            write_string(out, Some(text));
        }
    }
}

impl BinaryDecode for LocalizedText {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let mask = input.read_u8()?;
        if mask & !(HAS_LOCALE | HAS_TEXT) != 0 {
            return Err(CodecError::UnknownByte {
                field: "LocalizedText mask",
                value: mask,
            });
        }
        let locale = if mask & HAS_LOCALE != 0 {
            input.read_string()?
        } else {
            None
        };
        let text = if mask & HAS_TEXT != 0 {
            input.read_string()?
        } else {
            None
        };
        Ok(LocalizedText { locale, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: BinaryEncode + BinaryDecode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = value.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(T::decode(&mut reader).unwrap(), value);
        assert!(reader.is_empty());
    }

    #[test]
    fn byte_string_null_vs_empty() {
        round_trip(ByteString::NULL);
        round_trip(ByteString::new(Vec::new()));
        round_trip(ByteString::new(vec![1u8, 2, 3]));

        assert_ne!(
            ByteString::NULL.encode_to_vec(),
            ByteString::new(Vec::new()).encode_to_vec()
        );
        assert!(ByteString::NULL.is_empty());
        assert!(!ByteString::new(vec![0]).is_null());
    }

    #[test]
    fn qualified_name_round_trip() {
        round_trip(QualifiedName::new(0, "Server"));
        round_trip(QualifiedName {
            namespace: 7,
            name: None,
        });
    }

    #[test]
    fn localized_text_mask_subsets() {
        round_trip(LocalizedText::default());
        round_trip(LocalizedText::new("running"));
        round_trip(LocalizedText::with_locale("en-US", "running"));
        round_trip(LocalizedText {
            locale: Some("de".into()),
            text: None,
        });
    }

    #[test]
    fn localized_text_mask_layout() {
        let text_only = LocalizedText::new("x").encode_to_vec();
        assert_eq!(text_only[0], 0x02);
        let both = LocalizedText::with_locale("en", "x").encode_to_vec();
        assert_eq!(both[0], 0x03);
        assert_eq!(LocalizedText::default().encode_to_vec(), [0x00]);
    }

    #[test]
    fn localized_text_reserved_mask_bits_rejected() {
        let mut reader = BinaryReader::new(&[0x04]);
        assert!(matches!(
            LocalizedText::decode(&mut reader),
            Err(CodecError::UnknownByte { .. })
        ));
    }
}
