//! Variant — the self-describing value carried by DataValue and method
//! arguments.
//!
//! Wire form: one type byte (low six bits: built-in type id, bit 7: array,
//! bit 6: array dimensions follow), then the value body or the
//! length-prefixed element bodies, then the optional dimensions vector.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use super::{
    ByteString, DataValue, DateTime, DiagnosticInfo, ExpandedNodeId, ExtensionObject,
    LocalizedText, NodeId, QualifiedName, StatusCode,
};
use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};

const ARRAY_BIT: u8 = 0x80;
const DIMENSIONS_BIT: u8 = 0x40;
const TYPE_MASK: u8 = 0x3f;

/// Built-in type ids as they appear in the variant type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantType {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl VariantType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Boolean,
            2 => Self::SByte,
            3 => Self::Byte,
            4 => Self::Int16,
            5 => Self::UInt16,
            6 => Self::Int32,
            7 => Self::UInt32,
            8 => Self::Int64,
            9 => Self::UInt64,
            10 => Self::Float,
            11 => Self::Double,
            12 => Self::String,
            13 => Self::DateTime,
            14 => Self::Guid,
            15 => Self::ByteString,
            16 => Self::XmlElement,
            17 => Self::NodeId,
            18 => Self::ExpandedNodeId,
            19 => Self::StatusCode,
            20 => Self::QualifiedName,
            21 => Self::LocalizedText,
            22 => Self::ExtensionObject,
            23 => Self::DataValue,
            24 => Self::Variant,
            25 => Self::DiagnosticInfo,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    DateTime(DateTime),
    Guid(Uuid),
    ByteString(ByteString),
    XmlElement(Option<String>),
    NodeId(NodeId),
    ExpandedNodeId(ExpandedNodeId),
    StatusCode(StatusCode),
    QualifiedName(QualifiedName),
    LocalizedText(LocalizedText),
    ExtensionObject(ExtensionObject),
    DataValue(Box<DataValue>),
    DiagnosticInfo(Box<DiagnosticInfo>),
    Array(Box<VariantArray>),
}

/// A single- or multi-dimensional array of one built-in type.
///
/// Every element must be a scalar of `element_type` (or any variant when the
/// element type is [`VariantType::Variant`]). Multi-dimensional arrays store
/// values flattened in row-major order with the dimension sizes alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    pub element_type: VariantType,
    pub values: Vec<Variant>,
    pub dimensions: Option<Vec<u32>>,
}

impl VariantArray {
    pub fn new(element_type: VariantType, values: Vec<Variant>) -> Self {
        VariantArray {
            element_type,
            values,
            dimensions: None,
        }
    }
}

impl Variant {
    /// The built-in type id for a scalar value; `None` for Empty and arrays.
    pub fn scalar_type(&self) -> Option<VariantType> {
        Some(match self {
            Variant::Empty | Variant::Array(_) => return None,
            Variant::Boolean(_) => VariantType::Boolean,
            Variant::SByte(_) => VariantType::SByte,
            Variant::Byte(_) => VariantType::Byte,
            Variant::Int16(_) => VariantType::Int16,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::String(_) => VariantType::String,
            Variant::DateTime(_) => VariantType::DateTime,
            Variant::Guid(_) => VariantType::Guid,
            Variant::ByteString(_) => VariantType::ByteString,
            Variant::XmlElement(_) => VariantType::XmlElement,
            Variant::NodeId(_) => VariantType::NodeId,
            Variant::ExpandedNodeId(_) => VariantType::ExpandedNodeId,
            Variant::StatusCode(_) => VariantType::StatusCode,
            Variant::QualifiedName(_) => VariantType::QualifiedName,
            Variant::LocalizedText(_) => VariantType::LocalizedText,
            Variant::ExtensionObject(_) => VariantType::ExtensionObject,
            Variant::DataValue(_) => VariantType::DataValue,
            Variant::DiagnosticInfo(_) => VariantType::DiagnosticInfo,
        })
    }

    fn encode_body(&self, out: &mut BytesMut) {
        match self {
            Variant::Empty | Variant::Array(_) => unreachable!("not a scalar"),
            Variant::Boolean(v) => v.encode(out),
            Variant::SByte(v) => v.encode(out),
            Variant::Byte(v) => v.encode(out),
            Variant::Int16(v) => v.encode(out),
            Variant::UInt16(v) => v.encode(out),
            Variant::Int32(v) => v.encode(out),
            Variant::UInt32(v) => v.encode(out),
            Variant::Int64(v) => v.encode(out),
            Variant::UInt64(v) => v.encode(out),
            Variant::Float(v) => v.encode(out),
            Variant::Double(v) => v.encode(out),
            Variant::String(v) => v.encode(out),
            Variant::DateTime(v) => v.encode(out),
            Variant::Guid(v) => v.encode(out),
            Variant::ByteString(v) => v.encode(out),
            Variant::XmlElement(v) => v.encode(out),
            Variant::NodeId(v) => v.encode(out),
            Variant::ExpandedNodeId(v) => v.encode(out),
            Variant::StatusCode(v) => v.encode(out),
            Variant::QualifiedName(v) => v.encode(out),
            Variant::LocalizedText(v) => v.encode(out),
            Variant::ExtensionObject(v) => v.encode(out),
            Variant::DataValue(v) => v.encode(out),
            Variant::DiagnosticInfo(v) => v.encode(out),
        }
    }

    fn decode_body(
        element_type: VariantType,
        input: &mut BinaryReader<'_>,
    ) -> Result<Variant, CodecError> {
        Ok(match element_type {
            VariantType::Boolean => Variant::Boolean(bool::decode(input)?),
            VariantType::SByte => Variant::SByte(i8::decode(input)?),
            VariantType::Byte => Variant::Byte(u8::decode(input)?),
            VariantType::Int16 => Variant::Int16(i16::decode(input)?),
            VariantType::UInt16 => Variant::UInt16(u16::decode(input)?),
            VariantType::Int32 => Variant::Int32(i32::decode(input)?),
            VariantType::UInt32 => Variant::UInt32(u32::decode(input)?),
            VariantType::Int64 => Variant::Int64(i64::decode(input)?),
            VariantType::UInt64 => Variant::UInt64(u64::decode(input)?),
            VariantType::Float => Variant::Float(f32::decode(input)?),
            VariantType::Double => Variant::Double(f64::decode(input)?),
            VariantType::String => Variant::String(input.read_string()?),
            VariantType::DateTime => Variant::DateTime(DateTime::decode(input)?),
            VariantType::Guid => Variant::Guid(Uuid::decode(input)?),
            VariantType::ByteString => Variant::ByteString(ByteString::decode(input)?),
            VariantType::XmlElement => Variant::XmlElement(input.read_string()?),
            VariantType::NodeId => Variant::NodeId(NodeId::decode(input)?),
            VariantType::ExpandedNodeId => Variant::ExpandedNodeId(ExpandedNodeId::decode(input)?),
            VariantType::StatusCode => Variant::StatusCode(StatusCode::decode(input)?),
            VariantType::QualifiedName => Variant::QualifiedName(QualifiedName::decode(input)?),
            VariantType::LocalizedText => Variant::LocalizedText(LocalizedText::decode(input)?),
            VariantType::ExtensionObject => {
                Variant::ExtensionObject(ExtensionObject::decode(input)?)
            }
            VariantType::DataValue => Variant::DataValue(Box::new(DataValue::decode(input)?)),
            VariantType::Variant => Variant::decode(input)?,
            VariantType::DiagnosticInfo => {
                Variant::DiagnosticInfo(Box::new(DiagnosticInfo::decode(input)?))
            }
        })
    }
}

impl BinaryEncode for Variant {
    fn encode(&self, out: &mut BytesMut) {
        match self {
            Variant::Empty => out.put_u8(0),
            Variant::Array(array) => {
                let mut type_byte = array.element_type as u8 | ARRAY_BIT;
                if array.dimensions.is_some() {
                    type_byte |= DIMENSIONS_BIT;
                }
                out.put_u8(type_byte);
                out.put_i32_le(array.values.len() as i32);
                for value in &array.values {
                    if array.element_type == VariantType::Variant {
                        value.encode(out);
                    } else {
                        debug_assert_eq!(value.scalar_type(), Some(array.element_type));
                        value.encode_body(out);
                    }
                }
                if let Some(dims) = &array.dimensions {
                    out.put_i32_le(dims.len() as i32);
                    for dim in dims {
                        out.put_i32_le(*dim as i32);
                    }
                }
            }
            scalar => {
                out.put_u8(scalar.scalar_type().expect("scalar") as u8);
                scalar.encode_body(out);
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        let type_byte = input.read_u8()?;
        if type_byte == 0 {
            return Ok(Variant::Empty);
        }
        let element_type =
            VariantType::from_u8(type_byte & TYPE_MASK).ok_or(CodecError::UnknownByte {
                field: "Variant type",
                value: type_byte,
            })?;

        input.enter_nested()?;
        let result = (|| {
            if type_byte & ARRAY_BIT == 0 {
                if type_byte & DIMENSIONS_BIT != 0 {
                    // Dimensions without the array bit is malformed.
                    return Err(CodecError::UnknownByte {
                        field: "Variant type",
                        value: type_byte,
                    });
                }
                return Variant::decode_body(element_type, input);
            }

            let len = input.read_length()?.unwrap_or(0);
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(Variant::decode_body(element_type, input)?);
            }
            let dimensions = if type_byte & DIMENSIONS_BIT != 0 {
                let count = input.read_length()?.unwrap_or(0);
                let mut dims = Vec::with_capacity(count);
                for _ in 0..count {
                    let dim = input.read_i32()?;
                    if dim < 0 {
                        return Err(CodecError::BadLength(dim));
                    }
                    dims.push(dim as u32);
                }
                Some(dims)
            } else {
                None
            };
            Ok(Variant::Array(Box::new(VariantArray {
                element_type,
                values,
                dimensions,
            })))
        })();
        input.leave_nested();
        result
    }
}

macro_rules! impl_variant_from {
    ($($ty:ty => $name:ident;)*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$name(value)
                }
            }
        )*
    };
}

impl_variant_from! {
    bool => Boolean;
    i8 => SByte;
    u8 => Byte;
    i16 => Int16;
    u16 => UInt16;
    i32 => Int32;
    u32 => UInt32;
    i64 => Int64;
    u64 => UInt64;
    f32 => Float;
    f64 => Double;
    DateTime => DateTime;
    NodeId => NodeId;
    StatusCode => StatusCode;
    LocalizedText => LocalizedText;
    QualifiedName => QualifiedName;
    ByteString => ByteString;
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(Some(value.to_string()))
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: Variant) -> Vec<u8> {
        let bytes = value.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(Variant::decode(&mut reader).unwrap(), value);
        assert!(reader.is_empty(), "decoder left trailing bytes");
        bytes
    }

    #[test]
    fn empty_is_a_single_zero_byte() {
        assert_eq!(round_trip(Variant::Empty), [0x00]);
    }

    #[test]
    fn every_scalar_round_trips() {
        round_trip(Variant::Boolean(true));
        round_trip(Variant::SByte(-1));
        round_trip(Variant::Byte(200));
        round_trip(Variant::Int16(-30_000));
        round_trip(Variant::UInt16(60_000));
        round_trip(Variant::Int32(-7));
        round_trip(Variant::UInt32(4_000_000_000));
        round_trip(Variant::Int64(i64::MIN));
        round_trip(Variant::UInt64(u64::MAX));
        round_trip(Variant::Float(3.5));
        round_trip(Variant::Double(-0.125));
        round_trip(Variant::String(None));
        round_trip(Variant::String(Some("räksmörgås".into())));
        round_trip(Variant::DateTime(DateTime::from_unix_timestamp(1_600_000_000)));
        round_trip(Variant::Guid(Uuid::from_u128(42)));
        round_trip(Variant::ByteString(ByteString::new(vec![9, 8, 7])));
        round_trip(Variant::XmlElement(Some("<a/>".into())));
        round_trip(Variant::NodeId(NodeId::string(3, "valve")));
        round_trip(Variant::ExpandedNodeId(NodeId::numeric(0, 85).into()));
        round_trip(Variant::StatusCode(StatusCode::BAD_NODE_ID_UNKNOWN));
        round_trip(Variant::QualifiedName(QualifiedName::new(1, "Speed")));
        round_trip(Variant::LocalizedText(LocalizedText::new("ok")));
        round_trip(Variant::DiagnosticInfo(Box::new(DiagnosticInfo::default())));
    }

    #[test]
    fn int32_array_layout() {
        let array = Variant::Array(Box::new(VariantArray::new(
            VariantType::Int32,
            vec![Variant::Int32(1), Variant::Int32(2)],
        )));
        let bytes = round_trip(array);
        assert_eq!(bytes[0], 0x86); // array bit | Int32
        assert_eq!(&bytes[1..5], &2i32.to_le_bytes());
    }

    #[test]
    fn empty_array_round_trips() {
        round_trip(Variant::Array(Box::new(VariantArray::new(
            VariantType::Double,
            vec![],
        ))));
    }

    #[test]
    fn dimensioned_array_round_trips() {
        let values = (0..6).map(Variant::Int16).collect();
        let array = Variant::Array(Box::new(VariantArray {
            element_type: VariantType::Int16,
            values,
            dimensions: Some(vec![2, 3]),
        }));
        let bytes = round_trip(array);
        assert_eq!(bytes[0], 0x84 | DIMENSIONS_BIT);
    }

    #[test]
    fn array_of_variants_round_trips() {
        let array = Variant::Array(Box::new(VariantArray::new(
            VariantType::Variant,
            vec![Variant::Boolean(true), Variant::String(Some("mixed".into()))],
        )));
        round_trip(array);
    }

    #[test]
    fn array_of_strings_with_null_entry() {
        let array = Variant::Array(Box::new(VariantArray::new(
            VariantType::String,
            vec![Variant::String(Some("a".into())), Variant::String(None)],
        )));
        round_trip(array);
    }

    #[test]
    fn unknown_type_id_is_rejected() {
        let mut reader = BinaryReader::new(&[26]);
        assert!(matches!(
            Variant::decode(&mut reader),
            Err(CodecError::UnknownByte { .. })
        ));
    }

    #[test]
    fn dimensions_without_array_bit_is_rejected() {
        let mut reader = BinaryReader::new(&[DIMENSIONS_BIT | 1, 1]);
        assert!(matches!(
            Variant::decode(&mut reader),
            Err(CodecError::UnknownByte { .. })
        ));
    }

    #[test]
    fn from_conversions() {
        assert_eq!(Variant::from(5i32), Variant::Int32(5));
        assert_eq!(Variant::from("x"), Variant::String(Some("x".into())));
    }
}
