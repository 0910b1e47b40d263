//! Typed service messages.
//!
//! Every request/response pair is a plain struct with the codec derived by
//! [`binary_struct!`]; the type id that names it on the wire comes from the
//! [`ServiceRequest`]/[`ServiceResponse`] impls. The dispatcher is generic
//! over the pair and never inspects bodies.

use bytes::BytesMut;
use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};
use opcua_core::types::{NodeId, RequestHeader, ResponseHeader};

// ── Codec macros ──────────────────────────────────────────────────────────────

/// A struct whose wire form is its fields encoded in order.
macro_rules! binary_struct {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                pub $field:ident : $ty:ty,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $ty,
            )*
        }

        impl opcua_core::codec::BinaryEncode for $name {
            fn encode(&self, out: &mut bytes::BytesMut) {
                $(self.$field.encode(out);)*
            }
        }

        impl opcua_core::codec::BinaryDecode for $name {
            fn decode(
                input: &mut opcua_core::codec::BinaryReader<'_>,
            ) -> Result<Self, opcua_core::codec::CodecError> {
                Ok(Self {
                    $($field: <$ty as opcua_core::codec::BinaryDecode>::decode(input)?,)*
                })
            }
        }
    };
}

/// An Int32-valued enumeration.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant = $value,
            )*
        }

        impl $name {
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl opcua_core::codec::BinaryEncode for $name {
            fn encode(&self, out: &mut bytes::BytesMut) {
                use bytes::BufMut;
                out.put_u32_le(*self as u32);
            }
        }

        impl opcua_core::codec::BinaryDecode for $name {
            fn decode(
                input: &mut opcua_core::codec::BinaryReader<'_>,
            ) -> Result<Self, opcua_core::codec::CodecError> {
                let value = input.read_u32()?;
                Self::from_u32(value).ok_or(opcua_core::codec::CodecError::OutOfRange {
                    field: stringify!($name),
                })
            }
        }
    };
}

macro_rules! impl_service_request {
    ($name:ident, $type_id:expr) => {
        impl $crate::messages::ServiceRequest for $name {
            const TYPE_ID: u32 = $type_id;

            fn request_header(&self) -> &opcua_core::types::RequestHeader {
                &self.request_header
            }
        }
    };
}

macro_rules! impl_service_response {
    ($name:ident, $type_id:expr) => {
        impl $crate::messages::ServiceResponse for $name {
            const TYPE_ID: u32 = $type_id;

            fn response_header(&self) -> &opcua_core::types::ResponseHeader {
                &self.response_header
            }
        }
    };
}

pub(crate) use {binary_struct, impl_service_request, impl_service_response, wire_enum};

pub mod attributes;
pub mod endpoints;
pub mod secure_channel;
pub mod session;
pub mod subscription;

// ── Service traits ────────────────────────────────────────────────────────────

/// A message the client sends. `TYPE_ID` is the namespace-0 numeric id of the
/// binary encoding.
pub trait ServiceRequest: BinaryEncode + Send {
    const TYPE_ID: u32;

    fn request_header(&self) -> &RequestHeader;
}

/// A message the client expects back.
pub trait ServiceResponse: BinaryDecode + Send {
    const TYPE_ID: u32;

    fn response_header(&self) -> &ResponseHeader;
}

/// Encode `TypeId ‖ body` the way every secured payload carries it.
pub fn encode_message<R: ServiceRequest>(request: &R) -> BytesMut {
    let mut out = BytesMut::new();
    NodeId::numeric(0, R::TYPE_ID).encode(&mut out);
    request.encode(&mut out);
    out
}

/// Split a received payload into its leading type id and the body reader.
pub fn decode_type_id<'a>(payload: &'a [u8]) -> Result<(u32, BinaryReader<'a>), CodecError> {
    let mut reader = BinaryReader::new(payload);
    let type_id = NodeId::decode(&mut reader)?;
    let type_id = type_id.as_type_id().ok_or(CodecError::OutOfRange {
        field: "message type id",
    })?;
    Ok((type_id, reader))
}

// ── ServiceFault ──────────────────────────────────────────────────────────────

pub const SERVICE_FAULT_TYPE_ID: u32 = 397;

binary_struct! {
    /// Envelope-level failure; the interesting part is the header's
    /// serviceResult.
    pub struct ServiceFault {
        pub response_header: ResponseHeader,
    }
}

impl_service_response!(ServiceFault, SERVICE_FAULT_TYPE_ID);

// ── Shared enumerations ───────────────────────────────────────────────────────

wire_enum! {
    pub enum TimestampsToReturn {
        Source = 0,
        Server = 1,
        Both = 2,
        Neither = 3,
    }
}

wire_enum! {
    pub enum MonitoringMode {
        Disabled = 0,
        Sampling = 1,
        Reporting = 2,
    }
}

wire_enum! {
    pub enum BrowseDirection {
        Forward = 0,
        Inverse = 1,
        Both = 2,
    }
}

/// Well-known attribute ids.
pub mod attribute_id {
    pub const NODE_ID: u32 = 1;
    pub const NODE_CLASS: u32 = 2;
    pub const BROWSE_NAME: u32 = 3;
    pub const DISPLAY_NAME: u32 = 4;
    pub const DESCRIPTION: u32 = 5;
    pub const VALUE: u32 = 13;
    pub const DATA_TYPE: u32 = 14;
    pub const ACCESS_LEVEL: u32 = 17;
}

/// NodeClass bits as used in browse masks and reference descriptions.
pub mod node_class {
    pub const OBJECT: u32 = 1;
    pub const VARIABLE: u32 = 2;
    pub const METHOD: u32 = 4;
    pub const OBJECT_TYPE: u32 = 8;
    pub const VARIABLE_TYPE: u32 = 16;
    pub const REFERENCE_TYPE: u32 = 32;
    pub const DATA_TYPE: u32 = 64;
    pub const VIEW: u32 = 128;
}
