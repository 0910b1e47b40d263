//! StatusCode — the 32-bit result code attached to every service and item.
//!
//! The top two bits carry the severity: 00 good, 01 uncertain, 10/11 bad.
//! Only the well-known codes the client itself reacts to are named here;
//! anything else still round-trips as a raw value.

use bytes::{BufMut, BytesMut};

use crate::codec::{BinaryDecode, BinaryEncode, BinaryReader, CodecError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const fn severity(self) -> u32 {
        self.0 >> 30
    }

    pub const fn is_good(self) -> bool {
        self.severity() == 0
    }

    pub const fn is_uncertain(self) -> bool {
        self.severity() == 1
    }

    pub const fn is_bad(self) -> bool {
        self.severity() >= 2
    }
}

macro_rules! status_codes {
    ($($name:ident = $value:literal;)*) => {
        impl StatusCode {
            $(pub const $name: StatusCode = StatusCode($value);)*

            /// Symbolic name for a well-known code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    GOOD                                = 0x0000_0000;
    BAD_UNEXPECTED_ERROR                = 0x8001_0000;
    BAD_INTERNAL_ERROR                  = 0x8002_0000;
    BAD_OUT_OF_MEMORY                   = 0x8003_0000;
    BAD_RESOURCE_UNAVAILABLE            = 0x8004_0000;
    BAD_COMMUNICATION_ERROR             = 0x8005_0000;
    BAD_ENCODING_ERROR                  = 0x8006_0000;
    BAD_DECODING_ERROR                  = 0x8007_0000;
    BAD_ENCODING_LIMITS_EXCEEDED        = 0x8008_0000;
    BAD_UNKNOWN_RESPONSE                = 0x8009_0000;
    BAD_TIMEOUT                         = 0x800A_0000;
    BAD_SERVICE_UNSUPPORTED             = 0x800B_0000;
    BAD_SHUTDOWN                        = 0x800C_0000;
    BAD_SERVER_NOT_CONNECTED            = 0x800D_0000;
    BAD_SERVER_HALTED                   = 0x800E_0000;
    BAD_NOTHING_TO_DO                   = 0x800F_0000;
    BAD_TOO_MANY_OPERATIONS             = 0x8010_0000;
    BAD_CERTIFICATE_INVALID             = 0x8012_0000;
    BAD_SECURITY_CHECKS_FAILED          = 0x8013_0000;
    BAD_CERTIFICATE_TIME_INVALID        = 0x8014_0000;
    BAD_CERTIFICATE_ISSUER_TIME_INVALID = 0x8015_0000;
    BAD_CERTIFICATE_HOST_NAME_INVALID   = 0x8016_0000;
    BAD_CERTIFICATE_URI_INVALID         = 0x8017_0000;
    BAD_CERTIFICATE_USE_NOT_ALLOWED     = 0x8018_0000;
    BAD_CERTIFICATE_UNTRUSTED           = 0x801A_0000;
    BAD_CERTIFICATE_REVOCATION_UNKNOWN  = 0x801B_0000;
    BAD_CERTIFICATE_REVOKED             = 0x801D_0000;
    BAD_USER_ACCESS_DENIED              = 0x801F_0000;
    BAD_IDENTITY_TOKEN_INVALID          = 0x8020_0000;
    BAD_IDENTITY_TOKEN_REJECTED         = 0x8021_0000;
    BAD_SECURE_CHANNEL_ID_INVALID       = 0x8022_0000;
    BAD_INVALID_TIMESTAMP               = 0x8023_0000;
    BAD_NONCE_INVALID                   = 0x8024_0000;
    BAD_SESSION_ID_INVALID              = 0x8025_0000;
    BAD_SESSION_CLOSED                  = 0x8026_0000;
    BAD_SESSION_NOT_ACTIVATED           = 0x8027_0000;
    BAD_SUBSCRIPTION_ID_INVALID         = 0x8028_0000;
    BAD_REQUEST_HEADER_INVALID          = 0x802A_0000;
    BAD_TIMESTAMPS_TO_RETURN_INVALID    = 0x802B_0000;
    BAD_REQUEST_CANCELLED_BY_CLIENT     = 0x802C_0000;
    BAD_NO_COMMUNICATION                = 0x8031_0000;
    BAD_WAITING_FOR_INITIAL_DATA        = 0x8032_0000;
    BAD_NODE_ID_INVALID                 = 0x8033_0000;
    BAD_NODE_ID_UNKNOWN                 = 0x8034_0000;
    BAD_ATTRIBUTE_ID_INVALID            = 0x8035_0000;
    BAD_INDEX_RANGE_INVALID             = 0x8036_0000;
    BAD_INDEX_RANGE_NO_DATA             = 0x8037_0000;
    BAD_DATA_ENCODING_INVALID           = 0x8038_0000;
    BAD_DATA_ENCODING_UNSUPPORTED       = 0x8039_0000;
    BAD_NOT_READABLE                    = 0x803A_0000;
    BAD_NOT_WRITABLE                    = 0x803B_0000;
    BAD_OUT_OF_RANGE                    = 0x803C_0000;
    BAD_NOT_SUPPORTED                   = 0x803D_0000;
    BAD_NOT_FOUND                       = 0x803E_0000;
    BAD_CONTINUATION_POINT_INVALID      = 0x8040_0000;
    BAD_NO_CONTINUATION_POINTS          = 0x8041_0000;
    BAD_REFERENCE_TYPE_ID_INVALID       = 0x8042_0000;
    BAD_BROWSE_DIRECTION_INVALID        = 0x8043_0000;
    BAD_NODE_NOT_IN_VIEW                = 0x8044_0000;
    BAD_BROWSE_NAME_INVALID             = 0x8060_0000;
    BAD_MESSAGE_NOT_AVAILABLE           = 0x806B_0000;
    BAD_TOO_MANY_PUBLISH_REQUESTS       = 0x806D_0000;
    BAD_NO_SUBSCRIPTION                 = 0x806E_0000;
    BAD_SEQUENCE_NUMBER_UNKNOWN         = 0x807A_0000;
    BAD_TCP_SERVER_TOO_BUSY             = 0x807D_0000;
    BAD_TCP_MESSAGE_TYPE_INVALID        = 0x807E_0000;
    BAD_TCP_SECURE_CHANNEL_UNKNOWN      = 0x807F_0000;
    BAD_TCP_MESSAGE_TOO_LARGE           = 0x8080_0000;
    BAD_TCP_NOT_ENOUGH_RESOURCES        = 0x8081_0000;
    BAD_TCP_INTERNAL_ERROR              = 0x8082_0000;
    BAD_TCP_ENDPOINT_URL_INVALID        = 0x8083_0000;
    BAD_REQUEST_INTERRUPTED             = 0x8084_0000;
    BAD_REQUEST_TIMEOUT                 = 0x8085_0000;
    BAD_SECURE_CHANNEL_CLOSED           = 0x8086_0000;
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN    = 0x8087_0000;
    BAD_SEQUENCE_NUMBER_INVALID         = 0x8088_0000;
    BAD_CONNECTION_REJECTED             = 0x80AC_0000;
    BAD_CONNECTION_CLOSED               = 0x80AE_0000;
    BAD_INVALID_STATE                   = 0x80AF_0000;
    BAD_END_OF_STREAM                   = 0x80B0_0000;
    BAD_REQUEST_TOO_LARGE               = 0x80B8_0000;
    BAD_RESPONSE_TOO_LARGE              = 0x80B9_0000;
    BAD_PROTOCOL_VERSION_UNSUPPORTED    = 0x80BE_0000;
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        StatusCode(value)
    }
}

impl BinaryEncode for StatusCode {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.0);
    }
}

impl BinaryDecode for StatusCode {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(StatusCode(input.read_u32()?))
    }
}
