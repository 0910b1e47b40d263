//! OpenSecureChannel and CloseSecureChannel.

use opcua_core::crypto::MessageSecurityMode;
use opcua_core::types::{ByteString, DateTime, RequestHeader, ResponseHeader};

use super::{binary_struct, impl_service_request, impl_service_response, wire_enum};

pub const OPEN_SECURE_CHANNEL_REQUEST_TYPE_ID: u32 = 446;
pub const OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID: u32 = 449;
pub const CLOSE_SECURE_CHANNEL_REQUEST_TYPE_ID: u32 = 452;
pub const CLOSE_SECURE_CHANNEL_RESPONSE_TYPE_ID: u32 = 455;

wire_enum! {
    pub enum SecurityTokenRequestType {
        Issue = 0,
        Renew = 1,
    }
}

binary_struct! {
    pub struct OpenSecureChannelRequest {
        pub request_header: RequestHeader,
        pub client_protocol_version: u32,
        pub request_type: SecurityTokenRequestType,
        pub security_mode: MessageSecurityMode,
        pub client_nonce: ByteString,
        /// Requested token lifetime, milliseconds.
        pub requested_lifetime: u32,
    }
}

impl_service_request!(OpenSecureChannelRequest, OPEN_SECURE_CHANNEL_REQUEST_TYPE_ID);

binary_struct! {
    /// The token naming the keys now in force.
    pub struct ChannelSecurityToken {
        pub channel_id: u32,
        pub token_id: u32,
        pub created_at: DateTime,
        /// Milliseconds; renewal is due well before this expires.
        pub revised_lifetime: u32,
    }
}

binary_struct! {
    pub struct OpenSecureChannelResponse {
        pub response_header: ResponseHeader,
        pub server_protocol_version: u32,
        pub security_token: ChannelSecurityToken,
        pub server_nonce: ByteString,
    }
}

impl_service_response!(OpenSecureChannelResponse, OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct CloseSecureChannelRequest {
        pub request_header: RequestHeader,
    }
}

impl_service_request!(CloseSecureChannelRequest, CLOSE_SECURE_CHANNEL_REQUEST_TYPE_ID);

binary_struct! {
    pub struct CloseSecureChannelResponse {
        pub response_header: ResponseHeader,
    }
}

impl_service_response!(CloseSecureChannelResponse, CLOSE_SECURE_CHANNEL_RESPONSE_TYPE_ID);

#[cfg(test)]
mod tests {
    use super::*;
    use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};

    #[test]
    fn open_request_round_trips() {
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::default(),
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::SignAndEncrypt,
            client_nonce: ByteString::new(vec![7u8; 32]),
            requested_lifetime: 3_600_000,
        };
        let bytes = request.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(
            OpenSecureChannelRequest::decode(&mut reader).unwrap(),
            request
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn open_response_round_trips() {
        let response = OpenSecureChannelResponse {
            response_header: ResponseHeader::default(),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 1771,
                token_id: 1,
                created_at: DateTime::from_unix_timestamp(1_700_000_000),
                revised_lifetime: 600_000,
            },
            server_nonce: ByteString::new(vec![9u8; 32]),
        };
        let bytes = response.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(
            OpenSecureChannelResponse::decode(&mut reader).unwrap(),
            response
        );
    }

    #[test]
    fn request_type_values() {
        assert_eq!(SecurityTokenRequestType::Issue as u32, 0);
        assert_eq!(SecurityTokenRequestType::Renew as u32, 1);
    }
}
