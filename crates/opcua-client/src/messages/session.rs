//! CreateSession, ActivateSession, CloseSession and the identity tokens.

use opcua_core::types::{
    ByteString, DiagnosticInfo, ExtensionObject, NodeId, RequestHeader, ResponseHeader, StatusCode,
};

use super::endpoints::{ApplicationDescription, EndpointDescription};
use super::{binary_struct, impl_service_request, impl_service_response};

pub const CREATE_SESSION_REQUEST_TYPE_ID: u32 = 461;
pub const CREATE_SESSION_RESPONSE_TYPE_ID: u32 = 464;
pub const ACTIVATE_SESSION_REQUEST_TYPE_ID: u32 = 467;
pub const ACTIVATE_SESSION_RESPONSE_TYPE_ID: u32 = 470;
pub const CLOSE_SESSION_REQUEST_TYPE_ID: u32 = 473;
pub const CLOSE_SESSION_RESPONSE_TYPE_ID: u32 = 476;

pub const ANONYMOUS_IDENTITY_TOKEN_TYPE_ID: u32 = 321;
pub const USER_NAME_IDENTITY_TOKEN_TYPE_ID: u32 = 324;
pub const X509_IDENTITY_TOKEN_TYPE_ID: u32 = 327;

binary_struct! {
    pub struct SignatureData {
        pub algorithm: Option<String>,
        pub signature: ByteString,
    }
}

impl SignatureData {
    pub const NULL: SignatureData = SignatureData {
        algorithm: None,
        signature: ByteString::NULL,
    };
}

binary_struct! {
    pub struct SignedSoftwareCertificate {
        pub certificate_data: ByteString,
        pub signature: ByteString,
    }
}

binary_struct! {
    pub struct CreateSessionRequest {
        pub request_header: RequestHeader,
        pub client_description: ApplicationDescription,
        pub server_uri: Option<String>,
        pub endpoint_url: Option<String>,
        pub session_name: Option<String>,
        pub client_nonce: ByteString,
        pub client_certificate: ByteString,
        /// Milliseconds.
        pub requested_session_timeout: f64,
        pub max_response_message_size: u32,
    }
}

impl_service_request!(CreateSessionRequest, CREATE_SESSION_REQUEST_TYPE_ID);

binary_struct! {
    pub struct CreateSessionResponse {
        pub response_header: ResponseHeader,
        pub session_id: NodeId,
        /// Stamped into every RequestHeader from here on.
        pub authentication_token: NodeId,
        pub revised_session_timeout: f64,
        pub server_nonce: ByteString,
        pub server_certificate: ByteString,
        pub server_endpoints: Option<Vec<EndpointDescription>>,
        pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        pub server_signature: SignatureData,
        pub max_request_message_size: u32,
    }
}

impl_service_response!(CreateSessionResponse, CREATE_SESSION_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct ActivateSessionRequest {
        pub request_header: RequestHeader,
        pub client_signature: SignatureData,
        pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        pub locale_ids: Option<Vec<Option<String>>>,
        /// One of the identity tokens below, wrapped by its type id.
        pub user_identity_token: ExtensionObject,
        pub user_token_signature: SignatureData,
    }
}

impl_service_request!(ActivateSessionRequest, ACTIVATE_SESSION_REQUEST_TYPE_ID);

binary_struct! {
    pub struct ActivateSessionResponse {
        pub response_header: ResponseHeader,
        pub server_nonce: ByteString,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(ActivateSessionResponse, ACTIVATE_SESSION_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct CloseSessionRequest {
        pub request_header: RequestHeader,
        pub delete_subscriptions: bool,
    }
}

impl_service_request!(CloseSessionRequest, CLOSE_SESSION_REQUEST_TYPE_ID);

binary_struct! {
    pub struct CloseSessionResponse {
        pub response_header: ResponseHeader,
    }
}

impl_service_response!(CloseSessionResponse, CLOSE_SESSION_RESPONSE_TYPE_ID);

// ── Identity tokens ───────────────────────────────────────────────────────────

binary_struct! {
    pub struct AnonymousIdentityToken {
        pub policy_id: Option<String>,
    }
}

binary_struct! {
    pub struct UserNameIdentityToken {
        pub policy_id: Option<String>,
        pub user_name: Option<String>,
        /// Plaintext password, or the RSA-encrypted `[len] ‖ pw ‖ nonce`
        /// block when the token policy demands encryption.
        pub password: ByteString,
        /// URI of the algorithm that encrypted `password`; null when plain.
        pub encryption_algorithm: Option<String>,
    }
}

binary_struct! {
    pub struct X509IdentityToken {
        pub policy_id: Option<String>,
        pub certificate_data: ByteString,
    }
}

impl AnonymousIdentityToken {
    pub fn wrap(&self) -> ExtensionObject {
        ExtensionObject::from_encodable(ANONYMOUS_IDENTITY_TOKEN_TYPE_ID, self)
    }
}

impl UserNameIdentityToken {
    pub fn wrap(&self) -> ExtensionObject {
        ExtensionObject::from_encodable(USER_NAME_IDENTITY_TOKEN_TYPE_ID, self)
    }
}

impl X509IdentityToken {
    pub fn wrap(&self) -> ExtensionObject {
        ExtensionObject::from_encodable(X509_IDENTITY_TOKEN_TYPE_ID, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};

    #[test]
    fn create_session_round_trips() {
        let request = CreateSessionRequest {
            request_header: RequestHeader::default(),
            client_description: ApplicationDescription::client("urn:client", "test client"),
            server_uri: None,
            endpoint_url: Some("opc.tcp://plant:4840".into()),
            session_name: Some("session-1".into()),
            client_nonce: ByteString::new(vec![1u8; 32]),
            client_certificate: ByteString::NULL,
            requested_session_timeout: 3_600_000.0,
            max_response_message_size: 0,
        };
        let bytes = request.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(CreateSessionRequest::decode(&mut reader).unwrap(), request);
        assert!(reader.is_empty());
    }

    #[test]
    fn activate_session_response_decodes_real_status_codes() {
        let response = ActivateSessionResponse {
            response_header: ResponseHeader::default(),
            server_nonce: ByteString::new(vec![2u8; 32]),
            results: Some(vec![StatusCode::GOOD, StatusCode::BAD_IDENTITY_TOKEN_REJECTED]),
            diagnostic_infos: None,
        };
        let bytes = response.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        let decoded = ActivateSessionResponse::decode(&mut reader).unwrap();
        assert_eq!(
            decoded.results.as_deref().unwrap()[1],
            StatusCode::BAD_IDENTITY_TOKEN_REJECTED
        );
    }

    #[test]
    fn identity_tokens_wrap_under_their_type_ids() {
        let anonymous = AnonymousIdentityToken {
            policy_id: Some("anonymous".into()),
        };
        assert_eq!(
            anonymous.wrap().type_id,
            NodeId::numeric(0, ANONYMOUS_IDENTITY_TOKEN_TYPE_ID)
        );

        let user = UserNameIdentityToken {
            policy_id: Some("username".into()),
            user_name: Some("operator".into()),
            password: ByteString::new(b"secret".to_vec()),
            encryption_algorithm: None,
        };
        let wrapped = user.wrap();
        assert_eq!(
            wrapped.type_id,
            NodeId::numeric(0, USER_NAME_IDENTITY_TOKEN_TYPE_ID)
        );
        let unwrapped: UserNameIdentityToken = wrapped.decode_inner().unwrap();
        assert_eq!(unwrapped, user);

        let x509 = X509IdentityToken {
            policy_id: Some("certificate".into()),
            certificate_data: ByteString::new(vec![0x30, 0x82]),
        };
        assert_eq!(
            x509.wrap().type_id,
            NodeId::numeric(0, X509_IDENTITY_TOKEN_TYPE_ID)
        );
    }
}
