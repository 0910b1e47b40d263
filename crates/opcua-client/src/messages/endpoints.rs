//! GetEndpoints and the endpoint description model.

use opcua_core::crypto::{MessageSecurityMode, SecurityPolicy};
use opcua_core::types::{ByteString, LocalizedText, RequestHeader, ResponseHeader};

use super::{binary_struct, impl_service_request, impl_service_response, wire_enum};

pub const GET_ENDPOINTS_REQUEST_TYPE_ID: u32 = 428;
pub const GET_ENDPOINTS_RESPONSE_TYPE_ID: u32 = 431;

wire_enum! {
    pub enum ApplicationType {
        Server = 0,
        Client = 1,
        ClientAndServer = 2,
        DiscoveryServer = 3,
    }
}

wire_enum! {
    pub enum UserTokenType {
        Anonymous = 0,
        UserName = 1,
        Certificate = 2,
        IssuedToken = 3,
    }
}

binary_struct! {
    pub struct ApplicationDescription {
        pub application_uri: Option<String>,
        pub product_uri: Option<String>,
        pub application_name: LocalizedText,
        pub application_type: ApplicationType,
        pub gateway_server_uri: Option<String>,
        pub discovery_profile_uri: Option<String>,
        pub discovery_urls: Option<Vec<Option<String>>>,
    }
}

impl ApplicationDescription {
    /// A client description with the given URI and display name.
    pub fn client(application_uri: impl Into<String>, name: impl Into<String>) -> Self {
        ApplicationDescription {
            application_uri: Some(application_uri.into()),
            product_uri: None,
            application_name: LocalizedText::new(name),
            application_type: ApplicationType::Client,
            gateway_server_uri: None,
            discovery_profile_uri: None,
            discovery_urls: None,
        }
    }
}

binary_struct! {
    /// One way a user may authenticate against an endpoint.
    pub struct UserTokenPolicy {
        pub policy_id: Option<String>,
        pub token_type: UserTokenType,
        pub issued_token_type: Option<String>,
        pub issuer_endpoint_url: Option<String>,
        /// Sub-policy for encrypting the token; empty means the endpoint's
        /// own policy applies.
        pub security_policy_uri: Option<String>,
    }
}

impl UserTokenPolicy {
    /// The effective policy used to protect the token secret.
    pub fn effective_policy(&self, endpoint_policy: SecurityPolicy) -> SecurityPolicy {
        match self.security_policy_uri.as_deref() {
            None | Some("") => endpoint_policy,
            Some(uri) => SecurityPolicy::from_uri(uri).unwrap_or(endpoint_policy),
        }
    }
}

binary_struct! {
    pub struct EndpointDescription {
        pub endpoint_url: Option<String>,
        pub server: ApplicationDescription,
        pub server_certificate: ByteString,
        pub security_mode: MessageSecurityMode,
        pub security_policy_uri: Option<String>,
        pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
        pub transport_profile_uri: Option<String>,
        /// Server-relative ranking; higher is more secure.
        pub security_level: u8,
    }
}

impl EndpointDescription {
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        SecurityPolicy::from_uri(self.security_policy_uri.as_deref()?).ok()
    }

    pub fn user_identity_tokens(&self) -> &[UserTokenPolicy] {
        self.user_identity_tokens.as_deref().unwrap_or_default()
    }
}

binary_struct! {
    pub struct GetEndpointsRequest {
        pub request_header: RequestHeader,
        pub endpoint_url: Option<String>,
        pub locale_ids: Option<Vec<Option<String>>>,
        pub profile_uris: Option<Vec<Option<String>>>,
    }
}

impl_service_request!(GetEndpointsRequest, GET_ENDPOINTS_REQUEST_TYPE_ID);

binary_struct! {
    pub struct GetEndpointsResponse {
        pub response_header: ResponseHeader,
        pub endpoints: Option<Vec<EndpointDescription>>,
    }
}

impl_service_response!(GetEndpointsResponse, GET_ENDPOINTS_RESPONSE_TYPE_ID);

/// Pick the endpoint best matching the requested security settings:
/// exact match, then mode match, then policy match, then the first offered.
pub fn select_endpoint<'a>(
    endpoints: &'a [EndpointDescription],
    mode: MessageSecurityMode,
    policy: SecurityPolicy,
) -> Option<&'a EndpointDescription> {
    if endpoints.is_empty() {
        return None;
    }
    endpoints
        .iter()
        .find(|e| e.security_mode == mode && e.security_policy() == Some(policy))
        .or_else(|| endpoints.iter().find(|e| e.security_mode == mode))
        .or_else(|| endpoints.iter().find(|e| e.security_policy() == Some(policy)))
        .or_else(|| endpoints.first())
}

/// Builders shared by tests in other modules.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    pub fn endpoint_with_tokens(
        policy_uri: &str,
        tokens: Vec<UserTokenPolicy>,
    ) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: Some("opc.tcp://internal-host:4840/base".into()),
            server: ApplicationDescription::client("urn:test:server", "srv"),
            server_certificate: ByteString::NULL,
            security_mode: MessageSecurityMode::None,
            security_policy_uri: Some(policy_uri.into()),
            user_identity_tokens: Some(tokens),
            transport_profile_uri: None,
            security_level: 0,
        }
    }
}
