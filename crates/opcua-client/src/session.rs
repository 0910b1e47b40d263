//! Session lifecycle: CreateSession, ActivateSession with an identity token,
//! CloseSession. A created-but-not-activated session refuses every other
//! service; once activated, the authentication token is stamped into each
//! request header.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use bytes::BufMut;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use sha2::Sha256;

use opcua_core::crypto::cert::{ApplicationIdentity, Certificate};
use opcua_core::crypto::{encrypt_secret, SecurityPolicy};
use opcua_core::types::{ByteString, NodeId, RequestHeader};

use crate::config::ClientConfig;
use crate::dispatcher::ServiceDispatcher;
use crate::error::{Error, Result};
use crate::messages::endpoints::{
    ApplicationDescription, EndpointDescription, UserTokenPolicy, UserTokenType,
};
use crate::messages::session::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken, CloseSessionRequest,
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, SignatureData,
    UserNameIdentityToken, X509IdentityToken,
};

const RSA_OAEP_URI: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep";
const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";

/// Length of the nonce sent in CreateSession.
const SESSION_NONCE_LENGTH: usize = 32;

// ── Identity ──────────────────────────────────────────────────────────────────

/// How the session authenticates its user.
#[derive(Clone)]
pub enum UserIdentity {
    Anonymous,
    UserName { user: String, password: String },
    X509(ApplicationIdentity),
}

impl UserIdentity {
    fn token_type(&self) -> UserTokenType {
        match self {
            UserIdentity::Anonymous => UserTokenType::Anonymous,
            UserIdentity::UserName { .. } => UserTokenType::UserName,
            UserIdentity::X509(_) => UserTokenType::Certificate,
        }
    }
}

impl std::fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserIdentity::Anonymous => write!(f, "Anonymous"),
            UserIdentity::UserName { user, .. } => write!(f, "UserName({user})"),
            UserIdentity::X509(identity) => {
                write!(f, "X509({})", identity.certificate.thumbprint_hex())
            }
        }
    }
}

/// Choose the token policy for an identity: first matching token type,
/// preferring the strongest security sub-policy.
pub(crate) fn select_user_token_policy<'a>(
    endpoint: &'a EndpointDescription,
    identity: &UserIdentity,
) -> Result<&'a UserTokenPolicy> {
    let wanted = identity.token_type();
    let endpoint_policy = endpoint.security_policy().unwrap_or(SecurityPolicy::None);
    let mut candidates: Vec<&UserTokenPolicy> = endpoint
        .user_identity_tokens()
        .iter()
        .filter(|policy| policy.token_type == wanted)
        .collect();
    // Strongest sub-policy first.
    candidates.sort_by_key(|policy| match policy.effective_policy(endpoint_policy) {
        SecurityPolicy::Basic256Sha256 => 0,
        SecurityPolicy::None => 1,
    });
    candidates.into_iter().next().ok_or_else(|| {
        Error::usage(format!(
            "endpoint offers no user token policy for {identity:?}"
        ))
    })
}

/// The to-be-encrypted password block:
/// `[UInt32 = len(pw) + len(nonce)] ‖ password ‖ server_nonce`.
fn password_secret(password: &[u8], server_nonce: &[u8]) -> Vec<u8> {
    let mut secret = bytes::BytesMut::with_capacity(4 + password.len() + server_nonce.len());
    secret.put_u32_le((password.len() + server_nonce.len()) as u32);
    secret.put_slice(password);
    secret.put_slice(server_nonce);
    secret.to_vec()
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SessionState {
    Created = 0,
    Activated = 1,
    Closed = 2,
}

/// An authenticated context layered over one secure channel.
pub struct Session {
    dispatcher: ServiceDispatcher,
    session_id: NodeId,
    authentication_token: NodeId,
    revised_timeout_ms: f64,
    state: AtomicU8,
    server_nonce: Mutex<Vec<u8>>,
    next_request_handle: AtomicU32,
    request_timeout_ms: u32,
}

impl Session {
    /// CreateSession. The session starts in Created state and must be
    /// activated before anything else.
    pub(crate) async fn create(
        dispatcher: ServiceDispatcher,
        config: &ClientConfig,
        endpoint_url: &str,
        client_certificate: Option<&Certificate>,
    ) -> Result<Session> {
        let client_nonce = {
            use rand::RngCore;
            let mut nonce = vec![0u8; SESSION_NONCE_LENGTH];
            rand::thread_rng().fill_bytes(&mut nonce);
            nonce
        };
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::NULL, 1, config.session.request_timeout_ms),
            client_description: ApplicationDescription::client(
                config.application.application_uri.clone(),
                config.application.application_name.clone(),
            ),
            server_uri: None,
            endpoint_url: Some(endpoint_url.to_string()),
            session_name: Some(config.session.session_name.clone()),
            client_nonce: ByteString::new(client_nonce),
            client_certificate: match client_certificate {
                Some(cert) => ByteString::new(cert.der().to_vec()),
                None => ByteString::NULL,
            },
            requested_session_timeout: config.session.session_timeout_ms,
            max_response_message_size: config.transport.max_message_size,
        };

        let response: CreateSessionResponse = dispatcher.call(&request).await?;
        tracing::info!(
            session_id = %response.session_id,
            revised_timeout_ms = response.revised_session_timeout,
            "session created"
        );
        Ok(Session {
            dispatcher,
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            revised_timeout_ms: response.revised_session_timeout,
            state: AtomicU8::new(SessionState::Created as u8),
            server_nonce: Mutex::new(response.server_nonce.0.unwrap_or_default()),
            next_request_handle: AtomicU32::new(1),
            request_timeout_ms: config.session.request_timeout_ms,
        })
    }

    /// ActivateSession with the given identity against the selected
    /// endpoint.
    pub(crate) async fn activate(
        &self,
        identity: &UserIdentity,
        endpoint: &EndpointDescription,
    ) -> Result<()> {
        let policy = select_user_token_policy(endpoint, identity)?;
        let endpoint_policy = endpoint.security_policy().unwrap_or(SecurityPolicy::None);
        let token_policy = policy.effective_policy(endpoint_policy);
        let server_nonce = self.server_nonce.lock().expect("not poisoned").clone();
        let server_certificate = endpoint.server_certificate.as_slice();

        let (user_identity_token, user_token_signature) = match identity {
            UserIdentity::Anonymous => (
                AnonymousIdentityToken {
                    policy_id: policy.policy_id.clone(),
                }
                .wrap(),
                SignatureData::NULL,
            ),
            UserIdentity::UserName { user, password } => {
                let (password, algorithm) = match token_policy {
                    SecurityPolicy::None => (password.clone().into_bytes(), None),
                    SecurityPolicy::Basic256Sha256 => {
                        if server_certificate.is_empty() {
                            return Err(Error::usage(
                                "password encryption requires the server certificate",
                            ));
                        }
                        let secret = password_secret(password.as_bytes(), &server_nonce);
                        (
                            encrypt_secret(token_policy, server_certificate, &secret)?,
                            Some(RSA_OAEP_URI.to_string()),
                        )
                    }
                };
                (
                    UserNameIdentityToken {
                        policy_id: policy.policy_id.clone(),
                        user_name: Some(user.clone()),
                        password: ByteString::new(password),
                        encryption_algorithm: algorithm,
                    }
                    .wrap(),
                    SignatureData::NULL,
                )
            }
            UserIdentity::X509(user_identity) => {
                let token = X509IdentityToken {
                    policy_id: policy.policy_id.clone(),
                    certificate_data: ByteString::new(user_identity.certificate.der().to_vec()),
                }
                .wrap();
                // Proof of possession: sign serverCert ‖ serverNonce.
                let signature = match token_policy {
                    SecurityPolicy::None => SignatureData::NULL,
                    SecurityPolicy::Basic256Sha256 => {
                        let mut signed = server_certificate.to_vec();
                        signed.extend_from_slice(&server_nonce);
                        let key = SigningKey::<Sha256>::new(user_identity.private_key.clone());
                        SignatureData {
                            algorithm: Some(RSA_SHA256_URI.to_string()),
                            signature: ByteString::new(key.sign(&signed).to_vec()),
                        }
                    }
                };
                (token, signature)
            }
        };

        let request = ActivateSessionRequest {
            request_header: self.new_request_header_unchecked(),
            client_signature: SignatureData::NULL,
            client_software_certificates: None,
            locale_ids: None,
            user_identity_token,
            user_token_signature,
        };
        let response: ActivateSessionResponse = self.dispatcher.call(&request).await?;

        *self.server_nonce.lock().expect("not poisoned") =
            response.server_nonce.0.unwrap_or_default();
        self.state
            .store(SessionState::Activated as u8, Ordering::SeqCst);
        tracing::info!(identity = ?identity, "session activated");
        Ok(())
    }

    /// CloseSession; the channel stays open and is closed separately.
    pub(crate) async fn close(&self, delete_subscriptions: bool) -> Result<()> {
        if self.state.load(Ordering::SeqCst) == SessionState::Closed as u8 {
            return Ok(());
        }
        let request = CloseSessionRequest {
            request_header: self.new_request_header_unchecked(),
            delete_subscriptions,
        };
        let result: Result<CloseSessionResponse> = self.dispatcher.call(&request).await;
        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        result.map(|_| ())
    }

    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    pub fn revised_timeout_ms(&self) -> f64 {
        self.revised_timeout_ms
    }

    pub fn is_activated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == SessionState::Activated as u8
    }

    pub(crate) fn dispatcher(&self) -> &ServiceDispatcher {
        &self.dispatcher
    }

    /// Header for an activated-session service call.
    pub(crate) fn new_request_header(&self) -> Result<RequestHeader> {
        match self.state.load(Ordering::SeqCst) {
            s if s == SessionState::Activated as u8 => Ok(self.new_request_header_unchecked()),
            s if s == SessionState::Closed as u8 => Err(Error::ChannelClosed),
            _ => Err(Error::SessionNotActive),
        }
    }

    /// Header with a caller-supplied timeoutHint (Publish wants a long one).
    pub(crate) fn new_request_header_with_timeout(&self, timeout_ms: u32) -> Result<RequestHeader> {
        let mut header = self.new_request_header()?;
        header.timeout_hint = timeout_ms;
        Ok(header)
    }

    fn new_request_header_unchecked(&self) -> RequestHeader {
        RequestHeader::new(
            self.authentication_token.clone(),
            self.next_request_handle.fetch_add(1, Ordering::Relaxed),
            self.request_timeout_ms,
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id.to_string())
            .field("activated", &self.is_activated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::endpoints::tests_support::endpoint_with_tokens;
    use opcua_core::crypto::{POLICY_URI_BASIC256_SHA256, POLICY_URI_NONE};

    fn token(token_type: UserTokenType, id: &str, sub_policy: Option<&str>) -> UserTokenPolicy {
        UserTokenPolicy {
            policy_id: Some(id.into()),
            token_type,
            issued_token_type: None,
            issuer_endpoint_url: None,
            security_policy_uri: sub_policy.map(String::from),
        }
    }

    #[test]
    fn policy_selection_prefers_strongest_sub_policy() {
        // Endpoint mode None, tokens: Anonymous, UserName(Basic256Sha256),
        // UserName(None). A username identity must land on the encrypted
        // variant.
        let endpoint = endpoint_with_tokens(
            POLICY_URI_NONE,
            vec![
                token(UserTokenType::Anonymous, "anon", None),
                token(
                    UserTokenType::UserName,
                    "user_secure",
                    Some(POLICY_URI_BASIC256_SHA256),
                ),
                token(UserTokenType::UserName, "user_plain", Some(POLICY_URI_NONE)),
            ],
        );
        let identity = UserIdentity::UserName {
            user: "op".into(),
            password: "pw".into(),
        };
        let chosen = select_user_token_policy(&endpoint, &identity).unwrap();
        assert_eq!(chosen.policy_id.as_deref(), Some("user_secure"));
        assert_eq!(
            chosen.effective_policy(SecurityPolicy::None),
            SecurityPolicy::Basic256Sha256
        );
    }

    #[test]
    fn policy_selection_matches_token_type() {
        let endpoint = endpoint_with_tokens(
            POLICY_URI_NONE,
            vec![token(UserTokenType::Anonymous, "anon", None)],
        );
        let chosen = select_user_token_policy(&endpoint, &UserIdentity::Anonymous).unwrap();
        assert_eq!(chosen.policy_id.as_deref(), Some("anon"));

        let err = select_user_token_policy(
            &endpoint,
            &UserIdentity::UserName {
                user: "x".into(),
                password: "y".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn password_secret_layout() {
        let secret = password_secret(b"pw", &[0xaa, 0xbb, 0xcc]);
        // Length word counts password plus nonce, then both verbatim.
        assert_eq!(&secret[..4], &5u32.to_le_bytes());
        assert_eq!(&secret[4..6], b"pw");
        assert_eq!(&secret[6..], &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn token_without_sub_policy_inherits_endpoint_policy() {
        let endpoint = endpoint_with_tokens(
            POLICY_URI_BASIC256_SHA256,
            vec![token(UserTokenType::UserName, "user", None)],
        );
        let identity = UserIdentity::UserName {
            user: "op".into(),
            password: "pw".into(),
        };
        let chosen = select_user_token_policy(&endpoint, &identity).unwrap();
        assert_eq!(
            chosen.effective_policy(SecurityPolicy::Basic256Sha256),
            SecurityPolicy::Basic256Sha256
        );
    }
}
