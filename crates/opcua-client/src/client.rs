//! The client: connect sequence, endpoint selection and the public surface.
//!
//! Connecting under policy None uses one connection: HEL/ACK, OPN,
//! GetEndpoints, CreateSession, ActivateSession. Secured policies need the
//! server certificate before the OPN can encrypt toward it, so a throwaway
//! None-security discovery connection fetches the endpoint list first, then
//! the real connection opens with the configured policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opcua_core::crypto::cert::{ApplicationIdentity, Certificate, CertificateValidator};
use opcua_core::crypto::{CryptoError, MessageSecurityMode, SecurityPolicy};
use opcua_core::types::{NodeId, RequestHeader, StatusCode};
use opcua_core::wire::{MessageKind, WireError};

use crate::channel::SecureChannel;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionHandle};
use crate::dispatcher::ServiceDispatcher;
use crate::error::{Error, Result};
use crate::messages::endpoints::{
    select_endpoint, EndpointDescription, GetEndpointsRequest, GetEndpointsResponse,
};
use crate::messages::subscription::NotificationMessage;
use crate::session::{Session, UserIdentity};
use crate::subscription::{
    MonitoredItemOutcome, MonitoredItemSpec, SubscriptionEngine, SubscriptionInfo,
    SubscriptionOptions,
};
use crate::transport::{decode_error_chunk, EndpointUrl, Transport};

pub struct Client {
    config: ClientConfig,
    endpoint: EndpointDescription,
    endpoints: Vec<EndpointDescription>,
    connection: ConnectionHandle,
    session: Arc<Session>,
    subscriptions: SubscriptionEngine,
    closed: AtomicBool,
}

impl Client {
    /// Connect, open a secure channel, discover endpoints, create and
    /// activate a session.
    pub async fn connect(url: &str, identity: UserIdentity, config: ClientConfig) -> Result<Client> {
        let url = EndpointUrl::parse(url)?;
        let policy = config.security_policy()?;
        let mode = config.security_mode()?;
        match (policy, mode) {
            (SecurityPolicy::None, MessageSecurityMode::None) => {}
            (SecurityPolicy::None, _) => {
                return Err(Error::usage("Sign/SignAndEncrypt needs a security policy"))
            }
            (_, MessageSecurityMode::None) => {
                return Err(Error::usage("a secured policy needs Sign or SignAndEncrypt"))
            }
            _ => {}
        }
        let app_identity = config.load_identity()?;
        let validator = config.build_validator()?;

        let (connection, endpoints, endpoint) = if policy == SecurityPolicy::None {
            let (mut transport, mut channel) =
                open_channel(&url, url.as_str(), policy, mode, None, None, &config).await?;
            // Endpoint discovery happens over the freshly opened channel,
            // but before the connection task owns the socket.
            let endpoints = get_endpoints_inline(&mut transport, &mut channel, &url, &config).await?;
            let endpoint = choose_endpoint(&endpoints, mode, policy)?;
            validate_endpoint_certificate(&validator, &endpoint)?;
            let handle = Connection::spawn(transport, channel);
            (handle, endpoints, endpoint)
        } else {
            // Discovery pass under policy None to learn the server
            // certificate, then the real, secured connection.
            let (mut transport, mut channel) = open_channel(
                &url,
                url.as_str(),
                SecurityPolicy::None,
                MessageSecurityMode::None,
                None,
                None,
                &config,
            )
            .await?;
            let endpoints = get_endpoints_inline(&mut transport, &mut channel, &url, &config).await?;
            let discovery = Connection::spawn(transport, channel);
            discovery.shutdown().await;

            let endpoint = choose_endpoint(&endpoints, mode, policy)?;
            let leaf = validate_endpoint_certificate(&validator, &endpoint)?
                .ok_or_else(|| Error::usage("selected endpoint advertises no certificate"))?;

            let rewritten = rewrite_endpoint_url(&url, &endpoint);
            let (transport, channel) = open_channel(
                &url,
                &rewritten,
                policy,
                mode,
                app_identity.clone(),
                Some(leaf),
                &config,
            )
            .await?;
            let handle = Connection::spawn(transport, channel);
            (handle, endpoints, endpoint)
        };

        let dispatcher = ServiceDispatcher::new(connection.clone());
        let session_endpoint_url = rewrite_endpoint_url(&url, &endpoint);
        let session = Session::create(
            dispatcher,
            &config,
            &session_endpoint_url,
            app_identity.as_ref().map(|identity| &identity.certificate),
        )
        .await?;
        session.activate(&identity, &endpoint).await?;
        let session = Arc::new(session);

        let subscriptions =
            SubscriptionEngine::new(session.clone(), config.session.publish_timeout_ms);

        Ok(Client {
            config,
            endpoint,
            endpoints,
            connection,
            session,
            subscriptions,
            closed: AtomicBool::new(false),
        })
    }

    /// The endpoint this client selected during connect.
    pub fn endpoint(&self) -> &EndpointDescription {
        &self.endpoint
    }

    /// Everything the server advertised during discovery.
    pub fn server_endpoints(&self) -> &[EndpointDescription] {
        &self.endpoints
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    pub async fn create_subscription(&self, options: SubscriptionOptions) -> Result<u32> {
        self.subscriptions.create_subscription(options).await
    }

    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        options: SubscriptionOptions,
    ) -> Result<()> {
        self.subscriptions
            .modify_subscription(subscription_id, options)
            .await
    }

    pub async fn set_publishing_mode(
        &self,
        subscription_ids: &[u32],
        enabled: bool,
    ) -> Result<Vec<StatusCode>> {
        self.subscriptions
            .set_publishing_mode(subscription_ids, enabled)
            .await
    }

    pub async fn transfer_subscriptions(
        &self,
        subscription_ids: &[u32],
        send_initial_values: bool,
    ) -> Result<Vec<StatusCode>> {
        self.subscriptions
            .transfer_subscriptions(subscription_ids, send_initial_values)
            .await
    }

    pub async fn delete_subscriptions(&self, subscription_ids: &[u32]) -> Result<Vec<StatusCode>> {
        self.subscriptions.delete_subscriptions(subscription_ids).await
    }

    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemSpec>,
    ) -> Result<Vec<MonitoredItemOutcome>> {
        self.subscriptions
            .create_monitored_items(subscription_id, items)
            .await
    }

    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        changes: &[(u32, crate::messages::subscription::MonitoringParameters)],
    ) -> Result<Vec<StatusCode>> {
        self.subscriptions
            .modify_monitored_items(subscription_id, changes)
            .await
    }

    pub async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
        mode: crate::messages::MonitoringMode,
    ) -> Result<Vec<StatusCode>> {
        self.subscriptions
            .set_monitoring_mode(subscription_id, client_handles, mode)
            .await
    }

    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
    ) -> Result<Vec<StatusCode>> {
        self.subscriptions
            .delete_monitored_items(subscription_id, client_handles)
            .await
    }

    pub async fn republish(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage> {
        self.subscriptions
            .republish(subscription_id, sequence_number)
            .await
    }

    pub fn subscription_info(&self, subscription_id: u32) -> Option<SubscriptionInfo> {
        self.subscriptions.subscription_info(subscription_id)
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Close the session (deleting its subscriptions) and the channel.
    /// Idempotent; teardown failures are logged, not surfaced.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.shutdown();
        if let Err(e) = self.session.close(true).await {
            tracing::debug!(error = %e, "close session failed");
        }
        self.connection.shutdown().await;
        tracing::info!("client closed");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            // The connection task sends the best-effort CLO once the last
            // handle is gone; the publish loop is told to stop here.
            self.subscriptions.shutdown();
            tracing::debug!("client dropped without close(), channel closes in background");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint.endpoint_url)
            .field("session", &self.session)
            .finish()
    }
}

// ── Connect helpers ───────────────────────────────────────────────────────────

async fn open_channel(
    url: &EndpointUrl,
    endpoint_url_string: &str,
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
    identity: Option<ApplicationIdentity>,
    remote_certificate: Option<Certificate>,
    config: &ClientConfig,
) -> Result<(Transport, SecureChannel)> {
    let mut transport = Transport::connect(url).await?;
    let mut channel = SecureChannel::new(policy, mode, identity, remote_certificate)?;
    channel.set_requested_lifetime(config.transport.token_lifetime_ms);

    channel.on_hello_sent();
    let negotiated = transport
        .hello(endpoint_url_string, config.transport_limits())
        .await?;
    channel.on_acknowledged(negotiated);

    let (_request_id, chunk) = channel.begin_open()?;
    transport.send(&chunk).await?;
    let raw = transport.receive_chunk(channel.limits()).await?;
    match raw.kind {
        MessageKind::OpenChannel => {
            channel.process_open_response(&raw.body)?;
        }
        MessageKind::Error => return Err(decode_error_chunk(&raw.body)),
        other => return Err(WireError::UnknownMessageType(other.code()).into()),
    }
    Ok((transport, channel))
}

/// GetEndpoints over a channel whose connection task has not started yet.
async fn get_endpoints_inline(
    transport: &mut Transport,
    channel: &mut SecureChannel,
    url: &EndpointUrl,
    config: &ClientConfig,
) -> Result<Vec<EndpointDescription>> {
    let request = GetEndpointsRequest {
        request_header: RequestHeader::new(NodeId::NULL, 1, config.session.request_timeout_ms),
        endpoint_url: Some(url.as_str().to_string()),
        locale_ids: None,
        profile_uris: None,
    };
    let payload = crate::messages::encode_message(&request);
    let response_payload =
        crate::connection::call_before_spawn(transport, channel, &payload).await?;

    let (type_id, mut reader) = crate::messages::decode_type_id(&response_payload)?;
    if type_id == crate::messages::SERVICE_FAULT_TYPE_ID {
        let fault: crate::messages::ServiceFault =
            opcua_core::codec::BinaryDecode::decode(&mut reader)?;
        return Err(Error::Service(fault.response_header.service_result));
    }
    if type_id != <GetEndpointsResponse as crate::messages::ServiceResponse>::TYPE_ID {
        return Err(opcua_core::codec::CodecError::OutOfRange {
            field: "response type id",
        }
        .into());
    }
    let response: GetEndpointsResponse = opcua_core::codec::BinaryDecode::decode(&mut reader)?;
    if response.response_header.service_result.is_bad() {
        return Err(Error::Service(response.response_header.service_result));
    }
    let endpoints = response.endpoints.unwrap_or_default();
    tracing::debug!(count = endpoints.len(), "endpoints discovered");
    Ok(endpoints)
}

fn choose_endpoint(
    endpoints: &[EndpointDescription],
    mode: MessageSecurityMode,
    policy: SecurityPolicy,
) -> Result<EndpointDescription> {
    select_endpoint(endpoints, mode, policy)
        .cloned()
        .ok_or_else(|| Error::usage("server advertised no endpoints"))
}

/// Client-supplied host and port, server-supplied path.
fn rewrite_endpoint_url(url: &EndpointUrl, endpoint: &EndpointDescription) -> String {
    match endpoint.endpoint_url.as_deref() {
        Some(advertised) => url.with_path_of(advertised),
        None => url.as_str().to_string(),
    }
}

/// Run the configured validator over the endpoint's certificate chain.
/// Returns the leaf for later use (password encryption, OPN).
fn validate_endpoint_certificate(
    validator: &Option<Box<dyn CertificateValidator>>,
    endpoint: &EndpointDescription,
) -> Result<Option<Certificate>> {
    let blob = endpoint.server_certificate.as_slice();
    if blob.is_empty() {
        return Ok(None);
    }
    let chain = Certificate::chain_from_der(blob).map_err(CryptoError::from)?;
    if let Some(validator) = validator {
        validator.validate(&chain).map_err(CryptoError::from)?;
        tracing::debug!(
            thumbprint = chain[0].thumbprint_hex(),
            "server certificate accepted"
        );
    }
    Ok(chain.into_iter().next())
}
