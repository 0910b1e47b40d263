//! Client configuration.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OPCUA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/opcua-client/config.toml
//!   3. ~/.config/opcua-client/config.toml

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use opcua_core::crypto::cert::{
    AcceptAllValidator, ApplicationIdentity, CertificateValidator, DirectoryTrustStore,
};
use opcua_core::crypto::{MessageSecurityMode, SecurityPolicy};
use opcua_core::wire::TransportLimits;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub application: ApplicationConfig,
    pub security: SecurityConfig,
    pub transport: TransportConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application URI reported to servers.
    pub application_uri: String,
    pub product_uri: String,
    pub application_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// "None" or "Basic256Sha256".
    pub policy: String,
    /// "None", "Sign" or "SignAndEncrypt".
    pub mode: String,
    /// DER application-instance certificate. Required for secured policies.
    pub certificate_path: Option<PathBuf>,
    /// PEM private key (PKCS#8 or PKCS#1).
    pub private_key_path: Option<PathBuf>,
    /// Directory of trusted certificates (`<thumbprint>.der`).
    pub trust_store_dir: Option<PathBuf>,
    /// Skip certificate validation entirely. Commissioning only.
    pub accept_all_certificates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    /// 0 = unlimited.
    pub max_message_size: u32,
    /// 0 = unlimited.
    pub max_chunk_count: u32,
    /// Requested security-token lifetime, milliseconds.
    pub token_lifetime_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_name: String,
    /// Requested session timeout, milliseconds.
    pub session_timeout_ms: f64,
    /// Default per-request timeoutHint, milliseconds.
    pub request_timeout_ms: u32,
    /// timeoutHint for Publish requests, which stay parked on the server.
    pub publish_timeout_ms: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            security: SecurityConfig::default(),
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            application_uri: "urn:opcua-client".into(),
            product_uri: "urn:opcua-client".into(),
            application_name: "opcua-client".into(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            policy: "None".into(),
            mode: "None".into(),
            certificate_path: None,
            private_key_path: None,
            trust_store_dir: None,
            accept_all_certificates: false,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        let limits = TransportLimits::default();
        Self {
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            token_lifetime_ms: crate::channel::DEFAULT_TOKEN_LIFETIME_MS,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_name: "opcua-client session".into(),
            session_timeout_ms: 3_600_000.0,
            request_timeout_ms: 15_000,
            publish_timeout_ms: 60_000,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ClientConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| Error::usage(format!("config {}: {e}", path.display())))?;
            toml::from_str(&text)
                .map_err(|e| Error::usage(format!("config {}: {e}", path.display())))?
        } else {
            ClientConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("OPCUA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply OPCUA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OPCUA_SECURITY__POLICY") {
            self.security.policy = v;
        }
        if let Ok(v) = std::env::var("OPCUA_SECURITY__MODE") {
            self.security.mode = v;
        }
        if let Ok(v) = std::env::var("OPCUA_SECURITY__TRUST_STORE_DIR") {
            self.security.trust_store_dir = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("OPCUA_SECURITY__ACCEPT_ALL_CERTIFICATES") {
            self.security.accept_all_certificates = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("OPCUA_SESSION__REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.session.request_timeout_ms = ms;
            }
        }
    }

    // ── Derived values ────────────────────────────────────────────────────────

    pub fn security_policy(&self) -> Result<SecurityPolicy> {
        match self.security.policy.as_str() {
            "None" => Ok(SecurityPolicy::None),
            "Basic256Sha256" => Ok(SecurityPolicy::Basic256Sha256),
            other => Err(Error::usage(format!("unknown security policy `{other}`"))),
        }
    }

    pub fn security_mode(&self) -> Result<MessageSecurityMode> {
        match self.security.mode.as_str() {
            "None" => Ok(MessageSecurityMode::None),
            "Sign" => Ok(MessageSecurityMode::Sign),
            "SignAndEncrypt" => Ok(MessageSecurityMode::SignAndEncrypt),
            other => Err(Error::usage(format!("unknown security mode `{other}`"))),
        }
    }

    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            receive_buffer_size: self.transport.receive_buffer_size,
            send_buffer_size: self.transport.send_buffer_size,
            max_message_size: self.transport.max_message_size,
            max_chunk_count: self.transport.max_chunk_count,
        }
    }

    /// Load the application certificate and key when the policy needs them.
    pub fn load_identity(&self) -> Result<Option<ApplicationIdentity>> {
        if self.security_policy()? == SecurityPolicy::None {
            return Ok(None);
        }
        let (cert, key) = match (
            &self.security.certificate_path,
            &self.security.private_key_path,
        ) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(Error::usage(
                    "secured policy needs certificate_path and private_key_path",
                ))
            }
        };
        let identity = ApplicationIdentity::load(cert, key)
            .map_err(opcua_core::crypto::CryptoError::from)?;
        Ok(Some(identity))
    }

    /// Build the certificate validator, if validation is configured.
    pub fn build_validator(&self) -> Result<Option<Box<dyn CertificateValidator>>> {
        if self.security.accept_all_certificates {
            return Ok(Some(Box::new(AcceptAllValidator)));
        }
        match &self.security.trust_store_dir {
            Some(dir) => {
                let store = DirectoryTrustStore::open(dir)
                    .map_err(opcua_core::crypto::CryptoError::from)?;
                Ok(Some(Box::new(store)))
            }
            None => Ok(None),
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("opcua-client")
}
