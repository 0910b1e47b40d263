//! opcua-client — async OPC UA binary-transport client.
//!
//! Connect with [`Client::connect`], then read, write, browse, call methods
//! and subscribe to data changes. One task owns each socket; service calls
//! pipeline over the secure channel keyed by request id.

pub mod channel;
pub mod config;
mod connection;
mod dispatcher;
pub mod error;
pub mod messages;
pub mod services;
pub mod session;
pub mod subscription;
pub mod transport;

mod client;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{Error, Result, SequencingError};
pub use services::BrowseOutcome;
pub use session::{Session, UserIdentity};
pub use subscription::{
    MonitoredItemCallback, MonitoredItemOutcome, MonitoredItemSpec, SubscriptionInfo,
    SubscriptionOptions,
};

pub use opcua_core::crypto::cert::{
    AcceptAllValidator, ApplicationIdentity, Certificate, CertificateValidator,
    DirectoryTrustStore,
};
pub use opcua_core::crypto::{MessageSecurityMode, SecurityPolicy};
pub use opcua_core::types::{
    ByteString, DataValue, DateTime, ExpandedNodeId, ExtensionObject, LocalizedText, NodeId,
    QualifiedName, StatusCode, Variant,
};
