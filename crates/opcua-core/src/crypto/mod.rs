//! Cryptographic plumbing for the secure channel.
//!
//! Split by concern: [`derive`] turns handshake nonces into symmetric key
//! material, [`padding`] handles the block-cipher padding scheme, [`suite`]
//! is the pluggable per-policy handler, and [`cert`] covers X.509 loading,
//! thumbprints and trust decisions.

pub mod cert;
pub mod derive;
pub mod padding;
mod suite;

pub use suite::{
    encrypt_secret, CryptoSuite, MessageSecurityMode, SecurityPolicy, POLICY_URI_BASIC256_SHA256,
    POLICY_URI_NONE,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown security policy `{0}`")]
    UnknownPolicy(String),

    #[error("unknown message security mode {0}")]
    UnknownSecurityMode(u32),

    #[error("signature verification failed")]
    BadSignature,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("padding invalid")]
    BadPadding,

    #[error("ciphertext length {len} is not aligned to {block}-byte blocks")]
    Misaligned { len: usize, block: usize },

    #[error("symmetric keys have not been derived yet")]
    KeysNotDerived,

    #[error("policy requires an application certificate and private key")]
    MissingIdentity,

    #[error("policy requires the server certificate")]
    MissingRemoteCertificate,

    #[error("nonce must be {expected} bytes, got {got}")]
    BadNonce { expected: usize, got: usize },

    #[error(transparent)]
    Certificate(#[from] cert::CertificateError),
}
