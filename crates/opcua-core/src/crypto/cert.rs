//! X.509 certificate handling and trust decisions.
//!
//! The client consumes DER certificates; it never issues them. Trust is
//! decided by a [`CertificateValidator`], with [`DirectoryTrustStore`] as the
//! default implementation: one `<SHA1-thumbprint>.der` file per trusted
//! certificate, 0600 files inside a 0700 directory.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use thiserror::Error;
use x509_cert::der::{Decode, Encode};

use super::CryptoError;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate is not valid DER")]
    Malformed,

    #[error("certificate is not yet valid")]
    NotYetValid,

    #[error("certificate has expired")]
    Expired,

    #[error("certificate {thumbprint} is not in the trust store")]
    Untrusted { thumbprint: String },

    #[error("certificate chain is incomplete")]
    ChainIncomplete,

    #[error("certificate signature does not verify against its issuer")]
    SignatureMismatch,

    #[error("unsupported certificate signature algorithm {0}")]
    UnsupportedSignatureAlgorithm(String),

    #[error("certificate public key is not RSA")]
    UnsupportedKeyType,

    #[error("failed to load private key")]
    KeyParse,

    #[error("trust store I/O: {0}")]
    Io(#[from] std::io::Error),
}

// ── Certificate ───────────────────────────────────────────────────────────────

/// A parsed DER certificate, keeping the original bytes for thumbprints and
/// re-transmission.
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    parsed: x509_cert::Certificate,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let parsed =
            x509_cert::Certificate::from_der(der).map_err(|_| CertificateError::Malformed)?;
        Ok(Certificate {
            der: der.to_vec(),
            parsed,
        })
    }

    pub fn from_der_file(path: &Path) -> Result<Self, CertificateError> {
        let der = std::fs::read(path)?;
        Certificate::from_der(&der)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Split a blob of back-to-back DER certificates (leaf first, as servers
    /// transmit chains) into individual certificates.
    pub fn chain_from_der(blob: &[u8]) -> Result<Vec<Certificate>, CertificateError> {
        let mut chain = Vec::new();
        let mut rest = blob;
        while !rest.is_empty() {
            let len = der_tlv_length(rest).ok_or(CertificateError::Malformed)?;
            chain.push(Certificate::from_der(&rest[..len])?);
            rest = &rest[len..];
        }
        if chain.is_empty() {
            return Err(CertificateError::Malformed);
        }
        Ok(chain)
    }

    /// SHA-1 over the DER bytes; the wire and trust-store identity.
    pub fn thumbprint(&self) -> [u8; 20] {
        Sha1::digest(&self.der).into()
    }

    pub fn thumbprint_hex(&self) -> String {
        hex::encode(self.thumbprint())
    }

    pub fn rsa_public_key(&self) -> Result<RsaPublicKey, CryptoError> {
        let spki = self
            .parsed
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|_| CertificateError::Malformed)?;
        RsaPublicKey::from_public_key_der(&spki)
            .map_err(|_| CryptoError::Certificate(CertificateError::UnsupportedKeyType))
    }

    pub fn is_self_signed(&self) -> bool {
        self.parsed.tbs_certificate.issuer == self.parsed.tbs_certificate.subject
    }

    /// Is `now` inside the certificate's validity window?
    pub fn check_validity(&self, now: SystemTime) -> Result<(), CertificateError> {
        let validity = &self.parsed.tbs_certificate.validity;
        if now < validity.not_before.to_system_time() {
            return Err(CertificateError::NotYetValid);
        }
        if now > validity.not_after.to_system_time() {
            return Err(CertificateError::Expired);
        }
        Ok(())
    }

    /// Verify this certificate's signature against the issuer's public key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<(), CertificateError> {
        let tbs = self
            .parsed
            .tbs_certificate
            .to_der()
            .map_err(|_| CertificateError::Malformed)?;
        let signature = self
            .parsed
            .signature
            .as_bytes()
            .ok_or(CertificateError::Malformed)?;
        let key = issuer
            .rsa_public_key()
            .map_err(|_| CertificateError::UnsupportedKeyType)?;

        let oid = self.parsed.signature_algorithm.oid;
        let result = if oid == const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION {
            let hashed = sha2::Sha256::digest(&tbs);
            key.verify(rsa::Pkcs1v15Sign::new::<sha2::Sha256>(), &hashed, signature)
        } else if oid == const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION {
            let hashed = Sha1::digest(&tbs);
            key.verify(rsa::Pkcs1v15Sign::new::<Sha1>(), &hashed, signature)
        } else {
            return Err(CertificateError::UnsupportedSignatureAlgorithm(
                oid.to_string(),
            ));
        };
        result.map_err(|_| CertificateError::SignatureMismatch)
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.parsed.tbs_certificate.subject.to_string())
            .field("thumbprint", &self.thumbprint_hex())
            .finish()
    }
}

/// Total length of the first DER TLV in `bytes`, header included.
fn der_tlv_length(bytes: &[u8]) -> Option<usize> {
    // SEQUENCE tag, then a short- or long-form length.
    if bytes.len() < 2 || bytes[0] != 0x30 {
        return None;
    }
    let first = bytes[1] as usize;
    let (header, content) = if first < 0x80 {
        (2, first)
    } else {
        let count = first & 0x7f;
        if count == 0 || count > 4 || bytes.len() < 2 + count {
            return None;
        }
        let mut content = 0usize;
        for &b in &bytes[2..2 + count] {
            content = (content << 8) | b as usize;
        }
        (2 + count, content)
    };
    let total = header.checked_add(content)?;
    (total <= bytes.len()).then_some(total)
}

// ── Application identity ──────────────────────────────────────────────────────

/// The client's own certificate and private key.
#[derive(Clone)]
pub struct ApplicationIdentity {
    pub certificate: Certificate,
    pub private_key: RsaPrivateKey,
}

impl ApplicationIdentity {
    pub fn new(certificate: Certificate, private_key: RsaPrivateKey) -> Self {
        ApplicationIdentity {
            certificate,
            private_key,
        }
    }

    /// Load a DER certificate and a PEM private key (PKCS#8 or PKCS#1).
    pub fn load(certificate_path: &Path, key_path: &Path) -> Result<Self, CertificateError> {
        let certificate = Certificate::from_der_file(certificate_path)?;
        let pem = std::fs::read_to_string(key_path)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
            .map_err(|_| CertificateError::KeyParse)?;
        Ok(ApplicationIdentity {
            certificate,
            private_key,
        })
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Decides whether a server certificate chain is acceptable.
///
/// `chain[0]` is the leaf; issuers follow in order when the server sent them.
pub trait CertificateValidator: Send + Sync {
    fn validate(&self, chain: &[Certificate]) -> Result<(), CertificateError>;
}

/// Accepts any certificate. For commissioning and tests only.
pub struct AcceptAllValidator;

impl CertificateValidator for AcceptAllValidator {
    fn validate(&self, _chain: &[Certificate]) -> Result<(), CertificateError> {
        Ok(())
    }
}

/// Directory-backed trust store and validator.
///
/// A chain passes when every member is inside its validity window, every
/// signature verifies against the next certificate (self-signed certificates
/// short-circuit the walk), and at least one member is present in the store.
pub struct DirectoryTrustStore {
    dir: PathBuf,
}

impl DirectoryTrustStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CertificateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(DirectoryTrustStore { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, certificate: &Certificate) -> PathBuf {
        self.dir
            .join(format!("{}.der", certificate.thumbprint_hex()))
    }

    /// Persist a certificate as trusted. Idempotent.
    pub fn trust(&self, certificate: &Certificate) -> Result<PathBuf, CertificateError> {
        let path = self.entry_path(certificate);
        std::fs::write(&path, certificate.der())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(path)
    }

    pub fn is_trusted(&self, certificate: &Certificate) -> bool {
        self.entry_path(certificate).is_file()
    }
}

impl CertificateValidator for DirectoryTrustStore {
    fn validate(&self, chain: &[Certificate]) -> Result<(), CertificateError> {
        if chain.is_empty() {
            return Err(CertificateError::ChainIncomplete);
        }

        let now = SystemTime::now();
        for certificate in chain {
            certificate.check_validity(now)?;
        }

        let any_trusted = chain.iter().any(|c| self.is_trusted(c));

        for (i, certificate) in chain.iter().enumerate() {
            if certificate.is_self_signed() {
                certificate.verify_signed_by(certificate)?;
                break;
            }
            match chain.get(i + 1) {
                Some(issuer) => certificate.verify_signed_by(issuer)?,
                // Truncated chain: acceptable only when the operator trusts
                // this certificate (or one below it) explicitly.
                None if any_trusted => break,
                None => return Err(CertificateError::ChainIncomplete),
            }
        }

        if !any_trusted {
            return Err(CertificateError::Untrusted {
                thumbprint: chain[0].thumbprint_hex(),
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
