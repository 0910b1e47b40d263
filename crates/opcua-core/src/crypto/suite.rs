//! Per-policy crypto suite.
//!
//! A [`CryptoSuite`] owns everything one secure channel needs: the local
//! private key, the peer's public key, and, once the nonces have been
//! exchanged, the derived symmetric key material for both directions.
//! Policy None is the identity suite; Basic256Sha256 is RSA-OAEP-SHA1 +
//! RSA-PKCS1-SHA256 asymmetric and AES-256-CBC + HMAC-SHA256 symmetric.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;

use super::cert::{ApplicationIdentity, Certificate};
use super::derive::{derive_channel_keys, ChannelKeys, KeySizes};
use super::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const POLICY_URI_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
pub const POLICY_URI_BASIC256_SHA256: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

/// RSA-OAEP-SHA1 overhead per ciphertext block.
const OAEP_SHA1_OVERHEAD: usize = 2 * 20 + 2;

/// Keys longer than this need the two-byte asymmetric pad count.
const SINGLE_PAD_BYTE_MAX_KEY: usize = 256;

// ── Policy and mode ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic256Sha256,
}

impl SecurityPolicy {
    pub fn uri(self) -> &'static str {
        match self {
            SecurityPolicy::None => POLICY_URI_NONE,
            SecurityPolicy::Basic256Sha256 => POLICY_URI_BASIC256_SHA256,
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self, CryptoError> {
        match uri {
            POLICY_URI_NONE => Ok(SecurityPolicy::None),
            POLICY_URI_BASIC256_SHA256 => Ok(SecurityPolicy::Basic256Sha256),
            other => Err(CryptoError::UnknownPolicy(other.to_string())),
        }
    }

    pub fn nonce_length(self) -> usize {
        match self {
            SecurityPolicy::None => 0,
            SecurityPolicy::Basic256Sha256 => 32,
        }
    }

    /// Fresh random nonce of the policy's length.
    pub fn random_nonce(self) -> Vec<u8> {
        let mut nonce = vec![0u8; self.nonce_length()];
        rand::thread_rng().fill_bytes(&mut nonce);
        nonce
    }

    pub fn key_sizes(self) -> KeySizes {
        match self {
            SecurityPolicy::None => KeySizes {
                signing_key: 0,
                encryption_key: 0,
                iv: 0,
            },
            SecurityPolicy::Basic256Sha256 => KeySizes {
                signing_key: 32,
                encryption_key: 32,
                iv: 16,
            },
        }
    }

    /// Build the client-side suite for this policy.
    pub fn client_suite(
        self,
        identity: Option<&ApplicationIdentity>,
        remote_certificate: Option<&Certificate>,
    ) -> Result<Box<dyn CryptoSuite>, CryptoError> {
        match self {
            SecurityPolicy::None => Ok(Box::new(NullCrypto)),
            SecurityPolicy::Basic256Sha256 => {
                let identity = identity.ok_or(CryptoError::MissingIdentity)?;
                let remote = remote_certificate.ok_or(CryptoError::MissingRemoteCertificate)?;
                Ok(Box::new(Basic256Sha256Crypto {
                    local_key: identity.private_key.clone(),
                    remote_key: remote.rsa_public_key()?,
                    keys: None,
                }))
            }
        }
    }
}

impl std::fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityPolicy::None => write!(f, "None"),
            SecurityPolicy::Basic256Sha256 => write!(f, "Basic256Sha256"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum MessageSecurityMode {
    #[default]
    None = 1,
    Sign = 2,
    SignAndEncrypt = 3,
}

impl MessageSecurityMode {
    pub fn from_u32(value: u32) -> Result<Self, CryptoError> {
        match value {
            1 => Ok(MessageSecurityMode::None),
            2 => Ok(MessageSecurityMode::Sign),
            3 => Ok(MessageSecurityMode::SignAndEncrypt),
            other => Err(CryptoError::UnknownSecurityMode(other)),
        }
    }

    pub fn signs(self) -> bool {
        matches!(
            self,
            MessageSecurityMode::Sign | MessageSecurityMode::SignAndEncrypt
        )
    }

    pub fn encrypts(self) -> bool {
        matches!(self, MessageSecurityMode::SignAndEncrypt)
    }
}

/// On the wire the mode is an Int32 enumeration.
impl crate::codec::BinaryEncode for MessageSecurityMode {
    fn encode(&self, out: &mut bytes::BytesMut) {
        use bytes::BufMut;
        out.put_u32_le(*self as u32);
    }
}

impl crate::codec::BinaryDecode for MessageSecurityMode {
    fn decode(
        input: &mut crate::codec::BinaryReader<'_>,
    ) -> Result<Self, crate::codec::CodecError> {
        MessageSecurityMode::from_u32(input.read_u32()?).map_err(|_| {
            crate::codec::CodecError::OutOfRange {
                field: "MessageSecurityMode",
            }
        })
    }
}

// ── Suite trait ───────────────────────────────────────────────────────────────

/// One secure channel's cryptographic operations.
///
/// Asymmetric operations always encrypt toward the peer and decrypt with the
/// local key; symmetric operations use the client-direction keys outbound and
/// the server-direction keys inbound.
pub trait CryptoSuite: Send {
    fn policy(&self) -> SecurityPolicy;

    // Asymmetric, used only for OPN.
    fn asym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn asym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn asym_sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn asym_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError>;

    /// Plaintext bytes per RSA block when encrypting toward the peer.
    fn asym_plain_block_size(&self) -> usize;
    /// Ciphertext bytes per RSA block when encrypting toward the peer.
    fn asym_cipher_block_size(&self) -> usize;
    /// Plaintext bytes per RSA block on payloads the peer encrypted toward
    /// the local key.
    fn asym_decrypt_plain_block_size(&self) -> usize;
    /// Signature length produced by [`asym_sign`](CryptoSuite::asym_sign).
    fn asym_local_signature_length(&self) -> usize;
    /// Signature length expected from the peer.
    fn asym_remote_signature_length(&self) -> usize;
    /// Whether the pad count toward the peer needs a second byte.
    fn asym_encrypt_two_byte_pad(&self) -> bool;
    /// Whether the pad count on received OPN payloads has a second byte.
    fn asym_decrypt_two_byte_pad(&self) -> bool;

    /// Derive both directions of symmetric keys from the exchanged nonces.
    fn derive_keys(&mut self, client_nonce: &[u8], server_nonce: &[u8])
        -> Result<(), CryptoError>;

    // Symmetric, used for MSG and CLO.
    fn sym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn sym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn sym_sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn sym_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError>;

    fn sym_signature_length(&self) -> usize;
    /// Cipher block size; 1 when the policy does not encrypt.
    fn sym_block_size(&self) -> usize;
}

// ── Policy None ───────────────────────────────────────────────────────────────

/// Identity suite for policy None: nothing is signed or encrypted.
pub struct NullCrypto;

impl CryptoSuite for NullCrypto {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn asym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn asym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }

    fn asym_sign(&self, _data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Vec::new())
    }

    fn asym_verify(&self, _data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        if signature.is_empty() {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }

    fn asym_plain_block_size(&self) -> usize {
        0
    }

    fn asym_cipher_block_size(&self) -> usize {
        0
    }

    fn asym_decrypt_plain_block_size(&self) -> usize {
        0
    }

    fn asym_local_signature_length(&self) -> usize {
        0
    }

    fn asym_remote_signature_length(&self) -> usize {
        0
    }

    fn asym_encrypt_two_byte_pad(&self) -> bool {
        false
    }

    fn asym_decrypt_two_byte_pad(&self) -> bool {
        false
    }

    fn derive_keys(
        &mut self,
        _client_nonce: &[u8],
        _server_nonce: &[u8],
    ) -> Result<(), CryptoError> {
        Ok(())
    }

    fn sym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(plaintext.to_vec())
    }

    fn sym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(ciphertext.to_vec())
    }

    fn sym_sign(&self, _data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(Vec::new())
    }

    fn sym_verify(&self, _data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        if signature.is_empty() {
            Ok(())
        } else {
            Err(CryptoError::BadSignature)
        }
    }

    fn sym_signature_length(&self) -> usize {
        0
    }

    fn sym_block_size(&self) -> usize {
        1
    }
}

// ── Basic256Sha256 ────────────────────────────────────────────────────────────

pub struct Basic256Sha256Crypto {
    local_key: RsaPrivateKey,
    remote_key: RsaPublicKey,
    keys: Option<ChannelKeys>,
}

impl Basic256Sha256Crypto {
    fn keys(&self) -> Result<&ChannelKeys, CryptoError> {
        self.keys.as_ref().ok_or(CryptoError::KeysNotDerived)
    }
}

impl CryptoSuite for Basic256Sha256Crypto {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::Basic256Sha256
    }

    fn asym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.asym_plain_block_size();
        if plaintext.len() % block != 0 {
            return Err(CryptoError::Misaligned {
                len: plaintext.len(),
                block,
            });
        }
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(
            plaintext.len() / block * self.asym_cipher_block_size(),
        );
        for chunk in plaintext.chunks(block) {
            let encrypted = self
                .remote_key
                .encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)
                .map_err(|_| CryptoError::EncryptFailed)?;
            out.extend_from_slice(&encrypted);
        }
        Ok(out)
    }

    fn asym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let block = self.local_key.size();
        if ciphertext.is_empty() || ciphertext.len() % block != 0 {
            return Err(CryptoError::Misaligned {
                len: ciphertext.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(ciphertext.len());
        for chunk in ciphertext.chunks(block) {
            let decrypted = self
                .local_key
                .decrypt(Oaep::new::<Sha1>(), chunk)
                .map_err(|_| CryptoError::DecryptFailed)?;
            out.extend_from_slice(&decrypted);
        }
        Ok(out)
    }

    fn asym_sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signing_key = SigningKey::<Sha256>::new(self.local_key.clone());
        Ok(signing_key.sign(data).to_vec())
    }

    fn asym_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::<Sha256>::new(self.remote_key.clone());
        let signature = Signature::try_from(signature).map_err(|_| CryptoError::BadSignature)?;
        verifying_key
            .verify(data, &signature)
            .map_err(|_| CryptoError::BadSignature)
    }

    fn asym_plain_block_size(&self) -> usize {
        self.remote_key.size() - OAEP_SHA1_OVERHEAD
    }

    fn asym_cipher_block_size(&self) -> usize {
        self.remote_key.size()
    }

    fn asym_decrypt_plain_block_size(&self) -> usize {
        self.local_key.size() - OAEP_SHA1_OVERHEAD
    }

    fn asym_local_signature_length(&self) -> usize {
        self.local_key.size()
    }

    fn asym_remote_signature_length(&self) -> usize {
        self.remote_key.size()
    }

    fn asym_encrypt_two_byte_pad(&self) -> bool {
        self.remote_key.size() > SINGLE_PAD_BYTE_MAX_KEY
    }

    fn asym_decrypt_two_byte_pad(&self) -> bool {
        self.local_key.size() > SINGLE_PAD_BYTE_MAX_KEY
    }

    fn derive_keys(
        &mut self,
        client_nonce: &[u8],
        server_nonce: &[u8],
    ) -> Result<(), CryptoError> {
        let expected = self.policy().nonce_length();
        for nonce in [client_nonce, server_nonce] {
            if nonce.len() != expected {
                return Err(CryptoError::BadNonce {
                    expected,
                    got: nonce.len(),
                });
            }
        }
        self.keys = Some(derive_channel_keys(
            client_nonce,
            server_nonce,
            self.policy().key_sizes(),
        ));
        Ok(())
    }

    fn sym_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = &self.keys()?.client;
        if plaintext.len() % 16 != 0 {
            return Err(CryptoError::Misaligned {
                len: plaintext.len(),
                block: 16,
            });
        }
        let cipher = Aes256CbcEnc::new_from_slices(&keys.encryption_key, &keys.iv)
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut buf = plaintext.to_vec();
        let len = buf.len();
        cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| CryptoError::EncryptFailed)?;
        Ok(buf)
    }

    fn sym_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = &self.keys()?.server;
        if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
            return Err(CryptoError::Misaligned {
                len: ciphertext.len(),
                block: 16,
            });
        }
        let cipher = Aes256CbcDec::new_from_slices(&keys.encryption_key, &keys.iv)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let mut buf = ciphertext.to_vec();
        cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| CryptoError::DecryptFailed)?;
        Ok(buf)
    }

    fn sym_sign(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = &self.keys()?.client;
        let mut mac = HmacSha256::new_from_slice(&keys.signing_key)
            .map_err(|_| CryptoError::KeysNotDerived)?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn sym_verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let keys = &self.keys()?.server;
        let mut mac = HmacSha256::new_from_slice(&keys.signing_key)
            .map_err(|_| CryptoError::KeysNotDerived)?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| CryptoError::BadSignature)
    }

    fn sym_signature_length(&self) -> usize {
        32
    }

    fn sym_block_size(&self) -> usize {
        16
    }
}

// ── Standalone secret encryption ──────────────────────────────────────────────

/// Encrypt an identity-token secret toward a server certificate under the
/// named policy. Used for password tokens; the caller prepends the length
/// word before calling. Policy None returns the input unchanged.
pub fn encrypt_secret(
    policy: SecurityPolicy,
    server_certificate_der: &[u8],
    secret: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match policy {
        SecurityPolicy::None => Ok(secret.to_vec()),
        SecurityPolicy::Basic256Sha256 => {
            let certificate = Certificate::from_der(server_certificate_der)?;
            let key = certificate.rsa_public_key()?;
            let block = key.size() - OAEP_SHA1_OVERHEAD;
            let mut rng = rand::thread_rng();
            let mut out = Vec::new();
            for chunk in secret.chunks(block) {
                let encrypted = key
                    .encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)
                    .map_err(|_| CryptoError::EncryptFailed)?;
                out.extend_from_slice(&encrypted);
            }
            Ok(out)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
