//! Symmetric key derivation from the handshake nonces.
//!
//! P_SHA256 as defined for the secure-channel key material:
//! `A(0) = seed`, `A(i) = HMAC(secret, A(i-1))`, output is the concatenation
//! of `HMAC(secret, A(i) || seed)` truncated to the requested length. For the
//! client→server keys the server nonce is the secret and the client nonce the
//! seed; the server→client keys swap the two.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Key material for one direction. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub signing_key: Vec<u8>,
    pub encryption_key: Vec<u8>,
    pub iv: Vec<u8>,
}

/// Both directions of a secure channel token.
#[derive(Clone)]
pub struct ChannelKeys {
    /// Keys this client signs and encrypts with.
    pub client: DerivedKeys,
    /// Keys the server's messages are verified and decrypted with.
    pub server: DerivedKeys,
}

/// Sizes of the derived partitions, fixed per security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySizes {
    pub signing_key: usize,
    pub encryption_key: usize,
    pub iv: usize,
}

impl KeySizes {
    pub const fn total(self) -> usize {
        self.signing_key + self.encryption_key + self.iv
    }
}

/// The P_SHA256 pseudo-random function.
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(length);
    let mut a = seed.to_vec();
    while output.len() < length {
        // A(i) = HMAC(secret, A(i-1))
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&a);
        a = mac.finalize().into_bytes().to_vec();

        // output chunk = HMAC(secret, A(i) || seed)
        let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(&a);
        mac.update(seed);
        output.extend_from_slice(&mac.finalize().into_bytes());
    }
    output.truncate(length);
    output
}

fn partition(mut material: Vec<u8>, sizes: KeySizes) -> DerivedKeys {
    let iv = material.split_off(sizes.signing_key + sizes.encryption_key);
    let encryption_key = material.split_off(sizes.signing_key);
    DerivedKeys {
        signing_key: material,
        encryption_key,
        iv,
    }
}

/// Derive both directions of channel key material.
pub fn derive_channel_keys(client_nonce: &[u8], server_nonce: &[u8], sizes: KeySizes) -> ChannelKeys {
    ChannelKeys {
        client: partition(p_sha256(server_nonce, client_nonce, sizes.total()), sizes),
        server: partition(p_sha256(client_nonce, server_nonce, sizes.total()), sizes),
    }
}
