//! Block-cipher padding for secured chunks.
//!
//! Symmetric form: `[data][pad_byte × pad_count][pad_count]` where
//! `(data + pad_count + 1)` is a whole number of cipher blocks and every
//! padding byte equals the trailing count byte. Asymmetric form is the same
//! scheme against the RSA plaintext block size, with a second (high) count
//! byte when the key is longer than 2048 bits.

use super::CryptoError;

/// Append symmetric padding in place. `block_size` must be a power of two in
/// practice (16 for AES) but any non-zero size works.
pub fn apply(data: &mut Vec<u8>, block_size: usize) {
    let pad_count = (block_size - (data.len() + 1) % block_size) % block_size;
    debug_assert!(pad_count < 256);
    data.resize(data.len() + pad_count, pad_count as u8);
    data.push(pad_count as u8);
}

/// Verify and strip symmetric padding, returning the unpadded length.
///
/// Every padding byte is inspected regardless of where the first mismatch
/// occurs, so the comparison cost does not depend on the data.
pub fn strip(data: &[u8], block_size: usize) -> Result<usize, CryptoError> {
    if data.is_empty() || data.len() % block_size != 0 {
        return Err(CryptoError::BadPadding);
    }
    let pad_count = data[data.len() - 1] as usize;
    if pad_count >= block_size || pad_count + 1 > data.len() {
        return Err(CryptoError::BadPadding);
    }
    let body_len = data.len() - pad_count - 1;
    let mut mismatch = 0u8;
    for &byte in &data[body_len..data.len() - 1] {
        mismatch |= byte ^ pad_count as u8;
    }
    if mismatch != 0 {
        return Err(CryptoError::BadPadding);
    }
    Ok(body_len)
}

/// Append asymmetric padding in place against the RSA plaintext block size.
/// `two_byte_count` is set for keys above 2048 bits, where the pad count can
/// exceed one byte; the low byte is stored first, then the high byte.
pub fn apply_asym(data: &mut Vec<u8>, block_size: usize, two_byte_count: bool) {
    let overhead = if two_byte_count { 2 } else { 1 };
    let pad_count = (block_size - (data.len() + overhead) % block_size) % block_size;
    let low = (pad_count & 0xff) as u8;
    data.resize(data.len() + pad_count, low);
    data.push(low);
    if two_byte_count {
        data.push((pad_count >> 8) as u8);
    }
}

/// Verify and strip asymmetric padding, returning the unpadded length.
pub fn strip_asym(
    data: &[u8],
    block_size: usize,
    two_byte_count: bool,
) -> Result<usize, CryptoError> {
    let overhead = if two_byte_count { 2 } else { 1 };
    if data.len() < overhead || data.len() % block_size != 0 {
        return Err(CryptoError::BadPadding);
    }
    let pad_count = if two_byte_count {
        let low = data[data.len() - 2] as usize;
        let high = data[data.len() - 1] as usize;
        (high << 8) | low
    } else {
        data[data.len() - 1] as usize
    };
    if pad_count + overhead > data.len() {
        return Err(CryptoError::BadPadding);
    }
    let body_len = data.len() - pad_count - overhead;
    let low = (pad_count & 0xff) as u8;
    let mut mismatch = 0u8;
    for &byte in &data[body_len..body_len + pad_count] {
        mismatch |= byte ^ low;
    }
    if mismatch != 0 {
        return Err(CryptoError::BadPadding);
    }
    Ok(body_len)
}
