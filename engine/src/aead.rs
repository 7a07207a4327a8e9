//! AES-256-GCM envelope used for every encrypted protocol message.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::RecoveryError;
use crate::types::AeadPayload;

/// GCM nonce length.
pub const AES_GCM_IV_SIZE: usize = 12;
/// GCM authentication tag length.
pub const AES_GCM_TAG_SIZE: usize = 16;

fn cipher_for_key(key: &[u8]) -> Result<Aes256Gcm, RecoveryError> {
    if key.len() != 32 {
        return Err(RecoveryError::StructuralDecode(format!(
            "AES-256-GCM key must be 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)))
}

/// Encrypt `plaintext` bound to `associated_data`. A fresh random IV is
/// drawn per call so a key is never paired with a repeated nonce.
pub fn encrypt(
    plaintext: &[u8],
    associated_data: &[u8],
    key: &[u8],
) -> Result<AeadPayload, RecoveryError> {
    let cipher = cipher_for_key(key)?;

    let mut iv = [0u8; AES_GCM_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut combined = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| RecoveryError::StructuralDecode("AES-GCM encryption failed".into()))?;

    // aes-gcm appends the tag to the ciphertext; the wire format carries
    // them as separate fields.
    let tag = combined.split_off(combined.len() - AES_GCM_TAG_SIZE);
    Ok(AeadPayload {
        cipher_text: combined,
        associated_data: associated_data.to_vec(),
        iv: iv.to_vec(),
        tag,
    })
}

/// Decrypt and authenticate. Any tag, ciphertext, or associated-data
/// mismatch yields the same opaque [`RecoveryError::Authentication`] with no
/// partial plaintext.
pub fn decrypt(payload: &AeadPayload, key: &[u8]) -> Result<Vec<u8>, RecoveryError> {
    let cipher = cipher_for_key(key)?;

    if payload.iv.len() != AES_GCM_IV_SIZE || payload.tag.len() != AES_GCM_TAG_SIZE {
        return Err(RecoveryError::Authentication);
    }

    let mut combined = Vec::with_capacity(payload.cipher_text.len() + AES_GCM_TAG_SIZE);
    combined.extend_from_slice(&payload.cipher_text);
    combined.extend_from_slice(&payload.tag);

    cipher
        .decrypt(
            Nonce::from_slice(&payload.iv),
            Payload {
                msg: &combined,
                aad: &payload.associated_data,
            },
        )
        .map_err(|_| RecoveryError::Authentication)
}
