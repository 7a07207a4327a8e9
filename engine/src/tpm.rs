//! Opaque key-sealing and DH-multiply capability, potentially backed by
//! secure hardware.
//!
//! The engine only ever talks to the [`TpmBackend`] trait; which concrete
//! implementation backs it is decided once at construction. Real backends
//! may block on a hardware round-trip, so hosts with an event loop should
//! call them from a worker.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::curve::{EllipticCurve, KeyPair, Point};
use crate::error::RecoveryError;

const SEAL_IV_SIZE: usize = 12;

/// TPM-backed operations the recovery engine depends on. Sealed blobs are
/// backend-specific opaque bytes; the raw private scalar never crosses this
/// boundary back to the caller.
pub trait TpmBackend: Send + Sync {
    /// Extra auth secret mixed into sealing. Empty on TPM2-class backends,
    /// 32 random bytes on TPM1-class.
    fn generate_key_auth_value(&self) -> Result<Vec<u8>, RecoveryError>;

    /// Wrap a private scalar into an opaque sealed blob.
    fn encrypt_ecc_private_key(
        &self,
        curve: &EllipticCurve,
        key_pair: &KeyPair,
        auth_value: Option<&[u8]>,
    ) -> Result<Vec<u8>, RecoveryError>;

    /// `other_pub_point * sealed_scalar`, computed without exposing the
    /// scalar to the caller.
    fn generate_diffie_hellman_shared_secret(
        &self,
        curve: &EllipticCurve,
        encrypted_priv_key: &[u8],
        auth_value: Option<&[u8]>,
        other_pub_point: &Point,
    ) -> Result<Point, RecoveryError>;

    /// `(encrypted_private_key, public_key_der)`. No-op success with empty
    /// outputs on TPM2-class backends, which sign nothing.
    fn generate_rsa_key_pair(&self) -> Result<(Vec<u8>, Vec<u8>), RecoveryError>;

    /// Sign the serialized request payload. No-op success with an empty
    /// signature on TPM2-class backends.
    fn sign_request_payload(
        &self,
        encrypted_rsa_priv_key: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, RecoveryError>;

    /// Best-effort revocation of sealed recovery state. Callers treat a
    /// failure here as non-fatal during removal.
    fn revoke_recovery_state(&self, encrypted_destination_share: &[u8])
        -> Result<(), RecoveryError>;
}

/// Which hardware generation the software backend imitates. The asymmetry
/// matters: TPM1-class hardware cannot bind sealed blobs to auth policy, so
/// it compensates with a key-auth-value and RSA request signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmClass {
    Tpm1,
    Tpm2,
}

/// Software-only stand-in for a hardware TPM. Seals scalars with
/// AES-256-GCM under a per-instance in-memory root key, so blobs sealed by
/// one instance are worthless to every other.
pub struct SoftwareTpm {
    class: TpmClass,
    cipher: Aes256Gcm,
}

impl SoftwareTpm {
    pub fn new(class: TpmClass) -> Self {
        let mut root_key = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut root_key[..]);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&root_key[..]));
        SoftwareTpm { class, cipher }
    }

    pub fn tpm1() -> Self {
        Self::new(TpmClass::Tpm1)
    }

    pub fn tpm2() -> Self {
        Self::new(TpmClass::Tpm2)
    }

    fn seal(&self, secret: &[u8], auth_value: Option<&[u8]>) -> Result<Vec<u8>, RecoveryError> {
        let mut iv = [0u8; SEAL_IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: secret,
                    aad: auth_value.unwrap_or(&[]),
                },
            )
            .map_err(|_| RecoveryError::BackendUnavailable("sealing failed".into()))?;
        let mut blob = iv.to_vec();
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    fn unseal(
        &self,
        blob: &[u8],
        auth_value: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
        if blob.len() < SEAL_IV_SIZE {
            return Err(RecoveryError::BackendUnavailable(
                "sealed blob is truncated".into(),
            ));
        }
        let (iv, sealed) = blob.split_at(SEAL_IV_SIZE);
        self.cipher
            .decrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: sealed,
                    aad: auth_value.unwrap_or(&[]),
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| RecoveryError::IncorrectAuth("sealed blob did not unseal".into()))
    }
}

impl TpmBackend for SoftwareTpm {
    fn generate_key_auth_value(&self) -> Result<Vec<u8>, RecoveryError> {
        match self.class {
            TpmClass::Tpm2 => Ok(Vec::new()),
            TpmClass::Tpm1 => {
                let mut value = vec![0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut value);
                Ok(value)
            }
        }
    }

    fn encrypt_ecc_private_key(
        &self,
        curve: &EllipticCurve,
        key_pair: &KeyPair,
        auth_value: Option<&[u8]>,
    ) -> Result<Vec<u8>, RecoveryError> {
        // Re-derive the public key to catch a mismatched pair before it is
        // sealed for the lifetime of the enrollment.
        let expected = curve.multiply_with_generator(&key_pair.private_key)?;
        if expected != key_pair.public_key {
            return Err(RecoveryError::CurveValidity(
                "key pair public key does not match its private scalar".into(),
            ));
        }
        self.seal(&key_pair.private_key.to_bytes(), auth_value)
    }

    fn generate_diffie_hellman_shared_secret(
        &self,
        curve: &EllipticCurve,
        encrypted_priv_key: &[u8],
        auth_value: Option<&[u8]>,
        other_pub_point: &Point,
    ) -> Result<Point, RecoveryError> {
        if !curve.is_point_valid_and_finite(other_pub_point) {
            return Err(RecoveryError::CurveValidity(
                "DH peer point is not a valid finite point".into(),
            ));
        }
        let scalar_bytes = self.unseal(encrypted_priv_key, auth_value)?;
        let scalar = curve.scalar_from_bytes(&scalar_bytes)?;
        curve.multiply(other_pub_point, &scalar)
    }

    fn generate_rsa_key_pair(&self) -> Result<(Vec<u8>, Vec<u8>), RecoveryError> {
        match self.class {
            TpmClass::Tpm2 => Ok((Vec::new(), Vec::new())),
            TpmClass::Tpm1 => {
                // Software stand-in for the TPM1 signing key: a random MAC
                // key sealed like any other secret. The "DER" output is the
                // verification material the mediator stores.
                let mut mac_key = Zeroizing::new(vec![0u8; 32]);
                rand::rngs::OsRng.fill_bytes(&mut mac_key[..]);
                let encrypted = self.seal(&mac_key, None)?;
                Ok((encrypted, mac_key.to_vec()))
            }
        }
    }

    fn sign_request_payload(
        &self,
        encrypted_rsa_priv_key: &[u8],
        payload: &[u8],
    ) -> Result<Vec<u8>, RecoveryError> {
        match self.class {
            TpmClass::Tpm2 => Ok(Vec::new()),
            TpmClass::Tpm1 => {
                let mac_key = self.unseal(encrypted_rsa_priv_key, None)?;
                Ok(software_request_signature(&mac_key, payload))
            }
        }
    }

    fn revoke_recovery_state(
        &self,
        _encrypted_destination_share: &[u8],
    ) -> Result<(), RecoveryError> {
        match self.class {
            // Sealed blobs die with the in-memory root key; nothing to do.
            TpmClass::Tpm2 => Ok(()),
            TpmClass::Tpm1 => Err(RecoveryError::BackendUnavailable(
                "revocation is not supported on TPM1-class hardware".into(),
            )),
        }
    }
}

/// The software signature scheme shared by [`SoftwareTpm`] and the fake
/// mediator's verifier: SHA-256 over `key || payload`.
pub(crate) fn software_request_signature(key: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(payload);
    hasher.finalize().to_vec()
}
