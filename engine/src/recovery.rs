//! The dealer/publisher/mediator/destination protocol state machine.
//!
//! Enrollment (`generate_hsm_payload`) runs once and its output is reused
//! across many later recovery attempts; request generation, response
//! decryption, and destination recovery run once per attempt, strictly in
//! order. No phase retries internally except the documented
//! redraw-until-nonzero loops in share dealing.

use std::sync::Arc;

use rand::RngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::aead;
use crate::curve::{CurveType, EllipticCurve, Point, Scalar};
use crate::ecdh;
use crate::error::RecoveryError;
use crate::logging::key_fingerprint;
use crate::tpm::TpmBackend;
use crate::types::{
    AeadPayload, EpochResponse, HsmAssociatedData, HsmPlainText, HsmResponseAssociatedData,
    HsmResponsePlainText, OnboardingMetadata, RecoveryRequest, RecoveryRequestAssociatedData,
    RecoveryRequestPlainText,
};
use crate::wire::{self, schema};

const PHASE_ENROLL: &str = "GenerateHsmPayload";
const PHASE_REQUEST: &str = "GenerateRecoveryRequest";
const PHASE_RESPONSE: &str = "DecryptResponsePayload";
const PHASE_DESTINATION: &str = "RecoverDestination";

const REQUEST_SALT_SIZE: usize = 32;

/// Everything enrollment produces. The AEAD payload and the sealed blobs
/// are persisted by the caller; the recovery key wraps the disk-encryption
/// key and is then discarded.
pub struct GeneratedHsmPayload {
    /// Persisted on-device and embedded in every later recovery request.
    pub hsm_payload: AeadPayload,
    /// Destination share, sealed by the TPM capability.
    pub encrypted_destination_share: Vec<u8>,
    /// Channel private scalar, sealed by the TPM capability.
    pub encrypted_channel_priv_key: Vec<u8>,
    pub channel_pub_key: Point,
    /// Empty on TPM2-class backends.
    pub encrypted_rsa_priv_key: Vec<u8>,
    /// Key-auth-value guarding the destination share; empty on TPM2-class.
    pub key_auth_value: Vec<u8>,
    pub recovery_key: Zeroizing<Vec<u8>>,
}

/// A generated request plus the ephemeral public key the caller must
/// retain for destination recovery.
pub struct GeneratedRecoveryRequest {
    /// Encoded `{protocol_version, cbor_payload}` envelope for the mediator.
    pub request: Vec<u8>,
    /// `G * x`; recover_destination needs it to undo the mediator's
    /// inversion.
    pub ephemeral_pub_key: Point,
}

/// The recovery cryptography engine. Holds the protocol curve (always
/// P-256) and the TPM capability chosen at construction.
pub struct RecoveryCrypto {
    curve: EllipticCurve,
    tpm: Arc<dyn TpmBackend>,
}

fn auth_opt(key_auth_value: &[u8]) -> Option<&[u8]> {
    if key_auth_value.is_empty() {
        None
    } else {
        Some(key_auth_value)
    }
}

impl RecoveryCrypto {
    pub fn new(tpm: Arc<dyn TpmBackend>) -> Self {
        RecoveryCrypto {
            curve: EllipticCurve::new(CurveType::P256),
            tpm,
        }
    }

    pub fn curve(&self) -> &EllipticCurve {
        &self.curve
    }

    /// Split a fresh secret into mediator and destination shares: draw the
    /// mediator share until `mediator + destination != 0 (mod order)`.
    /// Returns `(mediator_share, secret)`.
    pub(crate) fn deal_mediator_share(
        &self,
        destination_share: &Scalar,
    ) -> Result<(Scalar, Scalar), RecoveryError> {
        loop {
            let mediator_share = self.curve.random_nonzero_scalar();
            let secret = self.curve.mod_add(&mediator_share, destination_share)?;
            if !secret.is_zero() {
                return Ok((mediator_share, secret));
            }
        }
    }

    /// `HKDF(X(shared_point), info = dealer_pub || wrapping-key suffix)`.
    /// Both enrollment and destination recovery reduce to this derivation;
    /// preserving that identity is the core correctness requirement.
    fn derive_recovery_key(
        &self,
        shared_point: &Point,
        dealer_pub_key: &Point,
    ) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
        let shared_secret = ecdh::shared_secret_x_coordinate(&self.curve, shared_point)?;
        ecdh::derive_symmetric_key(
            &shared_secret,
            schema::RECOVERY_KEY_HKDF_INFO,
            &self.curve.point_to_bytes(dealer_pub_key)?,
            &[],
            ecdh::AES_256_KEY_SIZE,
        )
    }

    /// Phase A: enrollment. Deals the shares, encrypts the mediator share
    /// to the mediator's public key, and derives the recovery key.
    pub fn generate_hsm_payload(
        &self,
        mediator_pub_key: &Point,
        onboarding_metadata: &OnboardingMetadata,
    ) -> Result<GeneratedHsmPayload, RecoveryError> {
        let phase = PHASE_ENROLL;
        if !self.curve.is_point_valid_and_finite(mediator_pub_key) {
            return Err(RecoveryError::CurveValidity(
                "mediator public key is not a valid finite point".into(),
            )
            .in_phase(phase, "validate mediator key"));
        }

        let dealer = self
            .curve
            .generate_key_pair()
            .map_err(|e| e.in_phase(phase, "dealer key pair"))?;

        let key_auth_value = self
            .tpm
            .generate_key_auth_value()
            .map_err(|e| e.in_phase(phase, "key auth value"))?;

        let destination = self
            .curve
            .generate_key_pair()
            .map_err(|e| e.in_phase(phase, "destination share"))?;
        let encrypted_destination_share = self
            .tpm
            .encrypt_ecc_private_key(&self.curve, &destination, auth_opt(&key_auth_value))
            .map_err(|e| e.in_phase(phase, "seal destination share"))?;

        let (mediator_share, secret) = self
            .deal_mediator_share(&destination.private_key)
            .map_err(|e| e.in_phase(phase, "deal mediator share"))?;
        let recovery_pub_point = self
            .curve
            .multiply_with_generator(&secret)
            .map_err(|e| e.in_phase(phase, "recovery public point"))?;

        let (encrypted_rsa_priv_key, rsa_public_key) = self
            .tpm
            .generate_rsa_key_pair()
            .map_err(|e| e.in_phase(phase, "rsa key pair"))?;

        let channel = self
            .curve
            .generate_key_pair()
            .map_err(|e| e.in_phase(phase, "channel key pair"))?;
        let encrypted_channel_priv_key = self
            .tpm
            .encrypt_ecc_private_key(&self.curve, &channel, None)
            .map_err(|e| e.in_phase(phase, "seal channel key"))?;

        // Publisher key pair is used once to encrypt this payload, then
        // dropped (and zeroized) with this scope.
        let publisher = self
            .curve
            .generate_key_pair()
            .map_err(|e| e.in_phase(phase, "publisher key pair"))?;

        let associated_data = wire::encode(&HsmAssociatedData {
            publisher_pub_key: self.curve.point_to_bytes(&publisher.public_key)?,
            channel_pub_key: self.curve.point_to_bytes(&channel.public_key)?,
            rsa_public_key,
            onboarding_meta_data: onboarding_metadata.clone(),
        })
        .map_err(|e| e.in_phase(phase, "encode associated data"))?;

        let plain_text = Zeroizing::new(
            wire::encode(&HsmPlainText {
                mediator_share: mediator_share.to_bytes(),
                dealer_pub_key: self.curve.point_to_bytes(&dealer.public_key)?,
                key_auth_value: key_auth_value.clone(),
            })
            .map_err(|e| e.in_phase(phase, "encode plain text"))?,
        );

        let aead_key = ecdh::generate_ecdh_hkdf_sender_key(
            &self.curve,
            mediator_pub_key,
            &publisher.public_key,
            &publisher.private_key,
            schema::MEDIATOR_SHARE_HKDF_INFO,
            &[],
            ecdh::AES_256_KEY_SIZE,
        )
        .map_err(|e| e.in_phase(phase, "derive payload key"))?;

        let hsm_payload = aead::encrypt(&plain_text, &associated_data, &aead_key)
            .map_err(|e| e.in_phase(phase, "encrypt payload"))?;

        let dealer_dh = self
            .curve
            .multiply(&recovery_pub_point, &dealer.private_key)
            .map_err(|e| e.in_phase(phase, "recovery key point"))?;
        let recovery_key = self
            .derive_recovery_key(&dealer_dh, &dealer.public_key)
            .map_err(|e| e.in_phase(phase, "derive recovery key"))?;

        debug!(
            dealer = key_fingerprint(dealer.public_key.as_bytes()),
            channel = key_fingerprint(channel.public_key.as_bytes()),
            "generated HSM payload"
        );

        Ok(GeneratedHsmPayload {
            hsm_payload,
            encrypted_destination_share,
            encrypted_channel_priv_key,
            channel_pub_key: channel.public_key,
            encrypted_rsa_priv_key,
            key_auth_value,
            recovery_key,
        })
    }

    /// Phase B: build and sign the per-attempt request for the mediator.
    pub fn generate_recovery_request(
        &self,
        hsm_payload: &AeadPayload,
        request_meta_data: &[u8],
        epoch: &EpochResponse,
        encrypted_rsa_priv_key: &[u8],
        encrypted_channel_priv_key: &[u8],
    ) -> Result<GeneratedRecoveryRequest, RecoveryError> {
        let phase = PHASE_REQUEST;

        // The channel and epoch keys are both long-lived relative to one
        // request, so the salt must be random per attempt; a fixed salt
        // would link requests and weaken the derivation.
        let mut salt = vec![0u8; REQUEST_SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let associated_data = wire::encode(&RecoveryRequestAssociatedData {
            hsm_payload: hsm_payload.clone(),
            request_meta_data: request_meta_data.to_vec(),
            epoch_meta_data: epoch.epoch_meta_data.clone(),
            epoch_pub_key: epoch.epoch_pub_key.clone(),
            request_payload_salt: salt.clone(),
            schema_version: schema::SCHEMA_VERSION,
        })
        .map_err(|e| e.in_phase(phase, "encode associated data"))?;

        let epoch_pub_point = self
            .curve
            .bytes_to_point(&epoch.epoch_pub_key)
            .map_err(|e| e.in_phase(phase, "decode epoch key"))?;
        let shared_point = self
            .tpm
            .generate_diffie_hellman_shared_secret(
                &self.curve,
                encrypted_channel_priv_key,
                None,
                &epoch_pub_point,
            )
            .map_err(|e| e.in_phase(phase, "channel DH"))?;
        let shared_secret = ecdh::shared_secret_x_coordinate(&self.curve, &shared_point)
            .map_err(|e| e.in_phase(phase, "shared secret"))?;
        let aead_key = ecdh::derive_symmetric_key(
            &shared_secret,
            schema::REQUEST_PAYLOAD_HKDF_INFO,
            &epoch.epoch_pub_key,
            &salt,
            ecdh::AES_256_KEY_SIZE,
        )
        .map_err(|e| e.in_phase(phase, "derive request key"))?;

        // Fresh ephemeral pair per attempt; the mediator receives G*(-x)
        // and the device keeps G*x for destination recovery.
        let ephemeral = self
            .curve
            .generate_key_pair()
            .map_err(|e| e.in_phase(phase, "ephemeral key pair"))?;
        let inverted_scalar = self
            .curve
            .mod_negate(&ephemeral.private_key)
            .map_err(|e| e.in_phase(phase, "invert ephemeral"))?;
        let ephemeral_inv_pub = self
            .curve
            .multiply_with_generator(&inverted_scalar)
            .map_err(|e| e.in_phase(phase, "ephemeral inverse point"))?;

        let plain_text = Zeroizing::new(
            wire::encode(&RecoveryRequestPlainText {
                ephemeral_pub_inv_key: self.curve.point_to_bytes(&ephemeral_inv_pub)?,
            })
            .map_err(|e| e.in_phase(phase, "encode plain text"))?,
        );

        let request_payload = aead::encrypt(&plain_text, &associated_data, &aead_key)
            .map_err(|e| e.in_phase(phase, "encrypt request"))?;
        let payload_bytes = wire::encode(&request_payload)
            .map_err(|e| e.in_phase(phase, "encode request payload"))?;
        let rsa_signature = self
            .tpm
            .sign_request_payload(encrypted_rsa_priv_key, &payload_bytes)
            .map_err(|e| e.in_phase(phase, "sign request"))?;

        let request_bytes = wire::encode(&RecoveryRequest {
            request_payload,
            rsa_signature,
        })
        .map_err(|e| e.in_phase(phase, "encode request"))?;
        let request = wire::encode_envelope(request_bytes)
            .map_err(|e| e.in_phase(phase, "encode envelope"))?;

        debug!(
            ephemeral = key_fingerprint(ephemeral.public_key.as_bytes()),
            "generated recovery request"
        );

        Ok(GeneratedRecoveryRequest {
            request,
            ephemeral_pub_key: ephemeral.public_key,
        })
    }

    /// Phase D: decrypt the mediator's response. Authentication failures
    /// here are tagged transient: the usual cause is a stale epoch, and the
    /// caller's retry policy depends on telling that apart from the other
    /// failure kinds.
    pub fn decrypt_response_payload(
        &self,
        encrypted_channel_priv_key: &[u8],
        epoch: &EpochResponse,
        response: &[u8],
    ) -> Result<HsmResponsePlainText, RecoveryError> {
        let phase = PHASE_RESPONSE;

        let payload_bytes = wire::decode_envelope(response)
            .map_err(|e| e.in_phase(phase, "decode envelope"))?;
        let response_payload: AeadPayload = wire::decode(&payload_bytes)
            .map_err(|e| e.in_phase(phase, "decode response payload"))?;
        let response_ad: HsmResponseAssociatedData =
            wire::decode(&response_payload.associated_data)
                .map_err(|e| e.in_phase(phase, "decode associated data"))?;

        let epoch_pub_point = self
            .curve
            .bytes_to_point(&epoch.epoch_pub_key)
            .map_err(|e| e.in_phase(phase, "decode epoch key"))?;
        let shared_point = self
            .tpm
            .generate_diffie_hellman_shared_secret(
                &self.curve,
                encrypted_channel_priv_key,
                None,
                &epoch_pub_point,
            )
            .map_err(|e| e.in_phase(phase, "channel DH"))?;
        let shared_secret = ecdh::shared_secret_x_coordinate(&self.curve, &shared_point)
            .map_err(|e| e.in_phase(phase, "shared secret"))?;
        // Server-chosen salt: this key is derived once per response, so
        // unlike the request leg there is no linkage concern.
        let aead_key = ecdh::derive_symmetric_key(
            &shared_secret,
            schema::RESPONSE_PAYLOAD_HKDF_INFO,
            &epoch.epoch_pub_key,
            &response_ad.response_salt,
            ecdh::AES_256_KEY_SIZE,
        )
        .map_err(|e| e.in_phase(phase, "derive response key"))?;

        let plain_text = match aead::decrypt(&response_payload, &aead_key) {
            Ok(bytes) => Zeroizing::new(bytes),
            Err(RecoveryError::Authentication) => {
                return Err(RecoveryError::Transient(
                    "response payload did not decrypt; the epoch may be stale".into(),
                )
                .in_phase(phase, "decrypt response"));
            }
            Err(other) => return Err(other.in_phase(phase, "decrypt response")),
        };

        let response_pt: HsmResponsePlainText = wire::decode(&plain_text)
            .map_err(|e| e.in_phase(phase, "decode plain text"))?;
        // Surface malformed mediator output here, not at first use.
        self.curve
            .bytes_to_point(&response_pt.mediated_point)
            .map_err(|e| e.in_phase(phase, "validate mediated point"))?;
        self.curve
            .bytes_to_point(&response_pt.dealer_pub_key)
            .map_err(|e| e.in_phase(phase, "validate dealer key"))?;
        Ok(response_pt)
    }

    /// Phase E: recombine the shares into the destination recovery key.
    ///
    /// On an untampered round trip the result is byte-identical to the
    /// enrollment-time recovery key: both sides reduce to
    /// `HKDF(X(G * secret * a))`. Independently valid but wrong inputs
    /// still succeed; they just derive a different key, which the caller
    /// detects when unwrapping fails.
    pub fn recover_destination(
        &self,
        response: &HsmResponsePlainText,
        key_auth_value: &[u8],
        encrypted_destination_share: &[u8],
        ephemeral_pub_key: &Point,
    ) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
        let phase = PHASE_DESTINATION;

        let mediated_point = self
            .curve
            .bytes_to_point(&response.mediated_point)
            .map_err(|e| e.in_phase(phase, "decode mediated point"))?;
        let dealer_pub_key = self
            .curve
            .bytes_to_point(&response.dealer_pub_key)
            .map_err(|e| e.in_phase(phase, "decode dealer key"))?;

        // Undo the inversion the mediator applied: mediated_point already
        // contains G*(-x), so adding G*x leaves (G*a)*b1.
        let mediator_dh = self
            .curve
            .add(&mediated_point, ephemeral_pub_key)
            .map_err(|e| e.in_phase(phase, "mediator DH"))?;
        // The response echoes the enrollment-time auth value so a device
        // that did not persist its copy can still unseal; a stored copy
        // takes precedence when both are present.
        let key_auth_value = if key_auth_value.is_empty() {
            response.key_auth_value.as_slice()
        } else {
            key_auth_value
        };
        let point_dh = self
            .tpm
            .generate_diffie_hellman_shared_secret(
                &self.curve,
                encrypted_destination_share,
                auth_opt(key_auth_value),
                &dealer_pub_key,
            )
            .map_err(|e| e.in_phase(phase, "destination DH"))?;
        let point_dest = self
            .curve
            .add(&point_dh, &mediator_dh)
            .map_err(|e| e.in_phase(phase, "combine shares"))?;

        self.derive_recovery_key(&point_dest, &dealer_pub_key)
            .map_err(|e| e.in_phase(phase, "derive recovery key"))
    }

    /// Best-effort revocation before a recovery factor is removed. Failure
    /// is reported to the log only: removal of the on-disk state must
    /// proceed regardless.
    pub fn prepare_for_removal(&self, encrypted_destination_share: &[u8]) {
        if let Err(error) = self.tpm.revoke_recovery_state(encrypted_destination_share) {
            warn!(%error, "recovery state revocation failed; proceeding with removal");
        }
    }
}
