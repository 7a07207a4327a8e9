//! Software-only stand-in for the network mediator service.
//!
//! Plays the server role in protocol round-trip tests: verifies and
//! decrypts recovery requests, performs the mediation multiply, and keeps
//! an in-memory append-only ledger of onboarding events so inclusion-proof
//! verification can be exercised end to end. Every instance generates its
//! own keys; nothing here is a process-wide singleton.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use serde_bytes::ByteBuf;
use zeroize::Zeroizing;

use crate::aead;
use crate::curve::{CurveType, EllipticCurve, KeyPair, Point};
use crate::ecdh;
use crate::error::RecoveryError;
use crate::ledger::{self, HASH_SIZE};
use crate::tpm::software_request_signature;
use crate::types::{
    EpochResponse, HsmAssociatedData, HsmPlainText, HsmResponseAssociatedData,
    HsmResponsePlainText, LedgerSignedProof, LoggedRecord, RecoveryRequest,
    RecoveryRequestPlainText,
};
use crate::wire::{self, schema};

const RESPONSE_SALT_SIZE: usize = 32;

/// Append-only Merkle tree over ledger entries, RFC 6962 shape.
struct MerkleTree {
    leaves: Vec<Vec<u8>>,
}

impl MerkleTree {
    fn new() -> Self {
        MerkleTree { leaves: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u64 {
        self.leaves.push(entry);
        (self.leaves.len() - 1) as u64
    }

    fn size(&self) -> u64 {
        self.leaves.len() as u64
    }

    /// Largest power of two strictly less than `n` (`n >= 2`).
    fn split_point(n: usize) -> usize {
        1 << (usize::BITS - 1 - (n - 1).leading_zeros())
    }

    fn subtree_root(leaves: &[Vec<u8>]) -> [u8; HASH_SIZE] {
        match leaves {
            // RFC 6962 defines the empty tree head as the hash of the
            // empty string.
            [] => Sha256::digest(b"").into(),
            [leaf] => ledger::leaf_hash(leaf),
            _ => {
                let k = Self::split_point(leaves.len());
                let left = Self::subtree_root(&leaves[..k]);
                let right = Self::subtree_root(&leaves[k..]);
                ledger::node_hash(&left, &right)
            }
        }
    }

    fn root_hash(&self) -> [u8; HASH_SIZE] {
        Self::subtree_root(&self.leaves)
    }

    fn subproof(index: usize, leaves: &[Vec<u8>]) -> Vec<[u8; HASH_SIZE]> {
        if leaves.len() == 1 {
            return Vec::new();
        }
        let k = Self::split_point(leaves.len());
        if index < k {
            let mut proof = Self::subproof(index, &leaves[..k]);
            proof.push(Self::subtree_root(&leaves[k..]));
            proof
        } else {
            let mut proof = Self::subproof(index - k, &leaves[k..]);
            proof.push(Self::subtree_root(&leaves[..k]));
            proof
        }
    }

    fn inclusion_proof(&self, index: u64) -> Vec<[u8; HASH_SIZE]> {
        Self::subproof(index as usize, &self.leaves)
    }
}

/// The test double for the remote mediator.
pub struct FakeMediator {
    curve: EllipticCurve,
    mediator: KeyPair,
    epoch: KeyPair,
    epoch_counter: u32,
    rsa_public_key: Option<Vec<u8>>,
    ledger_signing_key: SigningKey,
    ledger: MerkleTree,
}

impl FakeMediator {
    pub const LEDGER_ORIGIN: &'static str = "recovery-ledger/fake";

    pub fn new() -> Result<Self, RecoveryError> {
        let curve = EllipticCurve::new(CurveType::P256);
        let mediator = curve.generate_key_pair()?;
        let epoch = curve.generate_key_pair()?;
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::rngs::OsRng.fill_bytes(&mut seed[..]);
        Ok(FakeMediator {
            curve,
            mediator,
            epoch,
            epoch_counter: 0,
            rsa_public_key: None,
            ledger_signing_key: SigningKey::from_bytes(&seed),
            ledger: MerkleTree::new(),
        })
    }

    pub fn mediator_pub_key(&self) -> &Point {
        &self.mediator.public_key
    }

    pub fn ledger_public_key(&self) -> VerifyingKey {
        self.ledger_signing_key.verifying_key()
    }

    /// The current epoch as handed out to devices.
    pub fn epoch_response(&self) -> Result<EpochResponse, RecoveryError> {
        Ok(EpochResponse {
            epoch_pub_key: self.curve.point_to_bytes(&self.epoch.public_key)?,
            epoch_meta_data: self.epoch_counter.to_be_bytes().to_vec(),
        })
    }

    /// Replace the epoch key pair, invalidating keys derived against the
    /// previous epoch.
    pub fn rotate_epoch(&mut self) -> Result<(), RecoveryError> {
        self.epoch = self.curve.generate_key_pair()?;
        self.epoch_counter += 1;
        Ok(())
    }

    /// Register the RSA verification material from enrollment; requests are
    /// only signature-checked once this is set.
    pub fn register_rsa_public_key(&mut self, public_key_der: Vec<u8>) {
        if !public_key_der.is_empty() {
            self.rsa_public_key = Some(public_key_der);
        }
    }

    /// Phase C: mediate one recovery request. Returns the encoded response
    /// envelope and an inclusion proof over the onboarding metadata.
    pub fn mediate(
        &mut self,
        request: &[u8],
    ) -> Result<(Vec<u8>, LedgerSignedProof), RecoveryError> {
        let request_bytes = wire::decode_envelope(request)?;
        let request: RecoveryRequest = wire::decode(&request_bytes)?;
        let request_ad = wire::decode_request_associated_data(&request.request_payload.associated_data)?;

        if let Some(rsa_public_key) = &self.rsa_public_key {
            let payload_bytes = wire::encode(&request.request_payload)?;
            let expected = software_request_signature(rsa_public_key, &payload_bytes);
            if request.rsa_signature != expected {
                return Err(RecoveryError::Authentication);
            }
        }

        let hsm_ad: HsmAssociatedData = wire::decode(&request_ad.hsm_payload.associated_data)?;
        let publisher_pub_key = self.curve.bytes_to_point(&hsm_ad.publisher_pub_key)?;
        let channel_pub_key = self.curve.bytes_to_point(&hsm_ad.channel_pub_key)?;

        // Unwrap the enrollment-time payload with the mediator key.
        let hsm_key = ecdh::generate_ecdh_hkdf_recipient_key(
            &self.curve,
            &self.mediator.private_key,
            &publisher_pub_key,
            schema::MEDIATOR_SHARE_HKDF_INFO,
            &[],
            ecdh::AES_256_KEY_SIZE,
        )?;
        let hsm_plain = Zeroizing::new(aead::decrypt(&request_ad.hsm_payload, &hsm_key)?);
        let hsm_pt: HsmPlainText = wire::decode(&hsm_plain)?;
        let mediator_share = self.curve.scalar_from_bytes(&hsm_pt.mediator_share)?;
        let dealer_pub_key = self.curve.bytes_to_point(&hsm_pt.dealer_pub_key)?;

        // Unwrap the per-attempt request with the epoch key.
        let request_shared = ecdh::compute_shared_secret_point(
            &self.curve,
            &channel_pub_key,
            &self.epoch.private_key,
        )?;
        let request_secret = ecdh::shared_secret_x_coordinate(&self.curve, &request_shared)?;
        let request_key = ecdh::derive_symmetric_key(
            &request_secret,
            schema::REQUEST_PAYLOAD_HKDF_INFO,
            &request_ad.epoch_pub_key,
            &request_ad.request_payload_salt,
            ecdh::AES_256_KEY_SIZE,
        )?;
        let request_plain = Zeroizing::new(aead::decrypt(&request.request_payload, &request_key)?);
        let request_pt: RecoveryRequestPlainText = wire::decode(&request_plain)?;
        let ephemeral_inv_point = self.curve.bytes_to_point(&request_pt.ephemeral_pub_inv_key)?;

        // The mediation itself: (G*a)*b1 + G*(-x). The mediator never sees
        // the combined secret, only its own share times the dealer point.
        let dealer_dh = self.curve.multiply(&dealer_pub_key, &mediator_share)?;
        let mediated_point = self.curve.add(&dealer_dh, &ephemeral_inv_point)?;

        let mut response_salt = vec![0u8; RESPONSE_SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut response_salt);
        let response_ad = wire::encode(&HsmResponseAssociatedData {
            response_meta_data: Vec::new(),
            response_salt: response_salt.clone(),
        })?;
        let response_pt = Zeroizing::new(wire::encode(&HsmResponsePlainText {
            mediated_point: self.curve.point_to_bytes(&mediated_point)?,
            dealer_pub_key: hsm_pt.dealer_pub_key.clone(),
            key_auth_value: hsm_pt.key_auth_value.clone(),
        })?);

        let response_shared = ecdh::compute_shared_secret_point(
            &self.curve,
            &channel_pub_key,
            &self.epoch.private_key,
        )?;
        let response_secret = ecdh::shared_secret_x_coordinate(&self.curve, &response_shared)?;
        let response_key = ecdh::derive_symmetric_key(
            &response_secret,
            schema::RESPONSE_PAYLOAD_HKDF_INFO,
            &self.curve.point_to_bytes(&self.epoch.public_key)?,
            &response_salt,
            ecdh::AES_256_KEY_SIZE,
        )?;
        let response_payload = aead::encrypt(&response_pt, &response_ad, &response_key)?;
        let response = wire::encode_envelope(wire::encode(&response_payload)?)?;

        let proof = self.append_to_ledger(&hsm_ad)?;
        Ok((response, proof))
    }

    /// Record the onboarding event and produce its signed inclusion proof.
    fn append_to_ledger(
        &mut self,
        hsm_ad: &HsmAssociatedData,
    ) -> Result<LedgerSignedProof, RecoveryError> {
        let entry = wire::encode(&hsm_ad.onboarding_meta_data)?;
        let leaf_index = self.ledger.push(entry.clone());
        let checkpoint_note = ledger::sign_checkpoint_note(
            Self::LEDGER_ORIGIN,
            self.ledger.size(),
            &self.ledger.root_hash(),
            &self.ledger_signing_key,
        );
        Ok(LedgerSignedProof {
            checkpoint_note,
            inclusion_proof: self
                .ledger
                .inclusion_proof(leaf_index)
                .into_iter()
                .map(|hash| ByteBuf::from(hash.to_vec()))
                .collect(),
            logged_record: LoggedRecord {
                public_ledger_entry: entry,
                leaf_index,
            },
        })
    }
}
