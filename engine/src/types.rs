//! Structured protocol records shared between the engine, the wire codec,
//! and the fake mediator.
//!
//! Fields carrying curve points or scalars are raw wire bytes here; the
//! engine validates them against [`crate::curve`] at the moment of use.
//! The `#[serde(rename)]` attributes are the wire contract; the full
//! key table lives in [`crate::wire::schema`] and a codec test pins the
//! two against each other.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// One encrypted message unit. HSM payload, request payload, and response
/// payload all use this shape; plaintext and associated data are themselves
/// CBOR-encoded records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadPayload {
    #[serde(rename = "ct", with = "serde_bytes")]
    pub cipher_text: Vec<u8>,
    #[serde(rename = "ad", with = "serde_bytes")]
    pub associated_data: Vec<u8>,
    #[serde(rename = "iv", with = "serde_bytes")]
    pub iv: Vec<u8>,
    #[serde(rename = "tag", with = "serde_bytes")]
    pub tag: Vec<u8>,
}

/// How the `user_id` of [`OnboardingMetadata`] should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum UserIdType {
    Unknown,
    GaiaId,
    Email,
}

impl From<UserIdType> for u32 {
    fn from(value: UserIdType) -> u32 {
        match value {
            UserIdType::Unknown => 0,
            UserIdType::GaiaId => 1,
            UserIdType::Email => 2,
        }
    }
}

impl TryFrom<u32> for UserIdType {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UserIdType::Unknown),
            1 => Ok(UserIdType::GaiaId),
            2 => Ok(UserIdType::Email),
            other => Err(format!("unknown user id type {other}")),
        }
    }
}

/// User-identifying record embedded in plaintext inside the HSM associated
/// data at enrollment. Immutable for the lifetime of the enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingMetadata {
    #[serde(rename = "user_id_type")]
    pub user_id_type: UserIdType,
    #[serde(rename = "user_id")]
    pub user_id: String,
}

/// Public, authenticated-but-not-encrypted half of the HSM payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmAssociatedData {
    #[serde(rename = "publisher_pub_key", with = "serde_bytes")]
    pub publisher_pub_key: Vec<u8>,
    #[serde(rename = "channel_pub_key", with = "serde_bytes")]
    pub channel_pub_key: Vec<u8>,
    /// RSA public key (DER) used to verify request signatures on TPM1-class
    /// hardware; empty on TPM2-class.
    #[serde(rename = "epoch_rsa_sig_pkey", with = "serde_bytes")]
    pub rsa_public_key: Vec<u8>,
    #[serde(rename = "onboarding_meta_data")]
    pub onboarding_meta_data: OnboardingMetadata,
}

/// Secret half of the HSM payload, encrypted to the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmPlainText {
    #[serde(rename = "mediator_share", with = "serde_bytes")]
    pub mediator_share: Vec<u8>,
    #[serde(rename = "dealer_pub_key", with = "serde_bytes")]
    pub dealer_pub_key: Vec<u8>,
    #[serde(rename = "key_auth_value", with = "serde_bytes")]
    pub key_auth_value: Vec<u8>,
}

/// Associated data of the per-attempt recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequestAssociatedData {
    #[serde(rename = "hsm_payload")]
    pub hsm_payload: AeadPayload,
    #[serde(rename = "request_meta_data", with = "serde_bytes")]
    pub request_meta_data: Vec<u8>,
    #[serde(rename = "epoch_meta_data", with = "serde_bytes")]
    pub epoch_meta_data: Vec<u8>,
    #[serde(rename = "epoch_pub_key", with = "serde_bytes")]
    pub epoch_pub_key: Vec<u8>,
    #[serde(rename = "request_payload_salt", with = "serde_bytes")]
    pub request_payload_salt: Vec<u8>,
    #[serde(rename = "schema_version")]
    pub schema_version: u32,
}

/// Encrypted body of the recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequestPlainText {
    /// `G * (-x)` for the per-attempt ephemeral scalar `x`.
    #[serde(rename = "ephemeral_pub_inv_key", with = "serde_bytes")]
    pub ephemeral_pub_inv_key: Vec<u8>,
}

/// The signed request message sent to the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    #[serde(rename = "request_payload")]
    pub request_payload: AeadPayload,
    /// Empty on TPM2-class hardware.
    #[serde(rename = "rsa_signature", with = "serde_bytes")]
    pub rsa_signature: Vec<u8>,
}

/// Associated data of the mediator's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmResponseAssociatedData {
    #[serde(rename = "response_meta_data", with = "serde_bytes")]
    pub response_meta_data: Vec<u8>,
    /// Server-chosen salt for the response key derivation.
    #[serde(rename = "response_salt", with = "serde_bytes")]
    pub response_salt: Vec<u8>,
}

/// Encrypted body of the mediator's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmResponsePlainText {
    #[serde(rename = "mediated_point", with = "serde_bytes")]
    pub mediated_point: Vec<u8>,
    #[serde(rename = "dealer_pub_key", with = "serde_bytes")]
    pub dealer_pub_key: Vec<u8>,
    #[serde(rename = "key_auth_value", with = "serde_bytes")]
    pub key_auth_value: Vec<u8>,
}

/// Mediator-issued ephemeral value, refreshed periodically. Both the
/// request- and response-leg keys are derived against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochResponse {
    #[serde(rename = "epoch_pub_key", with = "serde_bytes")]
    pub epoch_pub_key: Vec<u8>,
    #[serde(rename = "epoch_meta_data", with = "serde_bytes")]
    pub epoch_meta_data: Vec<u8>,
}

/// The ledger entry an inclusion proof speaks about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedRecord {
    #[serde(rename = "public_ledger_entry", with = "serde_bytes")]
    pub public_ledger_entry: Vec<u8>,
    #[serde(rename = "leaf_index")]
    pub leaf_index: u64,
}

/// Proof that an onboarding event was recorded in the append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSignedProof {
    /// `<origin>\n<size>\n<base64 root>\n\n<base64 signature>`.
    #[serde(rename = "checkpoint_note")]
    pub checkpoint_note: String,
    #[serde(rename = "inclusion_proof")]
    pub inclusion_proof: Vec<ByteBuf>,
    #[serde(rename = "logged_record")]
    pub logged_record: LoggedRecord,
}
