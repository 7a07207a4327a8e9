//! Canonical wire-schema constants.
//!
//! This is the single module both the engine and its test doubles import
//! for map keys and HKDF domain-separation strings; the encoder and decoder
//! must never drift from each other or from the server. The map-key names
//! are part of the wire contract.

/// Version of the outer `{protocol_version, cbor_payload}` envelope.
pub const PROTOCOL_VERSION: u32 = 1;

/// Version of the request associated-data map, checked by readers.
pub const SCHEMA_VERSION: u32 = 1;

// Map keys: nested AEAD sub-map.
pub const KEY_AEAD_CT: &str = "ct";
pub const KEY_AEAD_AD: &str = "ad";
pub const KEY_AEAD_IV: &str = "iv";
pub const KEY_AEAD_TAG: &str = "tag";

// Map keys: HSM payload.
pub const KEY_PUBLISHER_PUB_KEY: &str = "publisher_pub_key";
pub const KEY_CHANNEL_PUB_KEY: &str = "channel_pub_key";
pub const KEY_RSA_PUBLIC_KEY: &str = "epoch_rsa_sig_pkey";
pub const KEY_ONBOARDING_META_DATA: &str = "onboarding_meta_data";
pub const KEY_MEDIATOR_SHARE: &str = "mediator_share";
pub const KEY_DEALER_PUB_KEY: &str = "dealer_pub_key";
pub const KEY_KEY_AUTH_VALUE: &str = "key_auth_value";
pub const KEY_USER_ID_TYPE: &str = "user_id_type";
pub const KEY_USER_ID: &str = "user_id";

// Map keys: recovery request.
pub const KEY_HSM_PAYLOAD: &str = "hsm_payload";
pub const KEY_REQUEST_META_DATA: &str = "request_meta_data";
pub const KEY_EPOCH_META_DATA: &str = "epoch_meta_data";
pub const KEY_EPOCH_PUB_KEY: &str = "epoch_pub_key";
pub const KEY_REQUEST_PAYLOAD_SALT: &str = "request_payload_salt";
pub const KEY_SCHEMA_VERSION: &str = "schema_version";
pub const KEY_EPHEMERAL_PUB_INV_KEY: &str = "ephemeral_pub_inv_key";
pub const KEY_REQUEST_PAYLOAD: &str = "request_payload";
pub const KEY_RSA_SIGNATURE: &str = "rsa_signature";

// Map keys: mediator response.
pub const KEY_RESPONSE_META_DATA: &str = "response_meta_data";
pub const KEY_RESPONSE_SALT: &str = "response_salt";
pub const KEY_MEDIATED_POINT: &str = "mediated_point";

// Map keys: outer envelope.
pub const KEY_PROTOCOL_VERSION: &str = "protocol_version";
pub const KEY_CBOR_PAYLOAD: &str = "cbor_payload";

// Map keys: ledger proof.
pub const KEY_CHECKPOINT_NOTE: &str = "checkpoint_note";
pub const KEY_INCLUSION_PROOF: &str = "inclusion_proof";
pub const KEY_LOGGED_RECORD: &str = "logged_record";
pub const KEY_PUBLIC_LEDGER_ENTRY: &str = "public_ledger_entry";
pub const KEY_LEAF_INDEX: &str = "leaf_index";

// HKDF domain-separation suffixes. One per message type; mixing them up
// collapses three distinct key derivations into one.
/// Mediator-share channel (publisher -> mediator, enrollment).
pub const MEDIATOR_SHARE_HKDF_INFO: &[u8] = b"CryptoHome HSM Payload Key";
/// Request-payload channel (device -> mediator, per attempt).
pub const REQUEST_PAYLOAD_HKDF_INFO: &[u8] = b"CryptoHome Request Payload Key";
/// Response-payload channel (mediator -> device, per attempt).
pub const RESPONSE_PAYLOAD_HKDF_INFO: &[u8] = b"CryptoHome Response Payload Key";
/// Recovery-key derivation from the shared secret point.
pub const RECOVERY_KEY_HKDF_INFO: &[u8] = b"CryptoHome Wrapping Key";
