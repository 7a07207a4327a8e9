//! Merkle inclusion-proof verification against a signed ledger checkpoint.
//!
//! Hashing follows the RFC 6962 convention: leaves are hashed with a 0x00
//! prefix byte, interior nodes with 0x01. The checkpoint note is
//! `<origin>\n<size>\n<base64 root>\n\n<base64 signature>`, where the
//! Ed25519 signature covers the checkpoint section including its trailing
//! newline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::RecoveryError;
use crate::types::LedgerSignedProof;

pub const HASH_SIZE: usize = 32;

const LEAF_HASH_PREFIX: u8 = 0x00;
const NODE_HASH_PREFIX: u8 = 0x01;

/// Parsed signed tree head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub origin: String,
    pub size: u64,
    pub root_hash: [u8; HASH_SIZE],
}

pub(crate) fn leaf_hash(leaf: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_HASH_PREFIX]);
    hasher.update(leaf);
    hasher.finalize().into()
}

pub(crate) fn node_hash(left: &[u8], right: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_HASH_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn checkpoint_body(origin: &str, size: u64, root_hash: &[u8; HASH_SIZE]) -> String {
    format!("{origin}\n{size}\n{}\n", BASE64.encode(root_hash))
}

/// Produce a signed checkpoint note. Used by the ledger side (the fake
/// mediator in this crate) and by tests.
pub(crate) fn sign_checkpoint_note(
    origin: &str,
    size: u64,
    root_hash: &[u8; HASH_SIZE],
    signing_key: &SigningKey,
) -> String {
    let body = checkpoint_body(origin, size, root_hash);
    let signature = signing_key.sign(body.as_bytes());
    format!("{body}\n{}", BASE64.encode(signature.to_bytes()))
}

/// Split and validate a checkpoint note, verifying its signature against
/// the ledger's known public key.
pub fn parse_checkpoint_note(
    note: &str,
    ledger_public_key: &VerifyingKey,
) -> Result<Checkpoint, RecoveryError> {
    let sections: Vec<&str> = note.split("\n\n").collect();
    let [body, signature_b64] = sections.as_slice() else {
        return Err(RecoveryError::StructuralDecode(
            "checkpoint note must have exactly one body and one signature section".into(),
        ));
    };

    let lines: Vec<&str> = body.split('\n').collect();
    let [origin, size_text, root_b64] = lines.as_slice() else {
        return Err(RecoveryError::StructuralDecode(
            "checkpoint must have exactly origin, size, and root hash lines".into(),
        ));
    };

    let size: u64 = size_text
        .parse()
        .map_err(|_| RecoveryError::StructuralDecode("checkpoint size is not an integer".into()))?;
    if size < 1 {
        return Err(RecoveryError::StructuralDecode(
            "checkpoint size must be at least 1".into(),
        ));
    }

    let root_bytes = BASE64
        .decode(root_b64)
        .map_err(|_| RecoveryError::StructuralDecode("root hash is not valid base64".into()))?;
    let root_hash: [u8; HASH_SIZE] = root_bytes.try_into().map_err(|_| {
        RecoveryError::StructuralDecode("root hash must be a 32-byte digest".into())
    })?;

    let signature_bytes = BASE64
        .decode(signature_b64.trim_end_matches('\n'))
        .map_err(|_| RecoveryError::StructuralDecode("signature is not valid base64".into()))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| RecoveryError::StructuralDecode("signature has the wrong length".into()))?;

    let signed_body = checkpoint_body(origin, size, &root_hash);
    ledger_public_key
        .verify(signed_body.as_bytes(), &signature)
        .map_err(|_| RecoveryError::Authentication)?;

    Ok(Checkpoint {
        origin: origin.to_string(),
        size,
        root_hash,
    })
}

/// Verify that `proof.logged_record` is included in the tree committed to
/// by the signed checkpoint. Index and size sanity run before any hashing.
pub fn verify_inclusion_proof(
    proof: &LedgerSignedProof,
    ledger_public_key: &VerifyingKey,
) -> Result<(), RecoveryError> {
    let checkpoint = parse_checkpoint_note(&proof.checkpoint_note, ledger_public_key)?;

    let leaf_index = proof.logged_record.leaf_index;
    if leaf_index >= checkpoint.size {
        return Err(RecoveryError::StructuralDecode(format!(
            "leaf index {leaf_index} out of range for tree of size {}",
            checkpoint.size
        )));
    }

    // Number of proof entries below the point where the leaf's path joins
    // the rightmost path of the tree.
    let inner = u64::BITS - (leaf_index ^ (checkpoint.size - 1)).leading_zeros();
    let border = (leaf_index >> inner).count_ones();
    if proof.inclusion_proof.len() != (inner + border) as usize {
        return Err(RecoveryError::StructuralDecode(format!(
            "inclusion proof has {} entries, expected {}",
            proof.inclusion_proof.len(),
            inner + border
        )));
    }

    let mut seed = leaf_hash(&proof.logged_record.public_ledger_entry);
    for (i, sibling) in proof.inclusion_proof.iter().enumerate() {
        if sibling.len() != HASH_SIZE {
            return Err(RecoveryError::StructuralDecode(
                "inclusion proof entry is not a 32-byte digest".into(),
            ));
        }
        seed = if (i as u32) < inner && (leaf_index >> i) & 1 == 0 {
            node_hash(&seed, sibling)
        } else {
            node_hash(sibling, &seed)
        };
    }

    if seed != checkpoint.root_hash {
        return Err(RecoveryError::Authentication);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_bytes::ByteBuf;

    fn test_signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn checkpoint_note_round_trips() {
        let key = test_signing_key();
        let root = [0xabu8; HASH_SIZE];
        let note = sign_checkpoint_note("recovery-ledger/test", 5, &root, &key);
        let checkpoint = parse_checkpoint_note(&note, &key.verifying_key()).expect("verify");
        assert_eq!(checkpoint.origin, "recovery-ledger/test");
        assert_eq!(checkpoint.size, 5);
        assert_eq!(checkpoint.root_hash, root);
    }

    #[test]
    fn checkpoint_with_extra_lines_is_rejected() {
        let key = test_signing_key();
        let root = [0u8; HASH_SIZE];
        let note = sign_checkpoint_note("origin\nextra", 1, &root, &key);
        assert!(matches!(
            parse_checkpoint_note(&note, &key.verifying_key()),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let key = test_signing_key();
        let root = [1u8; HASH_SIZE];
        let note = sign_checkpoint_note("origin", 3, &root, &key);
        let other_key = SigningKey::from_bytes(&[8u8; 32]);
        assert!(matches!(
            parse_checkpoint_note(&note, &other_key.verifying_key()),
            Err(RecoveryError::Authentication)
        ));
    }

    #[test]
    fn single_leaf_tree_verifies_with_an_empty_proof() {
        let key = test_signing_key();
        let entry = b"only entry".to_vec();
        let root = leaf_hash(&entry);
        let proof = LedgerSignedProof {
            checkpoint_note: sign_checkpoint_note("origin", 1, &root, &key),
            inclusion_proof: vec![],
            logged_record: crate::types::LoggedRecord {
                public_ledger_entry: entry,
                leaf_index: 0,
            },
        };
        verify_inclusion_proof(&proof, &key.verifying_key()).expect("verify");
    }

    #[test]
    fn out_of_range_leaf_index_fails_before_hashing() {
        let key = test_signing_key();
        let root = [2u8; HASH_SIZE];
        let proof = LedgerSignedProof {
            checkpoint_note: sign_checkpoint_note("origin", 2, &root, &key),
            inclusion_proof: vec![ByteBuf::from(vec![0u8; HASH_SIZE])],
            logged_record: crate::types::LoggedRecord {
                public_ledger_entry: b"entry".to_vec(),
                leaf_index: 2,
            },
        };
        assert!(matches!(
            verify_inclusion_proof(&proof, &key.verifying_key()),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }
}
