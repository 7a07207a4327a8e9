//! Full protocol round trips against the software mediator.

use std::sync::Arc;

use crate::error::RecoveryError;
use crate::fake_mediator::FakeMediator;
use crate::ledger::verify_inclusion_proof;
use crate::recovery::RecoveryCrypto;
use crate::tpm::{SoftwareTpm, TpmBackend};
use crate::types::{HsmAssociatedData, OnboardingMetadata, UserIdType};
use crate::wire;

fn metadata(user_id: &str) -> OnboardingMetadata {
    OnboardingMetadata {
        user_id_type: UserIdType::Email,
        user_id: user_id.into(),
    }
}

/// Enroll, request, mediate, decrypt, recover. The destination key must be
/// byte-identical to the enrollment-time recovery key.
fn run_round_trip(tpm: Arc<dyn TpmBackend>) {
    let mut mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(tpm);

    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");

    // The mediator learns the verification material from the enrollment
    // payload's associated data, same as the real server would.
    let ad: HsmAssociatedData =
        wire::decode(&generated.hsm_payload.associated_data).expect("decode ad");
    mediator.register_rsa_public_key(ad.rsa_public_key);

    let epoch = mediator.epoch_response().expect("epoch");
    let request = engine
        .generate_recovery_request(
            &generated.hsm_payload,
            b"requestor metadata",
            &epoch,
            &generated.encrypted_rsa_priv_key,
            &generated.encrypted_channel_priv_key,
        )
        .expect("request");

    let (response, proof) = mediator.mediate(&request.request).expect("mediation");
    verify_inclusion_proof(&proof, &mediator.ledger_public_key()).expect("inclusion proof");

    let response_pt = engine
        .decrypt_response_payload(&generated.encrypted_channel_priv_key, &epoch, &response)
        .expect("response decryption");
    let destination_key = engine
        .recover_destination(
            &response_pt,
            &generated.key_auth_value,
            &generated.encrypted_destination_share,
            &request.ephemeral_pub_key,
        )
        .expect("destination recovery");

    assert_eq!(*destination_key, *generated.recovery_key);
}

#[test]
fn tpm2_round_trip_recovers_the_enrollment_key() {
    run_round_trip(Arc::new(SoftwareTpm::tpm2()));
}

#[test]
fn tpm1_round_trip_recovers_the_enrollment_key() {
    // TPM1-class: key auth value in use, request signed and verified.
    run_round_trip(Arc::new(SoftwareTpm::tpm1()));
}

#[test]
fn echoed_auth_value_recovers_when_the_stored_copy_is_gone() {
    let mut mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm1()));

    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");
    assert!(!generated.key_auth_value.is_empty());
    let ad: HsmAssociatedData =
        wire::decode(&generated.hsm_payload.associated_data).expect("decode ad");
    mediator.register_rsa_public_key(ad.rsa_public_key);

    let epoch = mediator.epoch_response().expect("epoch");
    let request = engine
        .generate_recovery_request(
            &generated.hsm_payload,
            &[],
            &epoch,
            &generated.encrypted_rsa_priv_key,
            &generated.encrypted_channel_priv_key,
        )
        .expect("request");
    let (response, _) = mediator.mediate(&request.request).expect("mediation");
    let response_pt = engine
        .decrypt_response_payload(&generated.encrypted_channel_priv_key, &epoch, &response)
        .expect("response decryption");

    // The device lost its stored auth value; the copy echoed through the
    // response plaintext must be enough to unseal the destination share.
    let destination_key = engine
        .recover_destination(
            &response_pt,
            &[],
            &generated.encrypted_destination_share,
            &request.ephemeral_pub_key,
        )
        .expect("destination recovery");
    assert_eq!(*destination_key, *generated.recovery_key);
}

#[test]
fn separate_enrollments_derive_unrelated_recovery_keys() {
    let mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm2()));

    let first = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("a@example.com"))
        .expect("enrollment");
    let second = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("b@example.com"))
        .expect("enrollment");
    assert_ne!(*first.recovery_key, *second.recovery_key);
}

#[test]
fn response_under_a_rotated_epoch_is_a_transient_failure() {
    let mut mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm2()));

    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");
    let epoch = mediator.epoch_response().expect("epoch");
    let request = engine
        .generate_recovery_request(
            &generated.hsm_payload,
            &[],
            &epoch,
            &generated.encrypted_rsa_priv_key,
            &generated.encrypted_channel_priv_key,
        )
        .expect("request");
    let (response, _) = mediator.mediate(&request.request).expect("mediation");

    // The device refreshes its epoch after the server rotates: the response
    // in hand was keyed to the previous epoch.
    mediator.rotate_epoch().expect("rotation");
    let fresh_epoch = mediator.epoch_response().expect("epoch");
    let err = engine
        .decrypt_response_payload(&generated.encrypted_channel_priv_key, &fresh_epoch, &response)
        .map(|_| ())
        .unwrap_err();
    assert!(matches!(err.root_cause(), RecoveryError::Transient(_)));
}

#[test]
fn stale_request_is_rejected_by_the_mediator() {
    let mut mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm2()));

    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");
    let stale_epoch = mediator.epoch_response().expect("epoch");
    mediator.rotate_epoch().expect("rotation");

    let request = engine
        .generate_recovery_request(
            &generated.hsm_payload,
            &[],
            &stale_epoch,
            &generated.encrypted_rsa_priv_key,
            &generated.encrypted_channel_priv_key,
        )
        .expect("request");
    assert!(mediator.mediate(&request.request).is_err());
}

#[test]
fn ledger_accumulates_across_mediations() {
    let mut mediator = FakeMediator::new().expect("mediator");
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm2()));

    for (index, user) in ["a@x", "b@x", "c@x"].iter().enumerate() {
        let generated = engine
            .generate_hsm_payload(mediator.mediator_pub_key(), &metadata(user))
            .expect("enrollment");
        let epoch = mediator.epoch_response().expect("epoch");
        let request = engine
            .generate_recovery_request(
                &generated.hsm_payload,
                &[],
                &epoch,
                &generated.encrypted_rsa_priv_key,
                &generated.encrypted_channel_priv_key,
            )
            .expect("request");
        let (_, proof) = mediator.mediate(&request.request).expect("mediation");
        assert_eq!(proof.logged_record.leaf_index, index as u64);
        verify_inclusion_proof(&proof, &mediator.ledger_public_key())
            .unwrap_or_else(|e| panic!("proof for leaf {index} failed: {e}"));
    }
}

#[test]
fn prepare_for_removal_never_blocks_removal() {
    let mediator = FakeMediator::new().expect("mediator");

    // TPM1-class backends cannot revoke; the failure must stay in the log.
    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm1()));
    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");
    engine.prepare_for_removal(&generated.encrypted_destination_share);

    let engine = RecoveryCrypto::new(Arc::new(SoftwareTpm::tpm2()));
    let generated = engine
        .generate_hsm_payload(mediator.mediator_pub_key(), &metadata("user@example.com"))
        .expect("enrollment");
    engine.prepare_for_removal(&generated.encrypted_destination_share);
}
