//! Recovery Engine Core Library
//!
//! Mediated EC-crypto key recovery: a dealer splits a recovery secret
//! into a mediator share and a TPM-sealed destination share at enrollment,
//! and a later recovery attempt recombines them through an untrusted
//! mediator without the mediator learning the recovery key.

pub mod aead;
pub mod curve;
pub mod ecdh;
pub mod error;
pub mod fake_mediator;
pub mod ledger;
pub mod logging;
pub mod recovery;
pub mod tpm;
pub mod types;
pub mod wire;

pub use error::RecoveryError;
pub use logging::init_logging;
pub use recovery::{GeneratedHsmPayload, GeneratedRecoveryRequest, RecoveryCrypto};

#[cfg(test)]
mod tests;
