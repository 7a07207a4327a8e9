//! Centralized recovery engine error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecoveryError {
    /// Malformed wire bytes, missing required map key, or wrong value type.
    #[error("Structural decode error: {0}")]
    StructuralDecode(String),
    /// Point not on curve, point at infinity where forbidden, or scalar out
    /// of `[0, order)`.
    #[error("Curve validity error: {0}")]
    CurveValidity(String),
    /// AEAD tag mismatch or a failed signature check. Deliberately carries
    /// no detail about which input caused the failure.
    #[error("Authentication failure")]
    Authentication,
    /// Recoverable protocol failure (e.g. response decryption with a stale
    /// epoch). Callers may retry from request generation with a fresh epoch.
    #[error("Transient protocol error: {0}")]
    Transient(String),
    /// Destination recovery was fed wrong credentials. Surfaces as an auth
    /// failure to the user rather than a system error.
    #[error("Incorrect auth: {0}")]
    IncorrectAuth(String),
    /// The TPM backend capability is missing or misconfigured.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    /// A lower-layer error tagged with the protocol phase and step at which
    /// it occurred. Never embeds secret values.
    #[error("{phase} failed at {step}")]
    Protocol {
        phase: &'static str,
        step: &'static str,
        #[source]
        source: Box<RecoveryError>,
    },
}

impl RecoveryError {
    /// Tag an error with the phase and step it occurred in.
    pub fn in_phase(self, phase: &'static str, step: &'static str) -> Self {
        RecoveryError::Protocol {
            phase,
            step,
            source: Box::new(self),
        }
    }

    /// The innermost error kind, unwrapping any phase tagging.
    pub fn root_cause(&self) -> &RecoveryError {
        match self {
            RecoveryError::Protocol { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
