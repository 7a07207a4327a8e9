//! Tracing setup for hosts embedding the recovery engine.

use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

/// Initialize a fmt subscriber honoring `RUST_LOG`.
///
/// Hosts that install their own subscriber should skip this; it is a
/// convenience for tests and small integrations.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();
}

/// Short hex fingerprint of public key material, safe to log.
///
/// Never call this on private scalars or symmetric keys.
pub fn key_fingerprint(public_bytes: &[u8]) -> String {
    let digest = Sha256::digest(public_bytes);
    hex::encode(&digest[..8])
}
