//! ECDH shared-secret computation and HKDF key derivation.
//!
//! The HKDF `info` parameter is always `public_key_bytes || info_suffix`,
//! built in exactly one place ([`hkdf_info`]) so sender- and recipient-side
//! derivations can never drift. The suffix constants live in
//! [`crate::wire::schema`]; using the wrong suffix for a message type is a
//! protocol bug, not a style choice: it is what separates the three
//! otherwise-identical key derivations.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::curve::{EllipticCurve, Point, Scalar};
use crate::error::RecoveryError;

/// Symmetric keys derived here are always AES-256 keys.
pub const AES_256_KEY_SIZE: usize = 32;

/// `their_pub * our_priv`. Rejects an invalid or non-finite `their_pub`.
pub fn compute_shared_secret_point(
    curve: &EllipticCurve,
    their_pub: &Point,
    our_priv: &Scalar,
) -> Result<Point, RecoveryError> {
    if !curve.is_point_valid_and_finite(their_pub) {
        return Err(RecoveryError::CurveValidity(
            "peer public key is not a valid finite point".into(),
        ));
    }
    curve.multiply(their_pub, our_priv)
}

/// The shared secret actually fed to HKDF: the affine X coordinate of the
/// shared point, at the curve's fixed field-element width. The fixed width
/// matters: a variable-length encoding would change the HKDF input.
pub fn shared_secret_x_coordinate(
    curve: &EllipticCurve,
    shared_point: &Point,
) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
    curve.x_coordinate(shared_point).map(Zeroizing::new)
}

/// The single construction point for the HKDF info string.
fn hkdf_info(public_key: &[u8], info_suffix: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut info = Zeroizing::new(Vec::with_capacity(public_key.len() + info_suffix.len()));
    info.extend_from_slice(public_key);
    info.extend_from_slice(info_suffix);
    info
}

/// HKDF-SHA256 extract-then-expand with `info = public_key || info_suffix`.
pub fn derive_symmetric_key(
    shared_secret: &[u8],
    info_suffix: &[u8],
    public_key: &[u8],
    salt: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
    let info = hkdf_info(public_key, info_suffix);
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = Zeroizing::new(vec![0u8; output_len]);
    hk.expand(&info, &mut okm)
        .map_err(|_| RecoveryError::StructuralDecode("HKDF output length invalid".into()))?;
    Ok(okm)
}

/// Sender-side key: ECDH against the recipient's public key using our
/// ephemeral private scalar.
#[allow(clippy::too_many_arguments)]
pub fn generate_ecdh_hkdf_sender_key(
    curve: &EllipticCurve,
    recipient_pub_key: &Point,
    ephemeral_pub_key: &Point,
    ephemeral_priv_key: &Scalar,
    info_suffix: &[u8],
    salt: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
    let shared_point = compute_shared_secret_point(curve, recipient_pub_key, ephemeral_priv_key)?;
    let shared_secret = shared_secret_x_coordinate(curve, &shared_point)?;
    derive_symmetric_key(
        &shared_secret,
        info_suffix,
        curve.point_to_bytes(ephemeral_pub_key)?.as_slice(),
        salt,
        output_len,
    )
}

/// Recipient-side key: ECDH against the sender's ephemeral public key using
/// our long-term private scalar. By ECDH commutativity this equals the
/// sender-side key for matching key pairs.
pub fn generate_ecdh_hkdf_recipient_key(
    curve: &EllipticCurve,
    recipient_priv_key: &Scalar,
    ephemeral_pub_key: &Point,
    info_suffix: &[u8],
    salt: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
    let shared_point = compute_shared_secret_point(curve, ephemeral_pub_key, recipient_priv_key)?;
    let shared_secret = shared_secret_x_coordinate(curve, &shared_point)?;
    derive_symmetric_key(
        &shared_secret,
        info_suffix,
        curve.point_to_bytes(ephemeral_pub_key)?.as_slice(),
        salt,
        output_len,
    )
}
