//! Named-curve group arithmetic for the recovery protocol.
//!
//! Every value consumed from the wire goes through the validity checks here,
//! even when the caller "trusts" it: wire inputs ultimately originate from a
//! network peer. Scalars out of `[0, order)` are rejected rather than
//! silently reduced so the underlying constant-time multiply is never handed
//! an out-of-range operand.

use elliptic_curve::{
    group::Curve as _,
    point::AffineCoordinates,
    scalar::ScalarPrimitive,
    sec1::{EncodedPoint, FromEncodedPoint, ModulusSize, ToEncodedPoint},
    CurveArithmetic, Field, Group, PrimeField,
};
use p256::NistP256;
use p384::NistP384;
use p521::NistP521;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::RecoveryError;

/// Named prime curves the engine can instantiate. The recovery protocol
/// itself always runs on P-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveType {
    P256,
    P384,
    P521,
}

impl CurveType {
    /// Width in bytes of a serialized field element / scalar.
    pub fn field_size(self) -> usize {
        match self {
            CurveType::P256 => 32,
            CurveType::P384 => 48,
            CurveType::P521 => 66,
        }
    }

    /// Length of an uncompressed SEC1 point (`0x04 || X || Y`).
    pub fn point_size(self) -> usize {
        1 + 2 * self.field_size()
    }
}

/// A scalar in `[0, order)`, stored fixed-width big-endian and scrubbed on
/// drop. Range is enforced at construction and re-checked inside every
/// group operation.
#[derive(Clone, PartialEq, Eq)]
pub struct Scalar {
    curve_type: CurveType,
    bytes: Vec<u8>,
}

impl Scalar {
    pub fn curve_type(&self) -> CurveType {
        self.curve_type
    }

    /// Fixed-width big-endian serialization.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl Drop for Scalar {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print scalar material.
        write!(f, "Scalar({:?}, <redacted>)", self.curve_type)
    }
}

/// An owned elliptic-curve point, stored in SEC1 form. The point at infinity
/// is representable (single-byte identity encoding) because `add` can
/// produce it, but wire decoding via [`EllipticCurve::bytes_to_point`]
/// rejects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    curve_type: CurveType,
    bytes: Vec<u8>,
}

impl Point {
    pub fn curve_type(&self) -> CurveType {
        self.curve_type
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_infinity(&self) -> bool {
        self.bytes == [0x00]
    }
}

/// A freshly generated key pair. The private scalar zeroizes on drop.
pub struct KeyPair {
    pub public_key: Point,
    pub private_key: Scalar,
}

/// Immutable handle for one named curve. Freely shareable across threads;
/// all operations take it by reference.
#[derive(Debug, Clone, Copy)]
pub struct EllipticCurve {
    curve_type: CurveType,
}

/// Generic inner ops, instantiated per curve. All take and return the
/// fixed-width byte forms held by [`Scalar`] and [`Point`].
mod ops {
    use super::*;

    pub(super) fn decode_point<C>(bytes: &[u8]) -> Result<C::ProjectivePoint, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let encoded = EncodedPoint::<C>::from_bytes(bytes)
            .map_err(|_| RecoveryError::CurveValidity("malformed point encoding".into()))?;
        let affine: Option<C::AffinePoint> = C::AffinePoint::from_encoded_point(&encoded).into();
        let affine = affine
            .ok_or_else(|| RecoveryError::CurveValidity("point is not on the curve".into()))?;
        Ok(C::ProjectivePoint::from(affine))
    }

    pub(super) fn encode_point<C>(point: &C::ProjectivePoint) -> Vec<u8>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        point.to_affine().to_encoded_point(false).as_bytes().to_vec()
    }

    pub(super) fn decode_scalar<C>(bytes: &[u8]) -> Result<C::Scalar, RecoveryError>
    where
        C: CurveArithmetic,
    {
        let primitive = ScalarPrimitive::<C>::from_slice(bytes)
            .map_err(|_| RecoveryError::CurveValidity("scalar out of range".into()))?;
        Ok(C::Scalar::from(primitive))
    }

    pub(super) fn check_scalar<C>(bytes: &[u8]) -> Result<(), RecoveryError>
    where
        C: CurveArithmetic,
    {
        decode_scalar::<C>(bytes).map(|_| ())
    }

    /// Decode and re-encode, proving the bytes are a valid point in
    /// canonical form.
    pub(super) fn decode_point_check<C>(bytes: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let point = decode_point::<C>(bytes)?;
        Ok(encode_point::<C>(&point))
    }

    pub(super) fn encode_scalar<C>(scalar: &C::Scalar) -> Vec<u8>
    where
        C: CurveArithmetic,
    {
        scalar.to_repr().to_vec()
    }

    pub(super) fn is_valid<C>(bytes: &[u8]) -> bool
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        decode_point::<C>(bytes).is_ok()
    }

    pub(super) fn multiply<C>(point: &[u8], scalar: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let p = decode_point::<C>(point)?;
        let s = decode_scalar::<C>(scalar)?;
        Ok(encode_point::<C>(&(p * s)))
    }

    pub(super) fn multiply_with_generator<C>(scalar: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let s = decode_scalar::<C>(scalar)?;
        Ok(encode_point::<C>(&(C::ProjectivePoint::generator() * s)))
    }

    pub(super) fn add<C>(point1: &[u8], point2: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let p1 = decode_point::<C>(point1)?;
        let p2 = decode_point::<C>(point2)?;
        Ok(encode_point::<C>(&(p1 + p2)))
    }

    pub(super) fn mod_add<C>(a: &[u8], b: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
    {
        let a = decode_scalar::<C>(a)?;
        let b = decode_scalar::<C>(b)?;
        Ok(encode_scalar::<C>(&(a + b)))
    }

    pub(super) fn mod_negate<C>(a: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
    {
        let a = decode_scalar::<C>(a)?;
        Ok(encode_scalar::<C>(&(-a)))
    }

    pub(super) fn random_nonzero_scalar<C>() -> Vec<u8>
    where
        C: CurveArithmetic,
    {
        // Rejection sampling: draw in [0, order), redraw on zero.
        loop {
            let candidate = C::Scalar::random(&mut OsRng);
            if !bool::from(candidate.is_zero()) {
                return encode_scalar::<C>(&candidate);
            }
        }
    }

    pub(super) fn x_coordinate<C>(point: &[u8]) -> Result<Vec<u8>, RecoveryError>
    where
        C: CurveArithmetic,
        C::AffinePoint: FromEncodedPoint<C> + ToEncodedPoint<C>,
        C::FieldBytesSize: ModulusSize,
    {
        let p = decode_point::<C>(point)?;
        if bool::from(p.is_identity()) {
            return Err(RecoveryError::CurveValidity(
                "point at infinity has no affine coordinates".into(),
            ));
        }
        Ok(p.to_affine().x().to_vec())
    }
}

macro_rules! dispatch {
    ($self:expr, $func:ident ( $($arg:expr),* )) => {
        match $self.curve_type {
            CurveType::P256 => ops::$func::<NistP256>($($arg),*),
            CurveType::P384 => ops::$func::<NistP384>($($arg),*),
            CurveType::P521 => ops::$func::<NistP521>($($arg),*),
        }
    };
}

impl EllipticCurve {
    /// Resolve a named curve. Unsupported curves are unrepresentable in
    /// [`CurveType`], so resolution cannot fail at runtime.
    pub fn new(curve_type: CurveType) -> Self {
        EllipticCurve { curve_type }
    }

    pub fn curve_type(&self) -> CurveType {
        self.curve_type
    }

    /// Width in bytes of a serialized scalar or affine coordinate.
    pub fn field_size(&self) -> usize {
        self.curve_type.field_size()
    }

    /// Length of an uncompressed SEC1 point encoding.
    pub fn point_size(&self) -> usize {
        self.curve_type.point_size()
    }

    fn check_scalar(&self, scalar: &Scalar) -> Result<(), RecoveryError> {
        if scalar.curve_type != self.curve_type {
            return Err(RecoveryError::CurveValidity(format!(
                "scalar belongs to {:?}, expected {:?}",
                scalar.curve_type, self.curve_type
            )));
        }
        Ok(())
    }

    fn check_point(&self, point: &Point) -> Result<(), RecoveryError> {
        if point.curve_type != self.curve_type {
            return Err(RecoveryError::CurveValidity(format!(
                "point belongs to {:?}, expected {:?}",
                point.curve_type, self.curve_type
            )));
        }
        Ok(())
    }

    /// Parse a fixed-width big-endian scalar, rejecting values `>= order`.
    pub fn scalar_from_bytes(&self, bytes: &[u8]) -> Result<Scalar, RecoveryError> {
        if bytes.len() != self.field_size() {
            return Err(RecoveryError::CurveValidity(format!(
                "scalar must be {} bytes, got {}",
                self.field_size(),
                bytes.len()
            )));
        }
        // Round-trip through the curve's scalar field to enforce the range.
        dispatch!(self, check_scalar(bytes))?;
        Ok(Scalar {
            curve_type: self.curve_type,
            bytes: bytes.to_vec(),
        })
    }

    /// Draw uniformly from `[1, order)` by rejection sampling.
    pub fn random_nonzero_scalar(&self) -> Scalar {
        Scalar {
            curve_type: self.curve_type,
            bytes: dispatch!(self, random_nonzero_scalar()),
        }
    }

    /// `(a + b) mod order`. The result may be zero; the protocol's share
    /// dealing loop redraws until the sum it needs is non-zero.
    pub fn mod_add(&self, a: &Scalar, b: &Scalar) -> Result<Scalar, RecoveryError> {
        self.check_scalar(a)?;
        self.check_scalar(b)?;
        Ok(Scalar {
            curve_type: self.curve_type,
            bytes: dispatch!(self, mod_add(&a.bytes, &b.bytes))?,
        })
    }

    /// `(order - a) mod order`. This is how a logically negative scalar is
    /// expressed for [`Self::multiply_with_generator`], e.g. to build the
    /// inverted ephemeral point `G * (-x)`.
    pub fn mod_negate(&self, a: &Scalar) -> Result<Scalar, RecoveryError> {
        self.check_scalar(a)?;
        Ok(Scalar {
            curve_type: self.curve_type,
            bytes: dispatch!(self, mod_negate(&a.bytes))?,
        })
    }

    /// `point * scalar`. Rejects invalid points and out-of-range scalars.
    pub fn multiply(&self, point: &Point, scalar: &Scalar) -> Result<Point, RecoveryError> {
        self.check_point(point)?;
        self.check_scalar(scalar)?;
        Ok(Point {
            curve_type: self.curve_type,
            bytes: dispatch!(self, multiply(&point.bytes, &scalar.bytes))?,
        })
    }

    /// `G * scalar`, same scalar-range contract as [`Self::multiply`].
    pub fn multiply_with_generator(&self, scalar: &Scalar) -> Result<Point, RecoveryError> {
        self.check_scalar(scalar)?;
        Ok(Point {
            curve_type: self.curve_type,
            bytes: dispatch!(self, multiply_with_generator(&scalar.bytes))?,
        })
    }

    /// EC point addition; doubling when the operands are equal. Adding a
    /// point to its inverse yields the point at infinity.
    pub fn add(&self, point1: &Point, point2: &Point) -> Result<Point, RecoveryError> {
        self.check_point(point1)?;
        self.check_point(point2)?;
        Ok(Point {
            curve_type: self.curve_type,
            bytes: dispatch!(self, add(&point1.bytes, &point2.bytes))?,
        })
    }

    /// On-curve test; the point at infinity counts as valid.
    pub fn is_point_valid(&self, point: &Point) -> bool {
        point.curve_type == self.curve_type && dispatch!(self, is_valid(&point.bytes))
    }

    /// On-curve test that additionally rejects the point at infinity.
    pub fn is_point_valid_and_finite(&self, point: &Point) -> bool {
        self.is_point_valid(point) && !point.is_infinity()
    }

    /// Canonical uncompressed serialization (`0x04 || X || Y`).
    pub fn point_to_bytes(&self, point: &Point) -> Result<Vec<u8>, RecoveryError> {
        self.check_point(point)?;
        Ok(point.bytes.clone())
    }

    /// Decode an uncompressed SEC1 encoding, rejecting anything that is not
    /// a valid finite point: wrong length, non-uncompressed tag, off-curve
    /// coordinates, and the identity encoding all fail.
    pub fn bytes_to_point(&self, bytes: &[u8]) -> Result<Point, RecoveryError> {
        if bytes.len() != self.point_size() || bytes[0] != 0x04 {
            return Err(RecoveryError::CurveValidity(
                "expected an uncompressed SEC1 point".into(),
            ));
        }
        let canonical = dispatch!(self, decode_point_check(bytes))?;
        Ok(Point {
            curve_type: self.curve_type,
            bytes: canonical,
        })
    }

    /// Generate `(public, private)` with a non-zero private scalar.
    pub fn generate_key_pair(&self) -> Result<KeyPair, RecoveryError> {
        let private_key = self.random_nonzero_scalar();
        let public_key = self.multiply_with_generator(&private_key)?;
        Ok(KeyPair {
            public_key,
            private_key,
        })
    }

    /// Affine X coordinate at the curve's fixed field-element width. Errors
    /// on the point at infinity, which has no affine representation.
    pub fn x_coordinate(&self, point: &Point) -> Result<Vec<u8>, RecoveryError> {
        self.check_point(point)?;
        dispatch!(self, x_coordinate(&point.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip_is_exact() {
        let curve = EllipticCurve::new(CurveType::P256);
        let scalar = curve.random_nonzero_scalar();
        let bytes = scalar.to_bytes();
        assert_eq!(bytes.len(), 32);
        let parsed = curve.scalar_from_bytes(&bytes).expect("parse failed");
        assert_eq!(parsed, scalar);
    }

    #[test]
    fn scalar_at_or_above_order_is_rejected() {
        let curve = EllipticCurve::new(CurveType::P256);
        // All-ones is far above the P-256 group order.
        let too_big = vec![0xffu8; 32];
        assert!(matches!(
            curve.scalar_from_bytes(&too_big),
            Err(RecoveryError::CurveValidity(_))
        ));
    }

    #[test]
    fn point_round_trip_and_validity() {
        for curve_type in [CurveType::P256, CurveType::P384, CurveType::P521] {
            let curve = EllipticCurve::new(curve_type);
            let pair = curve.generate_key_pair().expect("keygen failed");
            assert!(curve.is_point_valid_and_finite(&pair.public_key));
            let bytes = curve.point_to_bytes(&pair.public_key).expect("encode");
            assert_eq!(bytes.len(), curve.point_size());
            assert_eq!(bytes[0], 0x04);
            let decoded = curve.bytes_to_point(&bytes).expect("decode");
            assert_eq!(decoded, pair.public_key);
        }
    }

    #[test]
    fn garbage_point_bytes_are_rejected() {
        let curve = EllipticCurve::new(CurveType::P256);
        let mut garbage = vec![0x04u8; curve.point_size()];
        garbage[1..].fill(0xab);
        assert!(curve.bytes_to_point(&garbage).is_err());
        assert!(curve.bytes_to_point(&[0x00]).is_err());
        assert!(curve.bytes_to_point(&[]).is_err());
    }

    #[test]
    fn adding_a_point_to_its_inverse_gives_infinity() {
        let curve = EllipticCurve::new(CurveType::P256);
        let pair = curve.generate_key_pair().expect("keygen failed");
        let negated = curve.mod_negate(&pair.private_key).expect("negate");
        let inverse = curve.multiply_with_generator(&negated).expect("mul");
        let sum = curve.add(&pair.public_key, &inverse).expect("add");
        assert!(sum.is_infinity());
        assert!(curve.is_point_valid(&sum));
        assert!(!curve.is_point_valid_and_finite(&sum));
        assert!(curve.x_coordinate(&sum).is_err());
    }

    #[test]
    fn mod_add_wraps_around_the_order() {
        let curve = EllipticCurve::new(CurveType::P256);
        let a = curve.random_nonzero_scalar();
        let neg_a = curve.mod_negate(&a).expect("negate");
        let sum = curve.mod_add(&a, &neg_a).expect("mod_add");
        assert!(sum.is_zero());
    }

    #[test]
    fn cross_curve_values_are_rejected() {
        let p256 = EllipticCurve::new(CurveType::P256);
        let p384 = EllipticCurve::new(CurveType::P384);
        let pair = p384.generate_key_pair().expect("keygen failed");
        assert!(!p256.is_point_valid(&pair.public_key));
        assert!(matches!(
            p256.multiply(&pair.public_key, &pair.private_key),
            Err(RecoveryError::CurveValidity(_))
        ));
    }
}
