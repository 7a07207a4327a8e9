//! Deterministic CBOR encoding of every protocol record.
//!
//! Encoding is lossless and byte-identical for identical structured input;
//! the encoded associated-data bytes are authenticated by the AEAD tag, so
//! the remote server must be able to re-derive the same bytes. Decoding
//! validates shape and required keys; unknown keys are ignored for forward
//! compatibility.

pub mod schema;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RecoveryError;
use crate::types::RecoveryRequestAssociatedData;

/// Outer transport envelope for mediator request/response messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "protocol_version")]
    pub protocol_version: u32,
    #[serde(rename = "cbor_payload", with = "serde_bytes")]
    pub cbor_payload: Vec<u8>,
}

/// Encode a record to canonical map-format bytes.
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, RecoveryError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(record, &mut bytes)
        .map_err(|e| RecoveryError::StructuralDecode(format!("CBOR encoding failed: {e}")))?;
    Ok(bytes)
}

/// Decode a record, failing on a non-map top level, a missing required key,
/// or a wrong-typed value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RecoveryError> {
    ciborium::from_reader(bytes)
        .map_err(|e| RecoveryError::StructuralDecode(format!("CBOR decoding failed: {e}")))
}

/// Wrap already-encoded payload bytes in the transport envelope.
pub fn encode_envelope(cbor_payload: Vec<u8>) -> Result<Vec<u8>, RecoveryError> {
    encode(&WireEnvelope {
        protocol_version: schema::PROTOCOL_VERSION,
        cbor_payload,
    })
}

/// Unwrap the transport envelope, rejecting unknown protocol versions.
pub fn decode_envelope(bytes: &[u8]) -> Result<Vec<u8>, RecoveryError> {
    let envelope: WireEnvelope = decode(bytes)?;
    if envelope.protocol_version != schema::PROTOCOL_VERSION {
        return Err(RecoveryError::StructuralDecode(format!(
            "unsupported protocol version {}",
            envelope.protocol_version
        )));
    }
    Ok(envelope.cbor_payload)
}

/// Decode request associated data and enforce its embedded schema version.
pub fn decode_request_associated_data(
    bytes: &[u8],
) -> Result<RecoveryRequestAssociatedData, RecoveryError> {
    let ad: RecoveryRequestAssociatedData = decode(bytes)?;
    if ad.schema_version != schema::SCHEMA_VERSION {
        return Err(RecoveryError::StructuralDecode(format!(
            "unsupported request schema version {}",
            ad.schema_version
        )));
    }
    Ok(ad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AeadPayload, HsmAssociatedData, HsmPlainText, HsmResponseAssociatedData,
        HsmResponsePlainText, OnboardingMetadata, RecoveryRequest, RecoveryRequestPlainText,
        UserIdType,
    };
    use ciborium::value::Value;

    fn sample_aead_payload() -> AeadPayload {
        AeadPayload {
            cipher_text: vec![1, 2, 3],
            associated_data: vec![],
            iv: vec![0; 12],
            tag: vec![0xaa; 16],
        }
    }

    fn top_level_text_keys(bytes: &[u8]) -> Vec<String> {
        let value: Value = ciborium::from_reader(bytes).expect("not valid CBOR");
        let Value::Map(entries) = value else {
            panic!("top level is not a map");
        };
        entries
            .into_iter()
            .map(|(k, _)| match k {
                Value::Text(t) => t,
                other => panic!("non-text map key {other:?}"),
            })
            .collect()
    }

    #[test]
    fn encoding_is_deterministic() {
        let record = HsmPlainText {
            mediator_share: vec![7; 32],
            dealer_pub_key: vec![4; 65],
            key_auth_value: vec![],
        };
        assert_eq!(encode(&record).unwrap(), encode(&record.clone()).unwrap());
    }

    #[test]
    fn every_record_round_trips_including_empty_byte_strings() {
        let hsm_pt = HsmPlainText {
            mediator_share: vec![],
            dealer_pub_key: vec![4; 65],
            key_auth_value: vec![],
        };
        assert_eq!(decode::<HsmPlainText>(&encode(&hsm_pt).unwrap()).unwrap(), hsm_pt);

        let hsm_ad = HsmAssociatedData {
            publisher_pub_key: vec![4; 65],
            channel_pub_key: vec![4; 65],
            rsa_public_key: vec![],
            onboarding_meta_data: OnboardingMetadata {
                user_id_type: UserIdType::GaiaId,
                user_id: "ユーザー@example.com".into(),
            },
        };
        assert_eq!(
            decode::<HsmAssociatedData>(&encode(&hsm_ad).unwrap()).unwrap(),
            hsm_ad
        );

        let request_ad = RecoveryRequestAssociatedData {
            hsm_payload: sample_aead_payload(),
            request_meta_data: vec![],
            epoch_meta_data: vec![9],
            epoch_pub_key: vec![4; 65],
            request_payload_salt: vec![0x5a; 32],
            schema_version: schema::SCHEMA_VERSION,
        };
        let encoded = encode(&request_ad).unwrap();
        assert_eq!(decode_request_associated_data(&encoded).unwrap(), request_ad);

        let request = RecoveryRequest {
            request_payload: sample_aead_payload(),
            rsa_signature: vec![],
        };
        assert_eq!(
            decode::<RecoveryRequest>(&encode(&request).unwrap()).unwrap(),
            request
        );

        let request_pt = RecoveryRequestPlainText {
            ephemeral_pub_inv_key: vec![4; 65],
        };
        assert_eq!(
            decode::<RecoveryRequestPlainText>(&encode(&request_pt).unwrap()).unwrap(),
            request_pt
        );

        let response_ad = HsmResponseAssociatedData {
            response_meta_data: vec![],
            response_salt: vec![1; 8],
        };
        assert_eq!(
            decode::<HsmResponseAssociatedData>(&encode(&response_ad).unwrap()).unwrap(),
            response_ad
        );

        let response_pt = HsmResponsePlainText {
            mediated_point: vec![4; 65],
            dealer_pub_key: vec![4; 65],
            key_auth_value: vec![],
        };
        assert_eq!(
            decode::<HsmResponsePlainText>(&encode(&response_pt).unwrap()).unwrap(),
            response_pt
        );
    }

    #[test]
    fn map_keys_match_the_schema_constants() {
        let keys = top_level_text_keys(&encode(&sample_aead_payload()).unwrap());
        assert_eq!(
            keys,
            vec![
                schema::KEY_AEAD_CT,
                schema::KEY_AEAD_AD,
                schema::KEY_AEAD_IV,
                schema::KEY_AEAD_TAG,
            ]
        );

        let response_pt = HsmResponsePlainText {
            mediated_point: vec![4; 65],
            dealer_pub_key: vec![4; 65],
            key_auth_value: vec![],
        };
        let keys = top_level_text_keys(&encode(&response_pt).unwrap());
        assert_eq!(
            keys,
            vec![
                schema::KEY_MEDIATED_POINT,
                schema::KEY_DEALER_PUB_KEY,
                schema::KEY_KEY_AUTH_VALUE,
            ]
        );

        let envelope = WireEnvelope {
            protocol_version: schema::PROTOCOL_VERSION,
            cbor_payload: vec![1],
        };
        let keys = top_level_text_keys(&encode(&envelope).unwrap());
        assert_eq!(
            keys,
            vec![schema::KEY_PROTOCOL_VERSION, schema::KEY_CBOR_PAYLOAD]
        );
    }

    #[test]
    fn byte_string_fields_are_cbor_byte_strings() {
        let encoded = encode(&sample_aead_payload()).unwrap();
        let value: Value = ciborium::from_reader(encoded.as_slice()).expect("valid CBOR");
        let Value::Map(entries) = value else {
            panic!("not a map")
        };
        for (key, field) in entries {
            if matches!(&key, Value::Text(t) if t == schema::KEY_AEAD_CT) {
                assert!(matches!(field, Value::Bytes(b) if b == vec![1, 2, 3]));
            }
        }
    }

    #[test]
    fn missing_required_key_fails_to_decode() {
        // A response plaintext is not a valid request plaintext: the
        // `ephemeral_pub_inv_key` field is absent.
        let response_pt = HsmResponseAssociatedData {
            response_meta_data: vec![],
            response_salt: vec![],
        };
        let encoded = encode(&response_pt).unwrap();
        assert!(matches!(
            decode::<RecoveryRequestPlainText>(&encoded),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }

    #[test]
    fn wrong_typed_value_fails_to_decode() {
        // schema_version as a byte string instead of an integer.
        let bogus = Value::Map(vec![(
            Value::Text(schema::KEY_SCHEMA_VERSION.into()),
            Value::Bytes(vec![1]),
        )]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&bogus, &mut bytes).unwrap();
        assert!(matches!(
            decode::<RecoveryRequestAssociatedData>(&bytes),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut entries = match ciborium::from_reader::<Value, _>(
            encode(&sample_aead_payload()).unwrap().as_slice(),
        )
        .unwrap()
        {
            Value::Map(entries) => entries,
            _ => unreachable!(),
        };
        entries.push((
            Value::Text("future_extension".into()),
            Value::Integer(42.into()),
        ));
        let mut bytes = Vec::new();
        ciborium::into_writer(&Value::Map(entries), &mut bytes).unwrap();
        let decoded: AeadPayload = decode(&bytes).expect("unknown key should be ignored");
        assert_eq!(decoded, sample_aead_payload());
    }

    #[test]
    fn non_map_top_level_fails() {
        let mut bytes = Vec::new();
        ciborium::into_writer(&Value::Integer(5.into()), &mut bytes).unwrap();
        assert!(decode::<AeadPayload>(&bytes).is_err());
    }

    #[test]
    fn envelope_rejects_unknown_protocol_version() {
        let envelope = WireEnvelope {
            protocol_version: 99,
            cbor_payload: vec![],
        };
        let bytes = encode(&envelope).unwrap();
        assert!(matches!(
            decode_envelope(&bytes),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }

    #[test]
    fn request_ad_rejects_unknown_schema_version() {
        let request_ad = RecoveryRequestAssociatedData {
            hsm_payload: sample_aead_payload(),
            request_meta_data: vec![],
            epoch_meta_data: vec![],
            epoch_pub_key: vec![],
            request_payload_salt: vec![],
            schema_version: 2,
        };
        let bytes = encode(&request_ad).unwrap();
        assert!(matches!(
            decode_request_associated_data(&bytes),
            Err(RecoveryError::StructuralDecode(_))
        ));
    }
}
