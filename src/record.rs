//! Canonical normalized-record data model and its newline-delimited JSON
//! serialization.
//!
//! A [`DecodedKey`] is produced by exactly one decoder invocation from one raw
//! row or packet, enriched with its fingerprint and curve check at
//! construction, and wrapped into a [`KeyRecord`] by the driver once source
//! metadata is attached. Records are immutable once emitted.

use num_bigint_dig::BigUint;
use serde::ser::SerializeMap;
use serde::Serialize;

use crate::curve::{self, CurveCheck};
use crate::error::NormalizeError;
use crate::fingerprint;

/// Outer encoding carrying a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ContainerType {
    #[serde(rename = "openssh")]
    OpenSsh,
    #[serde(rename = "pgp")]
    Pgp,
    #[serde(rename = "x509")]
    X509,
}

/// Decode-time knobs.
///
/// Relaxations are an explicit configuration choice on the generic key
/// decoder, never an implicit default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DecodeOptions {
    /// Accept DSA keys whose prime size is outside {1024, 2048, 3072} bits.
    pub permissive: bool,
}

/// Closed union of the key material shapes a decoder can produce.
///
/// Edwards keys are `Ec` points on `Curve25519`; anything without a defined
/// per-algorithm field extraction lands in `Raw` with the original container
/// preserved.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyMaterial {
    Rsa {
        n: BigUint,
        e: BigUint,
        key_size: usize,
    },
    Dsa {
        p: BigUint,
        q: BigUint,
        g: BigUint,
        y: BigUint,
        key_size: usize,
    },
    Ec {
        curve: String,
        x: Option<BigUint>,
        y: Option<BigUint>,
        key_size: Option<usize>,
    },
    Raw {
        algorithm: String,
        raw_container: Option<String>,
        key_size: Option<usize>,
    },
}

impl KeyMaterial {
    /// The `key_type` tag used in output and fingerprinting.
    pub fn type_tag(&self) -> &str {
        match self {
            KeyMaterial::Rsa { .. } => "rsa",
            KeyMaterial::Dsa { .. } => "dsa",
            KeyMaterial::Ec { .. } => "ec",
            KeyMaterial::Raw { algorithm, .. } => algorithm,
        }
    }
}

// Big integers exceed JSON number precision, so all key parameters serialize
// as decimal strings. The record is emitted flat, matching the historical
// output schema.
impl Serialize for KeyMaterial {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.type_tag())?;
        match self {
            KeyMaterial::Rsa { n, e, key_size } => {
                map.serialize_entry("n", &n.to_string())?;
                map.serialize_entry("e", &e.to_string())?;
                map.serialize_entry("key_size", key_size)?;
            }
            KeyMaterial::Dsa { p, q, g, y, key_size } => {
                map.serialize_entry("p", &p.to_string())?;
                map.serialize_entry("q", &q.to_string())?;
                map.serialize_entry("g", &g.to_string())?;
                map.serialize_entry("y", &y.to_string())?;
                map.serialize_entry("key_size", key_size)?;
            }
            KeyMaterial::Ec { curve, x, y, key_size } => {
                map.serialize_entry("curve", curve)?;
                map.serialize_entry("x", &x.as_ref().map(BigUint::to_string))?;
                map.serialize_entry("y", &y.as_ref().map(BigUint::to_string))?;
                if let Some(key_size) = key_size {
                    map.serialize_entry("key_size", key_size)?;
                }
            }
            KeyMaterial::Raw {
                raw_container,
                key_size,
                ..
            } => {
                if let Some(raw) = raw_container {
                    map.serialize_entry("raw_container", raw)?;
                }
                if let Some(key_size) = key_size {
                    map.serialize_entry("key_size", key_size)?;
                }
            }
        }
        map.end()
    }
}

/// OpenSSH certificate metadata attached to a leaf key record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CertKeyValidity {
    pub certkey_valid_principals: Vec<String>,
    pub certkey_valid_after: String,
    pub certkey_valid_before: String,
}

/// X.509 certificate attributes attached to a record decoded from a PEM cert.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CertificateAttributes {
    pub serial_number: String,
    pub signature_hash_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_algorithm_oid: Option<String>,
    pub not_valid_before: Option<String>,
    pub not_valid_after: Option<String>,
    pub issuer_common_name: Option<String>,
    pub issuer_organization_name: Option<String>,
    pub issuer_country: Option<String>,
    pub subject_common_name: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub invalid_format: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub unsupported_algorithm: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One normalized key, before source metadata is attached.
///
/// Construction computes the identity fingerprint and, for EC material, the
/// point-on-curve check; both are fixed for the lifetime of the value.
#[derive(Clone, Debug, Serialize)]
pub struct DecodedKey {
    #[serde(flatten)]
    pub material: KeyMaterial,
    pub uuid: String,
    pub is_subkey: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_certkey: bool,
    #[serde(flatten)]
    pub certkey: Option<CertKeyValidity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_key_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pgp_pub_algorithm_type: Option<String>,
    #[serde(flatten)]
    pub certificate: Option<CertificateAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_on_curve: Option<CurveCheck>,
}

impl DecodedKey {
    pub fn new(material: KeyMaterial) -> Result<Self, NormalizeError> {
        let uuid = fingerprint::digest(&material)?;
        let is_on_curve = match &material {
            KeyMaterial::Ec { curve, x, y, .. } => Some(curve::enrich(curve, x, y)),
            _ => None,
        };

        Ok(DecodedKey {
            material,
            uuid,
            is_subkey: false,
            is_certkey: false,
            certkey: None,
            signed_key_uuid: None,
            pgp_pub_algorithm_type: None,
            certificate: None,
            is_on_curve,
        })
    }

    pub(crate) fn subkey(mut self, is_subkey: bool) -> Self {
        self.is_subkey = is_subkey;
        self
    }

    pub(crate) fn with_certkey(mut self, validity: CertKeyValidity) -> Self {
        self.is_certkey = true;
        self.certkey = Some(validity);
        self
    }

    pub(crate) fn signing_for(mut self, leaf_uuid: &str) -> Self {
        self.signed_key_uuid = Some(leaf_uuid.to_owned());
        self
    }
}

/// A fully attributed normalized record, one JSON object per output line.
#[derive(Clone, Debug, Serialize)]
pub struct KeyRecord {
    pub source: String,
    pub container_type: ContainerType,
    pub timestamp: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub key: DecodedKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rsa_record_serializes_flat() {
        let key = DecodedKey::new(KeyMaterial::Rsa {
            n: BigUint::from(3233u32),
            e: BigUint::from(17u32),
            key_size: 12,
        })
        .unwrap();
        let record = KeyRecord {
            source: "github.com".to_owned(),
            container_type: ContainerType::OpenSsh,
            timestamp: Some("2018-07-02 10:00:03".to_owned()),
            username: Some("alice".to_owned()),
            user_id: Some("1".to_owned()),
            key,
        };

        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["container_type"], "openssh");
        assert_eq!(value["type"], "rsa");
        assert_eq!(value["n"], "3233");
        assert_eq!(value["e"], "17");
        assert_eq!(value["key_size"], 12);
        assert_eq!(value["is_subkey"], false);
        assert!(value.get("is_certkey").is_none());
        assert!(value.get("is_on_curve").is_none());
    }

    #[test]
    fn ec_record_carries_curve_check_and_null_coordinates() {
        let key = DecodedKey::new(KeyMaterial::Ec {
            curve: "X448".to_owned(),
            x: None,
            y: None,
            key_size: Some(448),
        })
        .unwrap();

        let value = serde_json::to_value(&key).unwrap();
        assert_eq!(value["type"], "ec");
        assert_eq!(value["x"], serde_json::Value::Null);
        assert_eq!(value["is_on_curve"], "unknown");
    }

    #[test]
    fn on_curve_check_serializes_as_bool() {
        assert_eq!(serde_json::to_value(CurveCheck::OnCurve).unwrap(), true);
        assert_eq!(serde_json::to_value(CurveCheck::OffCurve).unwrap(), false);
    }
}
