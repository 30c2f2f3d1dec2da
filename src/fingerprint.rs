//! Stable identity fingerprints for normalized keys.
//!
//! The fingerprint is a pure function of the key type and its defining
//! parameters; source, timestamp and username never participate. It is the
//! sole deduplication key across sources.

use num_bigint_dig::BigUint;
use sha2::{Digest, Sha512};

use crate::error::NormalizeError;
use crate::record::KeyMaterial;

/// Computes the hex-encoded SHA-512 identity fingerprint of a key.
///
/// The digest input is the type tag and the defining parameters in a fixed
/// per-type order, joined with single spaces:
/// `rsa n e` | `dsa y p q g` | `ec curve x y` | `<type> <raw_container>`.
pub fn digest(material: &KeyMaterial) -> Result<String, NormalizeError> {
    let joined = match material {
        KeyMaterial::Rsa { n, e, .. } => format!("rsa {} {}", n, e),
        KeyMaterial::Dsa { p, q, g, y, .. } => format!("dsa {} {} {} {}", y, p, q, g),
        KeyMaterial::Ec { curve, x, y, .. } => {
            format!("ec {} {} {}", curve, coordinate(x), coordinate(y))
        }
        KeyMaterial::Raw {
            algorithm,
            raw_container: Some(raw),
            ..
        } => format!("{} {}", algorithm, raw),
        KeyMaterial::Raw {
            algorithm,
            raw_container: None,
            ..
        } => {
            return Err(NormalizeError::UnsupportedKeyType {
                key_type: algorithm.clone(),
            })
        }
    };

    let mut hasher = Sha512::new();
    hasher.update(joined.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// Points we cannot decompress keep the literal `None` token in coordinate
// positions so their fingerprints stay stable with the historical dataset.
fn coordinate(value: &Option<BigUint>) -> String {
    match value {
        Some(n) => n.to_string(),
        None => "None".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rsa_fingerprint_matches_reference() {
        let material = KeyMaterial::Rsa {
            n: BigUint::from(3233u32),
            e: BigUint::from(17u32),
            key_size: 12,
        };
        assert_eq!(
            digest(&material).unwrap(),
            "940d6c16394f98c91127ac5f3fabc4b0cd263aace75bcff5d53be0576822311f\
             d04c77924a02c71d1ee1e94388bde3bfdb323d2f40aa636f4a1680abb08ddb76"
        );
    }

    #[test]
    fn fingerprint_ignores_key_size() {
        let a = KeyMaterial::Rsa {
            n: BigUint::from(3233u32),
            e: BigUint::from(17u32),
            key_size: 12,
        };
        let b = KeyMaterial::Rsa {
            n: BigUint::from(3233u32),
            e: BigUint::from(17u32),
            key_size: 2048,
        };
        assert_eq!(digest(&a).unwrap(), digest(&b).unwrap());
    }

    #[test]
    fn dsa_field_order_is_y_p_q_g() {
        let material = KeyMaterial::Dsa {
            p: BigUint::from(2083u32),
            q: BigUint::from(1303u32),
            g: BigUint::from(7u32),
            y: BigUint::from(12345u32),
            key_size: 12,
        };
        assert_eq!(
            digest(&material).unwrap(),
            "160117f2df9f82abc8364155be5f2778e5500225468aa1df8eedb3e81aca5aa8\
             19b9ad956a53d670689af7d34b1aceab462e0a54b78e38ebb8dbe8eee949f169"
        );
    }

    #[test]
    fn raw_without_container_is_unsupported() {
        let material = KeyMaterial::Raw {
            algorithm: "unknown".to_owned(),
            raw_container: None,
            key_size: None,
        };
        assert!(matches!(
            digest(&material),
            Err(NormalizeError::UnsupportedKeyType { .. })
        ));
    }

    #[test]
    fn missing_coordinates_fingerprint_as_none_token() {
        let material = KeyMaterial::Ec {
            curve: "Curve25519".to_owned(),
            x: None,
            y: None,
            key_size: Some(256),
        };
        let mut hasher = Sha512::new();
        hasher.update(b"ec Curve25519 None None");
        assert_eq!(digest(&material).unwrap(), hex::encode(hasher.finalize()));
    }
}
