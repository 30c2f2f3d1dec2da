//! X.509 certificate decoding.
//!
//! Harvested certificates arrive as PEM text with literal `\n` escapes and
//! arbitrary wrapping, so decoding starts by reframing the blob into clean
//! 64-column PEM. Certificates whose subject key algorithm has no field
//! extraction are not dropped: an external inspector (`openssl x509 -text`)
//! names the algorithm and the record keeps the whole PEM as its raw
//! container.

use std::io::Write as _;
use std::process::Command;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDateTime;
use num_bigint_dig::BigUint;
use tempfile::NamedTempFile;
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use crate::clock;
use crate::error::NormalizeError;
use crate::record::{CertificateAttributes, DecodeOptions, DecodedKey, KeyMaterial};
use crate::ssh::decode::split_uncompressed_point;

const BEGIN_CERT: &str = "-----BEGIN CERTIFICATE-----";
const END_CERT: &str = "-----END CERTIFICATE-----";

const STANDARD_DSA_SIZES: [usize; 3] = [1024, 2048, 3072];

pub struct X509Decoder {
    options: DecodeOptions,
    inspector: String,
}

impl X509Decoder {
    pub fn new(options: DecodeOptions) -> Self {
        X509Decoder {
            options,
            inspector: "openssl".to_owned(),
        }
    }

    /// Overrides the external inspector binary used for certificates whose
    /// key algorithm we cannot extract ourselves.
    pub fn with_inspector(mut self, inspector: impl Into<String>) -> Self {
        self.inspector = inspector.into();
        self
    }

    pub fn decode(&self, raw: &str) -> Result<DecodedKey, NormalizeError> {
        let pem = normalize_pem(raw);
        let mut der = STANDARD
            .decode(pem_body(&pem))
            .map_err(|e| NormalizeError::fatal(format!("unable to load certificate: {e}")))?;

        // A malformed validity time must not cost the whole record: patch it
        // to the epoch and retry, then report the field as unreadable.
        let mut patched_times = None;
        if X509Certificate::from_der(&der).is_err() {
            patched_times = sanitize_validity(&mut der);
        }
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| NormalizeError::fatal(format!("unable to load certificate: {e}")))?;

        let mut attributes = certificate_attributes(&cert);
        if let Some((before_patched, after_patched)) = patched_times {
            attributes.invalid_format = true;
            if before_patched {
                attributes.not_valid_before = None;
            }
            if after_patched {
                attributes.not_valid_after = None;
            }
        }
        let material = match self.decode_public_key(&cert) {
            Ok(material) => material,
            Err(NormalizeError::UnsupportedAlgorithm { algorithm }) => {
                log::warn!("unsupported certificate key algorithm: {algorithm}");
                attributes.unsupported_algorithm = true;
                self.inspect_unsupported(&pem)?
            }
            Err(e) => return Err(e),
        };

        let mut key = DecodedKey::new(material)?;
        key.certificate = Some(attributes);
        Ok(key)
    }

    fn decode_public_key(&self, cert: &X509Certificate<'_>) -> Result<KeyMaterial, NormalizeError> {
        let spki = cert.public_key();
        let parsed = spki
            .parsed()
            .map_err(|_| NormalizeError::unsupported_algorithm(spki.algorithm.algorithm.to_id_string()))?;

        match parsed {
            PublicKey::RSA(rsa) => {
                let n = BigUint::from_bytes_be(rsa.modulus);
                let e = BigUint::from_bytes_be(rsa.exponent);
                let key_size = n.bits();
                Ok(KeyMaterial::Rsa { n, e, key_size })
            }
            PublicKey::EC(point) => {
                let curve_oid = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|any| any.as_oid().ok())
                    .map(|oid| oid.to_id_string())
                    .ok_or_else(|| NormalizeError::unsupported_algorithm("ec without named curve"))?;
                let (curve, key_size) = named_curve(&curve_oid)
                    .ok_or_else(|| NormalizeError::unsupported_algorithm(curve_oid))?;
                let (x, y) = split_uncompressed_point(point.data())?;
                Ok(KeyMaterial::Ec {
                    curve: curve.to_owned(),
                    x: Some(x),
                    y: Some(y),
                    key_size: Some(key_size),
                })
            }
            PublicKey::DSA(y_bytes) => {
                let params = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|any| any.as_sequence().ok())
                    .and_then(|seq| der_unsigned_integers(seq.content.as_ref()))
                    .ok_or_else(|| NormalizeError::unsupported_algorithm("dsa without parameters"))?;
                let [p, q, g] = params.try_into().map_err(|_| {
                    NormalizeError::unsupported_algorithm("dsa with malformed parameters")
                })?;
                let y = BigUint::from_bytes_be(y_bytes);
                let key_size = p.bits();
                if !self.options.permissive && !STANDARD_DSA_SIZES.contains(&key_size) {
                    return Err(NormalizeError::invalid_parameter(format!(
                        "non-standard DSA key size: {key_size}"
                    )));
                }
                Ok(KeyMaterial::Dsa { p, q, g, y, key_size })
            }
            _ => Err(NormalizeError::unsupported_algorithm(
                spki.algorithm.algorithm.to_id_string(),
            )),
        }
    }

    // Last resort for algorithms we have no extraction for: have openssl name
    // the algorithm and keep the PEM itself as the key material.
    fn inspect_unsupported(&self, pem: &str) -> Result<KeyMaterial, NormalizeError> {
        let mut file = NamedTempFile::new()?;
        file.write_all(pem.as_bytes())?;
        file.flush()?;

        let output = Command::new(&self.inspector)
            .arg("x509")
            .arg("-in")
            .arg(file.path())
            .arg("-text")
            .output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        let algorithm = text
            .lines()
            .find_map(|line| line.trim().strip_prefix("Public Key Algorithm: "))
            .unwrap_or("unknown")
            .to_owned();

        Ok(KeyMaterial::Raw {
            algorithm,
            raw_container: Some(pem.to_owned()),
            key_size: None,
        })
    }
}

/// Reframes an escaped or arbitrarily wrapped PEM blob into clean 64-column
/// PEM between fresh markers.
pub fn normalize_pem(raw: &str) -> String {
    let body: String = raw
        .replace(BEGIN_CERT, "")
        .replace(END_CERT, "")
        .replace("\\n", "\n")
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let mut pem = String::with_capacity(body.len() + body.len() / 64 + 64);
    pem.push_str(BEGIN_CERT);
    pem.push('\n');
    for chunk in body.as_bytes().chunks(64) {
        // base64 body is ascii by construction
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(END_CERT);
    pem.push('\n');
    pem
}

fn pem_body(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----"))
        .collect()
}

fn certificate_attributes(cert: &X509Certificate<'_>) -> CertificateAttributes {
    let mut attributes = CertificateAttributes {
        serial_number: BigUint::from_bytes_be(cert.raw_serial()).to_string(),
        ..CertificateAttributes::default()
    };

    let signature_oid = cert.signature_algorithm.algorithm.to_id_string();
    match signature_hash(&signature_oid) {
        Some(hash) => attributes.signature_hash_algorithm = Some(hash.to_owned()),
        None => {
            log::warn!("unknown signature hash algorithm, oid {signature_oid}");
            attributes.signature_algorithm_oid = Some(signature_oid);
        }
    }

    let validity = cert.validity();
    match clock::canonical_timestamp(validity.not_before.timestamp()) {
        Some(ts) => attributes.not_valid_before = Some(ts),
        None => attributes.invalid_format = true,
    }
    match clock::canonical_timestamp(validity.not_after.timestamp()) {
        Some(ts) => attributes.not_valid_after = Some(ts),
        None => attributes.invalid_format = true,
    }

    attributes.issuer_common_name = first_value(cert.issuer().iter_common_name());
    attributes.issuer_organization_name = first_value(cert.issuer().iter_organization());
    attributes.issuer_country = first_value(cert.issuer().iter_country());
    attributes.subject_common_name = first_value(cert.subject().iter_common_name());

    attributes
}

fn first_value<'a>(
    mut attributes: impl Iterator<Item = &'a AttributeTypeAndValue<'a>>,
) -> Option<String> {
    attributes
        .next()
        .and_then(|attribute| attribute.as_str().ok())
        .map(str::to_owned)
}

fn signature_hash(oid: &str) -> Option<&'static str> {
    Some(match oid {
        "1.2.840.113549.1.1.2" | "1.2.840.113549.1.1.4" => "md5",
        "1.2.840.113549.1.1.5" | "1.2.840.10040.4.3" | "1.2.840.10045.4.1" => "sha1",
        "1.2.840.113549.1.1.14" | "1.2.840.10045.4.3.1" => "sha224",
        "1.2.840.113549.1.1.11" | "1.2.840.10045.4.3.2" | "2.16.840.1.101.3.4.3.2" => "sha256",
        "1.2.840.113549.1.1.12" | "1.2.840.10045.4.3.3" => "sha384",
        "1.2.840.113549.1.1.13" | "1.2.840.10045.4.3.4" => "sha512",
        "1.3.101.112" => "ed25519",
        "1.3.101.113" => "ed448",
        _ => return None,
    })
}

fn named_curve(oid: &str) -> Option<(&'static str, usize)> {
    Some(match oid {
        "1.2.840.10045.3.1.1" => ("secp192r1", 192),
        "1.2.840.10045.3.1.7" => ("secp256r1", 256),
        "1.3.132.0.10" => ("secp256k1", 256),
        "1.3.132.0.33" => ("secp224r1", 224),
        "1.3.132.0.34" => ("secp384r1", 384),
        "1.3.132.0.35" => ("secp521r1", 521),
        "1.3.36.3.3.2.8.1.1.7" => ("brainpoolP256r1", 256),
        "1.3.36.3.3.2.8.1.1.11" => ("brainpoolP384r1", 384),
        "1.3.36.3.3.2.8.1.1.13" => ("brainpoolP512r1", 512),
        _ => return None,
    })
}

/// Scans the content octets of a DER SEQUENCE for its top-level INTEGERs.
/// Used for DSA parameters, whose shape never nests.
fn der_unsigned_integers(mut content: &[u8]) -> Option<Vec<BigUint>> {
    let mut integers = Vec::new();
    while !content.is_empty() {
        let (&tag, rest) = content.split_first()?;
        if tag != 0x02 {
            return None;
        }
        let (&first, rest) = rest.split_first()?;
        let (length, rest) = match first {
            0x00..=0x7f => (first as usize, rest),
            0x81 => (*rest.first()? as usize, rest.get(1..)?),
            0x82 => {
                let high = *rest.first()? as usize;
                let low = *rest.get(1)? as usize;
                ((high << 8) | low, rest.get(2..)?)
            }
            _ => return None,
        };
        let value = rest.get(..length)?;
        let magnitude = value.strip_prefix(&[0x00]).unwrap_or(value);
        integers.push(BigUint::from_bytes_be(magnitude));
        content = rest.get(length..)?;
    }
    Some(integers)
}

/// Walks the outer certificate structure down to the validity SEQUENCE and
/// overwrites any time field whose content is not a well-formed ASN.1 time
/// with a same-length epoch placeholder, leaving every DER length intact.
/// Returns which of (notBefore, notAfter) were replaced, or `None` when the
/// validity block is not the problem.
fn sanitize_validity(der: &mut [u8]) -> Option<(bool, bool)> {
    let data = der.to_vec();
    let (tag, cert_content, _) = read_tlv(&data, 0)?;
    if tag != 0x30 {
        return None;
    }
    let (tag, tbs_content, _) = read_tlv(&data, cert_content)?;
    if tag != 0x30 {
        return None;
    }

    let mut pos = tbs_content;
    // optional [0] EXPLICIT version
    let (tag, content, length) = read_tlv(&data, pos)?;
    if tag == 0xa0 {
        pos = content + length;
    }
    // serialNumber, signature AlgorithmIdentifier, issuer Name
    for expected in [0x02u8, 0x30, 0x30] {
        let (tag, content, length) = read_tlv(&data, pos)?;
        if tag != expected {
            return None;
        }
        pos = content + length;
    }
    let (tag, validity_content, _) = read_tlv(&data, pos)?;
    if tag != 0x30 {
        return None;
    }

    let mut patched = (false, false);
    let mut time_pos = validity_content;
    for field in [&mut patched.0, &mut patched.1] {
        let (tag, content, length) = read_tlv(&data, time_pos)?;
        if tag != 0x17 && tag != 0x18 {
            return None;
        }
        if !asn1_time_is_valid(tag, &data[content..content + length]) {
            let placeholder = epoch_placeholder(tag, length)?;
            der[content..content + length].copy_from_slice(&placeholder);
            *field = true;
        }
        time_pos = content + length;
    }

    if patched == (false, false) {
        None
    } else {
        Some(patched)
    }
}

/// Reads one DER TLV at `pos`, returning (tag, content offset, content length).
fn read_tlv(data: &[u8], pos: usize) -> Option<(u8, usize, usize)> {
    let tag = *data.get(pos)?;
    let first = *data.get(pos + 1)?;
    let (length, content) = match first {
        0x00..=0x7f => (first as usize, pos + 2),
        0x81 => (*data.get(pos + 2)? as usize, pos + 3),
        0x82 => {
            let high = *data.get(pos + 2)? as usize;
            let low = *data.get(pos + 3)? as usize;
            ((high << 8) | low, pos + 4)
        }
        0x83 => {
            let octets = data.get(pos + 2..pos + 5)?;
            (
                ((octets[0] as usize) << 16) | ((octets[1] as usize) << 8) | octets[2] as usize,
                pos + 5,
            )
        }
        _ => return None,
    };
    if content + length > data.len() {
        return None;
    }
    Some((tag, content, length))
}

fn asn1_time_is_valid(tag: u8, content: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(content) else {
        return false;
    };
    match tag {
        0x17 => NaiveDateTime::parse_from_str(text, "%y%m%d%H%M%SZ").is_ok(),
        0x18 => NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%SZ").is_ok(),
        _ => false,
    }
}

fn epoch_placeholder(tag: u8, length: usize) -> Option<Vec<u8>> {
    match (tag, length) {
        (0x17, 13) => Some(b"700101000000Z".to_vec()),
        (0x18, 15) => Some(b"19700101000000Z".to_vec()),
        (0x18, n) if n >= 17 => {
            let mut placeholder = b"19700101000000.".to_vec();
            placeholder.resize(n - 1, b'0');
            placeholder.push(b'Z');
            Some(placeholder)
        }
        _ => None,
    }
}
