//! Decoding of single `authorized_keys`-style lines:
//! `"<algorithm> <base64-blob> [comment]"`.

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{BigEndian, ReadBytesExt};
use num_bigint_dig::BigUint;

use crate::curve::{self, CURVE25519};
use crate::error::NormalizeError;
use crate::record::{DecodeOptions, DecodedKey, KeyMaterial};
use crate::ssh::key_type;

const ED25519_POINT_LENGTH: usize = 32;
const STANDARD_DSA_SIZES: [usize; 3] = [1024, 2048, 3072];

/// Length-prefixed reads over the SSH wire format.
pub trait SshReadExt {
    fn read_ssh_string(&mut self) -> Result<String, NormalizeError>;
    fn read_ssh_bytes(&mut self) -> Result<Vec<u8>, NormalizeError>;
    fn read_ssh_mpint(&mut self) -> Result<BigUint, NormalizeError>;
}

impl<T> SshReadExt for T
where
    T: Read,
{
    fn read_ssh_string(&mut self) -> Result<String, NormalizeError> {
        let buffer = self.read_ssh_bytes()?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    fn read_ssh_bytes(&mut self) -> Result<Vec<u8>, NormalizeError> {
        let size = self
            .read_u32::<BigEndian>()
            .map_err(|e| NormalizeError::format(format!("truncated length prefix: {e}")))?
            as usize;
        let mut buffer = vec![0; size];
        self.read_exact(&mut buffer)
            .map_err(|e| NormalizeError::format(format!("truncated field of {size} bytes: {e}")))?;
        Ok(buffer)
    }

    fn read_ssh_mpint(&mut self) -> Result<BigUint, NormalizeError> {
        let mut buffer = self.read_ssh_bytes()?;
        // mpints are sign-prefixed; public key parameters are always positive.
        if buffer.first() == Some(&0) {
            buffer.remove(0);
        }
        Ok(BigUint::from_bytes_be(&buffer))
    }
}

/// Decodes one OpenSSH public-key line into 1–2 normalized keys.
///
/// Certificates yield two records (leaf and signing key); everything else
/// yields one.
pub fn decode_openssh_line(
    line: &str,
    options: &DecodeOptions,
) -> Result<Vec<DecodedKey>, NormalizeError> {
    let mut fields = line.split_whitespace();
    let algorithm = fields
        .next()
        .ok_or_else(|| NormalizeError::format("empty key line"))?;
    let blob = fields
        .next()
        .ok_or_else(|| NormalizeError::format("key line has no blob separator"))?;

    match algorithm {
        key_type::ED25519 => Ok(vec![decode_ed25519_blob(blob)?]),
        other if other.ends_with(key_type::CERT_SUFFIX) => {
            crate::ssh::certificate::decode_certificate_line(line, options)
        }
        other => Ok(vec![decode_generic_blob(other, blob, options)?]),
    }
}

/// Manual decode of an `ssh-ed25519` blob: algorithm-name field, 32-byte
/// compressed point, Edwards decompression.
fn decode_ed25519_blob(blob: &str) -> Result<DecodedKey, NormalizeError> {
    let raw = STANDARD
        .decode(blob)
        .map_err(|e| NormalizeError::format(format!("invalid base64 key blob: {e}")))?;
    let mut stream = Cursor::new(raw.as_slice());

    let name = stream.read_ssh_string()?;
    if name != key_type::ED25519 {
        return Err(NormalizeError::format(format!(
            "not an ssh-ed25519 public key: {name}"
        )));
    }

    let point = stream.read_ssh_bytes()?;
    if point.len() != ED25519_POINT_LENGTH {
        return Err(NormalizeError::format(format!(
            "unexpected key length: ed25519 keys are {ED25519_POINT_LENGTH} bytes, got {}",
            point.len()
        )));
    }

    let (x, y) = curve::decompress_edwards(&point)?;
    DecodedKey::new(KeyMaterial::Ec {
        curve: CURVE25519.to_owned(),
        x: Some(x),
        y: Some(y),
        key_size: Some(256),
    })
}

fn decode_generic_blob(
    algorithm: &str,
    blob: &str,
    options: &DecodeOptions,
) -> Result<DecodedKey, NormalizeError> {
    let raw = STANDARD
        .decode(blob)
        .map_err(|e| NormalizeError::format(format!("invalid base64 key blob: {e}")))?;
    let mut stream = Cursor::new(raw.as_slice());

    let inner_type = stream.read_ssh_string()?;
    if inner_type != algorithm {
        return Err(NormalizeError::format(format!(
            "key blob type `{inner_type}` does not match line algorithm `{algorithm}`"
        )));
    }

    DecodedKey::new(decode_public_key_body(&inner_type, &mut stream, options)?)
}

/// Decodes the body of a public-key blob whose type string has already been
/// consumed. Shared with the certificate decoder for signing-key blobs.
pub(crate) fn decode_public_key_body(
    algorithm: &str,
    stream: &mut impl Read,
    options: &DecodeOptions,
) -> Result<KeyMaterial, NormalizeError> {
    match algorithm {
        key_type::RSA => {
            let e = stream.read_ssh_mpint()?;
            let n = stream.read_ssh_mpint()?;
            let key_size = n.bits();
            Ok(KeyMaterial::Rsa { n, e, key_size })
        }
        key_type::DSS => {
            let p = stream.read_ssh_mpint()?;
            let q = stream.read_ssh_mpint()?;
            let g = stream.read_ssh_mpint()?;
            let y = stream.read_ssh_mpint()?;
            let key_size = p.bits();
            if !options.permissive && !STANDARD_DSA_SIZES.contains(&key_size) {
                return Err(NormalizeError::invalid_parameter(format!(
                    "non-standard DSA key size: {key_size}"
                )));
            }
            Ok(KeyMaterial::Dsa { p, q, g, y, key_size })
        }
        key_type::ECDSA_SHA2_NIST_P256
        | key_type::ECDSA_SHA2_NIST_P384
        | key_type::ECDSA_SHA2_NIST_P521 => {
            let (curve, field_bits) = match algorithm {
                key_type::ECDSA_SHA2_NIST_P256 => ("secp256r1", 256),
                key_type::ECDSA_SHA2_NIST_P384 => ("secp384r1", 384),
                _ => ("secp521r1", 521),
            };

            // Curve identifier duplicates the algorithm name.
            let _identifier = stream.read_ssh_string()?;
            let point = stream.read_ssh_bytes()?;
            let (x, y) = split_uncompressed_point(&point)?;

            Ok(KeyMaterial::Ec {
                curve: curve.to_owned(),
                x: Some(x),
                y: Some(y),
                key_size: Some(field_bits),
            })
        }
        other => Err(NormalizeError::unsupported_algorithm(other)),
    }
}

/// Splits an RFC 5656 uncompressed EC point (`0x04 || x || y`).
pub(crate) fn split_uncompressed_point(
    point: &[u8],
) -> Result<(BigUint, BigUint), NormalizeError> {
    match point.split_first() {
        Some((4, coordinates)) if coordinates.len() % 2 == 0 => {
            let (x, y) = coordinates.split_at(coordinates.len() / 2);
            Ok((BigUint::from_bytes_be(x), BigUint::from_bytes_be(y)))
        }
        Some((4, _)) => Err(NormalizeError::format(
            "uncompressed EC point has odd coordinate length",
        )),
        Some((tag, _)) => Err(NormalizeError::format(format!(
            "unsupported EC point encoding: 0x{tag:02x}"
        ))),
        None => Err(NormalizeError::format("empty EC point")),
    }
}
