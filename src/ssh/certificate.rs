//! OpenSSH `*-cert-v01@openssh.com` certificate decoding.
//!
//! A certificate line yields two records: the certified leaf key carrying the
//! validity window and principal list, and the signing (CA) key pointing back
//! at the leaf by fingerprint.

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use byteorder::{BigEndian, ReadBytesExt};

use crate::clock;
use crate::curve::{self, CURVE25519};
use crate::error::NormalizeError;
use crate::record::{CertKeyValidity, DecodeOptions, DecodedKey, KeyMaterial};
use crate::ssh::decode::{decode_public_key_body, SshReadExt};
use crate::ssh::key_type;

pub fn decode_certificate_line(
    line: &str,
    options: &DecodeOptions,
) -> Result<Vec<DecodedKey>, NormalizeError> {
    let mut fields = line.split_whitespace();
    let algorithm = fields
        .next()
        .ok_or_else(|| NormalizeError::format("empty certificate line"))?;
    let blob = fields
        .next()
        .ok_or_else(|| NormalizeError::format("certificate line has no blob separator"))?;
    let base_algorithm = algorithm
        .strip_suffix(key_type::CERT_SUFFIX)
        .ok_or_else(|| {
            NormalizeError::format(format!("not a v01 certificate algorithm: {algorithm}"))
        })?;

    let raw = STANDARD
        .decode(blob)
        .map_err(|e| NormalizeError::format(format!("invalid base64 certificate blob: {e}")))?;
    let mut stream = Cursor::new(raw.as_slice());

    let inner_type = stream.read_ssh_string()?;
    if inner_type != algorithm {
        return Err(NormalizeError::format(format!(
            "certificate blob type `{inner_type}` does not match line algorithm `{algorithm}`"
        )));
    }
    let _nonce = stream.read_ssh_bytes()?;

    let leaf_material = decode_leaf_material(base_algorithm, &mut stream, options)?;

    let _serial = read_u64(&mut stream)?;
    let _cert_type = read_u32(&mut stream)?;
    let _key_id = stream.read_ssh_string()?;
    let principals = read_principals(&mut stream)?;
    let valid_after = read_u64(&mut stream)?;
    let valid_before = read_u64(&mut stream)?;
    let _critical_options = stream.read_ssh_bytes()?;
    let _extensions = stream.read_ssh_bytes()?;
    let _reserved = stream.read_ssh_bytes()?;
    let signature_key = stream.read_ssh_bytes()?;
    let _signature = stream.read_ssh_bytes()?;

    let leaf = DecodedKey::new(leaf_material)?.with_certkey(CertKeyValidity {
        certkey_valid_principals: principals,
        certkey_valid_after: format_validity(valid_after)?,
        certkey_valid_before: format_validity(valid_before)?,
    });

    let mut ca_stream = Cursor::new(signature_key.as_slice());
    let ca_algorithm = ca_stream.read_ssh_string()?;
    let ca_material = decode_leaf_material(&ca_algorithm, &mut ca_stream, options)?;
    let signing = DecodedKey::new(ca_material)?.signing_for(&leaf.uuid);

    Ok(vec![leaf, signing])
}

/// The certified key fields, laid out per base algorithm right after the
/// nonce. Ed25519 is the only shape the plain blob decoder does not cover.
fn decode_leaf_material(
    base_algorithm: &str,
    stream: &mut impl Read,
    options: &DecodeOptions,
) -> Result<KeyMaterial, NormalizeError> {
    if base_algorithm == key_type::ED25519 {
        let point = stream.read_ssh_bytes()?;
        let (x, y) = curve::decompress_edwards(&point)?;
        return Ok(KeyMaterial::Ec {
            curve: CURVE25519.to_owned(),
            x: Some(x),
            y: Some(y),
            key_size: Some(256),
        });
    }
    decode_public_key_body(base_algorithm, stream, options)
}

fn read_principals(stream: &mut impl Read) -> Result<Vec<String>, NormalizeError> {
    let packed = stream.read_ssh_bytes()?;
    let mut inner = Cursor::new(packed.as_slice());
    let mut principals = Vec::new();
    while (inner.position() as usize) < packed.len() {
        principals.push(inner.read_ssh_string()?);
    }
    Ok(principals)
}

// Harvested certificates carry validity epochs well past the u32 range
// (forever-valid certs use u64::MAX). Out-of-range epochs are scaled down
// by powers of ten until they are representable, matching the historical
// dataset rather than discarding the record.
fn format_validity(mut epoch: u64) -> Result<String, NormalizeError> {
    while epoch > u64::from(u32::MAX) {
        epoch /= 10;
    }
    clock::canonical_timestamp(epoch as i64).ok_or_else(|| {
        NormalizeError::invalid_parameter(format!("unrepresentable validity epoch: {epoch}"))
    })
}

fn read_u32(stream: &mut impl Read) -> Result<u32, NormalizeError> {
    stream
        .read_u32::<BigEndian>()
        .map_err(|e| NormalizeError::format(format!("truncated certificate field: {e}")))
}

fn read_u64(stream: &mut impl Read) -> Result<u64, NormalizeError> {
    stream
        .read_u64::<BigEndian>()
        .map_err(|e| NormalizeError::format(format!("truncated certificate field: {e}")))
}
