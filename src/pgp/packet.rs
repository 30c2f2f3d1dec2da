//! Packet-stream walker over a binary OpenPGP transferable public key.
//!
//! Only public-key (tag 6) and public-subkey (tag 14) packets produce
//! records; user ids, signatures and everything else are skipped by length.
//! A malformed packet *body* is a recoverable fault and the walk continues at
//! the next packet; a malformed *header* or a length running past the end of
//! the stream poisons the rest of the blob and ends the walk.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use num_bigint_dig::BigUint;

use crate::curve::{self, CURVE25519};
use crate::error::NormalizeError;
use crate::pgp::armor;
use crate::record::{DecodedKey, KeyMaterial};
use crate::ssh::decode::split_uncompressed_point;

const TAG_PUBLIC_KEY: u8 = 6;
const TAG_PUBLIC_SUBKEY: u8 = 14;

const OID_ED25519: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0xda, 0x47, 0x0f, 0x01];
const OID_CV25519: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x97, 0x55, 0x01, 0x05, 0x01];

/// Iterator over the key packets of one PGP blob.
pub struct PgpKeyStream {
    data: Vec<u8>,
    offset: usize,
    poisoned: bool,
}

impl PgpKeyStream {
    pub fn from_binary(data: Vec<u8>) -> Self {
        PgpKeyStream {
            data,
            offset: 0,
            poisoned: false,
        }
    }

    pub fn from_armored(armored: &str) -> Result<Self, NormalizeError> {
        Ok(Self::from_binary(armor::dearmor(armored)?))
    }

    /// Parses the header at the current offset and returns the body range of
    /// the next packet, advancing past it.
    fn next_packet(&mut self) -> Result<(u8, std::ops::Range<usize>), NormalizeError> {
        let header = self.data[self.offset];
        if header & 0x80 == 0 {
            return Err(NormalizeError::fatal(format!(
                "invalid packet header byte 0x{header:02x}"
            )));
        }

        let (tag, length, header_len) = if header & 0x40 != 0 {
            let tag = header & 0x3f;
            let rest = &self.data[self.offset + 1..];
            match rest.first().copied() {
                Some(first) if first < 192 => (tag, first as usize, 2),
                Some(first @ 192..=223) => {
                    let second = *rest.get(1).ok_or_else(truncated_header)?;
                    let length = ((first as usize - 192) << 8) + second as usize + 192;
                    (tag, length, 3)
                }
                Some(255) => {
                    if rest.len() < 5 {
                        return Err(truncated_header());
                    }
                    let length = u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]);
                    (tag, length as usize, 6)
                }
                Some(first) => {
                    return Err(NormalizeError::fatal(format!(
                        "partial body length octet 0x{first:02x} is not supported"
                    )));
                }
                None => return Err(truncated_header()),
            }
        } else {
            let tag = (header >> 2) & 0x0f;
            let rest = &self.data[self.offset + 1..];
            let length_octets = match header & 0x03 {
                0 => 1,
                1 => 2,
                2 => 4,
                _ => {
                    return Err(NormalizeError::fatal(
                        "indeterminate-length packet is not supported",
                    ));
                }
            };
            if rest.len() < length_octets {
                return Err(truncated_header());
            }
            let mut length = 0usize;
            for octet in &rest[..length_octets] {
                length = (length << 8) | *octet as usize;
            }
            (tag, length, 1 + length_octets)
        };

        let body_start = self.offset + header_len;
        let body_end = body_start + length;
        if body_end > self.data.len() {
            return Err(NormalizeError::fatal(format!(
                "packet length {length} runs past end of stream"
            )));
        }
        self.offset = body_end;
        Ok((tag, body_start..body_end))
    }
}

impl Iterator for PgpKeyStream {
    type Item = Result<DecodedKey, NormalizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.poisoned && self.offset < self.data.len() {
            let (tag, body) = match self.next_packet() {
                Ok(parsed) => parsed,
                Err(e) => {
                    self.poisoned = true;
                    return Some(Err(e));
                }
            };

            let is_subkey = match tag {
                TAG_PUBLIC_KEY => false,
                TAG_PUBLIC_SUBKEY => true,
                _ => continue,
            };
            return Some(decode_key_packet(&self.data[body], is_subkey));
        }
        None
    }
}

fn truncated_header() -> NormalizeError {
    NormalizeError::fatal("truncated packet header")
}

fn decode_key_packet(body: &[u8], is_subkey: bool) -> Result<DecodedKey, NormalizeError> {
    let mut cursor = Cursor::new(body);

    let version = read_u8(&mut cursor)?;
    match version {
        4 => skip(&mut cursor, 4)?, // creation time
        2 | 3 => skip(&mut cursor, 6)?, // creation time + validity days
        other => {
            return Err(NormalizeError::recoverable(format!(
                "unsupported key packet version {other}"
            )));
        }
    }
    let algorithm = read_u8(&mut cursor)?;

    let (material, algorithm_type) = match algorithm {
        // RSA encrypt-or-sign, encrypt-only, sign-only
        1 | 2 | 3 => {
            let (n, n_bits) = read_mpi(&mut cursor)?;
            let (e, _) = read_mpi(&mut cursor)?;
            (
                KeyMaterial::Rsa {
                    n,
                    e,
                    key_size: n_bits,
                },
                Some("rsa"),
            )
        }
        17 => {
            let (p, p_bits) = read_mpi(&mut cursor)?;
            let (q, _) = read_mpi(&mut cursor)?;
            let (g, _) = read_mpi(&mut cursor)?;
            let (y, _) = read_mpi(&mut cursor)?;
            (
                KeyMaterial::Dsa {
                    p,
                    q,
                    g,
                    y,
                    key_size: p_bits,
                },
                Some("dsa"),
            )
        }
        18 | 19 | 22 => {
            let algorithm_type = match algorithm {
                18 => "ecdh",
                19 => "ecdsa",
                _ => "eddsa",
            };
            (decode_ec_material(&mut cursor)?, Some(algorithm_type))
        }
        // ElGamal: kept as a raw dump of the packet body, with the key size
        // recovered from the leading prime when it parses.
        16 | 20 => {
            let key_size = read_mpi(&mut cursor).ok().map(|(_, bits)| bits);
            (
                KeyMaterial::Raw {
                    algorithm: "elg".to_owned(),
                    raw_container: Some(hex_dump(body)),
                    key_size,
                },
                Some("elg"),
            )
        }
        other => (
            KeyMaterial::Raw {
                algorithm: format!("pgp_{other}"),
                raw_container: Some(hex_dump(body)),
                key_size: None,
            },
            None,
        ),
    };

    let mut key = DecodedKey::new(material)?.subkey(is_subkey);
    key.pgp_pub_algorithm_type = algorithm_type.map(str::to_owned);
    Ok(key)
}

fn decode_ec_material(cursor: &mut Cursor<&[u8]>) -> Result<KeyMaterial, NormalizeError> {
    let oid_len = read_u8(cursor)? as usize;
    let mut oid = vec![0; oid_len];
    cursor
        .read_exact(&mut oid)
        .map_err(|_| NormalizeError::recoverable("truncated curve oid"))?;
    let (point, _) = read_mpi_bytes(cursor)?;

    if oid == OID_ED25519 {
        // EdDSA native encoding: 0x40 prefix then the compressed point.
        let compressed = point
            .strip_prefix(&[0x40])
            .ok_or_else(|| NormalizeError::recoverable("ed25519 point lacks 0x40 prefix"))?;
        let (x, y) = curve::decompress_edwards(compressed)?;
        return Ok(KeyMaterial::Ec {
            curve: CURVE25519.to_owned(),
            x: Some(x),
            y: Some(y),
            key_size: Some(256),
        });
    }
    if oid == OID_CV25519 {
        // Montgomery u-coordinates do not map onto the Weierstrass check.
        return Ok(KeyMaterial::Ec {
            curve: CURVE25519.to_owned(),
            x: None,
            y: None,
            key_size: Some(256),
        });
    }

    let (name, bits) = match oid.as_slice() {
        [0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07] => ("secp256r1", 256),
        [0x2b, 0x81, 0x04, 0x00, 0x22] => ("secp384r1", 384),
        [0x2b, 0x81, 0x04, 0x00, 0x23] => ("secp521r1", 521),
        [0x2b, 0x81, 0x04, 0x00, 0x0a] => ("secp256k1", 256),
        [0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x07] => ("brainpoolP256r1", 256),
        [0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0b] => ("brainpoolP384r1", 384),
        [0x2b, 0x24, 0x03, 0x03, 0x02, 0x08, 0x01, 0x01, 0x0d] => ("brainpoolP512r1", 512),
        _ => {
            return Err(NormalizeError::recoverable(format!(
                "unknown curve oid {}",
                hex::encode(&oid)
            )));
        }
    };
    let (x, y) = split_uncompressed_point(&point)
        .map_err(|e| NormalizeError::recoverable(format!("bad ec point: {e}")))?;
    Ok(KeyMaterial::Ec {
        curve: name.to_owned(),
        x: Some(x),
        y: Some(y),
        key_size: Some(bits),
    })
}

/// RFC 4880 multiprecision integer: big-endian bit count, then the magnitude.
/// Returns the value and the declared bit count (used as the key size).
fn read_mpi(cursor: &mut Cursor<&[u8]>) -> Result<(BigUint, usize), NormalizeError> {
    let (bytes, bits) = read_mpi_bytes(cursor)?;
    Ok((BigUint::from_bytes_be(&bytes), bits))
}

fn read_mpi_bytes(cursor: &mut Cursor<&[u8]>) -> Result<(Vec<u8>, usize), NormalizeError> {
    let bits = cursor
        .read_u16::<BigEndian>()
        .map_err(|_| NormalizeError::recoverable("truncated mpi length"))? as usize;
    let mut bytes = vec![0; (bits + 7) / 8];
    cursor
        .read_exact(&mut bytes)
        .map_err(|_| NormalizeError::recoverable(format!("truncated {bits}-bit mpi")))?;
    Ok((bytes, bits))
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, NormalizeError> {
    cursor
        .read_u8()
        .map_err(|_| NormalizeError::recoverable("truncated key packet"))
}

fn skip(cursor: &mut Cursor<&[u8]>, count: u64) -> Result<(), NormalizeError> {
    let position = cursor.position() + count;
    if position > cursor.get_ref().len() as u64 {
        return Err(NormalizeError::recoverable("truncated key packet"));
    }
    cursor.set_position(position);
    Ok(())
}

// Matches the historical raw-container rendering: unpadded lowercase hex per
// byte, joined with a literal `\x`.
fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:x}"))
        .collect::<Vec<_>>()
        .join("\\x")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurveCheck;
    use pretty_assertions::assert_eq;

    // Primary key (rsa), a version-9 subkey (recoverable fault), an ed25519
    // subkey and an unknown-algorithm (105) subkey.
    const KEY_STREAM_HEX: &str = "99000d0459682f0001000c0ca1000511\
        b900060959682f0001\
        b900330459682f0016092b06010401da470f01010740\
        5866666666666666666666666666666666666666666666666666666666666666\
        b9000a0459682f0069deadbeef";

    const ARMORED: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\
        Version: Test 1.0\n\
        \n\
        mQANBFloLwABAAwMoQAFEbkABglZaC8AAbkAMwRZaC8AFgkrBgEEAdpHDwEBB0BY\n\
        ZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZmZrkACgRZaC8Aad6tvu8=\n\
        =abcd\n\
        -----END PGP PUBLIC KEY BLOCK-----\n";

    fn stream() -> PgpKeyStream {
        PgpKeyStream::from_binary(hex::decode(KEY_STREAM_HEX).unwrap())
    }

    #[test]
    fn walks_keys_subkeys_and_faults() {
        let items: Vec<_> = stream().collect();
        assert_eq!(items.len(), 4);

        let primary = items[0].as_ref().unwrap();
        assert!(!primary.is_subkey);
        assert_eq!(primary.pgp_pub_algorithm_type.as_deref(), Some("rsa"));
        assert_eq!(
            primary.uuid,
            "940d6c16394f98c91127ac5f3fabc4b0cd263aace75bcff5d53be0576822311f\
             d04c77924a02c71d1ee1e94388bde3bfdb323d2f40aa636f4a1680abb08ddb76"
        );

        assert!(matches!(
            items[1],
            Err(NormalizeError::RecoverablePacket { .. })
        ));

        let eddsa = items[2].as_ref().unwrap();
        assert!(eddsa.is_subkey);
        assert_eq!(eddsa.pgp_pub_algorithm_type.as_deref(), Some("eddsa"));
        assert_eq!(eddsa.is_on_curve, Some(CurveCheck::OnCurve));
        assert_eq!(
            eddsa.uuid,
            "26101809e0e4f18caafe8900abfedeaae91343b89bce8517f081ad5c020f7e2e\
             9d2745972828d9cb0f3274bcd9f8f17cc3883979aee3734c0187b66edc778853"
        );
    }

    #[test]
    fn unknown_algorithm_keeps_raw_packet_body() {
        let items: Vec<_> = stream().collect();
        let raw = items[3].as_ref().unwrap();
        assert_eq!(raw.material.type_tag(), "pgp_105");
        assert_eq!(raw.pgp_pub_algorithm_type, None);
        match &raw.material {
            KeyMaterial::Raw { raw_container, .. } => {
                assert_eq!(
                    raw_container.as_deref(),
                    Some("4\\x59\\x68\\x2f\\x0\\x69\\xde\\xad\\xbe\\xef")
                );
            }
            other => panic!("expected raw material, got {other:?}"),
        }
        assert_eq!(
            raw.uuid,
            "c893efba8aecef0b1c8a33a5ce6aa5b0dab512b9565db0c6a1300a27b671a3c0\
             4968d5a7bf5ac633c62dfa8482173fc69ba3092570454376a68a105f8879f9d2"
        );
    }

    #[test]
    fn armored_blob_matches_binary_stream() {
        let from_armor: Vec<String> = PgpKeyStream::from_armored(ARMORED)
            .unwrap()
            .filter_map(|item| item.ok().map(|k| k.uuid))
            .collect();
        let from_binary: Vec<String> = stream()
            .filter_map(|item| item.ok().map(|k| k.uuid))
            .collect();
        assert_eq!(from_armor, from_binary);
        assert_eq!(from_armor.len(), 3);
    }

    #[test]
    fn length_past_end_poisons_the_stream() {
        let mut items = PgpKeyStream::from_binary(hex::decode("99ffff04").unwrap());
        assert!(matches!(
            items.next(),
            Some(Err(NormalizeError::FatalDecode { .. }))
        ));
        assert!(items.next().is_none());
    }

    #[test]
    fn header_cut_short_of_length_octets_is_fatal() {
        // Old-format tag 6 with a two-octet length field and no octets left.
        let mut items = PgpKeyStream::from_binary(vec![0x99]);
        assert!(matches!(
            items.next(),
            Some(Err(NormalizeError::FatalDecode { .. }))
        ));
        assert!(items.next().is_none());
    }

    #[test]
    fn missing_high_bit_is_fatal() {
        let mut items = PgpKeyStream::from_binary(vec![0x19, 0x00]);
        assert!(matches!(
            items.next(),
            Some(Err(NormalizeError::FatalDecode { .. }))
        ));
    }
}
