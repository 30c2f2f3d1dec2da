//! Pure curve-equation evaluation for the named curves seen in harvested key
//! material, plus Edwards point decompression for Ed25519 keys.
//!
//! Operands for the larger curves exceed 64 bits, so everything runs on
//! [`BigUint`].

use num_bigint_dig::BigUint;

use crate::error::NormalizeError;

/// Canonical name used for Ed25519/X25519 points across all containers.
pub const CURVE25519: &str = "Curve25519";

/// Tri-state result of a point-on-curve check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CurveCheck {
    OnCurve,
    OffCurve,
    /// Coordinate missing, or the curve is not registered.
    Unknown,
}

impl serde::Serialize for CurveCheck {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CurveCheck::OnCurve => serializer.serialize_bool(true),
            CurveCheck::OffCurve => serializer.serialize_bool(false),
            CurveCheck::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// Checks whether `(x, y)` satisfies the equation of the named curve.
///
/// Short-Weierstrass curves (`secp*`, `brainpool*`) evaluate
/// `y^2 = x^3 + a*x + b (mod p)`; Curve25519 evaluates the twisted-Edwards
/// equation `-x^2 + y^2 = 1 + d*x^2*y^2 (mod p)`. Unregistered curve names
/// yield [`CurveCheck::Unknown`].
pub fn on_curve(x: &BigUint, y: &BigUint, curve: &str) -> CurveCheck {
    if curve == CURVE25519 {
        return edwards_check(x, y);
    }

    match weierstrass_params(curve) {
        Some((a, b, p)) => {
            let left = (y * y) % &p;
            let right = (x * x * x + &a * x + &b) % &p;
            if left == right {
                CurveCheck::OnCurve
            } else {
                CurveCheck::OffCurve
            }
        }
        None => CurveCheck::Unknown,
    }
}

/// Point check over optional coordinates, as stored on EC records.
pub(crate) fn enrich(curve: &str, x: &Option<BigUint>, y: &Option<BigUint>) -> CurveCheck {
    match (x, y) {
        (Some(x), Some(y)) => on_curve(x, y, curve),
        _ => CurveCheck::Unknown,
    }
}

fn edwards_check(x: &BigUint, y: &BigUint) -> CurveCheck {
    let p = ed25519_prime();
    let d = ed25519_d();

    let xx = (x * x) % &p;
    let yy = (y * y) % &p;

    // a = -1: fold the negation into the modulus to stay unsigned.
    let left = (&yy + &p - &xx) % &p;
    let right = (BigUint::from(1u8) + d * &xx * &yy) % &p;

    if left == right {
        CurveCheck::OnCurve
    } else {
        CurveCheck::OffCurve
    }
}

/// Decompresses a 32-byte Ed25519 point encoding into affine `(x, y)`.
///
/// The encoding is the little-endian `y` coordinate with the sign of `x`
/// stored in the top bit. Encodings that do not land on the curve are
/// rejected.
pub fn decompress_edwards(encoded: &[u8]) -> Result<(BigUint, BigUint), NormalizeError> {
    if encoded.len() != 32 {
        return Err(NormalizeError::format(format!(
            "edwards point must be 32 bytes, got {}",
            encoded.len()
        )));
    }

    let p = ed25519_prime();
    let d = ed25519_d();
    let one = BigUint::from(1u8);
    let two = BigUint::from(2u8);

    let x_sign = (encoded[31] >> 7) & 1;
    let mut y_bytes = [0u8; 32];
    y_bytes.copy_from_slice(encoded);
    y_bytes[31] &= 0x7f;
    let y = BigUint::from_bytes_le(&y_bytes);

    // x^2 = (y^2 - 1) / (d*y^2 + 1)
    let yy = (&y * &y) % &p;
    let u = (&yy + &p - &one) % &p;
    let v = (&d * &yy + &one) % &p;
    let v_inv = v.modpow(&(&p - &two), &p);
    let xx = (u * v_inv) % &p;

    // Candidate root x = xx^((p+3)/8); multiply by sqrt(-1) when it misses.
    let exponent = (&p + BigUint::from(3u8)) >> 3;
    let mut x = xx.modpow(&exponent, &p);
    if (&x * &x) % &p != xx {
        let sqrt_m1 = two.modpow(&((&p - &one) >> 2), &p);
        x = (x * sqrt_m1) % &p;
        if (&x * &x) % &p != xx {
            return Err(NormalizeError::format(
                "edwards point decompression failed: no square root",
            ));
        }
    }

    let x_is_odd = (&x % &two) == one;
    if x_is_odd != (x_sign == 1) {
        x = &p - x;
    }

    match edwards_check(&x, &y) {
        CurveCheck::OnCurve => Ok((x, y)),
        _ => Err(NormalizeError::format(
            "decoded edwards point is not on the curve",
        )),
    }
}

fn ed25519_prime() -> BigUint {
    // 2^255 - 19
    (BigUint::from(1u8) << 255) - BigUint::from(19u8)
}

fn ed25519_d() -> BigUint {
    hx("52036CEE2B6FFE738CC740797779E89800700A4D4141D8AB75EB4DCA135978A3")
}

fn hx(digits: &str) -> BigUint {
    BigUint::parse_bytes(digits.as_bytes(), 16).expect("valid hex curve constant")
}

/// `(a, b, p)` for the registered short-Weierstrass curves.
fn weierstrass_params(curve: &str) -> Option<(BigUint, BigUint, BigUint)> {
    let (a, b, p) = match curve {
        "secp112r1" => (
            "DB7C2ABF62E35E668076BEAD2088",
            "659EF8BA043916EEDE8911702B22",
            "DB7C2ABF62E35E668076BEAD208B",
        ),
        "secp112r2" => (
            "6127C24C05F38A0AAAF65C0EF02C",
            "51DEF1815DB5ED74FCC34C85D709",
            "DB7C2ABF62E35E668076BEAD208B",
        ),
        "secp128r1" => (
            "FFFFFFFDFFFFFFFFFFFFFFFFFFFFFFFC",
            "E87579C11079F43DD824993C2CEE5ED3",
            "FFFFFFFDFFFFFFFFFFFFFFFFFFFFFFFF",
        ),
        "secp128r2" => (
            "D6031998D1B3BBFEBF59CC9BBFF9AEE1",
            "5EEEFCA380D02919DC2C6558BB6D8A5D",
            "FFFFFFFDFFFFFFFFFFFFFFFFFFFFFFFF",
        ),
        "secp160k1" => (
            "0",
            "7",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFAC73",
        ),
        "secp160r1" => (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF7FFFFFFC",
            "1C97BEFC54BD7A8B65ACF89F81D4D4ADC565FA45",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF7FFFFFFF",
        ),
        "secp160r2" => (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFAC70",
            "B4E134D3FB59EB8BAB57274904664D5AF50388BA",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFAC73",
        ),
        "secp192k1" => (
            "0",
            "3",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFEE37",
        ),
        "secp192r1" => (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFC",
            "64210519E59C80E70FA7E9AB72243049FEB8DEECC146B9B1",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFF",
        ),
        "secp224k1" => (
            "0",
            "5",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFE56D",
        ),
        "secp224r1" => (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFFFFFFFFFFFFFFFFFE",
            "B4050A850C04B3ABF54132565044B0B7D7BFD8BA270B39432355FFB4",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF000000000000000000000001",
        ),
        "secp256k1" => (
            "0",
            "7",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFC2F",
        ),
        "secp256r1" => (
            "FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFC",
            "5AC635D8AA3A93E7B3EBBD55769886BC651D06B0CC53B0F63BCE3C3E27D2604B",
            "FFFFFFFF00000001000000000000000000000000FFFFFFFFFFFFFFFFFFFFFFFF",
        ),
        "secp384r1" => (
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFF0000000000000000FFFFFFFC",
            "B3312FA7E23EE7E4988E056BE3F82D19181D9C6EFE8141120314088F5013875AC656398D8A2ED19D2A85C8EDD3EC2AEF",
            "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFEFFFFFFFF0000000000000000FFFFFFFF",
        ),
        "secp521r1" => (
            "01FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFC",
            "0051953EB9618E1C9A1F929A21A0B68540EEA2DA725B99B315F3B8B489918EF109E156193951EC7E937B1652C0BD3BB1BF073573DF883D2C34F1EF451FD46B503F00",
            "01FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF",
        ),
        "brainpoolP160r1" => (
            "340E7BE2A280EB74E2BE61BADA745D97E8F7C300",
            "1E589A8595423412134FAA2DBDEC95C8D8675E58",
            "E95E4A5F737059DC60DFC7AD95B3D8139515620F",
        ),
        "brainpoolP160t1" => (
            "E95E4A5F737059DC60DFC7AD95B3D8139515620C",
            "7A556B6DAE535B7B51ED2C4D7DAA7A0B5C55F380",
            "E95E4A5F737059DC60DFC7AD95B3D8139515620F",
        ),
        "brainpoolP192r1" => (
            "6A91174076B1E0E19C39C031FE8685C1CAE040E5C69A28EF",
            "469A28EF7C28CCA3DC721D044F4496BCCA7EF4146FBF25C9",
            "C302F41D932A36CDA7A3463093D18DB78FCE476DE1A86297",
        ),
        "brainpoolP192t1" => (
            "C302F41D932A36CDA7A3463093D18DB78FCE476DE1A86294",
            "13D56FFAEC78681E68F9DEB43B35BEC2FB68542E27897B79",
            "C302F41D932A36CDA7A3463093D18DB78FCE476DE1A86297",
        ),
        "brainpoolP224r1" => (
            "68A5E62CA9CE6C1C299803A6C1530B514E182AD8B0042A59CAD29F43",
            "2580F63CCFE44138870713B1A92369E33E2135D266DBB372386C400B",
            "D7C134AA264366862A18302575D1D787B09F075797DA89F57EC8C0FF",
        ),
        "brainpoolP224t1" => (
            "D7C134AA264366862A18302575D1D787B09F075797DA89F57EC8C0FC",
            "4B337D934104CD7BEF271BF60CED1ED20DA14C08B3BB64F18A60888D",
            "D7C134AA264366862A18302575D1D787B09F075797DA89F57EC8C0FF",
        ),
        "brainpoolP256r1" => (
            "7D5A0975FC2C3057EEF67530417AFFE7FB8055C126DC5C6CE94A4B44F330B5D9",
            "26DC5C6CE94A4B44F330B5D9BBD77CBF958416295CF7E1CE6BCCDC18FF8C07B6",
            "A9FB57DBA1EEA9BC3E660A909D838D726E3BF623D52620282013481D1F6E5377",
        ),
        "brainpoolP256t1" => (
            "A9FB57DBA1EEA9BC3E660A909D838D726E3BF623D52620282013481D1F6E5374",
            "662C61C430D84EA4FE66A7733D0B76B7BF93EBC4AF2F49256AE58101FEE92B04",
            "A9FB57DBA1EEA9BC3E660A909D838D726E3BF623D52620282013481D1F6E5377",
        ),
        "brainpoolP320r1" => (
            "3EE30B568FBAB0F883CCEBD46D3F3BB8A2A73513F5EB79DA66190EB085FFA9F492F375A97D860EB4",
            "520883949DFDBC42D3AD198640688A6FE13F41349554B49ACC31DCCD884539816F5EB4AC8FB1F1A6",
            "D35E472036BC4FB7E13C785ED201E065F98FCFA6F6F40DEF4F92B9EC7893EC28FCD412B1F1B32E27",
        ),
        "brainpoolP320t1" => (
            "D35E472036BC4FB7E13C785ED201E065F98FCFA6F6F40DEF4F92B9EC7893EC28FCD412B1F1B32E24",
            "A7F561E038EB1ED560B3D147DB782013064C19F27ED27C6780AAF77FB8A547CEB5B4FEF422340353",
            "D35E472036BC4FB7E13C785ED201E065F98FCFA6F6F40DEF4F92B9EC7893EC28FCD412B1F1B32E27",
        ),
        "brainpoolP384r1" => (
            "7BC382C63D8C150C3C72080ACE05AFA0C2BEA28E4FB22787139165EFBA91F90F8AA5814A503AD4EB04A8C7DD22CE2826",
            "04A8C7DD22CE28268B39B55416F0447C2FB77DE107DCD2A62E880EA53EEB62D57CB4390295DBC9943AB78696FA504C11",
            "8CB91E82A3386D280F5D6F7E50E641DF152F7109ED5456B412B1DA197FB71123ACD3A729901D1A71874700133107EC53",
        ),
        "brainpoolP384t1" => (
            "8CB91E82A3386D280F5D6F7E50E641DF152F7109ED5456B412B1DA197FB71123ACD3A729901D1A71874700133107EC50",
            "7F519EADA7BDA81BD826DBA647910F8C4B9346ED8CCDC64E4B1ABD11756DCE1D2074AA263B88805CED70355A33B471EE",
            "8CB91E82A3386D280F5D6F7E50E641DF152F7109ED5456B412B1DA197FB71123ACD3A729901D1A71874700133107EC53",
        ),
        "brainpoolP512r1" => (
            "7830A3318B603B89E2327145AC234CC594CBDD8D3DF91610A83441CAEA9863BC2DED5D5AA8253AA10A2EF1C98B9AC8B57F1117A72BF2C7B9E7C1AC4D77FC94CA",
            "3DF91610A83441CAEA9863BC2DED5D5AA8253AA10A2EF1C98B9AC8B57F1117A72BF2C7B9E7C1AC4D77FC94CADC083E67984050B75EBAE5DD2809BD638016F723",
            "AADD9DB8DBE9C48B3FD4E6AE33C9FC07CB308DB3B3C9D20ED6639CCA703308717D4D9B009BC66842AECDA12AE6A380E62881FF2F2D82C68528AA6056583A48F3",
        ),
        "brainpoolP512t1" => (
            "AADD9DB8DBE9C48B3FD4E6AE33C9FC07CB308DB3B3C9D20ED6639CCA703308717D4D9B009BC66842AECDA12AE6A380E62881FF2F2D82C68528AA6056583A48F0",
            "7CBBBCF9441CFAB76E1890E46884EAE321F70C0BCB4981527897504BEC3E36A62BCDFA2304976540F6450085F2DAE145C22553B465763689180EA2571867423E",
            "AADD9DB8DBE9C48B3FD4E6AE33C9FC07CB308DB3B3C9D20ED6639CCA703308717D4D9B009BC66842AECDA12AE6A380E62881FF2F2D82C68528AA6056583A48F3",
        ),
        _ => return None,
    };

    Some((hx(a), hx(b), hx(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn dec(digits: &str) -> BigUint {
        BigUint::parse_bytes(digits.as_bytes(), 10).unwrap()
    }

    #[test]
    fn secp256r1_generator_is_on_curve() {
        let x = hx("6B17D1F2E12C4247F8BCE6E563A440F277037D812DEB33A0F4A13945D898C296");
        let y = hx("4FE342E2FE1A7F9B8EE7EB4A7C0F9E162BCE33576B315ECECBB6406837BF51F5");
        assert_eq!(on_curve(&x, &y, "secp256r1"), CurveCheck::OnCurve);
    }

    #[test]
    fn secp256r1_rejects_bogus_point() {
        let one = BigUint::from(1u8);
        assert_eq!(on_curve(&one, &one, "secp256r1"), CurveCheck::OffCurve);
    }

    #[rstest]
    #[case("secp384r1")]
    #[case("brainpoolP256r1")]
    #[case("brainpoolP512t1")]
    fn registered_curves_reject_origin(#[case] curve: &str) {
        let zero = BigUint::from(0u8);
        let one = BigUint::from(1u8);
        assert_eq!(on_curve(&one, &zero, curve), CurveCheck::OffCurve);
    }

    #[test]
    fn unregistered_curve_is_unknown() {
        let one = BigUint::from(1u8);
        assert_eq!(on_curve(&one, &one, "frp256v1"), CurveCheck::Unknown);
    }

    #[test]
    fn decompress_ed25519_base_point() {
        let encoded =
            hex::decode("5866666666666666666666666666666666666666666666666666666666666666")
                .unwrap();
        let (x, y) = decompress_edwards(&encoded).unwrap();
        assert_eq!(
            x,
            dec("15112221349535400772501151409588531511454012693041857206046113283949847762202")
        );
        assert_eq!(
            y,
            dec("46316835694926478169428394003475163141307993866256225615783033603165251855960")
        );
        assert_eq!(on_curve(&x, &y, CURVE25519), CurveCheck::OnCurve);
    }

    #[test]
    fn decompress_rejects_short_encoding() {
        assert!(decompress_edwards(&[0u8; 16]).is_err());
    }

    #[test]
    fn decompress_rejects_off_curve_encoding() {
        // y = 2 has no matching x on the curve.
        let mut encoded = [0u8; 32];
        encoded[0] = 2;
        assert!(decompress_edwards(&encoded).is_err());
    }

    #[test]
    fn missing_coordinate_is_unknown() {
        let one = BigUint::from(1u8);
        assert_eq!(
            enrich("secp256r1", &Some(one), &None),
            CurveCheck::Unknown
        );
    }
}
