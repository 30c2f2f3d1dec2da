//! ASCII-armor stripping.
//!
//! Harvested blobs arrive with literal `\n` escapes instead of newlines and
//! often with mangled armor headers, so this is deliberately tolerant: it
//! keeps only the base64 body between the first `-----` marker pair and drops
//! header lines, the CRC line and blanks.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::NormalizeError;

/// Recovers the binary packet stream from an armored block.
pub fn dearmor(armored: &str) -> Result<Vec<u8>, NormalizeError> {
    let unescaped = armored.replace("\\n", "\n");
    let body = unescaped
        .split("-----")
        .nth(2)
        .ok_or_else(|| NormalizeError::fatal("no armor markers in blob"))?;

    let base64_body: String = body
        .lines()
        .filter(|line| !line.is_empty() && !line.contains(':') && !line.starts_with('='))
        .collect();

    STANDARD
        .decode(base64_body.trim())
        .map_err(|e| NormalizeError::fatal(format!("invalid armor base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_headers_blanks_and_checksum() {
        let armored = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\
            Version: Test 1.0\n\
            \n\
            mQANBFlo\n\
            =abcd\n\
            -----END PGP PUBLIC KEY BLOCK-----\n";
        assert_eq!(dearmor(armored).unwrap(), STANDARD.decode("mQANBFlo").unwrap());
    }

    #[test]
    fn unescapes_literal_newlines() {
        let armored = "-----BEGIN PGP PUBLIC KEY BLOCK-----\\n\\nmQANBFlo\\n=abcd\\n-----END-----";
        assert_eq!(dearmor(armored).unwrap(), STANDARD.decode("mQANBFlo").unwrap());
    }

    #[test]
    fn missing_markers_is_fatal() {
        assert!(matches!(
            dearmor("mQANBFlo"),
            Err(NormalizeError::FatalDecode { .. })
        ));
    }
}
