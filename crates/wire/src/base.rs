//! Binary-to-text encodings used in presentation formats.

use data_encoding::{BASE32HEX_NOPAD, BASE64, HEXLOWER_PERMISSIVE};

/// Encode to lowercase hex.
pub fn hex_encode(octets: &[u8]) -> String {
    HEXLOWER_PERMISSIVE.encode(octets)
}

/// Decode hex of either case.
pub fn hex_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    HEXLOWER_PERMISSIVE
        .decode(text.as_bytes())
        .map_err(|_| EncodingError)
}

/// Encode to base64.
pub fn base64_encode(octets: &[u8]) -> String {
    BASE64.encode(octets)
}

/// Decode base64.
pub fn base64_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    BASE64.decode(text.as_bytes()).map_err(|_| EncodingError)
}

/// Encode to the lowercase, unpadded base32hex of NSEC3 owner names.
pub fn base32hex_encode(octets: &[u8]) -> String {
    BASE32HEX_NOPAD.encode(octets).to_ascii_lowercase()
}

/// Decode unpadded base32hex of either case.
pub fn base32hex_decode(text: &str) -> Result<Vec<u8>, EncodingError> {
    BASE32HEX_NOPAD
        .decode(text.to_ascii_uppercase().as_bytes())
        .map_err(|_| EncodingError)
}

//----------- EncodingError ----------------------------------------------------

/// Text did not match the expected encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodingError;

impl std::error::Error for EncodingError {}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid binary-to-text encoding")
    }
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let data = b"\x00\x01\xFE\xFF";
        assert_eq!(hex_decode(&hex_encode(data)).unwrap(), data);
        assert_eq!(base64_decode(&base64_encode(data)).unwrap(), data);
        assert_eq!(base32hex_decode(&base32hex_encode(data)).unwrap(), data);
    }

    #[test]
    fn base32hex_is_lowercase() {
        // The RFC 4648 test vector, in the form used in NSEC3 owner labels.
        assert_eq!(base32hex_encode(b"foobar"), "cpnmuoj1e8");
        assert_eq!(base32hex_decode("CPNMUOJ1E8").unwrap(), b"foobar");
    }
}
