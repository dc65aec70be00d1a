//! Base64 helpers.
//!
//! JOSE segments use URL-safe base64 without padding; `x5c` certificate chains use standard
//! padded base64.

use base64::{engine::general_purpose, Engine as _};

pub(crate) fn encode_url(bytes: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn decode_url(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::URL_SAFE_NO_PAD.decode(text)
}

pub(crate) fn encode_standard(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub(crate) fn decode_standard(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_alphabet_has_no_padding() {
        let encoded = encode_url(&[0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
        assert_eq!(decode_url(&encoded).unwrap(), vec![0xfb, 0xff]);
    }

    #[test]
    fn url_decoding_rejects_standard_alphabet() {
        assert!(decode_url("+/8").is_err());
        assert_eq!(decode_standard(&encode_standard(b"cert")).unwrap(), b"cert");
    }
}
