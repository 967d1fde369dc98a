//! Wire-format encodings for raw key material, so callers building
//! [`torctl_wire::Command::AddOnion`] or `OnionClientAuthAdd` requests don't each
//! need their own base64/base32 dependency.

use base64::Engine;

/// ED25519-V3 onion keys and `ADD_ONION`'s `<algorithm>:<key>` form use base64.
pub fn key_to_base64(raw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}

pub fn key_from_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(encoded)
}

/// `ServiceID`s and `ClientAuthV3` public keys use unpadded base32.
pub fn service_id_to_base32(raw: &[u8]) -> String {
    data_encoding::BASE32_NOPAD.encode(raw)
}

pub fn service_id_from_base32(encoded: &str) -> Result<Vec<u8>, data_encoding::DecodeError> {
    data_encoding::BASE32_NOPAD.decode(encoded.to_ascii_uppercase().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trips() {
        let raw = b"some key bytes";
        assert_eq!(key_from_base64(&key_to_base64(raw)).unwrap(), raw);
    }

    #[test]
    fn base32_round_trips_case_insensitively() {
        let raw = b"service id bytes";
        let encoded = service_id_to_base32(raw).to_ascii_lowercase();
        assert_eq!(service_id_from_base32(&encoded).unwrap(), raw);
    }
}
