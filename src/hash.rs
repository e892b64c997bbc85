//! SHA-256 hashing primitive plus address encode/validate/derive.
//!
//! Addresses are `"EKH"` followed by 48 hex characters: a 20-byte payload
//! and a 4-byte checksum equal to the leading 4 bytes of `SHA-256(payload)`.

use sha2::{Digest, Sha256};
use zeroize::Zeroize;

pub const ADDRESS_PREFIX: &str = "EKH";
const PAYLOAD_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;
const ADDRESS_HEX_LEN: usize = (PAYLOAD_LEN + CHECKSUM_LEN) * 2;

/// Reserved sender tokens that bypass address format entirely. `"00"` is
/// the coinbase sender; the rest are node-local system senders accepted
/// only when produced by the node itself.
pub const COINBASE_SENDER: &str = "00";
pub const SYSTEM_SENDERS: &[&str] = &["FAUCET", "ECOSYSTEM"];

pub fn is_reserved_sender(s: &str) -> bool {
    s == COINBASE_SENDER || SYSTEM_SENDERS.contains(&s)
}

/// SHA-256 of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha256(bytes))
}

/// Constant-time byte equality. Address validation sits on a path reachable
/// from untrusted peer input, so the checksum comparison must not leak
/// timing information about how many leading bytes matched.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Encodes a 20-byte payload as an `"EKH"`-prefixed address with an
/// appended 4-byte checksum.
pub fn encode_address(payload: &[u8; PAYLOAD_LEN]) -> String {
    let checksum = sha256(payload);
    let mut bytes = Vec::with_capacity(PAYLOAD_LEN + CHECKSUM_LEN);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&checksum[..CHECKSUM_LEN]);
    format!("{ADDRESS_PREFIX}{}", hex::encode(bytes))
}

/// Validates an address string. Accepts the reserved coinbase token `"00"`
/// unconditionally; otherwise requires the `EKH` prefix, the exact decoded
/// length, and a checksum match.
pub fn validate_address(s: &str) -> bool {
    if s == COINBASE_SENDER {
        return true;
    }
    let Some(hex_part) = s.strip_prefix(ADDRESS_PREFIX) else {
        return false;
    };
    if hex_part.len() != ADDRESS_HEX_LEN {
        return false;
    }
    let Ok(bytes) = hex::decode(hex_part) else {
        return false;
    };
    let (payload, checksum) = bytes.split_at(PAYLOAD_LEN);
    let expected = sha256(payload);
    ct_eq(checksum, &expected[..CHECKSUM_LEN])
}

/// Derives a wallet address from 32 bytes of private key material. There
/// is no signature scheme for transactions, so this is a key-identity
/// mapping only: `SHA-256(key)` stands in for
/// "public" material, and its first 20 bytes become the address payload.
/// The caller's key buffer is zeroized once consumed.
pub fn derive_address_from_private_key(mut key: [u8; 32]) -> String {
    let digest = sha256(&key);
    key.zeroize();
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&digest[..PAYLOAD_LEN]);
    encode_address(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn encode_then_validate_round_trips() {
        let payload = [7u8; PAYLOAD_LEN];
        let addr = encode_address(&payload);
        assert!(addr.starts_with(ADDRESS_PREFIX));
        assert_eq!(addr.len(), ADDRESS_PREFIX.len() + ADDRESS_HEX_LEN);
        assert!(validate_address(&addr));
    }

    #[test]
    fn coinbase_token_is_always_valid() {
        assert!(validate_address(COINBASE_SENDER));
    }

    #[rstest]
    #[case("EKHnotlongenough")]
    #[case("XYZ0011223344556677889900112233445566778899001122")]
    #[case("")]
    fn malformed_addresses_are_rejected(#[case] s: &str) {
        assert!(!validate_address(s));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let payload = [9u8; PAYLOAD_LEN];
        let mut addr = encode_address(&payload);
        // Flip the last hex character, which lives inside the checksum.
        let last = addr.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        addr.push(flipped);
        assert!(!validate_address(&addr));
    }

    #[test]
    fn derive_from_key_produces_valid_address() {
        let key = [42u8; 32];
        let addr = derive_address_from_private_key(key);
        assert!(validate_address(&addr));
    }

    #[test]
    fn ct_eq_matches_standard_equality() {
        assert!(ct_eq(b"abcd", b"abcd"));
        assert!(!ct_eq(b"abcd", b"abce"));
        assert!(!ct_eq(b"abc", b"abcd"));
    }
}
