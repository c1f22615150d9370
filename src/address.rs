//! Account-hash codec for the 20-byte address form, plus the injectable
//! custom encode/decode pair some deployments skin their addresses with.

use crate::error::{ConfigError, Result};
use crate::types::strip_0x;
use alloy::primitives::keccak256;
use std::sync::Arc;

/// Decode a `0x`-optional hex address into its 20-byte account hash.
pub fn address_decode(addr: &str) -> Result<Vec<u8>> {
    let raw = strip_0x(addr.trim());
    let bytes = hex::decode(raw)
        .map_err(|err| ConfigError::Invalid(format!("address `{addr}` is not hex: {err}")))?;
    Ok(bytes)
}

/// Encode an account hash (or a secp256k1 public key) as a lowercase
/// `0x`-prefixed address.
///
/// A 20-byte input is taken as the account hash directly. Anything longer is
/// treated as a public key: keccak-256 of the uncompressed point body, last
/// 20 bytes.
pub fn address_encode(hash: &[u8]) -> String {
    if hash.len() == 20 {
        return format!("0x{}", hex::encode(hash));
    }
    // Uncompressed keys may carry the 0x04 prefix byte; hash the point body.
    let body = if hash.len() == 65 && hash[0] == 0x04 {
        &hash[1..]
    } else {
        hash
    };
    let digest = keccak256(body);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Shape check: `0x` prefix and exactly 20 hex-decodable bytes.
pub fn address_verify(address: &str) -> bool {
    let Some(raw) = address.strip_prefix("0x") else {
        return false;
    };
    match hex::decode(raw) {
        Ok(bytes) => bytes.len() == 20,
        Err(_) => false,
    }
}

/// Custom address skin: some deployments re-encode the canonical hex form
/// (base58 skins, bech32-like prefixes). The node facade applies `decode`
/// before anything goes on the wire and `encode` on everything read back.
#[derive(Clone)]
pub struct AddressCodec {
    pub encode: Arc<dyn Fn(&str) -> String + Send + Sync>,
    pub decode: Arc<dyn Fn(&str) -> String + Send + Sync>,
}

impl AddressCodec {
    /// Identity codec for chains that use the plain hex form.
    pub fn passthrough() -> Self {
        Self {
            encode: Arc::new(|addr: &str| addr.to_string()),
            decode: Arc::new(|addr: &str| addr.to_string()),
        }
    }

    pub fn new(
        encode: impl Fn(&str) -> String + Send + Sync + 'static,
        decode: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    pub fn encode(&self, addr: &str) -> String {
        (self.encode)(addr)
    }

    pub fn decode(&self, addr: &str) -> String {
        (self.decode)(addr)
    }
}

impl std::fmt::Debug for AddressCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AddressCodec")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::append_0x;

    #[test]
    fn test_address_decode_tolerates_prefix_case() {
        let with = address_decode("0x3440f720862aa7dfd4f86ecc78542b3ded900c02").unwrap();
        let without = address_decode("3440f720862aa7dfd4f86ecc78542b3ded900c02").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.len(), 20);
    }

    #[test]
    fn test_address_encode_round_trips_account_hash() {
        let addr = "0x3440f720862aa7dfd4f86ecc78542b3ded900c02";
        let hash = address_decode(addr).unwrap();
        assert_eq!(address_encode(&hash), addr);
    }

    #[test]
    fn test_address_encode_hashes_public_keys() {
        // 64-byte point body: derived address is the keccak tail.
        let point = [0x11u8; 64];
        let addr = address_encode(&point);
        assert!(address_verify(&addr));
        let digest = keccak256(point);
        assert_eq!(addr, format!("0x{}", hex::encode(&digest[12..])));
    }

    #[test]
    fn test_address_verify_shape_rules() {
        assert!(address_verify("0x3440f720862aa7dfd4f86ecc78542b3ded900c02"));
        assert!(!address_verify("3440f720862aa7dfd4f86ecc78542b3ded900c02"));
        assert!(!address_verify("0x3440f7"));
        assert!(!address_verify("0xzz40f720862aa7dfd4f86ecc78542b3ded900c02"));
        assert!(!address_verify(""));
    }

    #[test]
    fn test_passthrough_codec_is_identity() {
        let codec = AddressCodec::passthrough();
        assert_eq!(codec.encode("0xabc"), "0xabc");
        assert_eq!(codec.decode("0xabc"), "0xabc");
    }

    #[test]
    fn test_custom_codec_applies_skin() {
        let codec = AddressCodec::new(
            |addr| format!("Q{}", strip_0x(addr)),
            |addr| append_0x(addr.trim_start_matches('Q')),
        );
        assert_eq!(
            codec.encode("0x3440f720862aa7dfd4f86ecc78542b3ded900c02"),
            "Q3440f720862aa7dfd4f86ecc78542b3ded900c02"
        );
        assert_eq!(
            codec.decode("Q3440f720862aa7dfd4f86ecc78542b3ded900c02"),
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02"
        );
    }
}
