//! Fixed-size key and identifier types.

use secp256k1::{Keypair, Secp256k1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// 32-byte event id (SHA-256 of the canonical event form).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub [u8; 32]);

/// 32-byte x-only public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pubkey(pub [u8; 32]);

/// 64-byte Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

// [u8; 64] has no derived Default
impl Default for Signature {
    fn default() -> Signature {
        Signature([0u8; 64])
    }
}

/// 32-byte secret key. Not `Copy`, wiped on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seckey(pub(crate) [u8; 32]);

macro_rules! hex_impls {
    ($ty:ident, $len:expr) => {
        impl $ty {
            pub fn from_hex(s: &str) -> Option<$ty> {
                let mut bytes = [0u8; $len];
                if s.len() != 2 * $len || hex::decode_to_slice(s, &mut bytes).is_err() {
                    return None;
                }
                Some($ty(bytes))
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), self.to_hex())
            }
        }
    };
}

hex_impls!(EventId, 32);
hex_impls!(Pubkey, 32);
hex_impls!(Signature, 64);

impl Seckey {
    pub fn from_bytes(bytes: [u8; 32]) -> Seckey {
        Seckey(bytes)
    }

    pub fn from_hex(s: &str) -> Option<Seckey> {
        let mut bytes = [0u8; 32];
        if s.len() != 64 || hex::decode_to_slice(s, &mut bytes).is_err() {
            return None;
        }
        Some(Seckey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Seckey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Seckey(<redacted>)")
    }
}

/// Derives the x-only public key for a secret key.
pub fn derive_pubkey(seckey: &Seckey) -> Result<Pubkey, CryptoError> {
    let secp = Secp256k1::new();
    let keypair =
        Keypair::from_seckey_slice(&secp, &seckey.0).map_err(|_| CryptoError::InvalidSeckey)?;
    Ok(Pubkey(keypair.x_only_public_key().0.serialize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let hex = "5e5fc883ba0a6fdb04d44116dc2f38ed4eba210bd9869e95fd30a5e41b5ca064";
        let id = EventId::from_hex(hex).unwrap();
        assert_eq!(id.to_hex(), hex);
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert!(EventId::from_hex("abcd").is_none());
        assert!(EventId::from_hex(&"zz".repeat(32)).is_none());
        assert!(Pubkey::from_hex(&"ab".repeat(33)).is_none());
    }

    #[test]
    fn derive_pubkey_known_vector() {
        // seckey = 1 gives the generator's x coordinate
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let pubkey = derive_pubkey(&Seckey::from_bytes(bytes)).unwrap();
        assert_eq!(
            pubkey.to_hex(),
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
    }

    #[test]
    fn derive_pubkey_rejects_zero_scalar() {
        assert!(derive_pubkey(&Seckey::from_bytes([0u8; 32])).is_err());
    }

    #[test]
    fn default_signature_is_zeroed() {
        assert_eq!(Signature::default(), Signature([0u8; 64]));
    }

    #[test]
    fn seckey_debug_is_redacted() {
        let seckey = Seckey::from_bytes([7u8; 32]);
        assert_eq!(format!("{:?}", seckey), "Seckey(<redacted>)");
    }
}
