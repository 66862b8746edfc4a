//! NIP-04 direct-message encryption.
//!
//! The shared secret is the raw x coordinate of the ECDH point, computed
//! against the counterparty's x-only key lifted with even parity. Payloads
//! are AES-256-CBC with PKCS#7 padding, carried as
//! `base64(ciphertext) + "?iv=" + base64(iv)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::{Pubkey, Seckey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
const IV_MARKER: &str = "?iv=";

/// Raw-x ECDH shared secret between an x-only counterparty key and a
/// secret key.
pub fn shared_secret(counterparty: &Pubkey, seckey: &Seckey) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    // lift the x-only key with even parity
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02;
    compressed[1..].copy_from_slice(&counterparty.0);

    let pubkey = PublicKey::from_slice(&compressed).map_err(|_| CryptoError::InvalidPubkey)?;
    let scalar = SecretKey::from_slice(seckey.as_bytes()).map_err(|_| CryptoError::InvalidSeckey)?;

    let point = Zeroizing::new(secp256k1::ecdh::shared_secret_point(&pubkey, &scalar));
    let mut secret = Zeroizing::new([0u8; 32]);
    secret.copy_from_slice(&point[..32]);
    Ok(secret)
}

/// Encrypts a plaintext under a shared secret with a fresh random IV.
pub fn encrypt(shared: &[u8; 32], plaintext: &str) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with_iv(shared, &iv, plaintext.as_bytes())
}

pub(crate) fn encrypt_with_iv(
    shared: &[u8; 32],
    iv: &[u8; IV_LEN],
    plaintext: &[u8],
) -> Result<String, CryptoError> {
    let cipher =
        Aes256CbcEnc::new_from_slices(shared, iv).map_err(|_| CryptoError::DecryptFailed)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    Ok(format!(
        "{}{}{}",
        BASE64.encode(ciphertext),
        IV_MARKER,
        BASE64.encode(iv)
    ))
}

/// Decrypts a `base64?iv=base64` payload. The plaintext must be UTF-8.
pub fn decrypt(shared: &[u8; 32], payload: &str) -> Result<String, CryptoError> {
    let marker = payload.find(IV_MARKER).ok_or(CryptoError::MalformedPayload)?;
    let (ciphertext_b64, rest) = payload.split_at(marker);
    let iv_b64 = &rest[IV_MARKER.len()..];

    let ciphertext = BASE64
        .decode(ciphertext_b64)
        .map_err(|_| CryptoError::MalformedPayload)?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|_| CryptoError::MalformedPayload)?;
    if iv.len() != IV_LEN {
        return Err(CryptoError::MalformedPayload);
    }

    let cipher =
        Aes256CbcDec::new_from_slices(shared, &iv).map_err(|_| CryptoError::DecryptFailed)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::DecryptFailed)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_pubkey;

    fn seckey(byte: u8) -> Seckey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Seckey::from_bytes(bytes)
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let a = seckey(11);
        let b = seckey(23);
        let a_pub = derive_pubkey(&a).unwrap();
        let b_pub = derive_pubkey(&b).unwrap();

        let ab = shared_secret(&b_pub, &a).unwrap();
        let ba = shared_secret(&a_pub, &b).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let a = seckey(3);
        let b_pub = derive_pubkey(&seckey(5)).unwrap();
        let shared = shared_secret(&b_pub, &a).unwrap();

        let long = "a".repeat(100);
        for plaintext in ["", "x", "hello world", "emoji \u{1f980} text", long.as_str()] {
            let payload = encrypt(&shared, plaintext).unwrap();
            assert!(payload.contains("?iv="));
            assert_eq!(decrypt(&shared, &payload).unwrap(), plaintext);
        }
    }

    #[test]
    fn both_directions_decrypt() {
        let a = seckey(3);
        let b = seckey(5);
        let a_pub = derive_pubkey(&a).unwrap();
        let b_pub = derive_pubkey(&b).unwrap();

        let payload = encrypt(&shared_secret(&b_pub, &a).unwrap(), "secret").unwrap();
        let opened = decrypt(&shared_secret(&a_pub, &b).unwrap(), &payload).unwrap();
        assert_eq!(opened, "secret");
    }

    #[test]
    fn rejects_payload_without_marker() {
        let shared = [7u8; 32];
        assert_eq!(
            decrypt(&shared, "AAAA").unwrap_err(),
            CryptoError::MalformedPayload
        );
    }

    #[test]
    fn rejects_short_iv() {
        let shared = [7u8; 32];
        let payload = format!("{}?iv={}", BASE64.encode(b"0123456789abcdef"), BASE64.encode(b"short"));
        assert_eq!(
            decrypt(&shared, &payload).unwrap_err(),
            CryptoError::MalformedPayload
        );
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let a = seckey(9);
        let b_pub = derive_pubkey(&seckey(13)).unwrap();
        let shared = shared_secret(&b_pub, &a).unwrap();

        let iv = [9u8; 16];
        let payload = encrypt_with_iv(&shared, &iv, b"attack at dawn").unwrap();
        let mut bytes = BASE64
            .decode(payload.split("?iv=").next().unwrap())
            .unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = format!(
            "{}?iv={}",
            BASE64.encode(&bytes),
            payload.split("?iv=").nth(1).unwrap()
        );
        // corrupting the final block must not yield the original plaintext
        match decrypt(&shared, &tampered) {
            Ok(opened) => assert_ne!(opened, "attack at dawn"),
            Err(err) => assert!(matches!(
                err,
                CryptoError::DecryptFailed | CryptoError::InvalidUtf8
            )),
        }
    }

    #[test]
    fn rejects_non_utf8_plaintext() {
        let shared = [42u8; 32];
        let iv = [1u8; 16];
        let payload = encrypt_with_iv(&shared, &iv, &[0xff, 0xfe, 0x80]).unwrap();
        assert_eq!(
            decrypt(&shared, &payload).unwrap_err(),
            CryptoError::InvalidUtf8
        );
    }
}
