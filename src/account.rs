//! Account custody and persistence.
//!
//! An account is either watch-only (pubkey) or holds its secret key in
//! memory. The stored key is XOR-obfuscated with a fixed pad and only
//! un-obfuscated transiently inside the signing and NIP-04 operations; the
//! transient copy is wiped when the operation returns. The pad is
//! obfuscation against casual file inspection, not encryption.

use zeroize::Zeroizing;

use crate::error::{AccountError, CryptoError};
use crate::event::{sign, Event};
use crate::keys::{derive_pubkey, Pubkey, Seckey};
use crate::nip04;

/// File the engine persists its account under.
pub const ACCOUNT_FILE: &str = "account0.bin";

const TYPE_PUBKEY_ONLY: u8 = 0;
const TYPE_SECKEY_IN_MEMORY: u8 = 1;
const TYPE_SECKEY_ON_SECURE_DEVICE: u8 = 2;

const SECKEY_PAD: [u8; 32] = [
    0x03, 0x2b, 0x8a, 0xcc, 0x87, 0x4d, 0x01, 0x85, 0x01, 0x80, 0x3e, 0x37, 0x29, 0x9e, 0x40,
    0x1b, 0xfa, 0xb5, 0x88, 0xb6, 0x1e, 0x65, 0x5f, 0xcd, 0x3f, 0xdc, 0x5e, 0x0e, 0x76, 0x4d,
    0x18, 0xe0,
];

fn pad_seckey(seckey: &Seckey) -> Seckey {
    let mut bytes = *seckey.as_bytes();
    for (byte, pad) in bytes.iter_mut().zip(SECKEY_PAD.iter()) {
        *byte ^= pad;
    }
    Seckey::from_bytes(bytes)
}

#[derive(Clone)]
enum Custody {
    PubkeyOnly,
    /// Obfuscated with [`SECKEY_PAD`].
    SeckeyInMemory(Seckey),
}

/// The engine's identity.
#[derive(Clone)]
pub struct Account {
    pub pubkey: Pubkey,
    custody: Custody,
}

impl Account {
    /// A watch-only account. It can receive but never sign or decrypt.
    pub fn from_pubkey(pubkey: Pubkey) -> Account {
        Account {
            pubkey,
            custody: Custody::PubkeyOnly,
        }
    }

    pub fn from_seckey(seckey: Seckey) -> Result<Account, AccountError> {
        let pubkey = derive_pubkey(&seckey)?;
        Ok(Account {
            pubkey,
            custody: Custody::SeckeyInMemory(pad_seckey(&seckey)),
        })
    }

    pub fn has_seckey(&self) -> bool {
        matches!(self.custody, Custody::SeckeyInMemory(_))
    }

    /// Parses the account file: one type byte plus a 32-byte payload.
    /// Loading a secret key re-derives the pubkey as an integrity check.
    pub fn load(bytes: &[u8]) -> Result<Account, AccountError> {
        if bytes.len() != 33 {
            return Err(AccountError::CorruptFile);
        }
        let mut payload = [0u8; 32];
        payload.copy_from_slice(&bytes[1..]);

        match bytes[0] {
            TYPE_PUBKEY_ONLY => Ok(Account::from_pubkey(Pubkey(payload))),
            TYPE_SECKEY_IN_MEMORY => {
                let obfuscated = Seckey::from_bytes(payload);
                let seckey = Zeroizing::new(pad_seckey(&obfuscated));
                let pubkey = derive_pubkey(&seckey).map_err(|_| AccountError::CorruptFile)?;
                Ok(Account {
                    pubkey,
                    custody: Custody::SeckeyInMemory(obfuscated),
                })
            }
            TYPE_SECKEY_ON_SECURE_DEVICE => Err(AccountError::UnsupportedType),
            _ => Err(AccountError::CorruptFile),
        }
    }

    pub fn store(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(33);
        match &self.custody {
            Custody::PubkeyOnly => {
                bytes.push(TYPE_PUBKEY_ONLY);
                bytes.extend_from_slice(&self.pubkey.0);
            }
            Custody::SeckeyInMemory(obfuscated) => {
                bytes.push(TYPE_SECKEY_IN_MEMORY);
                bytes.extend_from_slice(obfuscated.as_bytes());
            }
        }
        bytes
    }

    /// Runs an operation with the un-obfuscated key; the transient copy is
    /// wiped when the closure returns.
    fn with_seckey<R>(
        &self,
        op: impl FnOnce(&Seckey) -> Result<R, CryptoError>,
    ) -> Result<R, AccountError> {
        let Custody::SeckeyInMemory(obfuscated) = &self.custody else {
            return Err(AccountError::NeedsSeckey);
        };
        let seckey = Zeroizing::new(pad_seckey(obfuscated));
        Ok(op(&seckey)?)
    }

    pub fn sign_event(&self, event: &mut Event) -> Result<(), AccountError> {
        self.with_seckey(|seckey| sign(event, seckey))
    }

    pub fn nip04_encrypt(
        &self,
        counterparty: &Pubkey,
        plaintext: &str,
    ) -> Result<String, AccountError> {
        self.with_seckey(|seckey| {
            let shared = nip04::shared_secret(counterparty, seckey)?;
            nip04::encrypt(&shared, plaintext)
        })
    }

    pub fn nip04_decrypt(
        &self,
        counterparty: &Pubkey,
        payload: &str,
    ) -> Result<String, AccountError> {
        self.with_seckey(|seckey| {
            let shared = nip04::shared_secret(counterparty, seckey)?;
            nip04::decrypt(&shared, payload)
        })
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("pubkey", &self.pubkey)
            .field("has_seckey", &self.has_seckey())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::event::{EventValidity, KIND_TEXT_NOTE};

    fn seckey(byte: u8) -> Seckey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Seckey::from_bytes(bytes)
    }

    #[test]
    fn seckey_account_round_trips_through_file_format() {
        let account = Account::from_seckey(seckey(42)).unwrap();
        let bytes = account.store();
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[0], TYPE_SECKEY_IN_MEMORY);

        let loaded = Account::load(&bytes).unwrap();
        assert_eq!(loaded.pubkey, account.pubkey);
        assert!(loaded.has_seckey());
    }

    #[test]
    fn stored_seckey_is_obfuscated() {
        let key = seckey(42);
        let account = Account::from_seckey(key.clone()).unwrap();
        let bytes = account.store();
        assert_ne!(&bytes[1..], key.as_bytes());
    }

    #[test]
    fn pubkey_account_round_trips() {
        let pubkey = derive_pubkey(&seckey(7)).unwrap();
        let account = Account::from_pubkey(pubkey);
        let loaded = Account::load(&account.store()).unwrap();
        assert_eq!(loaded.pubkey, pubkey);
        assert!(!loaded.has_seckey());
    }

    #[test]
    fn watch_only_operations_fail_with_capability_error() {
        let account = Account::from_pubkey(derive_pubkey(&seckey(7)).unwrap());
        let counterparty = derive_pubkey(&seckey(8)).unwrap();

        let mut event = EventBuilder::new().kind(KIND_TEXT_NOTE).build();
        assert_eq!(
            account.sign_event(&mut event).unwrap_err(),
            AccountError::NeedsSeckey
        );
        assert_eq!(
            account.nip04_encrypt(&counterparty, "x").unwrap_err(),
            AccountError::NeedsSeckey
        );
        assert_eq!(
            account.nip04_decrypt(&counterparty, "x?iv=y").unwrap_err(),
            AccountError::NeedsSeckey
        );
    }

    #[test]
    fn signing_through_the_account_produces_valid_events() {
        let account = Account::from_seckey(seckey(11)).unwrap();
        let mut event = EventBuilder::new()
            .kind(KIND_TEXT_NOTE)
            .content("signed via account")
            .build();
        account.sign_event(&mut event).unwrap();
        assert_eq!(event.validity, EventValidity::Valid);
        assert_eq!(event.pubkey, account.pubkey);
    }

    #[test]
    fn accounts_encrypt_to_each_other() {
        let alice = Account::from_seckey(seckey(1)).unwrap();
        let bob = Account::from_seckey(seckey(2)).unwrap();

        let payload = alice.nip04_encrypt(&bob.pubkey, "hi bob").unwrap();
        assert_eq!(bob.nip04_decrypt(&alice.pubkey, &payload).unwrap(), "hi bob");
    }

    #[test]
    fn load_rejects_bad_files() {
        assert_eq!(Account::load(&[]).unwrap_err(), AccountError::CorruptFile);
        assert_eq!(
            Account::load(&[TYPE_SECKEY_IN_MEMORY; 10]).unwrap_err(),
            AccountError::CorruptFile
        );

        let mut secure = vec![TYPE_SECKEY_ON_SECURE_DEVICE];
        secure.extend_from_slice(&[0u8; 32]);
        assert_eq!(
            Account::load(&secure).unwrap_err(),
            AccountError::UnsupportedType
        );

        let mut unknown = vec![9u8];
        unknown.extend_from_slice(&[0u8; 32]);
        assert_eq!(
            Account::load(&unknown).unwrap_err(),
            AccountError::CorruptFile
        );

        // an obfuscated payload that unpads to an invalid scalar
        let mut invalid = vec![TYPE_SECKEY_IN_MEMORY];
        invalid.extend_from_slice(&SECKEY_PAD); // unpads to all zeros
        assert_eq!(
            Account::load(&invalid).unwrap_err(),
            AccountError::CorruptFile
        );
    }
}
