//! The event record and its crypto operations.
//!
//! An [`Event`] is a relocatable record: the seven canonical fields plus a
//! text pool holding every string, tag tables indexing into that pool, and
//! derived state (validity, typed e/p tags, content tokens, receipt and
//! publish logs) that never participates in the canonical hash.

use serde_json::Value;
use sha2::{Digest, Sha256};

use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Keypair, Message, Secp256k1, XOnlyPublicKey};

use crate::content::ContentToken;
use crate::entity::Entity;
use crate::error::CryptoError;
use crate::keys::{derive_pubkey, EventId, Pubkey, Seckey, Signature};
use crate::record::{RelSlice, RelStr, TextPool};
use crate::relays::RelayId;

pub const KIND_PROFILE: u32 = 0;
pub const KIND_TEXT_NOTE: u32 = 1;
pub const KIND_CONTACT_LIST: u32 = 3;
pub const KIND_DIRECT_MESSAGE: u32 = 4;

/// Result of id + signature validation, cached on the event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventValidity {
    #[default]
    Unchecked,
    Valid,
    InvalidId,
    InvalidSig,
}

/// Where the event's content sits in the NIP-04 lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContentEncryption {
    #[default]
    NotChecked,
    Regular,
    Encrypted,
    Decrypted,
    DecryptFailed,
}

/// Marker carried by the fourth value of an `e` tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ETagMarker {
    #[default]
    None,
    Reply,
    Root,
    Mention,
}

/// Typed view of an `e` tag. `index` is the tag's position in the tag table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ETag {
    pub index: u32,
    pub event_id: EventId,
    pub marker: ETagMarker,
}

/// Typed view of a `p` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PTag {
    pub index: u32,
    pub pubkey: Pubkey,
}

/// Cap on receipt and publish log entries per event.
pub const RECEIPT_LOG_CAP: usize = 16;

/// One sighting of the event: which relay delivered it, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub relay_id: RelayId,
    pub receipt_time: u64,
}

/// Bounded log of relay receipts. Duplicate relay ids merge, keeping the
/// newest time; overflow drops the receipt and counts the drop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiptLog {
    entries: Vec<Receipt>,
    dropped: u32,
}

impl ReceiptLog {
    pub fn record(&mut self, relay_id: RelayId, receipt_time: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.relay_id == relay_id) {
            if receipt_time > entry.receipt_time {
                entry.receipt_time = receipt_time;
            }
            return;
        }
        if self.entries.len() < RECEIPT_LOG_CAP {
            if self.entries.capacity() == 0 {
                self.entries.reserve_exact(RECEIPT_LOG_CAP);
            }
            self.entries.push(Receipt {
                relay_id,
                receipt_time,
            });
        } else {
            self.dropped += 1;
        }
    }

    pub fn entries(&self) -> &[Receipt] {
        &self.entries
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// One relay's OK verdict on a published event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishAck {
    pub relay_id: RelayId,
    pub accepted: bool,
    pub ack_time: u64,
}

/// Bounded log of publish acknowledgements for a self-authored event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishLog {
    entries: Vec<PublishAck>,
    dropped: u32,
}

impl PublishLog {
    pub fn record(&mut self, relay_id: RelayId, accepted: bool, ack_time: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.relay_id == relay_id) {
            entry.accepted = accepted;
            entry.ack_time = ack_time;
            return;
        }
        if self.entries.len() < RECEIPT_LOG_CAP {
            self.entries.push(PublishAck {
                relay_id,
                accepted,
                ack_time,
            });
        } else {
            self.dropped += 1;
        }
    }

    pub fn entries(&self) -> &[PublishAck] {
        &self.entries
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

/// A signed, content-addressed Nostr event.
#[derive(Clone, Debug, Default)]
pub struct Event {
    pub id: EventId,
    pub pubkey: Pubkey,
    pub sig: Signature,
    pub kind: u32,
    pub created_at: u64,
    pub(crate) content: RelStr,
    pub(crate) tags: Vec<RelSlice>,
    pub(crate) tag_values: Vec<RelStr>,
    pub(crate) text: TextPool,

    pub validity: EventValidity,
    pub content_encryption: ContentEncryption,
    pub(crate) e_tags: Vec<ETag>,
    pub(crate) p_tags: Vec<PTag>,
    pub(crate) tokens: Vec<ContentToken>,
    pub(crate) entities: Vec<Entity>,
    pub receipts: ReceiptLog,
    pub publish_log: Option<PublishLog>,
}

/// Borrowed view of one tag row.
#[derive(Clone, Copy)]
pub struct TagRef<'a> {
    values: &'a [RelStr],
    pool: &'a TextPool,
}

impl<'a> TagRef<'a> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn value(&self, index: usize) -> Option<&'a str> {
        self.values.get(index).map(|v| v.get(self.pool))
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.values.iter().map(|v| v.get(self.pool))
    }
}

impl Event {
    pub fn content(&self) -> &str {
        self.content.get(&self.text)
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tag(&self, index: usize) -> Option<TagRef<'_>> {
        let row = self.tags.get(index)?;
        let start = row.start as usize;
        let end = start.saturating_add(row.len as usize);
        let values = self.tag_values.get(start..end)?;
        Some(TagRef {
            values,
            pool: &self.text,
        })
    }

    pub fn e_tags(&self) -> &[ETag] {
        &self.e_tags
    }

    pub fn p_tags(&self) -> &[PTag] {
        &self.p_tags
    }

    pub fn tokens(&self) -> &[ContentToken] {
        &self.tokens
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Resolves a span handle produced by this event's tokenizer pass.
    pub fn span(&self, handle: RelStr) -> &str {
        handle.get(&self.text)
    }

    /// Swaps the content for its decrypted form. The ciphertext bytes stay
    /// in the pool, unreferenced.
    pub(crate) fn set_decrypted_content(&mut self, plaintext: &str) {
        self.content = self.text.push_str(plaintext);
        self.content_encryption = ContentEncryption::Decrypted;
    }

    pub(crate) fn set_tokens(&mut self, tokens: Vec<ContentToken>, entities: Vec<Entity>) {
        self.tokens = tokens;
        self.entities = entities;
    }
}

/// Rebuilds the typed e/p tag tables from the raw tag rows. Rows with
/// malformed hex are skipped, matching relay tolerance for junk tags.
pub(crate) fn extract_tag_refs(event: &mut Event) {
    event.e_tags.clear();
    event.p_tags.clear();

    for index in 0..event.tags.len() {
        let Some(tag) = event.tag(index) else { continue };
        if tag.len() < 2 {
            continue;
        }
        let (Some(name), Some(value)) = (tag.value(0), tag.value(1)) else {
            continue;
        };
        match name {
            "e" => {
                let Some(event_id) = EventId::from_hex(value) else {
                    continue;
                };
                let marker = match tag.value(3) {
                    Some("reply") => ETagMarker::Reply,
                    Some("root") => ETagMarker::Root,
                    Some("mention") => ETagMarker::Mention,
                    _ => ETagMarker::None,
                };
                event.e_tags.push(ETag {
                    index: index as u32,
                    event_id,
                    marker,
                });
            }
            "p" => {
                let Some(pubkey) = Pubkey::from_hex(value) else {
                    continue;
                };
                event.p_tags.push(PTag {
                    index: index as u32,
                    pubkey,
                });
            }
            _ => {}
        }
    }
}

/// Canonical hash preimage: `[0, pubkey, created_at, kind, tags, content]`,
/// serialized compactly.
fn canonical_form(event: &Event) -> Value {
    let tags: Vec<Value> = (0..event.tag_count())
        .filter_map(|i| event.tag(i))
        .map(|tag| Value::Array(tag.iter().map(|v| Value::String(v.to_owned())).collect()))
        .collect();

    Value::Array(vec![
        Value::from(0),
        Value::String(event.pubkey.to_hex()),
        Value::from(event.created_at),
        Value::from(event.kind),
        Value::Array(tags),
        Value::String(event.content().to_owned()),
    ])
}

/// SHA-256 of the canonical event form.
pub fn compute_hash(event: &Event) -> EventId {
    let serialized = canonical_form(event).to_string();
    let digest = Sha256::digest(serialized.as_bytes());
    let mut id = [0u8; 32];
    id.copy_from_slice(&digest);
    EventId(id)
}

/// Checks the id against the canonical hash, then the Schnorr signature.
/// The verdict is cached on the event and returned.
pub fn validate(event: &mut Event) -> EventValidity {
    if compute_hash(event) != event.id {
        event.validity = EventValidity::InvalidId;
        return event.validity;
    }

    event.validity = match verify_signature(&event.id, &event.pubkey, &event.sig) {
        true => EventValidity::Valid,
        false => EventValidity::InvalidSig,
    };
    event.validity
}

fn verify_signature(id: &EventId, pubkey: &Pubkey, sig: &Signature) -> bool {
    let secp = Secp256k1::verification_only();
    let Ok(signature) = SchnorrSignature::from_slice(&sig.0) else {
        return false;
    };
    let Ok(xonly) = XOnlyPublicKey::from_slice(&pubkey.0) else {
        return false;
    };
    let Ok(message) = Message::from_digest_slice(&id.0) else {
        return false;
    };
    secp.verify_schnorr(&signature, &message, &xonly).is_ok()
}

/// Finishes a draft event: derives the author pubkey, stamps `created_at`
/// with the current time, hashes, signs with a deterministic nonce, and
/// re-validates. A result that does not verify is a hard error.
pub fn sign(event: &mut Event, seckey: &Seckey) -> Result<(), CryptoError> {
    sign_at(event, seckey, unix_time_now())
}

pub(crate) fn sign_at(
    event: &mut Event,
    seckey: &Seckey,
    created_at: u64,
) -> Result<(), CryptoError> {
    event.pubkey = derive_pubkey(seckey)?;
    event.created_at = created_at;
    event.id = compute_hash(event);

    let secp = Secp256k1::new();
    let keypair = Keypair::from_seckey_slice(&secp, seckey.as_bytes())
        .map_err(|_| CryptoError::InvalidSeckey)?;
    let message =
        Message::from_digest_slice(&event.id.0).map_err(|_| CryptoError::SigningFailed)?;
    event.sig = Signature(secp.sign_schnorr_no_aux_rand(&message, &keypair).serialize());

    if validate(event) != EventValidity::Valid {
        return Err(CryptoError::SigningFailed);
    }
    Ok(())
}

/// Seconds since the unix epoch.
pub fn unix_time_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
