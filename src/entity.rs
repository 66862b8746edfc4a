//! Bech32 entities (NIP-19) plus the engine-private `ninvite` type.
//!
//! Bare entities (`note`, `npub`, `nsec`) carry one fixed 32-byte payload.
//! The TLV family (`nprofile`, `nevent`, `nrelay`, `naddr`, `ninvite`)
//! carries type-length-value records with per-type multiplicity rules;
//! encoding is the structural inverse of decoding.

use bech32::{Bech32, Hrp};

use crate::error::EntityError;
use crate::keys::{EventId, Pubkey, Seckey, Signature};
use crate::record::{RelStr, TextPool};

/// Bound on relay hints carried by one entity.
pub const MAX_RELAY_HINTS: usize = 10;

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;
const TLV_SIG: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Note,
    Npub,
    Nsec,
    Nprofile,
    Nevent,
    Nrelay,
    Naddr,
    Ninvite,
}

impl EntityKind {
    fn prefix(self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::Npub => "npub",
            EntityKind::Nsec => "nsec",
            EntityKind::Nprofile => "nprofile",
            EntityKind::Nevent => "nevent",
            EntityKind::Nrelay => "nrelay",
            EntityKind::Naddr => "naddr",
            EntityKind::Ninvite => "ninvite",
        }
    }
}

/// Invite payload embedded in an `ninvite` entity. The signature is over
/// the canonical invite event (see [`crate::invite`]).
#[derive(Clone, Debug)]
pub struct Invite {
    pub conversation_pubkey: Pubkey,
    pub signature: Signature,
}

/// A decoded entity. Like events, entities are relocatable records: their
/// string payloads live in an owned pool behind `RelStr` handles.
#[derive(Clone, Debug)]
pub struct Entity {
    pub kind: EntityKind,
    pub event_id: Option<EventId>,
    pub pubkey: Option<Pubkey>,
    pub seckey: Option<Seckey>,
    pub event_kind: Option<u32>,
    identifier: Option<RelStr>,
    relays: Vec<RelStr>,
    pub invite: Option<Invite>,
    text: TextPool,
}

impl Entity {
    fn bare(kind: EntityKind) -> Entity {
        Entity {
            kind,
            event_id: None,
            pubkey: None,
            seckey: None,
            event_kind: None,
            identifier: None,
            relays: Vec::new(),
            invite: None,
            text: TextPool::default(),
        }
    }

    pub fn note(event_id: EventId) -> Entity {
        Entity {
            event_id: Some(event_id),
            ..Entity::bare(EntityKind::Note)
        }
    }

    pub fn npub(pubkey: Pubkey) -> Entity {
        Entity {
            pubkey: Some(pubkey),
            ..Entity::bare(EntityKind::Npub)
        }
    }

    pub fn nsec(seckey: Seckey) -> Entity {
        Entity {
            seckey: Some(seckey),
            ..Entity::bare(EntityKind::Nsec)
        }
    }

    pub fn nprofile(pubkey: Pubkey, relays: &[&str]) -> Entity {
        let mut entity = Entity {
            pubkey: Some(pubkey),
            ..Entity::bare(EntityKind::Nprofile)
        };
        // overflow is rejected at encode, not truncated here
        for relay in relays {
            let handle = entity.text.push_str(relay);
            entity.relays.push(handle);
        }
        entity
    }

    pub fn nevent(event_id: EventId, author: Option<Pubkey>, event_kind: Option<u32>) -> Entity {
        Entity {
            event_id: Some(event_id),
            pubkey: author,
            event_kind,
            ..Entity::bare(EntityKind::Nevent)
        }
    }

    pub fn ninvite(inviter: Pubkey, conversation_pubkey: Pubkey, signature: Signature) -> Entity {
        Entity {
            pubkey: Some(inviter),
            invite: Some(Invite {
                conversation_pubkey,
                signature,
            }),
            ..Entity::bare(EntityKind::Ninvite)
        }
    }

    /// The `naddr`/`nrelay` special string, if present.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.map(|handle| handle.get(&self.text))
    }

    pub fn relays(&self) -> impl Iterator<Item = &str> + '_ {
        self.relays.iter().map(|handle| handle.get(&self.text))
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// Decodes a bech32 entity string.
    pub fn decode(input: &str) -> Result<Entity, EntityError> {
        let (hrp, data) = bech32::decode(input).map_err(|_| EntityError::Codec)?;
        let prefix = hrp.to_string().to_lowercase();

        let kind = match prefix.as_str() {
            "note" => EntityKind::Note,
            "npub" => EntityKind::Npub,
            "nsec" => EntityKind::Nsec,
            "nprofile" => EntityKind::Nprofile,
            "nevent" => EntityKind::Nevent,
            "nrelay" => EntityKind::Nrelay,
            "naddr" => EntityKind::Naddr,
            "ninvite" => EntityKind::Ninvite,
            _ => return Err(EntityError::UnknownPrefix),
        };

        match kind {
            EntityKind::Note => Ok(Entity::note(EventId(fixed_payload(&data)?))),
            EntityKind::Npub => Ok(Entity::npub(Pubkey(fixed_payload(&data)?))),
            EntityKind::Nsec => Ok(Entity::nsec(Seckey::from_bytes(fixed_payload(&data)?))),
            _ => decode_tlv(kind, &data),
        }
    }

    /// Encodes the entity back to its bech32 string form.
    pub fn encode(&self) -> Result<String, EntityError> {
        let payload = match self.kind {
            EntityKind::Note => {
                let id = self.event_id.ok_or(EntityError::IncompleteEntity)?;
                id.0.to_vec()
            }
            EntityKind::Npub => {
                let pubkey = self.pubkey.ok_or(EntityError::IncompleteEntity)?;
                pubkey.0.to_vec()
            }
            EntityKind::Nsec => {
                let seckey = self.seckey.as_ref().ok_or(EntityError::IncompleteEntity)?;
                seckey.as_bytes().to_vec()
            }
            _ => self.encode_tlv()?,
        };

        let hrp = Hrp::parse(self.kind.prefix()).map_err(|_| EntityError::Codec)?;
        bech32::encode::<Bech32>(hrp, &payload).map_err(|_| EntityError::Codec)
    }

    fn encode_tlv(&self) -> Result<Vec<u8>, EntityError> {
        if self.relays.len() > MAX_RELAY_HINTS {
            return Err(EntityError::TooManyRelayHints);
        }
        let mut payload = Vec::new();

        match self.kind {
            EntityKind::Nprofile => {
                let pubkey = self.pubkey.ok_or(EntityError::IncompleteEntity)?;
                push_tlv(&mut payload, TLV_SPECIAL, &pubkey.0)?;
            }
            EntityKind::Nevent => {
                let id = self.event_id.ok_or(EntityError::IncompleteEntity)?;
                push_tlv(&mut payload, TLV_SPECIAL, &id.0)?;
                if let Some(author) = self.pubkey {
                    push_tlv(&mut payload, TLV_AUTHOR, &author.0)?;
                }
                if let Some(kind) = self.event_kind {
                    push_tlv(&mut payload, TLV_KIND, &kind.to_be_bytes())?;
                }
            }
            EntityKind::Nrelay => {
                let url = self.identifier().ok_or(EntityError::IncompleteEntity)?;
                push_tlv(&mut payload, TLV_SPECIAL, url.as_bytes())?;
            }
            EntityKind::Naddr => {
                let identifier = self.identifier().ok_or(EntityError::IncompleteEntity)?;
                let author = self.pubkey.ok_or(EntityError::IncompleteEntity)?;
                push_tlv(&mut payload, TLV_SPECIAL, identifier.as_bytes())?;
                push_tlv(&mut payload, TLV_AUTHOR, &author.0)?;
                if let Some(kind) = self.event_kind {
                    push_tlv(&mut payload, TLV_KIND, &kind.to_be_bytes())?;
                }
            }
            EntityKind::Ninvite => {
                let invite = self.invite.as_ref().ok_or(EntityError::IncompleteEntity)?;
                let inviter = self.pubkey.ok_or(EntityError::IncompleteEntity)?;
                push_tlv(&mut payload, TLV_SPECIAL, &invite.conversation_pubkey.0)?;
                push_tlv(&mut payload, TLV_AUTHOR, &inviter.0)?;
                push_tlv(&mut payload, TLV_SIG, &invite.signature.0)?;
            }
            _ => return Err(EntityError::IncompleteEntity),
        }

        for handle in &self.relays {
            push_tlv(&mut payload, TLV_RELAY, handle.get(&self.text).as_bytes())?;
        }
        Ok(payload)
    }
}

fn fixed_payload<const N: usize>(data: &[u8]) -> Result<[u8; N], EntityError> {
    if data.len() != N {
        return Err(EntityError::PayloadLength);
    }
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(data);
    Ok(bytes)
}

fn push_tlv(payload: &mut Vec<u8>, ty: u8, value: &[u8]) -> Result<(), EntityError> {
    // the TLV length field is one byte
    if value.len() > u8::MAX as usize {
        return Err(EntityError::TlvValueLength);
    }
    payload.push(ty);
    payload.push(value.len() as u8);
    payload.extend_from_slice(value);
    Ok(())
}

#[derive(Default)]
struct TlvCounts {
    special: u32,
    relay: u32,
    author: u32,
    kind: u32,
    sig: u32,
}

fn decode_tlv(kind: EntityKind, data: &[u8]) -> Result<Entity, EntityError> {
    let mut entity = Entity::bare(kind);
    let mut counts = TlvCounts::default();
    let mut pos = 0usize;

    while pos < data.len() {
        if pos + 2 > data.len() {
            return Err(EntityError::TlvOverrun);
        }
        let ty = data[pos];
        let len = data[pos + 1] as usize;
        pos += 2;
        let Some(value) = data.get(pos..pos + len) else {
            return Err(EntityError::TlvOverrun);
        };
        pos += len;

        match ty {
            TLV_SPECIAL => {
                counts.special += 1;
                match kind {
                    EntityKind::Nprofile => {
                        entity.pubkey = Some(Pubkey(fixed_value(value)?));
                    }
                    EntityKind::Nevent => {
                        entity.event_id = Some(EventId(fixed_value(value)?));
                    }
                    EntityKind::Nrelay | EntityKind::Naddr => {
                        let s = std::str::from_utf8(value).map_err(|_| EntityError::Codec)?;
                        entity.identifier = Some(entity.text.push_str(s));
                    }
                    EntityKind::Ninvite => {
                        entity.invite = Some(Invite {
                            conversation_pubkey: Pubkey(fixed_value(value)?),
                            signature: Signature([0u8; 64]),
                        });
                    }
                    _ => {}
                }
            }
            TLV_RELAY => {
                counts.relay += 1;
                if entity.relays.len() >= MAX_RELAY_HINTS {
                    return Err(EntityError::TooManyRelayHints);
                }
                let s = std::str::from_utf8(value).map_err(|_| EntityError::Codec)?;
                let handle = entity.text.push_str(s);
                entity.relays.push(handle);
            }
            TLV_AUTHOR => {
                counts.author += 1;
                entity.pubkey = Some(Pubkey(fixed_value(value)?));
            }
            TLV_KIND => {
                counts.kind += 1;
                let bytes: [u8; 4] = fixed_value(value)?;
                entity.event_kind = Some(u32::from_be_bytes(bytes));
            }
            TLV_SIG => {
                counts.sig += 1;
                let signature = Signature(fixed_value(value)?);
                if let Some(invite) = entity.invite.as_mut() {
                    invite.signature = signature;
                } else {
                    entity.invite = Some(Invite {
                        conversation_pubkey: Pubkey([0u8; 32]),
                        signature,
                    });
                }
            }
            // unknown TLV types are skipped
            _ => {}
        }
    }

    check_multiplicities(kind, &counts)?;
    Ok(entity)
}

fn fixed_value<const N: usize>(value: &[u8]) -> Result<[u8; N], EntityError> {
    if value.len() != N {
        return Err(EntityError::TlvValueLength);
    }
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(value);
    Ok(bytes)
}

fn check_multiplicities(kind: EntityKind, counts: &TlvCounts) -> Result<(), EntityError> {
    let ok = match kind {
        EntityKind::Nprofile => {
            counts.special == 1 && counts.author == 0 && counts.kind == 0 && counts.sig == 0
        }
        EntityKind::Nevent => {
            counts.special == 1 && counts.author <= 1 && counts.kind <= 1 && counts.sig == 0
        }
        EntityKind::Nrelay => {
            counts.special == 1
                && counts.relay == 0
                && counts.author == 0
                && counts.kind == 0
                && counts.sig == 0
        }
        EntityKind::Naddr => {
            counts.special == 1 && counts.author == 1 && counts.kind <= 1 && counts.sig == 0
        }
        EntityKind::Ninvite => {
            counts.special == 1
                && counts.author == 1
                && counts.kind == 0
                && counts.sig == 1
                && counts.relay == 0
        }
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(EntityError::TlvMultiplicity)
    }
}
