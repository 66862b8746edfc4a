//! Conversation invite creation and verification.
//!
//! An invite's signature is a Schnorr signature over a canonical event that
//! is never published: kind 0, empty content, `created_at` 0, authored by
//! the inviter, with two p tags naming the recipient and the conversation
//! pubkey in that order. Verification rebuilds that event and checks the
//! embedded signature against it.

use crate::builder::EventBuilder;
use crate::entity::Entity;
use crate::error::CryptoError;
use crate::event::{compute_hash, sign_at, validate, EventValidity};
use crate::keys::{derive_pubkey, Pubkey, Seckey};

fn canonical_invite_event(
    inviter: Pubkey,
    recipient: &Pubkey,
    conversation_pubkey: &Pubkey,
) -> crate::event::Event {
    let mut event = EventBuilder::new()
        .kind(0)
        .content("")
        .p_tag(recipient)
        .p_tag(conversation_pubkey)
        .build();
    event.pubkey = inviter;
    event.created_at = 0;
    event
}

/// Issues an invite entity for a recipient.
pub fn create_invite(
    inviter_seckey: &Seckey,
    recipient: &Pubkey,
    conversation_pubkey: &Pubkey,
) -> Result<Entity, CryptoError> {
    let inviter = derive_pubkey(inviter_seckey)?;
    let mut event = canonical_invite_event(inviter, recipient, conversation_pubkey);
    sign_at(&mut event, inviter_seckey, 0)?;
    Ok(Entity::ninvite(inviter, *conversation_pubkey, event.sig))
}

/// Checks an `ninvite` entity addressed to `recipient`.
pub fn verify_invite(entity: &Entity, recipient: &Pubkey) -> bool {
    let (Some(inviter), Some(invite)) = (entity.pubkey, entity.invite.as_ref()) else {
        return false;
    };

    let mut event = canonical_invite_event(inviter, recipient, &invite.conversation_pubkey);
    event.id = compute_hash(&event);
    event.sig = invite.signature;
    validate(&mut event) == EventValidity::Valid
}
