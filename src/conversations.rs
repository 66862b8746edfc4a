//! Direct-message conversations.
//!
//! A conversation is keyed by its counterparty pubkey and carries the alias
//! pubkeys learned from accepted invites. Messages are kept sorted by
//! `created_at`; ties keep arrival order. Conversations themselves are
//! ordered by the time of their last message.

use tracing::debug;

use crate::keys::Pubkey;
use crate::store::{EventLocator, EventStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    DirectMessage,
    Invite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConversationMessage {
    pub kind: MessageKind,
    pub event: EventLocator,
}

#[derive(Clone, Debug)]
pub struct Conversation {
    pub counterparty: Pubkey,
    aliases: Vec<Pubkey>,
    messages: Vec<ConversationMessage>,
    pub last_active: u64,
}

impl Conversation {
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn aliases(&self) -> &[Pubkey] {
        &self.aliases
    }

    pub fn knows_alias(&self, pubkey: &Pubkey) -> bool {
        self.aliases.contains(pubkey)
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Conversation> {
        self.conversations.get(index)
    }

    pub fn find(&self, counterparty: &Pubkey) -> Option<usize> {
        self.conversations
            .iter()
            .position(|c| c.counterparty == *counterparty)
    }

    pub fn find_or_create(&mut self, counterparty: Pubkey) -> usize {
        if let Some(index) = self.find(&counterparty) {
            return index;
        }
        self.conversations.push(Conversation {
            counterparty,
            aliases: Vec::new(),
            messages: Vec::new(),
            last_active: 0,
        });
        self.conversations.len() - 1
    }

    /// Files a direct message into the counterparty's conversation.
    pub fn add_direct_message(
        &mut self,
        events: &EventStore,
        counterparty: Pubkey,
        locator: EventLocator,
    ) -> usize {
        let index = self.find_or_create(counterparty);
        self.insert_message(
            events,
            index,
            ConversationMessage {
                kind: MessageKind::DirectMessage,
                event: locator,
            },
        );
        index
    }

    /// Files an accepted invite: the conversation is keyed by the invite's
    /// embedded conversation pubkey and the inviter becomes a known alias.
    /// A repeat invite for a known alias is discarded.
    pub fn add_invite(
        &mut self,
        events: &EventStore,
        conversation_pubkey: Pubkey,
        alias: Pubkey,
        locator: EventLocator,
    ) -> bool {
        let index = self.find_or_create(conversation_pubkey);
        if self.conversations[index].knows_alias(&alias) {
            debug!(alias = %alias.to_hex(), "duplicate invite discarded");
            return false;
        }
        self.conversations[index].aliases.push(alias);
        self.insert_message(
            events,
            index,
            ConversationMessage {
                kind: MessageKind::Invite,
                event: locator,
            },
        );
        true
    }

    fn insert_message(
        &mut self,
        events: &EventStore,
        index: usize,
        message: ConversationMessage,
    ) {
        let conversation = &mut self.conversations[index];
        if conversation.messages.iter().any(|m| m.event == message.event) {
            return;
        }
        conversation.messages.push(message);
        // stable sort keeps arrival order for equal timestamps
        conversation
            .messages
            .sort_by_key(|m| events.get(m.event).map(|e| e.created_at).unwrap_or(0));
        conversation.last_active = conversation
            .messages
            .last()
            .and_then(|m| events.get(m.event))
            .map(|e| e.created_at)
            .unwrap_or(0);
    }

    /// Conversation indices ordered by most recent activity, newest first.
    pub fn ordered(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.conversations.len()).collect();
        indices.sort_by_key(|&i| std::cmp::Reverse(self.conversations[i].last_active));
        indices
    }
}
