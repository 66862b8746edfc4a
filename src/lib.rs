//! Client-side Nostr protocol engine. Parses, validates, and stores signed
//! events, handles NIP-04 direct messages and NIP-19 entities, and drives
//! subscriptions and publishing through application-supplied transport,
//! storage, and timer traits.

mod account;
mod builder;
mod content;
mod conversations;
mod engine;
mod entity;
mod error;
mod event;
mod filters;
mod invite;
mod keys;
mod nip04;
mod parse;
mod profile;
mod profiles;
mod record;
mod relay_message;
mod relays;
mod store;
mod stringify;

pub use account::{Account, ACCOUNT_FILE};
pub use builder::EventBuilder;
pub use content::ContentToken;
pub use conversations::{
    Conversation, ConversationMessage, ConversationStore, MessageKind,
};
pub use engine::{
    Engine, EngineError, Scheduler, Storage, Timer, Transport, PROFILE_BATCH_DELAY_MS,
};
pub use entity::{Entity, EntityKind, Invite, MAX_RELAY_HINTS};
pub use error::{AccountError, CryptoError, EntityError, EventField, ParseError};
pub use event::{
    compute_hash, sign, unix_time_now, validate, ContentEncryption, ETag, ETagMarker, Event,
    EventValidity, PTag, PublishAck, PublishLog, Receipt, ReceiptLog, TagRef,
    KIND_CONTACT_LIST, KIND_DIRECT_MESSAGE, KIND_PROFILE, KIND_TEXT_NOTE, RECEIPT_LOG_CAP,
};
pub use filters::{Filters, FiltersBuilder};
pub use invite::{create_invite, verify_invite};
pub use keys::{derive_pubkey, EventId, Pubkey, Seckey, Signature};
pub use parse::event_parse;
pub use profile::{profile_parse, Profile};
pub use profiles::ProfileStore;
pub use relay_message::{relay_message_parse, RelayMessage, SUB_ID_MAX_LEN};
pub use relays::{RelayId, RelayInfo, RelayStore};
pub use record::{RelSlice, RelStr, TextPool};
pub use store::{ContactListStore, EventLocator, EventStore};
pub use stringify::{
    client_message_close, client_message_event, client_message_req, event_stringify,
};
