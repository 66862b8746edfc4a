//! The client engine.
//!
//! The engine owns every store and drives the whole inbound and outbound
//! pipeline, but never touches a socket, a disk, or a clock source for
//! timers itself. Those live behind the [`Transport`], [`Storage`], and
//! [`Scheduler`] traits supplied by the embedding application, which also
//! makes the engine fully testable with in-memory fakes.

use thiserror::Error;
use tracing::{debug, warn};

use crate::account::{Account, ACCOUNT_FILE};
use crate::builder::EventBuilder;
use crate::content::{parse_content, ContentToken};
use crate::conversations::ConversationStore;
use crate::entity::EntityKind;
use crate::error::AccountError;
use crate::event::{
    unix_time_now, validate, ContentEncryption, Event, EventValidity, KIND_CONTACT_LIST,
    KIND_DIRECT_MESSAGE, KIND_PROFILE, KIND_TEXT_NOTE,
};
use crate::filters::Filters;
use crate::invite::verify_invite;
use crate::keys::{EventId, Pubkey, Seckey};
use crate::parse::event_parse;
use crate::profile::profile_parse;
use crate::profiles::ProfileStore;
use crate::relay_message::{relay_message_parse, RelayMessage, SUB_ID_MAX_LEN};
use crate::relays::{RelayId, RelayStore};
use crate::store::{ContactListStore, EventLocator, EventStore};
use crate::stringify::{client_message_close, client_message_event, client_message_req};

/// Debounce window for profile request batching.
pub const PROFILE_BATCH_DELAY_MS: u64 = 200;

/// Outbound text frames. One implementation per connection strategy; the
/// engine only ever hands it finished JSON.
pub trait Transport {
    fn send(&mut self, text: &str);
}

/// Small-file persistence for the account.
pub trait Storage {
    fn read(&self, name: &str) -> Option<Vec<u8>>;
    fn write(&mut self, name: &str, bytes: &[u8]);
    /// Hook for buffered implementations; the default is a no-op.
    fn flush(&mut self) {}
}

/// Timer service. The application calls [`Engine::on_timer`] when a
/// scheduled timer fires.
pub trait Scheduler {
    fn schedule(&mut self, delay_ms: u64, timer: Timer);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timer {
    ProfileBatch,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no account configured")]
    NoAccount,
    #[error("subscription id exceeds {SUB_ID_MAX_LEN} bytes")]
    SubscriptionIdTooLong,
    #[error(transparent)]
    Account(#[from] AccountError),
}

pub struct Engine<T, S, C> {
    transport: T,
    storage: S,
    scheduler: C,
    account: Option<Account>,

    pub relays: RelayStore,
    pub events: EventStore,
    pub profiles: ProfileStore,
    pub contacts: ContactListStore,
    pub conversations: ConversationStore,
}

impl<T: Transport, S: Storage, C: Scheduler> Engine<T, S, C> {
    /// Builds an engine, restoring the persisted account if one exists. An
    /// unreadable account file is logged and treated as absent.
    pub fn new(transport: T, storage: S, scheduler: C) -> Engine<T, S, C> {
        let account = storage.read(ACCOUNT_FILE).and_then(|bytes| {
            Account::load(&bytes)
                .map_err(|err| warn!(%err, "stored account unusable"))
                .ok()
        });
        Engine {
            transport,
            storage,
            scheduler,
            account,
            relays: RelayStore::default(),
            events: EventStore::default(),
            profiles: ProfileStore::default(),
            contacts: ContactListStore::default(),
            conversations: ConversationStore::default(),
        }
    }

    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    /// Logs in with a secret key and persists the account.
    pub fn login_with_seckey(&mut self, seckey: Seckey) -> Result<Pubkey, EngineError> {
        let account = Account::from_seckey(seckey)?;
        let pubkey = account.pubkey;
        self.storage.write(ACCOUNT_FILE, &account.store());
        self.storage.flush();
        self.account = Some(account);
        Ok(pubkey)
    }

    /// Logs in watch-only and persists the account.
    pub fn login_with_pubkey(&mut self, pubkey: Pubkey) {
        let account = Account::from_pubkey(pubkey);
        self.storage.write(ACCOUNT_FILE, &account.store());
        self.storage.flush();
        self.account = Some(account);
    }

    /// Feeds one raw frame received from a relay through the pipeline.
    /// Malformed frames and invalid events are logged and dropped; nothing
    /// a relay sends can error the engine.
    pub fn receive_relay_text(&mut self, relay_url: &str, text: &str) {
        let relay_id = self.relays.register(relay_url);
        let message = match relay_message_parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(relay = relay_url, %err, "unparseable relay frame");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event_json,
            } => {
                debug!(sub_id = %subscription_id, "event frame");
                self.receive_event(relay_id, event_json);
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if !accepted {
                    warn!(id = %event_id.to_hex(), %message, "event rejected");
                }
                if !self
                    .events
                    .record_publish_ack(&event_id, relay_id, accepted, unix_time_now())
                {
                    debug!(id = %event_id.to_hex(), "ack for unknown publish");
                }
            }
            RelayMessage::Notice { message } => {
                warn!(relay = relay_url, %message, "relay notice");
            }
            RelayMessage::Eose { subscription_id } => {
                debug!(sub_id = %subscription_id, "end of stored events");
            }
            RelayMessage::Auth { .. } | RelayMessage::Count { .. } => {
                debug!(relay = relay_url, "unhandled relay message");
            }
        }
    }

    fn receive_event(&mut self, relay_id: RelayId, event_json: &str) {
        let mut event = match event_parse(event_json) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "dropping unparseable event");
                return;
            }
        };

        // a known event only merges its receipt, nothing re-runs
        if let Some(locator) = self.events.find(&event.id) {
            self.events.record_receipt(locator, relay_id, unix_time_now());
            return;
        }

        if validate(&mut event) != EventValidity::Valid {
            warn!(
                id = %event.id.to_hex(),
                verdict = ?event.validity,
                "dropping invalid event"
            );
            return;
        }

        // kind-specific work that mutates the event happens before the
        // store takes ownership
        let mut dm_filing = None;
        match event.kind {
            KIND_TEXT_NOTE => {
                event.content_encryption = ContentEncryption::Regular;
                parse_content(&mut event);
            }
            KIND_DIRECT_MESSAGE => {
                dm_filing = self.prepare_direct_message(&mut event);
            }
            KIND_PROFILE | KIND_CONTACT_LIST => {}
            other => {
                debug!(kind = other, "dropping event of unhandled kind");
                return;
            }
        }

        let kind = event.kind;
        let locator = self.events.insert(event);
        self.events.record_receipt(locator, relay_id, unix_time_now());

        match kind {
            KIND_PROFILE => self.apply_profile(locator),
            KIND_CONTACT_LIST => self.apply_contact_list(locator),
            KIND_DIRECT_MESSAGE => {
                if let Some(filing) = dm_filing {
                    self.file_direct_message(locator, filing);
                }
            }
            _ => {}
        }
    }

    fn apply_profile(&mut self, locator: EventLocator) {
        let Some(event) = self.events.get(locator) else {
            return;
        };
        match profile_parse(event) {
            Ok(profile) => {
                self.profiles.receive(profile);
            }
            Err(err) => warn!(%err, "dropping unparseable profile"),
        }
    }

    fn apply_contact_list(&mut self, locator: EventLocator) {
        if !self.contacts.apply(&self.events, locator) {
            return;
        }
        // our own contact list seeds the profile cache
        let own = self
            .account
            .as_ref()
            .map(|account| account.pubkey)
            .zip(self.events.get(locator).map(|event| event.pubkey));
        if let Some((account_pubkey, author)) = own {
            if account_pubkey == author {
                let followed: Vec<Pubkey> = self
                    .events
                    .get(locator)
                    .map(|event| event.p_tags().iter().map(|p| p.pubkey).collect())
                    .unwrap_or_default();
                for pubkey in followed {
                    self.request_profile(pubkey);
                }
            }
        }
    }

    /// Decrypts and tokenizes an inbound direct message, deciding where it
    /// will be filed once stored. Messages not involving the account stay
    /// encrypted.
    fn prepare_direct_message(&mut self, event: &mut Event) -> Option<DmFiling> {
        event.content_encryption = ContentEncryption::Encrypted;
        let account = self.account.clone()?;

        let recipient = event.p_tags().first().map(|p| p.pubkey)?;
        let counterparty = if event.pubkey == account.pubkey {
            recipient
        } else if recipient == account.pubkey {
            event.pubkey
        } else {
            debug!(id = %event.id.to_hex(), "direct message for someone else");
            return None;
        };

        let plaintext = match account.nip04_decrypt(&counterparty, event.content()) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                debug!(id = %event.id.to_hex(), %err, "direct message failed to decrypt");
                event.content_encryption = ContentEncryption::DecryptFailed;
                return None;
            }
        };
        event.set_decrypted_content(&plaintext);
        parse_content(event);

        // a verified invite token refiles the whole message as an invite
        for token in event.tokens() {
            let ContentToken::Entity { entity_index, .. } = token else {
                continue;
            };
            let Some(entity) = event.entities().get(*entity_index as usize) else {
                continue;
            };
            if entity.kind != EntityKind::Ninvite {
                continue;
            }
            if !verify_invite(entity, &account.pubkey) {
                warn!(id = %event.id.to_hex(), "invite signature does not verify");
                continue;
            }
            if let (Some(inviter), Some(invite)) = (entity.pubkey, entity.invite.as_ref()) {
                return Some(DmFiling::Invite {
                    conversation_pubkey: invite.conversation_pubkey,
                    alias: inviter,
                });
            }
        }

        Some(DmFiling::Message { counterparty })
    }

    fn file_direct_message(&mut self, locator: EventLocator, filing: DmFiling) {
        match filing {
            DmFiling::Message { counterparty } => {
                self.conversations
                    .add_direct_message(&self.events, counterparty, locator);
                self.request_profile(counterparty);
            }
            DmFiling::Invite {
                conversation_pubkey,
                alias,
            } => {
                self.conversations
                    .add_invite(&self.events, conversation_pubkey, alias, locator);
                self.request_profile(alias);
            }
        }
    }

    /// Encrypts, signs, publishes, and locally files a direct message.
    /// Returns the id of the published event.
    pub fn send_direct_message(
        &mut self,
        recipient: &Pubkey,
        plaintext: &str,
    ) -> Result<EventId, EngineError> {
        let account = self.account.clone().ok_or(EngineError::NoAccount)?;
        let ciphertext = account.nip04_encrypt(recipient, plaintext)?;

        let mut event = EventBuilder::new()
            .kind(KIND_DIRECT_MESSAGE)
            .content(&ciphertext)
            .p_tag(recipient)
            .sent_by_client()
            .build();
        account.sign_event(&mut event)?;

        // frame before swapping in the plaintext view
        let frame = client_message_event(&event);
        let event_id = event.id;
        event.set_decrypted_content(plaintext);
        parse_content(&mut event);

        self.transport.send(&frame);
        let locator = self.events.insert(event);
        self.conversations
            .add_direct_message(&self.events, *recipient, locator);
        Ok(event_id)
    }

    /// Signs and publishes a public text note.
    pub fn send_text_note(&mut self, content: &str) -> Result<EventId, EngineError> {
        let account = self.account.clone().ok_or(EngineError::NoAccount)?;

        let mut event = EventBuilder::new()
            .kind(KIND_TEXT_NOTE)
            .content(content)
            .sent_by_client()
            .build();
        account.sign_event(&mut event)?;

        let frame = client_message_event(&event);
        let event_id = event.id;
        event.content_encryption = ContentEncryption::Regular;
        parse_content(&mut event);

        self.transport.send(&frame);
        self.events.insert(event);
        Ok(event_id)
    }

    pub fn subscribe(&mut self, sub_id: &str, filters: &Filters) -> Result<(), EngineError> {
        if sub_id.len() > SUB_ID_MAX_LEN {
            return Err(EngineError::SubscriptionIdTooLong);
        }
        self.transport.send(&client_message_req(sub_id, filters));
        Ok(())
    }

    pub fn unsubscribe(&mut self, sub_id: &str) {
        self.transport.send(&client_message_close(sub_id));
    }

    /// Queues a profile fetch, arming the debounce timer when this request
    /// starts a new batch.
    pub fn request_profile(&mut self, pubkey: Pubkey) {
        if self.profiles.request(pubkey) {
            self.scheduler
                .schedule(PROFILE_BATCH_DELAY_MS, Timer::ProfileBatch);
        }
    }

    pub fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::ProfileBatch => {
                if let Some((sub_id, filters)) = self.profiles.flush() {
                    self.transport.send(&client_message_req(&sub_id, &filters));
                }
            }
        }
    }
}

enum DmFiling {
    Message {
        counterparty: Pubkey,
    },
    Invite {
        conversation_pubkey: Pubkey,
        alias: Pubkey,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{sign, sign_at};
    use crate::filters::FiltersBuilder;
    use crate::stringify::event_stringify;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTransport {
        sent: Vec<String>,
    }

    impl Transport for FakeTransport {
        fn send(&mut self, text: &str) {
            self.sent.push(text.to_owned());
        }
    }

    #[derive(Default)]
    struct MemStorage {
        files: HashMap<String, Vec<u8>>,
    }

    impl Storage for MemStorage {
        fn read(&self, name: &str) -> Option<Vec<u8>> {
            self.files.get(name).cloned()
        }

        fn write(&mut self, name: &str, bytes: &[u8]) {
            self.files.insert(name.to_owned(), bytes.to_vec());
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        armed: Vec<(u64, Timer)>,
    }

    impl Scheduler for FakeScheduler {
        fn schedule(&mut self, delay_ms: u64, timer: Timer) {
            self.armed.push((delay_ms, timer));
        }
    }

    type TestEngine = Engine<FakeTransport, MemStorage, FakeScheduler>;

    fn engine() -> TestEngine {
        Engine::new(
            FakeTransport::default(),
            MemStorage::default(),
            FakeScheduler::default(),
        )
    }

    fn seckey(byte: u8) -> Seckey {
        let mut bytes = [0u8; 32];
        bytes[31] = byte;
        Seckey::from_bytes(bytes)
    }

    fn event_frame(event: &Event) -> String {
        format!("[\"EVENT\",\"sub1\",{}]", event_stringify(event))
    }

    #[test]
    fn valid_events_are_stored_with_a_receipt() {
        let mut engine = engine();
        let mut note = EventBuilder::new()
            .kind(KIND_TEXT_NOTE)
            .content("hello world")
            .build();
        sign(&mut note, &seckey(1)).unwrap();

        engine.receive_relay_text("wss://relay.one", &event_frame(&note));

        assert_eq!(engine.events.len(), 1);
        let stored = engine.events.get(0).unwrap();
        assert_eq!(stored.validity, EventValidity::Valid);
        assert_eq!(stored.receipts.entries().len(), 1);
        assert_eq!(stored.content(), "hello world");
    }

    #[test]
    fn duplicate_events_merge_receipts_only() {
        let mut engine = engine();
        let mut note = EventBuilder::new().kind(KIND_TEXT_NOTE).content("hi").build();
        sign(&mut note, &seckey(1)).unwrap();
        let frame = event_frame(&note);

        engine.receive_relay_text("wss://relay.one", &frame);
        engine.receive_relay_text("wss://relay.two", &frame);

        assert_eq!(engine.events.len(), 1);
        assert_eq!(engine.events.get(0).unwrap().receipts.entries().len(), 2);
    }

    #[test]
    fn tampered_events_are_dropped() {
        let mut engine = engine();
        let mut note = EventBuilder::new().kind(KIND_TEXT_NOTE).content("hi").build();
        sign(&mut note, &seckey(1)).unwrap();
        note.sig.0[10] ^= 0x01;

        engine.receive_relay_text("wss://relay.one", &event_frame(&note));
        assert!(engine.events.is_empty());
    }

    #[test]
    fn garbage_frames_are_dropped() {
        let mut engine = engine();
        engine.receive_relay_text("wss://relay.one", "not json");
        engine.receive_relay_text("wss://relay.one", "[\"EVENT\",\"sub1\",{\"id\":5}]");
        assert!(engine.events.is_empty());
    }

    #[test]
    fn inbound_direct_messages_decrypt_into_a_conversation() {
        let mut engine = engine();
        let bob = engine.login_with_seckey(seckey(2)).unwrap();

        // alice writes to bob through her own engine
        let mut alice_engine = engine_with_seckey(1);
        alice_engine.send_direct_message(&bob, "hi bob").unwrap();
        let published = alice_engine.transport.sent[0].clone();
        let frame = published.replacen("[\"EVENT\",", "[\"EVENT\",\"sub1\",", 1);

        engine.receive_relay_text("wss://relay.one", &frame);

        assert_eq!(engine.conversations.len(), 1);
        let conversation = engine.conversations.get(0).unwrap();
        assert_eq!(conversation.messages().len(), 1);
        let stored = engine.events.get(conversation.messages()[0].event).unwrap();
        assert_eq!(stored.content_encryption, ContentEncryption::Decrypted);
        assert_eq!(stored.content(), "hi bob");
    }

    fn engine_with_seckey(byte: u8) -> TestEngine {
        let mut engine = engine();
        engine.login_with_seckey(seckey(byte)).unwrap();
        engine
    }

    #[test]
    fn sent_direct_messages_publish_ciphertext_but_file_plaintext() {
        let mut alice = engine_with_seckey(1);
        let bob = crate::keys::derive_pubkey(&seckey(2)).unwrap();

        let id = alice.send_direct_message(&bob, "secret").unwrap();

        let frame = &alice.transport.sent[0];
        assert!(frame.starts_with("[\"EVENT\","));
        assert!(!frame.contains("secret"));
        assert!(frame.contains("?iv="));

        let locator = alice.events.find(&id).unwrap();
        let stored = alice.events.get(locator).unwrap();
        assert_eq!(stored.content(), "secret");
        assert!(stored.publish_log.is_some());
        assert_eq!(alice.conversations.len(), 1);
    }

    #[test]
    fn ok_frames_ack_published_events() {
        let mut alice = engine_with_seckey(1);
        let bob = crate::keys::derive_pubkey(&seckey(2)).unwrap();
        let id = alice.send_direct_message(&bob, "secret").unwrap();

        let frame = format!("[\"OK\",\"{}\",true,\"\"]", id.to_hex());
        alice.receive_relay_text("wss://relay.one", &frame);

        let locator = alice.events.find(&id).unwrap();
        let log = alice.events.get(locator).unwrap().publish_log.as_ref().unwrap();
        assert_eq!(log.entries().len(), 1);
        assert!(log.entries()[0].accepted);
    }

    #[test]
    fn profile_requests_debounce_into_one_req() {
        let mut engine = engine();
        let a = Pubkey([1; 32]);
        let b = Pubkey([2; 32]);

        engine.request_profile(a);
        engine.request_profile(b);
        engine.request_profile(a);

        // one timer armed for the whole batch
        assert_eq!(
            engine.scheduler.armed,
            vec![(PROFILE_BATCH_DELAY_MS, Timer::ProfileBatch)]
        );
        assert!(engine.transport.sent.is_empty());

        engine.on_timer(Timer::ProfileBatch);
        assert_eq!(engine.transport.sent.len(), 1);
        let value: serde_json::Value =
            serde_json::from_str(&engine.transport.sent[0]).unwrap();
        assert_eq!(value[0], "REQ");
        assert_eq!(value[2]["kinds"], serde_json::json!([KIND_PROFILE]));
        assert_eq!(value[2]["authors"].as_array().unwrap().len(), 2);

        // a drained batch does not send again
        engine.on_timer(Timer::ProfileBatch);
        assert_eq!(engine.transport.sent.len(), 1);
    }

    #[test]
    fn profiles_flow_into_the_store() {
        let mut engine = engine();
        let mut event = EventBuilder::new()
            .kind(KIND_PROFILE)
            .content(r#"{"name":"alice","about":"hi"}"#)
            .build();
        sign(&mut event, &seckey(1)).unwrap();
        let author = event.pubkey;

        engine.receive_relay_text("wss://relay.one", &event_frame(&event));

        let profile = engine.profiles.get(&author).unwrap();
        assert_eq!(profile.name(), Some("alice"));
        assert_eq!(profile.about(), Some("hi"));
    }

    #[test]
    fn own_contact_list_requests_followed_profiles() {
        let mut engine = engine_with_seckey(3);
        let friend_a = crate::keys::derive_pubkey(&seckey(4)).unwrap();
        let friend_b = crate::keys::derive_pubkey(&seckey(5)).unwrap();

        let mut list = EventBuilder::new()
            .kind(KIND_CONTACT_LIST)
            .p_tag(&friend_a)
            .p_tag(&friend_b)
            .build();
        sign_at(&mut list, &seckey(3), 1000).unwrap();

        engine.receive_relay_text("wss://relay.one", &event_frame(&list));

        assert_eq!(engine.profiles.pending_requests(), 2);
        assert_eq!(engine.scheduler.armed.len(), 1);
        let own = engine.account().unwrap().pubkey;
        assert!(engine.contacts.follows(&engine.events, &own, &friend_a));
    }

    #[test]
    fn subscriptions_are_framed_and_bounded() {
        let mut engine = engine();
        let filters = FiltersBuilder::new().kind(KIND_TEXT_NOTE).limit(10).build();

        engine.subscribe("feed", &filters).unwrap();
        engine.unsubscribe("feed");
        assert_eq!(engine.transport.sent.len(), 2);
        assert!(engine.transport.sent[0].starts_with("[\"REQ\",\"feed\","));
        assert_eq!(engine.transport.sent[1], r#"["CLOSE","feed"]"#);

        let long = "s".repeat(SUB_ID_MAX_LEN + 1);
        assert_eq!(
            engine.subscribe(&long, &filters).unwrap_err(),
            EngineError::SubscriptionIdTooLong
        );
    }

    #[test]
    fn account_persists_across_engines() {
        let mut first = engine();
        let pubkey = first.login_with_seckey(seckey(9)).unwrap();

        let second = Engine::new(
            FakeTransport::default(),
            first.storage,
            FakeScheduler::default(),
        );
        let account = second.account().unwrap();
        assert_eq!(account.pubkey, pubkey);
        assert!(account.has_seckey());
    }

    #[test]
    fn operations_without_an_account_fail() {
        let mut engine = engine();
        let bob = crate::keys::derive_pubkey(&seckey(2)).unwrap();
        assert_eq!(
            engine.send_direct_message(&bob, "x").unwrap_err(),
            EngineError::NoAccount
        );
        assert_eq!(
            engine.send_text_note("x").unwrap_err(),
            EngineError::NoAccount
        );
    }
}
