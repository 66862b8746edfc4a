//! Event storage and contact lists.

use std::collections::HashMap;

use tracing::debug;

use crate::event::Event;
use crate::keys::{EventId, Pubkey};
use crate::relays::RelayId;

/// Index of an event inside the [`EventStore`].
pub type EventLocator = usize;

/// Append-only event store, deduplicated by id.
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
    by_id: HashMap<EventId, EventLocator>,
}

impl EventStore {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, locator: EventLocator) -> Option<&Event> {
        self.events.get(locator)
    }

    pub(crate) fn get_mut(&mut self, locator: EventLocator) -> Option<&mut Event> {
        self.events.get_mut(locator)
    }

    pub fn find(&self, id: &EventId) -> Option<EventLocator> {
        self.by_id.get(id).copied()
    }

    /// Stores an event, or returns the locator of the already-stored copy.
    pub fn insert(&mut self, event: Event) -> EventLocator {
        if let Some(locator) = self.find(&event.id) {
            debug!(id = %event.id.to_hex(), "duplicate event");
            return locator;
        }
        let locator = self.events.len();
        self.by_id.insert(event.id, locator);
        self.events.push(event);
        locator
    }

    pub fn record_receipt(&mut self, locator: EventLocator, relay_id: RelayId, receipt_time: u64) {
        if let Some(event) = self.events.get_mut(locator) {
            event.receipts.record(relay_id, receipt_time);
        }
    }

    /// Records an OK verdict on a self-authored event. Returns false when
    /// the event is unknown or carries no publish log.
    pub fn record_publish_ack(
        &mut self,
        id: &EventId,
        relay_id: RelayId,
        accepted: bool,
        ack_time: u64,
    ) -> bool {
        let Some(locator) = self.find(id) else {
            return false;
        };
        let Some(log) = self
            .events
            .get_mut(locator)
            .and_then(|event| event.publish_log.as_mut())
        else {
            return false;
        };
        log.record(relay_id, accepted, ack_time);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}

/// One kind-3 contact list per author, replaced only by strictly newer
/// events.
#[derive(Debug, Default)]
pub struct ContactListStore {
    lists: HashMap<Pubkey, EventLocator>,
}

impl ContactListStore {
    pub fn contact_list(&self, pubkey: &Pubkey) -> Option<EventLocator> {
        self.lists.get(pubkey).copied()
    }

    /// Applies a stored kind-3 event. Returns true when it became the
    /// author's current list.
    pub fn apply(&mut self, events: &EventStore, locator: EventLocator) -> bool {
        let Some(event) = events.get(locator) else {
            return false;
        };
        if let Some(current) = self.lists.get(&event.pubkey) {
            let current_time = events.get(*current).map(|e| e.created_at).unwrap_or(0);
            if event.created_at <= current_time {
                debug!(
                    pubkey = %event.pubkey.to_hex(),
                    "stale contact list ignored"
                );
                return false;
            }
        }
        self.lists.insert(event.pubkey, locator);
        true
    }

    /// Does `first`'s current contact list include `second`?
    pub fn follows(&self, events: &EventStore, first: &Pubkey, second: &Pubkey) -> bool {
        let Some(locator) = self.contact_list(first) else {
            return false;
        };
        let Some(list) = events.get(locator) else {
            return false;
        };
        list.p_tags().iter().any(|p| p.pubkey == *second)
    }
}
