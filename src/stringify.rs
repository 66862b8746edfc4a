//! Serialization of events and client-to-relay messages.

use serde::ser::{Serialize, SerializeSeq, SerializeStruct, Serializer};

use crate::event::Event;
use crate::filters::Filters;

struct TagsJson<'a>(&'a Event);

impl Serialize for TagsJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.tag_count()))?;
        for index in 0..self.0.tag_count() {
            if let Some(tag) = self.0.tag(index) {
                let values: Vec<&str> = tag.iter().collect();
                seq.serialize_element(&values)?;
            }
        }
        seq.end()
    }
}

struct EventJson<'a>(&'a Event);

impl Serialize for EventJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let event = self.0;
        let mut s = serializer.serialize_struct("Event", 7)?;
        s.serialize_field("id", &event.id.to_hex())?;
        s.serialize_field("pubkey", &event.pubkey.to_hex())?;
        s.serialize_field("kind", &event.kind)?;
        s.serialize_field("created_at", &event.created_at)?;
        s.serialize_field("content", event.content())?;
        s.serialize_field("tags", &TagsJson(event))?;
        s.serialize_field("sig", &event.sig.to_hex())?;
        s.end()
    }
}

/// Compact JSON form of an event, keys in the conventional order.
pub fn event_stringify(event: &Event) -> String {
    // in-memory serialization of plain strings and integers cannot fail
    serde_json::to_string(&EventJson(event)).unwrap_or_default()
}

/// `["EVENT", {...}]` frame for publishing an event.
pub fn client_message_event(event: &Event) -> String {
    format!("[\"EVENT\",{}]", event_stringify(event))
}

/// `["REQ", <sub_id>, {...}]` frame opening a subscription.
pub fn client_message_req(sub_id: &str, filters: &Filters) -> String {
    serde_json::json!(["REQ", sub_id, filters]).to_string()
}

/// `["CLOSE", <sub_id>]` frame tearing a subscription down.
pub fn client_message_close(sub_id: &str) -> String {
    serde_json::json!(["CLOSE", sub_id]).to_string()
}
