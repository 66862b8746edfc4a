//! Chainable construction of draft events.
//!
//! The builder accumulates a draft, then `build` runs a sizing pass over it
//! and writes the event into exact-capacity pools.

use crate::event::{extract_tag_refs, ETagMarker, Event, PublishLog};
use crate::keys::{EventId, Pubkey};
use crate::record::{RelSlice, TextPool};

const TAG_E: &str = "e";
const TAG_P: &str = "p";

fn marker_str(marker: ETagMarker) -> Option<&'static str> {
    match marker {
        ETagMarker::None => None,
        ETagMarker::Reply => Some("reply"),
        ETagMarker::Root => Some("root"),
        ETagMarker::Mention => Some("mention"),
    }
}

/// Builder for unsigned draft events.
///
/// Tags land in the event in call order, so `next_tag_index` before a
/// `p_tag`/`e_tag` call gives the index a `#[n]` mention should refer to.
#[derive(Default)]
pub struct EventBuilder {
    kind: u32,
    content: String,
    tags: Vec<Vec<String>>,
    sent_by_client: bool,
}

impl EventBuilder {
    pub fn new() -> EventBuilder {
        EventBuilder::default()
    }

    pub fn kind(mut self, kind: u32) -> EventBuilder {
        self.kind = kind;
        self
    }

    pub fn content(mut self, content: &str) -> EventBuilder {
        self.content = content.to_owned();
        self
    }

    /// Adds a verbatim tag row.
    pub fn tag(mut self, values: &[&str]) -> EventBuilder {
        self.tags.push(values.iter().map(|v| (*v).to_owned()).collect());
        self
    }

    /// Adds an `e` tag. A marker other than `None` produces the long form
    /// `["e", <id>, "", <marker>]`.
    pub fn e_tag(mut self, event_id: &EventId, marker: ETagMarker) -> EventBuilder {
        let mut row = vec![TAG_E.to_owned(), event_id.to_hex()];
        if let Some(marker) = marker_str(marker) {
            row.push(String::new());
            row.push(marker.to_owned());
        }
        self.tags.push(row);
        self
    }

    pub fn p_tag(mut self, pubkey: &Pubkey) -> EventBuilder {
        self.tags.push(vec![TAG_P.to_owned(), pubkey.to_hex()]);
        self
    }

    /// Index the next added tag will occupy.
    pub fn next_tag_index(&self) -> u32 {
        self.tags.len() as u32
    }

    /// Marks the draft as authored locally; the built event carries a
    /// publish log for OK acknowledgements.
    pub fn sent_by_client(mut self) -> EventBuilder {
        self.sent_by_client = true;
        self
    }

    pub fn build(self) -> Event {
        // Sizing pass
        let text_len: usize = self.content.len()
            + self
                .tags
                .iter()
                .flat_map(|tag| tag.iter())
                .map(|value| value.len())
                .sum::<usize>();
        let num_values: usize = self.tags.iter().map(|tag| tag.len()).sum();

        let mut event = Event {
            kind: self.kind,
            text: TextPool::with_capacity(text_len),
            tags: Vec::with_capacity(self.tags.len()),
            tag_values: Vec::with_capacity(num_values),
            publish_log: self.sent_by_client.then(PublishLog::default),
            ..Event::default()
        };

        event.content = event.text.push_str(&self.content);
        for tag in &self.tags {
            let row = RelSlice {
                start: event.tag_values.len() as u32,
                len: tag.len() as u32,
            };
            for value in tag {
                let handle = event.text.push_str(value);
                event.tag_values.push(handle);
            }
            event.tags.push(row);
        }

        extract_tag_refs(&mut event);
        event
    }
}
