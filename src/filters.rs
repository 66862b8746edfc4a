//! Subscription filters.

use serde::{Serialize, Serializer};

use crate::keys::{EventId, Pubkey};

fn hex_event_ids<S: Serializer>(ids: &Option<Vec<EventId>>, s: S) -> Result<S::Ok, S::Error> {
    match ids {
        Some(ids) => s.collect_seq(ids.iter().map(|id| id.to_hex())),
        None => s.serialize_none(),
    }
}

fn hex_pubkeys<S: Serializer>(keys: &Option<Vec<Pubkey>>, s: S) -> Result<S::Ok, S::Error> {
    match keys {
        Some(keys) => s.collect_seq(keys.iter().map(|key| key.to_hex())),
        None => s.serialize_none(),
    }
}

/// A NIP-01 subscription filter. Unset fields are omitted on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "hex_event_ids")]
    pub ids: Option<Vec<EventId>>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "hex_pubkeys")]
    pub authors: Option<Vec<Pubkey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(
        rename = "#e",
        skip_serializing_if = "Option::is_none",
        serialize_with = "hex_event_ids"
    )]
    pub e_tags: Option<Vec<EventId>>,
    #[serde(
        rename = "#p",
        skip_serializing_if = "Option::is_none",
        serialize_with = "hex_pubkeys"
    )]
    pub p_tags: Option<Vec<Pubkey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// Chainable construction of [`Filters`].
#[derive(Default)]
pub struct FiltersBuilder {
    filters: Filters,
}

impl FiltersBuilder {
    pub fn new() -> FiltersBuilder {
        FiltersBuilder::default()
    }

    pub fn ids(mut self, ids: &[EventId]) -> FiltersBuilder {
        self.filters.ids = Some(ids.to_vec());
        self
    }

    pub fn id(self, id: &EventId) -> FiltersBuilder {
        self.ids(std::slice::from_ref(id))
    }

    pub fn authors(mut self, authors: &[Pubkey]) -> FiltersBuilder {
        self.filters.authors = Some(authors.to_vec());
        self
    }

    pub fn author(self, author: &Pubkey) -> FiltersBuilder {
        self.authors(std::slice::from_ref(author))
    }

    pub fn kinds(mut self, kinds: &[u32]) -> FiltersBuilder {
        self.filters.kinds = Some(kinds.to_vec());
        self
    }

    pub fn kind(self, kind: u32) -> FiltersBuilder {
        self.kinds(&[kind])
    }

    pub fn e_tags(mut self, ids: &[EventId]) -> FiltersBuilder {
        self.filters.e_tags = Some(ids.to_vec());
        self
    }

    pub fn e_tag(self, id: &EventId) -> FiltersBuilder {
        self.e_tags(std::slice::from_ref(id))
    }

    pub fn p_tags(mut self, keys: &[Pubkey]) -> FiltersBuilder {
        self.filters.p_tags = Some(keys.to_vec());
        self
    }

    pub fn p_tag(self, key: &Pubkey) -> FiltersBuilder {
        self.p_tags(std::slice::from_ref(key))
    }

    pub fn since(mut self, since: u64) -> FiltersBuilder {
        self.filters.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> FiltersBuilder {
        self.filters.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u64) -> FiltersBuilder {
        self.filters.limit = Some(limit);
        self
    }

    pub fn build(self) -> Filters {
        self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_omitted() {
        let filters = FiltersBuilder::new().kind(0).limit(10).build();
        let json = serde_json::to_value(&filters).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["kinds"], serde_json::json!([0]));
        assert_eq!(obj["limit"], serde_json::json!(10));
    }

    #[test]
    fn keys_serialize_as_hex() {
        let author = Pubkey::from_hex(&"ab".repeat(32)).unwrap();
        let id = EventId::from_hex(&"cd".repeat(32)).unwrap();
        let filters = FiltersBuilder::new().author(&author).e_tag(&id).build();

        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(json["authors"][0], "ab".repeat(32));
        assert_eq!(json["#e"][0], "cd".repeat(32));
    }

    #[test]
    fn empty_filters_serialize_to_empty_object() {
        let json = serde_json::to_value(Filters::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
