//! Relay registry.
//!
//! The engine never talks to relays itself; it just hands out stable ids
//! so receipt logs and publish logs can name their source compactly.

pub type RelayId = u32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayInfo {
    pub id: RelayId,
    pub url: String,
}

#[derive(Debug, Default)]
pub struct RelayStore {
    relays: Vec<RelayInfo>,
}

impl RelayStore {
    /// Returns the id for a url, registering it on first sight.
    pub fn register(&mut self, url: &str) -> RelayId {
        if let Some(info) = self.relays.iter().find(|info| info.url == url) {
            return info.id;
        }
        let id = self.relays.len() as RelayId;
        self.relays.push(RelayInfo {
            id,
            url: url.to_owned(),
        });
        id
    }

    pub fn url(&self, id: RelayId) -> Option<&str> {
        self.relays.get(id as usize).map(|info| info.url.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayInfo> {
        self.relays.iter()
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}
