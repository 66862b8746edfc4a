//! Profile store and request batching.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::event::KIND_PROFILE;
use crate::filters::{Filters, FiltersBuilder};
use crate::keys::Pubkey;
use crate::profile::Profile;

/// Stored profiles plus the profile-request batcher.
///
/// Requests for unknown profiles dedup into a pending batch; the engine
/// arms a debounce timer on the first one and flushes the whole batch as a
/// single kind-0 REQ when it fires.
#[derive(Debug, Default)]
pub struct ProfileStore {
    profiles: Vec<Profile>,
    by_pubkey: HashMap<Pubkey, usize>,
    requested: HashSet<Pubkey>,
    batch: Vec<Pubkey>,
    flush_count: u32,
}

impl ProfileStore {
    pub fn get(&self, pubkey: &Pubkey) -> Option<&Profile> {
        self.by_pubkey.get(pubkey).map(|&index| &self.profiles[index])
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Applies a parsed profile. The whole record is replaced; an older
    /// event never overwrites a newer one.
    pub fn receive(&mut self, profile: Profile) -> bool {
        match self.by_pubkey.get(&profile.pubkey) {
            Some(&index) => {
                if profile.created_at <= self.profiles[index].created_at {
                    debug!(pubkey = %profile.pubkey.to_hex(), "stale profile ignored");
                    return false;
                }
                self.profiles[index] = profile;
            }
            None => {
                self.by_pubkey.insert(profile.pubkey, self.profiles.len());
                self.profiles.push(profile);
            }
        }
        true
    }

    /// Queues a profile request. Returns true when this call started a new
    /// batch, i.e. the caller should arm the debounce timer.
    pub fn request(&mut self, pubkey: Pubkey) -> bool {
        if self.by_pubkey.contains_key(&pubkey) || !self.requested.insert(pubkey) {
            return false;
        }
        self.batch.push(pubkey);
        self.batch.len() == 1
    }

    pub fn pending_requests(&self) -> usize {
        self.batch.len()
    }

    /// Drains the pending batch into a single subscription request.
    pub fn flush(&mut self) -> Option<(String, Filters)> {
        if self.batch.is_empty() {
            return None;
        }
        self.flush_count += 1;
        let authors = std::mem::take(&mut self.batch);
        debug!(count = authors.len(), "flushing profile request batch");
        let filters = FiltersBuilder::new()
            .kind(KIND_PROFILE)
            .authors(&authors)
            .build();
        Some((format!("prof_{}", self.flush_count), filters))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::EventBuilder;
    use crate::profile::profile_parse;

    fn profile(pubkey: Pubkey, name: &str, created_at: u64) -> Profile {
        let mut event = EventBuilder::new()
            .kind(KIND_PROFILE)
            .content(&format!(r#"{{"name":"{name}"}}"#))
            .build();
        event.pubkey = pubkey;
        event.created_at = created_at;
        profile_parse(&event).unwrap()
    }

    #[test]
    fn replacement_is_wholesale_and_gated() {
        let mut store = ProfileStore::default();
        let pubkey = Pubkey([1; 32]);

        assert!(store.receive(profile(pubkey, "old", 100)));
        assert!(store.receive(profile(pubkey, "new", 200)));
        assert_eq!(store.get(&pubkey).unwrap().name(), Some("new"));

        assert!(!store.receive(profile(pubkey, "stale", 150)));
        assert_eq!(store.get(&pubkey).unwrap().name(), Some("new"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn requests_dedup_into_one_batch() {
        let mut store = ProfileStore::default();
        let a = Pubkey([1; 32]);
        let b = Pubkey([2; 32]);

        assert!(store.request(a));
        assert!(!store.request(b));
        assert!(!store.request(a));
        assert_eq!(store.pending_requests(), 2);

        let (sub_id, filters) = store.flush().unwrap();
        assert_eq!(sub_id, "prof_1");
        assert_eq!(filters.kinds, Some(vec![KIND_PROFILE]));
        assert_eq!(filters.authors, Some(vec![a, b]));

        assert!(store.flush().is_none());
    }

    #[test]
    fn known_profiles_are_not_requested() {
        let mut store = ProfileStore::default();
        let pubkey = Pubkey([3; 32]);
        store.receive(profile(pubkey, "known", 100));
        assert!(!store.request(pubkey));
        assert_eq!(store.pending_requests(), 0);
    }
}
