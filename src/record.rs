//! Building blocks for relocatable records.
//!
//! Every variable-length record in the engine (events, profiles, decoded
//! entities) keeps its string data in a byte pool owned by the record itself
//! and refers to it by offset, never by pointer. A record can be cloned or
//! written out as one blob and all of its handles stay valid.
//!
//! Handles are only meaningful against the pool they were created from. A
//! handle applied to the wrong pool fails closed to the empty string.

/// A string stored out-of-line in a record's [`TextPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelStr {
    pub off: u32,
    pub len: u32,
}

impl RelStr {
    /// Resolves the handle against its pool. Range and UTF-8 are checked at
    /// access; a foreign handle yields `""` rather than panicking.
    pub fn get<'a>(&self, pool: &'a TextPool) -> &'a str {
        let start = self.off as usize;
        let end = start.saturating_add(self.len as usize);
        match pool.bytes.get(start..end) {
            Some(bytes) => std::str::from_utf8(bytes).unwrap_or(""),
            None => "",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A range into a typed side table, e.g. one tag's run of values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelSlice {
    pub start: u32,
    pub len: u32,
}

/// Append-only byte pool backing the `RelStr` handles of one record.
///
/// Callers size the pool up front (the parsers and builders all run a
/// sizing pass first) so filling it never reallocates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextPool {
    bytes: Vec<u8>,
}

impl TextPool {
    pub fn with_capacity(bytes: usize) -> TextPool {
        TextPool {
            bytes: Vec::with_capacity(bytes),
        }
    }

    pub fn push_str(&mut self, s: &str) -> RelStr {
        self.push_bytes(s.as_bytes())
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> RelStr {
        let handle = RelStr {
            off: self.bytes.len() as u32,
            len: bytes.len() as u32,
        };
        self.bytes.extend_from_slice(bytes);
        handle
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get() {
        let mut pool = TextPool::with_capacity(16);
        let a = pool.push_str("hello");
        let b = pool.push_str("world");
        assert_eq!(a.get(&pool), "hello");
        assert_eq!(b.get(&pool), "world");
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn foreign_handle_fails_closed() {
        let mut pool = TextPool::with_capacity(4);
        pool.push_str("hi");
        let bogus = RelStr { off: 100, len: 5 };
        assert_eq!(bogus.get(&pool), "");
    }

    #[test]
    fn handles_survive_clone() {
        let mut pool = TextPool::with_capacity(8);
        let handle = pool.push_str("stable");
        let copy = pool.clone();
        assert_eq!(handle.get(&copy), "stable");
    }
}
