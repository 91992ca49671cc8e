//! Tags and the tag index (§3 `Tag`/`TagIndexEntry`, §4.10 "Tag index").

use alloc::vec::Vec;

use crate::config::{TAG_INDEX_CAPACITY, TAG_KEY_LEN, TAG_VALUE_LEN};

/// A `(key, value)` pair identifying files by attribute rather than path
/// (§GLOSSARY "Tag"). Stored NUL-padded to a fixed width so it stays
/// `Copy` and disk-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    key: [u8; TAG_KEY_LEN],
    value: [u8; TAG_VALUE_LEN],
}

fn pack(buf: &mut [u8], s: &str) {
    let n = s.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
    buf[n] = 0;
}

fn unpack(buf: &[u8]) -> &str {
    let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..nul]).unwrap_or("")
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        let mut t = Self { key: [0; TAG_KEY_LEN], value: [0; TAG_VALUE_LEN] };
        pack(&mut t.key, key);
        pack(&mut t.value, value);
        t
    }

    pub fn key(&self) -> &str {
        unpack(&self.key)
    }

    pub fn value(&self) -> &str {
        unpack(&self.value)
    }

    /// Fixed-width on-disk form used by `tagfs::sync` (§6).
    pub fn to_bytes(&self) -> [u8; TAG_KEY_LEN + TAG_VALUE_LEN] {
        let mut out = [0u8; TAG_KEY_LEN + TAG_VALUE_LEN];
        out[..TAG_KEY_LEN].copy_from_slice(&self.key);
        out[TAG_KEY_LEN..].copy_from_slice(&self.value);
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut key = [0u8; TAG_KEY_LEN];
        let mut value = [0u8; TAG_VALUE_LEN];
        key.copy_from_slice(&buf[..TAG_KEY_LEN]);
        value.copy_from_slice(&buf[TAG_KEY_LEN..TAG_KEY_LEN + TAG_VALUE_LEN]);
        Self { key, value }
    }
}

/// One `(tag → inodes)` mapping (§3). `inode_ids`/`capacity` double on
/// overflow rather than being a plain growable `Vec`, matching the spec's
/// explicit "doubling the inode list's capacity on overflow" — tracked here
/// as a capacity hint even though `Vec` itself reallocates transparently,
/// so the growth policy described in §4.10 is visible in the type rather
/// than hidden inside `Vec`'s own amortized-growth strategy.
pub struct TagIndexEntry {
    pub tag: Tag,
    pub inode_ids: Vec<u64>,
    pub capacity: usize,
}

impl TagIndexEntry {
    fn new(tag: Tag) -> Self {
        Self { tag, inode_ids: Vec::with_capacity(4), capacity: 4 }
    }

    fn append(&mut self, inode_id: u64) {
        if self.inode_ids.len() == self.capacity {
            self.capacity *= 2;
            self.inode_ids.reserve(self.capacity - self.inode_ids.len());
        }
        self.inode_ids.push(inode_id);
    }

    pub fn file_count(&self) -> usize {
        self.inode_ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagIndexError {
    Full,
}

/// A flat vector of [`TagIndexEntry`], capped at [`TAG_INDEX_CAPACITY`]
/// distinct tags (§3: "capped at a configured size").
pub struct TagIndex {
    entries: Vec<TagIndexEntry>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn find_mut(&mut self, tag: &Tag) -> Option<&mut TagIndexEntry> {
        self.entries.iter_mut().find(|e| e.tag == *tag)
    }

    /// Adds `inode_id` under `tag`, creating the entry if absent
    /// (§4.10: "create a new index entry if none; append the inode id").
    pub fn add(&mut self, tag: Tag, inode_id: u64) -> Result<(), TagIndexError> {
        if self.find_mut(&tag).is_some() {
            self.find_mut(&tag).unwrap().append(inode_id);
            return Ok(());
        }
        if self.entries.len() >= TAG_INDEX_CAPACITY {
            return Err(TagIndexError::Full);
        }
        let mut entry = TagIndexEntry::new(tag);
        entry.append(inode_id);
        self.entries.push(entry);
        Ok(())
    }

    /// Removes `inode_id` from `tag`'s entry, if present. Leaves an
    /// emptied entry in place rather than compacting the vector — a later
    /// `add` for the same tag reuses it.
    pub fn remove(&mut self, tag: &Tag, inode_id: u64) {
        if let Some(entry) = self.find_mut(tag) {
            entry.inode_ids.retain(|&id| id != inode_id);
        }
    }

    /// Removes every occurrence of `inode_id` across all tags (file erase).
    pub fn remove_inode_everywhere(&mut self, inode_id: u64) {
        for entry in self.entries.iter_mut() {
            entry.inode_ids.retain(|&id| id != inode_id);
        }
    }

    pub fn query_single(&self, tag: &Tag) -> Vec<u64> {
        self.entries.iter().find(|e| e.tag == *tag).map(|e| e.inode_ids.clone()).unwrap_or_default()
    }

    /// §4.10 query kinds. `Not` is reserved and currently falls through to
    /// an empty result, matching the spec verbatim ("subtractive — reserved;
    /// current implementation falls through").
    pub fn query_and(&self, tags: &[Tag]) -> Vec<u64> {
        let Some((first, rest)) = tags.split_first() else {
            return Vec::new();
        };
        let mut candidates = self.query_single(first);
        for tag in rest {
            let members = self.query_single(tag);
            candidates.retain(|id| members.contains(id));
        }
        candidates
    }

    pub fn query_or(&self, tags: &[Tag]) -> Vec<u64> {
        let mut seen = Vec::new();
        for tag in tags {
            for id in self.query_single(tag) {
                if !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    pub fn query_not(&self, _tags: &[Tag]) -> Vec<u64> {
        Vec::new()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for TagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_key_and_value() {
        let t = Tag::new("kind", "photo");
        assert_eq!(t.key(), "kind");
        assert_eq!(t.value(), "photo");
    }

    #[test]
    fn add_then_query_single_returns_inode() {
        let mut index = TagIndex::new();
        let tag = Tag::new("kind", "photo");
        index.add(tag, 1).unwrap();
        index.add(tag, 2).unwrap();
        assert_eq!(index.query_single(&tag), alloc::vec![1, 2]);
    }

    #[test]
    fn remove_drops_inode_but_keeps_entry() {
        let mut index = TagIndex::new();
        let tag = Tag::new("kind", "photo");
        index.add(tag, 1).unwrap();
        index.remove(&tag, 1);
        assert!(index.query_single(&tag).is_empty());
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn query_and_intersects_across_tags() {
        let mut index = TagIndex::new();
        let kind = Tag::new("kind", "photo");
        let year = Tag::new("year", "2024");
        index.add(kind, 1).unwrap();
        index.add(kind, 2).unwrap();
        index.add(year, 2).unwrap();
        index.add(year, 3).unwrap();
        assert_eq!(index.query_and(&[kind, year]), alloc::vec![2]);
    }

    #[test]
    fn query_or_unions_without_duplicates() {
        let mut index = TagIndex::new();
        let a = Tag::new("a", "1");
        let b = Tag::new("b", "1");
        index.add(a, 1).unwrap();
        index.add(b, 1).unwrap();
        index.add(b, 2).unwrap();
        let mut result = index.query_or(&[a, b]);
        result.sort_unstable();
        assert_eq!(result, alloc::vec![1, 2]);
    }

    #[test]
    fn tag_survives_a_byte_round_trip() {
        let tag = Tag::new("kind", "photo");
        let restored = Tag::from_bytes(&tag.to_bytes());
        assert_eq!(restored, tag);
    }

    #[test]
    fn query_not_falls_through_to_empty() {
        let index = TagIndex::new();
        assert!(index.query_not(&[Tag::new("a", "1")]).is_empty());
    }
}
