//! Tag index.
//!
//! Inverted index from tag to the cache keys carrying it, plus the reverse
//! mapping so a key's tags can be diffed and detached. The index is derived
//! data: it is always reconstructable from the entries' declared tags.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::keys::{CacheKey, Tag};

/// Tracks tag → keys and key → tags mappings.
///
/// Owned by the cache store and only touched under the store lock.
#[derive(Debug, Default)]
pub struct TagIndex {
    tag_to_keys: HashMap<Tag, HashSet<CacheKey>>,
    key_to_tags: HashMap<CacheKey, BTreeSet<Tag>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the full tag set of `key`.
    ///
    /// Diff-based: the key is added to tags it newly carries and removed from
    /// tags it no longer carries. Tags left without keys are dropped.
    pub fn attach(&mut self, key: &CacheKey, tags: &BTreeSet<Tag>) {
        let previous = self.key_to_tags.remove(key).unwrap_or_default();

        for stale in previous.difference(tags) {
            self.remove_from_tag(stale, key);
        }
        for added in tags.difference(&previous) {
            self.tag_to_keys
                .entry(added.clone())
                .or_default()
                .insert(key.clone());
        }

        if !tags.is_empty() {
            self.key_to_tags.insert(key.clone(), tags.clone());
        }
    }

    /// All keys currently carrying `tag`.
    pub fn keys_for(&self, tag: &Tag) -> HashSet<CacheKey> {
        self.tag_to_keys.get(tag).cloned().unwrap_or_default()
    }

    /// Tags currently declared by `key`.
    pub fn tags_for(&self, key: &CacheKey) -> BTreeSet<Tag> {
        self.key_to_tags.get(key).cloned().unwrap_or_default()
    }

    /// Remove a key and every tag reference to it.
    pub fn detach(&mut self, key: &CacheKey) {
        if let Some(tags) = self.key_to_tags.remove(key) {
            for tag in tags {
                self.remove_from_tag(&tag, key);
            }
        }
    }

    pub fn clear(&mut self) {
        self.tag_to_keys.clear();
        self.key_to_tags.clear();
    }

    /// Number of tags with at least one key.
    pub fn tag_count(&self) -> usize {
        self.tag_to_keys.len()
    }

    /// Number of keys carrying at least one tag.
    pub fn key_count(&self) -> usize {
        self.key_to_tags.len()
    }

    /// Rebuild an index from scratch out of `(key, tags)` pairs.
    pub fn rebuild<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a CacheKey, &'a BTreeSet<Tag>)>,
    {
        let mut index = Self::new();
        for (key, tags) in entries {
            index.attach(key, tags);
        }
        index
    }

    fn remove_from_tag(&mut self, tag: &Tag, key: &CacheKey) {
        if let Some(keys) = self.tag_to_keys.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                self.tag_to_keys.remove(tag);
            }
        }
    }
}

impl PartialEq for TagIndex {
    fn eq(&self, other: &Self) -> bool {
        self.tag_to_keys == other.tag_to_keys && self.key_to_tags == other.key_to_tags
    }
}
