use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Stable handle of a feed entry, assigned once at insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry<T> {
    pub id: EntryId,
    #[serde(flatten)]
    pub item: T,
}

/// Newest-first sequence with a hard capacity.
///
/// Entries live behind an `Arc`; a clone of the feed is a snapshot that later
/// pushes never touch, because mutation goes through `Arc::make_mut`.
#[derive(Debug, Clone)]
pub struct Feed<T> {
    capacity: usize,
    entries: Arc<VecDeque<FeedEntry<T>>>,
}

impl<T> Feed<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Arc::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first.
    pub fn iter(&self) -> impl Iterator<Item = &FeedEntry<T>> {
        self.entries.iter()
    }

    pub fn head(&self) -> Option<&FeedEntry<T>> {
        self.entries.front()
    }

    pub fn tail(&self) -> Option<&FeedEntry<T>> {
        self.entries.back()
    }

    pub fn get(&self, index: usize) -> Option<&FeedEntry<T>> {
        self.entries.get(index)
    }

    pub fn clear(&mut self) {
        self.entries = Arc::new(VecDeque::new());
    }
}

impl<T: Clone> Feed<T> {
    /// Inserts at the head and evicts from the tail past capacity.
    pub fn push(&mut self, id: EntryId, item: T) {
        let entries = Arc::make_mut(&mut self.entries);
        entries.push_front(FeedEntry { id, item });
        entries.truncate(self.capacity);
    }

    pub fn remove(&mut self, id: EntryId) -> Option<T> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        Arc::make_mut(&mut self.entries)
            .remove(position)
            .map(|entry| entry.item)
    }
}

impl<T> Serialize for Feed<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.entries.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(count: u64, capacity: usize) -> Feed<String> {
        let mut feed = Feed::with_capacity(capacity);
        for n in 1..=count {
            feed.push(EntryId(n), format!("#{n}"));
        }
        feed
    }

    #[test]
    fn keeps_most_recent_entries_head_first() {
        let feed = filled(105, 100);
        assert_eq!(feed.len(), 100);
        assert_eq!(feed.head().map(|entry| entry.item.as_str()), Some("#105"));
        assert_eq!(feed.tail().map(|entry| entry.item.as_str()), Some("#6"));

        let ids: Vec<u64> = feed.iter().map(|entry| entry.id.0).collect();
        let expected: Vec<u64> = (6..=105).rev().collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let mut feed = Feed::with_capacity(3);
        for n in 0..10 {
            feed.push(EntryId(n), n);
            assert!(feed.len() <= 3);
        }
        assert_eq!(feed.iter().map(|entry| entry.item).collect::<Vec<_>>(), vec![9, 8, 7]);
    }

    #[test]
    fn snapshots_are_not_affected_by_later_writes() {
        let mut feed = filled(2, 10);
        let snapshot = feed.clone();
        feed.push(EntryId(3), "#3".to_string());
        feed.remove(EntryId(1));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.head().map(|entry| entry.id), Some(EntryId(2)));
        assert_eq!(feed.len(), 2);

        feed.clear();
        assert!(feed.is_empty());
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn remove_by_id_survives_concurrent_inserts() {
        let mut feed = filled(3, 10);
        let target = feed.get(1).map(|entry| entry.id).expect("entry at index 1");
        feed.push(EntryId(4), "#4".to_string());

        assert_eq!(feed.remove(target), Some("#2".to_string()));
        assert_eq!(feed.remove(target), None);
        let remaining: Vec<&str> = feed.iter().map(|entry| entry.item.as_str()).collect();
        assert_eq!(remaining, vec!["#4", "#3", "#1"]);
    }

    #[test]
    fn serializes_entries_with_ids() {
        let mut feed = Feed::with_capacity(5);
        feed.push(EntryId(1), serde_json::json!({"message": "#1"}));
        let raw = serde_json::to_value(&feed).expect("serialize");
        assert_eq!(raw, serde_json::json!([{"id": 1, "message": "#1"}]));
    }
}
