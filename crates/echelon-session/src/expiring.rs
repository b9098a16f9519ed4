//! A set whose members fall out on their own after a time-to-live.
//!
//! There is no timer behind it. Every read first scans the whole set and
//! drops what has expired, which is cheap at the sizes this is used for
//! (tens to hundreds of entries) and keeps the type free of background
//! tasks. It is not synchronized; an owner that shares it across tasks
//! wraps it in its own lock.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Membership with per-entry expiry.
///
/// An entry added with `ttl` at time `t` is a member up to and including
/// `t + ttl`, and gone as soon as a read happens after that.
#[derive(Debug, Clone)]
pub struct ExpiringSet<T> {
    /// Entry → instant after which it no longer counts.
    entries: HashMap<T, Instant>,
}

impl<T: Eq + Hash> ExpiringSet<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts `item`, or restarts its clock if it is already present.
    pub fn add(&mut self, item: T, ttl: Duration) {
        self.entries.insert(item, Instant::now() + ttl);
    }

    /// Purges expired entries, then reports whether `item` is a member.
    pub fn contains<Q>(&mut self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.purge();
        self.entries.contains_key(item)
    }

    /// Removes `item`. Returns `true` if it was a (live) member.
    pub fn remove<Q>(&mut self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.purge();
        self.entries.remove(item).is_some()
    }

    /// Number of live members.
    pub fn len(&mut self) -> usize {
        self.purge();
        self.entries.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn purge(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, deadline| *deadline >= now);
    }
}

impl<T: Eq + Hash> Default for ExpiringSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_contains_after_add_returns_true() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), TTL);

        assert!(set.contains("alice"));
        assert!(!set.contains("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contains_lives_through_full_ttl() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), TTL);

        tokio::time::advance(TTL).await;

        assert!(set.contains("alice"), "still a member at exactly ttl");
    }

    #[tokio::test(start_paused = true)]
    async fn test_contains_after_ttl_returns_false() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), TTL);

        tokio::time::advance(TTL + Duration::from_millis(1)).await;

        assert!(!set.contains("alice"));
        assert!(set.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_existing_refreshes_instead_of_duplicating() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), TTL);
        tokio::time::advance(Duration::from_secs(50)).await;

        set.add("alice".to_string(), TTL);
        tokio::time::advance(Duration::from_secs(50)).await;

        assert!(set.contains("alice"), "second add restarted the clock");
        assert_eq!(set.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_drops_every_expired_entry() {
        let mut set = ExpiringSet::new();
        set.add(1u32, Duration::from_secs(10));
        set.add(2u32, Duration::from_secs(10));
        set.add(3u32, Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(set.contains(&3));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_reports_membership() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), TTL);

        assert!(set.remove("alice"));
        assert!(!set.remove("alice"));
        assert!(!set.contains("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_expired_entry_returns_false() {
        let mut set = ExpiringSet::new();
        set.add("alice".to_string(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(!set.remove("alice"));
    }
}
