//! DNS answer cache with a uniform expiration.

use rustc_hash::FxHashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{DNSClass, RecordType};

use crate::dns::normalize_name;
use crate::error::CacheKeyError;

/// Identity of a cached answer: normalized name, type and class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    query_type: RecordType,
    query_class: DNSClass,
}

impl CacheKey {
    pub fn new(name: &str, query_type: RecordType, query_class: DNSClass) -> Result<Self, CacheKeyError> {
        let name = normalize_name(name);
        if name.is_empty() {
            return Err(CacheKeyError::EmptyName);
        }

        Ok(Self {
            name,
            query_type,
            query_class,
        })
    }

    /// Build the key for a question section entry.
    pub fn from_query(query: &Query) -> Result<Self, CacheKeyError> {
        Self::new(
            &query.name().to_ascii(),
            query.query_type(),
            query.query_class(),
        )
    }
}

struct CacheEntry {
    answer: Message,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// Time-expiring answer cache.
///
/// Every entry lives for the same `expiration`, regardless of the record
/// TTLs inside the answer. Expired entries are dropped lazily on lookup and
/// by [`DnsCache::purge_expired`].
pub struct DnsCache {
    entries: RwLock<FxHashMap<CacheKey, CacheEntry>>,
    expiration: Duration,
}

impl DnsCache {
    pub fn new(expiration: Duration) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            expiration,
        }
    }

    /// Look up a live answer.
    pub fn get(&self, key: &CacheKey) -> Option<Message> {
        self.get_at(key, Instant::now())
    }

    /// Look up an answer that is still live at `now`.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<Message> {
        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.answer.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // A writer may have replaced the entry between the two locks.
        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        None
    }

    /// Store an answer, replacing any previous entry for the key.
    pub fn set(&self, key: CacheKey, answer: Message) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        entries.insert(
            key,
            CacheEntry {
                answer,
                stored_at: Instant::now(),
                ttl: self.expiration,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }
}
