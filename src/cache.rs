//! TTL-bounded answer cache with single-flight upstream coordination.
//!
//! The backing store is any key-value store able to do `GET` and `SETEX`
//! (an in-process map, or a shared Redis). Cached values are the DoH-JSON
//! serialization of the response message.

use crate::json::MessageJson;
use crate::Error;
use crate::Message;
use crate::Type;
use async_trait::async_trait;
use log::warn;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Namespace prefix for every cache key.
const KEY_PREFIX: &str = "dnsdigd-cache";

/// Upper bound on how long an answer may be cached, regardless of its TTL.
pub const DEFAULT_TTL_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// The `GET`/`SETEX` contract the answer cache needs from its backing store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;
}

/// In-process [`KvStore`], expiring entries lazily on read.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }
}

/// A [`KvStore`] backed by a shared Redis.
pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connects to the Redis at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn new(url: &str) -> Result<RedisStore, Error> {
        let client = redis::Client::open(url).map_err(|e| Error::Cache(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;

        Ok(RedisStore { manager })
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| Error::Cache(e.to_string()))
    }

    async fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl.as_secs())
            .await
            .map_err(|e| Error::Cache(e.to_string()))
    }
}

/// Caches upstream responses for the TTL of their first answer rrset.
///
/// Concurrent misses for the same key are coalesced: [`AnswerCache::lock_key`]
/// hands out a per-key async mutex, so at most one upstream fetch per key is
/// in flight while everyone else waits and then re-checks the cache.
pub struct AnswerCache {
    store: Arc<dyn KvStore>,
    ttl_ceiling: Duration,

    inflight: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl AnswerCache {
    pub fn new(store: Arc<dyn KvStore>, ttl_ceiling: Duration) -> AnswerCache {
        AnswerCache {
            store,
            ttl_ceiling,
            inflight: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Derives the cache key for a question. The qname keeps its trailing
    /// dot, and the type is the numeric RR type.
    pub fn key(qname: &str, r#type: Type) -> String {
        format!("{}#{}#{}", KEY_PREFIX, qname, r#type as u16)
    }

    /// Returns the cached response for `key`, if present and fresh.
    ///
    /// A failing or corrupted store degrades to a cache miss.
    pub async fn get(&self, key: &str) -> Option<Message> {
        let value = match self.store.get(key).await {
            Ok(value) => value?,
            Err(e) => {
                warn!("Cache read for {} failed: {}", key, e);
                return None;
            }
        };

        let json = match serde_json::from_str::<MessageJson>(&value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Discarding unparseable cache entry {}: {}", key, e);
                return None;
            }
        };

        match Message::from_doh_json(json, true) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Discarding unparseable cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Stores `response` under `key` for the TTL of its first answer rrset,
    /// capped by the configured ceiling.
    ///
    /// Responses with no answers (or a zero TTL) are not cached. A failing
    /// store is logged and ignored, the response has already been served.
    pub async fn put(&self, key: &str, response: &Message) {
        let first = match response.answers.first() {
            Some(first) => first,
            None => return,
        };

        let ttl = Duration::from_secs(first.ttl.into()).min(self.ttl_ceiling);
        if ttl.is_zero() {
            return;
        }

        let value = match serde_json::to_string(&response.to_doh_json()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize response for {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = self.store.setex(key, &value, ttl).await {
            warn!("Cache write for {} failed: {}", key, e);
        }
    }

    /// Acquires the single-flight lock for `key`.
    ///
    /// The caller re-checks the cache once the lock is held; whoever held it
    /// before may have fetched and stored the same answer already.
    pub async fn lock_key(&self, key: &str) -> KeyGuard {
        let entry = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = entry.lock_owned().await;

        KeyGuard {
            key: key.to_string(),
            inflight: Arc::clone(&self.inflight),
            _guard: guard,
        }
    }
}

/// Holds the single-flight lock for one key until dropped.
pub struct KeyGuard {
    key: String,
    inflight: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");

        // The map holds one Arc and our guard holds another. Anything above
        // that means other tasks are waiting, so the entry stays.
        if let Some(entry) = inflight.get(&self.key) {
            if Arc::strong_count(entry) <= 2 {
                inflight.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cached_response(ip: &str, ttl: u32) -> Message {
        let mut m = Message::default();
        m.add_question("example.com", Type::A, Class::Internet);
        m.qr = QR::Response;
        m.answers.push(Record {
            name: "example.com.".to_string(),
            class: Class::Internet,
            ttl,
            resource: Resource::A(ip.parse().unwrap()),
        });
        m
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(
            AnswerCache::key("example.com.", Type::A),
            "dnsdigd-cache#example.com.#1"
        );
        assert_eq!(
            AnswerCache::key("example.com.", Type::AAAA),
            "dnsdigd-cache#example.com.#28"
        );
    }

    #[tokio::test]
    async fn test_memory_store_expires() {
        let store = MemoryStore::default();

        store
            .setex("k", "v", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_trips_response() {
        let cache = AnswerCache::new(Arc::new(MemoryStore::default()), DEFAULT_TTL_CEILING);
        let key = AnswerCache::key("example.com.", Type::A);

        let response = cached_response("192.0.2.1", 60);
        cache.put(&key, &response).await;

        let got = cache.get(&key).await.expect("expected a cache hit");
        assert_eq!(got.answers, response.answers);
        assert_eq!(got.rcode, response.rcode);
    }

    #[tokio::test]
    async fn test_empty_answers_are_not_cached() {
        let cache = AnswerCache::new(Arc::new(MemoryStore::default()), DEFAULT_TTL_CEILING);
        let key = AnswerCache::key("example.com.", Type::A);

        let mut response = cached_response("192.0.2.1", 60);
        response.answers.clear();

        cache.put(&key, &response).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_fetches() {
        let cache = Arc::new(AnswerCache::new(
            Arc::new(MemoryStore::default()),
            DEFAULT_TTL_CEILING,
        ));
        let fetches = Arc::new(AtomicUsize::new(0));
        let key = AnswerCache::key("example.com.", Type::A);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            let key = key.clone();

            tasks.push(tokio::spawn(async move {
                if let Some(m) = cache.get(&key).await {
                    return m;
                }

                let _guard = cache.lock_key(&key).await;
                if let Some(m) = cache.get(&key).await {
                    return m;
                }

                // The "upstream fetch".
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                let response = cached_response("192.0.2.1", 60);

                cache.put(&key, &response).await;
                response
            }));
        }

        for task in tasks {
            let m = task.await.unwrap();
            assert_eq!(m.answers.len(), 1);
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
