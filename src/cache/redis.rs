//! Redis-backed cache store (feature `redis`).

use super::backend::CacheBackend;
use super::entry::{now_millis, CacheEntry};
use crate::{Error, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

const BACKEND: &str = "redis";

const FIELD_ENTRY: &str = "entry";
const FIELD_HITS: &str = "hits";
const FIELD_ACCESSED: &str = "accessed";

/// Returns the entry as observed, then records the hit in the same server-side
/// step so concurrent readers never lose an increment.
const RECORD_HIT_LUA: &str = r"
local v = redis.call('HMGET', KEYS[1], 'entry', 'hits', 'accessed')
if not v[1] then
  return false
end
redis.call('HINCRBY', KEYS[1], 'hits', 1)
redis.call('HSET', KEYS[1], 'accessed', ARGV[1])
return v
";

type RawEntry = (String, Option<u64>, Option<u64>);

#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Key prefix for all cache entries. Defaults to `"ai-cache:"`.
    pub prefix: String,
    /// `COUNT` hint for `SCAN` when walking the prefix.
    pub scan_batch: usize,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            prefix: "ai-cache:".to_string(),
            scan_batch: 100,
        }
    }
}

/// Each entry is a hash under `{prefix}{key}` that expires in Redis at the
/// entry's own `expires_at`.
///
/// - `entry`: the JSON-encoded [`CacheEntry`]
/// - `hits`, `accessed`: access counters, bumped in place by `HINCRBY`/`HSET`
///
/// Counters override the values inside the JSON when an entry is read back.
pub struct RedisCache {
    client: redis::Client,
    config: RedisCacheConfig,
    record_hit: redis::Script,
}

impl RedisCache {
    pub fn new(client: redis::Client, config: RedisCacheConfig) -> Self {
        Self {
            client,
            config,
            record_hit: redis::Script::new(RECORD_HIT_LUA),
        }
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Self::from_url_with_config(url, RedisCacheConfig::default())
    }

    pub fn from_url_with_config(url: &str, config: RedisCacheConfig) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::backend(BACKEND, format!("invalid Redis URL: {e}")))?;
        Ok(Self::new(client, config))
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.prefix)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::backend(BACKEND, format!("connection error: {e}")))
    }

    async fn scan_keys(&self, con: &mut redis::aio::MultiplexedConnection) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.config.prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.config.scan_batch)
                .query_async(con)
                .await
                .map_err(|e| Error::backend(BACKEND, format!("SCAN error: {e}")))?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn load_entries(
        &self,
        con: &mut redis::aio::MultiplexedConnection,
    ) -> Result<Vec<(String, CacheEntry)>> {
        let keys = self.scan_keys(con).await?;
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            if let Some(entry) = read_entry(con, &k).await? {
                out.push((k, entry));
            }
        }
        Ok(out)
    }

    async fn write_entry(
        &self,
        con: &mut redis::aio::MultiplexedConnection,
        entry: &CacheEntry,
    ) -> Result<()> {
        let ttl = entry.remaining_ttl_secs();
        if ttl == 0 {
            return Ok(());
        }
        let raw = serde_json::to_string(entry)?;
        let redis_key = self.redis_key(&entry.key);
        let _: () = redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(&redis_key)
            .ignore()
            .cmd("HSET")
            .arg(&redis_key)
            .arg(FIELD_ENTRY)
            .arg(raw)
            .arg(FIELD_HITS)
            .arg(entry.hit_count)
            .arg(FIELD_ACCESSED)
            .arg(entry.last_accessed_at)
            .ignore()
            .cmd("EXPIRE")
            .arg(&redis_key)
            .arg(ttl)
            .ignore()
            .query_async(con)
            .await
            .map_err(|e| Error::backend(BACKEND, format!("HSET error: {e}")))?;
        Ok(())
    }
}

async fn read_entry(
    con: &mut redis::aio::MultiplexedConnection,
    redis_key: &str,
) -> Result<Option<CacheEntry>> {
    let (raw, hits, accessed): (Option<String>, Option<u64>, Option<u64>) = redis::cmd("HMGET")
        .arg(redis_key)
        .arg(FIELD_ENTRY)
        .arg(FIELD_HITS)
        .arg(FIELD_ACCESSED)
        .query_async(con)
        .await
        .map_err(|e| Error::backend(BACKEND, format!("HMGET error: {e}")))?;
    match raw {
        Some(json) => Ok(Some(decode_entry((json, hits, accessed))?)),
        None => Ok(None),
    }
}

fn decode_entry((json, hits, accessed): RawEntry) -> Result<CacheEntry> {
    let mut entry: CacheEntry = serde_json::from_str(&json)?;
    if let Some(hits) = hits {
        entry.hit_count = hits;
    }
    if let Some(accessed) = accessed {
        entry.last_accessed_at = accessed;
    }
    Ok(entry)
}

async fn delete_keys(con: &mut redis::aio::MultiplexedConnection, keys: &[String]) -> Result<usize> {
    if keys.is_empty() {
        return Ok(0);
    }
    con.del::<_, usize>(keys)
        .await
        .map_err(|e| Error::backend(BACKEND, format!("DEL error: {e}")))
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut con = self.get_connection().await?;
        let redis_key = self.redis_key(key);
        let raw: Option<RawEntry> = self
            .record_hit
            .key(&redis_key)
            .arg(now_millis())
            .invoke_async(&mut con)
            .await
            .map_err(|e| Error::backend(BACKEND, format!("EVALSHA error: {e}")))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry = decode_entry(raw)?;
        if entry.is_expired() {
            delete_keys(&mut con, &[redis_key]).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let mut con = self.get_connection().await?;
        self.write_entry(&mut con, entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut con = self.get_connection().await?;
        Ok(delete_keys(&mut con, &[self.redis_key(key)]).await? > 0)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let mut con = self.get_connection().await?;
        let matched: Vec<String> = self
            .load_entries(&mut con)
            .await?
            .into_iter()
            .filter(|(_, e)| e.query.contains(pattern))
            .map(|(k, _)| k)
            .collect();
        delete_keys(&mut con, &matched).await
    }

    async fn clear(&self) -> Result<usize> {
        let mut con = self.get_connection().await?;
        let keys = self.scan_keys(&mut con).await?;
        delete_keys(&mut con, &keys).await
    }

    async fn list(&self) -> Result<Vec<CacheEntry>> {
        let mut con = self.get_connection().await?;
        let mut live: Vec<CacheEntry> = self
            .load_entries(&mut con)
            .await?
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| !e.is_expired())
            .collect();
        live.sort_by_key(|e| (e.last_accessed_at, e.created_at));
        Ok(live)
    }

    async fn len(&self) -> Result<usize> {
        let mut con = self.get_connection().await?;
        Ok(self.scan_keys(&mut con).await?.len())
    }

    fn name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefixed_keys() {
        let cache = RedisCache::from_url_with_config(
            "redis://127.0.0.1:6379",
            RedisCacheConfig {
                prefix: "ops:".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cache.redis_key("abc"), "ops:abc");
        assert_eq!(cache.name(), "redis");
    }

    #[test]
    fn test_counters_override_encoded_entry() {
        let mut stored = CacheEntry::new("k", "disk usage", "openai", json!("73%"), 0.9, 300);
        stored.hit_count = 1;
        let json = serde_json::to_string(&stored).unwrap();

        let entry = decode_entry((json.clone(), Some(7), Some(42))).unwrap();
        assert_eq!(entry.hit_count, 7);
        assert_eq!(entry.last_accessed_at, 42);

        let untouched = decode_entry((json, None, None)).unwrap();
        assert_eq!(untouched, stored);
    }

    #[test]
    fn test_invalid_url_is_backend_error() {
        let err = RedisCache::from_url("not a url").err().unwrap();
        assert!(matches!(err, Error::Backend { backend: "redis", .. }));
    }
}
