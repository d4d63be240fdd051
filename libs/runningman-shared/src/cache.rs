//! Process-local TTL cache for catalog listings.
//!
//! Values are lists of `i32` stored as concatenated little-endian 4-byte
//! integers. The cache is a projection of the database and may be dropped
//! at any time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const LIBRARIES_KEY: &str = "libraries";
pub const LIBRARIES_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const VIDEO_LIST_TTL: Duration = Duration::from_secs(60 * 60);
pub const COLLECTION_TTL: Duration = Duration::from_secs(60 * 60);

pub fn video_list_key(year: i32) -> String {
    format!("{}:video_list", year)
}

pub fn collection_key(user_id: i64) -> String {
    format!("{}:video_collection", user_id)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cached payload of {0} bytes is not a multiple of 4")]
pub struct CodecError(pub usize);

pub fn encode_i32s(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_i32s(bytes: &[u8]) -> Result<Vec<i32>, CodecError> {
    if bytes.len() % 4 != 0 {
        return Err(CodecError(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.bytes.clone())
    }

    pub async fn set(&self, key: &str, bytes: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                bytes,
                expires_at: now + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Cached list under `key`, or the result of `load` which is then cached for `ttl`.
    /// A corrupt entry is treated as a miss.
    pub async fn get_or_load<F, Fut>(&self, key: &str, ttl: Duration, load: F) -> anyhow::Result<Vec<i32>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<i32>>>,
    {
        if let Some(bytes) = self.get(key).await {
            match decode_i32s(&bytes) {
                Ok(values) => {
                    debug!("Cache hit for {}", key);
                    return Ok(values);
                }
                Err(e) => {
                    warn!("Dropping corrupt cache entry {}: {}", key, e);
                    self.invalidate(key).await;
                }
            }
        }

        let values = load().await?;
        self.set(key, encode_i32s(&values), ttl).await;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_preserves_order_and_sign() {
        let values = vec![2015, -1, 0, i32::MAX, i32::MIN];
        assert_eq!(decode_i32s(&encode_i32s(&values)).unwrap(), values);
    }

    #[test]
    fn empty_list_encodes_to_empty_payload() {
        assert!(encode_i32s(&[]).is_empty());
        assert_eq!(decode_i32s(&[]).unwrap(), Vec::<i32>::new());
    }

    #[test]
    fn encoding_is_little_endian() {
        assert_eq!(encode_i32s(&[1]), vec![1, 0, 0, 0]);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert_eq!(decode_i32s(&[1, 0, 0]), Err(CodecError(3)));
    }

    #[tokio::test]
    async fn expired_entries_are_misses() {
        let cache = CatalogCache::new();
        cache.set("k", vec![1, 0, 0, 0], Duration::from_millis(0)).await;
        assert!(cache.get("k").await.is_none());

        cache.set("k", vec![1, 0, 0, 0], Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(vec![1, 0, 0, 0]));

        cache.invalidate("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn get_or_load_hits_origin_once() {
        let cache = CatalogCache::new();
        let key = video_list_key(2020);

        let first = cache
            .get_or_load(&key, VIDEO_LIST_TTL, || async { Ok(vec![480, 481]) })
            .await
            .unwrap();
        let second = cache
            .get_or_load(&key, VIDEO_LIST_TTL, || async {
                Err(anyhow::anyhow!("origin should not be queried on a hit"))
            })
            .await
            .unwrap();

        assert_eq!(first, vec![480, 481]);
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn empty_list_is_cached_as_a_hit() {
        let cache = CatalogCache::new();
        let key = collection_key(7);
        cache
            .get_or_load(&key, COLLECTION_TTL, || async { Ok(vec![]) })
            .await
            .unwrap();

        let again = cache
            .get_or_load(&key, COLLECTION_TTL, || async {
                Err(anyhow::anyhow!("origin should not be queried on a hit"))
            })
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn corrupt_entry_falls_back_to_origin() {
        let cache = CatalogCache::new();
        cache.set(LIBRARIES_KEY, vec![1, 2, 3], LIBRARIES_TTL).await;

        let years = cache
            .get_or_load(LIBRARIES_KEY, LIBRARIES_TTL, || async { Ok(vec![2015, 2018]) })
            .await
            .unwrap();
        assert_eq!(years, vec![2015, 2018]);
    }

    #[test]
    fn key_formats() {
        assert_eq!(video_list_key(2018), "2018:video_list");
        assert_eq!(collection_key(42), "42:video_collection");
    }
}
