//! Short-lived KV storage for sealed credential envelopes. The store is an
//! external collaborator in production; the in-process implementation here
//! backs single-node deployments and tests. TTL is belt-and-suspenders on
//! top of the worker deleting envelopes after use.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Cache key for one sealed credential: `prefix:fp:project:path:nanos`.
pub fn credential_cache_key(
    prefix: &str,
    tenant_fp: &str,
    project: &str,
    path: &str,
    updated_at_nanos: i64,
) -> String {
    format!("{prefix}:{tenant_fp}:{project}:{path}:{updated_at_nanos}")
}

/// AAD octet string for the same tuple. Deliberately a separate encoding
/// from the cache key: the key routes the lookup, the AAD authenticates
/// it, and the two must keep agreeing field-for-field.
pub fn credential_aad(tenant_fp: &str, project: &str, path: &str, updated_at_nanos: i64) -> String {
    format!("{tenant_fp}|{project}|{path}|{updated_at_nanos}")
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn store(&self, key: &str, payload: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn load(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

struct StoredEnvelope {
    payload: String,
    expires_at: Instant,
}

/// In-process credential store with lazy expiry.
pub struct MemoryCredentialStore {
    entries: scc::HashMap<String, StoredEnvelope>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            entries: scc::HashMap::new(),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn store(&self, key: &str, payload: &str, ttl: Duration) -> anyhow::Result<()> {
        let entry = StoredEnvelope {
            payload: payload.to_owned(),
            expires_at: Instant::now() + ttl,
        };
        // last write wins, matching what a real KV SET does
        let _ = self.entries.remove_async(key).await;
        let _ = self.entries.insert_async(key.to_owned(), entry).await;
        Ok(())
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let hit = self
            .entries
            .read_async(key, |_, v| {
                if v.expires_at > now {
                    Some(v.payload.clone())
                } else {
                    None
                }
            })
            .await
            .flatten();
        if hit.is_none() {
            // either absent or expired; drop the corpse if it is the latter
            let _ = self.entries.remove_async(key).await;
        }
        Ok(hit)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let _ = self.entries.remove_async(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_load_delete_round_trip() {
        let store = MemoryCredentialStore::new();
        store
            .store("k", "sealed", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("sealed"));
        store.delete("k").await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = MemoryCredentialStore::new();
        store
            .store("k", "sealed", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.load("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn rewrites_replace_the_previous_envelope() {
        let store = MemoryCredentialStore::new();
        store
            .store("k", "first", Duration::from_secs(60))
            .await
            .unwrap();
        store
            .store("k", "second", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn key_and_aad_encodings_stay_distinct() {
        let key = credential_cache_key("mcp:files:cred", "fp", "proj", "/a.txt", 42);
        let aad = credential_aad("fp", "proj", "/a.txt", 42);
        assert_eq!(key, "mcp:files:cred:fp:proj:/a.txt:42");
        assert_eq!(aad, "fp|proj|/a.txt|42");
    }
}
