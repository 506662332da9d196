use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::KvStore;
use crate::errors::SyncError;

const KEY_PREFIX: &str = "recruit_sync:";

/// Redis-backed store. `SET` replaces a value atomically, which is all the
/// queue needs for its single-write rewrite.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        info!("Redis connection established");
        Ok(Self { conn })
    }
}

fn namespaced(key: &str) -> String {
    format!("{KEY_PREFIX}{key}")
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(namespaced(key)).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), SyncError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(namespaced(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(namespaced(key)).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", namespaced(prefix));
        let mut keys: Vec<String> = conn
            .keys::<_, Vec<String>>(pattern)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(namespaced("offline_queue"), "recruit_sync:offline_queue");
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisStore::connect("not a redis url").await;
        assert!(matches!(result, Err(SyncError::Storage(_))));
    }
}
