//! # Redis MetadataStore 実装
//!
//! `deadpool-redis` のコネクションプールを使う。TTL付きの値は `SET EX`、
//! 一覧は `SCAN MATCH <prefix>*` で取得する。全キーに名前空間プレフィックスを付ける。

use std::time::Duration;

use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use super::MetadataStore;
use crate::error::StorageError;

/// Redis によるMetadataStore実装。
pub struct RedisMetadataStore {
    pool: Pool,
    namespace: String,
}

impl RedisMetadataStore {
    pub fn new(url: &str, namespace: &str) -> Result<Self, StorageError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::Backend(format!("Redisプールの作成に失敗: {e}")))?;
        Ok(Self {
            pool,
            namespace: namespace.to_string(),
        })
    }

    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let namespace =
            std::env::var("REDIS_NAMESPACE").unwrap_or_else(|_| "fukusu".to_string());
        tracing::info!(namespace = %namespace, "Redisメタデータストアを使用");
        Ok(Self::new(&url, &namespace)?)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, StorageError> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::Backend(format!("Redis接続の取得に失敗: {e}")))
    }
}

/// SCANのMATCHパターンで特別な意味を持つ文字をエスケープする。
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn backend(e: redis::RedisError) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait::async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(&full_key, value, ttl.as_secs().max(1))
                .await
                .map_err(backend),
            None => conn.set::<_, _, ()>(&full_key, value).await.map_err(backend),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn().await?;
        conn.get(self.full_key(key)).await.map_err(backend)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.full_key(key)).await.map_err(backend)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let strip = format!("{}:", self.namespace);

        let mut conn = self.conn().await?;
        let mut results = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;

            results.extend(
                keys.into_iter()
                    .filter_map(|k| k.strip_prefix(&strip).map(str::to_string)),
            );

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        // SCANは重複を返しうる
        results.sort();
        results.dedup();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MATCHパターン用のエスケープを確認
    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("fukusu:file:"), "fukusu:file:");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    /// プール作成時点では接続しないため、到達不能なURLでも構築できることを確認
    #[test]
    fn test_new_is_lazy() {
        let store = RedisMetadataStore::new("redis://127.0.0.1:1", "test").unwrap();
        assert_eq!(store.full_key("file:k"), "test:file:k");
    }
}
