//! # メタデータストア
//!
//! TTL付きの文字列キーバリューストア。FileRecord、PendingMetadata、
//! エラーレコード、customIdの逆引きインデックスを保持する。
//!
//! ## キー空間
//! | プレフィックス | 値 | TTL |
//! |---------------|----|-----|
//! | `file:<key>` | FileRecord (JSON) | 30日 |
//! | `custom-id:<id>` | ファイルキー | 30日 |
//! | `metadata:<key>` | PendingMetadata (JSON) | 1時間 |
//! | `error:<key>` | ErrorRecord (JSON) | 24時間 |

pub mod memory;
pub mod records;
#[cfg(feature = "vendor-redis")]
pub mod redis;

pub use memory::MemoryMetadataStore;
#[cfg(feature = "vendor-redis")]
pub use self::redis::RedisMetadataStore;

use std::time::Duration;

use crate::error::StorageError;

/// メタデータストアの抽象インターフェース。
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// 値を書き込む。`ttl` が `None` なら無期限。既存の値は上書きされる。
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), StorageError>;

    /// 値を取得する。存在しないか期限切れなら `None`。
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// プレフィックスに一致するキーを昇順で返す。
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}
