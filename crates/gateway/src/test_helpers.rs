//! テスト用の設定・共有状態。

use std::sync::Arc;
use std::time::Duration;

use crate::config::{GatewayState, IngestConfig};
use crate::metadata::MemoryMetadataStore;
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::tasks::TaskSupervisor;

pub const TEST_SECRET: &str = "sk_test_secret";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// ポーリング間隔を短くしたテスト用設定
pub fn test_config() -> IngestConfig {
    IngestConfig {
        secret: TEST_SECRET.to_string(),
        webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        api_base_url: "http://localhost:8787".to_string(),
        public_url: "http://files.localhost".to_string(),
        ufs_host_suffix: "ufs.sh".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        presign_expiry_secs: 3600,
        dev_poll_interval: Duration::from_millis(20),
        dev_poll_deadline: Duration::from_secs(5),
        callback_timeout: Duration::from_secs(5),
    }
}

pub fn test_state() -> Arc<GatewayState> {
    test_state_with_config(test_config())
}

pub fn test_state_with_config(config: IngestConfig) -> Arc<GatewayState> {
    test_state_with_blob_store(config, MemoryBlobStore::new())
}

pub fn test_state_with_blob_store(
    config: IngestConfig,
    blob_store: impl BlobStore + 'static,
) -> Arc<GatewayState> {
    Arc::new(GatewayState {
        config,
        http_client: reqwest::Client::new(),
        blob_store: Box::new(blob_store),
        metadata_store: Box::new(MemoryMetadataStore::new()),
        tasks: TaskSupervisor::new(),
    })
}
