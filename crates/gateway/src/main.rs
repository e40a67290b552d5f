//! # Fukusu Ingest Gateway
//!
//! UploadThing互換のアップロード受付サーバー。
//!
//! ## 役割
//! - 署名付きURLによるアップロード受付（レジューム対応）
//! - 保存済みファイルの配信（Range対応）
//! - オリジンサーバーへの署名付きWebhook送信、開発モードのNDJSONストリーム
//! - APIキーで保護された管理API（v6 / v7）
//!
//! ## バックエンド
//! - `STORAGE_BACKEND`: `memory`（既定）| `s3`
//! - `METADATA_BACKEND`: `memory`（既定）| `redis`

mod auth;
mod callback;
mod config;
mod dev_stream;
mod endpoints;
mod error;
mod metadata;
mod storage;
mod tasks;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{GatewayState, IngestConfig};
use crate::metadata::{MemoryMetadataStore, MetadataStore};
use crate::storage::{BlobStore, MemoryBlobStore};
use crate::tasks::TaskSupervisor;

fn blob_store_from_env() -> anyhow::Result<Box<dyn BlobStore>> {
    let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());
    match backend.as_str() {
        "memory" => {
            tracing::warn!("メモリ上のBlobStoreを使用します（再起動で消えます）");
            Ok(Box::new(MemoryBlobStore::new()))
        }
        #[cfg(feature = "vendor-aws")]
        "s3" => Ok(Box::new(storage::S3BlobStore::from_env()?)),
        other => anyhow::bail!("未対応のSTORAGE_BACKENDです: {other}"),
    }
}

fn metadata_store_from_env() -> anyhow::Result<Box<dyn MetadataStore>> {
    let backend = std::env::var("METADATA_BACKEND").unwrap_or_else(|_| "memory".to_string());
    match backend.as_str() {
        "memory" => {
            tracing::warn!("メモリ上のMetadataStoreを使用します（再起動で消えます）");
            Ok(Box::new(MemoryMetadataStore::new()))
        }
        #[cfg(feature = "vendor-redis")]
        "redis" => Ok(Box::new(metadata::RedisMetadataStore::from_env()?)),
        other => anyhow::bail!("未対応のMETADATA_BACKENDです: {other}"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "シグナル待機に失敗");
    }
    tracing::info!("シャットダウンを開始します");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = IngestConfig::from_env()?;
    let bind_addr = config.bind_addr.clone();
    tracing::info!(
        api_base_url = %config.api_base_url,
        public_url = %config.public_url,
        "設定を読み込みました"
    );

    let tasks = TaskSupervisor::new();
    let state = Arc::new(GatewayState {
        config,
        http_client: reqwest::Client::new(),
        blob_store: blob_store_from_env()?,
        metadata_store: metadata_store_from_env()?,
        tasks: tasks.clone(),
    });

    let app = endpoints::router(state);

    tracing::info!("Gatewayを {} で起動します", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tasks.shutdown().await;
    tracing::info!("Gatewayを停止しました");
    Ok(())
}
