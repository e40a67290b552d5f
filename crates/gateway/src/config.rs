//! # Gateway設定・共有状態
//!
//! 環境変数からの設定読み込みとGatewayの共有状態の定義。
//! 設定は起動時に一度だけ読み込まれ、以降は [`GatewayState`] 経由で参照する。

use std::str::FromStr;
use std::time::Duration;

use crate::metadata::MetadataStore;
use crate::storage::BlobStore;
use crate::tasks::TaskSupervisor;

/// `API_BASE_URL` 未設定時のベースURL
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8787";

/// Gatewayの設定。
///
/// シークレットを含むため `Debug` は実装しない。
#[derive(Clone)]
pub struct IngestConfig {
    /// 署名付きURLとAPIキーの共有シークレット
    pub secret: String,
    /// Webhook署名用シークレット（未設定時は共有シークレット）
    pub webhook_secret: String,
    /// 署名付きURLと公開URLのベース（末尾スラッシュなし）
    pub api_base_url: String,
    /// appUrlのベース（未設定時は `api_base_url`）
    pub public_url: String,
    /// ufsUrlのホストサフィックス
    pub ufs_host_suffix: String,
    /// 待ち受けアドレス
    pub bind_addr: String,
    /// 管理APIが発行する署名付きURLの有効期限（秒）
    pub presign_expiry_secs: u64,
    /// 開発モードのポーリング間隔
    pub dev_poll_interval: Duration,
    /// 開発モードのポーリング期限
    pub dev_poll_deadline: Duration,
    /// Webhook送信タスクの期限
    pub callback_timeout: Duration,
}

impl IngestConfig {
    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の参照関数から構築する。
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = lookup("UPLOADTHING_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("UPLOADTHING_SECRETが未設定です"))?;

        let webhook_secret = match lookup("WEBHOOK_SECRET").filter(|s| !s.is_empty()) {
            Some(s) => s,
            None => {
                tracing::info!("WEBHOOK_SECRETが未設定のため共有シークレットでWebhookに署名します");
                secret.clone()
            }
        };

        let api_base_url = lookup("API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&api_base_url)
            .map_err(|e| anyhow::anyhow!("API_BASE_URLが不正です: {api_base_url} ({e})"))?;

        let public_url = lookup("PUBLIC_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| api_base_url.clone());

        Ok(Self {
            secret,
            webhook_secret,
            api_base_url,
            public_url,
            ufs_host_suffix: lookup("UFS_HOST_SUFFIX").unwrap_or_else(|| "ufs.sh".to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8787".to_string()),
            presign_expiry_secs: parse_or(&lookup, "PRESIGN_EXPIRY_SECS", 3600)?,
            dev_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "DEV_POLL_INTERVAL_MS",
                1000,
            )?),
            dev_poll_deadline: Duration::from_secs(parse_or(
                &lookup,
                "DEV_POLL_DEADLINE_SECS",
                300,
            )?),
            callback_timeout: Duration::from_secs(parse_or(
                &lookup,
                "CALLBACK_TIMEOUT_SECS",
                30,
            )?),
        })
    }

    /// ダウンロード用の公開URL。
    pub fn file_url(&self, key: &str) -> String {
        format!("{}/f/{}", self.api_base_url, key)
    }

    /// アプリ単位のURL。
    pub fn app_url(&self, identifier: &str, key: &str) -> String {
        format!("{}/a/{}/{}", self.public_url, identifier, key)
    }

    /// UFS形式のURL。
    pub fn ufs_url(&self, identifier: &str, key: &str) -> String {
        format!("https://{}.{}/f/{}", identifier, self.ufs_host_suffix, key)
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{name}の値が不正です: {raw} ({e})")),
        None => Ok(default),
    }
}

/// Gatewayの共有状態。
pub struct GatewayState {
    pub config: IngestConfig,
    /// Webhook送信用HTTPクライアント
    pub http_client: reqwest::Client,
    /// オブジェクトストレージ（メモリ、S3互換等、トレイトで抽象化）
    pub blob_store: Box<dyn BlobStore>,
    /// TTL付きキーバリューストア（メモリ、Redis等）
    pub metadata_store: Box<dyn MetadataStore>,
    /// Webhook送信・開発モードのポーリングを管理する
    pub tasks: TaskSupervisor,
}
