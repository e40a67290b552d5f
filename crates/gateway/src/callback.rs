//! # メタデータ登録とWebhook送信
//!
//! アップロード前にオリジンサーバーが登録したメタデータ（PendingMetadata）を保持し、
//! アップロード完了時に署名付きWebhookとしてオリジンへ通知する。
//!
//! ## Webhook
//! - `POST <callbackUrl>?slug=<callbackSlug | "default">`
//! - ヘッダー: `content-type: application/json`, `uploadthing-hook: callback`,
//!   `x-uploadthing-signature: hmac-sha256=<hex>`
//! - 署名対象は送信する本文そのもの
//! - 失敗はログに残すのみで再送しない

use std::sync::Arc;

use fukusu_core::token::DEFAULT_APP_ID;
use fukusu_types::{
    CallbackFile, CallbackPayload, ErrorRecord, PendingMetadata, RouteMetadataRequest,
};
use serde::Serialize;
use url::Url;

use crate::config::{GatewayState, IngestConfig};
use crate::error::{GatewayError, StorageError};
use crate::metadata::records;
use crate::metadata::MetadataStore;
use crate::storage::ObjectHead;

/// Webhookの種別ヘッダー
pub const HOOK_HEADER: &str = "uploadthing-hook";

/// Webhookの署名ヘッダー
pub const SIGNATURE_HEADER: &str = "x-uploadthing-signature";

/// スラグ未指定時の値
pub const DEFAULT_SLUG: &str = "default";

/// 完了したアップロードの記述子。Webhook・開発モードのストリームの両方で使う。
#[derive(Debug, Clone)]
pub struct CompletedUpload {
    pub key: String,
    pub name: String,
    pub size: u64,
    pub file_type: String,
    pub last_modified: u64,
    pub custom_id: Option<String>,
    /// appUrl・ufsUrlに使う識別子
    pub uploaded_by: String,
    pub file_hash: String,
}

impl CompletedUpload {
    /// 保存済みオブジェクトのメタ情報から組み立てる。
    pub fn from_head(key: &str, head: &ObjectHead, file_hash: String, now_ms: u64) -> Self {
        let attrs = &head.attributes;
        let name = if attrs.original_name.is_empty() {
            key.to_string()
        } else {
            attrs.original_name.clone()
        };
        Self {
            key: key.to_string(),
            name,
            size: head.size,
            file_type: head.content_type.clone(),
            last_modified: if attrs.upload_timestamp > 0 {
                attrs.upload_timestamp
            } else {
                now_ms
            },
            custom_id: attrs.custom_id.clone(),
            uploaded_by: identifier_or_default(&attrs.uploaded_by),
            file_hash,
        }
    }

    fn to_callback_file(&self, config: &IngestConfig) -> CallbackFile {
        CallbackFile {
            key: self.key.clone(),
            name: self.name.clone(),
            size: self.size,
            file_type: self.file_type.clone(),
            last_modified: self.last_modified,
            custom_id: self.custom_id.clone(),
            url: config.file_url(&self.key),
            app_url: config.app_url(&self.uploaded_by, &self.key),
            ufs_url: config.ufs_url(&self.uploaded_by, &self.key),
            file_hash: self.file_hash.clone(),
        }
    }
}

/// 空または "unknown" の識別子をデフォルトのアプリIDに置き換える。
pub fn identifier_or_default(identifier: &str) -> String {
    if identifier.is_empty() || identifier == "unknown" {
        DEFAULT_APP_ID.to_string()
    } else {
        identifier.to_string()
    }
}

/// Webhookペイロードを組み立てる。
pub fn build_callback_payload(
    config: &IngestConfig,
    upload: &CompletedUpload,
    metadata: serde_json::Value,
) -> CallbackPayload {
    CallbackPayload {
        status: "uploaded".to_string(),
        file: upload.to_callback_file(config),
        origin: config.api_base_url.clone(),
        metadata,
    }
}

/// 署名済みの本文。
#[derive(Debug, Clone)]
pub struct SignedPayload {
    /// 送信する本文（署名対象そのもの）
    pub body: String,
    /// `hmac-sha256=<hex>`
    pub signature: String,
}

/// 値をJSONにシリアライズし、その文字列に署名する。
pub fn sign_payload<T: Serialize>(payload: &T, secret: &str) -> Result<SignedPayload, GatewayError> {
    let body = serde_json::to_string(payload)
        .map_err(|e| GatewayError::Internal(format!("ペイロードのシリアライズに失敗: {e}")))?;
    let signature = fukusu_crypto::sign(body.as_bytes(), secret.as_bytes())
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(SignedPayload { body, signature })
}

/// 送信先URL（`slug` クエリ付き）を組み立てる。
pub fn callback_target(callback_url: &str, slug: Option<&str>) -> Result<Url, GatewayError> {
    let mut url = Url::parse(callback_url)
        .map_err(|e| GatewayError::Callback(format!("コールバックURLが不正です: {callback_url} ({e})")))?;
    let slug = slug.filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SLUG);
    url.query_pairs_mut().append_pair("slug", slug);
    Ok(url)
}

// ---------------------------------------------------------------------------
// メタデータ登録
// ---------------------------------------------------------------------------

/// ファイルキーごとにPendingMetadataを登録する（1時間、後勝ち）。
pub async fn register_metadata(
    store: &dyn MetadataStore,
    request: &RouteMetadataRequest,
    now_ms: u64,
) -> Result<(), StorageError> {
    let middleware_metadata = if request.metadata.is_null() {
        serde_json::json!({})
    } else {
        request.metadata.clone()
    };
    let pending = PendingMetadata {
        middleware_metadata,
        callback_url: request.callback_url.clone(),
        callback_slug: request.callback_slug.clone(),
        await_server_data: request.await_server_data,
        registered_at: now_ms,
    };
    for key in &request.file_keys {
        records::put_pending_metadata(store, key, &pending).await?;
    }
    tracing::info!(
        file_count = request.file_keys.len(),
        is_dev = request.is_dev,
        "メタデータを登録しました"
    );
    Ok(())
}

/// 登録済みのミドルウェアメタデータを取り出す。見つからない・読めない場合は空オブジェクト。
pub async fn load_middleware_metadata(store: &dyn MetadataStore, key: &str) -> serde_json::Value {
    match records::get_pending_metadata(store, key).await {
        Ok(Some(pending)) => pending.middleware_metadata,
        Ok(None) => serde_json::json!({}),
        Err(e) => {
            tracing::warn!(file_key = %key, error = %e, "PendingMetadataの読み取りに失敗");
            serde_json::json!({})
        }
    }
}

/// アップロード失敗を記録する（24時間）。
pub async fn record_failure(
    store: &dyn MetadataStore,
    file_key: &str,
    error: serde_json::Value,
    upload_id: Option<String>,
    now_ms: u64,
) -> Result<(), StorageError> {
    tracing::warn!(file_key = %file_key, error = %error, "アップロード失敗を記録");
    let record = ErrorRecord {
        error,
        upload_id,
        timestamp: now_ms,
    };
    records::put_error_record(store, file_key, &record).await
}

// ---------------------------------------------------------------------------
// Webhook送信
// ---------------------------------------------------------------------------

/// 署名済みペイロードをPOSTする。2xx以外はエラー。
pub async fn deliver_callback(
    client: &reqwest::Client,
    target: Url,
    signed: &SignedPayload,
) -> Result<(), GatewayError> {
    let response = client
        .post(target)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(HOOK_HEADER, "callback")
        .header(SIGNATURE_HEADER, &signed.signature)
        .body(signed.body.clone())
        .send()
        .await
        .map_err(|e| GatewayError::Callback(format!("HTTP送信失敗: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Callback(format!(
            "オリジンがエラーを返しました: HTTP {status} - {body}"
        )));
    }
    Ok(())
}

/// Webhook送信をスーパーバイザ管理下のタスクとして起動する。レスポンスは待たない。
pub fn schedule_callback(state: &Arc<GatewayState>, upload: CompletedUpload, pending: PendingMetadata) {
    let task_state = Arc::clone(state);
    state.tasks.spawn(
        "webhook-delivery",
        state.config.callback_timeout,
        async move {
            let key = upload.key.clone();
            match run_callback(&task_state, upload, pending).await {
                Ok(()) => tracing::info!(file_key = %key, "Webhookを送信しました"),
                Err(e) => tracing::warn!(file_key = %key, error = %e, "Webhookの送信に失敗"),
            }
        },
    );
}

async fn run_callback(
    state: &GatewayState,
    upload: CompletedUpload,
    pending: PendingMetadata,
) -> Result<(), GatewayError> {
    let Some(callback_url) = pending.callback_url.as_deref() else {
        return Ok(());
    };
    let target = callback_target(callback_url, pending.callback_slug.as_deref())?;
    let payload = build_callback_payload(&state.config, &upload, pending.middleware_metadata.clone());
    let signed = sign_payload(&payload, &state.config.webhook_secret)?;
    deliver_callback(&state.http_client, target, &signed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;
    use crate::test_helpers::test_config;

    fn upload() -> CompletedUpload {
        CompletedUpload {
            key: "k1".to_string(),
            name: "a.txt".to_string(),
            size: 3,
            file_type: "text/plain".to_string(),
            last_modified: 1,
            custom_id: None,
            uploaded_by: "app1".to_string(),
            file_hash: "h".to_string(),
        }
    }

    /// slugの既定値と既存クエリの保持を確認
    #[test]
    fn test_callback_target() {
        let url = callback_target("https://origin/api", None).unwrap();
        assert_eq!(url.as_str(), "https://origin/api?slug=default");

        let url = callback_target("https://origin/api?x=1", Some("imageUploader")).unwrap();
        assert_eq!(url.as_str(), "https://origin/api?x=1&slug=imageUploader");

        assert!(callback_target("not a url", None).is_err());
    }

    /// 署名が本文そのものに対して検証できることを確認
    #[test]
    fn test_sign_payload_covers_body() {
        let config = test_config();
        let payload = build_callback_payload(&config, &upload(), serde_json::json!({"u": 1}));
        let signed = sign_payload(&payload, &config.webhook_secret).unwrap();
        assert!(fukusu_crypto::verify(
            signed.body.as_bytes(),
            config.webhook_secret.as_bytes(),
            &signed.signature
        ));

        let parsed: serde_json::Value = serde_json::from_str(&signed.body).unwrap();
        assert_eq!(parsed["status"], "uploaded");
        assert_eq!(parsed["file"]["size"], 3);
        assert_eq!(parsed["file"]["appUrl"], format!("{}/a/app1/k1", config.public_url));
        assert_eq!(parsed["metadata"]["u"], 1);
    }

    /// 同じキーへの再登録は後勝ちで、FileRecordは作られないことを確認
    #[tokio::test]
    async fn test_register_metadata_last_write_wins() {
        let store = MemoryMetadataStore::new();
        let mut request: RouteMetadataRequest =
            serde_json::from_str(r#"{"fileKeys":["k1"],"metadata":{"v":1}}"#).unwrap();
        register_metadata(&store, &request, 10).await.unwrap();

        request.metadata = serde_json::json!({"v": 2});
        register_metadata(&store, &request, 20).await.unwrap();

        let pending = records::get_pending_metadata(&store, "k1").await.unwrap().unwrap();
        assert_eq!(pending.middleware_metadata["v"], 2);
        assert_eq!(pending.registered_at, 20);
        assert!(records::get_file_record(&store, "k1").await.unwrap().is_none());
    }

    /// 未登録キーのメタデータは空オブジェクトになることを確認
    #[tokio::test]
    async fn test_load_metadata_miss() {
        let store = MemoryMetadataStore::new();
        assert_eq!(load_middleware_metadata(&store, "nope").await, serde_json::json!({}));
    }

    /// 失敗記録がErrorRecordとして保存されることを確認
    #[tokio::test]
    async fn test_record_failure() {
        let store = MemoryMetadataStore::new();
        record_failure(&store, "k1", serde_json::json!("boom"), Some("u1".into()), 5)
            .await
            .unwrap();
        let record = records::get_error_record(&store, "k1").await.unwrap().unwrap();
        assert_eq!(record.error, "boom");
        assert_eq!(record.upload_id.as_deref(), Some("u1"));
        assert_eq!(record.timestamp, 5);
    }

    /// オリジンが非2xxを返した場合にCallbackエラーになることを確認
    #[tokio::test]
    async fn test_deliver_callback_non_2xx() {
        let origin = axum::Router::new().route(
            "/api",
            axum::routing::post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "nope") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, origin).await.unwrap();
        });

        let signed = SignedPayload {
            body: "{}".to_string(),
            signature: "hmac-sha256=00".to_string(),
        };
        let target = callback_target(&format!("http://127.0.0.1:{port}/api"), None).unwrap();
        let result = deliver_callback(&reqwest::Client::new(), target, &signed).await;
        assert!(matches!(result, Err(GatewayError::Callback(_))));
    }
}
