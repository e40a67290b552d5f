//! # 開発モードの完了通知ストリーム
//!
//! 開発環境ではオリジンサーバーがWebhookを受けられないことが多いため、
//! `POST /route-metadata` のレスポンスをNDJSONストリームとして開いたままにし、
//! アップロード完了を1行ずつ流す。
//!
//! 各行は `{payload, signature, hook}`。`payload` はWebhookと同じJSON文字列で、
//! `signature` はその文字列に対する署名。
//!
//! ポーリングタスクはスーパーバイザ管理下で動き、全キーの観測・期限切れ・
//! 内部エラー・クライアント切断のいずれでも送信側がdropされストリームが閉じる。

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use fukusu_core::now_millis;
use fukusu_types::{HookType, MetadataFetchStreamPart, StreamErrorPayload};
use tokio::sync::mpsc;

use crate::callback::{self, CompletedUpload, SignedPayload};
use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::storage::{self, ObjectHead};

/// 送信待ちの行数の上限
const STREAM_BUFFER: usize = 16;

/// NDJSONのContent-Type
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// ポーリングタスクを起動し、その出力をレスポンスボディとして返す。
pub fn spawn_upload_watch(state: Arc<GatewayState>, file_keys: Vec<String>) -> Body {
    spawn_ndjson_stream(state, file_keys, |state, file_keys, tx| async move {
        watch_uploads(&state, &file_keys, &tx).await
    })
}

/// `watch` をスーパーバイザ管理下で動かし、送られた行をそのまま流す。
///
/// `watch` がエラーを返した場合は `hook: "error"` の行を1行だけ送ってから閉じる。
fn spawn_ndjson_stream<F, Fut>(state: Arc<GatewayState>, file_keys: Vec<String>, watch: F) -> Body
where
    F: FnOnce(Arc<GatewayState>, Vec<String>, mpsc::Sender<Bytes>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), GatewayError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    let deadline = state.config.dev_poll_deadline;
    let tasks = state.tasks.clone();

    tasks.spawn("dev-upload-watch", deadline, async move {
        if let Err(e) = watch(state.clone(), file_keys.clone(), tx.clone()).await {
            tracing::error!(error = %e, "開発モードのポーリングに失敗");
            match error_line(&state, &e, &file_keys) {
                Ok(line) => {
                    let _ = tx.send(line).await;
                }
                Err(e) => tracing::error!(error = %e, "エラー行の生成に失敗"),
            }
        }
        // txのdropでストリームが閉じる
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (Ok::<_, Infallible>(line), rx))
    });
    Body::from_stream(stream)
}

/// 全キーが観測されるまでポーリングする。クライアントが切断した場合も正常終了。
async fn watch_uploads(
    state: &GatewayState,
    file_keys: &[String],
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), GatewayError> {
    let outstanding: HashSet<&str> = file_keys.iter().map(String::as_str).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut ticker = tokio::time::interval(state.config.dev_poll_interval);

    tracing::info!(file_count = outstanding.len(), "開発モードのポーリングを開始");

    while seen.len() < outstanding.len() {
        ticker.tick().await;

        for key in file_keys {
            if seen.contains(key.as_str()) {
                continue;
            }
            let head = match state.blob_store.head(key).await {
                Ok(Some(head)) => head,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(file_key = %key, error = %e, "オブジェクトの確認に失敗");
                    continue;
                }
            };
            seen.insert(key.as_str());

            let line = completion_line(state, key, &head).await?;
            if tx.send(line).await.is_err() {
                tracing::info!("クライアントが切断したためポーリングを終了");
                return Ok(());
            }
            tracing::info!(file_key = %key, "アップロード完了を通知");
        }
    }

    tracing::info!("全ファイルのアップロード完了を通知しました");
    Ok(())
}

/// 観測したオブジェクトの完了通知行を作る。
async fn completion_line(
    state: &GatewayState,
    key: &str,
    head: &ObjectHead,
) -> Result<Bytes, GatewayError> {
    let file_hash = match &head.checksum {
        Some(hash) => hash.clone(),
        None => match storage::content_hash(state.blob_store.as_ref(), key).await {
            Ok(hash) => hash.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(file_key = %key, error = %e, "ハッシュ計算に失敗");
                String::new()
            }
        },
    };

    let upload = CompletedUpload::from_head(key, head, file_hash, now_millis());
    let metadata = callback::load_middleware_metadata(state.metadata_store.as_ref(), key).await;
    let payload = callback::build_callback_payload(&state.config, &upload, metadata);
    let signed = callback::sign_payload(&payload, &state.config.webhook_secret)?;
    stream_line(signed, HookType::Callback)
}

fn error_line(
    state: &GatewayState,
    error: &GatewayError,
    file_keys: &[String],
) -> Result<Bytes, GatewayError> {
    let payload = StreamErrorPayload {
        error: error.to_string(),
        file_keys: file_keys.to_vec(),
    };
    let signed = callback::sign_payload(&payload, &state.config.webhook_secret)?;
    stream_line(signed, HookType::Error)
}

fn stream_line(signed: SignedPayload, hook: HookType) -> Result<Bytes, GatewayError> {
    let part = MetadataFetchStreamPart {
        payload: signed.body,
        signature: signed.signature,
        hook,
    };
    let mut line = serde_json::to_vec(&part)
        .map_err(|e| GatewayError::Internal(format!("ストリーム行のシリアライズに失敗: {e}")))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::storage::{bytes_stream, ObjectAttributes, PutOptions};
    use crate::test_helpers::{test_config, test_state_with_config};

    async fn put_object(state: &GatewayState, key: &str, data: &'static str) {
        state
            .blob_store
            .put(
                key,
                bytes_stream(data),
                PutOptions {
                    content_type: "text/plain".to_string(),
                    content_disposition: "inline".to_string(),
                    attributes: ObjectAttributes {
                        original_name: format!("{key}.txt"),
                        uploaded_by: "app1".to_string(),
                        slug: "default".to_string(),
                        custom_id: None,
                        upload_timestamp: 7,
                    },
                },
            )
            .await
            .unwrap();
    }

    fn parse_lines(body: &[u8]) -> Vec<MetadataFetchStreamPart> {
        body.split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    /// 既に存在するキーは1行ずつ通知され、全キー観測後にストリームが閉じることを確認
    #[tokio::test]
    async fn test_stream_emits_one_line_per_key() {
        let state = test_state_with_config(test_config());
        put_object(&state, "k1", "abc").await;
        put_object(&state, "k2", "defg").await;

        let body = spawn_upload_watch(
            state.clone(),
            vec!["k1".to_string(), "k2".to_string(), "k1".to_string()],
        );
        let bytes = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(body, usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();

        let lines = parse_lines(&bytes);
        assert_eq!(lines.len(), 2);
        for line in &lines {
            assert_eq!(line.hook, HookType::Callback);
            assert!(fukusu_crypto::verify(
                line.payload.as_bytes(),
                state.config.webhook_secret.as_bytes(),
                &line.signature
            ));
        }
        let first: serde_json::Value = serde_json::from_str(&lines[0].payload).unwrap();
        assert_eq!(first["file"]["key"], "k1");
        assert_eq!(first["file"]["name"], "k1.txt");
        assert_eq!(first["file"]["size"], 3);
        assert_eq!(first["file"]["lastModified"], 7);
        assert_eq!(
            first["file"]["fileHash"],
            fukusu_crypto::sha256_hex(b"abc")
        );
    }

    /// 後からアップロードされたキーもポーリングで検出されることを確認
    #[tokio::test]
    async fn test_stream_detects_later_upload() {
        let state = test_state_with_config(test_config());
        let body = spawn_upload_watch(state.clone(), vec!["late".to_string()]);

        let writer = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            put_object(&writer, "late", "xyz").await;
        });

        let bytes = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(body, usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(parse_lines(&bytes).len(), 1);
    }

    /// 期限切れでストリームが閉じることを確認
    #[tokio::test]
    async fn test_stream_closes_on_deadline() {
        let mut config = test_config();
        config.dev_poll_deadline = Duration::from_millis(150);
        let state = test_state_with_config(config);

        let body = spawn_upload_watch(state, vec!["never".to_string()]);
        let bytes = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(body, usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(bytes.is_empty());
    }

    /// ポーリングが失敗すると、送信済みの行の後にエラー行が1行だけ流れて閉じることを確認
    #[tokio::test]
    async fn test_stream_ends_with_single_error_line() {
        let state = test_state_with_config(test_config());
        let body = spawn_ndjson_stream(
            state.clone(),
            vec!["k1".to_string(), "k2".to_string()],
            |state, _keys, tx| async move {
                let signed = callback::sign_payload(
                    &serde_json::json!({"file": {"key": "k1"}}),
                    &state.config.webhook_secret,
                )?;
                tx.send(stream_line(signed, HookType::Callback)?)
                    .await
                    .map_err(|e| GatewayError::Internal(e.to_string()))?;
                Err(GatewayError::Storage("backend down".into()))
            },
        );
        let bytes = tokio::time::timeout(
            Duration::from_secs(5),
            axum::body::to_bytes(body, usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();

        let lines = parse_lines(&bytes);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].hook, HookType::Callback);
        assert_eq!(lines[1].hook, HookType::Error);
        assert!(fukusu_crypto::verify(
            lines[1].payload.as_bytes(),
            state.config.webhook_secret.as_bytes(),
            &lines[1].signature
        ));
        let payload: StreamErrorPayload = serde_json::from_str(&lines[1].payload).unwrap();
        assert_eq!(payload.file_keys, vec!["k1", "k2"]);
        assert!(payload.error.contains("backend down"));
    }

    /// エラー行が署名付きで `hook: "error"` になることを確認
    #[test]
    fn test_error_line_shape() {
        let state = test_state_with_config(test_config());
        let keys = vec!["k1".to_string()];
        let line = error_line(&state, &GatewayError::Internal("boom".into()), &keys).unwrap();
        assert!(line.ends_with(b"\n"));

        let part: MetadataFetchStreamPart = serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(part.hook, HookType::Error);
        let payload: StreamErrorPayload = serde_json::from_str(&part.payload).unwrap();
        assert_eq!(payload.file_keys, keys);
        assert!(payload.error.contains("boom"));
    }
}
