//! # PUT /{fileKey}, HEAD /{fileKey}
//!
//! 署名付きURLによるアップロード受付。
//!
//! ## 処理の流れ
//! 1. 署名検証（不一致・欠落・期限切れは403）
//! 2. `Range: bytes=<n>-` の解釈（n > 0 なら既存オブジェクトの続きとして連結）
//! 3. 本文の取得（multipartなら `file` フィールド、それ以外は生の本文）
//! 4. 書き込みとハッシュ計算
//! 5. FileRecordの保存、コールバック設定があればWebhook送信タスクを起動
//!
//! HEADはレジューム用に保存済みサイズを `x-ut-range-start` で返す。

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRequest, Multipart, OriginalUri, Path, Request, State};
use axum::http::header::{CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{StreamExt, TryStreamExt};
use fukusu_core::presign::PresignError;
use fukusu_core::{now_millis, verify_signed_url};
use fukusu_types::{FileRecord, UploadPutResult};
use url::Url;

use crate::callback::{self, identifier_or_default, CompletedUpload};
use crate::config::GatewayState;
use crate::error::{GatewayError, StorageError};
use crate::metadata::records;
use crate::storage::{
    self, bytes_stream, concat_streams, ByteStream, ObjectAttributes, PutOptions,
    DEFAULT_CONTENT_DISPOSITION, DEFAULT_CONTENT_TYPE,
};

/// レジューム位置を返すヘッダー
pub const RANGE_START_HEADER: &str = "x-ut-range-start";

/// 署名付きURLのクエリから読み取るアップロード情報。
#[derive(Debug, Default)]
struct UploadParams {
    identifier: Option<String>,
    file_name: Option<String>,
    file_type: Option<String>,
    slug: Option<String>,
    custom_id: Option<String>,
    content_disposition: Option<String>,
    acl: Option<String>,
}

impl UploadParams {
    /// 同名パラメータは最初の値を使う。空文字列は未指定扱い。
    fn from_url(url: &Url) -> Self {
        let mut query: HashMap<String, String> = HashMap::new();
        for (name, value) in url.query_pairs() {
            query
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        let mut take = |name: &str| query.remove(name).filter(|v| !v.is_empty());

        Self {
            identifier: take("x-ut-identifier"),
            file_name: take("x-ut-file-name").map(|v| percent_decode(&v)),
            file_type: take("x-ut-file-type").map(|v| percent_decode(&v)),
            slug: take("x-ut-slug"),
            custom_id: take("x-ut-custom-id"),
            content_disposition: take("x-ut-content-disposition"),
            acl: take("x-ut-acl"),
        }
    }
}

/// SDKがエンコード済みの値をさらにクエリに載せるため、もう一段デコードする。
/// デコードできない値はそのまま使う。
fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// リクエストURIを設定済みのベースURLで再構築し、署名を検証する。
///
/// Hostヘッダーではなく `API_BASE_URL` を使うため、リバースプロキシの書き換えに影響されない。
pub(crate) fn verify_request(state: &GatewayState, uri: &Uri) -> Result<Url, GatewayError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = Url::parse(&format!("{}{}", state.config.api_base_url, path_and_query))
        .map_err(|e| GatewayError::BadRequest(format!("URLを解釈できません: {e}")))?;

    match verify_signed_url(&url, state.config.secret.as_bytes(), now_millis()) {
        Ok(()) => Ok(url),
        Err(PresignError::Expired { expires }) => {
            tracing::warn!(url = %url, expires, "署名付きURLの有効期限切れ");
            Err(GatewayError::Forbidden("Invalid signature".to_string()))
        }
        Err(e) => {
            tracing::warn!(url = %url, reason = %e, "署名検証に失敗");
            Err(GatewayError::Forbidden("Invalid signature".to_string()))
        }
    }
}

/// `Range` ヘッダーから `bytes=<n>-` の開始位置を取り出す。一致しなければ0。
pub(crate) fn parse_range_start(headers: &HeaderMap) -> u64 {
    let Some(value) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return 0;
    };
    let Some(idx) = value.find("bytes=") else {
        return 0;
    };
    let rest = &value[idx + "bytes=".len()..];
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || rest.as_bytes().get(digits) != Some(&b'-') {
        return 0;
    }
    rest[..digits].parse().unwrap_or(0)
}

/// 取り出した本文。
struct UploadBody {
    stream: ByteStream,
    /// multipartのパートに付いていたContent-Type
    part_content_type: Option<String>,
}

async fn extract_body(request: Request) -> Result<UploadBody, GatewayError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| GatewayError::BadRequest(e.body_text()))?
        {
            if field.name() != Some("file") {
                continue;
            }
            let part_content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| GatewayError::BadRequest(e.body_text()))?;
            return Ok(UploadBody {
                stream: bytes_stream(data),
                part_content_type,
            });
        }
        return Err(GatewayError::BadRequest("No file provided".to_string()));
    }

    // 空の本文を拒否するため、最初の非空チャンクまで読み進めてから戻す
    let mut stream = request
        .into_body()
        .into_data_stream()
        .map_err(|e| StorageError::Stream(e.to_string()));
    loop {
        match stream.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => {
                let head = futures::stream::once(async move { Ok(chunk) });
                return Ok(UploadBody {
                    stream: head.chain(stream).boxed(),
                    part_content_type: None,
                });
            }
            Some(Err(e)) => return Err(GatewayError::BadRequest(e.to_string())),
            None => return Err(GatewayError::BadRequest("No file data provided".to_string())),
        }
    }
}

/// PUT /{fileKey} — アップロード受付。
pub async fn handle_upload(
    State(state): State<Arc<GatewayState>>,
    Path(file_key): Path<String>,
    OriginalUri(uri): OriginalUri,
    request: Request,
) -> Result<Json<UploadPutResult>, GatewayError> {
    let url = verify_request(&state, &uri)?;
    let params = UploadParams::from_url(&url);
    let range_start = parse_range_start(request.headers());
    let body = extract_body(request).await?;

    let content_type = body
        .part_content_type
        .clone()
        .filter(|ct| !ct.is_empty())
        .or_else(|| params.file_type.clone())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    let content_disposition = params
        .content_disposition
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTENT_DISPOSITION.to_string());
    let identifier = identifier_or_default(params.identifier.as_deref().unwrap_or_default());
    let file_name = params
        .file_name
        .clone()
        .unwrap_or_else(|| "unknown".to_string());
    let now = now_millis();

    let stream = if range_start > 0 {
        match state.blob_store.get(&file_key, None).await? {
            Some(existing) => {
                tracing::info!(
                    file_key = %file_key,
                    range_start,
                    existing_size = existing.head.size,
                    "既存オブジェクトに続けて書き込みます"
                );
                concat_streams(existing.body, body.stream)
            }
            None => {
                tracing::info!(file_key = %file_key, range_start, "既存オブジェクトがないため新規アップロードとして扱います");
                body.stream
            }
        }
    } else {
        body.stream
    };

    let outcome = state
        .blob_store
        .put(
            &file_key,
            stream,
            PutOptions {
                content_type: content_type.clone(),
                content_disposition,
                attributes: ObjectAttributes {
                    original_name: file_name.clone(),
                    uploaded_by: identifier.clone(),
                    slug: params.slug.clone().unwrap_or_else(|| "unknown".to_string()),
                    custom_id: params.custom_id.clone(),
                    upload_timestamp: now,
                },
            },
        )
        .await?;

    let file_hash = match outcome.checksum {
        Some(checksum) => checksum.to_hex(),
        None => match storage::content_hash(state.blob_store.as_ref(), &file_key).await {
            Ok(hash) => hash.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(file_key = %file_key, error = %e, "ハッシュ計算に失敗");
                String::new()
            }
        },
    };

    let record = FileRecord {
        key: file_key.clone(),
        name: file_name.clone(),
        size: outcome.size,
        file_type: content_type.clone(),
        custom_id: params.custom_id.clone(),
        uploaded_at: Some(now),
        file_hash: (!file_hash.is_empty()).then(|| file_hash.clone()),
        acl: params.acl.clone(),
    };
    records::put_file_record(state.metadata_store.as_ref(), &record).await?;

    tracing::info!(file_key = %file_key, size = outcome.size, "アップロードを受け付けました");

    match records::get_pending_metadata(state.metadata_store.as_ref(), &file_key).await {
        Ok(Some(pending)) if pending.callback_url.is_some() => {
            let upload = CompletedUpload {
                key: file_key.clone(),
                name: file_name,
                size: outcome.size,
                file_type: content_type,
                last_modified: now,
                custom_id: params.custom_id,
                uploaded_by: identifier.clone(),
                file_hash: file_hash.clone(),
            };
            callback::schedule_callback(&state, upload, pending);
        }
        Ok(_) => tracing::debug!(file_key = %file_key, "コールバック設定がないためWebhookは送信しません"),
        Err(e) => {
            tracing::warn!(file_key = %file_key, error = %e, "PendingMetadataの読み取りに失敗")
        }
    }

    let config = &state.config;
    Ok(Json(UploadPutResult {
        url: config.file_url(&file_key),
        app_url: config.app_url(&identifier, &file_key),
        ufs_url: config.ufs_url(&identifier, &file_key),
        file_hash,
        server_data: None,
    }))
}

/// HEAD /{fileKey} — レジューム位置の問い合わせ。
pub async fn handle_upload_head(
    State(state): State<Arc<GatewayState>>,
    Path(file_key): Path<String>,
    OriginalUri(uri): OriginalUri,
) -> Result<Response, GatewayError> {
    verify_request(&state, &uri)?;

    let size = match state.blob_store.head(&file_key).await {
        Ok(Some(head)) => head.size,
        Ok(None) => 0,
        Err(e) => {
            tracing::warn!(file_key = %file_key, error = %e, "オブジェクトの確認に失敗");
            0
        }
    };

    Ok(([(RANGE_START_HEADER, size.to_string())], ()).into_response())
}
