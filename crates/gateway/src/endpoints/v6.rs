//! # 管理API v6
//!
//! UploadThing SDKのサーバー側呼び出し（`/v6/*`）。すべて [`crate::auth::require_api_key`] の内側で動く。
//!
//! ファイルは `fileKey` または `customId` で指定できる。`customId` は
//! メタデータストアの逆引きインデックスで解決する。

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use fukusu_core::{build_signed_url, generate_file_key, now_millis, PresignError, UploadToken};
use fukusu_types::{
    AclUpdate, CompleteMultipartRequest, DeleteFilesRequest, DeleteFilesResponse,
    FailureCallbackRequest, FileAccessRequest, FileAccessResponse, ListFilesRequest,
    ListFilesResponse, ListedFile, PollUploadResponse, PolledFile, PreparedUpload,
    RenameFilesRequest, RenameFilesResponse, RenameUpdate, SuccessResponse, UpdateAclRequest,
    UpdateAclResponse, UploadFilesRequest, UploadFilesResponse, UsageInfo,
};

use crate::callback;
use crate::config::{GatewayState, IngestConfig};
use crate::error::GatewayError;
use crate::metadata::records;

/// アップロード用の署名付きURLを発行する。
pub(crate) fn presign_upload(
    config: &IngestConfig,
    key: &str,
    params: &[(&str, &str)],
    expires_in_secs: u64,
) -> Result<String, GatewayError> {
    build_signed_url(
        &config.api_base_url,
        key,
        params,
        expires_in_secs,
        config.secret.as_bytes(),
        now_millis(),
    )
    .map_err(|e| match e {
        PresignError::InvalidExpiry { .. } => GatewayError::BadRequest(e.to_string()),
        e => GatewayError::Internal(format!("署名付きURLの生成に失敗: {e}")),
    })
}

/// `fileKey` を優先し、なければ `customId` を解決する。
async fn resolve_target(
    state: &GatewayState,
    file_key: Option<&str>,
    custom_id: Option<&str>,
) -> Result<Option<String>, GatewayError> {
    if let Some(key) = file_key.filter(|k| !k.is_empty()) {
        return Ok(Some(key.to_string()));
    }
    match custom_id.filter(|id| !id.is_empty()) {
        Some(id) => Ok(records::resolve_custom_id(state.metadata_store.as_ref(), id).await?),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// アップロード準備
// ---------------------------------------------------------------------------

/// POST /v6/uploadFiles — ファイルごとにキーと署名付きURLを発行する。
pub async fn handle_upload_files(
    State(state): State<Arc<GatewayState>>,
    Extension(token): Extension<UploadToken>,
    Json(request): Json<UploadFilesRequest>,
) -> Result<Json<UploadFilesResponse>, GatewayError> {
    let Some(files) = request.files else {
        return Err(GatewayError::BadRequest("Files array required".to_string()));
    };
    let config = &state.config;

    let mut data = Vec::with_capacity(files.len());
    for file in files {
        let key = generate_file_key();
        let size = file.size.to_string();
        let mut params = vec![
            ("x-ut-identifier", token.app_id()),
            ("x-ut-file-name", file.name.as_str()),
            ("x-ut-file-size", size.as_str()),
            ("x-ut-file-type", file.file_type.as_str()),
            ("x-ut-acl", request.acl.as_str()),
            ("x-ut-content-disposition", request.content_disposition.as_str()),
        ];
        if let Some(custom_id) = file.custom_id.as_deref() {
            params.push(("x-ut-custom-id", custom_id));
        }
        let url = presign_upload(config, &key, &params, config.presign_expiry_secs)?;

        data.push(PreparedUpload {
            file_url: config.file_url(&key),
            polling_url: format!("{}/v6/pollUpload/{}", config.api_base_url, key),
            key,
            file_name: file.name,
            file_type: file.file_type,
            url,
            custom_id: file.custom_id,
            content_disposition: request.content_disposition.clone(),
            polling_jwt: "not-implemented".to_string(),
            fields: serde_json::json!({}),
        });
    }

    tracing::info!(app_id = %token.app_id(), file_count = data.len(), "アップロードURLを発行");
    Ok(Json(UploadFilesResponse { data }))
}

/// POST /v6/completeMultipart — アップロード完了時刻を記録する。
pub async fn handle_complete_multipart(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CompleteMultipartRequest>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    let now = now_millis();
    let updated = records::update_file_record(state.metadata_store.as_ref(), &request.file_key, |r| {
        r.uploaded_at = Some(now)
    })
    .await?;
    if updated.is_none() {
        tracing::debug!(file_key = %request.file_key, "FileRecordがないため完了時刻を記録しません");
    }
    Ok(Json(SuccessResponse { success: true }))
}

/// POST /v6/failureCallback — アップロード失敗を記録する。
pub async fn handle_failure_callback(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<FailureCallbackRequest>,
) -> Result<Json<SuccessResponse>, GatewayError> {
    callback::record_failure(
        state.metadata_store.as_ref(),
        &request.file_key,
        serde_json::json!("Upload failed"),
        request.upload_id,
        now_millis(),
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

// ---------------------------------------------------------------------------
// 参照
// ---------------------------------------------------------------------------

/// POST /v6/listFiles — キー順のページング一覧。
pub async fn handle_list_files(
    State(state): State<Arc<GatewayState>>,
    request: Option<Json<ListFilesRequest>>,
) -> Result<Json<ListFilesResponse>, GatewayError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let all = records::list_file_records(state.metadata_store.as_ref()).await?;
    let has_more = all.len() > request.offset.saturating_add(request.limit);

    let files = all
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .map(|record| ListedFile {
            id: record.key.clone(),
            custom_id: record.custom_id,
            key: record.key,
            name: record.name,
            size: record.size,
            status: "Uploaded".to_string(),
            uploaded_at: record.uploaded_at,
        })
        .collect();

    Ok(Json(ListFilesResponse { has_more, files }))
}

/// POST /v6/getUsageInfo — 保存済みファイルの合計。
pub async fn handle_usage_info(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<UsageInfo>, GatewayError> {
    let all = records::list_file_records(state.metadata_store.as_ref()).await?;
    let total_bytes = all.iter().map(|r| r.size).sum();
    Ok(Json(UsageInfo {
        total_bytes,
        app_total_bytes: total_bytes,
        files_uploaded: all.len() as u64,
        limit_bytes: -1,
    }))
}

/// POST /v6/requestFileAccess — ファイルのURLを返す。
pub async fn handle_request_file_access(
    State(state): State<Arc<GatewayState>>,
    Extension(token): Extension<UploadToken>,
    Json(request): Json<FileAccessRequest>,
) -> Result<Json<FileAccessResponse>, GatewayError> {
    if request.file_key.is_none() && request.custom_id.is_none() {
        return Err(GatewayError::BadRequest(
            "Must provide fileKey or customId".to_string(),
        ));
    }
    let key = resolve_target(&state, request.file_key.as_deref(), request.custom_id.as_deref())
        .await?
        .ok_or_else(|| GatewayError::NotFound("File not found".to_string()))?;

    Ok(Json(FileAccessResponse {
        url: state.config.file_url(&key),
        ufs_url: state.config.ufs_url(token.app_id(), &key),
    }))
}

/// GET /v6/pollUpload/{fileKey} — アップロード状況。
pub async fn handle_poll_upload(
    State(state): State<Arc<GatewayState>>,
    Path(file_key): Path<String>,
) -> Result<Json<PollUploadResponse>, GatewayError> {
    let record = records::get_file_record(state.metadata_store.as_ref(), &file_key)
        .await?
        .ok_or_else(|| GatewayError::NotFound("File not found".to_string()))?;

    let done = record.uploaded_at.is_some();
    let file = done.then(|| PolledFile {
        file_url: state.config.file_url(&record.key),
        file_key: record.key,
        file_name: record.name,
        file_size: record.size,
        file_type: record.file_type,
        custom_id: record.custom_id,
    });

    Ok(Json(PollUploadResponse {
        status: (if done { "done" } else { "still working" }).to_string(),
        file,
        metadata: None,
        callback_data: None,
    }))
}

// ---------------------------------------------------------------------------
// 変更
// ---------------------------------------------------------------------------

/// POST /v6/deleteFiles — オブジェクトとFileRecordを削除する。
///
/// 個別の削除失敗はログに残して次へ進む。
pub async fn handle_delete_files(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<DeleteFilesRequest>,
) -> Result<Json<DeleteFilesResponse>, GatewayError> {
    let keys = match (request.file_keys, request.custom_ids) {
        (Some(keys), _) => keys,
        (None, Some(custom_ids)) => {
            let mut keys = Vec::with_capacity(custom_ids.len());
            for id in &custom_ids {
                match records::resolve_custom_id(state.metadata_store.as_ref(), id).await? {
                    Some(key) => keys.push(key),
                    None => tracing::debug!(custom_id = %id, "customIdに対応するファイルがありません"),
                }
            }
            keys
        }
        (None, None) => {
            return Err(GatewayError::BadRequest(
                "Must provide fileKeys or customIds".to_string(),
            ))
        }
    };

    let mut deleted_count = 0;
    for key in &keys {
        if let Err(e) = state.blob_store.delete(key).await {
            tracing::error!(file_key = %key, error = %e, "オブジェクトの削除に失敗");
            continue;
        }
        if let Err(e) = records::delete_file_record(state.metadata_store.as_ref(), key).await {
            tracing::error!(file_key = %key, error = %e, "FileRecordの削除に失敗");
            continue;
        }
        deleted_count += 1;
    }

    tracing::info!(requested = keys.len(), deleted_count, "ファイルを削除");
    Ok(Json(DeleteFilesResponse {
        success: true,
        deleted_count,
    }))
}

/// POST /v6/renameFiles — 表示名を変更する。
pub async fn handle_rename_files(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<RenameFilesRequest>,
) -> Result<Json<RenameFilesResponse>, GatewayError> {
    let updates = request
        .updates
        .ok_or_else(|| GatewayError::BadRequest("Updates required".to_string()))?;

    let mut renamed_count = 0;
    for RenameUpdate {
        file_key,
        custom_id,
        new_name,
    } in updates
    {
        let Some(new_name) = new_name.filter(|n| !n.is_empty()) else {
            continue;
        };
        let Some(key) = resolve_target(&state, file_key.as_deref(), custom_id.as_deref()).await? else {
            continue;
        };
        let updated =
            records::update_file_record(state.metadata_store.as_ref(), &key, |r| r.name = new_name)
                .await?;
        if updated.is_some() {
            renamed_count += 1;
        }
    }

    Ok(Json(RenameFilesResponse {
        success: true,
        renamed_count,
    }))
}

/// POST /v6/updateACL — ACLを変更する。
pub async fn handle_update_acl(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<UpdateAclRequest>,
) -> Result<Json<UpdateAclResponse>, GatewayError> {
    let updates = request
        .updates
        .ok_or_else(|| GatewayError::BadRequest("Updates required".to_string()))?;

    let mut updated_count = 0;
    for AclUpdate {
        file_key,
        custom_id,
        acl,
    } in updates
    {
        let Some(acl) = acl.filter(|a| !a.is_empty()) else {
            continue;
        };
        let Some(key) = resolve_target(&state, file_key.as_deref(), custom_id.as_deref()).await? else {
            continue;
        };
        let updated =
            records::update_file_record(state.metadata_store.as_ref(), &key, |r| r.acl = Some(acl))
                .await?;
        if updated.is_some() {
            updated_count += 1;
        }
    }

    Ok(Json(UpdateAclResponse {
        success: true,
        updated_count,
    }))
}
