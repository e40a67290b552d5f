//! # 管理API v7

use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use fukusu_core::{generate_file_key, UploadToken};
use fukusu_types::{AppInfo, PrepareUploadRequest, PrepareUploadResponse};

use super::v6::presign_upload;
use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::storage::{DEFAULT_CONTENT_DISPOSITION, DEFAULT_CONTENT_TYPE};

/// POST /v7/getAppInfo — 固定のアプリ情報。
pub async fn handle_app_info() -> Json<AppInfo> {
    Json(AppInfo {
        app_id: "fukusu-app".to_string(),
        default_acl: "public-read".to_string(),
        allow_acl_override: false,
    })
}

/// POST /v7/prepareUpload — 単一ファイルのキーと署名付きURLを発行する。
pub async fn handle_prepare_upload(
    State(state): State<Arc<GatewayState>>,
    Extension(token): Extension<UploadToken>,
    Json(request): Json<PrepareUploadRequest>,
) -> Result<Json<PrepareUploadResponse>, GatewayError> {
    let key = generate_file_key();
    let size = request.file_size.to_string();
    let params = [
        ("x-ut-identifier", token.app_id()),
        ("x-ut-file-name", request.file_name.as_str()),
        ("x-ut-file-size", size.as_str()),
        (
            "x-ut-file-type",
            request.file_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE),
        ),
        ("x-ut-acl", request.acl.as_deref().unwrap_or("private")),
        (
            "x-ut-content-disposition",
            request
                .content_disposition
                .as_deref()
                .unwrap_or(DEFAULT_CONTENT_DISPOSITION),
        ),
    ];
    let expires_in = request
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(state.config.presign_expiry_secs);
    let url = presign_upload(&state.config, &key, &params, expires_in)?;

    Ok(Json(PrepareUploadResponse { key, url }))
}
