//! # POST /route-metadata, POST /callback-result
//!
//! オリジンサーバーからのメタデータ登録と失敗通知。

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fukusu_core::now_millis;
use fukusu_types::{AckResponse, CallbackResultRequest, RouteMetadataRequest};

use crate::callback;
use crate::config::GatewayState;
use crate::dev_stream::{self, NDJSON_CONTENT_TYPE};
use crate::error::GatewayError;

/// POST /route-metadata — メタデータ登録。
///
/// `isDev` の場合はアップロード完了を流すNDJSONストリームを返す。
pub async fn handle_route_metadata(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<RouteMetadataRequest>,
) -> Response {
    if let Err(e) =
        callback::register_metadata(state.metadata_store.as_ref(), &request, now_millis()).await
    {
        tracing::error!(error = %e, "メタデータの登録に失敗");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AckResponse {
                ok: false,
                error: Some(e.to_string()),
            }),
        )
            .into_response();
    }

    if request.is_dev {
        let body = dev_stream::spawn_upload_watch(Arc::clone(&state), request.file_keys);
        return (
            [(CONTENT_TYPE, NDJSON_CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
            body,
        )
            .into_response();
    }

    Json(AckResponse::ok()).into_response()
}

/// POST /callback-result — アップロード失敗の記録。
pub async fn handle_callback_result(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CallbackResultRequest>,
) -> Result<Json<AckResponse>, GatewayError> {
    callback::record_failure(
        state.metadata_store.as_ref(),
        &request.file_key,
        request.error,
        None,
        now_millis(),
    )
    .await?;
    Ok(Json(AckResponse::ok()))
}
