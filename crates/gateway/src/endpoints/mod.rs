//! # Gatewayエンドポイント
//!
//! | パス | 認証 | 処理 |
//! |------|------|------|
//! | `GET /` | なし | サービス情報 |
//! | `PUT /{fileKey}`, `HEAD /{fileKey}` | 署名付きURL | アップロード受付 |
//! | `GET /f/{fileKey}` | なし | ファイル配信 |
//! | `POST /route-metadata`, `POST /callback-result` | なし | メタデータ登録・失敗通知 |
//! | `/v6/*`, `/v7/*` | APIキー | 管理API |

pub mod download;
pub mod ingest;
pub mod route_metadata;
pub mod service_info;
pub mod v6;
pub mod v7;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_api_key;
use crate::config::GatewayState;

pub use download::handle_download;
pub use ingest::{handle_upload, handle_upload_head};
pub use route_metadata::{handle_callback_result, handle_route_metadata};
pub use service_info::handle_service_info;

/// 全ルートを組み立てる。
pub fn router(state: Arc<GatewayState>) -> Router {
    let management = Router::new()
        .route("/v6/uploadFiles", post(v6::handle_upload_files))
        .route("/v6/deleteFiles", post(v6::handle_delete_files))
        .route("/v6/listFiles", post(v6::handle_list_files))
        .route("/v6/getUsageInfo", post(v6::handle_usage_info))
        .route("/v6/requestFileAccess", post(v6::handle_request_file_access))
        .route("/v6/pollUpload/{file_key}", get(v6::handle_poll_upload))
        .route("/v6/renameFiles", post(v6::handle_rename_files))
        .route("/v6/updateACL", post(v6::handle_update_acl))
        .route("/v6/completeMultipart", post(v6::handle_complete_multipart))
        .route("/v6/failureCallback", post(v6::handle_failure_callback))
        .route("/v7/getAppInfo", post(v7::handle_app_info))
        .route("/v7/prepareUpload", post(v7::handle_prepare_upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    // アップロード本文はストリームで扱うため本文サイズの上限を外す
    let ingest = Router::new()
        .route("/{file_key}", put(handle_upload).head(handle_upload_head))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/", get(handle_service_info))
        .route("/f/{file_key}", get(handle_download))
        .route("/route-metadata", post(handle_route_metadata))
        .route("/callback-result", post(handle_callback_result))
        .merge(management)
        .merge(ingest)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
