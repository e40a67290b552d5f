//! # GET /
//!
//! サービス情報の公開。死活監視にも使う。

use axum::Json;
use fukusu_types::ServiceInfo;

/// GET / — サービス情報。
pub async fn handle_service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        status: "ok".to_string(),
        service: "fukusu ingest".to_string(),
        github: "https://github.com/heliumoss/fukusu".to_string(),
    })
}
