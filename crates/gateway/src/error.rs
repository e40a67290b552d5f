//! # Gateway エラー型
//!
//! ハンドラが返す [`GatewayError`] と、ストアのトレイトが返す [`StorageError`]。

use axum::http::StatusCode;

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// APIキーの欠落・トークン形式不正
    #[error("{0}")]
    Unauthorized(String),
    /// APIキー不一致・署名不一致・期限切れ
    #[error("{0}")]
    Forbidden(String),
    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
    /// 対象が存在しない
    #[error("{0}")]
    NotFound(String),
    /// ストレージ操作に失敗
    #[error("ストレージ操作に失敗: {0}")]
    Storage(String),
    /// 内部エラー
    #[error("内部エラー: {0}")]
    Internal(String),
    /// Webhook送信に失敗（ログにのみ残り、クライアントには返らない）
    #[error("コールバック送信に失敗: {0}")]
    Callback(String),
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Storage(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Callback(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "リクエスト処理に失敗");
        }
        (status, self.to_string()).into_response()
    }
}

/// BlobStore / MetadataStore のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// バックエンド（S3、Redis等）がエラーを返した
    #[error("バックエンドエラー: {0}")]
    Backend(String),
    /// 入力ストリームの読み取りに失敗
    #[error("ストリーム読み取りエラー: {0}")]
    Stream(String),
    /// 保存済みレコードのデシリアライズに失敗
    #[error("レコードの変換に失敗: {0}")]
    Serialization(String),
}

impl From<StorageError> for GatewayError {
    fn from(e: StorageError) -> Self {
        GatewayError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    /// 各バリアントが期待するステータスコードに変換されることを確認
    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::Unauthorized("Missing API key".into()), 401),
            (GatewayError::Forbidden("Invalid signature".into()), 403),
            (GatewayError::BadRequest("x".into()), 400),
            (GatewayError::NotFound("x".into()), 404),
            (GatewayError::Storage("x".into()), 500),
            (GatewayError::Internal("x".into()), 500),
            (GatewayError::Callback("x".into()), 502),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status().as_u16(), status);
        }
    }

    /// 認可系エラーの本文がメッセージそのものであることを確認
    #[test]
    fn test_auth_messages_are_verbatim() {
        assert_eq!(
            GatewayError::Forbidden("Invalid signature".into()).to_string(),
            "Invalid signature"
        );
        let storage: GatewayError = StorageError::Backend("down".into()).into();
        assert!(matches!(storage, GatewayError::Storage(_)));
    }
}
