//! # 管理APIの認証
//!
//! `/v6/*`・`/v7/*` へのリクエストを `x-uploadthing-api-key` ヘッダーで認証する。
//!
//! | 状態 | ステータス |
//! |------|-----------|
//! | ヘッダーなし | 401 `Missing API key` |
//! | トークンとして解釈できない | 401 `Invalid API token format` |
//! | APIキーが共有シークレットと一致しない | 403 `Invalid API key` |
//!
//! 認証に成功したリクエストにはパース済みの [`UploadToken`] が拡張として付与される。

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use fukusu_core::{parse_token, validate_api_key, UploadToken};

use crate::config::GatewayState;
use crate::error::GatewayError;

/// APIキーのヘッダー名
pub const API_KEY_HEADER: &str = "x-uploadthing-api-key";

/// ヘッダーの値を検証し、成功すれば [`UploadToken`] を返す。
pub(crate) fn authenticate(raw: Option<&[u8]>, secret: &str) -> Result<UploadToken, GatewayError> {
    let raw = raw.ok_or_else(|| GatewayError::Unauthorized("Missing API key".to_string()))?;
    let token = std::str::from_utf8(raw)
        .ok()
        .and_then(parse_token)
        .ok_or_else(|| GatewayError::Unauthorized("Invalid API token format".to_string()))?;

    if !validate_api_key(token.api_key(), secret) {
        return Err(GatewayError::Forbidden("Invalid API key".to_string()));
    }
    Ok(token)
}

/// APIキー認証ミドルウェア。
pub async fn require_api_key(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let raw = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes());

    let token = match authenticate(raw, &state.config.secret) {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), reason = %e, "APIキー認証に失敗");
            return Err(e);
        }
    };

    tracing::debug!(app_id = %token.app_id(), "APIキー認証に成功");
    request.extensions_mut().insert(token);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fukusu_core::encode_token;
    use fukusu_types::TokenClaims;

    const SECRET: &str = "sk_test_secret";

    /// 各失敗パターンのステータスを確認
    #[test]
    fn test_authenticate_failures() {
        assert!(matches!(
            authenticate(None, SECRET),
            Err(GatewayError::Unauthorized(m)) if m == "Missing API key"
        ));
        assert!(matches!(
            authenticate(Some(b"not.a.token!"), SECRET),
            Err(GatewayError::Unauthorized(m)) if m == "Invalid API token format"
        ));
        assert!(matches!(
            authenticate(Some(&[0xff, 0xfe]), SECRET),
            Err(GatewayError::Unauthorized(_))
        ));
        assert!(matches!(
            authenticate(Some(b"sk_wrong"), SECRET),
            Err(GatewayError::Forbidden(m)) if m == "Invalid API key"
        ));
    }

    /// Simple・Structured両形式で認証できることを確認
    #[test]
    fn test_authenticate_success() {
        let token = authenticate(Some(SECRET.as_bytes()), SECRET).unwrap();
        assert_eq!(token.app_id(), "fkapp");

        let structured = encode_token(&TokenClaims {
            app_id: "app9".to_string(),
            api_key: SECRET.to_string(),
            regions: "eu".to_string(),
        });
        let token = authenticate(Some(structured.as_bytes()), SECRET).unwrap();
        assert_eq!(token.app_id(), "app9");
        assert_eq!(token.regions(), vec!["eu"]);
    }
}
