//! # APIトークンのコーデック
//!
//! `x-uploadthing-api-key` ヘッダーや署名付きURLに埋め込まれる不透明トークンを扱う。
//!
//! ## トークン形式
//! - Simple: 共有シークレットそのもの（64文字以下、`.` を含まない、英数字と `-` `_` のみ）
//! - Structured: `{"appId", "apiKey", "regions"}` をBase64エンコードしたJSON

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use fukusu_types::TokenClaims;
use subtle::ConstantTimeEq;

/// 省略時のアプリID
pub const DEFAULT_APP_ID: &str = "fkapp";

/// 省略時のリージョン
pub const DEFAULT_REGION: &str = "fukusu-server";

/// Simple形式とみなす最大長
const SIMPLE_TOKEN_MAX_LEN: usize = 64;

/// パディングの有無を問わないStandard Base64エンジン
fn b64_lenient() -> GeneralPurpose {
    GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    )
}

/// パース済みのAPIトークン。リクエストの処理中だけ存在し、永続化されない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadToken {
    /// 素のシークレット
    Simple { api_key: String },
    /// Base64-JSON形式
    Structured {
        app_id: String,
        api_key: String,
        regions: Vec<String>,
    },
}

impl UploadToken {
    pub fn api_key(&self) -> &str {
        match self {
            UploadToken::Simple { api_key } | UploadToken::Structured { api_key, .. } => api_key,
        }
    }

    pub fn app_id(&self) -> &str {
        match self {
            UploadToken::Simple { .. } => DEFAULT_APP_ID,
            UploadToken::Structured { app_id, .. } => app_id,
        }
    }

    /// 空にならないリージョン列
    pub fn regions(&self) -> Vec<&str> {
        match self {
            UploadToken::Simple { .. } => vec![DEFAULT_REGION],
            UploadToken::Structured { regions, .. } => {
                regions.iter().map(String::as_str).collect()
            }
        }
    }
}

fn is_simple_shape(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= SIMPLE_TOKEN_MAX_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// 生のトークン文字列をパースする。不正な形式なら `None`。
pub fn parse_token(raw: &str) -> Option<UploadToken> {
    if is_simple_shape(raw) {
        return Some(UploadToken::Simple {
            api_key: raw.to_string(),
        });
    }

    let decoded = b64_lenient().decode(raw.trim()).ok()?;
    let parsed: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let object = parsed.as_object()?;
    let api_key = object.get("apiKey")?.as_str()?.to_string();

    let app_id = object
        .get("appId")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_APP_ID)
        .to_string();

    let regions = match object.get("regions").and_then(|v| v.as_str()) {
        Some(region) => vec![region.to_string()],
        None => vec![DEFAULT_REGION.to_string()],
    };

    Some(UploadToken::Structured {
        app_id,
        api_key,
        regions,
    })
}

/// APIキーが設定済みシークレットと一致するか（定数時間比較）。
pub fn validate_api_key(api_key: &str, secret: &str) -> bool {
    api_key.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Structured形式のトークンを生成する。
pub fn encode_token(claims: &TokenClaims) -> String {
    // TokenClaimsは文字列のみで構成されるためシリアライズは失敗しない
    let json = serde_json::to_vec(claims).unwrap_or_default();
    base64::engine::general_purpose::STANDARD.encode(json)
}
