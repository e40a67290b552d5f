//! # Fukusu 共有型定義
//!
//! Ingest Gatewayのワイヤフォーマット（HTTPリクエスト/レスポンス、Webhookペイロード、
//! メタデータストアに保存するレコード）をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - JSONのフィールド名はcamelCase（UploadThing SDKとの互換性のため）
//! - タイムスタンプはUNIXエポックからのミリ秒

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// アップロード (PUT /{fileKey})
// ---------------------------------------------------------------------------

/// PUTアップロード成功時のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPutResult {
    /// 公開URL
    pub url: String,
    /// アプリ単位のURL
    pub app_url: String,
    /// UFS形式のURL
    pub ufs_url: String,
    /// コンテンツハッシュ（SHA-256、計算失敗時は空文字列）
    pub file_hash: String,
    /// オリジンサーバーから返されたデータ（現状は常にnull）
    pub server_data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// メタデータ登録 (POST /route-metadata, POST /callback-result)
// ---------------------------------------------------------------------------

/// POST /route-metadata のリクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMetadataRequest {
    /// これからアップロードされるファイルキー
    pub file_keys: Vec<String>,
    /// ミドルウェアが付与した任意のメタデータ
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// 開発モード（NDJSONストリームで完了イベントを返す）
    #[serde(default)]
    pub is_dev: bool,
    /// コールバック送信先URL
    #[serde(default)]
    pub callback_url: Option<String>,
    /// コールバックのルートスラグ
    #[serde(default)]
    pub callback_slug: Option<String>,
    /// 呼び出し側がサーバーデータを待つか
    #[serde(default)]
    pub await_server_data: bool,
}

/// 単純な確認応答。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { ok: true, error: None }
    }
}

/// POST /callback-result のリクエスト。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResultRequest {
    pub file_key: String,
    #[serde(default)]
    pub error: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Webhookペイロード
// ---------------------------------------------------------------------------

/// 署名付きWebhookの本文。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    /// 常に "uploaded"
    pub status: String,
    pub file: CallbackFile,
    /// 送信元の識別子（GatewayのベースURL）
    pub origin: String,
    /// PendingMetadataから取り出したミドルウェアのメタデータ
    pub metadata: serde_json::Value,
}

/// Webhookに含めるファイル記述子。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackFile {
    pub key: String,
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub last_modified: u64,
    pub custom_id: Option<String>,
    pub url: String,
    pub app_url: String,
    pub ufs_url: String,
    pub file_hash: String,
}

/// 開発モードのNDJSONストリームの1行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFetchStreamPart {
    /// 署名対象のJSON文字列（そのまま検証に使う）
    pub payload: String,
    /// `hmac-sha256=<hex>`
    pub signature: String,
    pub hook: HookType,
}

/// ストリーム行・Webhookの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookType {
    Callback,
    Error,
}

impl HookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::Callback => "callback",
            HookType::Error => "error",
        }
    }
}

/// ポーリング失敗時にストリームへ流すエラーペイロード。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamErrorPayload {
    pub error: String,
    pub file_keys: Vec<String>,
}

// ---------------------------------------------------------------------------
// メタデータストアのレコード
// ---------------------------------------------------------------------------

/// `file:<key>` に保存するファイルレコード。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub key: String,
    /// 表示名（renameFilesで変更可能）
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    /// アップロード完了時刻。未設定なら処理中とみなす
    #[serde(default)]
    pub uploaded_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
}

/// `metadata:<key>` に保存する登録済みメタデータ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMetadata {
    #[serde(default)]
    pub middleware_metadata: serde_json::Value,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub callback_slug: Option<String>,
    #[serde(default)]
    pub await_server_data: bool,
    pub registered_at: u64,
}

/// `error:<key>` に保存する失敗記録。参照用のみ。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// APIトークン
// ---------------------------------------------------------------------------

/// 構造化トークンのJSON表現（`genkey`が出力する形式）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub app_id: String,
    pub api_key: String,
    /// 単一のリージョン名（パース時に1要素のリストになる）
    pub regions: String,
}

// ---------------------------------------------------------------------------
// サービス情報 (GET /)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub status: String,
    pub service: String,
    pub github: String,
}

// ---------------------------------------------------------------------------
// 管理API v6
// ---------------------------------------------------------------------------

/// POST /v6/deleteFiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesRequest {
    #[serde(default)]
    pub file_keys: Option<Vec<String>>,
    #[serde(default)]
    pub custom_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilesResponse {
    pub success: bool,
    pub deleted_count: u64,
}

/// POST /v6/listFiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesRequest {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_list_limit() -> usize {
    20
}

impl Default for ListFilesRequest {
    fn default() -> Self {
        Self {
            limit: default_list_limit(),
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub has_more: bool,
    pub files: Vec<ListedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedFile {
    pub id: String,
    pub custom_id: Option<String>,
    pub key: String,
    pub name: String,
    pub size: u64,
    pub status: String,
    pub uploaded_at: Option<u64>,
}

/// POST /v6/getUsageInfo
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfo {
    pub total_bytes: u64,
    pub app_total_bytes: u64,
    pub files_uploaded: u64,
    /// 上限なしは -1
    pub limit_bytes: i64,
}

/// POST /v6/requestFileAccess
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessRequest {
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccessResponse {
    pub url: String,
    pub ufs_url: String,
}

/// GET /v6/pollUpload/{fileKey}
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUploadResponse {
    /// "done" または "still working"
    pub status: String,
    pub file: Option<PolledFile>,
    pub metadata: Option<serde_json::Value>,
    pub callback_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledFile {
    pub file_key: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub file_url: String,
    pub custom_id: Option<String>,
}

/// POST /v6/renameFiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenameFilesRequest {
    #[serde(default)]
    pub updates: Option<Vec<RenameUpdate>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameUpdate {
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub new_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFilesResponse {
    pub success: bool,
    pub renamed_count: u64,
}

/// POST /v6/updateACL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAclRequest {
    #[serde(default)]
    pub updates: Option<Vec<AclUpdate>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclUpdate {
    #[serde(default)]
    pub file_key: Option<String>,
    #[serde(default)]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAclResponse {
    pub success: bool,
    pub updated_count: u64,
}

/// POST /v6/uploadFiles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFilesRequest {
    #[serde(default)]
    pub files: Option<Vec<UploadFileSpec>>,
    #[serde(default = "default_upload_acl")]
    pub acl: String,
    #[serde(default = "default_content_disposition")]
    pub content_disposition: String,
}

fn default_upload_acl() -> String {
    "private".to_string()
}

fn default_content_disposition() -> String {
    "inline".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFileSpec {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub custom_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFilesResponse {
    pub data: Vec<PreparedUpload>,
}

/// uploadFilesが返すファイルごとのアップロード枠。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedUpload {
    pub key: String,
    pub file_name: String,
    pub file_type: String,
    pub file_url: String,
    /// 署名付きPUT URL
    pub url: String,
    pub custom_id: Option<String>,
    pub content_disposition: String,
    pub polling_jwt: String,
    pub polling_url: String,
    pub fields: serde_json::Value,
}

/// POST /v6/completeMultipart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub file_key: String,
}

/// POST /v6/failureCallback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCallbackRequest {
    pub file_key: String,
    #[serde(default)]
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// 管理API v7
// ---------------------------------------------------------------------------

/// POST /v7/getAppInfo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    #[serde(rename = "appId")]
    pub app_id: String,
    #[serde(rename = "defaultACL")]
    pub default_acl: String,
    #[serde(rename = "allowACLOverride")]
    pub allow_acl_override: bool,
}

/// POST /v7/prepareUpload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
    #[serde(default)]
    pub content_disposition: Option<String>,
    /// 署名付きURLの有効期間（秒）
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareUploadResponse {
    pub key: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// FileRecordがcamelCaseでシリアライズされ、省略可能フィールドが出力されないことを確認
    #[test]
    fn test_file_record_wire_format() {
        let record = FileRecord {
            key: "abc".to_string(),
            name: "photo.png".to_string(),
            size: 3,
            file_type: "image/png".to_string(),
            custom_id: None,
            uploaded_at: Some(1_700_000_000_000),
            file_hash: Some("deadbeef".to_string()),
            acl: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "image/png");
        assert_eq!(json["uploadedAt"], 1_700_000_000_000u64);
        assert_eq!(json["fileHash"], "deadbeef");
        assert!(json.get("customId").is_none());
        assert!(json.get("acl").is_none());
    }

    /// ストリーム行のhookが小文字で出力されることを確認
    #[test]
    fn test_stream_part_hook_lowercase() {
        let part = MetadataFetchStreamPart {
            payload: "{}".to_string(),
            signature: "hmac-sha256=00".to_string(),
            hook: HookType::Error,
        };
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["hook"], "error");
    }

    /// 省略されたフィールドにデフォルト値が入ることを確認
    #[test]
    fn test_request_defaults() {
        let req: RouteMetadataRequest =
            serde_json::from_str(r#"{"fileKeys":["k1"]}"#).unwrap();
        assert!(!req.is_dev);
        assert!(req.callback_url.is_none());
        assert!(req.metadata.is_null());

        let req: ListFilesRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.limit, 20);
        assert_eq!(req.offset, 0);

        let req: UploadFilesRequest = serde_json::from_str(r#"{"files":[]}"#).unwrap();
        assert_eq!(req.acl, "private");
        assert_eq!(req.content_disposition, "inline");
    }

    /// AppInfoのフィールド名がSDKの期待する表記になることを確認
    #[test]
    fn test_app_info_field_names() {
        let info = AppInfo {
            app_id: "fukusu-app".to_string(),
            default_acl: "public-read".to_string(),
            allow_acl_override: false,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["appId"], "fukusu-app");
        assert_eq!(json["defaultACL"], "public-read");
        assert_eq!(json["allowACLOverride"], false);
    }
}
