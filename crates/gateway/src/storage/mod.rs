//! # オブジェクトストレージ
//!
//! アップロードされたファイル本体を保持するストアの抽象インターフェース。
//! 実装は [`memory`]（プロセス内）と `s3`（S3互換、feature `vendor-aws`）。
//!
//! 本体は常に [`ByteStream`] として受け渡し、全量をメモリに載せることを前提にしない。

pub mod memory;
#[cfg(feature = "vendor-aws")]
pub mod s3;

pub use memory::MemoryBlobStore;
#[cfg(feature = "vendor-aws")]
pub use s3::S3BlobStore;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use fukusu_crypto::ContentHasher;

use crate::error::StorageError;

/// 本体のバイトストリーム。
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// 既定のContent-Type
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 既定のContent-Disposition
pub const DEFAULT_CONTENT_DISPOSITION: &str = "inline";

/// オブジェクトに付随するカスタム属性。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// アップロード時のファイル名
    pub original_name: String,
    /// アップロード元の識別子
    pub uploaded_by: String,
    /// ルートスラグ
    pub slug: String,
    pub custom_id: Option<String>,
    /// アップロード時刻（UNIXエポックからのミリ秒）
    pub upload_timestamp: u64,
}

impl ObjectAttributes {
    const ORIGINAL_NAME: &'static str = "original-name";
    const UPLOADED_BY: &'static str = "uploaded-by";
    const SLUG: &'static str = "slug";
    const CUSTOM_ID: &'static str = "custom-id";
    const UPLOAD_TIMESTAMP: &'static str = "upload-timestamp";

    /// 文字列キーの組へ展開する（S3のユーザーメタデータ等に使う）。
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (Self::ORIGINAL_NAME, self.original_name.clone()),
            (Self::UPLOADED_BY, self.uploaded_by.clone()),
            (Self::SLUG, self.slug.clone()),
            (Self::CUSTOM_ID, self.custom_id.clone().unwrap_or_default()),
            (Self::UPLOAD_TIMESTAMP, self.upload_timestamp.to_string()),
        ]
    }

    /// [`to_pairs`](Self::to_pairs) の逆変換。未知のキーは無視する。
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut attrs = Self::default();
        for (name, value) in pairs {
            match name.to_ascii_lowercase().as_str() {
                Self::ORIGINAL_NAME => attrs.original_name = value.to_string(),
                Self::UPLOADED_BY => attrs.uploaded_by = value.to_string(),
                Self::SLUG => attrs.slug = value.to_string(),
                Self::CUSTOM_ID if !value.is_empty() => attrs.custom_id = Some(value.to_string()),
                Self::UPLOAD_TIMESTAMP => attrs.upload_timestamp = value.parse().unwrap_or(0),
                _ => {}
            }
        }
        attrs
    }
}

/// put時のオプション。
#[derive(Debug, Clone)]
pub struct PutOptions {
    pub content_type: String,
    pub content_disposition: String,
    pub attributes: ObjectAttributes,
}

/// ストアが報告するチェックサム。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// 小文字hex文字列として報告された
    Hex(String),
    /// 生のバイト列として報告された
    Raw(Vec<u8>),
}

impl Checksum {
    pub fn to_hex(&self) -> String {
        match self {
            Checksum::Hex(s) => s.to_ascii_lowercase(),
            Checksum::Raw(bytes) => hex::encode(bytes),
        }
    }
}

/// put の結果。
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// 書き込んだバイト数
    pub size: u64,
    /// ストアが計算したSHA-256（報告しないストアもある）
    pub checksum: Option<Checksum>,
}

/// オブジェクトのメタ情報。
#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size: u64,
    pub content_type: String,
    pub content_disposition: String,
    pub etag: Option<String>,
    /// 既知であればSHA-256の小文字hex
    pub checksum: Option<String>,
    pub attributes: ObjectAttributes,
}

/// 取得したオブジェクト。
pub struct StoredObject {
    pub head: ObjectHead,
    /// 範囲指定時はその範囲のみ
    pub body: ByteStream,
}

/// 取得範囲（`offset` から `length` バイト）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

/// オブジェクトストレージの抽象インターフェース。
///
/// 同一キーへの並行putは後勝ち。
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// ストリームを最後まで書き込む。途中でストリームがエラーを返した場合は失敗する。
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        options: PutOptions,
    ) -> Result<PutOutcome, StorageError>;

    /// オブジェクトを取得する。存在しなければ `None`。
    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<StoredObject>, StorageError>;

    /// メタ情報のみ取得する。存在しなければ `None`。
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError>;

    /// 削除する。存在しないキーの削除は成功扱い。
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// 2つのストリームを順に連結する。`first` を読み切ってから `second` を読む。
pub fn concat_streams(first: ByteStream, second: ByteStream) -> ByteStream {
    first.chain(second).boxed()
}

/// 保存済みオブジェクトを読み直してSHA-256を計算する。
pub async fn content_hash(store: &dyn BlobStore, key: &str) -> Result<Option<String>, StorageError> {
    let Some(object) = store.get(key, None).await? else {
        return Ok(None);
    };
    let mut hasher = ContentHasher::new();
    let mut body = object.body;
    while let Some(chunk) = body.next().await {
        hasher.update(&chunk?);
    }
    Ok(Some(hasher.finalize_hex()))
}

/// 単一のバイト列からストリームを作る。
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data: Bytes = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}
