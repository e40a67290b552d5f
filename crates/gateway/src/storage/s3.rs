//! # S3互換 BlobStore 実装
//!
//! AWS S3, MinIO, Cloudflare R2 等のS3互換APIを使用するBlobStore実装。
//! カスタム属性は `x-amz-meta-*` ヘッダーとして保存する（値はパーセントエンコード）。

use std::sync::{Arc, Mutex};

use futures::{StreamExt, TryStreamExt};
use fukusu_crypto::ContentHasher;
use s3::error::S3Error;
use tokio_util::io::StreamReader;

use super::{
    BlobStore, ByteRange, ByteStream, Checksum, ObjectAttributes, ObjectHead,
    PutOptions, PutOutcome, StoredObject, DEFAULT_CONTENT_DISPOSITION, DEFAULT_CONTENT_TYPE,
};
use crate::error::StorageError;

/// ユーザーメタデータヘッダーのプレフィックス
const META_PREFIX: &str = "x-amz-meta-";

/// S3互換ストレージによるBlobStore実装。
pub struct S3BlobStore {
    bucket: s3::Bucket,
}

impl S3BlobStore {
    pub fn new(bucket: s3::Bucket) -> Self {
        Self { bucket }
    }

    /// S3互換バケットを初期化する。
    fn init_bucket(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket_name: &str,
    ) -> anyhow::Result<s3::Bucket> {
        // AWS S3エンドポイント（s3.REGION.amazonaws.com）からリージョンを自動検出。
        // 非AWSエンドポイント（R2, MinIO）ではus-east-1をフォールバックとして使用。
        let detected_region = std::env::var("S3_REGION").ok().unwrap_or_else(|| {
            endpoint
                .find("s3.")
                .and_then(|start| {
                    let rest = &endpoint[start + 3..];
                    rest.find(".amazonaws.com").map(|end| rest[..end].to_string())
                })
                .unwrap_or_else(|| "us-east-1".to_string())
        });
        let region = s3::Region::Custom {
            region: detected_region,
            endpoint: endpoint.to_string(),
        };

        let credentials =
            s3::creds::Credentials::new(Some(access_key), Some(secret_key), None, None, None)?;

        let bucket = s3::Bucket::new(bucket_name, region, credentials)?.with_path_style();

        Ok(*bucket)
    }

    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint =
            std::env::var("S3_ENDPOINT").unwrap_or_else(|_| "http://localhost:9000".to_string());
        let access_key =
            std::env::var("S3_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string());
        let secret_key =
            std::env::var("S3_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string());
        let bucket_name =
            std::env::var("S3_BUCKET").unwrap_or_else(|_| "fukusu-uploads".to_string());

        tracing::info!(s3_endpoint = %endpoint, bucket = %bucket_name, "S3互換ストレージを使用");

        let bucket = Self::init_bucket(&endpoint, &access_key, &secret_key, &bucket_name)?;
        Ok(Self::new(bucket))
    }

    /// HEADでメタ情報を取得する。
    async fn fetch_head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        let (result, status) = match self.bucket.head_object(key).await {
            Ok(res) => res,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };
        if status == 404 {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(StorageError::Backend(format!("HEAD {key}: HTTP {status}")));
        }

        let metadata = result.metadata.unwrap_or_default();
        let decoded: Vec<(String, String)> = metadata
            .iter()
            .map(|(name, value)| {
                let name = name.strip_prefix(META_PREFIX).unwrap_or(name).to_string();
                let value = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.clone());
                (name, value)
            })
            .collect();
        let attributes =
            ObjectAttributes::from_pairs(decoded.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        Ok(Some(ObjectHead {
            size: result.content_length.unwrap_or(0).max(0) as u64,
            content_type: result
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_disposition: result
                .content_disposition
                .unwrap_or_else(|| DEFAULT_CONTENT_DISPOSITION.to_string()),
            etag: result.e_tag,
            checksum: None,
            attributes,
        }))
    }
}

fn is_not_found(e: &S3Error) -> bool {
    matches!(e, S3Error::HttpFailWithBody(404, _))
}

/// `Range` ヘッダーの値（終端を含む）。長さ0は送らない。
fn range_header(range: ByteRange) -> Option<String> {
    let last = range.offset.checked_add(range.length)?.checked_sub(1)?;
    (range.length > 0).then(|| format!("bytes={}-{}", range.offset, last))
}

fn backend_error(e: S3Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// ヘッダー値として送れる文字列か（可視ASCIIと空白のみ）。
fn is_header_safe(value: &str) -> bool {
    value.bytes().all(|b| b == b' ' || b.is_ascii_graphic())
}

#[async_trait::async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        options: PutOptions,
    ) -> Result<PutOutcome, StorageError> {
        let mut bucket = self.bucket.clone();
        if is_header_safe(&options.content_disposition) {
            bucket.add_header("content-disposition", &options.content_disposition);
        } else {
            tracing::warn!(file_key = %key, "Content-Dispositionにヘッダーで送れない文字が含まれるため省略");
        }
        for (name, value) in options.attributes.to_pairs() {
            let encoded = urlencoding::encode(&value);
            bucket.add_header(&format!("{META_PREFIX}{name}"), &encoded);
        }

        // 送信しながらサイズとSHA-256を計算する
        let hasher = Arc::new(Mutex::new(ContentHasher::new()));
        let tap = Arc::clone(&hasher);
        let tapped = body
            .inspect_ok(move |chunk| {
                if let Ok(mut h) = tap.lock() {
                    h.update(chunk);
                }
            })
            .map_err(std::io::Error::other);
        let mut reader = StreamReader::new(tapped);

        bucket
            .put_object_stream_with_content_type(&mut reader, key, &options.content_type)
            .await
            .map_err(backend_error)?;

        let hasher = hasher
            .lock()
            .map(|h| h.clone())
            .map_err(|_| StorageError::Backend("ハッシュ計算状態が破損しています".to_string()))?;
        Ok(PutOutcome {
            size: hasher.len(),
            checksum: Some(Checksum::Raw(hasher.finalize_bytes().to_vec())),
        })
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<StoredObject>, StorageError> {
        let Some(head) = self.fetch_head(key).await? else {
            return Ok(None);
        };

        if let Some(ByteRange { length: 0, .. }) = range {
            return Ok(Some(StoredObject {
                head,
                body: futures::stream::empty().boxed(),
            }));
        }

        // 範囲指定はRangeヘッダーとして送り、本体はストリームのまま返す
        let mut bucket = self.bucket.clone();
        if let Some(value) = range.and_then(range_header) {
            bucket.add_header("range", &value);
        }
        let response = match bucket.get_object_stream(key).await {
            Ok(r) => r,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(backend_error(e)),
        };
        match response.status_code {
            404 => return Ok(None),
            200..=299 => {}
            status => return Err(StorageError::Backend(format!("GET {key}: HTTP {status}"))),
        }

        let body = response
            .bytes
            .map_err(|e| StorageError::Stream(e.to_string()))
            .boxed();
        Ok(Some(StoredObject { head, body }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        self.fetch_head(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.bucket.delete_object(key).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ヘッダーに載せられない値が判定されることを確認
    #[test]
    fn test_header_safety() {
        assert!(is_header_safe("inline"));
        assert!(is_header_safe("attachment; filename=\"a b.png\""));
        assert!(!is_header_safe("attachment; filename=\"写真.png\""));
        assert!(!is_header_safe("a\r\nb"));
    }

    /// 取得範囲が終端を含むRangeヘッダーになることを確認
    #[test]
    fn test_range_header() {
        assert_eq!(
            range_header(ByteRange { offset: 2, length: 4 }).as_deref(),
            Some("bytes=2-5")
        );
        assert_eq!(
            range_header(ByteRange { offset: 0, length: 1 }).as_deref(),
            Some("bytes=0-0")
        );
        assert_eq!(range_header(ByteRange { offset: 3, length: 0 }), None);
    }

    /// 属性値がパーセントエンコードで往復できることを確認
    #[test]
    fn test_attribute_encoding() {
        let encoded = urlencoding::encode("写真 1.png");
        assert!(is_header_safe(&encoded));
        assert_eq!(urlencoding::decode(&encoded).unwrap(), "写真 1.png");
    }
}
