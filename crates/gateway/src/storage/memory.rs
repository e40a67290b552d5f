//! # インメモリ BlobStore
//!
//! 開発・テスト用。プロセスが終了するとデータは失われる。

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use fukusu_crypto::ContentHasher;
use tokio::sync::RwLock;

use super::{
    BlobStore, ByteRange, ByteStream, Checksum, ObjectHead, PutOptions, PutOutcome, StoredObject,
};
use crate::error::StorageError;

/// 読み出し時のチャンクサイズ
const READ_CHUNK_SIZE: usize = 64 * 1024;

struct MemoryObject {
    data: Bytes,
    head: ObjectHead,
}

/// `RwLock<HashMap>` によるBlobStore実装。
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, MemoryObject>>,
    report_checksums: bool,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            report_checksums: true,
        }
    }

    /// put時にチェックサムを報告しないストアを作る。
    /// 呼び出し側の再読み込みによるハッシュ計算を使わせたい場合に使う。
    pub fn without_checksums() -> Self {
        Self {
            report_checksums: false,
            ..Self::new()
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

fn chunked(data: Bytes) -> ByteStream {
    let chunks: Vec<Result<Bytes, StorageError>> = if data.is_empty() {
        Vec::new()
    } else {
        (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + READ_CHUNK_SIZE).min(data.len()))))
            .collect()
    };
    futures::stream::iter(chunks).boxed()
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        mut body: ByteStream,
        options: PutOptions,
    ) -> Result<PutOutcome, StorageError> {
        let mut buffer = BytesMut::new();
        let mut hasher = ContentHasher::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);
        }

        let size = hasher.len();
        let digest = hasher.finalize_hex();
        let head = ObjectHead {
            size,
            content_type: options.content_type,
            content_disposition: options.content_disposition,
            etag: Some(format!("\"{digest}\"")),
            checksum: self.report_checksums.then(|| digest.clone()),
            attributes: options.attributes,
        };

        self.objects.write().await.insert(
            key.to_string(),
            MemoryObject {
                data: buffer.freeze(),
                head,
            },
        );

        Ok(PutOutcome {
            size,
            checksum: self.report_checksums.then_some(Checksum::Hex(digest)),
        })
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<Option<StoredObject>, StorageError> {
        let objects = self.objects.read().await;
        let Some(object) = objects.get(key) else {
            return Ok(None);
        };

        let data = match range {
            None => object.data.clone(),
            Some(ByteRange { offset, length }) => {
                let len = object.data.len();
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
                let end = start
                    .saturating_add(usize::try_from(length).unwrap_or(usize::MAX))
                    .min(len);
                object.data.slice(start..end)
            }
        };

        Ok(Some(StoredObject {
            head: object.head.clone(),
            body: chunked(data),
        }))
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StorageError> {
        Ok(self.objects.read().await.get(key).map(|o| o.head.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{bytes_stream, ObjectAttributes};

    fn options() -> PutOptions {
        PutOptions {
            content_type: "text/plain".to_string(),
            content_disposition: "inline".to_string(),
            attributes: ObjectAttributes::default(),
        }
    }

    async fn read_all(object: StoredObject) -> Vec<u8> {
        let mut body = object.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    /// put → get → head → delete の一連の動作を確認
    #[tokio::test]
    async fn test_put_get_head_delete() {
        let store = MemoryBlobStore::new();
        let outcome = store.put("k", bytes_stream("hello"), options()).await.unwrap();
        assert_eq!(outcome.size, 5);
        assert_eq!(
            outcome.checksum.unwrap().to_hex(),
            fukusu_crypto::sha256_hex(b"hello")
        );

        let head = store.head("k").await.unwrap().unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.content_type, "text/plain");

        let object = store.get("k", None).await.unwrap().unwrap();
        assert_eq!(read_all(object).await, b"hello");

        store.delete("k").await.unwrap();
        assert!(store.head("k").await.unwrap().is_none());
        assert!(store.get("k", None).await.unwrap().is_none());
        // 存在しないキーの削除は成功
        store.delete("k").await.unwrap();
    }

    /// 範囲取得が指定範囲のみを返し、末尾を超える範囲は切り詰められることを確認
    #[tokio::test]
    async fn test_ranged_get() {
        let store = MemoryBlobStore::new();
        store.put("k", bytes_stream("0123456789"), options()).await.unwrap();

        let object = store
            .get("k", Some(ByteRange { offset: 2, length: 4 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read_all(object).await, b"2345");

        let object = store
            .get("k", Some(ByteRange { offset: 8, length: 100 }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read_all(object).await, b"89");
    }

    /// ストリームエラー時はオブジェクトが作られないことを確認
    #[tokio::test]
    async fn test_put_stream_error() {
        let store = MemoryBlobStore::new();
        let failing: ByteStream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::Stream("reset".into())),
        ])
        .boxed();
        assert!(store.put("k", failing, options()).await.is_err());
        assert!(store.is_empty().await);
    }

    /// チェックサム非報告モードを確認
    #[tokio::test]
    async fn test_without_checksums() {
        let store = MemoryBlobStore::without_checksums();
        let outcome = store.put("k", bytes_stream("abc"), options()).await.unwrap();
        assert!(outcome.checksum.is_none());
        assert!(store.head("k").await.unwrap().unwrap().checksum.is_none());
    }
}
