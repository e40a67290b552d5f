//! # レコード操作
//!
//! [`MetadataStore`] 上の型付きレコード（FileRecord, PendingMetadata, ErrorRecord）と
//! customIdの逆引きインデックスを読み書きする。

use std::time::Duration;

use fukusu_types::{ErrorRecord, FileRecord, PendingMetadata};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::MetadataStore;
use crate::error::StorageError;

/// FileRecordの保持期間（30日）
pub const FILE_RECORD_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// PendingMetadataの保持期間（1時間）
pub const PENDING_METADATA_TTL: Duration = Duration::from_secs(60 * 60);

/// ErrorRecordの保持期間（24時間）
pub const ERROR_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const FILE_PREFIX: &str = "file:";
const METADATA_PREFIX: &str = "metadata:";
const ERROR_PREFIX: &str = "error:";
const CUSTOM_ID_PREFIX: &str = "custom-id:";

fn file_key(key: &str) -> String {
    format!("{FILE_PREFIX}{key}")
}

fn metadata_key(key: &str) -> String {
    format!("{METADATA_PREFIX}{key}")
}

fn error_key(key: &str) -> String {
    format!("{ERROR_PREFIX}{key}")
}

fn custom_id_key(custom_id: &str) -> String {
    format!("{CUSTOM_ID_PREFIX}{custom_id}")
}

async fn put_json<T: Serialize + Sync>(
    store: &dyn MetadataStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    store.put(key, json, Some(ttl)).await
}

async fn get_json<T: DeserializeOwned>(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// FileRecord
// ---------------------------------------------------------------------------

/// FileRecordを書き込む（TTLは毎回30日に更新される）。
///
/// customIdがあれば、レコードの書き込み後に逆引きインデックスを書く。
pub async fn put_file_record(
    store: &dyn MetadataStore,
    record: &FileRecord,
) -> Result<(), StorageError> {
    put_json(store, &file_key(&record.key), record, FILE_RECORD_TTL).await?;
    if let Some(custom_id) = record.custom_id.as_deref().filter(|id| !id.is_empty()) {
        store
            .put(&custom_id_key(custom_id), record.key.clone(), Some(FILE_RECORD_TTL))
            .await?;
    }
    Ok(())
}

pub async fn get_file_record(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<FileRecord>, StorageError> {
    get_json(store, &file_key(key)).await
}

/// FileRecordを削除し、削除前のレコードを返す。
/// 逆引きインデックスはこのキーを指している場合のみ削除する。
pub async fn delete_file_record(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<FileRecord>, StorageError> {
    let record = get_file_record(store, key).await?;
    store.delete(&file_key(key)).await?;

    if let Some(custom_id) = record.as_ref().and_then(|r| r.custom_id.as_deref()) {
        let index_key = custom_id_key(custom_id);
        if store.get(&index_key).await?.as_deref() == Some(key) {
            store.delete(&index_key).await?;
        }
    }
    Ok(record)
}

/// FileRecordを読み込んで `update` を適用し、書き戻す。レコードがなければ `None`。
pub async fn update_file_record<F>(
    store: &dyn MetadataStore,
    key: &str,
    update: F,
) -> Result<Option<FileRecord>, StorageError>
where
    F: FnOnce(&mut FileRecord) + Send,
{
    let Some(mut record) = get_file_record(store, key).await? else {
        return Ok(None);
    };
    update(&mut record);
    put_file_record(store, &record).await?;
    Ok(Some(record))
}

/// customIdからファイルキーを引く。
///
/// インデックスが指すレコードが存在し、同じcustomIdを持つ場合のみ解決する。
pub async fn resolve_custom_id(
    store: &dyn MetadataStore,
    custom_id: &str,
) -> Result<Option<String>, StorageError> {
    let Some(key) = store.get(&custom_id_key(custom_id)).await? else {
        return Ok(None);
    };
    match get_file_record(store, &key).await? {
        Some(record) if record.custom_id.as_deref() == Some(custom_id) => Ok(Some(key)),
        _ => {
            tracing::debug!(custom_id = %custom_id, file_key = %key, "古いcustomIdインデックスを無視");
            Ok(None)
        }
    }
}

/// 全FileRecordをキーの昇順で返す。読み取れないレコードはスキップする。
pub async fn list_file_records(store: &dyn MetadataStore) -> Result<Vec<FileRecord>, StorageError> {
    let mut records = Vec::new();
    for key in store.list(FILE_PREFIX).await? {
        match get_json::<FileRecord>(store, &key).await {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "FileRecordの読み取りに失敗"),
        }
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// PendingMetadata / ErrorRecord
// ---------------------------------------------------------------------------

pub async fn put_pending_metadata(
    store: &dyn MetadataStore,
    key: &str,
    pending: &PendingMetadata,
) -> Result<(), StorageError> {
    put_json(store, &metadata_key(key), pending, PENDING_METADATA_TTL).await
}

pub async fn get_pending_metadata(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<PendingMetadata>, StorageError> {
    get_json(store, &metadata_key(key)).await
}

pub async fn put_error_record(
    store: &dyn MetadataStore,
    key: &str,
    record: &ErrorRecord,
) -> Result<(), StorageError> {
    put_json(store, &error_key(key), record, ERROR_RECORD_TTL).await
}

#[cfg(test)]
pub async fn get_error_record(
    store: &dyn MetadataStore,
    key: &str,
) -> Result<Option<ErrorRecord>, StorageError> {
    get_json(store, &error_key(key)).await
}
