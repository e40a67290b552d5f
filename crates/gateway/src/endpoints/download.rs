//! # GET /f/{fileKey}
//!
//! 保存済みオブジェクトの配信。`Range: bytes=<start>-<end?>` による部分取得に対応する。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::GatewayState;
use crate::error::GatewayError;
use crate::metadata::records;
use crate::storage::{ByteRange, ObjectHead};

/// 要求された範囲の解釈結果。
#[derive(Debug, PartialEq, Eq)]
enum RangeRequest {
    /// Rangeヘッダーなし、または解釈できない形式（全体を返す）
    Full,
    /// 終端を含む範囲 `[start, end]`
    Partial { start: u64, end: u64 },
    /// オブジェクトの外を指している
    Unsatisfiable,
}

/// `bytes=(\d+)-(\d*)` を解釈し、オブジェクトサイズに合わせて終端を切り詰める。
fn parse_range(headers: &HeaderMap, size: u64) -> RangeRequest {
    let Some(value) = headers.get(RANGE).and_then(|v| v.to_str().ok()) else {
        return RangeRequest::Full;
    };
    let Some(idx) = value.find("bytes=") else {
        return RangeRequest::Full;
    };
    let rest = &value[idx + "bytes=".len()..];
    let Some((start_raw, tail)) = rest.split_once('-') else {
        return RangeRequest::Full;
    };
    if start_raw.is_empty() || !start_raw.bytes().all(|b| b.is_ascii_digit()) {
        return RangeRequest::Full;
    }
    let end_len = tail.bytes().take_while(u8::is_ascii_digit).count();
    let end_raw = &tail[..end_len];

    let Ok(start) = start_raw.parse::<u64>() else {
        return RangeRequest::Unsatisfiable;
    };
    if size == 0 || start >= size {
        return RangeRequest::Unsatisfiable;
    }
    let end = if end_raw.is_empty() {
        size - 1
    } else {
        match end_raw.parse::<u64>() {
            Ok(end) => end.min(size - 1),
            Err(_) => size - 1,
        }
    };
    if end < start {
        return RangeRequest::Unsatisfiable;
    }
    RangeRequest::Partial { start, end }
}

/// ETagを決める。ストアのETag、既知のチェックサム、FileRecordのハッシュの順。
async fn resolve_etag(state: &GatewayState, key: &str, head: &ObjectHead) -> Option<String> {
    if let Some(etag) = head.etag.as_deref().filter(|e| !e.is_empty()) {
        return Some(etag.to_string());
    }
    if let Some(checksum) = head.checksum.as_deref().filter(|c| !c.is_empty()) {
        return Some(format!("\"{checksum}\""));
    }
    match records::get_file_record(state.metadata_store.as_ref(), key).await {
        Ok(Some(record)) => record
            .file_hash
            .filter(|h| !h.is_empty())
            .map(|h| format!("\"{h}\"")),
        Ok(None) => None,
        Err(e) => {
            tracing::debug!(file_key = %key, error = %e, "FileRecordの読み取りに失敗");
            None
        }
    }
}

/// GET /f/{fileKey} — ファイル配信。
pub async fn handle_download(
    State(state): State<Arc<GatewayState>>,
    Path(file_key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let Some(head) = state.blob_store.head(&file_key).await? else {
        return Err(GatewayError::NotFound("File not found".to_string()));
    };

    let (status, range) = match parse_range(&headers, head.size) {
        RangeRequest::Full => (StatusCode::OK, None),
        RangeRequest::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            Some(ByteRange {
                offset: start,
                length: end - start + 1,
            }),
        ),
        RangeRequest::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(CONTENT_RANGE, format!("bytes */{}", head.size))
                .body(Body::empty())
                .map_err(|e| GatewayError::Internal(format!("レスポンス構築に失敗: {e}")));
        }
    };

    // head後に削除された場合
    let Some(object) = state.blob_store.get(&file_key, range).await? else {
        return Err(GatewayError::NotFound("File not found".to_string()));
    };

    let etag = resolve_etag(&state, &file_key, &head).await;

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, head.content_type.as_str())
        .header(ACCEPT_RANGES, "bytes");
    match range {
        Some(range) => {
            let end = range.offset + range.length - 1;
            builder = builder
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", range.offset, end, head.size))
                .header(CONTENT_LENGTH, range.length);
        }
        None => builder = builder.header(CONTENT_LENGTH, head.size),
    }
    if let Ok(value) = HeaderValue::from_str(&head.content_disposition) {
        if !head.content_disposition.is_empty() {
            builder = builder.header(CONTENT_DISPOSITION, value);
        }
    }
    if let Some(value) = etag.and_then(|e| HeaderValue::from_str(&e).ok()) {
        builder = builder.header(ETAG, value);
    }

    tracing::debug!(file_key = %file_key, status = status.as_u16(), "ファイルを配信");

    builder
        .body(Body::from_stream(object.body))
        .map_err(|e| GatewayError::Internal(format!("レスポンス構築に失敗: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    use crate::endpoints::router;
    use crate::storage::{bytes_stream, ObjectAttributes, PutOptions};
    use crate::test_helpers::test_state;

    fn range(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, value.parse().unwrap());
        headers
    }

    async fn seed(state: &GatewayState, key: &str, data: &'static str) {
        state
            .blob_store
            .put(
                key,
                bytes_stream(data),
                PutOptions {
                    content_type: "text/plain".to_string(),
                    content_disposition: "attachment; filename=\"d.txt\"".to_string(),
                    attributes: ObjectAttributes::default(),
                },
            )
            .await
            .unwrap();
    }

    async fn get(state: Arc<GatewayState>, uri: &str, range: Option<&str>) -> Response {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(range) = range {
            builder = builder.header(RANGE, range);
        }
        router(state)
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    /// 範囲の解釈と切り詰めを確認
    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(&HeaderMap::new(), 10), RangeRequest::Full);
        assert_eq!(
            parse_range(&range("bytes=2-5"), 10),
            RangeRequest::Partial { start: 2, end: 5 }
        );
        assert_eq!(
            parse_range(&range("bytes=7-"), 10),
            RangeRequest::Partial { start: 7, end: 9 }
        );
        assert_eq!(
            parse_range(&range("bytes=7-100"), 10),
            RangeRequest::Partial { start: 7, end: 9 }
        );
        assert_eq!(parse_range(&range("bytes=10-"), 10), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(&range("bytes=5-2"), 10), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(&range("bytes=0-"), 0), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(&range("bytes=-3"), 10), RangeRequest::Full);
        assert_eq!(parse_range(&range("lines=1-2"), 10), RangeRequest::Full);
    }

    /// 10バイトのオブジェクトに bytes=2-5 で206と4バイトが返ることを確認
    #[tokio::test]
    async fn test_download_range() {
        let state = test_state();
        seed(&state, "ten", "0123456789").await;

        let response = get(state, "/f/ten", Some("bytes=2-5")).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[CONTENT_LENGTH], "4");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"2345");
    }

    /// 全体取得時のヘッダーを確認
    #[tokio::test]
    async fn test_download_full() {
        let state = test_state();
        seed(&state, "whole", "hello").await;

        let response = get(state, "/f/whole", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert_eq!(headers[CONTENT_DISPOSITION], "attachment; filename=\"d.txt\"");
        assert_eq!(
            headers[ETAG].to_str().unwrap(),
            format!("\"{}\"", fukusu_crypto::sha256_hex(b"hello"))
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    /// 存在しないキーは404、範囲外は416になることを確認
    #[tokio::test]
    async fn test_download_errors() {
        let state = test_state();
        let response = get(state.clone(), "/f/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        seed(&state, "short", "abc").await;
        let response = get(state, "/f/short", Some("bytes=3-")).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */3");
    }
}
