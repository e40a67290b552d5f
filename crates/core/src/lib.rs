//! # Fukusu Core
//!
//! 署名付き転送プロトコルのうち、ストレージやHTTPに依存しない部分を実装する。
//!
//! ## 構成
//! - [`presign`]: 署名付きURLの構築・検証（正規化ルーチンを共有）
//! - [`token`]: APIトークン（Simple / Structured）のパースと生成
//!
//! Gateway（サーバー）とCLIの双方がこのクレートを使うことで、
//! 署名対象文字列の組み立てが1箇所に集約される。

pub mod presign;
pub mod token;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

pub use presign::{build_signed_url, canonical_url, verify_signed_url, PresignError};
pub use token::{encode_token, parse_token, validate_api_key, UploadToken};

/// 生成するファイルキーの長さ
pub const FILE_KEY_LEN: usize = 24;

/// 現在時刻（UNIXエポックからのミリ秒）。
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// 英数字24文字のランダムなファイルキーを生成する。
pub fn generate_file_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FILE_KEY_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ファイルキーが英数字24文字であることを確認
    #[test]
    fn test_generate_file_key_shape() {
        let key = generate_file_key();
        assert_eq!(key.len(), FILE_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(key, generate_file_key());
    }
}
