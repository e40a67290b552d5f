//! # Fukusu 署名エンジン
//!
//! 署名付きURLとWebhookペイロードの認証に使うHMAC-SHA256と、
//! アップロードされたコンテンツのハッシュ計算を提供する。
//!
//! ## アルゴリズム
//! | 用途 | アルゴリズム | 表現 |
//! |------|------------|------|
//! | 署名 | HMAC-SHA256 | `hmac-sha256=<小文字hex>` |
//! | コンテンツハッシュ | SHA-256 | 小文字hex |

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// 署名文字列のプレフィックス
pub const SIGNATURE_PREFIX: &str = "hmac-sha256=";

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// HMAC鍵の初期化に失敗
    #[error("HMAC鍵の初期化に失敗しました: {0}")]
    InvalidKey(String),
}

fn mac_for(secret: &[u8]) -> Result<HmacSha256, CryptoError> {
    HmacSha256::new_from_slice(secret).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// ペイロードにHMAC-SHA256署名を付与する。
///
/// 戻り値は `hmac-sha256=` プレフィックス付きの小文字hex。
pub fn sign(payload: &[u8], secret: &[u8]) -> Result<String, CryptoError> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// HMAC-SHA256署名を検証する。
///
/// プレフィックス付き・プレフィックスなし（素のhex）の両方を受け付ける。
/// hexデコード失敗や空の署名を含め、いかなる不正入力でも `false` を返す。
/// 比較は定数時間で行われる。
pub fn verify(payload: &[u8], secret: &[u8], signature: &str) -> bool {
    let digest_hex = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256ハッシュを小文字hexで返す。
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// チャンク単位で読み進めながらSHA-256を計算するハッシャー。
///
/// ストリームを全量バッファせずにコンテンツハッシュを得るために使う。
#[derive(Default, Clone)]
pub struct ContentHasher {
    inner: Sha256,
    len: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// これまでに投入したバイト数
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 小文字hexのダイジェストを返す。
    pub fn finalize_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }

    /// 生のダイジェストを返す。
    pub fn finalize_bytes(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// sign → verify が成功することを確認
    #[test]
    fn test_sign_verify_roundtrip() {
        let payload = b"{\"status\":\"uploaded\"}";
        let secret = b"sk_live_test";
        let sig = sign(payload, secret).unwrap();
        assert!(sig.starts_with(SIGNATURE_PREFIX));
        assert!(verify(payload, secret, &sig));
    }

    /// プレフィックスなしの素のhexでも検証できることを確認
    #[test]
    fn test_verify_accepts_bare_hex() {
        let sig = sign(b"payload", b"secret").unwrap();
        let bare = sig.strip_prefix(SIGNATURE_PREFIX).unwrap();
        assert!(verify(b"payload", b"secret", bare));
    }

    /// ペイロードまたは鍵の1ビット反転で検証が失敗することを確認
    #[test]
    fn test_single_bit_flip_rejected() {
        let payload = b"https://ingest.example/abc?expires=1".to_vec();
        let secret = b"shared-secret".to_vec();
        let sig = sign(&payload, &secret).unwrap();

        for i in 0..payload.len() {
            for bit in 0..8 {
                let mut flipped = payload.clone();
                flipped[i] ^= 1 << bit;
                assert!(!verify(&flipped, &secret, &sig), "payload byte {i} bit {bit}");
            }
        }
        for i in 0..secret.len() {
            for bit in 0..8 {
                let mut flipped = secret.clone();
                flipped[i] ^= 1 << bit;
                assert!(!verify(&payload, &flipped, &sig), "secret byte {i} bit {bit}");
            }
        }
    }

    /// 不正な署名文字列がfalseになることを確認（パニックしない）
    #[test]
    fn test_verify_fails_closed() {
        assert!(!verify(b"p", b"s", ""));
        assert!(!verify(b"p", b"s", SIGNATURE_PREFIX));
        assert!(!verify(b"p", b"s", "hmac-sha256=zz"));
        assert!(!verify(b"p", b"s", "hmac-sha256=abc"));
        assert!(!verify(b"p", b"s", "hmac-sha256=00"));
    }

    /// 既知のSHA-256ベクタ
    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    /// 分割投入しても一括計算と同じハッシュになることを確認
    #[test]
    fn test_content_hasher_matches_oneshot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"AAAA");
        hasher.update(b"BBBB");
        assert_eq!(hasher.len(), 8);
        assert_eq!(hasher.clone().finalize_bytes(), sha256(b"AAAABBBB"));
        assert_eq!(hasher.finalize_hex(), sha256_hex(b"AAAABBBB"));
    }
}
