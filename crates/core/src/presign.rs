//! # 署名付きURL
//!
//! アップロード操作を期限付きで許可するURLの構築と検証。
//!
//! ## 署名対象
//! `signature` パラメータを除いたURL全体の文字列表現。
//! クエリは `application/x-www-form-urlencoded` で再シリアライズされ、
//! パラメータの順序は受信（構築）したときのまま保持される。
//! 構築側と検証側は必ず [`canonical_url`] を通して同じ文字列を得る。

use fukusu_crypto::CryptoError;
use url::Url;

/// 署名パラメータ名
pub const SIGNATURE_PARAM: &str = "signature";

/// 有効期限パラメータ名（UNIXエポックからのミリ秒）
pub const EXPIRES_PARAM: &str = "expires";

/// 構築時に無視されるパラメータ名（パス側に埋め込まれるため）
const KEY_PARAM: &str = "key";

/// 署名付きURLのエラー型
#[derive(Debug, thiserror::Error)]
pub enum PresignError {
    /// URLとして解釈できない
    #[error("URLのパースに失敗: {0}")]
    InvalidUrl(String),
    /// signatureパラメータがない
    #[error("signatureパラメータがありません")]
    MissingSignature,
    /// 署名が一致しない
    #[error("署名が一致しません")]
    SignatureMismatch,
    /// 有効期間が表現できる範囲を超えている
    #[error("有効期間が大きすぎます (expires_in={expires_in_secs}秒)")]
    InvalidExpiry { expires_in_secs: u64 },
    /// 有効期限切れ
    #[error("署名付きURLの有効期限が切れています (expires={expires})")]
    Expired { expires: u64 },
    /// 署名計算に失敗
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// 署名対象となる正規形のURLを組み立てる。
///
/// `base` のクエリとフラグメントは捨てられ、`pairs` が与えられた順に付与される。
/// パラメータが1つもなければ `?` は付かない。
pub fn canonical_url<'a, I>(base: &Url, pairs: I) -> Url
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);

    let mut pairs = pairs.into_iter().peekable();
    if pairs.peek().is_some() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    url
}

/// 同名パラメータがあれば値を置き換え、なければ末尾に追加する。
fn set_param(params: &mut Vec<(String, String)>, name: &str, value: &str) {
    match params.iter_mut().find(|(k, _)| k == name) {
        Some(entry) => entry.1 = value.to_string(),
        None => params.push((name.to_string(), value.to_string())),
    }
}

/// アップロード用の署名付きURLを構築する。
///
/// URLは `<base_url>/<key>`。`expires` を最初に、続いて `params` を挿入順に設定する
/// （`key` という名前のエントリは除く）。最後に `signature=hmac-sha256=<hex>` を付与する。
pub fn build_signed_url(
    base_url: &str,
    key: &str,
    params: &[(&str, &str)],
    expires_in_secs: u64,
    secret: &[u8],
    now_ms: u64,
) -> Result<String, PresignError> {
    let base = Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), key))
        .map_err(|e| PresignError::InvalidUrl(e.to_string()))?;

    let expires = expires_in_secs
        .checked_mul(1000)
        .and_then(|ms| now_ms.checked_add(ms))
        .ok_or(PresignError::InvalidExpiry { expires_in_secs })?;

    let mut query: Vec<(String, String)> = Vec::with_capacity(params.len() + 1);
    set_param(&mut query, EXPIRES_PARAM, &expires.to_string());
    for (name, value) in params {
        if *name != KEY_PARAM {
            set_param(&mut query, name, value);
        }
    }

    let mut url = canonical_url(&base, query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let signature = fukusu_crypto::sign(url.as_str().as_bytes(), secret)?;
    url.query_pairs_mut().append_pair(SIGNATURE_PARAM, &signature);

    Ok(url.into())
}

/// 署名付きURLを検証する。
///
/// `signature` を取り除いた正規形を再構築してHMACを照合し、
/// `expires` があれば `now_ms` と比較する。
pub fn verify_signed_url(url: &Url, secret: &[u8], now_ms: u64) -> Result<(), PresignError> {
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    let signature = pairs
        .iter()
        .find(|(k, _)| k == SIGNATURE_PARAM)
        .map(|(_, v)| v.as_str())
        .ok_or(PresignError::MissingSignature)?;

    let canonical = canonical_url(
        url,
        pairs
            .iter()
            .filter(|(k, _)| k != SIGNATURE_PARAM)
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );

    if !fukusu_crypto::verify(canonical.as_str().as_bytes(), secret, signature) {
        return Err(PresignError::SignatureMismatch);
    }

    if let Some((_, raw)) = pairs.iter().find(|(k, _)| k == EXPIRES_PARAM) {
        let expires: u64 = raw
            .parse()
            .map_err(|_| PresignError::InvalidUrl(format!("expiresが数値ではありません: {raw}")))?;
        if now_ms > expires {
            return Err(PresignError::Expired { expires });
        }
    }

    Ok(())
}
