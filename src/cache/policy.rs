//! キャッシュポリシー
//!
//! レスポンスヘッダー（Cache-Control、Expires、Date、ETag）から
//! キャッシュエントリの各期限を導出します。リクエスト側のTTL上書きも
//! ここで適用します。

use super::entry::CacheEntry;
use crate::transport::NetworkResponse;
use chrono::{DateTime, TimeZone, Utc};
use ftlog::warn;

/// Cache-Control ディレクティブ
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    /// max-age（秒）
    pub max_age: Option<u64>,
    /// no-cache フラグ
    pub no_cache: bool,
    /// no-store フラグ
    pub no_store: bool,
}

impl CacheControl {
    /// Cache-Controlヘッダー値をパース
    pub fn parse(value: &str) -> Self {
        let mut cc = Self::default();

        for directive in value.split(',') {
            let directive = directive.trim().to_lowercase();

            if directive == "no-cache" {
                cc.no_cache = true;
            } else if directive == "no-store" {
                cc.no_store = true;
            } else if let Some(value) = directive.strip_prefix("max-age=") {
                cc.max_age = value.parse().ok();
            }
        }

        cc
    }

    /// レスポンスのキャッシュが許可されているか
    #[inline]
    pub fn is_cacheable(&self) -> bool {
        !self.no_cache && !self.no_store
    }
}

/// HTTP日付（RFC 1123）をエポックミリ秒にパース
///
/// パースできない場合は0を返します（日付なし扱い）。
pub fn parse_http_date(value: &str) -> i64 {
    DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// エポックミリ秒をHTTP日付（RFC 1123）にフォーマット
pub fn format_http_date(epoch_ms: i64) -> String {
    match Utc.timestamp_millis_opt(epoch_ms).single() {
        Some(dt) => dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        None => String::new(),
    }
}

/// レスポンスヘッダーからキャッシュエントリを導出
///
/// `Cache-Control: max-age`が`Expires`より優先されます。no-cache/no-storeの
/// 場合は`None`を返します。どちらの指示もない場合は期限0（即stale）の
/// エントリを返し、条件付き再検証に委ねます。
pub fn parse_cache_headers(response: &NetworkResponse, now_ms: i64) -> Option<CacheEntry> {
    let server_date = response.header("Date").map(parse_http_date).unwrap_or(0);

    let mut soft_expire = 0i64;
    let mut has_cache_control = false;

    if let Some(value) = response.header("Cache-Control") {
        let cc = CacheControl::parse(value);
        if !cc.is_cacheable() {
            return None;
        }
        has_cache_control = true;
        if let Some(max_age) = cc.max_age {
            soft_expire = now_ms + (max_age as i64) * 1000;
        }
    }

    if !has_cache_control {
        let server_expires = response
            .header("Expires")
            .map(parse_http_date)
            .unwrap_or(0);
        if server_date > 0 && server_expires >= server_date {
            soft_expire = now_ms + (server_expires - server_date);
        }
    }

    Some(CacheEntry {
        data: response.body.clone(),
        etag: response.header("ETag").map(str::to_string),
        server_date,
        ttl: soft_expire,
        soft_ttl: soft_expire,
        keep_until: 0,
        is_image: false,
        response_headers: response.headers.clone(),
    })
}

/// リクエスト側のTTL上書きを適用
///
/// サーバーがキャッシュを許可している（エントリがある）場合のみ上書きが
/// 効きます。許可がないのにTTL上書きだけがあるリクエストは警告を出して
/// キャッシュしません。オフラインキャッシュ指定のエントリはハード期限まで
/// 削除から保護されます。
pub fn apply_ttl_overrides(
    entry: Option<CacheEntry>,
    ttl_override_ms: i64,
    soft_ttl_override_ms: i64,
    offline_cache: bool,
    now_ms: i64,
    url: &str,
) -> Option<CacheEntry> {
    match entry {
        Some(mut entry) => {
            if ttl_override_ms > 0 {
                entry.ttl = now_ms + ttl_override_ms;
                if offline_cache {
                    entry.keep_until = entry.ttl;
                }
            }
            if soft_ttl_override_ms > 0 {
                entry.soft_ttl = now_ms + soft_ttl_override_ms;
            }
            Some(entry)
        }
        None => {
            if ttl_override_ms != 0 || soft_ttl_override_ms != 0 {
                warn!(
                    "request has a TTL but will not be cached due to the response's cache policy: {}",
                    url
                );
            }
            None
        }
    }
}
