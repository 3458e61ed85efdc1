//! エラー型
//!
//! パイプライン全体で使用するエラー型を提供します。
//! トランスポート層・パース層のエラーはリクエストのエラーリスナーに配信され、
//! キャッシュ内部のエラーはミスに縮退するため呼び出し元には到達しません。

use crate::transport::NetworkResponse;
use thiserror::Error;

/// エラーに付随するネットワーク情報
///
/// HTTPステータスや所要時間など、失敗したリクエストの文脈を保持します。
#[derive(Debug, Clone, Default)]
pub struct FailureDetail {
    /// 失敗時に受信していたレスポンス（あれば）
    pub response: Option<NetworkResponse>,
    /// リクエスト開始から失敗までの所要時間（ミリ秒）
    pub network_time_ms: Option<u64>,
}

impl FailureDetail {
    /// レスポンス付きの詳細を作成
    pub fn with_response(response: NetworkResponse) -> Self {
        Self {
            response: Some(response),
            network_time_ms: None,
        }
    }
}

/// パイプラインのエラー
///
/// `Cache`は内部専用で、リスナーに配信されることはありません。
#[derive(Debug, Clone, Error)]
pub enum CourierError {
    /// 認証失敗（401/403など）
    #[error("authentication failure")]
    AuthFailure(FailureDetail),

    /// ネットワーク到達不可
    #[error("no network connection")]
    NoConnection(FailureDetail),

    /// 一般的なネットワークエラー
    #[error("network failure")]
    Network(FailureDetail),

    /// サーバーエラー（5xx）
    #[error("server error")]
    Server(FailureDetail),

    /// タイムアウト
    #[error("request timed out")]
    Timeout(FailureDetail),

    /// レスポンスボディのパース失敗
    #[error("response parse failed: {reason}")]
    Parse {
        reason: String,
        detail: FailureDetail,
    },

    /// キャッシュ内部エラー（配信されない）
    #[error("cache failure: {0}")]
    Cache(String),
}

impl CourierError {
    /// パースエラーを作成
    pub fn parse(reason: impl Into<String>) -> Self {
        CourierError::Parse {
            reason: reason.into(),
            detail: FailureDetail::default(),
        }
    }

    /// レスポンス付きのパースエラーを作成
    pub fn parse_with_response(reason: impl Into<String>, response: NetworkResponse) -> Self {
        CourierError::Parse {
            reason: reason.into(),
            detail: FailureDetail::with_response(response),
        }
    }

    /// HTTPステータスコード（あれば）
    pub fn status(&self) -> Option<u16> {
        self.detail().and_then(|d| d.response.as_ref()).map(|r| r.status)
    }

    /// 所要時間（ミリ秒、記録されていれば）
    pub fn network_time_ms(&self) -> Option<u64> {
        self.detail().and_then(|d| d.network_time_ms)
    }

    /// 所要時間を記録
    ///
    /// ディスパッチャがエラー配信の直前に設定します。
    pub fn set_network_time_ms(&mut self, elapsed_ms: u64) {
        if let Some(detail) = self.detail_mut() {
            detail.network_time_ms = Some(elapsed_ms);
        }
    }

    fn detail(&self) -> Option<&FailureDetail> {
        match self {
            CourierError::AuthFailure(d)
            | CourierError::NoConnection(d)
            | CourierError::Network(d)
            | CourierError::Server(d)
            | CourierError::Timeout(d) => Some(d),
            CourierError::Parse { detail, .. } => Some(detail),
            CourierError::Cache(_) => None,
        }
    }

    fn detail_mut(&mut self) -> Option<&mut FailureDetail> {
        match self {
            CourierError::AuthFailure(d)
            | CourierError::NoConnection(d)
            | CourierError::Network(d)
            | CourierError::Server(d)
            | CourierError::Timeout(d) => Some(d),
            CourierError::Parse { detail, .. } => Some(detail),
            CourierError::Cache(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_response() {
        let response = NetworkResponse::new(503, Vec::new(), Vec::new(), false);
        let err = CourierError::Server(FailureDetail::with_response(response));

        assert_eq!(err.status(), Some(503));
        assert!(err.network_time_ms().is_none());
    }

    #[test]
    fn test_set_network_time() {
        let mut err = CourierError::Timeout(FailureDetail::default());
        err.set_network_time_ms(2500);

        assert_eq!(err.network_time_ms(), Some(2500));
    }

    #[test]
    fn test_cache_error_has_no_detail() {
        let mut err = CourierError::Cache("disk full".to_string());
        err.set_network_time_ms(10);

        assert!(err.status().is_none());
        assert!(err.network_time_ms().is_none());
    }
}
