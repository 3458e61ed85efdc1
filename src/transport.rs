//! トランスポート契約
//!
//! HTTPリクエストを1回実行してレスポンスを返すトランスポート層の
//! インターフェースを定義します。実装（OSのHTTPスタック、任意のHTTPクライアント、
//! テスト用モックなど）はホスト側から注入されます。

use crate::error::CourierError;
use crate::request::Request;

/// トランスポートから返されるレスポンス
///
/// ヘッダーは受信順を保持した名前-値ペアのリストです。
#[derive(Debug, Clone, Default)]
pub struct NetworkResponse {
    /// HTTPステータスコード
    pub status: u16,
    /// レスポンスボディ
    pub body: Vec<u8>,
    /// レスポンスヘッダー
    pub headers: Vec<(String, String)>,
    /// サーバーが304を返し、ボディがキャッシュ済みであることを示す
    pub not_modified: bool,
}

impl NetworkResponse {
    /// 新しいレスポンスを作成
    pub fn new(
        status: u16,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
        not_modified: bool,
    ) -> Self {
        Self {
            status,
            body,
            headers,
            not_modified,
        }
    }

    /// 200 OKレスポンスを作成
    pub fn ok(body: Vec<u8>) -> Self {
        Self::new(200, body, Vec::new(), false)
    }

    /// ヘッダー値を取得（名前は大文字小文字を区別しない）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTPトランスポート
///
/// 1リクエスト=1レスポンスの実行を担います。リトライとタイムアウトは
/// リクエストの[`RetryPolicy`](crate::request::RetryPolicy)に従って
/// 実装側で処理します。条件付きリクエスト用のヘッダーは
/// [`Request::revalidation_headers`]から取得できます。
pub trait Network: Send + Sync {
    /// リクエストを実行してレスポンスを返す
    fn perform_request(&self, request: &Request) -> Result<NetworkResponse, CourierError>;
}
