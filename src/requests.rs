//! 具象リクエスト
//!
//! よく使うボディ形式のリクエストハンドラを提供します。いずれも
//! [`RequestHandler`]の実装で、[`RequestBuilder`]を返すため優先度や
//! TTLなどは呼び出し側で調整できます。
//!
//! - [`StringRequest`] — UTF-8文字列ボディ
//! - [`JsonRequest`] — serde_jsonでデシリアライズするJSONボディ
//! - [`BytesRequest`] — 生のバイト列。画像用の直列パース・LIFO設定あり

use crate::cache::{apply_ttl_overrides, parse_cache_headers};
use crate::error::CourierError;
use crate::now_ms;
use crate::request::{
    DeliveryType, Method, ParsedResponse, Priority, Request, RequestBuilder, RequestHandler,
};
use crate::transport::NetworkResponse;
use ftlog::error;
use serde::de::DeserializeOwned;

/// レスポンスリスナー
///
/// (値, 配信種別, 中間レスポンスかどうか) を受け取ります。
pub type Listener<T> = Box<dyn Fn(&T, DeliveryType, bool) + Send + Sync>;

/// エラーリスナー
pub type ErrorListener = Box<dyn Fn(&CourierError) + Send + Sync>;

/// レスポンスヘッダーとリクエスト設定からキャッシュエントリを導出する
///
/// 各ハンドラのパース実装が共通で使います。
fn cache_entry_for(request: &Request, response: &NetworkResponse) -> Option<crate::cache::CacheEntry> {
    let now = now_ms();
    let entry = parse_cache_headers(response, now);
    apply_ttl_overrides(
        entry,
        request.ttl_ms(),
        request.soft_ttl_ms(),
        request.offline_cache(),
        now,
        request.url(),
    )
}

// ====================
// 文字列リクエスト
// ====================

struct StringHandler {
    listener: Listener<String>,
    error_listener: ErrorListener,
}

impl RequestHandler for StringHandler {
    fn parse_network_response(
        &self,
        request: &Request,
        response: &NetworkResponse,
    ) -> Result<ParsedResponse, CourierError> {
        let value = String::from_utf8_lossy(&response.body).into_owned();
        Ok(ParsedResponse::new(value).with_cache_entry(cache_entry_for(request, response)))
    }

    fn deliver_response(&self, request: &Request, response: &ParsedResponse) {
        if let Some(value) = response.value_as::<String>() {
            (self.listener)(value, request.delivery_type(), response.intermediate);
        }
    }

    fn deliver_error(&self, _request: &Request, error: &CourierError) {
        (self.error_listener)(error);
    }
}

/// UTF-8文字列を受け取るGETリクエスト
pub struct StringRequest;

impl StringRequest {
    /// ビルダーを作成
    pub fn new(
        url: impl Into<String>,
        listener: impl Fn(&String, DeliveryType, bool) + Send + Sync + 'static,
        error_listener: impl Fn(&CourierError) + Send + Sync + 'static,
    ) -> RequestBuilder {
        Request::builder(
            Method::Get,
            url,
            Box::new(StringHandler {
                listener: Box::new(listener),
                error_listener: Box::new(error_listener),
            }),
        )
    }
}

// ====================
// JSONリクエスト
// ====================

struct JsonHandler<T> {
    listener: Listener<T>,
    error_listener: ErrorListener,
}

impl<T: DeserializeOwned + Send + Sync + 'static> RequestHandler for JsonHandler<T> {
    fn parse_network_response(
        &self,
        request: &Request,
        response: &NetworkResponse,
    ) -> Result<ParsedResponse, CourierError> {
        let value: T = serde_json::from_slice(&response.body).map_err(|e| {
            CourierError::parse_with_response(
                format!("json deserialize failed: {}", e),
                response.clone(),
            )
        })?;
        Ok(ParsedResponse::new(value).with_cache_entry(cache_entry_for(request, response)))
    }

    fn deliver_response(&self, request: &Request, response: &ParsedResponse) {
        if let Some(value) = response.value_as::<T>() {
            (self.listener)(value, request.delivery_type(), response.intermediate);
        }
    }

    fn deliver_error(&self, _request: &Request, error: &CourierError) {
        (self.error_listener)(error);
    }
}

/// JSONボディを型`T`へデシリアライズするGETリクエスト
pub struct JsonRequest;

impl JsonRequest {
    /// ビルダーを作成
    pub fn new<T: DeserializeOwned + Send + Sync + 'static>(
        url: impl Into<String>,
        listener: impl Fn(&T, DeliveryType, bool) + Send + Sync + 'static,
        error_listener: impl Fn(&CourierError) + Send + Sync + 'static,
    ) -> RequestBuilder {
        Request::builder(
            Method::Get,
            url,
            Box::new(JsonHandler::<T> {
                listener: Box::new(listener),
                error_listener: Box::new(error_listener),
            }),
        )
    }
}

// ====================
// バイト列リクエスト
// ====================

struct BytesHandler {
    listener: Listener<Vec<u8>>,
    error_listener: ErrorListener,
    /// 画像クラス（直列パース・優先削除・帯域サンプリングの対象）
    image: bool,
}

impl RequestHandler for BytesHandler {
    fn parse_network_response(
        &self,
        request: &Request,
        response: &NetworkResponse,
    ) -> Result<ParsedResponse, CourierError> {
        // 大きなボディの複製なので、確保失敗をエラーに変換して
        // ワーカーを巻き込まない
        let mut value: Vec<u8> = Vec::new();
        if value.try_reserve_exact(response.body.len()).is_err() {
            error!(
                "allocation failed for {} byte body, url={}",
                response.body.len(),
                request.url()
            );
            return Err(CourierError::parse("body allocation failed"));
        }
        value.extend_from_slice(&response.body);

        let entry = cache_entry_for(request, response).map(|mut entry| {
            entry.is_image = self.image;
            entry
        });
        Ok(ParsedResponse::new(value).with_cache_entry(entry))
    }

    fn deliver_response(&self, request: &Request, response: &ParsedResponse) {
        if let Some(value) = response.value_as::<Vec<u8>>() {
            (self.listener)(value, request.delivery_type(), response.intermediate);
        }
    }

    fn deliver_error(&self, _request: &Request, error: &CourierError) {
        (self.error_listener)(error);
    }

    fn needs_serial_parse(&self) -> bool {
        self.image
    }

    fn is_image(&self) -> bool {
        self.image
    }
}

/// 生のバイト列を受け取るGETリクエスト
pub struct BytesRequest;

impl BytesRequest {
    /// ビルダーを作成
    pub fn new(
        url: impl Into<String>,
        listener: impl Fn(&Vec<u8>, DeliveryType, bool) + Send + Sync + 'static,
        error_listener: impl Fn(&CourierError) + Send + Sync + 'static,
    ) -> RequestBuilder {
        Request::builder(
            Method::Get,
            url,
            Box::new(BytesHandler {
                listener: Box::new(listener),
                error_listener: Box::new(error_listener),
                image: false,
            }),
        )
    }

    /// 画像向けのビルダーを作成
    ///
    /// 画像はLIFO・低優先度で処理され、パースはプロセス全体で
    /// 直列化されます。キャッシュでは優先削除の対象です。
    pub fn image(
        url: impl Into<String>,
        listener: impl Fn(&Vec<u8>, DeliveryType, bool) + Send + Sync + 'static,
        error_listener: impl Fn(&CourierError) + Send + Sync + 'static,
    ) -> RequestBuilder {
        Request::builder(
            Method::Get,
            url,
            Box::new(BytesHandler {
                listener: Box::new(listener),
                error_listener: Box::new(error_listener),
                image: true,
            }),
        )
        .priority(Priority::Low)
        .lifo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn build_and_stamp(builder: RequestBuilder) -> Arc<Request> {
        let request = builder.build();
        request.stamp_sequence(0);
        request
    }

    #[test]
    fn test_string_parse_and_deliver() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&delivered);

        let request = build_and_stamp(StringRequest::new(
            "http://x/a",
            move |value: &String, _, _| d.lock().unwrap().push(value.clone()),
            |_| {},
        ));

        let response = NetworkResponse::new(
            200,
            b"hello".to_vec(),
            vec![("Cache-Control".to_string(), "max-age=60".to_string())],
            false,
        );

        let parsed = request.parse_network_response(&response).unwrap();
        assert!(parsed.cache_entry.is_some());
        assert_eq!(parsed.cache_entry.as_ref().unwrap().data, b"hello");

        request.deliver_response(&parsed);
        assert_eq!(delivered.lock().unwrap().as_slice(), ["hello".to_string()]);
    }

    #[test]
    fn test_json_parse() {
        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
            count: u32,
        }

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);

        let request = build_and_stamp(JsonRequest::new::<Payload>(
            "http://x/api",
            move |payload, _, _| {
                assert_eq!(payload.name, "couriers");
                s.store(payload.count as usize, Ordering::SeqCst);
            },
            |_| {},
        ));

        let response = NetworkResponse::ok(br#"{"name":"couriers","count":4}"#.to_vec());
        let parsed = request.parse_network_response(&response).unwrap();
        request.deliver_response(&parsed);

        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_json_parse_failure() {
        #[derive(serde::Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            name: String,
        }

        let request = build_and_stamp(JsonRequest::new::<Payload>(
            "http://x/api",
            |_: &Payload, _, _| {},
            |_| {},
        ));

        let response = NetworkResponse::ok(b"not json".to_vec());
        let err = request.parse_network_response(&response).unwrap_err();
        assert!(matches!(err, CourierError::Parse { .. }));
        assert_eq!(err.status(), Some(200));
    }

    #[test]
    fn test_image_request_configuration() {
        let request = build_and_stamp(BytesRequest::image("http://x/img.png", |_, _, _| {}, |_| {}));

        assert_eq!(request.priority(), Priority::Low);
        assert!(!request.is_fifo());
        assert!(request.needs_serial_parse());
        assert!(request.is_image_class());
    }

    #[test]
    fn test_image_entry_flagged() {
        let request = build_and_stamp(
            BytesRequest::image("http://x/img.png", |_, _, _| {}, |_| {}).ttl_ms(60_000),
        );

        let response = NetworkResponse::new(
            200,
            vec![1, 2, 3],
            vec![("Cache-Control".to_string(), "max-age=60".to_string())],
            false,
        );

        let parsed = request.parse_network_response(&response).unwrap();
        let entry = parsed.cache_entry.unwrap();
        assert!(entry.is_image);
    }

    #[test]
    fn test_offline_image_protected_until_ttl() {
        let request = build_and_stamp(
            BytesRequest::image("http://x/img.png", |_, _, _| {}, |_| {})
                .ttl_ms(60_000)
                .offline_cache(),
        );

        let response = NetworkResponse::new(
            200,
            vec![1, 2, 3],
            vec![("Cache-Control".to_string(), "max-age=1".to_string())],
            false,
        );

        let parsed = request.parse_network_response(&response).unwrap();
        let entry = parsed.cache_entry.unwrap();
        assert_eq!(entry.keep_until, entry.ttl);
    }
}
