//! # courier
//!
//! クライアントアプリケーション向けの、優先度付き・ディスクキャッシュ付き
//! HTTPリクエストパイプラインを提供します。
//!
//! リクエストを投入すると、パイプラインがキャッシュ照合・HTTP実行・
//! ワーカースレッドでのパース・キャッシュへの書き戻しを行い、結果を
//! 指定の配信コンテキスト（単一の論理スレッド）へ届けます。
//!
//! ## 特徴
//!
//! - **優先度とFIFO/LIFO**: 高優先度から順に、同率ではFIFOが先に処理
//! - **ディスクキャッシュ**: 容量制限・4段階プルーニング・遅延書き込み
//! - **二段配信**: ソフト期限切れのヒットはキャッシュを即配信し、
//!   バックグラウンドでネットワーク更新
//! - **合流**: 同一キーの同時リクエストは1回のHTTP実行に合流
//! - **一括キャンセル**: タグまたは述語でまとめてキャンセル
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  RequestQueue                                          │
//! │  ├─ cache staging ──► CacheDispatcher (1スレッド)       │
//! │  │                        │ ┌─────────────┐            │
//! │  │                        ├─► DiskCache    │← 遅延書き込み
//! │  │                        │ └─────────────┘            │
//! │  ├─ network staging ─► NetworkDispatcher (Nスレッド)    │
//! │  │                        │ Network (注入)              │
//! │  └─ ResponseDelivery ─► DeliveryExecutor (注入)         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 使用例
//!
//! ```no_run
//! use courier::{DeliveryThread, PipelineConfig, RequestQueue, StringRequest};
//! use std::sync::Arc;
//!
//! # struct MyTransport;
//! # impl courier::Network for MyTransport {
//! #     fn perform_request(
//! #         &self,
//! #         _request: &courier::Request,
//! #     ) -> Result<courier::NetworkResponse, courier::CourierError> {
//! #         Ok(courier::NetworkResponse::ok(Vec::new()))
//! #     }
//! # }
//! let config = PipelineConfig::from_toml_str(
//!     r#"cache_dir = "/var/cache/app/http""#,
//! ).unwrap();
//!
//! let queue = RequestQueue::new(
//!     config,
//!     Arc::new(MyTransport),
//!     Arc::new(DeliveryThread::new()),
//! );
//! queue.start();
//!
//! let request = StringRequest::new(
//!     "http://example.com/greeting",
//!     |body, source, _intermediate| println!("{:?}: {}", source, body),
//!     |err| eprintln!("failed: {}", err),
//! )
//! .build();
//! queue.add(request);
//! ```
//!
//! ロガー（ftlog）の初期化はホスト側で行います。

pub mod bandwidth;
pub mod cache;
pub mod config;
pub mod delivery;
pub mod error;
pub mod request;
pub mod requests;
pub mod transport;

mod dispatch;
mod queue;

pub use bandwidth::BandwidthMonitor;
pub use cache::{
    CacheEntry, CacheEntryBuilder, CacheHeader, DiskCache, FramingError, CACHE_MAGIC,
};
pub use config::PipelineConfig;
pub use delivery::{DeliveryExecutor, DeliveryThread, InlineExecutor};
pub use error::{CourierError, FailureDetail};
pub use queue::RequestQueue;
pub use request::{
    DeliveryType, Method, ParsedResponse, Priority, Request, RequestBuilder, RequestHandler,
    RetryPolicy, ReturnStrategy,
};
pub use requests::{BytesRequest, ErrorListener, JsonRequest, Listener, StringRequest};
pub use transport::{Network, NetworkResponse};

/// 現在時刻（エポックミリ秒）
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
