//! リクエスト
//!
//! パイプラインを流れるリクエストの状態機械を提供します。リクエストは
//! 送信時に`Arc`で共有され、キューファサード・各ディスパッチャ・配信
//! コンテキストから同時に参照されます。キャンセルと完了のフラグは
//! アトミックで、一度立ったら戻りません。
//!
//! ボディのパースと結果の配信はリクエスト種別ごとの
//! [`RequestHandler`]実装に委ねられます（文字列・JSON・バイト列などは
//! [`crate::requests`]を参照）。

use crate::cache::{format_http_date, CacheEntry};
use crate::error::CourierError;
use crate::queue::QueueCore;
use crate::transport::NetworkResponse;
use ftlog::{debug, info};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use xxhash_rust::xxh32::xxh32;

/// この時間を超えたリクエストは完了時にログに残す
const SLOW_REQUEST_THRESHOLD_MS: u128 = 3000;

/// HTTPメソッド
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// 文字列として取得
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

/// リクエスト優先度
///
/// 高い優先度から順にディスパッチされます。同一優先度内は
/// シーケンス番号順（FIFO、ただしLIFO指定は後回し）です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Background,
    Low,
    Normal,
    High,
    Immediate,
}

/// 配信済みレスポンスの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryType {
    /// まだ何も配信されていない
    None,
    /// キャッシュレスポンスが配信された
    Cache,
    /// ネットワークレスポンスが配信された
    Network,
}

impl DeliveryType {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DeliveryType::Cache,
            2 => DeliveryType::Network,
            _ => DeliveryType::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DeliveryType::None => 0,
            DeliveryType::Cache => 1,
            DeliveryType::Network => 2,
        }
    }
}

/// リターン戦略
///
/// キャッシュとネットワークのどちらの結果を、どの条件で配信するかを
/// 決めるリクエストごとのポリシーです。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStrategy {
    /// キャッシュミスの場合のみネットワーク結果を配信
    NetworkIfNoCache,
    /// ネットワーク失敗時、キャッシュが既に配信されていればエラーを抑制
    CacheIfNetworkFails,
    /// キャッシュを完全にスキップ
    NetworkOnly,
    /// キャッシュとネットワークの両方を配信（最大2回のコールバック）
    Double,
}

/// リトライポリシー
///
/// タイムアウトとリトライ回数を管理します。リトライ可能な失敗のたびに
/// トランスポートが[`RetryPolicy::retry`]を呼び、タイムアウトは
/// バックオフ係数に従って伸びます。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    current_timeout_ms: u64,
    current_retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl RetryPolicy {
    /// デフォルトのソケットタイムアウト（ミリ秒）
    pub const DEFAULT_TIMEOUT_MS: u64 = 2500;
    /// デフォルトの最大リトライ回数
    pub const DEFAULT_MAX_RETRIES: u32 = 1;
    /// デフォルトのバックオフ係数
    pub const DEFAULT_BACKOFF_MULT: f32 = 1.0;

    /// 新しいリトライポリシーを作成
    pub fn new(timeout_ms: u64, max_retries: u32, backoff_multiplier: f32) -> Self {
        Self {
            current_timeout_ms: timeout_ms,
            current_retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    /// 現在のタイムアウト（ミリ秒）
    #[inline]
    pub fn current_timeout_ms(&self) -> u64 {
        self.current_timeout_ms
    }

    /// これまでのリトライ回数
    #[inline]
    pub fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    /// 残りリトライ回数があるかどうか
    #[inline]
    pub fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count <= self.max_retries
    }

    /// リトライを記録
    ///
    /// タイムアウトをバックオフ係数に従って伸ばします。試行回数を
    /// 使い切っていた場合は渡されたエラーをそのまま返します。
    pub fn retry(&mut self, error: CourierError) -> Result<(), CourierError> {
        self.current_retry_count += 1;
        self.current_timeout_ms +=
            (self.current_timeout_ms as f32 * self.backoff_multiplier) as u64;
        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(error)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_TIMEOUT_MS,
            Self::DEFAULT_MAX_RETRIES,
            Self::DEFAULT_BACKOFF_MULT,
        )
    }
}

/// パース済みレスポンス
///
/// ワーカースレッドでのパース結果。配信される値は型消去され、
/// ハンドラが自身の型にダウンキャストして取り出します。
pub struct ParsedResponse {
    /// パース済みの値
    pub value: Arc<dyn Any + Send + Sync>,
    /// キャッシュに書き戻すエントリ（キャッシュ可能な場合）
    pub cache_entry: Option<CacheEntry>,
    /// 中間レスポンス（ソフト期限切れのキャッシュ配信で、この後
    /// ネットワーク更新が控えている）かどうか
    pub intermediate: bool,
}

impl std::fmt::Debug for ParsedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedResponse")
            .field("value", &"<dyn Any>")
            .field("cache_entry", &self.cache_entry)
            .field("intermediate", &self.intermediate)
            .finish()
    }
}

impl ParsedResponse {
    /// 新しいパース済みレスポンスを作成
    pub fn new(value: impl Any + Send + Sync) -> Self {
        Self {
            value: Arc::new(value),
            cache_entry: None,
            intermediate: false,
        }
    }

    /// キャッシュエントリを設定
    pub fn with_cache_entry(mut self, entry: Option<CacheEntry>) -> Self {
        self.cache_entry = entry;
        self
    }

    /// 値を型付きで取り出す
    pub fn value_as<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

/// リクエストハンドラ
///
/// リクエスト種別ごとのパースと配信の契約。`parse_network_response`は
/// ワーカースレッドで、`deliver_*`は配信コンテキスト上で呼ばれます。
pub trait RequestHandler: Send + Sync {
    /// ネットワークレスポンスをパースする
    ///
    /// キャッシュ可能な場合は[`ParsedResponse::cache_entry`]を設定します
    /// （[`crate::cache::parse_cache_headers`]と
    /// [`crate::cache::apply_ttl_overrides`]を参照）。
    fn parse_network_response(
        &self,
        request: &Request,
        response: &NetworkResponse,
    ) -> Result<ParsedResponse, CourierError>;

    /// ネットワークエラーをより具体的なエラーに変換する
    fn parse_network_error(&self, error: CourierError) -> CourierError {
        error
    }

    /// パース済みレスポンスをリスナーへ配信する
    fn deliver_response(&self, request: &Request, response: &ParsedResponse);

    /// エラーをリスナーへ配信する
    fn deliver_error(&self, request: &Request, error: &CourierError);

    /// パースをプロセス全体で直列化するかどうか
    ///
    /// メモリを大量に使うパーサ（画像デコードなど）はtrueを返し、
    /// ピークヒープを抑えます。
    fn needs_serial_parse(&self) -> bool {
        false
    }

    /// 画像クラスのレスポンスかどうか
    ///
    /// キャッシュの優先削除と帯域サンプリングの対象になります。
    fn is_image(&self) -> bool {
        false
    }
}

/// リクエスト
///
/// 送信後は[`Arc`]で共有され、変更可能な状態はアトミックと小さな
/// ロックに限定されています。
pub struct Request {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    tag: Option<u64>,
    priority: Priority,
    fifo: bool,
    should_cache: bool,
    cache_instantly: bool,
    offline_cache: bool,
    ttl_ms: i64,
    soft_ttl_ms: i64,
    return_strategy: ReturnStrategy,
    handler: Box<dyn RequestHandler>,
    retry: Mutex<RetryPolicy>,
    traffic_tag: u32,
    birth: Instant,

    /// 送信時に一度だけ刻印されるシーケンス番号
    sequence: OnceCell<u32>,
    cancelled: AtomicBool,
    finished: AtomicBool,
    joined: AtomicBool,
    delivery: AtomicU8,
    /// 配信ジョブが実際にリスナーまで到達したか
    ///
    /// キャンセルでno-op化した配信では立たない。合流先への
    /// ファンアウト可否の判定に使う。
    delivery_ran: AtomicBool,
    /// 条件付き再検証用に注釈されたキャッシュエントリ
    cache_entry: Mutex<Option<CacheEntry>>,
    /// このリクエストに合流した重複リクエスト
    waiters: Mutex<Vec<Arc<Request>>>,
    /// 最後に配信されたレスポンス（合流先へのファンアウトに使用）
    last_response: Mutex<Option<Arc<ParsedResponse>>>,
    /// 最後に配信されたエラー
    last_error: Mutex<Option<CourierError>>,
    queue: Mutex<Weak<QueueCore>>,
}

impl Request {
    /// ビルダーを作成
    pub fn builder(
        method: Method,
        url: impl Into<String>,
        handler: Box<dyn RequestHandler>,
    ) -> RequestBuilder {
        RequestBuilder::new(method, url, handler)
    }

    /// HTTPメソッド
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// リクエストURL
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// キャッシュキー（= URL）
    #[inline]
    pub fn cache_key(&self) -> &str {
        &self.url
    }

    /// リクエストヘッダー
    #[inline]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// リクエストボディ
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// 一括キャンセル用のタグ
    #[inline]
    pub fn tag(&self) -> Option<u64> {
        self.tag
    }

    /// 優先度
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// FIFO処理かどうか（falseはLIFO、画像向け）
    #[inline]
    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    /// レスポンスをキャッシュすべきかどうか
    #[inline]
    pub fn should_cache(&self) -> bool {
        self.should_cache
    }

    /// キャッシュ書き込みを即時に行うかどうか
    #[inline]
    pub fn cache_instantly(&self) -> bool {
        self.cache_instantly
    }

    /// オフラインキャッシュ指定かどうか
    #[inline]
    pub fn offline_cache(&self) -> bool {
        self.offline_cache
    }

    /// TTL上書き（ミリ秒、0は上書きなし）
    #[inline]
    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// ソフトTTL上書き（ミリ秒、0は上書きなし）
    #[inline]
    pub fn soft_ttl_ms(&self) -> i64 {
        self.soft_ttl_ms
    }

    /// リターン戦略
    #[inline]
    pub fn return_strategy(&self) -> ReturnStrategy {
        self.return_strategy
    }

    /// URLホストから導出した通信量タグ
    #[inline]
    pub fn traffic_tag(&self) -> u32 {
        self.traffic_tag
    }

    /// リトライポリシーへのアクセス
    ///
    /// トランスポートがリトライのたびに更新します。
    pub fn retry_policy(&self) -> MutexGuard<'_, RetryPolicy> {
        self.retry.lock().unwrap()
    }

    /// 現在のソケットタイムアウト（ミリ秒）
    pub fn timeout_ms(&self) -> u64 {
        self.retry.lock().unwrap().current_timeout_ms()
    }

    // ====================
    // シーケンスと順序
    // ====================

    /// シーケンス番号を刻印する
    ///
    /// LIFOリクエストは`u32::MAX − n`に変換され、同一優先度のFIFO勢が
    /// すべて先に処理される。キューファサードだけが呼ぶ。
    pub(crate) fn stamp_sequence(&self, raw: u32) {
        let seq = if self.fifo { raw } else { u32::MAX - raw };
        let _ = self.sequence.set(seq);
    }

    /// シーケンス番号
    #[inline]
    pub fn sequence(&self) -> u32 {
        *self.sequence.get().unwrap_or(&0)
    }

    // ====================
    // 状態フラグ
    // ====================

    /// キャンセルする
    ///
    /// 単調なフラグで、以後コールバックは配信されない。実行中の
    /// トランスポートは中断されず、結果が破棄される。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// キャンセル済みかどうか
    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// 完了済みかどうか
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// 合流済み（重複リクエストとして親に接続済み）かどうか
    #[inline]
    pub fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    pub(crate) fn set_joined(&self) {
        self.joined.store(true, Ordering::Release);
    }

    /// 配信済みレスポンスの種別を記録
    pub fn mark_delivery(&self, delivery: DeliveryType) {
        self.delivery.store(delivery.as_u8(), Ordering::Release);
    }

    /// 配信ジョブがリスナーまで到達したことを記録
    ///
    /// 配信ランナブルの中からのみ呼ばれる。
    pub(crate) fn set_delivery_ran(&self) {
        self.delivery_ran.store(true, Ordering::Release);
    }

    /// リスナーへの配信が少なくとも一度実際に行われたかどうか
    ///
    /// [`Request::has_had_response_delivered`]はディスパッチャが配信を
    /// 投稿した時点で立つのに対し、こちらはランナブルがキャンセルで
    /// no-op化せずリスナーまで到達した場合にのみ立つ。
    pub(crate) fn delivery_ran(&self) -> bool {
        self.delivery_ran.load(Ordering::Acquire)
    }

    /// 最後に配信されたレスポンスの種別
    #[inline]
    pub fn delivery_type(&self) -> DeliveryType {
        DeliveryType::from_u8(self.delivery.load(Ordering::Acquire))
    }

    /// キャッシュまたはネットワークのレスポンスが配信済みかどうか
    #[inline]
    pub fn has_had_response_delivered(&self) -> bool {
        self.delivery_type() != DeliveryType::None
    }

    // ====================
    // キャッシュ注釈
    // ====================

    /// キャッシュから取り出したエントリを注釈する
    ///
    /// 再検証（304）時にボディを復元するために使う。
    pub fn set_cache_entry(&self, entry: CacheEntry) {
        *self.cache_entry.lock().unwrap() = Some(entry);
    }

    /// 注釈されたキャッシュエントリ
    pub fn cache_entry(&self) -> Option<CacheEntry> {
        self.cache_entry.lock().unwrap().clone()
    }

    /// 条件付きリクエスト用のヘッダー
    ///
    /// 注釈されたエントリから`If-None-Match`と`If-Modified-Since`を
    /// 導出します。
    pub fn revalidation_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(entry) = self.cache_entry.lock().unwrap().as_ref() {
            if let Some(etag) = &entry.etag {
                headers.push(("If-None-Match".to_string(), etag.clone()));
            }
            if let Some(last_modified) = entry.header("Last-Modified") {
                headers.push(("If-Modified-Since".to_string(), last_modified.to_string()));
            } else if entry.server_date > 0 {
                headers.push((
                    "If-Modified-Since".to_string(),
                    format_http_date(entry.server_date),
                ));
            }
        }
        headers
    }

    // ====================
    // 合流
    // ====================

    pub(crate) fn add_waiter(&self, waiter: Arc<Request>) {
        self.waiters.lock().unwrap().push(waiter);
    }

    pub(crate) fn take_waiters(&self) -> Vec<Arc<Request>> {
        std::mem::take(&mut *self.waiters.lock().unwrap())
    }

    pub(crate) fn set_last_response(&self, response: Arc<ParsedResponse>) {
        *self.last_response.lock().unwrap() = Some(response);
    }

    pub(crate) fn last_response(&self) -> Option<Arc<ParsedResponse>> {
        self.last_response.lock().unwrap().clone()
    }

    pub(crate) fn set_last_error(&self, error: CourierError) {
        *self.last_error.lock().unwrap() = Some(error);
    }

    pub(crate) fn last_error(&self) -> Option<CourierError> {
        self.last_error.lock().unwrap().clone()
    }

    // ====================
    // パースと配信（ハンドラへの委譲）
    // ====================

    /// レスポンスをパースする（ワーカースレッド上）
    pub fn parse_network_response(
        &self,
        response: &NetworkResponse,
    ) -> Result<ParsedResponse, CourierError> {
        self.handler.parse_network_response(self, response)
    }

    /// ネットワークエラーを具体化する
    pub fn parse_network_error(&self, error: CourierError) -> CourierError {
        self.handler.parse_network_error(error)
    }

    /// レスポンスをリスナーへ配信する（配信コンテキスト上）
    pub fn deliver_response(&self, response: &ParsedResponse) {
        self.handler.deliver_response(self, response);
    }

    /// エラーをリスナーへ配信する（配信コンテキスト上）
    pub fn deliver_error(&self, error: &CourierError) {
        self.handler.deliver_error(self, error);
    }

    /// パースの直列化が必要かどうか
    #[inline]
    pub fn needs_serial_parse(&self) -> bool {
        self.handler.needs_serial_parse()
    }

    /// 画像クラスのリクエストかどうか
    #[inline]
    pub fn is_image_class(&self) -> bool {
        self.handler.is_image()
    }

    // ====================
    // ライフサイクル
    // ====================

    pub(crate) fn bind_queue(&self, queue: Weak<QueueCore>) {
        *self.queue.lock().unwrap() = queue;
    }

    /// ライフサイクルマーカーをログに残す
    pub fn add_marker(&self, marker: &str) {
        debug!("[{}] {}", marker, self.url);
    }

    /// リクエストを完了させる
    ///
    /// 冪等。キューファサードから登録解除され、合流したリクエストへ
    /// 結果がファンアウトされます。
    pub fn finish(self: &Arc<Self>, marker: &str) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.add_marker(marker);

        let elapsed = self.birth.elapsed().as_millis();
        if elapsed >= SLOW_REQUEST_THRESHOLD_MS {
            info!("{} ms: {}", elapsed, self);
        }

        let queue = self.queue.lock().unwrap().upgrade();
        if let Some(queue) = queue {
            queue.finish(self);
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:#010x} {:?} {}",
            if self.is_canceled() { "[X]" } else { "[ ]" },
            self.url,
            self.traffic_tag,
            self.priority,
            self.sequence()
        )
    }
}

/// URLからホスト部分を取り出す
fn host_of(url: &str) -> &str {
    let rest = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url);
    let end = rest
        .find(|c| c == '/' || c == ':' || c == '?')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// リクエストビルダー
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
    tag: Option<u64>,
    priority: Priority,
    fifo: bool,
    should_cache: bool,
    cache_instantly: bool,
    offline_cache: bool,
    ttl_ms: i64,
    soft_ttl_ms: i64,
    return_strategy: ReturnStrategy,
    retry: RetryPolicy,
    handler: Box<dyn RequestHandler>,
}

impl RequestBuilder {
    /// 新しいビルダーを作成
    pub fn new(method: Method, url: impl Into<String>, handler: Box<dyn RequestHandler>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            tag: None,
            priority: Priority::Normal,
            fifo: true,
            should_cache: true,
            cache_instantly: true,
            offline_cache: false,
            ttl_ms: 0,
            soft_ttl_ms: 0,
            return_strategy: ReturnStrategy::Double,
            retry: RetryPolicy::default(),
            handler,
        }
    }

    /// リクエストヘッダーを追加
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// リクエストボディを設定
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// 一括キャンセル用のタグを設定
    pub fn tag(mut self, tag: u64) -> Self {
        self.tag = Some(tag);
        self
    }

    /// 優先度を設定
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// LIFO処理にする（画像など、新しいものを優先したい場合）
    pub fn lifo(mut self) -> Self {
        self.fifo = false;
        self
    }

    /// キャッシュの可否を設定
    pub fn should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    /// キャッシュ書き込みを遅延させる
    pub fn cache_delayed(mut self) -> Self {
        self.cache_instantly = false;
        self
    }

    /// オフラインキャッシュ指定にする
    ///
    /// TTL上書きと併用すると、ハード期限まで削除から保護されます。
    pub fn offline_cache(mut self) -> Self {
        self.offline_cache = true;
        self
    }

    /// TTL上書き（ミリ秒）を設定
    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// ソフトTTL上書き（ミリ秒）を設定
    pub fn soft_ttl_ms(mut self, soft_ttl_ms: i64) -> Self {
        self.soft_ttl_ms = soft_ttl_ms;
        self
    }

    /// リターン戦略を設定
    pub fn return_strategy(mut self, strategy: ReturnStrategy) -> Self {
        self.return_strategy = strategy;
        self
    }

    /// リトライポリシーを設定
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// リクエストをビルド
    pub fn build(self) -> Arc<Request> {
        let traffic_tag = xxh32(host_of(&self.url).as_bytes(), 0);
        Arc::new(Request {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            tag: self.tag,
            priority: self.priority,
            fifo: self.fifo,
            should_cache: self.should_cache,
            cache_instantly: self.cache_instantly,
            offline_cache: self.offline_cache,
            ttl_ms: self.ttl_ms,
            soft_ttl_ms: self.soft_ttl_ms,
            return_strategy: self.return_strategy,
            handler: self.handler,
            retry: Mutex::new(self.retry),
            traffic_tag,
            birth: Instant::now(),
            sequence: OnceCell::new(),
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            joined: AtomicBool::new(false),
            delivery: AtomicU8::new(0),
            delivery_ran: AtomicBool::new(false),
            cache_entry: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            last_response: Mutex::new(None),
            last_error: Mutex::new(None),
            queue: Mutex::new(Weak::new()),
        })
    }
}
