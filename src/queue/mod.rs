//! リクエストキュー
//!
//! パイプライン全体を束ねるファサードを提供します。リクエストの受付、
//! シーケンス刻印、同一キーの合流（コアレッシング）、ディスパッチャの
//! 起動・停止、一括キャンセルを担います。
//!
//! ## アーキテクチャ
//!
//! ```text
//! add() ──┬─(キャッシュ対象外)──────────────► network staging ─► NetworkDispatcher × N
//!         │                                        ▲
//!         └─► cache staging ─► CacheDispatcher ────┘（ミス・期限切れ・更新）
//!                   │
//!                   └─（ヒット）─► ResponseDelivery ─► 配信コンテキスト
//! ```

mod priority;

pub(crate) use priority::PriorityWaitQueue;

use crate::bandwidth::BandwidthMonitor;
use crate::cache::DiskCache;
use crate::config::PipelineConfig;
use crate::delivery::{DeliveryExecutor, ResponseDelivery};
use crate::dispatch::{CacheDispatcher, NetworkDispatcher};
use crate::request::{ParsedResponse, Request, ReturnStrategy};
use crate::transport::Network;
use ftlog::{debug, info};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// キューの共有コア
///
/// ディスパッチャとリクエストの双方から参照される状態。リクエスト側は
/// コアを`Weak`で参照するため、キュー停止後もリクエストは安全に完了できます。
pub(crate) struct QueueCore {
    pub(crate) cache: Arc<DiskCache>,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) delivery: ResponseDelivery,
    pub(crate) bandwidth: Arc<BandwidthMonitor>,
    /// メモリを大量に使うパースを直列化するプロセス全体のロック
    pub(crate) parse_mutex: Arc<Mutex<()>>,
    pub(crate) cache_queue: Arc<PriorityWaitQueue>,
    pub(crate) network_queue: Arc<PriorityWaitQueue>,
    /// シーケンス採番
    sequence: AtomicU32,
    /// 送信済みで未完了のリクエスト全件（一括キャンセル用）
    current: Mutex<Vec<Arc<Request>>>,
    /// キャッシュキーごとの実行中リクエスト（合流テーブル）
    in_flight: Mutex<HashMap<String, Arc<Request>>>,
}

impl QueueCore {
    /// リクエストの完了処理
    ///
    /// 登録を解除し、合流していたリクエストへ親の結果をファンアウト
    /// します。[`Request::finish`]から呼ばれます。
    pub(crate) fn finish(&self, request: &Arc<Request>) {
        self.current
            .lock()
            .unwrap()
            .retain(|r| !Arc::ptr_eq(r, request));

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let is_parent = in_flight
                .get(request.cache_key())
                .is_some_and(|parent| Arc::ptr_eq(parent, request));
            if is_parent {
                in_flight.remove(request.cache_key());
            }
        }

        let waiters = request.take_waiters();
        if waiters.is_empty() {
            return;
        }

        debug!(
            "releasing {} waiting requests for cache_key={}",
            waiters.len(),
            request.cache_key()
        );

        // ファンアウトできるのは親のリスナーに実際に到達した結果だけ。
        // キャンセルでno-op化した配信の値を親の「最後に配信された結果」と
        // して扱ってはならない
        let delivered = request.delivery_ran();
        let response = if delivered {
            request.last_response().map(|response| {
                if response.intermediate {
                    // 中間フラグを剥がして配る。合流側には後続の更新が無い
                    Arc::new(ParsedResponse {
                        value: Arc::clone(&response.value),
                        cache_entry: None,
                        intermediate: false,
                    })
                } else {
                    response
                }
            })
        } else {
            None
        };
        let error = if delivered { request.last_error() } else { None };
        let delivery_type = request.delivery_type();

        for waiter in waiters {
            if waiter.is_canceled() {
                waiter.finish("canceled-at-join");
                continue;
            }
            if let Some(response) = &response {
                waiter.mark_delivery(delivery_type);
                self.delivery.post_response(waiter, Arc::clone(response));
            } else if let Some(error) = &error {
                self.delivery.post_error(waiter, error.clone());
            } else {
                waiter.finish("join-parent-yielded-nothing");
            }
        }
    }
}

/// リクエストキュー
///
/// 1つのキャッシュディスパッチャとN個のネットワークディスパッチャを
/// 束ねるパイプラインの入口です。
pub struct RequestQueue {
    core: Arc<QueueCore>,
    network_threads: usize,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl RequestQueue {
    /// 新しいリクエストキューを作成
    ///
    /// トランスポートと配信コンテキストはホストから注入します。
    /// [`RequestQueue::start`]を呼ぶまでディスパッチは始まりません。
    pub fn new(
        config: PipelineConfig,
        network: Arc<dyn Network>,
        delivery: Arc<dyn DeliveryExecutor>,
    ) -> Self {
        let cache = Arc::new(DiskCache::new(
            config.cache_dir.clone(),
            config.max_cache_bytes,
            config.write_delay_ms,
        ));

        Self {
            core: Arc::new(QueueCore {
                cache,
                network,
                delivery: ResponseDelivery::new(delivery),
                bandwidth: Arc::new(BandwidthMonitor::new()),
                parse_mutex: Arc::new(Mutex::new(())),
                cache_queue: Arc::new(PriorityWaitQueue::new()),
                network_queue: Arc::new(PriorityWaitQueue::new()),
                sequence: AtomicU32::new(0),
                current: Mutex::new(Vec::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
            network_threads: config.network_threads,
            dispatchers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// パイプラインを起動
    ///
    /// キャッシュを同期的に初期化してから、キャッシュディスパッチャ1本と
    /// ネットワークディスパッチャN本を起動します。
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.core.cache.initialize();
        self.core.cache_queue.open();
        self.core.network_queue.open();

        let mut dispatchers = self.dispatchers.lock().unwrap();
        dispatchers.push(CacheDispatcher::spawn(Arc::clone(&self.core)));
        for id in 0..self.network_threads {
            dispatchers.push(NetworkDispatcher::spawn(Arc::clone(&self.core), id));
        }

        info!(
            "request queue started: 1 cache dispatcher, {} network dispatchers",
            self.network_threads
        );
    }

    /// パイプラインを停止
    ///
    /// ブロック中のディスパッチャを起こして終了させ、遅延書き込み
    /// ワーカーも停止します。滞留中のリクエストの処理は保証されません。
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        self.core.cache_queue.close();
        self.core.network_queue.close();

        for handle in self.dispatchers.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
        self.core.cache.shutdown();

        info!("request queue stopped");
    }

    /// リクエストを送信
    ///
    /// シーケンスを刻印し、キャッシュ対象ならステージングへ、対象外なら
    /// 直接ネットワークへ回します。同一キャッシュキーのリクエストが
    /// 実行中の場合は合流し、そのリクエストの結果を受け取ります。
    pub fn add(&self, request: Arc<Request>) -> Arc<Request> {
        request.bind_queue(Arc::downgrade(&self.core));
        self.core.current.lock().unwrap().push(Arc::clone(&request));

        let raw = self.core.sequence.fetch_add(1, Ordering::SeqCst);
        request.stamp_sequence(raw);
        request.add_marker("add-to-queue");

        if !request.should_cache() || request.return_strategy() == ReturnStrategy::NetworkOnly {
            self.core.network_queue.put(request.clone());
            return request;
        }

        let mut in_flight = self.core.in_flight.lock().unwrap();
        match in_flight.get(request.cache_key()) {
            Some(parent) => {
                request.set_joined();
                parent.add_waiter(Arc::clone(&request));
                debug!(
                    "request for cache_key={} is in flight, joining",
                    request.cache_key()
                );
            }
            None => {
                in_flight.insert(request.cache_key().to_string(), Arc::clone(&request));
                self.core.cache_queue.put(Arc::clone(&request));
            }
        }

        request
    }

    /// タグが一致するリクエストを一括キャンセル
    pub fn cancel_all_by_tag(&self, tag: u64) {
        self.cancel_all(|request| request.tag() == Some(tag));
    }

    /// 条件に一致するリクエストを一括キャンセル
    ///
    /// キャンセルされたリクエストはディスパッチャか配信コンテキストが
    /// 次に触れた時点で完了します。
    pub fn cancel_all(&self, filter: impl Fn(&Request) -> bool) {
        let current = self.core.current.lock().unwrap();
        let mut cancelled = 0usize;
        for request in current.iter() {
            if filter(request) {
                request.cancel();
                cancelled += 1;
            }
        }
        drop(current);

        if cancelled > 0 {
            debug!("cancelled {} in-flight requests", cancelled);
        }
    }

    /// ディスクキャッシュへの参照
    ///
    /// エントリの無効化（[`DiskCache::invalidate`]）などに使います。
    pub fn cache(&self) -> &Arc<DiskCache> {
        &self.core.cache
    }

    /// 帯域モニターへの参照
    pub fn bandwidth(&self) -> &Arc<BandwidthMonitor> {
        &self.core.bandwidth
    }
}

impl Drop for RequestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
