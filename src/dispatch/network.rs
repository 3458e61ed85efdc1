//! ネットワークディスパッチャ
//!
//! ネットワークステージングキューを消費するワーカースレッドのプールです。
//! トランスポートの実行、ワーカースレッド上でのパース、キャッシュへの
//! 書き戻し、リターン戦略に応じた配信・抑制を担います。
//!
//! キャンセルは3箇所（取り出し直後・トランスポート後・配信実行時）で
//! 観測されます。実行中のトランスポートは中断せず、結果を破棄します。

use crate::error::CourierError;
use crate::queue::QueueCore;
use crate::request::{DeliveryType, Request, ReturnStrategy};
use ftlog::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub(crate) struct NetworkDispatcher;

impl NetworkDispatcher {
    /// ディスパッチャスレッドを起動
    pub(crate) fn spawn(core: Arc<QueueCore>, id: usize) -> JoinHandle<()> {
        thread::Builder::new()
            .name(format!("courier-network-dispatcher-{}", id))
            .spawn(move || run(core, id))
            .expect("failed to spawn network dispatcher thread")
    }
}

fn run(core: Arc<QueueCore>, id: usize) {
    debug!("[NetworkDispatcher {}] start", id);
    while let Some(request) = core.network_queue.take() {
        process(&core, request);
    }
    debug!("[NetworkDispatcher {}] stop", id);
}

fn process(core: &Arc<QueueCore>, request: Arc<Request>) {
    let start = Instant::now();
    request.add_marker("network-queue-take");

    if request.is_canceled() {
        request.finish("network-discard-cancelled");
        return;
    }

    debug!(
        "[traffic-tag] {:#010x} {}",
        request.traffic_tag(),
        request.url()
    );

    let response = match core.network.perform_request(&request) {
        Ok(response) => response,
        Err(error) => {
            deliver_network_error(core, request, error, start);
            return;
        }
    };
    request.add_marker("network-http-complete");

    // 304かつ配信済みなら、同じレスポンスを二重に配らない
    if response.not_modified && request.has_had_response_delivered() {
        request.finish("not-modified-already-delivered");
        return;
    }

    // ワーカースレッド上でパースする。メモリを大量に使うパーサは
    // プロセス全体のロックで直列化する
    let parsed = {
        let _serial = request
            .needs_serial_parse()
            .then(|| core.parse_mutex.lock().unwrap());
        catch_unwind(AssertUnwindSafe(|| {
            request.parse_network_response(&response)
        }))
    };
    let parsed = match parsed {
        Ok(result) => result,
        Err(_) => {
            error!("unhandled panic while parsing response: {}", request.url());
            Err(CourierError::parse("response parser panicked"))
        }
    };
    request.add_marker("network-parse-complete");

    let mut parsed = match parsed {
        Ok(parsed) => parsed,
        Err(mut error) => {
            // パースエラーは戦略に関わらず常に配信する
            error.set_network_time_ms(start.elapsed().as_millis() as u64);
            core.delivery.post_error(request, error);
            return;
        }
    };

    // 画像クラスのレスポンスは帯域サンプルに寄与する
    if request.is_image_class() {
        core.bandwidth
            .record(response.body.len(), start.elapsed().as_millis() as u64);
    }

    // キャッシュへの書き戻し
    if request.should_cache() {
        if let Some(entry) = parsed.cache_entry.take() {
            core.cache
                .put(request.cache_key(), entry, request.cache_instantly());
            request.add_marker("network-cache-written");
        }
    }

    // キャッシュが既に応えた NETWORK_IF_NO_CACHE は二度目を配らない
    if request.has_had_response_delivered()
        && request.return_strategy() == ReturnStrategy::NetworkIfNoCache
    {
        request.cancel();
    }

    request.mark_delivery(DeliveryType::Network);
    core.delivery.post_response(request, Arc::new(parsed));
}

fn deliver_network_error(
    core: &Arc<QueueCore>,
    request: Arc<Request>,
    error: CourierError,
    start: Instant,
) {
    // キャッシュが既に応えていれば、これらの戦略ではエラーを握りつぶす
    if request.has_had_response_delivered()
        && matches!(
            request.return_strategy(),
            ReturnStrategy::NetworkIfNoCache | ReturnStrategy::CacheIfNetworkFails
        )
    {
        request.finish("network-error-suppressed");
        return;
    }

    let mut error = error;
    error.set_network_time_ms(start.elapsed().as_millis() as u64);
    let error = request.parse_network_error(error);
    core.delivery.post_error(request, error);
}
