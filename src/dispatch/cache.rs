//! キャッシュディスパッチャ
//!
//! キャッシュステージングキューを消費する単一のワーカースレッドです。
//! リクエストごとにキャッシュを照合し、新鮮なヒットはそのまま配信、
//! ソフト期限切れは配信しつつネットワーク更新へ、ミスと期限切れは
//! ネットワークステージングへ回します。

use crate::now_ms;
use crate::queue::QueueCore;
use crate::request::{DeliveryType, Request};
use crate::transport::NetworkResponse;
use ftlog::{debug, error, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub(crate) struct CacheDispatcher;

impl CacheDispatcher {
    /// ディスパッチャスレッドを起動
    pub(crate) fn spawn(core: Arc<QueueCore>) -> JoinHandle<()> {
        thread::Builder::new()
            .name("courier-cache-dispatcher".to_string())
            .spawn(move || run(core))
            .expect("failed to spawn cache dispatcher thread")
    }
}

fn run(core: Arc<QueueCore>) {
    debug!("[CacheDispatcher] start");
    while let Some(request) = core.cache_queue.take() {
        process(&core, request);
    }
    debug!("[CacheDispatcher] stop");
}

fn process(core: &Arc<QueueCore>, request: Arc<Request>) {
    request.add_marker("cache-queue-take");

    if request.is_canceled() {
        request.finish("cache-discard-cancelled");
        return;
    }

    let key = request.cache_key().to_string();

    // ヘッダーだけで照合する（ボディの読み込みは必要になってから）
    let Some(header) = core.cache.get_headers(&key) else {
        request.add_marker("cache-miss");
        core.network_queue.put(request);
        return;
    };

    let now = now_ms();

    if header.is_expired(now) {
        // ハード期限切れ。条件付きGET用に注釈してネットワークへ
        request.add_marker("cache-hit-expired");
        if let Some(entry) = core.cache.get(&key) {
            request.set_cache_entry(entry);
        }
        core.network_queue.put(request);
        return;
    }

    // 有効なヒット。フルレコードを読む（読めなければミス扱い）
    let Some(entry) = core.cache.get(&key) else {
        request.add_marker("cache-miss");
        core.network_queue.put(request);
        return;
    };

    request.add_marker("cache-hit");

    // キャッシュ済みボディを通常のレスポンスと同じ経路でパースする
    let synthetic = NetworkResponse::new(
        200,
        entry.data.clone(),
        entry.response_headers.clone(),
        false,
    );
    let parsed = {
        let _serial = request
            .needs_serial_parse()
            .then(|| core.parse_mutex.lock().unwrap());
        catch_unwind(AssertUnwindSafe(|| {
            request.parse_network_response(&synthetic)
        }))
    };
    let parsed = match parsed {
        Ok(result) => result,
        Err(_) => {
            error!("unhandled panic while parsing cache record: {}", request.url());
            Err(crate::error::CourierError::parse("response parser panicked"))
        }
    };

    let mut parsed = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            // キャッシュ上のレコードがパースできないなら捨てて取り直す
            warn!("unparseable cache record for {}: {}", request.url(), e);
            core.cache.remove(&key);
            request.add_marker("cache-parse-failed");
            core.network_queue.put(request);
            return;
        }
    };
    request.add_marker("cache-hit-parsed");

    // キャッシュヒットの配信でキャッシュを書き戻さない
    parsed.cache_entry = None;

    if !header.refresh_needed(now) {
        // ソフト期限内。これで完了
        request.mark_delivery(DeliveryType::Cache);
        core.delivery.post_response(request, Arc::new(parsed));
        return;
    }

    // ソフト期限切れ。いったん配信してからネットワーク更新へ回す
    request.add_marker("cache-hit-refresh-needed");
    request.set_cache_entry(entry);
    parsed.intermediate = true;
    request.mark_delivery(DeliveryType::Cache);

    let network_queue = Arc::clone(&core.network_queue);
    let refresh = Arc::clone(&request);
    core.delivery.post_response_with(
        request,
        Arc::new(parsed),
        Some(Box::new(move || network_queue.put(refresh))),
    );
}
