//! レスポンス配信
//!
//! パース済みレスポンスとエラーを、単一の論理スレッド（配信コンテキスト）
//! 上でリスナーへ届けます。同一リクエストへの配信は全順序です。
//! 実行時点でキャンセル済みのリクエストはコールバックなしで完了します。

use crate::error::CourierError;
use crate::request::{ParsedResponse, Request};
use ftlog::debug;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// 配信ジョブ
type Job = Box<dyn FnOnce() + Send>;

/// 配信コンテキスト
///
/// ホスト側の単一論理スレッド（UIスレッドなど）にジョブを投げる契約。
/// 専用スレッドで十分な場合は[`DeliveryThread`]を使います。
pub trait DeliveryExecutor: Send + Sync {
    /// ジョブを配信コンテキストへ投げる
    fn post(&self, job: Job);
}

/// 専用スレッドによる配信コンテキスト
///
/// 投入順にジョブを実行する単一コンシューマスレッドを起動します。
pub struct DeliveryThread {
    tx: Sender<Option<Job>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryThread {
    /// 配信スレッドを起動
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<Option<Job>>();
        let handle = thread::Builder::new()
            .name("courier-delivery".to_string())
            .spawn(move || {
                debug!("[DeliveryThread] start");
                while let Ok(Some(job)) = rx.recv() {
                    job();
                }
                debug!("[DeliveryThread] stop");
            })
            .expect("failed to spawn delivery thread");

        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// 配信スレッドを停止して合流
    pub fn stop(&self) {
        let _ = self.tx.send(None);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for DeliveryThread {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryExecutor for DeliveryThread {
    fn post(&self, job: Job) {
        let _ = self.tx.send(Some(job));
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 呼び出しスレッド上で即座に実行する配信コンテキスト
///
/// テストや、配信順序をホスト側で制御したい場合に使います。
pub struct InlineExecutor;

impl DeliveryExecutor for InlineExecutor {
    fn post(&self, job: Job) {
        job();
    }
}

/// レスポンス・エラーの配信ランナブルを組み立てるラッパー
///
/// ディスパッチャはここを通してのみ配信します。
#[derive(Clone)]
pub(crate) struct ResponseDelivery {
    executor: Arc<dyn DeliveryExecutor>,
}

impl ResponseDelivery {
    pub(crate) fn new(executor: Arc<dyn DeliveryExecutor>) -> Self {
        Self { executor }
    }

    /// レスポンスを配信する
    pub(crate) fn post_response(&self, request: Arc<Request>, response: Arc<ParsedResponse>) {
        self.post_response_with(request, response, None);
    }

    /// レスポンスを配信し、配信後に後続処理を実行する
    ///
    /// `followup`はソフト期限切れヒットのネットワーク更新の投入などに
    /// 使われます。実行時点でキャンセル済みの場合、リスナーも後続処理も
    /// 呼ばれません。
    pub(crate) fn post_response_with(
        &self,
        request: Arc<Request>,
        response: Arc<ParsedResponse>,
        followup: Option<Job>,
    ) {
        request.add_marker("post-response");

        self.executor.post(Box::new(move || {
            if request.is_canceled() {
                request.finish("canceled-at-delivery");
                return;
            }

            // 「最後に配信された結果」はリスナーに到達した結果だけ。
            // キャンセルでno-op化したランナブルはここまで来ない
            request.set_last_response(Arc::clone(&response));
            request.set_delivery_ran();
            request.deliver_response(&response);

            if response.intermediate {
                request.add_marker("intermediate-response");
            } else {
                request.finish("done");
            }

            if let Some(followup) = followup {
                followup();
            }
        }));
    }

    /// エラーを配信する
    pub(crate) fn post_error(&self, request: Arc<Request>, error: CourierError) {
        request.add_marker("post-error");

        self.executor.post(Box::new(move || {
            if request.is_canceled() {
                request.finish("canceled-at-delivery");
                return;
            }

            request.set_last_error(error.clone());
            request.set_delivery_ran();
            request.deliver_error(&error);
            request.finish("done");
        }));
    }
}
