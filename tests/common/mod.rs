//! テスト共通ヘルパー
//!
//! スクリプト化されたトランスポートと、リスナー呼び出しを記録する
//! イベントログを提供します。

use courier::{
    CourierError, DeliveryThread, DeliveryType, FailureDetail, Network, NetworkResponse,
    PipelineConfig, Request, RequestBuilder, RequestQueue, StringRequest,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// テスト用ロガーを一度だけ初期化
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Ok(guard) = ftlog::Builder::new().try_init() {
            std::mem::forget(guard);
        }
    });
}

/// 記録されたトランスポート呼び出し
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub revalidation: Vec<(String, String)>,
}

/// スクリプト化されたトランスポート
///
/// URLごとに返すレスポンス（またはエラー）のキューを持ちます。
/// スクリプトが無い呼び出しはネットワークエラーになります。
pub struct MockNetwork {
    scripts: Mutex<HashMap<String, VecDeque<Result<NetworkResponse, CourierError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Mutex<Duration>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// URLに対するレスポンスを積む
    pub fn enqueue(&self, url: &str, result: Result<NetworkResponse, CourierError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    /// トランスポート実行を遅延させる（合流・キャンセルの検証用）
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// これまでの呼び出し
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// URLごとの呼び出し回数
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .count()
    }
}

impl Network for MockNetwork {
    fn perform_request(&self, request: &Request) -> Result<NetworkResponse, CourierError> {
        self.calls.lock().unwrap().push(RecordedCall {
            url: request.url().to_string(),
            revalidation: request.revalidation_headers(),
        });

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut scripts = self.scripts.lock().unwrap();
        if let Some(queue) = scripts.get_mut(request.url()) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        Err(CourierError::Network(FailureDetail::default()))
    }
}

/// リスナー呼び出しの記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Response {
        body: String,
        source: DeliveryType,
        intermediate: bool,
    },
    Error(String),
}

/// イベントログ
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// レスポンスイベントだけを(ボディ, 種別, 中間フラグ)で返す
    pub fn responses(&self) -> Vec<(String, DeliveryType, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Response {
                    body,
                    source,
                    intermediate,
                } => Some((body, source, intermediate)),
                Event::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(message) => Some(message),
                Event::Response { .. } => None,
            })
            .collect()
    }
}

/// 条件が満たされるまでポーリングする（最長5秒）
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// イベントログへ記録する文字列リクエストのビルダーを作る
pub fn string_request(url: &str, log: &EventLog) -> RequestBuilder {
    let on_response = {
        let log = log.clone();
        move |body: &String, source: DeliveryType, intermediate: bool| {
            log.push(Event::Response {
                body: body.clone(),
                source,
                intermediate,
            });
        }
    };
    let on_error = {
        let log = log.clone();
        move |error: &CourierError| {
            log.push(Event::Error(error.to_string()));
        }
    };
    StringRequest::new(url, on_response, on_error)
}

/// 起動済みパイプラインとその周辺
pub struct TestPipeline {
    pub queue: RequestQueue,
    pub network: Arc<MockNetwork>,
    pub cache_dir: TempDir,
}

/// パイプラインを組み立てて起動する
pub fn start_pipeline() -> TestPipeline {
    start_pipeline_with(2, true)
}

/// スレッド数と起動有無を指定してパイプラインを組み立てる
pub fn start_pipeline_with(network_threads: usize, start: bool) -> TestPipeline {
    init_test_logging();

    let cache_dir = TempDir::new().unwrap();
    let config = PipelineConfig {
        cache_dir: cache_dir.path().to_path_buf(),
        network_threads,
        ..Default::default()
    };

    let network = Arc::new(MockNetwork::new());
    let queue = RequestQueue::new(
        config,
        Arc::clone(&network) as Arc<dyn Network>,
        Arc::new(DeliveryThread::new()),
    );
    if start {
        queue.start();
    }

    TestPipeline {
        queue,
        network,
        cache_dir,
    }
}
