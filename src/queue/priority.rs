//! 優先度付き待機キュー
//!
//! ディスパッチャが消費するスレッドセーフなブロッキングキューを
//! 提供します。取り出し順は(優先度の降順, シーケンス番号の昇順)です。
//! LIFOリクエストはシーケンス刻印時に`u32::MAX − n`へ変換されるため、
//! 同一優先度ではFIFO勢がすべて先に排出されます。

use crate::request::Request;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};

/// ヒープ上のリクエスト
///
/// `BinaryHeap`はmax-heapなので、先にディスパッチすべきものほど
/// 「大きい」と定義する。
struct PendingRequest(Arc<Request>);

impl PartialEq for PendingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for PendingRequest {}

impl PartialOrd for PendingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingRequest {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // 優先度が高いほど先、同率ならシーケンスが小さいほど先
        self.0
            .priority()
            .cmp(&other.0.priority())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

struct QueueState {
    heap: BinaryHeap<PendingRequest>,
    closed: bool,
}

/// 優先度付き待機キュー
pub(crate) struct PriorityWaitQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl PriorityWaitQueue {
    /// 新しいキューを作成
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// リクエストを投入
    pub(crate) fn put(&self, request: Arc<Request>) {
        let mut state = self.state.lock().unwrap();
        state.heap.push(PendingRequest(request));
        self.available.notify_one();
    }

    /// リクエストを取り出す
    ///
    /// キューが空の間はブロックします。[`PriorityWaitQueue::close`]が
    /// 呼ばれると、残っているリクエストに関わらず`None`を返します
    /// （シャットダウンの合図）。
    pub(crate) fn take(&self) -> Option<Arc<Request>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return None;
            }
            if let Some(PendingRequest(request)) = state.heap.pop() {
                return Some(request);
            }
            state = self.available.wait(state).unwrap();
        }
    }

    /// キューを閉じ、ブロック中の消費者を起こす
    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.available.notify_all();
    }

    /// キューを再び開く（`start`のやり直し用）
    pub(crate) fn open(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = false;
    }

    /// 現在の滞留数
    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }
}
