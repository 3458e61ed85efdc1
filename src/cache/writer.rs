//! 遅延書き込みワーカー
//!
//! ディスクキャッシュへの書き込みを遅延させる専用スレッドを提供します。
//! `put`の遅延書き込みは期限付きでmin-heapに積まれ、期限が来た時点で
//! メモリマップに残っているエントリのみディスクへ書き出されます
//! （`clear`や`remove`で先に消えていれば何もしません）。
//! メタデータ更新（`update_entry`）は受信即座に適用されます。

use super::disk::DiskCache;
use super::entry::CacheEntry;
use ftlog::debug;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// 書き込みオペレーション
pub(crate) enum WriteOp {
    /// 遅延書き込み。期限到達時にメモリマップから取り出して書き込む
    Put { key: String, deadline: Instant },
    /// メタデータ更新。即座に適用される
    Update { key: String, entry: CacheEntry },
    /// 保留中の遅延書き込みをすべて破棄
    Clear,
    /// ワーカーを終了
    Shutdown,
}

/// 次のオペレーションを待つ最大時間。保留がなくても定期的に起きて
/// チャネル切断を検出する
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// 遅延書き込みワーカーのハンドル
pub(crate) struct CacheWriter {
    tx: Sender<WriteOp>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWriter {
    pub(crate) fn new(tx: Sender<WriteOp>, handle: JoinHandle<()>) -> Self {
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// オペレーションを送信
    ///
    /// ワーカーが既に終了している場合は黙って破棄します。
    pub(crate) fn send(&self, op: WriteOp) {
        let _ = self.tx.send(op);
    }

    /// ワーカーを停止して合流
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(WriteOp::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// ワーカースレッドのメインループ
pub(crate) fn run(cache: Arc<DiskCache>, rx: Receiver<WriteOp>) {
    debug!("[CacheWriter] worker started");
    let mut pending: BinaryHeap<Reverse<(Instant, String)>> = BinaryHeap::new();

    loop {
        let wait = match pending.peek() {
            Some(Reverse((deadline, _))) => deadline.saturating_duration_since(Instant::now()),
            None => IDLE_WAIT,
        };

        match rx.recv_timeout(wait) {
            Ok(WriteOp::Put { key, deadline }) => {
                pending.push(Reverse((deadline, key)));
            }
            Ok(WriteOp::Update { key, entry }) => {
                cache.apply_update(&key, entry);
            }
            Ok(WriteOp::Clear) => {
                pending.clear();
            }
            Ok(WriteOp::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        // 期限が来た遅延書き込みを処理
        let now = Instant::now();
        while pending
            .peek()
            .is_some_and(|Reverse((deadline, _))| *deadline <= now)
        {
            if let Some(Reverse((_, key))) = pending.pop() {
                cache.flush_deferred(&key);
            }
        }
    }

    debug!("[CacheWriter] worker stopped");
}
