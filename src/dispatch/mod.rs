//! ディスパッチャ
//!
//! ステージングキューを消費する長寿命のワーカースレッド群です。
//! キャッシュディスパッチャ（1本）がキャッシュの照合を、ネットワーク
//! ディスパッチャ（N本）がHTTP実行とパースを担います。

mod cache;
mod network;

pub(crate) use cache::CacheDispatcher;
pub(crate) use network::NetworkDispatcher;
