//! # ディスクキャッシュモジュール
//!
//! レスポンスを永続化する、容量制限付きのコンテンツアドレスストアを
//! 提供します。
//!
//! ## 特徴
//!
//! - **手書きバイナリフォーマット**: リフレクション・ガベージを避けた
//!   リトルエンディアンの長さプレフィックス形式
//! - **アクセス順インデックス**: LRU順のプルーニング
//! - **4段階プルーニング**: EXPIRED → IMAGES → EVICTABLE → ALL、
//!   ヒステリシス付き（最大容量の90%まで削減）
//! - **遅延書き込み**: putをメモリに保持し、一定時間後にまとめてディスクへ
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  DiskCache                               │
//! │  ├─ CacheInner (Mutex)                   │← LRUインデックス + 合計サイズ
//! │  ├─ memory_map (DashMap)                 │← 遅延書き込み中のエントリ
//! │  └─ CacheWriter (専用スレッド)            │← 期限付き書き込みキュー
//! └──────────────────────────────────────────┘
//! ```

mod codec;
mod disk;
mod entry;
mod policy;
mod writer;

pub use codec::{FramingError, CACHE_MAGIC};
pub use disk::DiskCache;
pub use entry::{CacheEntry, CacheEntryBuilder, CacheHeader};
pub use policy::{
    apply_ttl_overrides, format_http_date, parse_cache_headers, parse_http_date, CacheControl,
};
