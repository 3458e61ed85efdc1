//! ディスクキャッシュ
//!
//! 1エントリ=1ファイルの永続キャッシュを提供します。ファイル名はキーを
//! 半分に割った2つの32bitハッシュの10進連結で決まります（衝突は読み込み時の
//! キー不一致として検出され、ミス扱いで削除されます）。
//!
//! インデックスはアクセス順のLRUマップで、ボディは保持しません。容量超過時は
//! EXPIRED → IMAGES → EVICTABLE → ALL の4パスでLRU順に削除し、
//! 最大容量の90%を下回った時点で打ち切ります（ヒステリシス）。
//!
//! 遅延書き込み（`put(instant=false)`）はまず並行マップに置かれ、
//! 一定時間後にワーカースレッドがディスクへ書き出します。その間の読み込みは
//! 並行マップがディスクを隠蔽します。

use super::entry::{CacheEntry, CacheHeader};
use super::writer::{self, CacheWriter, WriteOp};
use crate::now_ms;
use dashmap::DashMap;
use ftlog::{debug, error, warn};
use lru::LruCache;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use xxhash_rust::xxh32::xxh32;

/// プルーニングのヒステリシス係数
///
/// 削減は合計がこの割合を下回るまで続く。
const HYSTERESIS_FACTOR: f64 = 0.9;

/// プルーニングパス
///
/// 上から順に実行され、目標を満たした時点で打ち切られる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrunePass {
    /// ハード期限切れ
    Expired,
    /// 保護期限を過ぎた画像
    Images,
    /// 保護期限を過ぎたすべて
    Evictable,
    /// 無条件
    All,
}

impl PrunePass {
    const ORDER: [PrunePass; 4] = [
        PrunePass::Expired,
        PrunePass::Images,
        PrunePass::Evictable,
        PrunePass::All,
    ];

    fn matches(self, header: &CacheHeader, now: i64) -> bool {
        match self {
            PrunePass::Expired => header.is_expired(now),
            PrunePass::Images => header.is_image && header.can_evict(now),
            PrunePass::Evictable => header.can_evict(now),
            PrunePass::All => true,
        }
    }
}

/// レコード読み込みの失敗
enum ReadFault {
    /// フレーミング・I/O障害。エントリは削除される
    Corrupt(super::codec::FramingError),
    /// ボディ用バッファの確保失敗。エントリは残したままミス扱い
    Alloc,
}

/// インデックスと合計サイズ
///
/// キャッシュの単一ロック配下で変更される。
struct CacheInner {
    /// アクセス順マップ。LRU末尾から削除候補を辿る
    entries: LruCache<String, CacheHeader>,
    /// ディスク使用量の合計（= 各ヘッダーのsizeの総和）
    total_size: u64,
}

/// ディスクキャッシュ
///
/// 公開オペレーションはすべて単一のロック配下で実行されます。
/// 遅延書き込み中のエントリだけはロック外の並行マップから読めます。
pub struct DiskCache {
    /// ルートディレクトリ
    root: PathBuf,
    /// 最大ディスク使用量（バイト）
    max_bytes: u64,
    /// 遅延書き込みのディレイ
    write_delay: Duration,
    /// インデックス
    inner: Mutex<CacheInner>,
    /// 遅延書き込み中エントリの並行マップ（ディスクを隠蔽する）
    memory_map: DashMap<String, CacheEntry>,
    /// 遅延書き込みワーカー（initializeで起動）
    writer: Mutex<Option<CacheWriter>>,
}

impl DiskCache {
    /// 新しいディスクキャッシュを作成
    ///
    /// I/Oは行いません。[`DiskCache::initialize`]を呼ぶまでワーカーは
    /// 起動せず、インデックスも空のままです。
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64, write_delay_ms: u64) -> Self {
        Self {
            root: root.into(),
            max_bytes,
            write_delay: Duration::from_millis(write_delay_ms),
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_size: 0,
            }),
            memory_map: DashMap::new(),
            writer: Mutex::new(None),
        }
    }

    /// キャッシュを初期化
    ///
    /// ルートディレクトリを走査し、各ファイルのヘッダーだけを読んで
    /// インデックスを構築します。読めないファイルは削除します。
    /// 最後に遅延書き込みワーカーを起動します。
    pub fn initialize(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().unwrap();

            if !self.root.exists() {
                if let Err(e) = fs::create_dir_all(&self.root) {
                    error!("unable to create cache dir {}: {}", self.root.display(), e);
                }
            } else if let Ok(dir) = fs::read_dir(&self.root) {
                for dir_entry in dir.flatten() {
                    let path = dir_entry.path();
                    if !path.is_file() {
                        continue;
                    }
                    match Self::read_header_only(&path) {
                        Ok(mut header) => {
                            header.size = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
                            let key = header.key.clone();
                            Self::put_header_locked(&mut inner, key, header);
                        }
                        Err(_) => {
                            let _ = fs::remove_file(&path);
                        }
                    }
                }
            }

            debug!(
                "cache initialized: {} entries, {} bytes",
                inner.entries.len(),
                inner.total_size
            );
        }

        // 遅延書き込みワーカーを起動
        let mut writer = self.writer.lock().unwrap();
        if writer.is_none() {
            let (tx, rx) = mpsc::channel();
            let cache = Arc::clone(self);
            let handle = thread::Builder::new()
                .name("courier-cache-writer".to_string())
                .spawn(move || writer::run(cache, rx))
                .expect("failed to spawn cache writer thread");
            *writer = Some(CacheWriter::new(tx, handle));
        }
    }

    /// 遅延書き込みワーカーを停止
    pub fn shutdown(&self) {
        if let Some(writer) = self.writer.lock().unwrap().take() {
            writer.shutdown();
        }
    }

    /// エントリを取得
    ///
    /// 遅延書き込み中のエントリは並行マップから返します（ディスクより
    /// 新しいため）。ディスク読み込みが失敗した場合はエントリを削除して
    /// ミスを返します。ボディ用バッファが確保できない場合はエントリを
    /// 残したままミスを返します。
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(shadow) = self.memory_map.get(key) {
            return Some(shadow.clone());
        }

        let mut inner = self.inner.lock().unwrap();
        self.get_locked(&mut inner, key)
    }

    /// ヘッダーだけを取得（ボディなし、ディスクI/Oなし）
    pub fn get_headers(&self, key: &str) -> Option<CacheHeader> {
        if let Some(shadow) = self.memory_map.get(key) {
            return Some(CacheHeader::from_entry(key, shadow.value()).without_headers());
        }

        let mut inner = self.inner.lock().unwrap();
        inner.entries.get(key).cloned()
    }

    /// エントリを保存
    ///
    /// `instant`がfalseの場合は並行マップに置き、ディレイ後にワーカーが
    /// ディスクへ書き出します。trueの場合はその場で書き込みます。
    pub fn put(&self, key: &str, entry: CacheEntry, instant: bool) {
        if !instant {
            self.memory_map.insert(key.to_string(), entry);
            self.send_op(WriteOp::Put {
                key: key.to_string(),
                deadline: Instant::now() + self.write_delay,
            });
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        self.put_instant_locked(&mut inner, key, entry);
    }

    /// エントリを無効化
    ///
    /// ソフト期限を0にし、`full_expire`の場合はハード期限も0にして
    /// 書き戻します。レコード自体は残り、次のアクセスで再検証されます。
    pub fn invalidate(&self, key: &str, full_expire: bool) {
        let mut inner = self.inner.lock().unwrap();

        let entry = self
            .memory_map
            .get(key)
            .map(|e| e.clone())
            .or_else(|| self.get_locked(&mut inner, key));

        if let Some(mut entry) = entry {
            entry.soft_ttl = 0;
            if full_expire {
                entry.ttl = 0;
            }
            self.put_instant_locked(&mut inner, key, entry);
        }
    }

    /// エントリを削除
    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        self.delete_file(key);
        Self::remove_entry_locked(&mut inner, key);
        self.memory_map.remove(key);
    }

    /// メタデータを非同期更新
    ///
    /// ワーカースレッド上で現在のレコードを読み直し、ボディを保持したまま
    /// メタデータ（期限・ETag・ヘッダーなど）だけを差し替えて書き込みます。
    /// レコードが既に削除されていた場合は何もしません。
    pub fn update_entry(&self, key: &str, entry: CacheEntry) {
        self.send_op(WriteOp::Update {
            key: key.to_string(),
            entry,
        });
    }

    /// 全エントリを削除
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();

        if let Ok(dir) = fs::read_dir(&self.root) {
            for dir_entry in dir.flatten() {
                let _ = fs::remove_file(dir_entry.path());
            }
        }

        inner.entries.clear();
        inner.total_size = 0;
        self.memory_map.clear();
        self.send_op(WriteOp::Clear);
        debug!("cache cleared");
    }

    /// 現在のディスク使用量
    pub fn total_size(&self) -> u64 {
        self.inner.lock().unwrap().total_size
    }

    /// 現在のエントリ数
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// インデックスが空かどうか
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// キーからファイル名を導出
    ///
    /// キーを中央で2分し、それぞれの32bitハッシュを10進で連結します。
    pub fn filename_for_key(key: &str) -> String {
        let bytes = key.as_bytes();
        let mid = bytes.len() / 2;
        format!("{}{}", xxh32(&bytes[..mid], 0), xxh32(&bytes[mid..], 0))
    }

    /// キーに対応するファイルパス
    pub fn file_for_key(&self, key: &str) -> PathBuf {
        self.root.join(Self::filename_for_key(key))
    }

    // ====================
    // ワーカーからのコールバック
    // ====================

    /// 遅延書き込みの期限到達処理
    ///
    /// 並行マップにまだ残っていればディスクへ書き込みます。`clear`や
    /// `remove`で先に消えていた場合は何もしません。
    pub(crate) fn flush_deferred(&self, key: &str) {
        if let Some((_, entry)) = self.memory_map.remove(key) {
            let mut inner = self.inner.lock().unwrap();
            self.put_instant_locked(&mut inner, key, entry);
        }
    }

    /// メタデータ更新の適用（ワーカースレッド上）
    pub(crate) fn apply_update(&self, key: &str, entry: CacheEntry) {
        let mut inner = self.inner.lock().unwrap();

        let current = self
            .memory_map
            .get(key)
            .map(|e| e.clone())
            .or_else(|| self.get_locked(&mut inner, key));

        match current {
            Some(current) => {
                let mut merged = entry;
                merged.data = current.data;
                self.put_instant_locked(&mut inner, key, merged);
            }
            None => {
                debug!("metadata update dropped, entry pruned: key={}", key);
            }
        }
    }

    // ====================
    // ロック配下の実装
    // ====================

    fn get_locked(&self, inner: &mut CacheInner, key: &str) -> Option<CacheEntry> {
        // アクセス順を更新しつつ存在確認
        inner.entries.get(key)?;

        match self.read_record(key) {
            Ok(entry) => Some(entry),
            Err(ReadFault::Alloc) => {
                warn!("body allocation failed, returning miss: key={}", key);
                None
            }
            Err(ReadFault::Corrupt(e)) => {
                debug!("unreadable cache record, dropping: key={} ({})", key, e);
                self.delete_file(key);
                Self::remove_entry_locked(inner, key);
                None
            }
        }
    }

    fn put_instant_locked(&self, inner: &mut CacheInner, key: &str, entry: CacheEntry) -> bool {
        // 永続化禁止センチネル
        if entry.ttl == i64::MAX || entry.soft_ttl == i64::MAX {
            warn!("refusing to persist permacached entry: key={}", key);
            self.memory_map.remove(key);
            return false;
        }

        self.prune_if_needed_locked(inner, entry.data.len() as u64);

        let path = self.file_for_key(key);
        match self.write_record(&path, key, &entry) {
            Ok(header) => {
                Self::put_header_locked(inner, key.to_string(), header);
                self.memory_map.remove(key);
                true
            }
            Err(e) => {
                warn!("cache write failed for {}: {}", path.display(), e);
                let _ = fs::remove_file(&path);
                self.memory_map.remove(key);
                false
            }
        }
    }

    fn put_header_locked(inner: &mut CacheInner, key: String, header: CacheHeader) {
        let new_size = header.size;
        if let Some(old) = inner.entries.put(key, header) {
            inner.total_size = inner.total_size - old.size + new_size;
        } else {
            inner.total_size += new_size;
        }
    }

    fn remove_entry_locked(inner: &mut CacheInner, key: &str) {
        if let Some(old) = inner.entries.pop(key) {
            inner.total_size -= old.size;
        }
    }

    // ====================
    // プルーニング
    // ====================

    fn prune_if_needed_locked(&self, inner: &mut CacheInner, needed: u64) {
        if inner.total_size + needed < self.max_bytes {
            return;
        }

        debug!("pruning old cache entries");
        let before = inner.total_size;
        let start = Instant::now();
        let mut pruned_files = 0usize;

        for pass in PrunePass::ORDER {
            pruned_files += self.prune_pass_locked(inner, needed, pass);
            if self.prune_goal_reached(inner, needed) {
                break;
            }
        }

        debug!(
            "pruned {} files, {} bytes, {} ms",
            pruned_files,
            before - inner.total_size,
            start.elapsed().as_millis()
        );
    }

    fn prune_pass_locked(&self, inner: &mut CacheInner, needed: u64, pass: PrunePass) -> usize {
        let now = now_ms();

        // LRU末尾（最古アクセス）から候補を収集
        let candidates: Vec<(String, u64)> = inner
            .entries
            .iter()
            .rev()
            .filter(|(_, header)| pass.matches(header, now))
            .map(|(key, header)| (key.clone(), header.size))
            .collect();

        let mut pruned = 0usize;
        for (key, size) in candidates {
            match fs::remove_file(self.file_for_key(&key)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        "could not delete cache entry: key={} filename={} ({})",
                        key,
                        Self::filename_for_key(&key),
                        e
                    );
                    continue;
                }
            }

            inner.entries.pop(&key);
            inner.total_size -= size;
            pruned += 1;

            if self.prune_goal_reached(inner, needed) {
                break;
            }
        }

        pruned
    }

    #[inline]
    fn prune_goal_reached(&self, inner: &CacheInner, needed: u64) -> bool {
        inner.total_size + needed < (self.max_bytes as f64 * HYSTERESIS_FACTOR) as u64
    }

    // ====================
    // ファイルI/O
    // ====================

    fn read_header_only(path: &Path) -> Result<CacheHeader, super::codec::FramingError> {
        let file = File::open(path)?;
        let mut reader = super::codec::CountingReader::new(BufReader::new(file));
        CacheHeader::read(&mut reader, false)
    }

    fn read_record(&self, key: &str) -> Result<CacheEntry, ReadFault> {
        use super::codec::FramingError;

        let path = self.file_for_key(key);
        let file = File::open(&path).map_err(|e| ReadFault::Corrupt(FramingError::Io(e)))?;
        let file_len = file
            .metadata()
            .map_err(|e| ReadFault::Corrupt(FramingError::Io(e)))?
            .len();

        let mut reader = super::codec::CountingReader::new(BufReader::new(file));
        let header = CacheHeader::read(&mut reader, true).map_err(ReadFault::Corrupt)?;

        // ハッシュ衝突の検出
        if header.key != key {
            return Err(ReadFault::Corrupt(FramingError::KeyMismatch));
        }

        // ボディ長 = ファイル長 − ヘッダー消費量
        let body_len = file_len.saturating_sub(reader.bytes_read()) as usize;
        let mut data = Vec::new();
        if data.try_reserve_exact(body_len).is_err() {
            return Err(ReadFault::Alloc);
        }
        data.resize(body_len, 0);
        reader.read_exact(&mut data).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                ReadFault::Corrupt(FramingError::ShortRead)
            } else {
                ReadFault::Corrupt(FramingError::Io(e))
            }
        })?;

        Ok(header.to_entry(data))
    }

    fn write_record(&self, path: &Path, key: &str, entry: &CacheEntry) -> io::Result<CacheHeader> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = CacheHeader::from_entry(key, entry);
        header.write(&mut writer)?;
        writer.write_all(&entry.data)?;
        writer.flush()?;
        drop(writer);

        // インデックス上のsizeはディスク上のファイル長
        let file_len = fs::metadata(path)?.len();
        let mut header = header.without_headers();
        header.size = file_len;
        Ok(header)
    }

    fn delete_file(&self, key: &str) {
        let path = self.file_for_key(key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                debug!("could not delete cache file {}: {}", path.display(), e);
            }
        }
    }

    fn send_op(&self, op: WriteOp) {
        if let Some(writer) = self.writer.lock().unwrap().as_ref() {
            writer.send(op);
        }
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        // ワーカーが残っていれば止める（通常はshutdown済み）
        if let Some(writer) = self.writer.lock().unwrap().take() {
            writer.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheEntryBuilder;
    use tempfile::tempdir;

    fn create_cache(dir: &Path, max_bytes: u64) -> Arc<DiskCache> {
        let cache = Arc::new(DiskCache::new(dir, max_bytes, 5000));
        cache.initialize();
        cache
    }

    fn create_test_entry(body: &[u8], ttl: i64) -> CacheEntry {
        CacheEntryBuilder::new()
            .body(body.to_vec())
            .ttl(ttl)
            .soft_ttl(ttl)
            .build()
    }

    fn far_future() -> i64 {
        now_ms() + 3_600_000
    }

    #[test]
    fn test_put_and_get() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        let entry = create_test_entry(b"hello", far_future());
        cache.put("http://x/a", entry.clone(), true);

        let read = cache.get("http://x/a").unwrap();
        assert_eq!(read.data, b"hello");
        assert_eq!(read.ttl, entry.ttl);
        cache.shutdown();
    }

    #[test]
    fn test_get_miss() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        assert!(cache.get("http://x/nothing").is_none());
        cache.shutdown();
    }

    #[test]
    fn test_total_size_tracks_file_length() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), true);

        let path = cache.file_for_key("http://x/a");
        let file_len = fs::metadata(&path).unwrap().len();
        assert_eq!(cache.total_size(), file_len);

        // 上書きでサイズが差し替わる
        cache.put(
            "http://x/a",
            create_test_entry(b"a longer body than before", far_future()),
            true,
        );
        let file_len = fs::metadata(&path).unwrap().len();
        assert_eq!(cache.total_size(), file_len);

        cache.remove("http://x/a");
        assert_eq!(cache.total_size(), 0);
        cache.shutdown();
    }

    #[test]
    fn test_initialize_rebuilds_index() {
        let dir = tempdir().unwrap();
        {
            let cache = create_cache(dir.path(), 1024 * 1024);
            cache.put("http://x/a", create_test_entry(b"one", far_future()), true);
            cache.put("http://x/b", create_test_entry(b"two!", far_future()), true);
            cache.shutdown();
        }

        let cache = create_cache(dir.path(), 1024 * 1024);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("http://x/a").unwrap().data, b"one");
        assert_eq!(cache.get("http://x/b").unwrap().data, b"two!");

        // totalSize = ファイル長の総和
        let expected: u64 = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.metadata().unwrap().len())
            .sum();
        assert_eq!(cache.total_size(), expected);
        cache.shutdown();
    }

    #[test]
    fn test_initialize_deletes_unreadable_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("123456garbage"), b"not a cache record").unwrap();

        let cache = create_cache(dir.path(), 1024 * 1024);
        assert_eq!(cache.len(), 0);
        assert!(!dir.path().join("123456garbage").exists());
        cache.shutdown();
    }

    #[test]
    fn test_corrupt_record_degrades_to_miss_and_deletes() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), true);

        // ファイルを破壊
        let path = cache.file_for_key("http://x/a");
        fs::write(&path, b"\xff\xff\xff\xff").unwrap();

        assert!(cache.get("http://x/a").is_none());
        assert!(!path.exists());
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_size(), 0);
        cache.shutdown();
    }

    #[test]
    fn test_key_collision_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), true);

        // 別キーのレコードを同じファイルに置き換えて衝突を偽装
        let path = cache.file_for_key("http://x/a");
        let mut buf = Vec::new();
        let other = create_test_entry(b"other", far_future());
        CacheHeader::from_entry("http://y/b", &other)
            .write(&mut buf)
            .unwrap();
        buf.extend_from_slice(&other.data);
        fs::write(&path, &buf).unwrap();

        assert!(cache.get("http://x/a").is_none());
        assert!(!path.exists());
        cache.shutdown();
    }

    #[test]
    fn test_invalidate_soft() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        let ttl = far_future();
        cache.put("http://x/a", create_test_entry(b"hello", ttl), true);
        cache.invalidate("http://x/a", false);

        let entry = cache.get("http://x/a").unwrap();
        assert_eq!(entry.soft_ttl, 0);
        assert_eq!(entry.ttl, ttl); // ハード期限は保持
        cache.shutdown();
    }

    #[test]
    fn test_invalidate_full() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), true);
        cache.invalidate("http://x/a", true);

        let entry = cache.get("http://x/a").unwrap();
        assert_eq!(entry.soft_ttl, 0);
        assert_eq!(entry.ttl, 0);
        cache.shutdown();
    }

    #[test]
    fn test_deferred_put_shadows_disk() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), false);

        // まだディスクには無いが読める
        assert!(!cache.file_for_key("http://x/a").exists());
        assert_eq!(cache.get("http://x/a").unwrap().data, b"hello");
        cache.shutdown();
    }

    #[test]
    fn test_deferred_put_flushes() {
        let dir = tempdir().unwrap();
        // ディレイ0でワーカーに即書き込みさせる
        let cache = Arc::new(DiskCache::new(dir.path(), 1024 * 1024, 0));
        cache.initialize();

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), false);

        let path = cache.file_for_key("http://x/a");
        let deadline = Instant::now() + Duration::from_secs(5);
        while !path.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(path.exists());
        assert_eq!(cache.get("http://x/a").unwrap().data, b"hello");
        cache.shutdown();
    }

    #[test]
    fn test_clear_cancels_deferred_writes() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        cache.put("http://x/a", create_test_entry(b"hello", far_future()), false);
        cache.clear();

        assert!(cache.get("http://x/a").is_none());
        assert_eq!(cache.total_size(), 0);
        assert_eq!(cache.len(), 0);
        cache.shutdown();
    }

    #[test]
    fn test_update_entry_preserves_body() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        let ttl = far_future();
        cache.put("http://x/a", create_test_entry(b"hello", ttl), true);

        let new_ttl = ttl + 60_000;
        let metadata = CacheEntryBuilder::new()
            .body(b"ignored".to_vec())
            .etag("\"v2\"")
            .ttl(new_ttl)
            .soft_ttl(new_ttl)
            .build();
        cache.update_entry("http://x/a", metadata);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let entry = cache.get("http://x/a").unwrap();
            if entry.etag.as_deref() == Some("\"v2\"") {
                assert_eq!(entry.data, b"hello"); // ボディは保持
                assert_eq!(entry.ttl, new_ttl);
                break;
            }
            assert!(Instant::now() < deadline, "update not applied in time");
            thread::sleep(Duration::from_millis(10));
        }
        cache.shutdown();
    }

    #[test]
    fn test_sentinel_entry_not_persisted() {
        let dir = tempdir().unwrap();
        let cache = create_cache(dir.path(), 1024 * 1024);

        let entry = CacheEntryBuilder::new()
            .body(b"x".to_vec())
            .ttl(i64::MAX)
            .soft_ttl(0)
            .build();
        cache.put("http://x/a", entry, true);

        assert!(!cache.file_for_key("http://x/a").exists());
        assert_eq!(cache.len(), 0);
        cache.shutdown();
    }

    #[test]
    fn test_filename_is_two_decimal_hashes() {
        let name = DiskCache::filename_for_key("http://example.com/path");
        assert!(name.chars().all(|c| c.is_ascii_digit()));

        // 同一キーは安定
        assert_eq!(name, DiskCache::filename_for_key("http://example.com/path"));
        // 異なるキーは（ほぼ確実に）異なる
        assert_ne!(name, DiskCache::filename_for_key("http://example.com/other"));
    }
}
