//! キャッシュエントリ
//!
//! ディスクキャッシュに保存されるレコード本体（[`CacheEntry`]）と、
//! インデックスに保持されるメタデータ（[`CacheHeader`]）を提供します。
//! インデックスはボディを保持しないため、ヘッダーの`size`フィールドが
//! ディスク上のファイル長を表します。

use super::codec::{self, CountingReader, FramingError, CACHE_MAGIC};
use std::io::{self, Read, Write};

/// キャッシュエントリ
///
/// レスポンスボディとキャッシュ制御メタデータを保持します。
/// タイムスタンプはすべてエポックミリ秒です。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// レスポンスボディ
    pub data: Vec<u8>,
    /// ETag（条件付きリクエスト用）
    pub etag: Option<String>,
    /// サーバーが報告したレスポンス日時
    pub server_date: i64,
    /// ハード期限。これを過ぎると再検証なしでは配信できない
    pub ttl: i64,
    /// ソフト期限。これを過ぎると配信はされるがバックグラウンド更新が走る
    pub soft_ttl: i64,
    /// 保護期限。これより前のエントリはALLパス以外では削除されない
    pub keep_until: i64,
    /// 画像エントリフラグ。圧迫時に優先的に削除される
    pub is_image: bool,
    /// レスポンスヘッダー（受信順）
    pub response_headers: Vec<(String, String)>,
}

impl CacheEntry {
    /// ハード期限切れかどうか
    #[inline]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl < now_ms
    }

    /// ソフト期限切れ（バックグラウンド更新が必要）かどうか
    #[inline]
    pub fn refresh_needed(&self, now_ms: i64) -> bool {
        self.soft_ttl < now_ms
    }

    /// レスポンスヘッダー値を取得（名前は大文字小文字を区別しない）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// キャッシュヘッダー
///
/// ディスク上のレコードヘッダーと1対1対応するメタデータ。インデックスに
/// 登録される際は`response_headers`を空にしてメモリを節約します。
/// `size`はシリアライズされず、ファイル長から与えられます。
#[derive(Debug, Clone)]
pub struct CacheHeader {
    /// このヘッダーが指すファイルの長さ（バイト）
    pub size: u64,
    /// キャッシュキー
    pub key: String,
    /// ETag
    pub etag: Option<String>,
    /// サーバー日時（エポックミリ秒）
    pub server_date: i64,
    /// ハード期限
    pub ttl: i64,
    /// ソフト期限
    pub soft_ttl: i64,
    /// 保護期限
    pub keep_until: i64,
    /// 画像フラグ
    pub is_image: bool,
    /// レスポンスヘッダー（インデックス内では空）
    pub response_headers: Vec<(String, String)>,
}

impl CacheHeader {
    /// エントリからヘッダーを作成
    pub fn from_entry(key: &str, entry: &CacheEntry) -> Self {
        Self {
            size: entry.data.len() as u64,
            key: key.to_string(),
            etag: entry.etag.clone(),
            server_date: entry.server_date,
            ttl: entry.ttl,
            soft_ttl: entry.soft_ttl,
            keep_until: entry.keep_until,
            is_image: entry.is_image,
            response_headers: entry.response_headers.clone(),
        }
    }

    /// リーダーからヘッダーを読み込む
    ///
    /// `include_headers`がfalseの場合、レスポンスヘッダーを破棄します
    /// （起動時スキャン用）。`size`は0で返るため、呼び出し元がファイル長を
    /// 設定します。
    ///
    /// ttl/soft_ttlが予約済みセンチネル（`i64::MAX`）のレコードは
    /// 永続化が禁止されているため、読み込みを拒否します。
    pub fn read<R: Read>(
        reader: &mut CountingReader<R>,
        include_headers: bool,
    ) -> Result<Self, FramingError> {
        let magic = codec::read_u32(reader)?;
        if magic != CACHE_MAGIC {
            return Err(FramingError::BadMagic(magic));
        }

        let key = codec::read_string(reader)?;
        let etag = codec::read_string(reader)?;
        let etag = if etag.is_empty() { None } else { Some(etag) };
        let server_date = codec::read_i64(reader)?;
        let ttl = codec::read_i64(reader)?;
        let soft_ttl = codec::read_i64(reader)?;
        let keep_until = codec::read_i64(reader)?;
        let is_image = codec::read_u32(reader)? != 0;

        if ttl == i64::MAX || soft_ttl == i64::MAX {
            return Err(FramingError::ReservedTtl);
        }

        let mut response_headers = codec::read_string_map(reader)?;
        if !include_headers {
            response_headers = Vec::new();
        }

        Ok(Self {
            size: 0,
            key,
            etag,
            server_date,
            ttl,
            soft_ttl,
            keep_until,
            is_image,
            response_headers,
        })
    }

    /// ヘッダーをライターに書き込む
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        codec::write_u32(writer, CACHE_MAGIC)?;
        codec::write_string(writer, &self.key)?;
        codec::write_string(writer, self.etag.as_deref().unwrap_or(""))?;
        codec::write_i64(writer, self.server_date)?;
        codec::write_i64(writer, self.ttl)?;
        codec::write_i64(writer, self.soft_ttl)?;
        codec::write_i64(writer, self.keep_until)?;
        codec::write_u32(writer, u32::from(self.is_image))?;
        codec::write_string_map(writer, &self.response_headers)?;
        writer.flush()
    }

    /// ボディと組み合わせて完全なエントリを復元
    pub fn to_entry(&self, data: Vec<u8>) -> CacheEntry {
        CacheEntry {
            data,
            etag: self.etag.clone(),
            server_date: self.server_date,
            ttl: self.ttl,
            soft_ttl: self.soft_ttl,
            keep_until: self.keep_until,
            is_image: self.is_image,
            response_headers: self.response_headers.clone(),
        }
    }

    /// レスポンスヘッダーを落としたインデックス登録用ヘッダー
    pub fn without_headers(mut self) -> Self {
        self.response_headers = Vec::new();
        self
    }

    /// ハード期限切れかどうか
    #[inline]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.ttl < now_ms
    }

    /// ソフト期限切れかどうか
    #[inline]
    pub fn refresh_needed(&self, now_ms: i64) -> bool {
        self.soft_ttl < now_ms
    }

    /// 保護期限を過ぎていて削除可能かどうか
    #[inline]
    pub fn can_evict(&self, now_ms: i64) -> bool {
        self.keep_until < now_ms
    }
}

/// キャッシュエントリビルダー
///
/// テストおよびハンドラ実装向けの補助ビルダー。
pub struct CacheEntryBuilder {
    entry: CacheEntry,
}

impl CacheEntryBuilder {
    /// 新しいビルダーを作成
    pub fn new() -> Self {
        Self {
            entry: CacheEntry {
                data: Vec::new(),
                etag: None,
                server_date: 0,
                ttl: 0,
                soft_ttl: 0,
                keep_until: 0,
                is_image: false,
                response_headers: Vec::new(),
            },
        }
    }

    /// ボディを設定
    pub fn body(mut self, data: Vec<u8>) -> Self {
        self.entry.data = data;
        self
    }

    /// ETagを設定
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.entry.etag = Some(etag.into());
        self
    }

    /// サーバー日時を設定
    pub fn server_date(mut self, server_date: i64) -> Self {
        self.entry.server_date = server_date;
        self
    }

    /// ハード期限を設定
    pub fn ttl(mut self, ttl: i64) -> Self {
        self.entry.ttl = ttl;
        self
    }

    /// ソフト期限を設定
    pub fn soft_ttl(mut self, soft_ttl: i64) -> Self {
        self.entry.soft_ttl = soft_ttl;
        self
    }

    /// 保護期限を設定
    pub fn keep_until(mut self, keep_until: i64) -> Self {
        self.entry.keep_until = keep_until;
        self
    }

    /// 画像フラグを設定
    pub fn is_image(mut self, is_image: bool) -> Self {
        self.entry.is_image = is_image;
        self
    }

    /// レスポンスヘッダーを追加
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry
            .response_headers
            .push((name.into(), value.into()));
        self
    }

    /// エントリをビルド
    pub fn build(self) -> CacheEntry {
        self.entry
    }
}

impl Default for CacheEntryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn create_test_entry() -> CacheEntry {
        CacheEntryBuilder::new()
            .body(b"response body".to_vec())
            .etag("\"v1\"")
            .server_date(1_700_000_000_000)
            .ttl(1_700_000_060_000)
            .soft_ttl(1_700_000_030_000)
            .keep_until(1_700_000_010_000)
            .header("Content-Type", "text/plain")
            .header("Date", "Tue, 14 Nov 2023 22:13:20 GMT")
            .build()
    }

    #[test]
    fn test_header_round_trip() {
        let entry = create_test_entry();
        let header = CacheHeader::from_entry("http://example.com/a", &entry);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let mut reader = CountingReader::new(Cursor::new(&buf));
        let decoded = CacheHeader::read(&mut reader, true).unwrap();

        assert_eq!(decoded.key, "http://example.com/a");
        assert_eq!(decoded.etag.as_deref(), Some("\"v1\""));
        assert_eq!(decoded.server_date, entry.server_date);
        assert_eq!(decoded.ttl, entry.ttl);
        assert_eq!(decoded.soft_ttl, entry.soft_ttl);
        assert_eq!(decoded.keep_until, entry.keep_until);
        assert!(!decoded.is_image);
        assert_eq!(decoded.response_headers, entry.response_headers);
        // ヘッダー消費量 = バッファ全長（ボディなし）
        assert_eq!(reader.bytes_read(), buf.len() as u64);
    }

    #[test]
    fn test_entry_round_trip_via_header() {
        let entry = create_test_entry();
        let header = CacheHeader::from_entry("http://example.com/a", &entry);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf.extend_from_slice(&entry.data);

        let mut reader = CountingReader::new(Cursor::new(&buf));
        let decoded = CacheHeader::read(&mut reader, true).unwrap();
        let body_len = buf.len() as u64 - reader.bytes_read();
        assert_eq!(body_len, entry.data.len() as u64);

        let restored = decoded.to_entry(entry.data.clone());
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_empty_etag_reads_as_absent() {
        let entry = CacheEntryBuilder::new().ttl(100).soft_ttl(50).build();
        let header = CacheHeader::from_entry("k", &entry);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let mut reader = CountingReader::new(Cursor::new(&buf));
        let decoded = CacheHeader::read(&mut reader, true).unwrap();
        assert!(decoded.etag.is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let entry = create_test_entry();
        let header = CacheHeader::from_entry("k", &entry);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf[0] ^= 0xff;

        let mut reader = CountingReader::new(Cursor::new(&buf));
        let err = CacheHeader::read(&mut reader, true).unwrap_err();
        assert!(matches!(err, FramingError::BadMagic(_)));
    }

    #[test]
    fn test_reserved_sentinel_rejected() {
        for (ttl, soft_ttl) in [(i64::MAX, 0), (0, i64::MAX)] {
            let entry = CacheEntryBuilder::new().ttl(ttl).soft_ttl(soft_ttl).build();
            let header = CacheHeader::from_entry("k", &entry);

            let mut buf = Vec::new();
            header.write(&mut buf).unwrap();

            let mut reader = CountingReader::new(Cursor::new(&buf));
            let err = CacheHeader::read(&mut reader, true).unwrap_err();
            assert!(matches!(err, FramingError::ReservedTtl));
        }
    }

    #[test]
    fn test_truncated_header_rejected() {
        let entry = create_test_entry();
        let header = CacheHeader::from_entry("http://example.com/a", &entry);

        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);

        let mut reader = CountingReader::new(Cursor::new(&buf));
        let err = CacheHeader::read(&mut reader, true).unwrap_err();
        assert!(matches!(err, FramingError::ShortRead));
    }

    #[test]
    fn test_expiry_checks() {
        let entry = create_test_entry();
        let now = 1_700_000_040_000;

        assert!(!entry.is_expired(now)); // ttlは+60s
        assert!(entry.refresh_needed(now)); // soft_ttlは+30s

        let header = CacheHeader::from_entry("k", &entry);
        assert!(header.can_evict(now)); // keep_untilは+10s
    }
}
