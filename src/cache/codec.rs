//! キャッシュレコードのバイナリコーデック
//!
//! ディスク上のキャッシュレコードを読み書きするための、リトルエンディアンの
//! 長さプレフィックス付きシリアライザを提供します。リフレクションや汎用
//! シリアライザを使わない手書きフォーマットで、ヘッダー読み込み時の
//! アロケーションを最小化しています。
//!
//! ## レコードレイアウト
//!
//! ```text
//! magic(u32) | key(string) | etag(string) | server_date(i64) | ttl(i64)
//!   | soft_ttl(i64) | keep_until(i64) | is_image(u32) | headers(string_map)
//!   | body(ファイル末尾まで)
//! ```
//!
//! `string`はi64のバイト長プレフィックス + UTF-8本体、`string_map`は
//! u32の要素数 + (string, string)の繰り返しです。

use std::io::{self, Read, Write};
use thiserror::Error;

/// キャッシュファイルのマジックナンバー
pub const CACHE_MAGIC: u32 = 0x2015_0218;

/// フレーミングエラー
///
/// レコードの読み込みが失敗した場合のエラー。キャッシュ層ではすべて
/// ミスに縮退し、該当ファイルは削除されます。
#[derive(Debug, Error)]
pub enum FramingError {
    /// マジックナンバー不一致
    #[error("bad magic: {0:#010x}")]
    BadMagic(u32),

    /// フィールド途中でのEOF
    #[error("unexpected end of record")]
    ShortRead,

    /// 文字列フィールドが不正なUTF-8
    #[error("invalid utf-8 in record field")]
    InvalidUtf8,

    /// 文字列長が負または過大
    #[error("invalid length prefix: {0}")]
    BadLength(i64),

    /// ttl/soft_ttlが予約済みセンチネル（i64::MAX）
    #[error("reserved ttl sentinel in record")]
    ReservedTtl,

    /// キーがファイル名の逆引きと一致しない（ハッシュ衝突）
    #[error("record key mismatch")]
    KeyMismatch,

    /// 下位I/Oエラー
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// 読み込んだバイト数を数えるリーダー
///
/// ヘッダー消費量からボディ長（ファイル長 − ヘッダー長）を導出するために
/// 使用します。
pub struct CountingReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R: Read> CountingReader<R> {
    /// 新しいカウンティングリーダーを作成
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    /// これまでに読み込んだバイト数
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// 内部リーダーを取り出す
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        Ok(n)
    }
}

/// 固定長バッファを完全に読み込む
///
/// EOFに達した場合は`ShortRead`を返します。
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FramingError::ShortRead),
        Err(e) => Err(FramingError::Io(e)),
    }
}

/// u32を書き込む（LSBファースト）
pub fn write_u32<W: Write>(writer: &mut W, n: u32) -> io::Result<()> {
    writer.write_all(&n.to_le_bytes())
}

/// u32を読み込む
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32, FramingError> {
    let mut buf = [0u8; 4];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// i64を書き込む（LSBファースト）
pub fn write_i64<W: Write>(writer: &mut W, n: i64) -> io::Result<()> {
    writer.write_all(&n.to_le_bytes())
}

/// i64を読み込む
pub fn read_i64<R: Read>(reader: &mut R) -> Result<i64, FramingError> {
    let mut buf = [0u8; 8];
    read_exact_or_eof(reader, &mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// 文字列を書き込む
///
/// i64のバイト長プレフィックスに続けてUTF-8本体を書き込みます。
/// 空文字列は長さ0として書き込まれます（「なし」の表現に使用）。
pub fn write_string<W: Write>(writer: &mut W, s: &str) -> io::Result<()> {
    write_i64(writer, s.len() as i64)?;
    writer.write_all(s.as_bytes())
}

/// 文字列を読み込む
pub fn read_string<R: Read>(reader: &mut R) -> Result<String, FramingError> {
    let len = read_i64(reader)?;
    if len < 0 || len > i64::from(u32::MAX) {
        return Err(FramingError::BadLength(len));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact_or_eof(reader, &mut buf)?;
    String::from_utf8(buf).map_err(|_| FramingError::InvalidUtf8)
}

/// 文字列マップを書き込む
///
/// u32の要素数に続けて(キー, 値)ペアを挿入順で書き込みます。
pub fn write_string_map<W: Write>(
    writer: &mut W,
    map: &[(String, String)],
) -> io::Result<()> {
    write_u32(writer, map.len() as u32)?;
    for (key, value) in map {
        write_string(writer, key)?;
        write_string(writer, value)?;
    }
    Ok(())
}

/// 文字列マップを読み込む
pub fn read_string_map<R: Read>(reader: &mut R) -> Result<Vec<(String, String)>, FramingError> {
    let count = read_u32(reader)?;
    let mut map = Vec::with_capacity(count.min(256) as usize);
    for _ in 0..count {
        let key = read_string(reader)?;
        let value = read_string(reader)?;
        map.push((key, value));
    }
    Ok(map)
}
