//! パイプライン設定

use serde::Deserialize;
use std::path::PathBuf;

/// デフォルト値関数
fn default_max_cache_bytes() -> u64 { 20 * 1024 * 1024 } // 20MiB
fn default_network_threads() -> usize { 4 }
fn default_write_delay_ms() -> u64 { 5000 }
fn default_cache_dir() -> PathBuf { PathBuf::from("courier-cache") }

/// パイプライン設定
///
/// ホストアプリケーションのTOML設定に埋め込むか、コードから直接構築します。
///
/// ```toml
/// [courier]
/// cache_dir = "/var/cache/app/http"
/// max_cache_bytes = 20971520  # 20MiB
/// network_threads = 4
/// write_delay_ms = 5000
/// ```
#[derive(Deserialize, Clone, Debug)]
pub struct PipelineConfig {
    /// ディスクキャッシュのルートディレクトリ
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// ディスクキャッシュ最大サイズ（バイト）
    ///
    /// デフォルト: 20MiB
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// ネットワークディスパッチャのスレッド数
    ///
    /// デフォルト: 4
    #[serde(default = "default_network_threads")]
    pub network_threads: usize,

    /// 遅延書き込みのディレイ（ミリ秒）
    ///
    /// デフォルト: 5000ms
    #[serde(default = "default_write_delay_ms")]
    pub write_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_cache_bytes: default_max_cache_bytes(),
            network_threads: default_network_threads(),
            write_delay_ms: default_write_delay_ms(),
        }
    }
}

impl PipelineConfig {
    /// TOML文字列から設定を読み込む
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
