//! 帯域モニター
//!
//! 直近のレスポンスの(バイト数, 所要ミリ秒)を固定長リングに記録し、
//! ヒステリシス付きの低帯域フラグを導出します。ホストはこのフラグを
//! 見て画像品質の切り替えなどを行えます。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// リングに保持するサンプル数
const RING_SIZE: usize = 4;

/// これを下回ると低帯域フラグが立つ（kB/s）
const BANDWIDTH_HYSTERETIC_LOWER: u64 = 40;

/// これを上回ると低帯域フラグが下りる（kB/s）
const BANDWIDTH_HYSTERETIC_UPPER: u64 = 80;

/// 帯域モニター
///
/// スレッドセーフ。ネットワークディスパッチャが画像クラスのレスポンスを
/// 記録します。
pub struct BandwidthMonitor {
    samples: Mutex<VecDeque<(u64, u64)>>,
    low_bandwidth: AtomicBool,
}

impl BandwidthMonitor {
    /// 新しいモニターを作成
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(RING_SIZE)),
            low_bandwidth: AtomicBool::new(false),
        }
    }

    /// 低帯域フラグを指定して作成
    ///
    /// ホストが起動時にネットワーク種別から初期値を与える場合に使います。
    pub fn with_low_bandwidth(initial: bool) -> Self {
        let monitor = Self::new();
        monitor.low_bandwidth.store(initial, Ordering::Relaxed);
        monitor
    }

    /// サンプルを記録
    ///
    /// リングが満杯になったら帯域を導出し、ヒステリシス付きで
    /// フラグを更新します。
    pub fn record(&self, bytes: usize, elapsed_ms: u64) {
        if elapsed_ms == 0 {
            return;
        }

        let mut samples = self.samples.lock().unwrap();
        if samples.len() >= RING_SIZE {
            samples.pop_front();
        }
        samples.push_back((bytes as u64, elapsed_ms));

        if samples.len() < RING_SIZE {
            return;
        }

        let byte_sum: u64 = samples.iter().map(|(b, _)| b).sum();
        let time_sum: u64 = samples.iter().map(|(_, t)| t).sum();

        // bytes/ms = kB/s
        let bandwidth_kbps = byte_sum / time_sum;
        if bandwidth_kbps < BANDWIDTH_HYSTERETIC_LOWER {
            self.low_bandwidth.store(true, Ordering::Relaxed);
        } else if bandwidth_kbps > BANDWIDTH_HYSTERETIC_UPPER {
            self.low_bandwidth.store(false, Ordering::Relaxed);
        }
    }

    /// 低帯域フラグ
    #[inline]
    pub fn is_low_bandwidth(&self) -> bool {
        self.low_bandwidth.load(Ordering::Relaxed)
    }
}

impl Default for BandwidthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_stays_off_until_ring_full() {
        let monitor = BandwidthMonitor::new();

        // 3サンプルでは判定しない
        for _ in 0..3 {
            monitor.record(10, 1000);
        }
        assert!(!monitor.is_low_bandwidth());
    }

    #[test]
    fn test_low_bandwidth_detected() {
        let monitor = BandwidthMonitor::new();

        // 10bytes / 1000ms = 0.01 kB/s
        for _ in 0..RING_SIZE {
            monitor.record(10, 1000);
        }
        assert!(monitor.is_low_bandwidth());
    }

    #[test]
    fn test_hysteresis() {
        let monitor = BandwidthMonitor::new();

        // 低帯域に落とす
        for _ in 0..RING_SIZE {
            monitor.record(10, 1000);
        }
        assert!(monitor.is_low_bandwidth());

        // 40〜80 kB/sの中間帯ではフラグが維持される
        for _ in 0..RING_SIZE {
            monitor.record(60_000, 1000);
        }
        assert!(monitor.is_low_bandwidth());

        // 80 kB/s超で解除
        for _ in 0..RING_SIZE {
            monitor.record(200_000, 1000);
        }
        assert!(!monitor.is_low_bandwidth());
    }

    #[test]
    fn test_zero_elapsed_ignored() {
        let monitor = BandwidthMonitor::new();
        for _ in 0..RING_SIZE {
            monitor.record(1, 0);
        }
        assert!(!monitor.is_low_bandwidth());
    }
}
