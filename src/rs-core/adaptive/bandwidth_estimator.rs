use super::ewma::Ewma;

const FAST_EWMA_HALF_LIFE: f64 = 2.;
const SLOW_EWMA_HALF_LIFE: f64 = 10.;

/// Requests smaller than this, in bytes, say more about latency than about
/// throughput and are not sampled.
const MINIMUM_CHUNK_SIZE: u64 = 16_000;

/// No estimate is produced before that many bytes have been sampled.
const MINIMUM_TOTAL_BYTES: u64 = 150_000;

/// Produce bandwidth estimates based on two EWMA (exponentially-weighted
/// moving average), one evolving slow and the other evolving fast.
///
/// The minimum of both is returned so that a sudden fall in bandwidth is
/// taken into account right away, while a rise only is once it lasted.
#[derive(Clone, Debug)]
pub(super) struct BandwidthEstimator {
    fast_ewma: Ewma,
    slow_ewma: Ewma,
    bytes_sampled: u64,
}

impl BandwidthEstimator {
    pub(super) fn new() -> Self {
        Self {
            fast_ewma: Ewma::new(FAST_EWMA_HALF_LIFE),
            slow_ewma: Ewma::new(SLOW_EWMA_HALF_LIFE),
            bytes_sampled: 0,
        }
    }

    /// Sample a request which took `duration_ms` milliseconds to load
    /// `size_bytes` bytes.
    pub(super) fn add_sample(&mut self, duration_ms: f64, size_bytes: u64) {
        if size_bytes < MINIMUM_CHUNK_SIZE || duration_ms <= 0. {
            return;
        }
        let bandwidth = (size_bytes as f64) * 8000. / duration_ms;
        let weight = duration_ms / 1000.;
        self.bytes_sampled += size_bytes;
        self.fast_ewma.add_sample(weight, bandwidth);
        self.slow_ewma.add_sample(weight, bandwidth);
    }

    /// Current estimate in bits per second.
    ///
    /// Returns `None` if not enough data has been sampled yet.
    pub(super) fn estimate(&self) -> Option<f64> {
        if self.bytes_sampled < MINIMUM_TOTAL_BYTES {
            None
        } else {
            Some(f64::min(self.fast_ewma.estimate(), self.slow_ewma.estimate()))
        }
    }

    pub(super) fn reset(&mut self) {
        *self = Self::new();
    }
}
