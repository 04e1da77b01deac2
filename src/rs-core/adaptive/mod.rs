//! Network throughput measurements, which an adaptive bitrate logic may rely
//! on to choose a variant.

use self::bandwidth_estimator::BandwidthEstimator;

mod bandwidth_estimator;
mod ewma;

/// Keeps track of the throughput of segment requests.
#[derive(Clone, Debug)]
pub(crate) struct BandwidthMonitor {
    estimator: BandwidthEstimator,
    /// Throughput of the last request in bits per second.
    bandwidth: f64,
    /// Duration of the last request, in milliseconds.
    round_trip: f64,
    bytes_received: u64,
}

impl BandwidthMonitor {
    pub(crate) fn new() -> Self {
        Self {
            estimator: BandwidthEstimator::new(),
            bandwidth: 0.,
            round_trip: f64::NAN,
            bytes_received: 0,
        }
    }

    /// Record a successful request which took `duration_ms` to load
    /// `size_bytes` bytes.
    pub(crate) fn add_metric(&mut self, duration_ms: f64, size_bytes: u64) {
        self.round_trip = duration_ms;
        self.bytes_received += size_bytes;
        if duration_ms > 0. {
            self.bandwidth = (size_bytes as f64) * 8000. / duration_ms;
        }
        self.estimator.add_sample(duration_ms, size_bytes);
    }

    /// A request timed out: the network is considered as good as dead until
    /// the next successful request.
    pub(crate) fn on_timeout(&mut self) {
        self.bandwidth = 1.;
        self.round_trip = f64::NAN;
    }

    /// Throughput of the last request, in bits per second.
    pub(crate) fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub(crate) fn round_trip(&self) -> f64 {
        self.round_trip
    }

    pub(crate) fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Smoothed bandwidth estimate in bits per second, `None` until enough
    /// data has been loaded.
    pub(crate) fn estimate(&self) -> Option<f64> {
        self.estimator.estimate()
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }
}
