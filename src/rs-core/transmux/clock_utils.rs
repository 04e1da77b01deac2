/// Number of ticks per second of the MPEG-2 Transport Stream clock.
pub(crate) const ONE_SECOND_IN_TS: u64 = 90000;

/// PTS and DTS are 33-bit wide.
const MAX_TS: i64 = 1 << 33;

/// Distance above which two timestamps are considered to be on each side of a
/// 33-bit wrap.
const ROLLOVER_THRESHOLD: i64 = 1 << 32;

pub(crate) fn seconds_to_video_ts(seconds: f64) -> u64 {
    (seconds * ONE_SECOND_IN_TS as f64) as u64
}

pub(crate) fn video_ts_to_seconds(timestamp: u64) -> f64 {
    timestamp as f64 / ONE_SECOND_IN_TS as f64
}

pub(crate) fn audio_ts_to_video_ts(timestamp: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    timestamp * ONE_SECOND_IN_TS / sample_rate as u64
}

pub(crate) fn video_ts_to_audio_ts(timestamp: u64, sample_rate: u32) -> u64 {
    timestamp * sample_rate as u64 / ONE_SECOND_IN_TS
}

/// Convert a 90kHz timestamp into the millisecond timescale used by FLV tags.
///
/// The low bit is dropped first so the computation stays within 32-bit
/// integer arithmetic in the FLV path, which is where `/ 45` comes from.
pub(crate) fn video_ts_to_ms(timestamp: i64) -> i64 {
    (timestamp >> 1) / 45
}

/// Adjust ID3 tag timing information by the timeline start PTS (unless
/// `keep_original_timestamps` is set) and convert it to seconds.
pub(crate) fn metadata_ts_to_seconds(
    timestamp: i64,
    timeline_start_pts: i64,
    keep_original_timestamps: bool,
) -> f64 {
    let ts = if keep_original_timestamps {
        timestamp
    } else {
        timestamp - timeline_start_pts
    };
    ts as f64 / ONE_SECOND_IN_TS as f64
}

/// Bring `value` as close as possible to `reference`, by adding or removing
/// multiples of the 33-bit timestamp range.
pub(crate) fn handle_rollover(mut value: i64, reference: i64) -> i64 {
    let direction = if value > reference { -1 } else { 1 };
    while (reference - value).abs() > ROLLOVER_THRESHOLD {
        value += direction * MAX_TS;
    }
    value
}

/// Keeps the timestamps of a single elementary stream monotonic across
/// 33-bit wraps.
///
/// The first timestamp seen becomes the reference. Each following value is
/// unwrapped against the last unwrapped DTS.
#[derive(Debug, Default)]
pub(crate) struct RolloverHandler {
    last_dts: Option<i64>,
}

impl RolloverHandler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Unwrap a `(pts, dts)` pair.
    pub(crate) fn process(&mut self, pts: i64, dts: i64) -> (i64, i64) {
        let reference = *self.last_dts.get_or_insert(dts);
        let pts = handle_rollover(pts, reference);
        let dts = handle_rollover(dts, reference);
        self.last_dts = Some(dts);
        (pts, dts)
    }

    /// Forget the reference, e.g. on a discontinuity.
    pub(crate) fn reset(&mut self) {
        self.last_dts = None;
    }
}
