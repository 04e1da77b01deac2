use super::clock_utils::{video_ts_to_audio_ts, ONE_SECOND_IN_TS};

/// Timestamp bookkeeping of a track for the segment being transmuxed, used to
/// calculate its `baseMediaDecodeTime`.
#[derive(Clone, Debug, Default)]
pub(crate) struct TrackDtsInfo {
    min_segment_pts: Option<i64>,
    min_segment_dts: Option<i64>,
    max_segment_pts: Option<i64>,
    max_segment_dts: Option<i64>,
}

impl TrackDtsInfo {
    /// Get information about the start and end of the track and the
    /// duration for each frame/sample we process in order to calculate
    /// the baseMediaDecodeTime.
    pub(crate) fn collect_info(&mut self, pts: i64, dts: i64) {
        self.min_segment_pts = Some(self.min_segment_pts.map_or(pts, |p| i64::min(p, pts)));
        self.max_segment_pts = Some(self.max_segment_pts.map_or(pts, |p| i64::max(p, pts)));
        self.min_segment_dts = Some(self.min_segment_dts.map_or(dts, |d| i64::min(d, dts)));
        self.max_segment_dts = Some(self.max_segment_dts.map_or(dts, |d| i64::max(d, dts)));
    }

    pub(crate) fn min_segment_dts(&self) -> Option<i64> {
        self.min_segment_dts
    }

    pub(crate) fn min_segment_pts(&self) -> Option<i64> {
        self.min_segment_pts
    }

    pub(crate) fn max_segment_pts(&self) -> Option<i64> {
        self.max_segment_pts
    }

    /// Clear values used to calculate the baseMediaDecodeTime between
    /// segments
    pub(crate) fn clear_info(&mut self) {
        self.min_segment_dts = None;
        self.max_segment_dts = None;
        self.min_segment_pts = None;
        self.max_segment_pts = None;
    }

    /// Calculate the track's baseMediaDecodeTime based on the earliest
    /// DTS the transmuxer has ever seen (`timeline_start_dts`) and the minimum
    /// DTS for the current track.
    ///
    /// The result is expressed in the track's timescale: 90kHz for video, the
    /// sample rate for audio.
    pub(crate) fn calculate_base_media_decode_time(
        &self,
        timeline_start_dts: i64,
        keep_original_timestamps: bool,
        audio_sample_rate: Option<u32>,
    ) -> u64 {
        let mut min_segment_dts = self.min_segment_dts.unwrap_or(0);

        // Optionally adjust the time so the first segment starts at zero.
        if !keep_original_timestamps {
            min_segment_dts -= timeline_start_dts;
        }

        // baseMediaDecodeTime is the location, in time, where we want the start of the first
        // segment to be placed
        let base_media_decode_time = i64::max(0, min_segment_dts) as u64;

        match audio_sample_rate {
            // Audio has a different clock equal to the sampling_rate so we need to
            // scale the PTS values into the clock rate of the track
            Some(sample_rate) => video_ts_to_audio_ts(base_media_decode_time, sample_rate),
            None => base_media_decode_time,
        }
    }

    /// Duration covered by the collected presentation timestamps, in seconds.
    pub(crate) fn pts_span_seconds(&self) -> Option<f64> {
        match (self.min_segment_pts, self.max_segment_pts) {
            (Some(min), Some(max)) => Some((max - min) as f64 / ONE_SECOND_IN_TS as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_media_decode_time() {
        let mut info = TrackDtsInfo::default();
        info.collect_info(93_000, 90_000);
        info.collect_info(96_000, 93_000);
        assert_eq!(info.min_segment_dts(), Some(90_000));
        assert_eq!(info.min_segment_pts(), Some(93_000));
        assert_eq!(info.max_segment_pts(), Some(96_000));
        assert_eq!(info.calculate_base_media_decode_time(90_000, false, None), 0);
        assert_eq!(info.calculate_base_media_decode_time(0, false, None), 90_000);
        assert_eq!(info.calculate_base_media_decode_time(45_000, true, None), 90_000);
        assert_eq!(
            info.calculate_base_media_decode_time(0, false, Some(44_100)),
            44_100
        );
        assert_eq!(info.pts_span_seconds(), Some(3_000. / 90_000.));
    }

    #[test]
    fn test_clear_info() {
        let mut info = TrackDtsInfo::default();
        info.collect_info(10, 10);
        info.clear_info();
        assert_eq!(info.min_segment_dts(), None);
        assert_eq!(info.calculate_base_media_decode_time(0, false, None), 0);
    }
}
