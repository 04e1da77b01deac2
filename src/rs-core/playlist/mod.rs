//! Media playlist model consumed by the segment loader, and the timing
//! helpers computed from it.
//!
//! Playlists are parsed elsewhere; this module only stores their result and
//! refines it as segments are loaded (real segment ends, presentation
//! timestamps).

use crate::utils::time_ranges::TimeRanges;

/// Target duration assumed when a playlist doesn't declare one.
pub const DEFAULT_TARGET_DURATION: f64 = 10.;

/// Sub-range of a resource, as declared by an `#EXT-X-BYTERANGE` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value of the `Range` HTTP header needed to fetch that range.
    pub fn header_value(&self) -> String {
        let last_byte = (self.offset + self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, last_byte)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
}

/// Encryption information of a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentKey {
    pub method: KeyMethod,
    pub uri: String,
    /// Explicit IV. When absent, the segment's media sequence number is used.
    pub iv: Option<[u8; 16]>,
}

/// A media segment of a `MediaPlaylist`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentInfo {
    pub uri: String,
    /// Duration declared by the playlist, in seconds. Refined once the
    /// segment has been pushed to the media buffer.
    pub duration: Option<f64>,
    pub discontinuity: bool,
    pub timeline: u32,
    pub key: Option<SegmentKey>,
    pub byterange: Option<ByteRange>,
    /// End of the segment in the media buffer, known once it has been
    /// appended.
    pub end: Option<f64>,
    /// Presentation timestamps recorded while transmuxing, in milliseconds.
    pub min_video_pts: Option<f64>,
    pub max_video_pts: Option<f64>,
    pub min_audio_pts: Option<f64>,
    pub max_audio_pts: Option<f64>,
}

fn optional_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f64::min(a, b)),
        (a, b) => a.or(b),
    }
}

fn optional_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f64::max(a, b)),
        (a, b) => a.or(b),
    }
}

impl SegmentInfo {
    pub fn new(uri: impl Into<String>, duration: f64) -> Self {
        Self {
            uri: uri.into(),
            duration: Some(duration),
            ..Self::default()
        }
    }

    /// Earliest presentation timestamp recorded for this segment, in
    /// milliseconds.
    pub fn min_pts(&self) -> Option<f64> {
        optional_min(self.min_video_pts, self.min_audio_pts)
    }

    /// Latest presentation timestamp recorded for this segment, in
    /// milliseconds.
    pub fn max_pts(&self) -> Option<f64> {
        optional_max(self.max_video_pts, self.max_audio_pts)
    }

    /// Record the timestamps of a segment's media, in milliseconds.
    pub fn record_pts(&mut self, video: Option<(f64, f64)>, audio: Option<(f64, f64)>) {
        if let Some((min, max)) = video {
            self.min_video_pts = Some(min);
            self.max_video_pts = Some(max);
        }
        if let Some((min, max)) = audio {
            self.min_audio_pts = Some(min);
            self.max_audio_pts = Some(max);
        }
    }

    fn has_refined_timing(&self) -> bool {
        self.end.is_some()
    }
}

/// Structure representing the concept of the `Media Playlist` in HLS.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaPlaylist {
    pub uri: String,
    pub media_sequence: u32,
    pub discontinuity_sequence: u32,
    pub target_duration: Option<f64>,
    pub end_list: bool,
    /// Indexes of the segments starting a new discontinuity sequence.
    pub discontinuity_starts: Vec<usize>,
    pub total_duration: Option<f64>,
    pub segments: Vec<SegmentInfo>,
}

/// Result of merging a refreshed live playlist into the current one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaylistMergeOutcome {
    /// `false` if the update brought no new segments.
    pub changed: bool,
    /// Duration, in seconds, of the segments which are not in the playlist
    /// anymore.
    pub expired: f64,
}

impl MediaPlaylist {
    pub fn target_duration(&self) -> f64 {
        match self.target_duration {
            Some(d) if d > 0. => d,
            _ => DEFAULT_TARGET_DURATION,
        }
    }

    pub fn segment(&self, media_index: usize) -> Option<&SegmentInfo> {
        self.segments.get(media_index)
    }

    pub fn segment_mut(&mut self, media_index: usize) -> Option<&mut SegmentInfo> {
        self.segments.get_mut(media_index)
    }

    /// Media sequence number of the segment at `media_index`.
    pub fn sequence_number(&self, media_index: usize) -> i64 {
        self.media_sequence as i64 + media_index as i64
    }

    /// Replace this playlist with a refreshed version of it, keeping the
    /// information learned about segments present in both.
    ///
    /// An update with the same media sequence number and segment count is
    /// considered unchanged and ignored.
    pub fn merge_update(&mut self, update: MediaPlaylist) -> PlaylistMergeOutcome {
        if self.uri == update.uri
            && self.media_sequence == update.media_sequence
            && self.segments.len() == update.segments.len()
        {
            return PlaylistMergeOutcome {
                changed: false,
                expired: 0.,
            };
        }

        let expired = if update.media_sequence > self.media_sequence {
            interval_duration(
                self,
                self.media_sequence as i64,
                update.media_sequence as i64,
                true,
            )
        } else {
            0.
        };

        let offset = update.media_sequence as i64 - self.media_sequence as i64;
        let old_segments = std::mem::take(&mut self.segments);
        *self = update;
        if offset >= 0 {
            let offset = offset as usize;
            for (old, new) in old_segments.iter().skip(offset).zip(self.segments.iter_mut()) {
                merge_segment(old, new);
            }
        }
        PlaylistMergeOutcome {
            changed: true,
            expired,
        }
    }
}

/// Bring the information learned on `old` while loading it into `new`,
/// without overriding what the latter declares.
fn merge_segment(old: &SegmentInfo, new: &mut SegmentInfo) {
    if old.has_refined_timing() && new.end.is_none() {
        new.end = old.end;
        new.duration = old.duration.or(new.duration);
    }
    new.min_video_pts = new.min_video_pts.or(old.min_video_pts);
    new.max_video_pts = new.max_video_pts.or(old.max_video_pts);
    new.min_audio_pts = new.min_audio_pts.or(old.min_audio_pts);
    new.max_audio_pts = new.max_audio_pts.or(old.max_audio_pts);
    if new.key.is_none() {
        new.key = old.key.clone();
    }
}

/// Duration of the segments in `[start, end)`, those being indexes in the
/// playlist's segments. The range must not cross a discontinuity.
fn range_duration(
    playlist: &MediaPlaylist,
    start: usize,
    end: usize,
    include_trailing_time: bool,
) -> f64 {
    let target_duration = playlist.target_duration();
    let segments = &playlist.segments;
    let mut result = 0.;

    // accumulate while searching for the earliest segment with PTS information
    let mut left = start;
    while left < end {
        let segment = &segments[left];
        if segment.min_pts().is_some() {
            break;
        }
        result += segment.duration.unwrap_or(target_duration);
        left += 1;
    }

    if include_trailing_time {
        let next_start = segments.get(end).and_then(|s| s.min_pts());
        let left_start = segments.get(left).and_then(|s| s.min_pts());
        if let (Some(next_start), Some(left_start)) = (next_start, left_start) {
            return result + 0.001 * (next_start - left_start);
        }
    }

    // same thing from the end, looking for the latest segment with PTS info
    let mut right = end;
    while right > left {
        let segment = &segments[right - 1];
        if segment.max_pts().is_some() {
            break;
        }
        result += segment.duration.unwrap_or(target_duration);
        right -= 1;
    }

    if right > left {
        let max = segments[right - 1].max_pts().unwrap_or(0.);
        let min = segments[left].min_pts().unwrap_or(max);
        result += 0.001 * (max - min);
    }
    result
}

/// Duration of the segments in `[start, end)`, split at each discontinuity.
fn accumulate_duration(
    playlist: &MediaPlaylist,
    start: usize,
    end: usize,
    include_trailing_time: bool,
) -> f64 {
    let end = usize::min(end, playlist.segments.len());
    if start >= end {
        return 0.;
    }
    let mut boundaries: Vec<usize> = playlist
        .discontinuity_starts
        .iter()
        .copied()
        .filter(|d| *d > start && *d < end)
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries.push(end);

    let mut result = 0.;
    let mut range_start = start;
    let last_idx = boundaries.len() - 1;
    for (i, range_end) in boundaries.into_iter().enumerate() {
        result += range_duration(
            playlist,
            range_start,
            range_end,
            include_trailing_time && i == last_idx,
        );
        range_start = range_end;
    }
    result
}

/// Duration of the segments whose media sequence numbers are in
/// `[start_sequence, end_sequence)`.
///
/// Segments which already expired from the playlist are estimated to last
/// one target duration each.
pub fn interval_duration(
    playlist: &MediaPlaylist,
    start_sequence: i64,
    end_sequence: i64,
    include_trailing_time: bool,
) -> f64 {
    let media_sequence = playlist.media_sequence as i64;
    let expired_count = i64::max(media_sequence - start_sequence, 0);
    let mut result = expired_count as f64 * playlist.target_duration();

    let start = start_sequence + expired_count - media_sequence;
    let end = end_sequence - media_sequence;
    if end > 0 {
        result += accumulate_duration(
            playlist,
            start as usize,
            end as usize,
            include_trailing_time,
        );
    }
    result
}

/// Duration of a playlist.
///
/// With `bounds`, the duration of the segments whose sequence numbers are in
/// `[bounds.0, bounds.1)`. Without, the whole playlist's duration: its
/// declared total duration if known, `+inf` for live playlists.
pub fn duration(
    playlist: &MediaPlaylist,
    bounds: Option<(i64, i64)>,
    include_trailing_time: bool,
) -> f64 {
    match bounds {
        Some((start, end)) => interval_duration(playlist, start, end, include_trailing_time),
        None => {
            if let Some(total) = playlist.total_duration.filter(|d| *d > 0.) {
                total
            } else if !playlist.end_list {
                f64::INFINITY
            } else {
                let start = playlist.media_sequence as i64;
                let end = start + playlist.segments.len() as i64;
                interval_duration(playlist, start, end, include_trailing_time)
            }
        }
    }
}

/// Duration of the single segment at `media_index`.
fn segment_duration(playlist: &MediaPlaylist, media_index: usize, include_trailing: bool) -> f64 {
    let seq = playlist.sequence_number(media_index);
    interval_duration(playlist, seq, seq + 1, include_trailing)
}

/// Time interval which can be seeked to.
///
/// Live playlists don't expose the last three target durations of content.
pub fn seekable(playlist: &MediaPlaylist) -> TimeRanges {
    let mut ranges = TimeRanges::new();
    if playlist.segments.is_empty() {
        return ranges;
    }
    if playlist.end_list {
        ranges.add(0., duration(playlist, None, true));
        return ranges;
    }

    let start_seq = playlist.media_sequence as i64;
    let mut end = interval_duration(
        playlist,
        start_seq,
        start_seq + playlist.segments.len() as i64,
        true,
    );
    let mut live_buffer = playlist.target_duration() * 3.;
    for i in (0..playlist.segments.len()).rev() {
        if live_buffer <= 0. {
            break;
        }
        let pending = f64::min(segment_duration(playlist, i, true), live_buffer);
        live_buffer -= pending;
        end -= pending;
    }
    ranges.add(0., end);
    ranges
}

/// Index of the segment from which a live playlist should be played: three
/// target durations from its end.
pub fn media_index_for_live(playlist: &MediaPlaylist) -> usize {
    let target_tail = playlist.target_duration() * 3.;
    let mut tail_duration = 0.;
    let mut index = playlist.segments.len();
    while tail_duration < target_tail && index > 0 {
        tail_duration += playlist.segments[index - 1]
            .duration
            .unwrap_or(playlist.target_duration());
        index -= 1;
    }
    index
}

/// Translate `media_index`, an index in `original`, into the index of the
/// same segment in `update`.
///
/// Falls back to the live point when the two playlists are too far apart.
pub fn translate_media_index(
    media_index: usize,
    original: &MediaPlaylist,
    update: &MediaPlaylist,
) -> usize {
    if media_index == 0 || update.segments.is_empty() {
        return 0;
    }
    let translated =
        media_index as i64 + (original.media_sequence as i64 - update.media_sequence as i64);
    if translated < 0 || translated > update.segments.len() as i64 {
        media_index_for_live(update) + 1
    } else {
        translated as usize
    }
}

/// Index of the segment containing `time`, in seconds.
///
/// `expired` is the duration of content which left the playlist. When the
/// position is ambiguous because durations were rounded, the lower index
/// wins. Positions outside the playlist are clamped to its first or last
/// segment.
pub fn media_index_for_time(playlist: &MediaPlaylist, time: f64, expired: f64) -> usize {
    let mut time = time - expired;
    if time < 0. {
        return 0;
    }
    for i in 0..playlist.segments.len() {
        time -= segment_duration(playlist, i, false);
        if time <= 0. {
            return i;
        }
    }
    playlist.segments.len().saturating_sub(1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn playlist(media_sequence: u32, durations: &[f64], end_list: bool) -> MediaPlaylist {
        MediaPlaylist {
            uri: String::from("media.m3u8"),
            media_sequence,
            target_duration: Some(10.),
            end_list,
            segments: durations
                .iter()
                .enumerate()
                .map(|(i, d)| SegmentInfo::new(format!("{}.ts", media_sequence as usize + i), *d))
                .collect(),
            ..MediaPlaylist::default()
        }
    }

    #[test]
    fn test_byte_range_header() {
        let range = ByteRange {
            offset: 100,
            length: 50,
        };
        assert_eq!(range.header_value(), "bytes=100-149");
    }

    #[test]
    fn test_duration_from_declared_durations() {
        let p = playlist(0, &[10., 9., 8.], true);
        assert_eq!(duration(&p, None, true), 27.);
        assert_eq!(duration(&p, Some((1, 3)), true), 17.);
        let mut p2 = p.clone();
        p2.segments[1].duration = None;
        assert_eq!(duration(&p2, None, true), 28.);
    }

    #[test]
    fn test_duration_whole_playlist() {
        let mut p = playlist(0, &[10., 10.], false);
        assert_eq!(duration(&p, None, true), f64::INFINITY);
        p.total_duration = Some(42.);
        assert_eq!(duration(&p, None, true), 42.);
    }

    #[test]
    fn test_expired_segments_use_target_duration() {
        let p = playlist(10, &[4., 4.], true);
        assert_eq!(interval_duration(&p, 8, 12, true), 28.);
        assert_eq!(interval_duration(&p, 10, 10, true), 0.);
    }

    #[test]
    fn test_duration_uses_pts() {
        let mut p = playlist(0, &[10., 10., 10.], true);
        p.segments[0].record_pts(Some((0., 9_500.)), None);
        p.segments[1].record_pts(Some((9_500., 19_000.)), Some((9_400., 19_100.)));
        // pts span of the first two segments, then the declared duration
        assert!((interval_duration(&p, 0, 3, false) - (19.1 + 10.)).abs() < 1e-9);
        // trailing time up to the next segment start
        assert!((interval_duration(&p, 0, 1, true) - 9.4).abs() < 1e-9);
        assert!((interval_duration(&p, 0, 1, false) - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_pts_not_used_across_discontinuities() {
        let mut p = playlist(0, &[10., 10.], true);
        p.segments[0].record_pts(Some((1_000_000., 1_009_000.)), None);
        p.segments[1].record_pts(Some((0., 8_000.)), None);
        p.segments[1].discontinuity = true;
        p.discontinuity_starts = vec![1];
        assert!((interval_duration(&p, 0, 2, false) - 17.).abs() < 1e-9);
    }

    #[test]
    fn test_seekable() {
        assert!(seekable(&playlist(0, &[], true)).is_empty());

        let vod = playlist(0, &[10., 10., 10.], true);
        let ranges = seekable(&vod);
        assert_eq!((ranges.start(0), ranges.end(0)), (Some(0.), Some(30.)));

        let live = playlist(0, &[10., 10., 10., 10., 10.], false);
        let ranges = seekable(&live);
        assert_eq!((ranges.start(0), ranges.end(0)), (Some(0.), Some(20.)));

        let mut short_segments = playlist(0, &[4.; 10], false);
        short_segments.target_duration = Some(4.);
        assert_eq!(seekable(&short_segments).end(0), Some(28.));
    }

    #[test]
    fn test_media_index_for_live() {
        assert_eq!(media_index_for_live(&playlist(0, &[10.; 6], false)), 3);
        assert_eq!(media_index_for_live(&playlist(0, &[10.; 2], false)), 0);
        assert_eq!(media_index_for_live(&playlist(0, &[], false)), 0);
    }

    #[test]
    fn test_translate_media_index() {
        let original = playlist(100, &[10.; 6], false);
        let update = playlist(102, &[10.; 6], false);
        assert_eq!(translate_media_index(0, &original, &update), 0);
        assert_eq!(translate_media_index(4, &original, &update), 2);
        assert_eq!(translate_media_index(4, &original, &playlist(102, &[], false)), 0);
        // too far apart: live point + 1
        assert_eq!(translate_media_index(1, &original, &update), 4);
        let far = playlist(90, &[10.; 6], false);
        assert_eq!(translate_media_index(3, &original, &far), 4);
    }

    #[test]
    fn test_media_index_for_time() {
        let p = playlist(0, &[10., 10., 10.], true);
        assert_eq!(media_index_for_time(&p, 0., 0.), 0);
        assert_eq!(media_index_for_time(&p, 5., 0.), 0);
        // boundaries go to the lower index
        assert_eq!(media_index_for_time(&p, 10., 0.), 0);
        assert_eq!(media_index_for_time(&p, 10.5, 0.), 1);
        assert_eq!(media_index_for_time(&p, 500., 0.), 2);
        assert_eq!(media_index_for_time(&p, 25., 20.), 0);
        assert_eq!(media_index_for_time(&p, 5., 20.), 0);
        assert_eq!(media_index_for_time(&playlist(0, &[], true), 5., 0.), 0);
    }

    #[test]
    fn test_merge_update() {
        let mut current = playlist(0, &[10., 10., 10.], false);
        current.segments[2].end = Some(29.5);
        current.segments[2].duration = Some(9.5);
        current.segments[2].record_pts(Some((20_000., 29_500.)), None);

        let same = playlist(0, &[10., 10., 10.], false);
        assert!(!current.merge_update(same).changed);

        let update = playlist(2, &[10., 10., 10.], false);
        let outcome = current.merge_update(update);
        assert!(outcome.changed);
        assert_eq!(outcome.expired, 20.);
        assert_eq!(current.media_sequence, 2);
        assert_eq!(current.segments.len(), 3);
        assert_eq!(current.segments[0].end, Some(29.5));
        assert_eq!(current.segments[0].duration, Some(9.5));
        assert_eq!(current.segments[0].min_video_pts, Some(20_000.));
        assert_eq!(current.segments[1].end, None);
    }
}
