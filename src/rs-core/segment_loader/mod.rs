//! Logic deciding which segment to load next, loading it, decrypting it,
//! transmuxing it and pushing it to the media buffer.
//!
//! The `SegmentLoader` is a state machine driven by the host: network
//! responses, timers and media buffer updates are all announced through its
//! `on_*` methods.

use std::collections::VecDeque;

use crate::{
    adaptive::BandwidthMonitor,
    bindings::{RequestId, TimerId, TimerReason},
    decrypter::{iv_from_sequence_number, DecryptJobQueue, DecryptProgress},
    media_element::{MediaSink, PushSegmentError},
    playlist::{self, interval_duration, media_index_for_time, KeyMethod, MediaPlaylist, SegmentInfo},
    requester::{FailureOutcome, RequestKind, Requester},
    transmux::{
        FlvTransmuxer, MetadataCue, SegmentPtsInfo, TransmuxError, Transmuxer, TransmuxerOptions,
    },
    utils::time_ranges::{find_sole_uncommon_end, TimeRanges, TIME_FUDGE_FACTOR},
    Logger,
};

use self::key_cache::KeyCache;

pub use config::SegmentOutput;
pub(crate) use config::SegmentLoaderConfig;
pub use error::LoaderError;
pub(crate) use host::{FetchRequest, Fetcher, LoaderHost, PlaybackObserver, Scheduler};

mod config;
mod error;
pub(crate) mod host;
mod key_cache;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoaderState {
    /// Waiting for both a playlist and a media buffer.
    Init,
    /// Nothing is being loaded right now.
    Ready,
    /// A segment request, and maybe its key request, is pending.
    Waiting,
    /// The loaded segment is being decrypted.
    Decrypting,
    /// The loaded segment is being pushed to the media buffer.
    Appending,
    /// `dispose` has been called, nothing will happen anymore.
    Disposed,
}

/// Segment chosen to be loaded next.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SegmentChoice {
    media_index: usize,
    /// `timestampOffset` the media buffer should have when pushing it.
    timestamp_offset: f64,
}

/// Segment currently being loaded.
#[derive(Debug)]
struct PendingSegment {
    uri: String,
    /// Index of the segment in the playlist, at the time it was requested.
    media_index: usize,
    playlist_uri: String,
    /// Media sequence number of the playlist at the time it was requested.
    media_sequence: u32,
    timeline: u32,
    timestamp_offset: f64,
    /// Set for encrypted segments.
    key_uri: Option<String>,
    iv: [u8; 16],
    /// The response, once loaded.
    bytes: Option<Vec<u8>>,
    /// Buffered ranges just before its data was pushed.
    buffered_before: TimeRanges,
    pts_info: SegmentPtsInfo,
    timestamp_offset_applied: bool,
}

/// Output of the transmuxing step for a whole segment.
struct ProcessedSegment {
    buffers: Vec<Vec<u8>>,
    pts_info: SegmentPtsInfo,
    metadata: Vec<MetadataCue>,
}

pub(crate) struct SegmentLoader<H: LoaderHost> {
    host: H,
    config: SegmentLoaderConfig,
    state: LoaderState,
    playlist: Option<MediaPlaylist>,
    sink: Option<H::Sink>,

    /// Timer of the periodic buffer check. The loader is paused while it is `None`.
    check_buffer_timer: Option<TimerId>,

    requester: Requester,
    keys: KeyCache,
    pending_segment: Option<PendingSegment>,
    decrypt_job: Option<DecryptJobQueue>,
    decrypt_timer: Option<TimerId>,

    /// Buffers of the current segment not pushed yet.
    pending_appends: VecDeque<Vec<u8>>,

    transmuxer: Transmuxer,
    flv_transmuxer: FlvTransmuxer,
    flv_header_sent: bool,

    bandwidth: BandwidthMonitor,

    /// Duration, in seconds, of the content which left a live playlist.
    expired: f64,

    /// Correction applied on the position when looking for the next segment,
    /// when the real end of the previous ones could not be known.
    time_correction: f64,

    current_timeline: Option<u32>,
    error: Option<LoaderError>,
    metadata_cues: Vec<MetadataCue>,
}

impl<H: LoaderHost> SegmentLoader<H> {
    pub(crate) fn new(host: H, config: SegmentLoaderConfig) -> Self {
        let mut requester = Requester::new(config.key_retry_count);
        requester.update_backoff(config.key_backoff_base, config.key_backoff_max);
        let transmuxer = Transmuxer::new(TransmuxerOptions {
            keep_original_timestamps: config.keep_original_timestamps,
        });
        Self {
            host,
            config,
            state: LoaderState::Init,
            playlist: None,
            sink: None,
            check_buffer_timer: None,
            requester,
            keys: KeyCache::default(),
            pending_segment: None,
            decrypt_job: None,
            decrypt_timer: None,
            pending_appends: VecDeque::new(),
            transmuxer,
            flv_transmuxer: FlvTransmuxer::new(),
            flv_header_sent: false,
            bandwidth: BandwidthMonitor::new(),
            expired: 0.,
            time_correction: 0.,
            current_timeline: None,
            error: None,
            metadata_cues: vec![],
        }
    }

    pub(crate) fn state(&self) -> LoaderState {
        self.state
    }

    /// `true` while the buffer is not periodically checked.
    pub(crate) fn paused(&self) -> bool {
        self.check_buffer_timer.is_none()
    }

    /// Last fatal error encountered.
    pub(crate) fn error(&self) -> Option<&LoaderError> {
        self.error.as_ref()
    }

    pub(crate) fn playlist(&self) -> Option<&MediaPlaylist> {
        self.playlist.as_ref()
    }

    pub(crate) fn host(&self) -> &H {
        &self.host
    }

    pub(crate) fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub(crate) fn sink_mut(&mut self) -> Option<&mut H::Sink> {
        self.sink.as_mut()
    }

    pub(crate) fn config(&self) -> &SegmentLoaderConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: SegmentLoaderConfig) {
        self.requester.update_key_max_attempts(config.key_retry_count);
        self.requester
            .update_backoff(config.key_backoff_base, config.key_backoff_max);
        if config.keep_original_timestamps != self.config.keep_original_timestamps {
            self.transmuxer = Transmuxer::new(TransmuxerOptions {
                keep_original_timestamps: config.keep_original_timestamps,
            });
        }
        self.config = config;
    }

    /// Throughput of the last segment request, in bits per second.
    pub(crate) fn bandwidth(&self) -> f64 {
        self.bandwidth.bandwidth()
    }

    /// Duration of the last segment request, in milliseconds.
    pub(crate) fn round_trip(&self) -> f64 {
        self.bandwidth.round_trip()
    }

    pub(crate) fn bytes_received(&self) -> u64 {
        self.bandwidth.bytes_received()
    }

    pub(crate) fn bandwidth_estimate(&self) -> Option<f64> {
        self.bandwidth.estimate()
    }

    pub(crate) fn expired(&self) -> f64 {
        self.expired
    }

    pub(crate) fn set_expired(&mut self, expired: f64) {
        self.expired = expired;
    }

    pub(crate) fn time_correction(&self) -> f64 {
        self.time_correction
    }

    /// Timed metadata found in the segments pushed since the last call.
    pub(crate) fn take_metadata_cues(&mut self) -> Vec<MetadataCue> {
        std::mem::take(&mut self.metadata_cues)
    }

    /// Time range, in seconds, which can be seeked to in the current playlist.
    pub(crate) fn seekable(&self) -> TimeRanges {
        let mut seekable = TimeRanges::new();
        if let Some(media_playlist) = self.playlist.as_ref() {
            for range in playlist::seekable(media_playlist).iter() {
                seekable.add(range.start() + self.expired, range.end() + self.expired);
            }
        }
        seekable
    }

    /// Set the media playlist segments are loaded from.
    ///
    /// A playlist with the same URI as the current one is considered to be a
    /// refresh of it: pending requests are kept. Switching to another
    /// playlist aborts them.
    pub(crate) fn set_playlist(&mut self, playlist: MediaPlaylist) {
        if self.state == LoaderState::Disposed {
            return;
        }
        let is_refresh = self
            .playlist
            .as_ref()
            .map_or(false, |current| current.uri == playlist.uri);
        if is_refresh {
            if let Some(current) = self.playlist.as_mut() {
                let outcome = current.merge_update(playlist);
                if outcome.changed {
                    Logger::debug(&format!(
                        "Loader: playlist refreshed, {}s expired",
                        outcome.expired
                    ));
                }
                self.expired += outcome.expired;
            }
        } else {
            Logger::info(&format!("Loader: new playlist {}", playlist.uri));
            self.playlist = Some(playlist);
            if self.state == LoaderState::Waiting {
                self.abort_pending();
                self.state = LoaderState::Ready;
                if !self.paused() {
                    self.fill_buffer();
                }
            }
        }
        if self.state == LoaderState::Init && self.sink.is_some() && !self.paused() {
            self.state = LoaderState::Ready;
            self.fill_buffer();
        }
    }

    /// Create the media buffer with the given mime-type. Does nothing if it
    /// was already created.
    pub(crate) fn set_mime_type(&mut self, mime_type: &str) {
        if self.state == LoaderState::Disposed || self.sink.is_some() {
            return;
        }
        match self.host.create_sink(mime_type) {
            Ok(sink) => self.sink = Some(sink),
            Err(err) => {
                self.fail(LoaderError::from(err));
                return;
            }
        }
        self.clear_buffer();
        if self.playlist.is_some() && self.state == LoaderState::Init && !self.paused() {
            self.state = LoaderState::Ready;
            self.fill_buffer();
        }
    }

    /// Start, or resume, loading segments.
    pub(crate) fn load(&mut self) {
        if self.state == LoaderState::Disposed {
            return;
        }
        self.monitor_buffer();
        if self.playlist.is_none() || self.sink.is_none() {
            return;
        }
        if matches!(self.state, LoaderState::Init | LoaderState::Ready) {
            self.state = LoaderState::Ready;
            self.fill_buffer();
        }
    }

    /// Stop checking the buffer. Pending operations are not interrupted.
    pub(crate) fn pause(&mut self) {
        if let Some(timer_id) = self.check_buffer_timer.take() {
            self.host.clear_timer(timer_id);
        }
    }

    /// Abort the pending requests, if any, and look for a segment to load again.
    pub(crate) fn abort(&mut self) {
        if self.state != LoaderState::Waiting {
            return;
        }
        Logger::debug("Loader: aborting");
        self.abort_pending();
        self.state = LoaderState::Ready;
        if !self.paused() {
            self.fill_buffer();
        }
    }

    /// Stop everything. The `SegmentLoader` cannot be used anymore.
    pub(crate) fn dispose(&mut self) {
        Logger::debug("Loader: disposing");
        self.abort_pending();
        self.pause();
        self.state = LoaderState::Disposed;
    }

    /// Remove everything from the media buffer.
    pub(crate) fn clear_buffer(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if !sink.buffered().is_empty() {
                if let Err(err) = sink.remove(0., f64::INFINITY) {
                    Logger::warn(&format!("Loader: could not clear the buffer: {err}"));
                }
            }
        }
    }

    pub(crate) fn on_request_finished(
        &mut self,
        request_id: RequestId,
        data: Vec<u8>,
        duration_ms: f64,
    ) {
        if self.state == LoaderState::Disposed {
            return;
        }
        let Some(kind) = self.requester.on_request_success(request_id) else {
            Logger::debug(&format!("Loader: ignoring unknown request {request_id}"));
            return;
        };
        match kind {
            RequestKind::Segment => {
                Logger::lazy_info(&|| {
                    format!(
                        "Loader: segment loaded ({} bytes in {}ms)",
                        data.len(),
                        duration_ms
                    )
                });
                self.bandwidth.add_metric(duration_ms, data.len() as u64);
                if let Some(pending) = self.pending_segment.as_mut() {
                    pending.bytes = Some(data);
                }
            }
            RequestKind::Key(uri) => match <[u8; 16]>::try_from(data.as_slice()) {
                Ok(key) => self.keys.insert(&uri, key),
                Err(_) => {
                    self.fail(LoaderError::InvalidKey { url: uri });
                    return;
                }
            },
        }
        if self.state == LoaderState::Waiting && !self.requester.has_pending() {
            self.process_response();
        }
    }

    pub(crate) fn on_request_failed(
        &mut self,
        request_id: RequestId,
        timed_out: bool,
        status: Option<u32>,
    ) {
        if self.state == LoaderState::Disposed {
            return;
        }
        match self
            .requester
            .on_request_failure(&mut self.host, request_id, timed_out)
        {
            FailureOutcome::Unknown => {
                Logger::debug(&format!("Loader: ignoring unknown request {request_id}"));
            }
            FailureOutcome::Retried(_) => {}
            FailureOutcome::TimedOut(_) => {
                Logger::warn("Loader: request timed out");
                self.abort_pending();
                self.bandwidth.on_timeout();
                self.state = LoaderState::Ready;
            }
            FailureOutcome::Failed(RequestKind::Segment) => {
                let url = self
                    .pending_segment
                    .as_ref()
                    .map(|p| p.uri.clone())
                    .unwrap_or_default();
                self.fail(LoaderError::SegmentRequest { url, status });
            }
            FailureOutcome::Failed(RequestKind::Key(uri)) => {
                Logger::warn(&format!(
                    "Loader: key {uri} could not be loaded, skipping its segments"
                ));
                self.keys.mark_failed(&uri);
                let err = LoaderError::KeyRequest { url: uri, status };
                self.host.report_error(&err, false);
                self.abort_pending();
                self.state = LoaderState::Ready;
                if !self.paused() {
                    self.fill_buffer();
                }
            }
        }
    }

    pub(crate) fn on_timer_ended(&mut self, id: TimerId, reason: TimerReason) {
        if self.state == LoaderState::Disposed {
            return;
        }
        match reason {
            TimerReason::BufferCheck => {
                if self.check_buffer_timer == Some(id) {
                    self.check_buffer_timer = None;
                    self.monitor_buffer();
                }
            }
            TimerReason::DecryptChunk => {
                if self.decrypt_timer == Some(id) {
                    self.decrypt_timer = None;
                    self.decrypt_next_chunk();
                }
            }
            TimerReason::RetryRequest => {
                self.requester.on_timer_finished(&mut self.host, id);
            }
        }
    }

    /// To call once the media buffer finished its pending operation.
    pub(crate) fn on_append_done(&mut self) {
        if self.state != LoaderState::Appending {
            return;
        }
        self.append_next();
    }

    /// To call when the media buffer reported an error on its pending
    /// operation.
    pub(crate) fn on_append_failed(&mut self, error: PushSegmentError) {
        if self.state != LoaderState::Appending {
            return;
        }
        self.fail(LoaderError::from(error));
    }

    fn monitor_buffer(&mut self) {
        if let Some(timer_id) = self.check_buffer_timer.take() {
            self.host.clear_timer(timer_id);
        }
        self.check_buffer_timer = Some(
            self.host
                .start_timer(self.config.check_buffer_delay_ms, TimerReason::BufferCheck),
        );
        if self.state == LoaderState::Ready {
            self.fill_buffer();
        }
    }

    fn fill_buffer(&mut self) {
        if self.state != LoaderState::Ready {
            return;
        }
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if sink.updating() {
            return;
        }
        let buffered = sink.buffered();
        let current_time = self.host.current_time();
        if let Some(choice) = self.check_buffer(&buffered, current_time) {
            self.load_segment(choice);
        }
    }

    /// Choose the segment to load, if any.
    fn check_buffer(&self, buffered: &TimeRanges, current_time: f64) -> Option<SegmentChoice> {
        let playlist = self.playlist.as_ref()?;
        let sink = self.sink.as_ref()?;
        if playlist.segments.is_empty() {
            return None;
        }

        let mut current_buffered = buffered.find_range(current_time);
        // The first segment is often reported as starting a little after 0
        if current_buffered.is_empty() && current_time == 0. {
            current_buffered = buffered.find_range(current_time + TIME_FUDGE_FACTOR);
        }

        let expired = self.expired + self.time_correction;
        let mut media_index = match current_buffered.end(0) {
            None => media_index_for_time(playlist, current_time, expired),
            Some(buffered_end) => {
                let buffered_time = f64::max(0., buffered_end - current_time);
                if self.host.has_played() {
                    if buffered_time >= self.config.goal_buffer_length {
                        return None;
                    }
                } else if buffered_time >= self.config.minimum_buffer_before_play {
                    return None;
                }
                media_index_for_time(playlist, buffered_end, expired)
            }
        };

        while playlist
            .segment(media_index)
            .map_or(false, |s| self.has_unusable_key(s))
        {
            media_index += 1;
        }
        if media_index >= playlist.segments.len() {
            return None;
        }

        let threshold = self.config.buffered_percent_threshold;
        if self.segment_buffered_percent(playlist, media_index, current_time, buffered) >= threshold
        {
            let next = media_index + 1;
            let next_is_loadable = playlist
                .segment(next)
                .map_or(false, |s| !self.has_unusable_key(s));
            if !next_is_loadable
                || self.segment_buffered_percent(playlist, next, current_time, buffered)
                    >= threshold
            {
                return None;
            }
            media_index = next;
        }

        let segment = &playlist.segments[media_index];
        let start_of_segment = self.segment_start(playlist, media_index);
        let mut timestamp_offset = sink.timestamp_offset();
        if Some(segment.timeline) != self.current_timeline || start_of_segment < timestamp_offset {
            timestamp_offset = start_of_segment;
        }
        Some(SegmentChoice {
            media_index,
            timestamp_offset,
        })
    }

    fn has_unusable_key(&self, segment: &SegmentInfo) -> bool {
        segment
            .key
            .as_ref()
            .map_or(false, |k| k.method == KeyMethod::Aes128 && self.keys.has_failed(&k.uri))
    }

    /// Position, in seconds, at which the segment at `media_index` starts.
    fn segment_start(&self, playlist: &MediaPlaylist, media_index: usize) -> f64 {
        let media_sequence = playlist.media_sequence as i64;
        self.expired
            + interval_duration(
                playlist,
                media_sequence,
                media_sequence + media_index as i64,
                true,
            )
    }

    fn segment_buffered_percent(
        &self,
        playlist: &MediaPlaylist,
        media_index: usize,
        current_time: f64,
        buffered: &TimeRanges,
    ) -> f64 {
        let Some(segment) = playlist.segment(media_index) else {
            return 0.;
        };
        let start = self.segment_start(playlist, media_index);
        let duration = segment.duration.unwrap_or(playlist.target_duration());
        buffered.buffered_percent(f64::max(current_time, start), start + duration)
    }

    fn load_segment(&mut self, choice: SegmentChoice) {
        let current_time = self.host.current_time();
        let seekable = self.seekable();
        let Some(playlist) = self.playlist.as_ref() else {
            return;
        };
        let Some(segment) = playlist.segment(choice.media_index) else {
            return;
        };

        let duration = segment.duration.unwrap_or(playlist.target_duration());
        let timeout_ms = duration * self.config.request_timeout_factor * 1000.;
        let key = segment
            .key
            .as_ref()
            .filter(|k| k.method == KeyMethod::Aes128);
        let iv = key.and_then(|k| k.iv).unwrap_or_else(|| {
            iv_from_sequence_number(
                playlist
                    .media_sequence
                    .wrapping_add(choice.media_index as u32),
            )
        });
        let pending = PendingSegment {
            uri: segment.uri.clone(),
            media_index: choice.media_index,
            playlist_uri: playlist.uri.clone(),
            media_sequence: playlist.media_sequence,
            timeline: segment.timeline,
            timestamp_offset: choice.timestamp_offset,
            key_uri: key.map(|k| k.uri.clone()),
            iv,
            bytes: None,
            buffered_before: TimeRanges::new(),
            pts_info: SegmentPtsInfo::default(),
            timestamp_offset_applied: false,
        };
        let byterange = segment.byterange;

        // Remove what is too far behind before requesting more
        let remove_to = match seekable.start(0) {
            Some(start) if start > 0. && start < current_time => start,
            _ => current_time - self.config.back_buffer_length,
        };
        if remove_to > 0. {
            if let Some(sink) = self.sink.as_mut() {
                if let Err(err) = sink.remove(0., remove_to) {
                    Logger::warn(&format!("Loader: could not clean the buffer: {err}"));
                }
            }
        }

        Logger::lazy_debug(&|| {
            format!(
                "Loader: loading segment {} (index {}, offset {})",
                pending.uri, pending.media_index, pending.timestamp_offset
            )
        });
        if let Some(key_uri) = pending.key_uri.as_deref() {
            if self.keys.get(key_uri).is_none() {
                self.requester
                    .request_key(&mut self.host, key_uri, Some(timeout_ms));
            }
        }
        self.requester
            .request_segment(&mut self.host, &pending.uri, byterange, Some(timeout_ms));
        self.pending_segment = Some(pending);
        self.state = LoaderState::Waiting;
    }

    /// Every request of the pending segment finished: decrypt it if needed.
    fn process_response(&mut self) {
        let Some(pending) = self.pending_segment.as_mut() else {
            return;
        };
        let Some(bytes) = pending.bytes.take() else {
            return;
        };
        let Some(key_uri) = pending.key_uri.clone() else {
            self.handle_segment(bytes);
            return;
        };
        let (iv, url) = (pending.iv, pending.uri.clone());
        let Some(key) = self.keys.get(&key_uri) else {
            self.fail(LoaderError::KeyRequest {
                url: key_uri,
                status: None,
            });
            return;
        };
        match DecryptJobQueue::new(bytes, &key, iv, self.config.decrypt_chunk_words) {
            Ok(job) => {
                Logger::debug("Loader: decrypting segment");
                self.state = LoaderState::Decrypting;
                self.decrypt_job = Some(job);
                self.schedule_decrypt_chunk();
            }
            Err(source) => self.fail(LoaderError::Decryption { url, source }),
        }
    }

    fn schedule_decrypt_chunk(&mut self) {
        self.decrypt_timer = Some(
            self.host
                .start_timer(self.config.decrypt_chunk_delay_ms, TimerReason::DecryptChunk),
        );
    }

    fn decrypt_next_chunk(&mut self) {
        let Some(job) = self.decrypt_job.as_mut() else {
            return;
        };
        match job.step() {
            Ok(DecryptProgress::Pending) => self.schedule_decrypt_chunk(),
            Ok(DecryptProgress::Done(data)) => {
                self.decrypt_job = None;
                self.handle_segment(data);
            }
            Err(source) => {
                let url = self
                    .pending_segment
                    .as_ref()
                    .map(|p| p.uri.clone())
                    .unwrap_or_default();
                self.fail(LoaderError::Decryption { url, source });
            }
        }
    }

    /// Transmux the segment if needed, then start pushing it.
    fn handle_segment(&mut self, bytes: Vec<u8>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let Some(pending) = self.pending_segment.as_mut() else {
            return;
        };
        self.state = LoaderState::Appending;
        pending.buffered_before = sink.buffered();
        let timeline_changed = self.current_timeline != Some(pending.timeline);
        let offset_changed = pending.timestamp_offset != sink.timestamp_offset();
        let timestamp_offset = pending.timestamp_offset;
        let url = pending.uri.clone();
        self.current_timeline = Some(pending.timeline);

        match self.transmux(bytes, timeline_changed, offset_changed) {
            Ok(mut processed) => {
                if let Some(pending) = self.pending_segment.as_mut() {
                    pending.pts_info = processed.pts_info;
                }
                if self.config.output == SegmentOutput::Fmp4 {
                    for cue in processed.metadata.iter_mut() {
                        cue.cue_time += timestamp_offset;
                    }
                }
                self.metadata_cues.append(&mut processed.metadata);
                self.pending_appends = processed
                    .buffers
                    .into_iter()
                    .filter(|b| !b.is_empty())
                    .collect();
                self.append_next();
            }
            Err(source) => self.fail(LoaderError::Transmux { url, source }),
        }
    }

    fn transmux(
        &mut self,
        bytes: Vec<u8>,
        timeline_changed: bool,
        offset_changed: bool,
    ) -> Result<ProcessedSegment, TransmuxError> {
        match self.config.output {
            SegmentOutput::Passthrough => Ok(ProcessedSegment {
                buffers: vec![bytes],
                pts_info: SegmentPtsInfo::default(),
                metadata: vec![],
            }),
            SegmentOutput::Fmp4 => {
                // Each segment pushed with a new offset starts its own media timeline
                if timeline_changed {
                    self.transmuxer.reset();
                } else if offset_changed {
                    self.transmuxer.reset_timeline();
                }
                self.transmuxer.push(&bytes)?;
                let segment = self.transmuxer.flush()?;
                let pts_info = segment.pts_info;
                let metadata = segment.metadata.clone();
                Ok(ProcessedSegment {
                    buffers: segment.into_buffers(),
                    pts_info,
                    metadata,
                })
            }
            SegmentOutput::Flv => {
                if timeline_changed {
                    self.flv_transmuxer.reset();
                }
                self.flv_transmuxer.push(&bytes)?;
                let segment = self.flv_transmuxer.flush()?;
                let mut buffers = Vec::with_capacity(2);
                if !self.flv_header_sent {
                    self.flv_header_sent = true;
                    buffers.push(self.flv_transmuxer.header(None));
                }
                buffers.push(segment.tags);
                Ok(ProcessedSegment {
                    buffers,
                    pts_info: segment.pts_info,
                    metadata: segment.metadata,
                })
            }
        }
    }

    /// Push the next buffer of the current segment if the media buffer is
    /// idle. Once everything has been pushed, finish the segment.
    fn append_next(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if sink.updating() {
            return;
        }
        let Some(pending) = self.pending_segment.as_mut() else {
            return;
        };
        if !pending.timestamp_offset_applied {
            pending.timestamp_offset_applied = true;
            if sink.timestamp_offset() != pending.timestamp_offset {
                Logger::debug(&format!(
                    "Loader: updating timestampOffset to {}",
                    pending.timestamp_offset
                ));
                sink.set_timestamp_offset(pending.timestamp_offset);
            }
        }
        match self.pending_appends.pop_front() {
            Some(data) => {
                Logger::info(&format!("Loader: pushing {} bytes", data.len()));
                if let Err(err) = sink.append_buffer(data) {
                    self.fail(LoaderError::from(err));
                }
            }
            None => self.on_segment_appended(),
        }
    }

    fn on_segment_appended(&mut self) {
        let Some(segment_info) = self.pending_segment.take() else {
            return;
        };
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        let buffered = sink.buffered();
        let sink_is_open = sink.is_open();
        let current_time = self.host.current_time();

        if self
            .playlist
            .as_ref()
            .map_or(false, |p| p.uri == segment_info.playlist_uri)
        {
            self.update_timeline(&segment_info, &buffered);
        }

        let current_buffered = buffered.find_range(current_time);
        if sink_is_open && self.is_end_of_stream(&segment_info, &current_buffered) {
            Logger::info("Loader: last segment pushed");
            if let Some(sink) = self.sink.as_mut() {
                sink.end_of_stream();
            }
        }

        // When seeking before the live window, jump to the loaded data
        if self.host.seeking() && current_buffered.is_empty() {
            let seekable_start = self.seekable().start(0);
            let next_range_start = buffered.find_next_range(current_time).start(0);
            if let (Some(seekable_start), Some(next_start)) = (seekable_start, next_range_start) {
                if current_time < seekable_start {
                    Logger::info(&format!("Loader: seeking to {next_start}"));
                    self.host.set_current_time(next_start + TIME_FUDGE_FACTOR);
                }
            }
        }

        self.state = LoaderState::Ready;
        if !self.paused() {
            self.fill_buffer();
        }
    }

    /// `true` if the playlist ended and its last segment has been pushed.
    fn is_end_of_stream(&self, segment_info: &PendingSegment, current_buffered: &TimeRanges) -> bool {
        let Some(playlist) = self.playlist.as_ref() else {
            return false;
        };
        if !playlist.end_list {
            return false;
        }
        let media_index = current_media_index(segment_info, playlist);
        let last_index = playlist.segments.len() as i64 - 1;
        let last_segment_buffered = match (
            playlist.segments.last().and_then(|s| s.end),
            current_buffered.end(0),
        ) {
            (Some(segment_end), Some(buffered_end)) => segment_end <= buffered_end,
            _ => false,
        };
        media_index == last_index || last_segment_buffered
    }

    /// Refine the pushed segment's timing information from what changed in
    /// the media buffer.
    fn update_timeline(&mut self, segment_info: &PendingSegment, buffered: &TimeRanges) {
        let Some(playlist) = self.playlist.as_mut() else {
            return;
        };
        let media_index = current_media_index(segment_info, playlist);
        if media_index < 0 || media_index as usize >= playlist.segments.len() {
            return;
        }
        let media_index = media_index as usize;
        let target_duration = playlist.target_duration();
        let segment_end = find_sole_uncommon_end(&segment_info.buffered_before, buffered);
        if let Some(segment) = playlist.segment_mut(media_index) {
            segment.record_pts(segment_info.pts_info.video, segment_info.pts_info.audio);
        }

        if update_segment_metadata(playlist, media_index, segment_end) {
            self.time_correction = 0.;
        } else {
            let duration = playlist.segments[media_index]
                .duration
                .unwrap_or(target_duration);
            self.time_correction -= duration;
        }
    }

    fn abort_pending(&mut self) {
        self.requester.abort_all(&mut self.host);
        self.pending_segment = None;
        if let Some(mut job) = self.decrypt_job.take() {
            job.cancel();
        }
        if let Some(timer_id) = self.decrypt_timer.take() {
            self.host.clear_timer(timer_id);
        }
        self.pending_appends.clear();
    }

    /// Stop loading because of `error`.
    fn fail(&mut self, error: LoaderError) {
        Logger::error(&format!("Loader: {error}"));
        self.abort_pending();
        self.host.report_error(&error, true);
        self.error = Some(error);
        if self.state != LoaderState::Disposed {
            self.state = LoaderState::Ready;
        }
        self.pause();
    }
}

/// Index, in `playlist`, of the segment described by `segment_info`, which
/// might have been requested from a previous version of that playlist.
fn current_media_index(segment_info: &PendingSegment, playlist: &MediaPlaylist) -> i64 {
    segment_info.media_index as i64 + segment_info.media_sequence as i64
        - playlist.media_sequence as i64
}

/// Set the end of the segment at `media_index` and deduce its duration.
///
/// Returns `false` if `segment_end` is unknown.
fn update_segment_metadata(
    playlist: &mut MediaPlaylist,
    media_index: usize,
    segment_end: Option<f64>,
) -> bool {
    let Some(segment_end) = segment_end.filter(|end| *end != 0.) else {
        return false;
    };
    let previous_end = media_index
        .checked_sub(1)
        .and_then(|i| playlist.segments[i].end);
    let Some(segment) = playlist.segment_mut(media_index) else {
        return false;
    };
    segment.end = Some(segment_end);
    if media_index == 0 {
        segment.duration = Some(segment_end);
    } else if let Some(previous_end) = previous_end {
        segment.duration = Some(segment_end - previous_end);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decrypter::{
            decrypt, iv_from_words,
            tests::{encrypt, KEY},
        },
        playlist::{tests::playlist, SegmentKey},
        segment_loader::host::tests::{MockHost, MockSink},
        transmux::tests::sample_stream,
    };

    fn passthrough() -> SegmentLoaderConfig {
        SegmentLoaderConfig::default().with_output(SegmentOutput::Passthrough)
    }

    fn started_loader(
        playlist: MediaPlaylist,
        config: SegmentLoaderConfig,
    ) -> SegmentLoader<MockHost> {
        let mut loader = SegmentLoader::new(MockHost::default(), config);
        loader.set_playlist(playlist);
        loader.set_mime_type("video/mp2t");
        loader.load();
        loader
    }

    fn sink(loader: &mut SegmentLoader<MockHost>) -> &mut MockSink {
        loader.sink_mut().unwrap()
    }

    fn last_request(loader: &SegmentLoader<MockHost>) -> (RequestId, FetchRequest) {
        loader.host().requests.last().cloned().unwrap()
    }

    /// End the pending sink operation, and announce it.
    fn complete_append(loader: &mut SegmentLoader<MockHost>, range: Option<(f64, f64)>) {
        sink(loader).complete(range);
        loader.on_append_done();
    }

    fn encrypted_playlist(iv: Option<[u8; 16]>) -> MediaPlaylist {
        let mut p = playlist(0, &[10., 10.], true);
        p.segments[0].key = Some(SegmentKey {
            method: KeyMethod::Aes128,
            uri: "key.bin".into(),
            iv,
        });
        p
    }

    /// Trigger decryption timers until the segment is decrypted. Returns the
    /// number of chunks.
    fn run_decryption(loader: &mut SegmentLoader<MockHost>) -> usize {
        let mut chunks = 0;
        while loader.state() == LoaderState::Decrypting {
            let (timer_id, _, reason) = *loader.host().timers.last().unwrap();
            assert_eq!(reason, TimerReason::DecryptChunk);
            loader.on_timer_ended(timer_id, reason);
            chunks += 1;
        }
        chunks
    }

    #[test]
    fn test_init_until_playlist_and_sink() {
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.load();
        assert_eq!(loader.state(), LoaderState::Init);
        assert!(!loader.paused());
        loader.set_playlist(playlist(0, &[10., 10.], true));
        assert_eq!(loader.state(), LoaderState::Init);
        loader.set_mime_type("video/mp2t");
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert_eq!(loader.host().created_sinks, vec!["video/mp2t".to_owned()]);
        assert_eq!(loader.host().requests.len(), 1);
    }

    #[test]
    fn test_paused_loader_does_not_start() {
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.set_playlist(playlist(0, &[10., 10.], true));
        loader.set_mime_type("video/mp2t");
        assert!(loader.paused());
        assert_eq!(loader.state(), LoaderState::Init);
        assert!(loader.host().requests.is_empty());
    }

    #[test]
    fn test_sink_creation_failure() {
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.load();
        loader.set_mime_type("");
        assert!(loader.paused());
        assert_eq!(loader.error().map(|e| e.code()), Some(4));
        assert_eq!(loader.host().errors.len(), 1);
    }

    #[test]
    fn test_load_and_append_segments() {
        let mut loader = started_loader(playlist(0, &[10., 10., 10.], true), passthrough());
        assert_eq!(loader.state(), LoaderState::Waiting);
        let (id, request) = last_request(&loader);
        assert_eq!(request.url, "0.ts");
        assert_eq!(request.timeout_ms, Some(15000.));
        assert_eq!(request.range, None);

        loader.on_request_finished(id, vec![1, 2, 3], 100.);
        assert_eq!(loader.state(), LoaderState::Appending);
        assert_eq!(sink(&mut loader).appended, vec![vec![1, 2, 3]]);
        assert_eq!(loader.bytes_received(), 3);
        assert_eq!(loader.bandwidth(), 240.);
        assert_eq!(loader.round_trip(), 100.);

        complete_append(&mut loader, Some((0., 10.)));
        assert_eq!(loader.state(), LoaderState::Ready);
        let segment = &loader.playlist().unwrap().segments[0];
        assert_eq!(segment.end, Some(10.));
        assert_eq!(segment.duration, Some(10.));
        // enough is buffered before playback starts
        assert_eq!(loader.host().requests.len(), 1);

        loader.host_mut().has_played = true;
        let (timer_id, delay) = loader.host().active_timers(TimerReason::BufferCheck)[0];
        assert_eq!(delay, 500.);
        loader.on_timer_ended(timer_id, TimerReason::BufferCheck);
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert_eq!(last_request(&loader).1.url, "1.ts");
        assert!(!loader.paused());
    }

    /// Loader with a sink whose buffer is pre-filled with `ranges`, then
    /// asked to load.
    fn loader_with_buffered(ranges: &[(f64, f64)]) -> SegmentLoader<MockHost> {
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.set_playlist(playlist(0, &[10., 10., 10.], true));
        loader.set_mime_type("video/mp2t");
        for (start, end) in ranges {
            sink(&mut loader).buffered.add(*start, *end);
        }
        loader.load();
        loader
    }

    #[test]
    fn test_mostly_buffered_segment_is_skipped() {
        let loader = loader_with_buffered(&[(0.5, 10.)]);
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert_eq!(loader.host().requests.len(), 1);
        assert_eq!(last_request(&loader).1.url, "1.ts");
    }

    #[test]
    fn test_no_request_when_next_segment_is_buffered_too() {
        let loader = loader_with_buffered(&[(0.5, 10.), (10.5, 20.)]);
        assert_eq!(loader.state(), LoaderState::Ready);
        assert!(loader.host().requests.is_empty());
    }

    #[test]
    fn test_partly_buffered_segment_is_loaded() {
        let loader = loader_with_buffered(&[(2., 10.)]);
        assert_eq!(last_request(&loader).1.url, "0.ts");
    }

    #[test]
    fn test_goal_buffer_reached() {
        let config = passthrough().with_goal_buffer_length(15.);
        let mut loader = started_loader(playlist(0, &[10., 10., 10.], true), config);
        loader.host_mut().has_played = true;
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![0], 10.);
        complete_append(&mut loader, Some((0., 10.)));
        let (id, request) = last_request(&loader);
        assert_eq!(request.url, "1.ts");
        loader.on_request_finished(id, vec![0], 10.);
        complete_append(&mut loader, Some((10., 20.)));
        assert_eq!(loader.state(), LoaderState::Ready);
        assert_eq!(loader.host().requests.len(), 2);
    }

    #[test]
    fn test_byte_range_request() {
        let mut p = playlist(0, &[10.], true);
        p.segments[0].byterange = Some(playlist::ByteRange {
            offset: 10,
            length: 20,
        });
        let loader = started_loader(p, passthrough());
        let (_, request) = last_request(&loader);
        assert_eq!(request.range_header().as_deref(), Some("bytes=10-29"));
    }

    #[test]
    fn test_single_flight_appends_with_transmuxing() {
        let mut loader = started_loader(playlist(0, &[10., 10.], true), SegmentLoaderConfig::default());
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, sample_stream(), 50.);
        assert_eq!(loader.state(), LoaderState::Appending);

        let mut completions = 0;
        while sink(&mut loader).updating {
            assert_eq!(sink(&mut loader).appended.len(), completions + 1);
            complete_append(&mut loader, Some((0., 1.)));
            completions += 1;
        }
        let sink = sink(&mut loader);
        assert_eq!(sink.overlapping_operations, 0);
        // initialization segment then one fragment per track
        assert_eq!(sink.appended.len(), 3);
        assert_eq!(&sink.appended[0][4..8], b"ftyp");
        assert_eq!(completions, 3);
        assert_eq!(loader.state(), LoaderState::Ready);
        let segment = &loader.playlist().unwrap().segments[0];
        assert_eq!(segment.min_video_pts, Some(1033.));
        assert_eq!(segment.min_audio_pts, Some(1000.));
    }

    #[test]
    fn test_flv_output_starts_with_header() {
        let config = SegmentLoaderConfig::default().with_output(SegmentOutput::Flv);
        let mut loader = started_loader(playlist(0, &[10., 10.], true), config);
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, sample_stream(), 50.);
        complete_append(&mut loader, None);
        complete_append(&mut loader, Some((0., 1.)));
        let sink = sink(&mut loader);
        assert_eq!(sink.appended.len(), 2);
        assert_eq!(&sink.appended[0][..3], b"FLV");
        assert_eq!(sink.overlapping_operations, 0);
    }

    #[test]
    fn test_encrypted_segment_with_explicit_iv() {
        let iv = iv_from_words([0, 1, 2, 3]);
        let config = passthrough().with_decrypt_chunk_words(4);
        let mut loader = started_loader(encrypted_playlist(Some(iv)), config);
        let requests = loader.host().requests.clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.url, "key.bin");
        assert_eq!(requests[1].1.url, "0.ts");

        let plaintext: Vec<u8> = (0..100u8).collect();
        let encrypted = encrypt(&plaintext, &KEY, iv);
        assert_eq!(decrypt(&encrypted, &KEY, iv).unwrap(), plaintext);

        loader.on_request_finished(requests[1].0, encrypted.clone(), 10.);
        assert_eq!(loader.state(), LoaderState::Waiting);
        loader.on_request_finished(requests[0].0, KEY.to_vec(), 10.);
        assert_eq!(loader.state(), LoaderState::Decrypting);

        let chunks = run_decryption(&mut loader);
        assert_eq!(chunks, encrypted.len() / 16);
        assert_eq!(loader.state(), LoaderState::Appending);
        assert_eq!(sink(&mut loader).appended, vec![plaintext]);
    }

    #[test]
    fn test_encrypted_segment_with_sequence_iv() {
        let mut p = encrypted_playlist(None);
        p.media_sequence = 5;
        let mut loader = started_loader(p, passthrough());
        let requests = loader.host().requests.clone();

        let plaintext = b"some segment data".to_vec();
        let encrypted = encrypt(&plaintext, &KEY, iv_from_sequence_number(5));
        loader.on_request_finished(requests[0].0, KEY.to_vec(), 10.);
        loader.on_request_finished(requests[1].0, encrypted, 10.);
        run_decryption(&mut loader);
        assert_eq!(sink(&mut loader).appended, vec![plaintext]);
    }

    #[test]
    fn test_key_is_cached() {
        let mut p = encrypted_playlist(None);
        p.segments[1].key = p.segments[0].key.clone();
        let mut loader = started_loader(p, passthrough());
        loader.host_mut().has_played = true;
        let requests = loader.host().requests.clone();
        let encrypted = encrypt(&[1; 10], &KEY, iv_from_sequence_number(0));
        loader.on_request_finished(requests[0].0, KEY.to_vec(), 10.);
        loader.on_request_finished(requests[1].0, encrypted, 10.);
        run_decryption(&mut loader);
        complete_append(&mut loader, Some((0., 10.)));

        assert_eq!(loader.state(), LoaderState::Waiting);
        let requests = &loader.host().requests;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].1.url, "1.ts");
    }

    #[test]
    fn test_invalid_key() {
        let mut loader = started_loader(encrypted_playlist(None), passthrough());
        let requests = loader.host().requests.clone();
        loader.on_request_finished(requests[0].0, vec![0; 15], 10.);
        assert_eq!(
            loader.error(),
            Some(&LoaderError::InvalidKey {
                url: "key.bin".into()
            })
        );
        assert_eq!(loader.error().map(|e| e.code()), Some(2));
        assert_eq!(loader.state(), LoaderState::Ready);
        assert!(loader.paused());
        assert_eq!(loader.host().aborted, vec![requests[1].0]);
    }

    #[test]
    fn test_failing_key_is_retried_then_skipped() {
        let mut loader = started_loader(encrypted_playlist(None), passthrough());
        let requests = loader.host().requests.clone();
        loader.on_request_failed(requests[0].0, false, Some(404));
        assert_eq!(loader.state(), LoaderState::Waiting);

        let (timer_id, delay) = loader.host().active_timers(TimerReason::RetryRequest)[0];
        assert_eq!(delay, 300.);
        loader.on_timer_ended(timer_id, TimerReason::RetryRequest);
        let (retry_id, retry) = last_request(&loader);
        assert_eq!(retry.url, "key.bin");

        loader.on_request_failed(retry_id, false, Some(404));
        assert_eq!(
            loader.host().errors,
            vec![(
                LoaderError::KeyRequest {
                    url: "key.bin".into(),
                    status: Some(404)
                },
                false
            )]
        );
        assert!(loader.host().aborted.contains(&requests[1].0));
        assert_eq!(loader.error(), None);
        // the segment using that key is skipped
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert_eq!(last_request(&loader).1.url, "1.ts");
    }

    #[test]
    fn test_timeout() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.on_request_failed(id, true, None);
        assert_eq!(loader.state(), LoaderState::Ready);
        assert_eq!(loader.bandwidth(), 1.);
        assert!(loader.round_trip().is_nan());
        assert_eq!(loader.error(), None);
        assert!(!loader.paused());
        assert_eq!(loader.host().requests.len(), 1);
    }

    #[test]
    fn test_segment_request_error() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.on_request_failed(id, false, Some(500));
        let expected = LoaderError::SegmentRequest {
            url: "0.ts".into(),
            status: Some(500),
        };
        assert_eq!(loader.error(), Some(&expected));
        assert_eq!(loader.host().errors, vec![(expected, true)]);
        assert_eq!(loader.state(), LoaderState::Ready);
        assert!(loader.paused());
    }

    #[test]
    fn test_unknown_responses_are_ignored() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        loader.on_request_finished(999, vec![1], 10.);
        loader.on_request_failed(998, false, None);
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert!(sink(&mut loader).appended.is_empty());
        assert_eq!(loader.error(), None);
    }

    #[test]
    fn test_abort() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.abort();
        assert_eq!(loader.host().aborted, vec![id]);
        // loads the same segment again
        assert_eq!(loader.state(), LoaderState::Waiting);
        assert_eq!(loader.host().requests.len(), 2);
        loader.on_request_finished(id, vec![1], 10.);
        assert!(sink(&mut loader).appended.is_empty());
    }

    #[test]
    fn test_asynchronous_append_error() {
        let mut loader = started_loader(playlist(0, &[10., 10.], true), passthrough());
        loader.on_append_failed(PushSegmentError::NoSourceBuffer);
        assert_eq!(loader.error(), None);

        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![1], 10.);
        loader.on_append_failed(PushSegmentError::QuotaExceeded("full".into()));
        assert_eq!(
            loader.error(),
            Some(&LoaderError::Append(PushSegmentError::QuotaExceeded(
                "full".into()
            )))
        );
        assert_eq!(loader.state(), LoaderState::Ready);
        assert!(loader.paused());
    }

    #[test]
    fn test_dispose() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.dispose();
        assert_eq!(loader.state(), LoaderState::Disposed);
        assert!(loader.paused());
        assert_eq!(loader.host().aborted, vec![id]);
        loader.load();
        loader.on_request_finished(id, vec![1], 10.);
        assert_eq!(loader.state(), LoaderState::Disposed);
        assert!(loader.paused());
    }

    #[test]
    fn test_dispose_while_decrypting() {
        let config = passthrough().with_decrypt_chunk_words(4);
        let mut loader = started_loader(encrypted_playlist(None), config);
        let requests = loader.host().requests.clone();
        let encrypted = encrypt(&[1; 100], &KEY, iv_from_sequence_number(0));
        loader.on_request_finished(requests[0].0, KEY.to_vec(), 10.);
        loader.on_request_finished(requests[1].0, encrypted, 10.);
        assert_eq!(loader.state(), LoaderState::Decrypting);
        let (timer_id, _, _) = *loader.host().timers.last().unwrap();
        loader.dispose();
        assert!(loader.host().cleared_timers.contains(&timer_id));
        loader.on_timer_ended(timer_id, TimerReason::DecryptChunk);
        assert!(sink(&mut loader).appended.is_empty());
    }

    #[test]
    fn test_switching_playlist_aborts_request() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        let mut other = playlist(0, &[10.], true);
        other.uri = "other.m3u8".into();
        other.segments[0].uri = "other-0.ts".into();
        loader.set_playlist(other);
        assert_eq!(loader.host().aborted, vec![id]);
        assert_eq!(last_request(&loader).1.url, "other-0.ts");
        assert_eq!(loader.state(), LoaderState::Waiting);
    }

    #[test]
    fn test_refreshing_playlist_keeps_request() {
        let durations = [10., 10., 10., 10., 10.];
        let mut loader = started_loader(playlist(0, &durations, false), passthrough());
        loader.set_playlist(playlist(1, &durations, false));
        assert!(loader.host().aborted.is_empty());
        assert_eq!(loader.expired(), 10.);
        assert_eq!(loader.playlist().unwrap().media_sequence, 1);
        assert_eq!(loader.state(), LoaderState::Waiting);
    }

    #[test]
    fn test_time_correction() {
        let mut loader = started_loader(playlist(0, &[10., 10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![1], 10.);
        // nothing new appears in the buffer
        complete_append(&mut loader, None);
        assert_eq!(loader.time_correction(), -10.);
        assert_eq!(loader.playlist().unwrap().segments[0].end, None);
    }

    #[test]
    fn test_end_of_stream() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![1], 10.);
        assert!(!sink(&mut loader).ended);
        complete_append(&mut loader, Some((0., 10.)));
        assert!(sink(&mut loader).ended);
    }

    #[test]
    fn test_no_end_of_stream_for_live() {
        let mut loader = started_loader(playlist(0, &[10.], false), passthrough());
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![1], 10.);
        complete_append(&mut loader, Some((0., 10.)));
        assert!(!sink(&mut loader).ended);
    }

    #[test]
    fn test_timestamp_offset_and_seek_fix_up() {
        let durations = [10., 10., 10., 10., 10., 10.];
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.set_expired(20.);
        loader.host_mut().current_time = 5.;
        loader.host_mut().seeking = true;
        loader.set_playlist(playlist(0, &durations, false));
        loader.set_mime_type("video/mp2t");
        loader.load();

        let (id, request) = last_request(&loader);
        assert_eq!(request.url, "0.ts");
        loader.on_request_finished(id, vec![1], 10.);
        assert_eq!(sink(&mut loader).offset_changes, vec![20.]);
        complete_append(&mut loader, Some((20., 30.)));
        assert_eq!(loader.host().seeks, vec![20. + TIME_FUDGE_FACTOR]);
    }

    #[test]
    fn test_back_buffer_removal() {
        let durations = vec![10.; 20];
        let mut loader = SegmentLoader::new(MockHost::default(), passthrough());
        loader.host_mut().current_time = 100.;
        loader.set_playlist(playlist(0, &durations, true));
        loader.set_mime_type("video/mp2t");
        loader.load();
        assert_eq!(last_request(&loader).1.url, "9.ts");
        assert_eq!(sink(&mut loader).removed, vec![(0., 40.)]);

        // the append waits for the removal to finish
        let (id, _) = last_request(&loader);
        loader.on_request_finished(id, vec![1], 10.);
        assert!(sink(&mut loader).appended.is_empty());
        complete_append(&mut loader, None);
        assert_eq!(sink(&mut loader).appended.len(), 1);
        assert_eq!(sink(&mut loader).overlapping_operations, 0);
    }

    #[test]
    fn test_clear_buffer() {
        let mut loader = started_loader(playlist(0, &[10.], true), passthrough());
        loader.clear_buffer();
        assert!(sink(&mut loader).removed.is_empty());
        sink(&mut loader).buffered.add(0., 10.);
        loader.clear_buffer();
        assert_eq!(sink(&mut loader).removed, vec![(0., f64::INFINITY)]);
    }

    #[test]
    fn test_update_segment_metadata() {
        let mut p = playlist(0, &[10., 10., 10.], true);
        assert!(!update_segment_metadata(&mut p, 1, None));
        assert!(!update_segment_metadata(&mut p, 1, Some(0.)));
        assert!(update_segment_metadata(&mut p, 0, Some(9.5)));
        assert_eq!(p.segments[0].duration, Some(9.5));
        assert!(update_segment_metadata(&mut p, 1, Some(19.)));
        assert_eq!(p.segments[1].duration, Some(9.5));
        assert!(update_segment_metadata(&mut p, 2, Some(30.)));
        assert_eq!(p.segments[2].end, Some(30.));
    }
}
