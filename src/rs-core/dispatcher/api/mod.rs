use crate::{
    bindings::LogLevel,
    playlist::{ByteRange, KeyMethod, MediaPlaylist, SegmentInfo, SegmentKey},
    segment_loader::{SegmentLoader, SegmentLoaderConfig, SegmentOutput},
    utils::logger::LoggerLevel,
    wasm_bindgen, Logger,
};

use super::{Dispatcher, JsHost};

/// Methods exposed to the JavaScript-side.
///
/// Note that these are not the only methods callable by JavaScript. There's
/// also "event_listeners" which as its name point at, should be called when particular
/// events happen. Such "event_listeners" are defined in the `bindings` module.
#[wasm_bindgen]
impl Dispatcher {
    /// Create a new `Dispatcher`, which will push segments to a SourceBuffer
    /// of the MediaSource attached on the JavaScript-side.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Dispatcher {
            loader: SegmentLoader::new(JsHost::default(), SegmentLoaderConfig::default()),
        }
    }

    /// Set the media playlist to load segments from.
    ///
    /// Giving a playlist with the same URI as the current one is treated as a
    /// refresh of a live playlist.
    pub fn set_playlist(&mut self, playlist: JsMediaPlaylist) {
        self.loader.set_playlist(playlist.inner);
    }

    /// Create the SourceBuffer segments will be pushed to.
    pub fn set_mime_type(&mut self, mime_type: &str) {
        self.loader.set_mime_type(mime_type);
    }

    /// Start, or resume, loading segments.
    pub fn load(&mut self) {
        self.loader.load();
    }

    /// Stop loading new segments. The pending one, if any, is still pushed.
    pub fn pause(&mut self) {
        self.loader.pause();
    }

    pub fn is_paused(&self) -> bool {
        self.loader.paused()
    }

    /// Abort the pending segment request, if any.
    pub fn abort(&mut self) {
        self.loader.abort();
    }

    /// Stop everything. The `Dispatcher` cannot be used anymore after this call.
    pub fn dispose(&mut self) {
        self.loader.dispose();
    }

    /// Remove all media data from the SourceBuffer.
    pub fn clear_buffer(&mut self) {
        self.loader.clear_buffer();
    }

    /// Code of the last fatal error, if one happened.
    pub fn error_code(&self) -> Option<u16> {
        self.loader.error().map(|e| e.code())
    }

    /// Throughput of the last segment request, in bits per second.
    pub fn bandwidth(&self) -> f64 {
        self.loader.bandwidth()
    }

    /// Duration of the last segment request, in milliseconds.
    pub fn round_trip(&self) -> f64 {
        self.loader.round_trip()
    }

    pub fn bytes_received(&self) -> f64 {
        self.loader.bytes_received() as f64
    }

    /// Smoothed bandwidth estimate, in bits per second.
    pub fn bandwidth_estimate(&self) -> Option<f64> {
        self.loader.bandwidth_estimate()
    }

    pub fn expired(&self) -> f64 {
        self.loader.expired()
    }

    /// Set the duration, in seconds, of the content which left the live
    /// playlist.
    pub fn set_expired(&mut self, expired: f64) {
        self.loader.set_expired(expired);
    }

    /// Seekable ranges as a flat list of start and end times.
    pub fn seekable(&self) -> Vec<f64> {
        self.loader
            .seekable()
            .iter()
            .flat_map(|r| [r.start(), r.end()])
            .collect()
    }

    /// `None` disables logs.
    pub fn set_log_level(&mut self, level: Option<LogLevel>) {
        Logger::set_logger_level(match level {
            None => LoggerLevel::None,
            Some(LogLevel::Error) => LoggerLevel::Error,
            Some(LogLevel::Warn) => LoggerLevel::Warn,
            Some(LogLevel::Info) => LoggerLevel::Info,
            Some(LogLevel::Debug) => LoggerLevel::Debug,
        });
    }

    pub fn set_check_buffer_delay(&mut self, delay_ms: f64) {
        self.update_config(|c| c.with_check_buffer_delay_ms(delay_ms));
    }

    pub fn set_buffer_goal(&mut self, buffer_goal: f64) {
        self.update_config(|c| c.with_goal_buffer_length(buffer_goal));
    }

    pub fn set_minimum_buffer_before_play(&mut self, length: f64) {
        self.update_config(|c| c.with_minimum_buffer_before_play(length));
    }

    pub fn set_buffered_percent_threshold(&mut self, threshold: f64) {
        self.update_config(|c| c.with_buffered_percent_threshold(threshold));
    }

    pub fn set_back_buffer_length(&mut self, length: f64) {
        self.update_config(|c| c.with_back_buffer_length(length));
    }

    pub fn set_request_timeout_factor(&mut self, factor: f64) {
        self.update_config(|c| c.with_request_timeout_factor(factor));
    }

    pub fn set_key_retry_count(&mut self, count: u32) {
        self.update_config(|c| c.with_key_retry_count(count));
    }

    pub fn set_key_backoff(&mut self, base: f64, max: f64) {
        self.update_config(|c| c.with_key_backoff(base, max));
    }

    pub fn set_output(&mut self, output: SegmentOutput) {
        self.update_config(|c| c.with_output(output));
    }

    pub fn set_keep_original_timestamps(&mut self, keep: bool) {
        self.update_config(|c| c.with_keep_original_timestamps(keep));
    }

    pub fn set_decrypt_chunk_words(&mut self, words: u32) {
        self.update_config(|c| c.with_decrypt_chunk_words(words as usize));
    }

    pub fn set_decrypt_chunk_delay(&mut self, delay_ms: f64) {
        self.update_config(|c| c.with_decrypt_chunk_delay_ms(delay_ms));
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// A media playlist, parsed on the JavaScript-side, communicated to the
/// `Dispatcher`.
#[wasm_bindgen]
pub struct JsMediaPlaylist {
    inner: MediaPlaylist,
}

#[wasm_bindgen]
impl JsMediaPlaylist {
    #[wasm_bindgen(constructor)]
    pub fn new(
        uri: String,
        media_sequence: u32,
        discontinuity_sequence: u32,
        target_duration: Option<f64>,
        end_list: bool,
        total_duration: Option<f64>,
    ) -> Self {
        Self {
            inner: MediaPlaylist {
                uri,
                media_sequence,
                discontinuity_sequence,
                target_duration,
                end_list,
                total_duration,
                ..MediaPlaylist::default()
            },
        }
    }

    /// Add the next segment of the playlist.
    ///
    /// A `key_uri` marks the segment as AES-128 encrypted. `key_iv`, when
    /// set, has to be 16 bytes long.
    #[allow(clippy::too_many_arguments)]
    pub fn add_segment(
        &mut self,
        uri: String,
        duration: Option<f64>,
        timeline: u32,
        discontinuity: bool,
        byterange_offset: Option<f64>,
        byterange_length: Option<f64>,
        key_uri: Option<String>,
        key_iv: Option<Vec<u8>>,
    ) {
        let byterange = match (byterange_offset, byterange_length) {
            (Some(offset), Some(length)) => Some(ByteRange {
                offset: offset as u64,
                length: length as u64,
            }),
            _ => None,
        };
        let iv = key_iv.and_then(|iv| match <[u8; 16]>::try_from(iv.as_slice()) {
            Ok(iv) => Some(iv),
            Err(_) => {
                Logger::warn(&format!(
                    "Core: Ignoring IV of {} bytes for segment {uri}",
                    iv.len()
                ));
                None
            }
        });
        let key = key_uri.map(|key_uri| SegmentKey {
            method: KeyMethod::Aes128,
            uri: key_uri,
            iv,
        });
        let segments = &mut self.inner.segments;
        if discontinuity && !segments.is_empty() {
            self.inner.discontinuity_starts.push(segments.len());
        }
        segments.push(SegmentInfo {
            uri,
            duration,
            discontinuity,
            timeline,
            key,
            byterange,
            ..SegmentInfo::default()
        });
    }

    pub fn segment_count(&self) -> usize {
        self.inner.segments.len()
    }
}
