use crate::{
    decrypter::DEFAULT_CHUNK_WORDS,
    requester::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX},
    wasm_bindgen,
};

/// Format segments are pushed to the media buffer in.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentOutput {
    /// Segments are pushed as loaded (after decryption).
    Passthrough = 0,
    /// MPEG-2 TS segments are transmuxed to fragmented MP4.
    Fmp4 = 1,
    /// MPEG-2 TS segments are transmuxed to FLV tags.
    Flv = 2,
}

impl Default for SegmentOutput {
    fn default() -> Self {
        SegmentOutput::Fmp4
    }
}

/// Inner configuration on which the `SegmentLoader` relies.
/// Can be updated at any time through `SegmentLoader::set_config`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SegmentLoaderConfig {
    /// Interval, in milliseconds, at which the buffer is checked.
    pub(crate) check_buffer_delay_ms: f64,

    /// Amount of buffer, ahead of the current position, we want to build in
    /// seconds once playback started.
    pub(crate) goal_buffer_length: f64,

    /// Amount of buffer, ahead of the current position, we want to build in
    /// seconds before playback starts.
    pub(crate) minimum_buffer_before_play: f64,

    /// Percentage of a segment's time range which has to be buffered for it
    /// to be considered already loaded.
    pub(crate) buffered_percent_threshold: f64,

    /// Media data older than that many seconds behind the current position is
    /// removed before each new segment request.
    pub(crate) back_buffer_length: f64,

    /// Requests time out after the segment's duration multiplied by that factor.
    pub(crate) request_timeout_factor: f64,

    /// Number of times a key request can fail before the key is considered
    /// unusable.
    pub(crate) key_retry_count: u32,

    /// Initial delay, in milliseconds, before retrying a failed key request.
    pub(crate) key_backoff_base: f64,

    /// Maximum delay, in milliseconds, before retrying a failed key request.
    pub(crate) key_backoff_max: f64,

    pub(crate) output: SegmentOutput,

    /// Only for `SegmentOutput::Fmp4`. If `true`, the original media
    /// timestamps are kept instead of starting the timeline at `0`.
    pub(crate) keep_original_timestamps: bool,

    /// Number of 32-bit words decrypted in one go.
    pub(crate) decrypt_chunk_words: usize,

    /// Delay, in milliseconds, between two decryption chunks.
    pub(crate) decrypt_chunk_delay_ms: f64,
}

impl Default for SegmentLoaderConfig {
    fn default() -> Self {
        Self {
            check_buffer_delay_ms: 500.,
            goal_buffer_length: 30.,
            minimum_buffer_before_play: 1.,
            buffered_percent_threshold: 90.,
            back_buffer_length: 60.,
            request_timeout_factor: 1.5,
            key_retry_count: 2,
            key_backoff_base: DEFAULT_BACKOFF_BASE,
            key_backoff_max: DEFAULT_BACKOFF_MAX,
            output: SegmentOutput::default(),
            keep_original_timestamps: false,
            decrypt_chunk_words: DEFAULT_CHUNK_WORDS,
            decrypt_chunk_delay_ms: 0.,
        }
    }
}

impl SegmentLoaderConfig {
    pub(crate) fn with_check_buffer_delay_ms(mut self, delay: f64) -> Self {
        self.check_buffer_delay_ms = delay;
        self
    }

    pub(crate) fn with_goal_buffer_length(mut self, length: f64) -> Self {
        self.goal_buffer_length = length;
        self
    }

    pub(crate) fn with_minimum_buffer_before_play(mut self, length: f64) -> Self {
        self.minimum_buffer_before_play = length;
        self
    }

    pub(crate) fn with_buffered_percent_threshold(mut self, threshold: f64) -> Self {
        self.buffered_percent_threshold = threshold;
        self
    }

    pub(crate) fn with_back_buffer_length(mut self, length: f64) -> Self {
        self.back_buffer_length = length;
        self
    }

    pub(crate) fn with_request_timeout_factor(mut self, factor: f64) -> Self {
        self.request_timeout_factor = factor;
        self
    }

    pub(crate) fn with_key_retry_count(mut self, count: u32) -> Self {
        self.key_retry_count = count;
        self
    }

    pub(crate) fn with_key_backoff(mut self, base: f64, max: f64) -> Self {
        self.key_backoff_base = base;
        self.key_backoff_max = max;
        self
    }

    pub(crate) fn with_output(mut self, output: SegmentOutput) -> Self {
        self.output = output;
        self
    }

    pub(crate) fn with_keep_original_timestamps(mut self, keep: bool) -> Self {
        self.keep_original_timestamps = keep;
        self
    }

    pub(crate) fn with_decrypt_chunk_words(mut self, words: usize) -> Self {
        self.decrypt_chunk_words = words;
        self
    }

    pub(crate) fn with_decrypt_chunk_delay_ms(mut self, delay: f64) -> Self {
        self.decrypt_chunk_delay_ms = delay;
        self
    }
}
