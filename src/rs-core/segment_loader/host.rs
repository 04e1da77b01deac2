//! Everything the `SegmentLoader` needs from its environment.
//!
//! In the browser those are implemented by calling JavaScript functions (see
//! the `dispatcher` module). Tests implement them with in-memory mocks.

use crate::{
    bindings::{RequestId, TimerId, TimerReason},
    media_element::{MediaSink, SinkCreationError},
    playlist::ByteRange,
};

use super::LoaderError;

/// Description of a request to perform.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FetchRequest {
    pub(crate) url: String,
    /// Timeout after which the request should fail, in milliseconds.
    pub(crate) timeout_ms: Option<f64>,
    pub(crate) range: Option<ByteRange>,
}

impl FetchRequest {
    /// Value of the `Range` header to send, if any.
    pub(crate) fn range_header(&self) -> Option<String> {
        self.range.as_ref().map(|r| r.header_value())
    }
}

pub(crate) trait Fetcher {
    /// Start the request. Its outcome is later announced through either
    /// `SegmentLoader::on_request_finished` or
    /// `SegmentLoader::on_request_failed` with the returned id.
    fn fetch(&mut self, request: FetchRequest) -> RequestId;

    /// Abort a pending request. No callback will be called for it.
    fn abort(&mut self, id: RequestId);
}

pub(crate) trait Scheduler {
    /// Start a timer. `SegmentLoader::on_timer_ended` is called with the
    /// returned id and the same `reason` once it elapsed.
    fn start_timer(&mut self, delay_ms: f64, reason: TimerReason) -> TimerId;

    fn clear_timer(&mut self, id: TimerId);
}

pub(crate) trait PlaybackObserver {
    /// Current playback position, in seconds.
    fn current_time(&self) -> f64;

    fn seeking(&self) -> bool;

    /// `true` once playback has started at least once.
    fn has_played(&self) -> bool;

    fn set_current_time(&mut self, time: f64);
}

pub(crate) trait LoaderHost: Fetcher + Scheduler + PlaybackObserver {
    type Sink: MediaSink;

    /// Create the media buffer segments will be pushed to.
    fn create_sink(&mut self, mime_type: &str) -> Result<Self::Sink, SinkCreationError>;

    /// Announce an error to the application.
    fn report_error(&mut self, error: &LoaderError, fatal: bool);
}
