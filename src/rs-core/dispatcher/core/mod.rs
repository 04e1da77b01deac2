use crate::{
    bindings::{
        jsAbortRequest, jsAnnounceMetadataCue, jsClearTimer, jsFetch, jsSeek, jsSendError,
        jsTimer, JsMemoryBlob, PlaybackObservation, RequestId, SourceBufferId, TimerId,
        TimerReason,
    },
    media_element::{JsSourceBuffer, MediaSourceReadyState, PushSegmentError, SinkCreationError},
    segment_loader::{
        FetchRequest, Fetcher, LoaderError, LoaderHost, PlaybackObserver, Scheduler,
        SegmentLoaderConfig,
    },
    Logger,
};

use super::Dispatcher;

/// Environment of the `SegmentLoader` when running in a browser: every
/// operation is forwarded to JavaScript.
#[derive(Debug, Default)]
pub(crate) struct JsHost {
    /// Last playback information communicated by JavaScript.
    observation: PlaybackObservation,
}

impl Fetcher for JsHost {
    fn fetch(&mut self, request: FetchRequest) -> RequestId {
        jsFetch(&request.url, request.range_header(), request.timeout_ms)
    }

    fn abort(&mut self, id: RequestId) {
        if !jsAbortRequest(id) {
            Logger::warn(&format!("Core: Could not abort request {id}: not found"));
        }
    }
}

impl Scheduler for JsHost {
    fn start_timer(&mut self, delay_ms: f64, reason: TimerReason) -> TimerId {
        jsTimer(delay_ms, reason)
    }

    fn clear_timer(&mut self, id: TimerId) {
        jsClearTimer(id);
    }
}

impl PlaybackObserver for JsHost {
    fn current_time(&self) -> f64 {
        self.observation.current_time
    }

    fn seeking(&self) -> bool {
        self.observation.seeking
    }

    fn has_played(&self) -> bool {
        self.observation.has_played
    }

    fn set_current_time(&mut self, time: f64) {
        self.observation.current_time = time;
        jsSeek(time);
    }
}

impl LoaderHost for JsHost {
    type Sink = JsSourceBuffer;

    fn create_sink(&mut self, mime_type: &str) -> Result<JsSourceBuffer, SinkCreationError> {
        JsSourceBuffer::new(mime_type)
    }

    fn report_error(&mut self, error: &LoaderError, fatal: bool) {
        jsSendError(fatal, error.code(), &error.to_string());
    }
}

impl Dispatcher {
    /// Apply `update` to the current `SegmentLoaderConfig`.
    pub(super) fn update_config(
        &mut self,
        update: impl FnOnce(SegmentLoaderConfig) -> SegmentLoaderConfig,
    ) {
        let config = update(self.loader.config().clone());
        self.loader.set_config(config);
    }

    /// Announce to JavaScript the timed metadata found since the last call.
    pub(super) fn announce_metadata(&mut self) {
        for cue in self.loader.take_metadata_cues() {
            Logger::debug(&format!("Core: Announcing metadata at {}", cue.cue_time));
            jsAnnounceMetadataCue(cue.cue_time, cue.dispatch_type, &cue.data);
        }
    }

    pub(crate) fn on_request_succeeded(
        &mut self,
        request_id: RequestId,
        resource: JsMemoryBlob,
        duration_ms: f64,
    ) {
        match resource.obtain() {
            Some(data) => self.loader.on_request_finished(request_id, data, duration_ms),
            None => {
                Logger::error("Core: Loaded resource not found");
                self.loader.on_request_failed(request_id, false, None);
            }
        }
        self.announce_metadata();
    }

    pub(crate) fn on_request_failed_inner(
        &mut self,
        request_id: RequestId,
        timed_out: bool,
        status: Option<u32>,
    ) {
        self.loader.on_request_failed(request_id, timed_out, status);
    }

    pub(crate) fn internal_on_timer_ended(&mut self, id: TimerId, reason: TimerReason) {
        self.loader.on_timer_ended(id, reason);
        // the last decryption chunk leads to the segment being transmuxed
        if reason == TimerReason::DecryptChunk {
            self.announce_metadata();
        }
    }

    pub(crate) fn internal_on_media_source_state_change(&mut self, state: MediaSourceReadyState) {
        Logger::info(&format!("Core: MediaSource state changed to {state:?}"));
        if let Some(sink) = self.loader.sink_mut() {
            sink.set_media_source_state(state);
        }
    }

    pub(crate) fn internal_on_source_buffer_update(
        &mut self,
        source_buffer_id: SourceBufferId,
        buffered: &[f64],
    ) {
        match self.loader.sink_mut() {
            Some(sink) if sink.id() == source_buffer_id => {
                sink.on_operation_end(buffered);
            }
            _ => return,
        }
        self.loader.on_append_done();
        self.announce_metadata();
    }

    pub(crate) fn internal_on_source_buffer_error(
        &mut self,
        source_buffer_id: SourceBufferId,
        message: Option<String>,
    ) {
        match self.loader.sink_mut() {
            Some(sink) if sink.id() == source_buffer_id => sink.clear_queue(),
            _ => return,
        }
        let message = message.unwrap_or_else(|| "Unknown SourceBuffer error".to_owned());
        self.loader
            .on_append_failed(PushSegmentError::UnknownError(message));
    }

    pub(crate) fn on_observation(&mut self, observation: PlaybackObservation) {
        self.loader.host_mut().observation = observation;
    }
}
