use crate::{
    dispatcher::Dispatcher, media_element::MediaSourceReadyState, wasm_bindgen,
};

use super::{
    js_functions::{self, RequestId, SourceBufferId},
    jsGetResourceData, PlaybackObservation, ResourceId, TimerId, TimerReason,
};

/// Methods triggered on JavaScript events by the JavaScript code
///
/// Those functions are voluntarly written a certain way to put in evidence that
/// those should just be bindings converting to the right types without directly
/// interacting with the `Dispatcher`'s state (e.g. methods are called with
/// an explicit `Dispatcher` reference).
#[wasm_bindgen]
impl Dispatcher {
    /// Called by the JavaScript code each time an HTTP(S) request started with
    /// `jsFetch` finished with success.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The identifier given by the JavaScript when the request
    ///   was started. This allows the `Dispatcher` to identify which request
    ///   is actually finished
    ///
    /// * `resource_id` - Id refering to the resource on the JavaScript-side.
    ///
    /// * `duration_ms` - Time the request took, in milliseconds.
    pub fn on_request_finished(
        &mut self,
        request_id: RequestId,
        resource_id: ResourceId,
        duration_ms: f64,
    ) {
        let resource_handle = JsMemoryBlob::from_resource_id(resource_id);
        Dispatcher::on_request_succeeded(self, request_id, resource_handle, duration_ms);
    }

    /// Called by the JavaScript code each time an HTTP(S) request started with
    /// `jsFetch` finished with an error.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The identifier given by the JavaScript when the request
    ///   was started. This allows the `Dispatcher` to identify which request
    ///   is actually finished
    ///
    /// * `has_timeouted` - `true` if the request failed because it timed out.
    ///
    /// * `status` - The HTTP status of the response, if one was received.
    pub fn on_request_failed(
        &mut self,
        request_id: RequestId,
        has_timeouted: bool,
        status: Option<u32>,
    ) {
        Dispatcher::on_request_failed_inner(self, request_id, has_timeouted, status);
    }

    /// Called by the JavaScript code when the MediaSource's readyState changed.
    ///
    /// # Arguments
    ///
    /// * `state` - The new `readyState` of the MediaSource.
    pub fn on_media_source_state_change(&mut self, state: MediaSourceReadyState) {
        Dispatcher::internal_on_media_source_state_change(self, state);
    }

    /// Called by the JavaScript code when a SourceBuffer emits an `updateend`
    /// event.
    ///
    /// # Arguments
    ///
    /// * `source_buffer_id` - The identifier given by the JavaScript when the
    ///   SourceBuffer was created. This allows the `Dispatcher` to identify
    ///   which SourceBuffer actually emitted this event.
    ///
    /// * `buffered` - The SourceBuffer's `buffered` ranges once the operation
    ///   ended, as a flat list of start and end times.
    pub fn on_source_buffer_update(&mut self, source_buffer_id: SourceBufferId, buffered: &[f64]) {
        Dispatcher::internal_on_source_buffer_update(self, source_buffer_id, buffered);
    }

    /// Called by the JavaScript code when a SourceBuffer emits an `error`
    /// event.
    ///
    /// # Arguments
    ///
    /// * `source_buffer_id` - The identifier given by the JavaScript when the
    ///   SourceBuffer was created. This allows the `Dispatcher` to identify
    ///   which SourceBuffer actually emitted this event.
    ///
    /// * `message` - Description of the error, if one is available.
    pub fn on_source_buffer_error(&mut self, source_buffer_id: SourceBufferId, message: Option<String>) {
        Dispatcher::internal_on_source_buffer_error(self, source_buffer_id, message);
    }

    /// Called by the JavaScript code on each important media event (seeks,
    /// `timeupdate`, first `play`...) to communicate the media element's
    /// state.
    pub fn on_playback_observation(&mut self, observation: PlaybackObservation) {
        Dispatcher::on_observation(self, observation);
    }

    /// Called by the JavaScript code each time a timer started with the `jsTimer`
    /// function finished.
    ///
    /// # Arguments
    ///
    /// * `id` - The `TimerId` given by the JavaScript when the timer was
    ///   started. This allows the `Dispatcher` to identify which timer
    ///   actually finished.
    ///
    /// * `reason` - The `TimerReason` given by the Rust code when that timer
    ///   was started. Using this supplementary attribute allows to better
    ///   discriminate between timers used for different purposes and thus
    ///   to simplify the logic handling a resolved timer.
    pub fn on_timer_ended(&mut self, id: TimerId, reason: TimerReason) {
        Dispatcher::internal_on_timer_ended(self, id, reason);
    }
}

/// Handle to a resource kept on the JavaScript-side, freed once dropped.
pub struct JsMemoryBlob {
    id: ResourceId,
}

impl JsMemoryBlob {
    pub fn from_resource_id(id: ResourceId) -> Self {
        Self { id }
    }

    pub fn get_id(&self) -> ResourceId {
        self.id
    }

    /// Copy the resource's data into Rust memory.
    ///
    /// Returns `None` if JavaScript doesn't know that resource.
    pub fn obtain(self) -> Option<Vec<u8>> {
        jsGetResourceData(self.id)
    }
}

impl Drop for JsMemoryBlob {
    fn drop(&mut self) {
        js_functions::jsFreeResource(self.id);
    }
}
