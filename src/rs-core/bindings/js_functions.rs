use crate::wasm_bindgen;

/// # js_functions
///
/// This file lists all JavaScript functions that are callable from Rust as well as
/// struct and enumeration used by those functions.

#[wasm_bindgen]
extern "C" {
    // Log the given text in the JavaScript console, with the log level given.
    pub fn jsLog(log_level: LogLevel, log: &str);

    // Starts a timer for the number of milliseconds indicated by the `duration` argument.
    //
    // Once this timer has elapsed, and unless `jsClearTimer` has been called since with
    // the `TimerId` returned by this function, the `on_timer_ended` method of the
    // `Dispatcher` will be called with both the corresponding `TimerId` and `reason`.
    pub fn jsTimer(duration: f64, reason: TimerReason) -> TimerId;

    // Clear a timer started with `jsTimer`.
    pub fn jsClearTimer(id: TimerId);

    // Returns the data, as a vector of bytes of a resource behind a `ResourceId`.
    //
    // Returns `None` if that `ResourceId` is not linked to any resource right now.
    pub fn jsGetResourceData(id: ResourceId) -> Option<Vec<u8>>;

    // Free a resource kept on the JavaScript-side, such as the response of a
    // request.
    //
    // Returns `false` if that resource was not found.
    pub fn jsFreeResource(resource_id: ResourceId) -> bool;

    // Fetch the given `url` from the network and await a response.
    //
    // `range` is the value of the `Range` HTTP header to set on the request, if any.
    //
    // If and when it finishes with success, the result will be emitted as a
    // `resource_id` through the `on_request_finished` method of the `Dispatcher`.
    // If and when it fails, the error will be emitted through its
    // `on_request_failed` method.
    //
    // In both cases, those methods will always be called asynchronously after the `jsFetch`
    // call. If the request has been aborted while pending through the `jsAbortRequest`
    // function, none of those methods will be called.
    pub fn jsFetch(url: &str, range: Option<String>, timeout: Option<f64>) -> RequestId;

    // Abort a request started with `jsFetch` based on its `request_id`.
    //
    // Returns `true` if a pending request with the given RequestId was found and aborted,
    // `false` if no pending request was found with that RequestId.
    pub fn jsAbortRequest(request_id: RequestId) -> bool;

    // Add a SourceBuffer with the given mime-type to the MediaSource attached
    // to the media element.
    //
    // This function performs this operation synchronously and may fail, see
    // `AddSourceBufferResult` for more details on the return value.
    pub fn jsAddSourceBuffer(typ: &str) -> AddSourceBufferResult;

    // Append media data to the given SourceBuffer.
    //
    // This process is asynchronous. Once it is finished, the
    // `on_source_buffer_update` method of the `Dispatcher` is called with the
    // same `source_buffer_id`.
    pub fn jsAppendBuffer(source_buffer_id: SourceBufferId, data: &[u8]) -> AppendBufferResult;

    // Remove media data, from `start` to `end` in seconds, from the given SourceBuffer.
    //
    // Like `jsAppendBuffer`, completion is announced through the
    // `on_source_buffer_update` method of the `Dispatcher`.
    pub fn jsRemoveBuffer(source_buffer_id: SourceBufferId, start: f64, end: f64)
        -> RemoveBufferResult;

    // Update the `timestampOffset` attribute of the given SourceBuffer.
    pub fn jsSetTimestampOffset(source_buffer_id: SourceBufferId, offset: f64);

    // Call the `endOfStream` method of the MediaSource.
    pub fn jsEndOfStream() -> EndOfStreamResult;

    // Seek the media element to the given position, in seconds.
    pub fn jsSeek(position: f64);

    // Announce a timed metadata cue parsed from the loaded segments.
    pub fn jsAnnounceMetadataCue(cue_time: f64, dispatch_type: Option<String>, data: &[u8]);

    // Announce an error. `code` follows the `MediaError` codes of the media
    // element (`2` for network errors, `4` for decoding issues).
    pub fn jsSendError(fatal: bool, code: u16, message: &str);
}

pub(crate) trait JsResult<T, E> {
    fn result(self) -> Result<T, (E, Option<String>)>;
}

/// Error that might arise when adding a SourceBuffer through a MediaSource instance.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddSourceBufferErrorCode {
    /// No MediaSource was attached to the media element.
    NoMediaSourceAttached,

    /// The `MediaSource` instance is in a "closed" state.
    MediaSourceIsClosed,

    /// A `QuotaExceededError` was received while trying to add the `SourceBuffer`
    QuotaExceededError,

    /// The given mime-type and codec combination is not supported
    TypeNotSupportedError,

    /// The given mime-type and codec combination is empty
    EmptyMimeType,

    /// An unknown error happened.
    UnknownError,
}

/// Result of calling the `jsAddSourceBuffer` JavaScript function.
///
/// Creation of an `AddSourceBufferResult` should only be performed by the JavaScript side
/// through the exposed static constructors.
#[wasm_bindgen]
pub struct AddSourceBufferResult {
    source_buffer_id: SourceBufferId,
    error: Option<(AddSourceBufferErrorCode, Option<String>)>,
}

#[wasm_bindgen]
impl AddSourceBufferResult {
    /// Creates an `AddSourceBufferResult` indicating success, with the corresponding
    /// `SourceBufferId`.
    pub fn success(val: SourceBufferId) -> Self {
        Self {
            source_buffer_id: val,
            error: None,
        }
    }

    /// Creates an `AddSourceBufferResult` indicating failure, with the corresponding
    /// error.
    pub fn error(err: AddSourceBufferErrorCode, desc: Option<String>) -> Self {
        Self {
            source_buffer_id: 0,
            error: Some((err, desc)),
        }
    }
}

impl JsResult<SourceBufferId, AddSourceBufferErrorCode> for AddSourceBufferResult {
    fn result(self) -> Result<SourceBufferId, (AddSourceBufferErrorCode, Option<String>)> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.source_buffer_id)
        }
    }
}

/// Errors that can arise when calling the `jsAppendBuffer` JavaScript function.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendBufferErrorCode {
    /// The SourceBuffer instance linked to the given `SourceBufferId` was not found.
    NoSourceBuffer,
    /// The browser's buffer is full.
    QuotaExceededError,
    /// The operation failed because of an unknown error.
    UnknownError,
}

/// Result of calling the `jsAppendBuffer` JavaScript function.
#[wasm_bindgen]
pub struct AppendBufferResult {
    error: Option<(AppendBufferErrorCode, Option<String>)>,
}

#[wasm_bindgen]
impl AppendBufferResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn error(err: AppendBufferErrorCode, desc: Option<String>) -> Self {
        Self {
            error: Some((err, desc)),
        }
    }
}

impl JsResult<(), AppendBufferErrorCode> for AppendBufferResult {
    fn result(self) -> Result<(), (AppendBufferErrorCode, Option<String>)> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// Errors that can arise when calling the `jsRemoveBuffer` JavaScript function.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveBufferErrorCode {
    /// The SourceBuffer instance linked to the given `SourceBufferId` was not found.
    SourceBufferNotFound,

    /// The operation failed because of an unknown error.
    UnknownError,
}

/// Result of calling the `jsRemoveBuffer` JavaScript function.
#[wasm_bindgen]
pub struct RemoveBufferResult {
    error: Option<(RemoveBufferErrorCode, Option<String>)>,
}

#[wasm_bindgen]
impl RemoveBufferResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn error(err: RemoveBufferErrorCode, desc: Option<String>) -> Self {
        Self {
            error: Some((err, desc)),
        }
    }
}

impl JsResult<(), RemoveBufferErrorCode> for RemoveBufferResult {
    fn result(self) -> Result<(), (RemoveBufferErrorCode, Option<String>)> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// Errors that can arise when calling the `jsEndOfStream` JavaScript function.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndOfStreamErrorCode {
    /// No MediaSource was attached to the media element.
    NoMediaSourceAttached,

    /// The operation failed because of an unknown error.
    UnknownError,
}

/// Result of calling the `jsEndOfStream` JavaScript function.
#[wasm_bindgen]
pub struct EndOfStreamResult {
    error: Option<(EndOfStreamErrorCode, Option<String>)>,
}

#[wasm_bindgen]
impl EndOfStreamResult {
    pub fn success() -> Self {
        Self { error: None }
    }

    pub fn error(err: EndOfStreamErrorCode, desc: Option<String>) -> Self {
        Self {
            error: Some((err, desc)),
        }
    }
}

impl JsResult<(), EndOfStreamErrorCode> for EndOfStreamResult {
    fn result(self) -> Result<(), (EndOfStreamErrorCode, Option<String>)> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(())
        }
    }
}

/// Current playback information associated to the `HTMLMediaElement` displayed
/// on the page.
/// `PlaybackObservation` should be regularly sent on various events.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaybackObservation {
    /// The value of the `currentTime` attribute of the HTMLMediaElement.
    pub(crate) current_time: f64,
    /// The value of the `seeking` attribute of the HTMLMediaElement.
    pub(crate) seeking: bool,
    /// `true` if the `played` attribute of the HTMLMediaElement is not empty.
    pub(crate) has_played: bool,
}

#[wasm_bindgen]
impl PlaybackObservation {
    #[wasm_bindgen(constructor)]
    pub fn new(current_time: f64, seeking: bool, has_played: bool) -> Self {
        Self {
            current_time,
            seeking,
            has_played,
        }
    }
}

/// "Reason" associated to a timer started by the segment loader.
///
/// This can then help to identify what the timer was for once resolved.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerReason {
    /// Periodic check of the buffer, to know if a new segment should be loaded.
    BufferCheck = 0,

    /// The next chunk of an encrypted segment should be decrypted.
    DecryptChunk = 1,

    /// The timer is linked to a failed request that has to be retried.
    RetryRequest = 2,
}

/// Levels with which a log can be emitted.
#[wasm_bindgen]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd)]
pub enum LogLevel {
    /// Log level reserved for very important errors and highly unexpected events.
    Error = 0,

    /// Log level reserved for less important errors and unexpected events.
    Warn = 1,

    /// Log level reserved for important events
    Info = 2,

    /// Log level used when debugging. Small-ish yet impactful events should be logged with it.
    Debug = 3,
}

/// Identify a resource allocated on the JavaScript side and kept alive until
/// `jsFreeResource` is called with it.
///
/// Special care of those id should be taken to avoid memory leaks: you should always call
/// `jsFreeResource` as soon as the resource is not needed anymore.
pub type ResourceId = u32;

/// Identify a pending request.
pub type RequestId = u32;

/// Identify a pending timer.
pub type TimerId = f64;

/// Identify a SourceBuffer.
pub type SourceBufferId = u32;
