use std::collections::VecDeque;

use crate::bindings::{
    jsAddSourceBuffer, jsAppendBuffer, jsEndOfStream, jsRemoveBuffer, jsSetTimestampOffset,
    AddSourceBufferErrorCode, AppendBufferErrorCode, JsResult, RemoveBufferErrorCode,
    SourceBufferId,
};
use crate::utils::time_ranges::TimeRanges;
use crate::{wasm_bindgen, Logger};

use super::{MediaSink, PushSegmentError, RemoveDataError, SinkCreationError};

/// Identify the JavaScript `readyState` of a created `MediaSource` instance.
#[wasm_bindgen]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MediaSourceReadyState {
    /// Corresponds to the "closed" JavaScript MediaSource's `readyState`
    Closed = 0,
    /// Corresponds to the "ended" JavaScript MediaSource's `readyState`
    Ended = 1,
    /// Corresponds to the "open" JavaScript MediaSource's `readyState`
    Open = 2,
}

/// Abstraction over the Media Source Extension's `SourceBuffer` concept.
///
/// Operations are forwarded to JavaScript, which announces their end through
/// the `Dispatcher`'s `on_source_buffer_update` method. `on_operation_end`
/// should then be called.
pub(crate) struct JsSourceBuffer {
    /// The `SourceBufferId` given on SourceBuffer creation, used to identify
    /// this `SourceBuffer` when interacting with JavaScript.
    id: SourceBufferId,

    /// The Content-Type currently linked to the SourceBuffer
    typ: String,

    /// The current queue of operations being performed on the `SourceBuffer`.
    ///
    /// From the most imminent to the least.
    queue: VecDeque<SourceBufferOperation>,

    /// Buffered ranges, as last communicated by JavaScript.
    buffered: TimeRanges,

    timestamp_offset: f64,

    media_source_state: MediaSourceReadyState,
}

/// Operations awaiting to be performed on a `SourceBuffer`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum SourceBufferOperation {
    Append,
    Remove { start: f64, end: f64 },
}

impl JsSourceBuffer {
    /// Create a new `SourceBuffer` with the mime-type indicated by `typ`.
    pub(crate) fn new(typ: &str) -> Result<Self, SinkCreationError> {
        Logger::info(&format!("Creating new SourceBuffer ({typ})"));
        match jsAddSourceBuffer(typ).result() {
            Ok(id) => Ok(Self {
                id,
                typ: typ.to_owned(),
                queue: VecDeque::new(),
                buffered: TimeRanges::new(),
                timestamp_offset: 0.,
                media_source_state: MediaSourceReadyState::Open,
            }),
            Err(err) => Err(sink_creation_error(err, typ)),
        }
    }

    pub(crate) fn id(&self) -> SourceBufferId {
        self.id
    }

    /// To call once an operation started through `append_buffer` or `remove`
    /// has been finished by the underlying MSE SourceBuffer.
    ///
    /// `buffered` are the SourceBuffer's buffered ranges as a flat list of
    /// start and end times.
    pub(crate) fn on_operation_end(&mut self, buffered: &[f64]) -> Option<SourceBufferOperation> {
        self.buffered = TimeRanges::from_flat(buffered);
        self.queue.pop_front()
    }

    /// A SourceBuffer on which an error happened won't announce the end of
    /// its pending operations.
    pub(crate) fn clear_queue(&mut self) {
        Logger::info(&format!(
            "Buffer {} ({}): clearing queue.",
            self.id, self.typ
        ));
        self.queue.clear();
    }

    pub(crate) fn set_media_source_state(&mut self, state: MediaSourceReadyState) {
        self.media_source_state = state;
    }
}

impl MediaSink for JsSourceBuffer {
    fn append_buffer(&mut self, data: Vec<u8>) -> Result<(), PushSegmentError> {
        Logger::debug(&format!(
            "Buffer {} ({}): Pushing {} bytes",
            self.id,
            self.typ,
            data.len()
        ));
        match jsAppendBuffer(self.id, &data).result() {
            Ok(()) => {
                self.queue.push_back(SourceBufferOperation::Append);
                Ok(())
            }
            Err((code, desc)) => {
                let desc = desc.unwrap_or_else(|| "Unknown error.".to_owned());
                Err(match code {
                    AppendBufferErrorCode::NoSourceBuffer => PushSegmentError::NoSourceBuffer,
                    AppendBufferErrorCode::QuotaExceededError => {
                        PushSegmentError::QuotaExceeded(desc)
                    }
                    AppendBufferErrorCode::UnknownError => PushSegmentError::UnknownError(desc),
                })
            }
        }
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<(), RemoveDataError> {
        Logger::debug(&format!(
            "Buffer {} ({}): Removing {} {}",
            self.id, self.typ, start, end
        ));
        match jsRemoveBuffer(self.id, start, end).result() {
            Ok(()) => {
                self.queue
                    .push_back(SourceBufferOperation::Remove { start, end });
                Ok(())
            }
            Err((RemoveBufferErrorCode::SourceBufferNotFound, _)) => {
                Err(RemoveDataError::NoSourceBuffer)
            }
            Err((RemoveBufferErrorCode::UnknownError, desc)) => Err(RemoveDataError::UnknownError(
                desc.unwrap_or_else(|| "Unknown error.".to_owned()),
            )),
        }
    }

    fn buffered(&self) -> TimeRanges {
        self.buffered.clone()
    }

    fn updating(&self) -> bool {
        !self.queue.is_empty()
    }

    fn timestamp_offset(&self) -> f64 {
        self.timestamp_offset
    }

    fn set_timestamp_offset(&mut self, offset: f64) {
        self.timestamp_offset = offset;
        jsSetTimestampOffset(self.id, offset);
    }

    fn end_of_stream(&mut self) {
        Logger::info("Buffer: announcing end of stream");
        match jsEndOfStream().result() {
            Ok(()) => self.media_source_state = MediaSourceReadyState::Ended,
            Err((_, desc)) => Logger::warn(&format!(
                "Buffer: could not end the stream: {}",
                desc.unwrap_or_default()
            )),
        }
    }

    fn is_open(&self) -> bool {
        self.media_source_state == MediaSourceReadyState::Open
    }
}

fn sink_creation_error(
    err: (AddSourceBufferErrorCode, Option<String>),
    mime_type: &str,
) -> SinkCreationError {
    match err.0 {
        AddSourceBufferErrorCode::NoMediaSourceAttached => SinkCreationError::NoMediaSourceAttached(
            err.1
                .unwrap_or_else(|| "MediaSource instance not found.".to_owned()),
        ),
        AddSourceBufferErrorCode::MediaSourceIsClosed => SinkCreationError::MediaSourceIsClosed,
        AddSourceBufferErrorCode::QuotaExceededError => SinkCreationError::QuotaExceededError(
            err.1
                .unwrap_or_else(|| "Unknown QuotaExceededError error".to_owned()),
        ),
        AddSourceBufferErrorCode::TypeNotSupportedError => {
            SinkCreationError::TypeNotSupportedError {
                mime_type: mime_type.to_string(),
                message: err
                    .1
                    .unwrap_or_else(|| "Unknown NotSupportedError error".to_owned()),
            }
        }
        AddSourceBufferErrorCode::EmptyMimeType => SinkCreationError::EmptyMimeType,
        AddSourceBufferErrorCode::UnknownError => {
            SinkCreationError::UnknownError(err.1.unwrap_or_else(|| "Unknown error.".to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_creation_error_mapping() {
        assert_eq!(
            sink_creation_error((AddSourceBufferErrorCode::EmptyMimeType, None), ""),
            SinkCreationError::EmptyMimeType
        );
        assert_eq!(
            sink_creation_error(
                (AddSourceBufferErrorCode::TypeNotSupportedError, None),
                "video/mp2t"
            ),
            SinkCreationError::TypeNotSupportedError {
                mime_type: "video/mp2t".into(),
                message: "Unknown NotSupportedError error".into(),
            }
        );
        assert_eq!(
            sink_creation_error(
                (AddSourceBufferErrorCode::UnknownError, Some("oops".into())),
                "video/mp4"
            ),
            SinkCreationError::UnknownError("oops".into())
        );
    }
}
