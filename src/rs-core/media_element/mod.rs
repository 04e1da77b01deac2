use thiserror::Error;

use crate::utils::time_ranges::TimeRanges;

pub(crate) use source_buffers::{JsSourceBuffer, MediaSourceReadyState};

mod source_buffers;

/// Media buffer segments are pushed to, mirroring the semantics of an MSE
/// `SourceBuffer` attached to an open `MediaSource`.
///
/// `append_buffer` and `remove` are asynchronous: `updating` stays `true`
/// until the operation is finished. Callers should not start an operation
/// while another one is pending.
pub(crate) trait MediaSink {
    fn append_buffer(&mut self, data: Vec<u8>) -> Result<(), PushSegmentError>;

    /// Remove media data from `start` to `end`, in seconds.
    fn remove(&mut self, start: f64, end: f64) -> Result<(), RemoveDataError>;

    /// Time ranges currently buffered, in seconds.
    fn buffered(&self) -> TimeRanges;

    fn updating(&self) -> bool;

    fn timestamp_offset(&self) -> f64;

    fn set_timestamp_offset(&mut self, offset: f64);

    /// Signal that no more data will be pushed.
    fn end_of_stream(&mut self);

    /// `true` while the underlying `MediaSource` is "open".
    fn is_open(&self) -> bool;
}

/// Error encountered synchronously after trying to push a segment to a `MediaSink`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushSegmentError {
    #[error("No SourceBuffer found")]
    NoSourceBuffer,
    #[error("The media buffer is full: {0}")]
    QuotaExceeded(String),
    #[error("Uncategorized error with the media buffer: {0}")]
    UnknownError(String),
}

/// Error encountered synchronously after trying to remove media data from a `MediaSink`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoveDataError {
    #[error("No SourceBuffer found")]
    NoSourceBuffer,
    #[error("Uncategorized error when removing data: {0}")]
    UnknownError(String),
}

/// Error when the creation of a media buffer fails.
///
/// This is almost a 1:1 to error codes returned by `AddSourceBufferErrorCode`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkCreationError {
    #[error("No MediaSource attached: {0}")]
    NoMediaSourceAttached(String),
    #[error("The MediaSource is closed")]
    MediaSourceIsClosed,
    #[error("QuotaExceededError while creating a SourceBuffer: {0}")]
    QuotaExceededError(String),
    #[error("Mime-type \"{mime_type}\" not supported: {message}")]
    TypeNotSupportedError { mime_type: String, message: String },
    #[error("Empty mime-type")]
    EmptyMimeType,
    #[error("Unknown error while creating a SourceBuffer: {0}")]
    UnknownError(String),
}
