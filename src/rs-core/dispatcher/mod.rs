use crate::{segment_loader::SegmentLoader, wasm_bindgen};

pub use api::JsMediaPlaylist;
pub(crate) use self::core::JsHost;

mod api;
mod core;

/// The `Dispatcher` is the segment loading interface exported to the
/// JavaScript-side.
///
/// JavaScript gives it the media playlist to load segments from, and then
/// forwards every network, timer and media events to it through the
/// methods defined in `bindings::event_listeners`.
#[wasm_bindgen]
pub struct Dispatcher {
    /// Decides which segment to load and pushes it to the media buffer.
    loader: SegmentLoader<JsHost>,
}
