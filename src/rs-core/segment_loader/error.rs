use thiserror::Error;

use crate::{
    decrypter::DecryptError,
    media_element::{PushSegmentError, SinkCreationError},
    transmux::TransmuxError,
};

/// `MediaError` code of network errors.
const NETWORK_ERROR_CODE: u16 = 2;
/// Code given to errors linked to the decoding of loaded segments.
const DECODE_ERROR_CODE: u16 = 4;

/// Errors the `SegmentLoader` can encounter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("HLS segment request error at URL: {url}")]
    SegmentRequest { url: String, status: Option<u32> },
    #[error("HLS key request error at URL: {url}")]
    KeyRequest { url: String, status: Option<u32> },
    #[error("Invalid HLS key at URL: {url}")]
    InvalidKey { url: String },
    #[error("Could not decrypt segment {url}: {source}")]
    Decryption { url: String, source: DecryptError },
    #[error("Could not transmux segment {url}: {source}")]
    Transmux { url: String, source: TransmuxError },
    #[error("Could not push segment to the media buffer: {0}")]
    Append(#[from] PushSegmentError),
    #[error("Could not create the media buffer: {0}")]
    SinkCreation(#[from] SinkCreationError),
}

impl LoaderError {
    /// Player-level error code: `2` for network errors, `4` for errors
    /// decoding the loaded data.
    pub fn code(&self) -> u16 {
        match self {
            LoaderError::SegmentRequest { .. }
            | LoaderError::KeyRequest { .. }
            | LoaderError::InvalidKey { .. } => NETWORK_ERROR_CODE,
            LoaderError::Decryption { .. }
            | LoaderError::Transmux { .. }
            | LoaderError::Append(_)
            | LoaderError::SinkCreation(_) => DECODE_ERROR_CODE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let url = String::from("seg.ts");
        assert_eq!(
            LoaderError::SegmentRequest {
                url: url.clone(),
                status: Some(404)
            }
            .code(),
            2
        );
        assert_eq!(LoaderError::InvalidKey { url: url.clone() }.code(), 2);
        assert_eq!(
            LoaderError::Transmux {
                url: url.clone(),
                source: TransmuxError::MultiplePrograms
            }
            .code(),
            4
        );
        assert_eq!(
            LoaderError::Decryption {
                url,
                source: DecryptError::UnalignedInput(17)
            }
            .code(),
            4
        );
        assert_eq!(
            LoaderError::from(PushSegmentError::NoSourceBuffer).code(),
            4
        );
    }

    #[test]
    fn test_display() {
        let err = LoaderError::InvalidKey {
            url: "https://example.com/key".into(),
        };
        assert_eq!(err.to_string(), "Invalid HLS key at URL: https://example.com/key");
    }
}
