use super::{
    elementary_packet_parser::{ElementaryMediaType, MediaElementaryPacket},
    StreamStage, TransmuxError,
};
use crate::Logger;

/// Owner of the PRIV frame Apple uses to signal the timestamp of the first
/// sample of a packed-audio segment.
const APPLE_TIMESTAMP_OWNER: &str = "com.apple.streaming.transportStreamTimestamp";

const ID3_HEADER_LENGTH: usize = 10;

/// Decoded content of an ID3 frame.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Id3FrameValue {
    /// `TXXX`: user-defined text.
    Text { description: String, value: String },
    /// `WXXX`: user-defined URL.
    Url { description: String, url: String },
    /// `PRIV`: private data identified by its owner.
    Private {
        owner: String,
        data: Vec<u8>,
        /// Set for Apple's transport stream timestamp frame, in 90kHz units.
        timestamp: Option<i64>,
    },
    /// Any other frame, with its payload left untouched.
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Id3Frame {
    pub(crate) id: String,
    pub(crate) value: Id3FrameValue,
}

/// A whole ID3 tag found in the timed metadata stream.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Id3Tag {
    pub(crate) pts: Option<i64>,
    pub(crate) dts: Option<i64>,
    pub(crate) dispatch_type: Option<String>,
    pub(crate) frames: Vec<Id3Frame>,
    /// The complete tag, header included.
    pub(crate) data: Vec<u8>,
}

/// Read a 28-bit "synchsafe" integer: 4 bytes with their most significant bit
/// unset.
fn parse_sync_safe_integer(data: &[u8]) -> usize {
    data.iter()
        .take(4)
        .fold(0, |acc, b| (acc << 7) | (*b as usize & 0x7f))
}

fn read_u32_be(data: &[u8]) -> usize {
    data.iter().take(4).fold(0, |acc, b| (acc << 8) | *b as usize)
}

fn index_of_null(data: &[u8], from: usize) -> usize {
    data.iter()
        .skip(from)
        .position(|b| *b == 0)
        .map_or(data.len(), |pos| pos + from)
}

fn parse_utf8(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_end_matches('\0')
        .to_owned()
}

fn parse_iso_8859_1(data: &[u8]) -> String {
    data.iter()
        .map(|b| *b as char)
        .collect::<String>()
        .trim_end_matches('\0')
        .to_owned()
}

/// Decode the 33-bit timestamp stored in Apple's transport stream timestamp
/// PRIV frame.
fn parse_apple_timestamp(data: &[u8]) -> Option<i64> {
    if data.len() < 8 {
        return None;
    }
    let mut ts = ((data[3] as i64 & 0x01) << 30)
        | ((data[4] as i64) << 22)
        | ((data[5] as i64) << 14)
        | ((data[6] as i64) << 6)
        | ((data[7] as i64) >> 2);
    ts *= 4;
    ts += data[7] as i64 & 0x03;
    Some(ts)
}

fn parse_frame_value(id: &str, data: &[u8]) -> Id3FrameValue {
    match id {
        // Only UTF-8 encoded text is understood
        "TXXX" if data.first() == Some(&3) => {
            let separator = index_of_null(data, 1);
            Id3FrameValue::Text {
                description: parse_utf8(&data[1..separator]),
                value: parse_utf8(data.get(separator + 1..).unwrap_or(&[])),
            }
        }
        "WXXX" if data.first() == Some(&3) => {
            let separator = index_of_null(data, 1);
            Id3FrameValue::Url {
                description: parse_utf8(&data[1..separator]),
                url: parse_iso_8859_1(data.get(separator + 1..).unwrap_or(&[])),
            }
        }
        "PRIV" => {
            let separator = index_of_null(data, 0);
            let owner = parse_iso_8859_1(&data[..separator]);
            let private_data = data.get(separator + 1..).unwrap_or(&[]).to_vec();
            let timestamp = if owner == APPLE_TIMESTAMP_OWNER {
                parse_apple_timestamp(&private_data)
            } else {
                None
            };
            Id3FrameValue::Private {
                owner,
                data: private_data,
                timestamp,
            }
        }
        _ => Id3FrameValue::Raw(data.to_vec()),
    }
}

/// Parse the frames of a complete ID3 tag.
///
/// Frames are read until the end of the tag, minus its padding. A frame with
/// a size of zero stops parsing: frames already read are kept.
pub(crate) fn parse_id3_frames(tag: &[u8]) -> Vec<Id3Frame> {
    let mut frames = vec![];
    if tag.len() < ID3_HEADER_LENGTH {
        return frames;
    }
    let mut tag_size = tag.len();
    let mut frame_start = ID3_HEADER_LENGTH;

    // extended header
    if tag[5] & 0x40 != 0 && tag.len() >= 20 {
        frame_start += 4;
        frame_start += parse_sync_safe_integer(&tag[10..14]);
        tag_size = tag_size.saturating_sub(parse_sync_safe_integer(&tag[16..20]));
    }

    while frame_start + ID3_HEADER_LENGTH <= tag_size {
        let frame_size = read_u32_be(&tag[frame_start + 4..frame_start + 8]);
        if frame_size < 1 {
            Logger::lazy_warn(&|| {
                String::from("ID3: Malformed ID3 frame encountered. Skipping remaining metadata parsing.")
            });
            break;
        }
        let id = parse_iso_8859_1(&tag[frame_start..frame_start + 4]);
        let data_start = frame_start + ID3_HEADER_LENGTH;
        let data_end = usize::min(data_start + frame_size, tag.len());
        frames.push(Id3Frame {
            value: parse_frame_value(&id, &tag[data_start..data_end]),
            id,
        });
        frame_start = data_start + frame_size;
    }
    frames
}

/// Reassembles ID3 tags which may be split across several PES packets of the
/// timed metadata stream.
pub(crate) struct Id3Parser {
    buffer: Vec<u8>,
    tag_size: usize,
    pts: Option<i64>,
    dts: Option<i64>,
    dispatch_type: Option<String>,
}

impl Id3Parser {
    pub(crate) fn new() -> Self {
        Self {
            buffer: vec![],
            tag_size: 0,
            pts: None,
            dts: None,
            dispatch_type: None,
        }
    }

    /// Set the in-band dispatch type, announced by the program map table, of
    /// the tags subsequently emitted.
    pub(crate) fn set_dispatch_type(&mut self, dispatch_type: Option<String>) {
        self.dispatch_type = dispatch_type;
    }

    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.tag_size = 0;
        self.pts = None;
        self.dts = None;
    }
}

impl StreamStage for Id3Parser {
    type Input = MediaElementaryPacket;
    type Output = Id3Tag;

    fn push(&mut self, packet: MediaElementaryPacket) -> Result<Vec<Id3Tag>, TransmuxError> {
        if packet.media_type != ElementaryMediaType::TimedMetadata {
            return Ok(vec![]);
        }

        if packet.data_alignment_indicator {
            if !self.buffer.is_empty() {
                Logger::lazy_debug(&|| {
                    String::from("ID3: Discarding incomplete tag on new aligned packet")
                });
            }
            self.buffer.clear();
            self.tag_size = 0;
        }

        if self.buffer.is_empty() {
            if packet.data.len() < ID3_HEADER_LENGTH || &packet.data[0..3] != b"ID3" {
                Logger::lazy_debug(&|| {
                    String::from("ID3: Skipping unrecognized metadata packet")
                });
                return Ok(vec![]);
            }
            self.tag_size = parse_sync_safe_integer(&packet.data[6..10]) + ID3_HEADER_LENGTH;
            self.pts = packet.pts;
            self.dts = packet.dts;
        }

        self.buffer.extend_from_slice(&packet.data);
        if self.buffer.len() < self.tag_size {
            return Ok(vec![]);
        }

        let mut data = std::mem::take(&mut self.buffer);
        data.truncate(self.tag_size);
        self.tag_size = 0;
        let frames = parse_id3_frames(&data);
        Ok(vec![Id3Tag {
            pts: self.pts,
            dts: self.dts,
            dispatch_type: self.dispatch_type.clone(),
            frames,
            data,
        }])
    }

    fn flush(&mut self) -> Result<Vec<Id3Tag>, TransmuxError> {
        Ok(vec![])
    }
}
