use super::{
    clock_utils::ONE_SECOND_IN_TS,
    elementary_packet_parser::{ElementaryMediaType, MediaElementaryPacket},
    StreamStage, TransmuxError,
};
use crate::Logger;

/// Number of PCM samples encoded in a single AAC frame.
pub(crate) const ADTS_SAMPLES_PER_FRAME: u32 = 1024;

/// Sampling rates, indexed by the ADTS `sampling_frequency_index`.
pub(crate) const ADTS_SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Information parsed from an ADTS header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    pub(crate) protection_absent: bool,
    pub(crate) audio_object_type: u8,
    pub(crate) sampling_frequency_index: u8,
    pub(crate) channel_count: u8,
    pub(crate) frame_length: usize,
    pub(crate) raw_data_blocks: u8,
}

impl AdtsHeader {
    fn header_length(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }

    pub(crate) fn sample_rate(&self) -> u32 {
        ADTS_SAMPLING_FREQUENCIES[self.sampling_frequency_index as usize]
    }
}

/// A raw AAC frame, extracted from its ADTS envelope.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AdtsFrame {
    pub(crate) pts: i64,
    pub(crate) dts: i64,
    pub(crate) audio_object_type: u8,
    pub(crate) sampling_frequency_index: u8,
    pub(crate) channel_count: u8,
    pub(crate) sample_rate: u32,
    pub(crate) sample_count: u32,
    pub(crate) data: Vec<u8>,
}

/// Where the ADTS parser is in the byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AdtsState {
    /// Looking for the `0xFF` first sync byte.
    SyncByte,
    /// Expecting `0xF_`: end of syncword, MPEG version, layer and protection_absent.
    SyncNibble,
    /// Profile, sampling frequency index and the high channel configuration bit.
    ProfileRateChannel,
    /// Low channel configuration bits and the two high bits of the frame length.
    ChannelFrameLength,
    /// Middle eight bits of the frame length.
    FrameLengthMid,
    /// Three low bits of the frame length and start of the buffer fullness.
    FrameLengthLowFullness,
    /// End of the buffer fullness and number of raw data blocks.
    FullnessFrameCount,
    /// CRC bytes, present when protection_absent is not set.
    Crc { remaining: usize },
    /// Raw AAC data.
    Payload { remaining: usize },
}

/// What happened after a byte was given to `AdtsStateMachine::step`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AdtsAction {
    /// The byte is not part of an ADTS frame.
    Skip,
    /// A new frame may start at this byte.
    SyncFound,
    /// The byte was part of the header.
    Header,
    /// The whole header has been read.
    HeaderComplete,
    /// The byte is part of the frame's payload.
    Payload,
    /// The byte was the last of the frame's payload.
    FrameComplete,
    /// The header being read turned out to be invalid.
    Invalid(&'static str),
}

/// Byte-level ADTS header state machine.
#[derive(Debug)]
pub(crate) struct AdtsStateMachine {
    state: AdtsState,
    header: AdtsHeader,
}

impl AdtsStateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: AdtsState::SyncByte,
            header: AdtsHeader::default(),
        }
    }

    pub(crate) fn state(&self) -> AdtsState {
        self.state
    }

    pub(crate) fn header(&self) -> &AdtsHeader {
        &self.header
    }

    pub(crate) fn reset(&mut self) {
        self.state = AdtsState::SyncByte;
        self.header = AdtsHeader::default();
    }

    fn fail(&mut self, reason: &'static str) -> AdtsAction {
        self.state = AdtsState::SyncByte;
        AdtsAction::Invalid(reason)
    }

    pub(crate) fn step(&mut self, byte: u8) -> AdtsAction {
        match self.state {
            AdtsState::SyncByte => {
                if byte == 0xff {
                    self.header = AdtsHeader::default();
                    self.state = AdtsState::SyncNibble;
                    AdtsAction::SyncFound
                } else {
                    AdtsAction::Skip
                }
            }
            AdtsState::SyncNibble => {
                if byte & 0xf6 == 0xf0 {
                    self.header.protection_absent = byte & 0x01 != 0;
                    self.state = AdtsState::ProfileRateChannel;
                    AdtsAction::Header
                } else if byte == 0xff {
                    // may be the real first sync byte
                    AdtsAction::SyncFound
                } else {
                    self.fail("invalid sync word")
                }
            }
            AdtsState::ProfileRateChannel => {
                self.header.audio_object_type = ((byte >> 6) & 0x03) + 1;
                self.header.sampling_frequency_index = (byte >> 2) & 0x0f;
                if self.header.sampling_frequency_index as usize >= ADTS_SAMPLING_FREQUENCIES.len()
                {
                    return self.fail("invalid sampling frequency index");
                }
                self.header.channel_count = (byte & 0x01) << 2;
                self.state = AdtsState::ChannelFrameLength;
                AdtsAction::Header
            }
            AdtsState::ChannelFrameLength => {
                self.header.channel_count |= (byte >> 6) & 0x03;
                self.header.frame_length = ((byte & 0x03) as usize) << 11;
                self.state = AdtsState::FrameLengthMid;
                AdtsAction::Header
            }
            AdtsState::FrameLengthMid => {
                self.header.frame_length |= (byte as usize) << 3;
                self.state = AdtsState::FrameLengthLowFullness;
                AdtsAction::Header
            }
            AdtsState::FrameLengthLowFullness => {
                self.header.frame_length |= ((byte >> 5) & 0x07) as usize;
                self.state = AdtsState::FullnessFrameCount;
                AdtsAction::Header
            }
            AdtsState::FullnessFrameCount => {
                self.header.raw_data_blocks = (byte & 0x03) + 1;
                let header_length = self.header.header_length();
                if self.header.frame_length <= header_length {
                    return self.fail("frame length too small");
                }
                self.state = if self.header.protection_absent {
                    AdtsState::Payload {
                        remaining: self.header.frame_length - header_length,
                    }
                } else {
                    AdtsState::Crc { remaining: 2 }
                };
                AdtsAction::HeaderComplete
            }
            AdtsState::Crc { remaining } => {
                self.state = if remaining > 1 {
                    AdtsState::Crc {
                        remaining: remaining - 1,
                    }
                } else {
                    AdtsState::Payload {
                        remaining: self.header.frame_length - self.header.header_length(),
                    }
                };
                AdtsAction::Header
            }
            AdtsState::Payload { remaining } => {
                if remaining > 1 {
                    self.state = AdtsState::Payload {
                        remaining: remaining - 1,
                    };
                    AdtsAction::Payload
                } else {
                    self.state = AdtsState::SyncByte;
                    AdtsAction::FrameComplete
                }
            }
        }
    }

    /// Consume up to `max` payload bytes at once. Returns the number of bytes
    /// consumed and whether the frame is now complete.
    fn skip_payload(&mut self, max: usize) -> (usize, bool) {
        match self.state {
            AdtsState::Payload { remaining } => {
                let consumed = usize::min(remaining, max);
                if consumed == remaining {
                    self.state = AdtsState::SyncByte;
                    (consumed, true)
                } else {
                    self.state = AdtsState::Payload {
                        remaining: remaining - consumed,
                    };
                    (consumed, false)
                }
            }
            _ => (0, false),
        }
    }
}

/// Timing of the PES packet in which the frame being parsed started.
#[derive(Clone, Copy, Debug)]
struct FrameStart {
    pes_id: u64,
    pts: i64,
    dts: i64,
    index: u32,
}

/// Accepts audio PES packets and emits the AAC frames they contain.
pub(crate) struct AdtsParser {
    machine: AdtsStateMachine,
    /// Bytes of the header being parsed, kept to be able to resynchronize.
    header_bytes: Vec<u8>,
    payload: Vec<u8>,
    frame_start: Option<FrameStart>,
    pes_id: u64,
    pes_pts: i64,
    pes_dts: i64,
    /// Number of frames whose header was parsed in the current PES packet.
    frame_num: u32,
}

impl AdtsParser {
    pub(crate) fn new() -> Self {
        Self {
            machine: AdtsStateMachine::new(),
            header_bytes: Vec::with_capacity(9),
            payload: vec![],
            frame_start: None,
            pes_id: 0,
            pes_pts: 0,
            pes_dts: 0,
            frame_num: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.machine.reset();
        self.header_bytes.clear();
        self.payload.clear();
        self.frame_start = None;
        self.frame_num = 0;
    }

    fn parse_bytes(&mut self, data: &[u8], frames: &mut Vec<AdtsFrame>) {
        let mut i = 0;
        while i < data.len() {
            let (consumed, completed) = self.machine.skip_payload(data.len() - i);
            if consumed > 0 {
                self.payload.extend_from_slice(&data[i..i + consumed]);
                i += consumed;
                if completed {
                    frames.extend(self.complete_frame());
                }
                continue;
            }
            self.parse_byte(data[i], frames);
            i += 1;
        }
    }

    fn parse_byte(&mut self, byte: u8, frames: &mut Vec<AdtsFrame>) {
        // bytes to re-inspect after a bad header, in reverse order
        let mut pending = vec![byte];
        while let Some(byte) = pending.pop() {
            match self.machine.step(byte) {
                AdtsAction::Skip => {}
                AdtsAction::SyncFound => {
                    self.header_bytes.clear();
                    self.header_bytes.push(byte);
                    self.frame_start = Some(FrameStart {
                        pes_id: self.pes_id,
                        pts: self.pes_pts,
                        dts: self.pes_dts,
                        index: self.frame_num,
                    });
                }
                AdtsAction::Header => self.header_bytes.push(byte),
                AdtsAction::HeaderComplete => {
                    self.header_bytes.push(byte);
                    if let Some(start) = self.frame_start {
                        if start.pes_id == self.pes_id {
                            self.frame_num += 1;
                        }
                    }
                    self.payload.clear();
                }
                AdtsAction::Payload => self.payload.push(byte),
                AdtsAction::FrameComplete => {
                    self.payload.push(byte);
                    frames.extend(self.complete_frame());
                }
                AdtsAction::Invalid(reason) => {
                    Logger::lazy_warn(&|| format!("TS: ADTS resync: {}", reason));
                    // Restart the search one byte after the last sync byte
                    self.header_bytes.push(byte);
                    let to_replay = std::mem::take(&mut self.header_bytes);
                    pending.extend(to_replay.into_iter().skip(1).rev());
                    self.frame_start = None;
                }
            }
        }
    }

    fn complete_frame(&mut self) -> Option<AdtsFrame> {
        let header = *self.machine.header();
        let start = self.frame_start.take()?;
        let sample_rate = header.sample_rate();
        let offset = (start.index as u64 * ADTS_SAMPLES_PER_FRAME as u64 * ONE_SECOND_IN_TS
            / sample_rate as u64) as i64;
        self.header_bytes.clear();
        Some(AdtsFrame {
            pts: start.pts + offset,
            dts: start.dts + offset,
            audio_object_type: header.audio_object_type,
            sampling_frequency_index: header.sampling_frequency_index,
            channel_count: header.channel_count,
            sample_rate,
            sample_count: ADTS_SAMPLES_PER_FRAME,
            data: std::mem::take(&mut self.payload),
        })
    }
}

impl StreamStage for AdtsParser {
    type Input = MediaElementaryPacket;
    type Output = AdtsFrame;

    fn push(&mut self, packet: MediaElementaryPacket) -> Result<Vec<AdtsFrame>, TransmuxError> {
        if packet.media_type != ElementaryMediaType::Audio {
            return Ok(vec![]);
        }
        self.pes_id += 1;
        self.frame_num = 0;
        if let Some(pts) = packet.pts {
            self.pes_pts = pts;
            self.pes_dts = packet.dts.unwrap_or(pts);
        }
        let mut frames = vec![];
        self.parse_bytes(&packet.data, &mut frames);
        Ok(frames)
    }

    fn flush(&mut self) -> Result<Vec<AdtsFrame>, TransmuxError> {
        self.frame_num = 0;
        Ok(vec![])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an ADTS frame (no CRC) for AAC-LC.
    pub(crate) fn adts_frame(sampling_frequency_index: u8, channels: u8, payload: &[u8]) -> Vec<u8> {
        let frame_length = 7 + payload.len();
        let mut frame = vec![
            0xff,
            0xf1,
            (1 << 6) | (sampling_frequency_index << 2) | ((channels >> 2) & 0x01),
            ((channels & 0x03) << 6) | ((frame_length >> 11) as u8 & 0x03),
            ((frame_length >> 3) & 0xff) as u8,
            (((frame_length & 0x07) as u8) << 5) | 0x1f,
            0xfc,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    pub(crate) fn audio_packet(pts: i64, data: Vec<u8>) -> MediaElementaryPacket {
        MediaElementaryPacket {
            media_type: ElementaryMediaType::Audio,
            track_id: 0x101,
            data,
            packet_length: 0,
            data_alignment_indicator: true,
            pts: Some(pts),
            dts: Some(pts),
        }
    }

    #[test]
    fn test_state_machine_reads_header() {
        let frame = adts_frame(4, 2, &[1, 2, 3]);
        let mut machine = AdtsStateMachine::new();
        let actions: Vec<AdtsAction> = frame.iter().map(|b| machine.step(*b)).collect();
        assert_eq!(actions[0], AdtsAction::SyncFound);
        assert_eq!(actions[6], AdtsAction::HeaderComplete);
        assert_eq!(actions[7], AdtsAction::Payload);
        assert_eq!(actions[9], AdtsAction::FrameComplete);
        let header = machine.header();
        assert_eq!(header.audio_object_type, 2);
        assert_eq!(header.sample_rate(), 44100);
        assert_eq!(header.channel_count, 2);
        assert_eq!(header.frame_length, 10);
        assert!(header.protection_absent);
        assert_eq!(machine.state(), AdtsState::SyncByte);
    }

    #[test]
    fn test_crc_is_skipped() {
        let mut frame = adts_frame(3, 1, &[9, 9]);
        // set protection_absent to 0 and insert the CRC
        frame[1] = 0xf0;
        let frame_length = 9 + 2;
        frame[4] = ((frame_length >> 3) & 0xff) as u8;
        frame[5] = (((frame_length & 0x07) as u8) << 5) | 0x1f;
        frame.splice(7..7, [0xAB, 0xCD]);
        let mut parser = AdtsParser::new();
        let frames = parser.push(audio_packet(0, frame)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![9, 9]);
        assert_eq!(frames[0].sample_rate, 48000);
    }

    #[test]
    fn test_frames_timestamps() {
        let mut data = adts_frame(3, 2, &[0x11; 20]);
        data.extend(adts_frame(3, 2, &[0x22; 30]));
        let mut parser = AdtsParser::new();
        let frames = parser.push(audio_packet(90_000, data)).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pts, 90_000);
        // 1024 samples at 48kHz in a 90kHz clock
        assert_eq!(frames[1].pts, 90_000 + 1920);
        assert_eq!(frames[1].data, vec![0x22; 30]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut data = vec![0x00, 0xff, 0x12, 0xff];
        data.extend(adts_frame(4, 2, &[0x33; 5]));
        let mut parser = AdtsParser::new();
        let frames = parser.push(audio_packet(0, data)).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![0x33; 5]);
    }

    #[test]
    fn test_frame_split_across_packets() {
        let frame = adts_frame(4, 2, &[0x44; 40]);
        let mut parser = AdtsParser::new();
        assert!(parser.push(audio_packet(0, frame[..5].to_vec())).unwrap().is_empty());
        assert!(parser.push(audio_packet(3000, frame[5..20].to_vec())).unwrap().is_empty());
        let frames = parser.push(audio_packet(6000, frame[20..].to_vec())).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, 0);
        assert_eq!(frames[0].data, vec![0x44; 40]);
    }
}
