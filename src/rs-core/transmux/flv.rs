//! FLV tags generation.

use super::{
    adts::AdtsFrame,
    clock_utils::video_ts_to_ms,
    frame_utils::group_nals_into_frames,
    nal_unit_producer::{NalUnit, NalUnitType, NalVideoProperties},
};

/// Minimum time, in milliseconds, between two re-emissions of the audio
/// decoding configuration.
const AUDIO_CONFIG_INTERVAL_MS: i64 = 1000;

const TAG_HEADER_LENGTH: usize = 11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FlvTagType {
    Audio = 0x08,
    Video = 0x09,
    Metadata = 0x12,
}

/// Growable FLV tag, finalized once its whole content is known.
#[derive(Debug)]
pub(crate) struct FlvTag {
    tag_type: FlvTagType,
    bytes: Vec<u8>,
    /// In milliseconds.
    pub(crate) pts: i64,
    /// In milliseconds.
    pub(crate) dts: i64,
    pub(crate) key_frame: bool,
    /// Offset of the current NAL unit's length prefix.
    nal_start: Option<usize>,
    /// Offset of the ECMA array's element count, for metadata tags.
    metadata_count_position: Option<usize>,
    metadata_count: u32,
}

impl FlvTag {
    /// Create a new tag. `extra_data` marks a tag carrying decoding
    /// configuration (AVC sequence header, AudioSpecificConfig) instead of
    /// media data.
    pub(crate) fn new(tag_type: FlvTagType, extra_data: bool) -> Self {
        let mut tag = Self {
            tag_type,
            bytes: vec![0; TAG_HEADER_LENGTH],
            pts: 0,
            dts: 0,
            key_frame: false,
            nal_start: None,
            metadata_count_position: None,
            metadata_count: 0,
        };
        match tag_type {
            FlvTagType::Video => {
                // frame type and codec id, set when finalized
                tag.bytes.push(0x00);
                // AVC packet type
                tag.bytes.push(if extra_data { 0x00 } else { 0x01 });
                // composition time, set when finalized
                tag.bytes.extend([0, 0, 0]);
            }
            FlvTagType::Audio => {
                // AAC, 44kHz, 16 bits, stereo as required for AAC
                tag.bytes.push(0xaf);
                tag.bytes.push(if extra_data { 0x00 } else { 0x01 });
            }
            FlvTagType::Metadata => {
                // AMF string "onMetaData"
                tag.bytes.push(0x02);
                tag.write_short(10);
                tag.bytes.extend(b"onMetaData");
                // ECMA array
                tag.bytes.push(0x08);
                tag.metadata_count_position = Some(tag.bytes.len());
                tag.bytes.extend([0; 4]);
            }
        }
        tag
    }

    pub(crate) fn with_timestamps(mut self, pts: i64, dts: i64) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub(crate) fn write_byte(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub(crate) fn write_short(&mut self, short: u16) {
        self.bytes.extend(short.to_be_bytes());
    }

    /// Reserve the 4-byte length prefix of a new NAL unit.
    pub(crate) fn start_nal_unit(&mut self) {
        self.nal_start = Some(self.bytes.len());
        self.bytes.extend([0; 4]);
    }

    /// Write the length of the NAL unit started with `start_nal_unit`.
    ///
    /// When `nal_container` is set, the NAL unit's data is also pushed to it.
    pub(crate) fn end_nal_unit(&mut self, nal_container: Option<&mut Vec<Vec<u8>>>) {
        let Some(start) = self.nal_start.take() else {
            return;
        };
        let nal_length = self.bytes.len() - start - 4;
        self.bytes[start..start + 4].copy_from_slice(&(nal_length as u32).to_be_bytes());
        if let Some(container) = nal_container {
            container.push(self.bytes[start + 4..].to_vec());
        }
    }

    fn write_metadata_key(&mut self, key: &str) {
        self.write_short(key.len() as u16);
        self.bytes.extend(key.as_bytes());
        self.metadata_count += 1;
    }

    pub(crate) fn write_metadata_double(&mut self, key: &str, value: f64) {
        self.write_metadata_key(key);
        self.bytes.push(0x00);
        self.bytes.extend(value.to_be_bytes());
    }

    pub(crate) fn write_metadata_boolean(&mut self, key: &str, value: bool) {
        self.write_metadata_key(key);
        self.bytes.push(0x01);
        self.bytes.push(value as u8);
    }

    /// Fill the tag header and append the "previous tag size" field.
    pub(crate) fn finalize(mut self) -> FinalizedFlvTag {
        match self.tag_type {
            FlvTagType::Video => {
                self.bytes[TAG_HEADER_LENGTH] = if self.key_frame { 0x17 } else { 0x27 };
                let composition_time = (self.pts - self.dts) as i32;
                let cto = composition_time.to_be_bytes();
                self.bytes[TAG_HEADER_LENGTH + 2..TAG_HEADER_LENGTH + 5]
                    .copy_from_slice(&cto[1..4]);
            }
            FlvTagType::Metadata => {
                if let Some(pos) = self.metadata_count_position {
                    self.bytes[pos..pos + 4].copy_from_slice(&self.metadata_count.to_be_bytes());
                }
                self.bytes.extend([0x00, 0x00, 0x09]);
            }
            FlvTagType::Audio => {}
        }

        let data_size = self.bytes.len() - TAG_HEADER_LENGTH;
        let timestamp = (self.dts as u32).to_be_bytes();
        self.bytes[0] = self.tag_type as u8;
        self.bytes[1..4].copy_from_slice(&(data_size as u32).to_be_bytes()[1..4]);
        self.bytes[4..7].copy_from_slice(&timestamp[1..4]);
        // extended timestamp
        self.bytes[7] = timestamp[0];
        self.bytes[8..11].copy_from_slice(&[0, 0, 0]); // stream id

        let tag_size = self.bytes.len() as u32;
        self.bytes.extend(tag_size.to_be_bytes());
        FinalizedFlvTag {
            tag_type: self.tag_type,
            pts: self.pts,
            dts: self.dts,
            key_frame: self.key_frame,
            bytes: self.bytes,
        }
    }
}

/// A complete FLV tag, followed by its "previous tag size".
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FinalizedFlvTag {
    pub(crate) tag_type: FlvTagType,
    pub(crate) pts: i64,
    pub(crate) dts: i64,
    pub(crate) key_frame: bool,
    pub(crate) bytes: Vec<u8>,
}

/// Build the FLV file header, optionally followed by an `onMetaData` tag
/// announcing the content's duration in seconds.
pub(crate) fn flv_header(duration: Option<f64>, has_audio: bool, has_video: bool) -> Vec<u8> {
    let mut flags = 0;
    if has_audio {
        flags |= 0x04;
    }
    if has_video {
        flags |= 0x01;
    }
    let mut header = vec![b'F', b'L', b'V', 0x01, flags, 0x00, 0x00, 0x00, 0x09];
    // first previous tag size
    header.extend([0; 4]);

    if let Some(duration) = duration.filter(|d| *d > 0.) {
        let mut tag = FlvTag::new(FlvTagType::Metadata, false);
        tag.write_metadata_double("duration", duration);
        header.extend(tag.finalize().bytes);
    }
    header
}

/// Returns tags of both tracks ordered by decode timestamp, video tags first
/// when equal.
pub(crate) fn interleave_tags(
    video_tags: Vec<FinalizedFlvTag>,
    audio_tags: Vec<FinalizedFlvTag>,
) -> Vec<FinalizedFlvTag> {
    let mut tags = video_tags;
    tags.extend(audio_tags);
    // sort is stable: video stays first and configuration tags stay before
    // the media they apply to
    tags.sort_by_key(|t| t.dts);
    tags
}

/// Produces FLV video tags out of the NAL units of a segment.
pub(crate) struct FlvVideoTagGenerator {
    nal_units: Vec<NalUnit>,
    config: Option<NalVideoProperties>,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
}

impl FlvVideoTagGenerator {
    pub(crate) fn new() -> Self {
        Self {
            nal_units: vec![],
            config: None,
            sps: vec![],
            pps: vec![],
        }
    }

    pub(crate) fn push_nal_unit(&mut self, nal_unit: NalUnit) {
        self.nal_units.push(nal_unit);
    }

    pub(crate) fn has_data(&self) -> bool {
        !self.nal_units.is_empty()
    }

    /// Metadata tag followed by the AVC sequence header, both needed by the
    /// decoder before any key frame.
    fn extra_data_tags(&self, pts: i64, dts: i64) -> Vec<FinalizedFlvTag> {
        let (Some(config), Some(sps), Some(pps)) =
            (self.config.as_ref(), self.sps.first(), self.pps.first())
        else {
            return vec![];
        };
        let mut metadata = FlvTag::new(FlvTagType::Metadata, false).with_timestamps(pts, dts);
        metadata.write_metadata_double("videocodecid", 7.);
        metadata.write_metadata_double("width", config.width as f64);
        metadata.write_metadata_double("height", config.height as f64);

        let mut header = FlvTag::new(FlvTagType::Video, true).with_timestamps(pts, dts);
        header.key_frame = true;
        header.write_byte(0x01); // configurationVersion
        header.write_byte(config.profile_idc);
        header.write_byte(config.profile_compatibility);
        header.write_byte(config.level_idc);
        header.write_byte(0xfc | 0x03); // reserved + lengthSizeMinusOne
        header.write_byte(0xe0 | 0x01); // reserved + number of SPS
        header.write_short(sps.len() as u16);
        header.write_bytes(sps);
        header.write_byte(0x01); // number of PPS
        header.write_short(pps.len() as u16);
        header.write_bytes(pps);
        vec![metadata.finalize(), header.finalize()]
    }

    /// Generate every video tag of the segment from the NAL units pushed so
    /// far.
    pub(crate) fn generate_tags(&mut self) -> Vec<FinalizedFlvTag> {
        let nal_units = std::mem::take(&mut self.nal_units);
        let frames = group_nals_into_frames(nal_units);
        let mut tags = vec![];
        for frame in frames.frames {
            let pts = video_ts_to_ms(frame.pts);
            let dts = video_ts_to_ms(frame.dts);
            let mut tag = FlvTag::new(FlvTagType::Video, false).with_timestamps(pts, dts);
            for nal in &frame.data {
                match nal.nal_type {
                    NalUnitType::AccessUnitDelimiter => continue,
                    NalUnitType::Sps => {
                        if let Some(config) = &nal.config {
                            self.config = Some(config.clone());
                        }
                        tag.start_nal_unit();
                        tag.write_bytes(&nal.data);
                        self.sps.clear();
                        tag.end_nal_unit(Some(&mut self.sps));
                        continue;
                    }
                    NalUnitType::Pps => {
                        tag.start_nal_unit();
                        tag.write_bytes(&nal.data);
                        self.pps.clear();
                        tag.end_nal_unit(Some(&mut self.pps));
                        continue;
                    }
                    NalUnitType::IdrSlice => tag.key_frame = true,
                    _ => {}
                }
                tag.start_nal_unit();
                tag.write_bytes(&nal.data);
                tag.end_nal_unit(None);
            }
            if tag.key_frame {
                tags.extend(self.extra_data_tags(pts, dts));
            }
            tags.push(tag.finalize());
        }
        tags
    }

    pub(crate) fn reset(&mut self) {
        self.nal_units.clear();
        self.config = None;
        self.sps.clear();
        self.pps.clear();
    }
}

/// Decoding configuration of an AAC stream, as found in its ADTS headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct AudioConfig {
    audio_object_type: u8,
    sampling_frequency_index: u8,
    channel_count: u8,
    sample_rate: u32,
}

impl AudioConfig {
    fn from_frame(frame: &AdtsFrame) -> Self {
        Self {
            audio_object_type: frame.audio_object_type,
            sampling_frequency_index: frame.sampling_frequency_index,
            channel_count: frame.channel_count,
            sample_rate: frame.sample_rate,
        }
    }

    /// The 2-byte AudioSpecificConfig.
    fn audio_specific_config(&self) -> u16 {
        ((self.audio_object_type as u16) << 11)
            | ((self.sampling_frequency_index as u16) << 7)
            | ((self.channel_count as u16) << 3)
    }
}

/// Produces FLV audio tags out of AAC frames.
pub(crate) struct FlvAudioTagGenerator {
    frames: Vec<AdtsFrame>,
    config: Option<AudioConfig>,
    /// PTS, in milliseconds, at which the configuration was last written.
    last_config_pts: Option<i64>,
}

impl FlvAudioTagGenerator {
    pub(crate) fn new() -> Self {
        Self {
            frames: vec![],
            config: None,
            last_config_pts: None,
        }
    }

    pub(crate) fn push_frame(&mut self, frame: AdtsFrame) {
        self.frames.push(frame);
    }

    pub(crate) fn has_data(&self) -> bool {
        !self.frames.is_empty()
    }

    fn config_tags(config: &AudioConfig, pts: i64, dts: i64) -> [FinalizedFlvTag; 2] {
        let mut metadata = FlvTag::new(FlvTagType::Metadata, false).with_timestamps(pts, dts);
        // AAC is always 10
        metadata.write_metadata_double("audiocodecid", 10.);
        metadata.write_metadata_boolean("stereo", config.channel_count == 2);
        metadata.write_metadata_double("audiosamplerate", config.sample_rate as f64);
        // Is AAC always 16 bit?
        metadata.write_metadata_double("audiosamplesize", 16.);

        let mut asc = FlvTag::new(FlvTagType::Audio, true).with_timestamps(pts, dts);
        asc.write_short(config.audio_specific_config());
        [metadata.finalize(), asc.finalize()]
    }

    pub(crate) fn generate_tags(&mut self) -> Vec<FinalizedFlvTag> {
        let frames = std::mem::take(&mut self.frames);
        let mut tags = vec![];
        for frame in frames {
            let pts = video_ts_to_ms(frame.pts);
            let dts = video_ts_to_ms(frame.dts);
            let config = AudioConfig::from_frame(&frame);
            let needs_config = self.config != Some(config)
                || self
                    .last_config_pts
                    .map_or(true, |last| pts - last >= AUDIO_CONFIG_INTERVAL_MS);
            if needs_config {
                tags.extend(Self::config_tags(&config, pts, dts));
                self.config = Some(config);
                self.last_config_pts = Some(pts);
            }
            let mut tag = FlvTag::new(FlvTagType::Audio, false).with_timestamps(pts, dts);
            tag.write_bytes(&frame.data);
            tags.push(tag.finalize());
        }
        tags
    }

    pub(crate) fn reset(&mut self) {
        self.frames.clear();
        self.config = None;
        self.last_config_pts = None;
    }
}
