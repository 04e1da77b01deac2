use super::{
    elementary_packet_parser::{ElementaryMediaType, MediaElementaryPacket},
    exp_golomb::{ExpGolomb, ExpGolombError},
    transport_packet_parser::Pid,
    StreamStage, TransmuxError,
};
use crate::Logger;

/// Accepts a NAL unit byte stream and unpacks the embedded NAL units.
///
/// Each NAL unit is returned along with the tag of the chunk of data in which
/// it started, which lets callers attribute timestamps to it.
struct NalUnitFinder<T: Clone> {
    buffer: Vec<u8>,
    /// Offset in `buffer` of the first byte of the NAL unit being read, if any.
    nal_start: Option<usize>,
    /// Tag of the NAL unit being read.
    nal_tag: Option<T>,
    /// Offset from which the next start code is looked for.
    search_from: usize,
}

impl<T: Clone> NalUnitFinder<T> {
    fn new() -> Self {
        Self {
            buffer: vec![],
            nal_start: None,
            nal_tag: None,
            search_from: 0,
        }
    }

    /// Scans a byte stream and return the NAL units found.
    fn push(&mut self, data: &[u8], tag: &T) -> Vec<(Vec<u8>, T)> {
        self.buffer.extend_from_slice(data);
        let mut res = vec![];

        // Rec. ITU-T H.264, Annex B
        // scan for NAL unit boundaries, which look like `0 0 1`. A four bytes
        // start code (`0 0 0 1`) just leaves a trailing zero to the previous NAL
        // unit, which is dropped.
        let mut i = self.search_from;
        while i + 3 <= self.buffer.len() {
            if self.buffer[i + 2] > 1 {
                // the third byte cannot be part of a start code, so none of the
                // three first can begin one
                i += 3;
            } else if self.buffer[i] == 0 && self.buffer[i + 1] == 0 && self.buffer[i + 2] == 1
            {
                if let (Some(start), Some(nal_tag)) = (self.nal_start, self.nal_tag.take()) {
                    let end = strip_trailing_zeros(&self.buffer, start, i);
                    if end > start {
                        res.push((self.buffer[start..end].to_owned(), nal_tag));
                    }
                }
                self.nal_start = Some(i + 3);
                self.nal_tag = Some(tag.clone());
                i += 3;
            } else {
                i += 1;
            }
        }
        self.search_from = i;

        // filter out the NAL units that were delivered
        let consumed = match self.nal_start {
            Some(start) => start,
            None => self.search_from,
        };
        if consumed > 0 {
            self.buffer.drain(..consumed);
            self.search_from -= consumed;
            self.nal_start = self.nal_start.map(|s| s - consumed);
        }
        res
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.nal_start = None;
        self.nal_tag = None;
        self.search_from = 0;
    }

    /// deliver the last buffered NAL unit
    fn flush(&mut self) -> Option<(Vec<u8>, T)> {
        let res = match (self.nal_start, self.nal_tag.take()) {
            (Some(start), Some(tag)) => {
                let end = strip_trailing_zeros(&self.buffer, start, self.buffer.len());
                if end > start {
                    Some((self.buffer[start..end].to_owned(), tag))
                } else {
                    None
                }
            }
            _ => None,
        };
        self.reset();
        res
    }
}

fn strip_trailing_zeros(buffer: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && buffer[end - 1] == 0 {
        end -= 1;
    }
    end
}

/// values of profile_idc that indicate additional fields are included in the SPS see
/// Recommendation ITU-T H.264 (4/2013),
/// 7.3.2.1.1 Sequence parameter set data syntax
static PROFILES_WITH_OPTIONAL_SPS_DATA: [u8; 12] =
    [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NalUnitType {
    Unspecified,
    NonIdrSlice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    EndOfSequence,
    EndOfStream,
    Other(u8),
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1f {
            0 => NalUnitType::Unspecified,
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::AccessUnitDelimiter,
            10 => NalUnitType::EndOfSequence,
            11 => NalUnitType::EndOfStream,
            x => NalUnitType::Other(x),
        }
    }
}

/// Video properties decoded from a Sequence Parameter Set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NalVideoProperties {
    pub(crate) profile_idc: u8,
    pub(crate) level_idc: u8,
    pub(crate) profile_compatibility: u8,
    pub(crate) width: u32,
    pub(crate) height: u32,
    /// Sample aspect ratio
    pub(crate) sar_ratio: (u16, u16),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct NalUnit {
    pub(crate) nal_type: NalUnitType,
    pub(crate) track_id: Pid,
    pub(crate) pts: i64,
    pub(crate) dts: i64,
    /// The NAL unit as found in the stream, emulation prevention bytes included.
    pub(crate) data: Vec<u8>,
    /// Set for successfully decoded SPS NAL units.
    pub(crate) config: Option<NalVideoProperties>,
}

impl NalUnit {
    pub(crate) fn is_slice(&self) -> bool {
        matches!(
            self.nal_type,
            NalUnitType::IdrSlice | NalUnitType::NonIdrSlice
        )
    }

    /// `true` for a slice whose `first_mb_in_slice` is `0`, i.e. the first
    /// slice of a new picture.
    pub(crate) fn is_first_slice_of_picture(&self) -> bool {
        // first_mb_in_slice is the first Exp-Golomb value of the slice header.
        // A leading bit set means it is 0.
        self.is_slice() && self.data.get(1).map_or(false, |b| b & 0x80 != 0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct NalTag {
    track_id: Pid,
    pts: i64,
    dts: i64,
}

/// Produces H.264 NAL units out of video PES packets.
pub(crate) struct NalUnitProducer {
    nal_unit_finder: NalUnitFinder<NalTag>,
    last_pts: Option<i64>,
    last_dts: Option<i64>,
}

impl NalUnitProducer {
    pub(crate) fn new() -> Self {
        Self {
            nal_unit_finder: NalUnitFinder::new(),
            last_pts: None,
            last_dts: None,
        }
    }

    /// Identify NAL unit types and pass on the NALU, trackId, presentation and
    /// decode timestamps.
    /// Also, preprocess sequence parameter NALUs.
    fn on_nal_unit(&self, data: Vec<u8>, tag: NalTag) -> NalUnit {
        let nal_type = data
            .first()
            .map_or(NalUnitType::Unspecified, |h| NalUnitType::from(*h));
        let config = if nal_type == NalUnitType::Sps {
            let rbsp = discard_emulation_prevention_bytes(&data[1..]);
            match read_sequence_parameter_set(&rbsp) {
                Ok(props) => Some(props),
                Err(err) => {
                    Logger::lazy_warn(&|| format!("TS: abandoning malformed SPS: {}", err));
                    None
                }
            }
        } else {
            None
        };
        NalUnit {
            nal_type,
            track_id: tag.track_id,
            pts: tag.pts,
            dts: tag.dts,
            data,
            config,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.nal_unit_finder.reset();
        self.last_pts = None;
        self.last_dts = None;
    }
}

impl StreamStage for NalUnitProducer {
    type Input = MediaElementaryPacket;
    type Output = NalUnit;

    /// Pushes a video packet to parse its inner Nal Units.
    fn push(&mut self, packet: MediaElementaryPacket) -> Result<Vec<NalUnit>, TransmuxError> {
        if packet.media_type != ElementaryMediaType::Video {
            return Ok(vec![]);
        }
        let pts = packet.pts.or(self.last_pts).unwrap_or(0);
        let dts = packet.dts.or(self.last_dts).unwrap_or(pts);
        self.last_pts = Some(pts);
        self.last_dts = Some(dts);
        let tag = NalTag {
            track_id: packet.track_id,
            pts,
            dts,
        };
        let nal_units = self.nal_unit_finder.push(&packet.data, &tag);
        Ok(nal_units
            .into_iter()
            .map(|(data, tag)| self.on_nal_unit(data, tag))
            .collect())
    }

    fn flush(&mut self) -> Result<Vec<NalUnit>, TransmuxError> {
        Ok(self
            .nal_unit_finder
            .flush()
            .map(|(data, tag)| self.on_nal_unit(data, tag))
            .into_iter()
            .collect())
    }
}

/// Expunge any "Emulation Prevention" bytes from a "Raw Byte
/// Sequence Payload"
pub(crate) fn discard_emulation_prevention_bytes(data: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        if byte == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        res.push(byte);
    }
    res
}

/// Read a sequence parameter set and return some interesting video
/// properties. A sequence parameter set is the H264 metadata that
/// describes the properties of upcoming video frames.
///
/// `data` is the de-escaped RBSP, without the NAL header byte.
pub(crate) fn read_sequence_parameter_set(
    data: &[u8],
) -> Result<NalVideoProperties, ExpGolombError> {
    let mut frame_crop_left_offset = 0;
    let mut frame_crop_right_offset = 0;
    let mut frame_crop_top_offset = 0;
    let mut frame_crop_bottom_offset = 0;
    let mut sar_ratio = (1, 1);

    let mut exp_golomb_decoder = ExpGolomb::new(data);
    let profile_idc = exp_golomb_decoder.read_unsigned_byte()?;
    // constraint_set[0-5]_flag
    let profile_compatibility = exp_golomb_decoder.read_unsigned_byte()?;
    let level_idc = exp_golomb_decoder.read_unsigned_byte()?; // level_idc u(8)
    exp_golomb_decoder.skip_unsigned()?; // seq_parameter_set_id

    // some profiles have more optional data we don't need
    if PROFILES_WITH_OPTIONAL_SPS_DATA.contains(&profile_idc) {
        let chroma_format_idc = exp_golomb_decoder.read_unsigned()?;
        if chroma_format_idc == 3 {
            exp_golomb_decoder.skip_bits(1)?; // separate_colour_plane_flag
        }
        exp_golomb_decoder.skip_unsigned()?; // bit_depth_luma_minus8
        exp_golomb_decoder.skip_unsigned()?; // bit_depth_chroma_minus8
        exp_golomb_decoder.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if exp_golomb_decoder.read_boolean()? {
            // seq_scaling_matrix_present_flag
            let scaling_list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..scaling_list_count {
                if exp_golomb_decoder.read_boolean()? {
                    // seq_scaling_list_present_flag[ i ]
                    if i < 6 {
                        skip_scaling_list(16, &mut exp_golomb_decoder)?;
                    } else {
                        skip_scaling_list(64, &mut exp_golomb_decoder)?;
                    }
                }
            }
        }
    }

    exp_golomb_decoder.skip_unsigned()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = exp_golomb_decoder.read_unsigned()?;

    if pic_order_cnt_type == 0 {
        exp_golomb_decoder.skip_unsigned()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        exp_golomb_decoder.skip_bits(1)?; // delta_pic_order_always_zero_flag
        exp_golomb_decoder.skip_signed()?; // offset_for_non_ref_pic
        exp_golomb_decoder.skip_signed()?; // offset_for_top_to_bottom_field
        let num_ref_frames_in_pic_order_cnt_cycle = exp_golomb_decoder.read_unsigned()?;
        for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
            exp_golomb_decoder.skip_signed()?; // offset_for_ref_frame[ i ]
        }
    }

    exp_golomb_decoder.skip_unsigned()?; // max_num_ref_frames
    exp_golomb_decoder.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus_1 = exp_golomb_decoder.read_unsigned()?;
    let pic_height_in_map_units_minus_1 = exp_golomb_decoder.read_unsigned()?;

    let frame_mbs_only_flag = exp_golomb_decoder.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        exp_golomb_decoder.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }

    exp_golomb_decoder.skip_bits(1)?; // direct_8x8_inference_flag
    if exp_golomb_decoder.read_boolean()? {
        // frame_cropping_flag
        frame_crop_left_offset = exp_golomb_decoder.read_unsigned()?;
        frame_crop_right_offset = exp_golomb_decoder.read_unsigned()?;
        frame_crop_top_offset = exp_golomb_decoder.read_unsigned()?;
        frame_crop_bottom_offset = exp_golomb_decoder.read_unsigned()?;
    }

    if exp_golomb_decoder.read_boolean()? {
        // vui_parameters_present_flag
        if exp_golomb_decoder.read_boolean()? {
            // aspect_ratio_info_present_flag
            let aspect_ratio_idc = exp_golomb_decoder.read_unsigned_byte()?;
            sar_ratio = match aspect_ratio_idc {
                1 => (1, 1),
                2 => (12, 11),
                3 => (10, 11),
                4 => (16, 11),
                5 => (40, 33),
                6 => (24, 11),
                7 => (20, 11),
                8 => (32, 11),
                9 => (80, 33),
                10 => (18, 11),
                11 => (15, 11),
                12 => (64, 33),
                13 => (160, 99),
                14 => (4, 3),
                15 => (3, 2),
                16 => (2, 1),
                255 => (
                    exp_golomb_decoder.read_bits(16)? as u16,
                    exp_golomb_decoder.read_bits(16)? as u16,
                ),
                _ => (1, 1),
            }
        }
    }

    let width = pic_width_in_mbs_minus_1
        .saturating_add(1)
        .saturating_mul(16)
        .saturating_sub(frame_crop_left_offset.saturating_mul(2))
        .saturating_sub(frame_crop_right_offset.saturating_mul(2));

    let height = (2 - frame_mbs_only_flag)
        .saturating_mul(pic_height_in_map_units_minus_1.saturating_add(1))
        .saturating_mul(16)
        .saturating_sub(frame_crop_top_offset.saturating_mul(2))
        .saturating_sub(frame_crop_bottom_offset.saturating_mul(2));

    Ok(NalVideoProperties {
        profile_idc,
        level_idc,
        profile_compatibility,
        width,
        height,
        sar_ratio,
    })
}

/// Advance the ExpGolomb decoder past a scaling list. The scaling
/// list is optionally transmitted as part of a sequence parameter
/// set and is not relevant to transmuxing.
/// @see Recommendation ITU-T H.264, Section 7.3.2.1.1.1
fn skip_scaling_list(count: usize, exp_golomb_decoder: &mut ExpGolomb) -> Result<(), ExpGolombError> {
    let mut last_scale = 8;
    let mut next_scale = 8;

    for _ in 0..count {
        if next_scale != 0 {
            let delta_scale = exp_golomb_decoder.read_signed()?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }

        last_scale = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
    }
    Ok(())
}
