use super::{
    adts::AdtsFrame,
    fmp4::{
        create_mdat, create_moof, generate_audio_sample_table, generate_sample_table,
        AudioMetadata, MediaType, TrackFragmentInfo, VideoMetadata,
    },
    frame_utils::{
        concatenate_nal_data, extend_first_key_frame, group_frames_into_gops,
        group_nals_into_frames,
    },
    nal_unit_producer::{NalUnit, NalUnitType},
    track_dts_info::TrackDtsInfo,
};
use crate::Logger;

/// A `moof` + `mdat` pair for a single track.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct GeneratedFragment {
    pub(crate) track_id: u32,
    pub(crate) media_type: MediaType,
    pub(crate) base_media_decode_time: u64,
    pub(crate) sample_count: usize,
    pub(crate) data: Vec<u8>,
}

fn build_fragment(
    media_type: MediaType,
    track_id: u32,
    sequence_number: u32,
    base_media_decode_time: u64,
    samples: &[super::fmp4::SampleInfo],
    mdat_content: Vec<u8>,
) -> GeneratedFragment {
    let moof = create_moof(
        sequence_number,
        &TrackFragmentInfo {
            media_type,
            track_id,
            base_media_decode_time,
            samples,
        },
    );
    let mdat = create_mdat(mdat_content);
    let mut data = Vec::with_capacity(moof.len() + mdat.len());
    data.extend(moof);
    data.extend(mdat);
    GeneratedFragment {
        track_id,
        media_type,
        base_media_decode_time,
        sample_count: samples.len(),
        data,
    }
}

/// Constructs a single-track, ISO BMFF media fragment from H264 data.
pub(crate) struct Mp4VideoSegmentGenerator {
    track_id: u32,
    nal_units: Vec<NalUnit>,
    dts_track_info: TrackDtsInfo,
    sps: Option<(Vec<u8>, super::nal_unit_producer::NalVideoProperties)>,
    pps: Option<Vec<u8>>,
}

impl Mp4VideoSegmentGenerator {
    pub(crate) fn new() -> Self {
        Self {
            track_id: 1,
            nal_units: vec![],
            dts_track_info: TrackDtsInfo::default(),
            sps: None,
            pps: None,
        }
    }

    /// Push new Nal Unit to the `Mp4VideoSegmentGenerator` which will be used to
    /// generate a video fragment once `generate_fragment` is called (once all Nal
    /// Units of a segment have been pushed).
    pub(crate) fn push_nal_unit(&mut self, nal_unit: NalUnit) {
        self.track_id = nal_unit.track_id as u32;
        self.dts_track_info.collect_info(nal_unit.pts, nal_unit.dts);
        match nal_unit.nal_type {
            NalUnitType::Sps => {
                if let Some(config) = &nal_unit.config {
                    self.sps = Some((nal_unit.data.clone(), config.clone()));
                }
            }
            NalUnitType::Pps => self.pps = Some(nal_unit.data.clone()),
            _ => {}
        }
        self.nal_units.push(nal_unit);
    }

    /// Decoding information of the track, known once both an SPS and a PPS
    /// have been encountered.
    pub(crate) fn metadata(&self) -> Option<VideoMetadata> {
        match (&self.sps, &self.pps) {
            (Some((sps, props)), Some(pps)) => Some(VideoMetadata {
                nal_video_properties: props.clone(),
                spss: vec![sps.clone()],
                ppss: vec![pps.clone()],
            }),
            _ => None,
        }
    }

    pub(crate) fn track_id(&self) -> u32 {
        self.track_id
    }

    pub(crate) fn min_segment_dts(&self) -> Option<i64> {
        self.dts_track_info.min_segment_dts()
    }

    pub(crate) fn has_data(&self) -> bool {
        !self.nal_units.is_empty()
    }

    /// Generate ISOBMFF data for the video fragment from the Nal Units pushed
    /// thus far.
    ///
    /// Returns `None` if no fragment could be generated.
    pub(crate) fn generate_fragment(
        &mut self,
        sequence_number: u32,
        timeline_start_dts: i64,
        keep_original_timestamps: bool,
    ) -> Option<GeneratedFragment> {
        let mut nal_units = std::mem::take(&mut self.nal_units);

        // Throw away nalUnits at the start of the byte stream until
        // we find the first AUD
        if let Some(first_aud) = nal_units
            .iter()
            .position(|n| n.nal_type == NalUnitType::AccessUnitDelimiter)
        {
            nal_units.drain(..first_aud);
        }

        // Return early if no video data has been observed
        if nal_units.is_empty() {
            self.reset_stream();
            return None;
        }
        if self.metadata().is_none() {
            Logger::lazy_warn(&|| {
                String::from("TS: no SPS/PPS found yet, dropping video data")
            });
            self.reset_stream();
            return None;
        }

        // Organize the raw nal-units into arrays that represent
        // higher-level constructs such as frames and gops
        // (group-of-pictures)
        let frames = group_nals_into_frames(nal_units);
        let mut gops = group_frames_into_gops(frames);

        // If the first frame of this fragment is not a keyframe we have a
        // problem since MSE requires a leading keyframe. Throw away all the
        // frames until the first keyframe and make the latter cover the
        // disposed time range.
        extend_first_key_frame(&mut gops);

        self.dts_track_info.clear_info();
        gops.frames()
            .for_each(|f| self.dts_track_info.collect_info(f.pts, f.dts));

        // First, we have to build the index from byte locations to
        // samples (that is, frames) in the video data
        let samples = generate_sample_table(&gops);
        let base_media_decode_time = self.dts_track_info.calculate_base_media_decode_time(
            timeline_start_dts,
            keep_original_timestamps,
            None,
        );
        let fragment = build_fragment(
            MediaType::Video,
            self.track_id,
            sequence_number,
            base_media_decode_time,
            &samples,
            concatenate_nal_data(&gops),
        );
        self.reset_stream();
        Some(fragment)
    }

    pub(crate) fn reset_stream(&mut self) {
        self.dts_track_info.clear_info();
        self.nal_units.clear();
    }

    /// Forget everything, including the decoding configuration.
    pub(crate) fn reset(&mut self) {
        self.reset_stream();
        self.sps = None;
        self.pps = None;
    }
}

/// Constructs a single-track, ISO BMFF media fragment from AAC frames.
pub(crate) struct Mp4AudioSegmentGenerator {
    track_id: u32,
    frames: Vec<AdtsFrame>,
    dts_track_info: TrackDtsInfo,
    metadata: Option<AudioMetadata>,
}

impl Mp4AudioSegmentGenerator {
    pub(crate) fn new() -> Self {
        Self {
            track_id: 2,
            frames: vec![],
            dts_track_info: TrackDtsInfo::default(),
            metadata: None,
        }
    }

    pub(crate) fn set_track_id(&mut self, track_id: u32) {
        self.track_id = track_id;
    }

    pub(crate) fn push_frame(&mut self, frame: AdtsFrame) {
        self.dts_track_info.collect_info(frame.pts, frame.dts);
        let metadata = AudioMetadata::from_frame(&frame);
        if self.metadata.as_ref() != Some(&metadata) {
            self.metadata = Some(metadata);
        }
        self.frames.push(frame);
    }

    pub(crate) fn metadata(&self) -> Option<&AudioMetadata> {
        self.metadata.as_ref()
    }

    pub(crate) fn track_id(&self) -> u32 {
        self.track_id
    }

    pub(crate) fn min_segment_dts(&self) -> Option<i64> {
        self.dts_track_info.min_segment_dts()
    }

    pub(crate) fn has_data(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Drop the frames decoded before `earliest_dts`, so audio never starts
    /// before the video track it shares a timeline with.
    pub(crate) fn trim_frames_before(&mut self, earliest_dts: i64) {
        let initial_len = self.frames.len();
        self.frames.retain(|f| f.dts >= earliest_dts);
        if self.frames.len() == initial_len {
            return;
        }
        Logger::lazy_debug(&|| {
            format!(
                "Transmuxer: dropped {} audio frame(s) before the video start",
                initial_len - self.frames.len()
            )
        });
        self.dts_track_info.clear_info();
        for frame in &self.frames {
            self.dts_track_info.collect_info(frame.pts, frame.dts);
        }
    }

    pub(crate) fn generate_fragment(
        &mut self,
        sequence_number: u32,
        timeline_start_dts: i64,
        keep_original_timestamps: bool,
    ) -> Option<GeneratedFragment> {
        let frames = std::mem::take(&mut self.frames);
        let sample_rate = self.metadata.as_ref().map(|m| m.sample_rate)?;
        if frames.is_empty() {
            self.dts_track_info.clear_info();
            return None;
        }
        let samples = generate_audio_sample_table(&frames);
        let base_media_decode_time = self.dts_track_info.calculate_base_media_decode_time(
            timeline_start_dts,
            keep_original_timestamps,
            Some(sample_rate),
        );
        let mdat_content = frames.into_iter().flat_map(|f| f.data).collect();
        let fragment = build_fragment(
            MediaType::Audio,
            self.track_id,
            sequence_number,
            base_media_decode_time,
            &samples,
            mdat_content,
        );
        self.dts_track_info.clear_info();
        Some(fragment)
    }

    pub(crate) fn reset(&mut self) {
        self.frames.clear();
        self.dts_track_info.clear_info();
        self.metadata = None;
    }
}
