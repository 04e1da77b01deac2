//! MPEG-2 Transport Stream demuxing and remuxing into either fragmented MP4
//! or FLV.
//!
//! Data goes through a succession of stages, each implementing
//! `StreamStage`: TS packets are split, then parsed into PES packets, which are
//! finally parsed depending on their media type (H.264 NAL units, AAC frames
//! in ADTS, or ID3 tags). The resulting samples are then given to a muxer.

mod adts;
mod clock_utils;
mod elementary_packet_parser;
mod exp_golomb;
mod flv;
mod fmp4;
mod frame_utils;
mod id3;
mod mp4_segment_generator;
mod nal_unit_producer;
mod track_dts_info;
mod transport_packet_parser;
mod transport_stream_splitter;

use adts::{AdtsFrame, AdtsParser};
use clock_utils::{metadata_ts_to_seconds, video_ts_to_ms};
use elementary_packet_parser::{
    ElementaryMediaType, ElementaryPacket, ElementaryPacketParser, ElementaryTracksInfo,
};
use flv::{flv_header, interleave_tags, FlvAudioTagGenerator, FlvVideoTagGenerator};
use fmp4::{create_init_segment, IsobmffMetadata, MediaType, TrackInfo};
use id3::{Id3Parser, Id3Tag};
use mp4_segment_generator::{Mp4AudioSegmentGenerator, Mp4VideoSegmentGenerator};
use nal_unit_producer::{NalUnit, NalUnitProducer};
use thiserror::Error;
use transport_packet_parser::{ParsedTsPacket, TransportPacketParser};
use transport_stream_splitter::TransportStreamSplitter;

pub(crate) use id3::{Id3Frame, Id3FrameValue};

use crate::Logger;

/// A step of the transmuxing pipeline, receiving data of type `Input` and
/// producing zero or more `Output`.
pub(crate) trait StreamStage {
    type Input;
    type Output;

    /// Give new data to this stage.
    fn push(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, TransmuxError>;

    /// Signal the end of a segment: everything that can be produced with the
    /// data received so far is returned.
    fn flush(&mut self) -> Result<Vec<Self::Output>, TransmuxError>;
}

/// Errors that prevent a segment from being transmuxed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransmuxError {
    #[error("Only a single program per transport stream is supported")]
    MultiplePrograms,
    #[error("Only a single video stream per program is supported")]
    MultipleVideoStreams,
    #[error("Only a single audio stream per program is supported")]
    MultipleAudioStreams,
    #[error("PES packet does not start with a start code")]
    MissingPesStartCode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TransmuxerOptions {
    /// If `true`, timestamps are kept as they are in the source. Otherwise
    /// the first segment is shifted to start at `0`.
    pub(crate) keep_original_timestamps: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TrackType {
    Video,
    Audio,
}

/// Media data for a single track, ready to be pushed to a media buffer.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TrackFragment {
    pub(crate) track_type: TrackType,
    pub(crate) track_id: u32,
    pub(crate) data: Vec<u8>,
}

/// An ID3 tag found in the segment, placed on the media timeline.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MetadataCue {
    /// Position of the cue, in seconds.
    pub(crate) cue_time: f64,
    pub(crate) dispatch_type: Option<String>,
    pub(crate) frames: Vec<Id3Frame>,
    pub(crate) data: Vec<u8>,
}

/// Earliest and latest presentation timestamps found in a segment, per
/// track, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct SegmentPtsInfo {
    pub(crate) video: Option<(f64, f64)>,
    pub(crate) audio: Option<(f64, f64)>,
}

#[derive(Clone, Copy, Debug, Default)]
struct PtsTracker {
    video: Option<(i64, i64)>,
    audio: Option<(i64, i64)>,
}

impl PtsTracker {
    fn extend(range: &mut Option<(i64, i64)>, pts: i64) {
        *range = Some(match *range {
            None => (pts, pts),
            Some((min, max)) => (i64::min(min, pts), i64::max(max, pts)),
        });
    }

    fn record(&mut self, data: &DemuxedData) {
        match data {
            DemuxedData::Nal(nal) => Self::extend(&mut self.video, nal.pts),
            DemuxedData::Aac(frame) => Self::extend(&mut self.audio, frame.pts),
            _ => {}
        }
    }

    fn take(&mut self) -> SegmentPtsInfo {
        let to_ms = |r: Option<(i64, i64)>| {
            r.map(|(min, max)| (video_ts_to_ms(min) as f64, video_ts_to_ms(max) as f64))
        };
        let info = SegmentPtsInfo {
            video: to_ms(self.video),
            audio: to_ms(self.audio),
        };
        *self = Self::default();
        info
    }
}

/// Output of the fragmented MP4 transmuxer for a whole segment.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct TransmuxedSegment {
    /// Only set when the tracks' configuration changed since the last
    /// segment.
    pub(crate) init_segment: Option<Vec<u8>>,
    pub(crate) fragments: Vec<TrackFragment>,
    pub(crate) metadata: Vec<MetadataCue>,
    pub(crate) pts_info: SegmentPtsInfo,
}

impl TransmuxedSegment {
    /// Every buffer to push to a media buffer, in order.
    pub(crate) fn into_buffers(self) -> Vec<Vec<u8>> {
        self.init_segment
            .into_iter()
            .chain(self.fragments.into_iter().map(|f| f.data))
            .collect()
    }
}

/// Output of the FLV transmuxer for a whole segment.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct FlvSegment {
    /// Concatenated FLV tags, each followed by its "previous tag size".
    pub(crate) tags: Vec<u8>,
    pub(crate) metadata: Vec<MetadataCue>,
    pub(crate) pts_info: SegmentPtsInfo,
}

/// Data extracted from the transport stream.
#[derive(Clone, Debug, PartialEq)]
enum DemuxedData {
    Tracks(ElementaryTracksInfo),
    Nal(NalUnit),
    Aac(AdtsFrame),
    Id3(Id3Tag),
}

/// Runs every demuxing stage, from raw TS bytes to elementary samples.
struct TsDemuxer {
    splitter: TransportStreamSplitter,
    packet_parser: TransportPacketParser,
    elementary_parser: ElementaryPacketParser,
    nal_unit_producer: NalUnitProducer,
    adts_parser: AdtsParser,
    id3_parser: Id3Parser,
}

impl TsDemuxer {
    fn new() -> Self {
        Self {
            splitter: TransportStreamSplitter::new(),
            packet_parser: TransportPacketParser::new(),
            elementary_parser: ElementaryPacketParser::new(),
            nal_unit_producer: NalUnitProducer::new(),
            adts_parser: AdtsParser::new(),
            id3_parser: Id3Parser::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<Vec<DemuxedData>, TransmuxError> {
        self.splitter.feed(data);
        let mut demuxed = vec![];
        self.drain_packets(false, &mut demuxed)?;
        Ok(demuxed)
    }

    fn flush(&mut self) -> Result<Vec<DemuxedData>, TransmuxError> {
        let mut demuxed = vec![];
        self.drain_packets(true, &mut demuxed)?;
        for packet in self.elementary_parser.flush()? {
            self.on_elementary_packet(packet, &mut demuxed)?;
        }
        demuxed.extend(self.nal_unit_producer.flush()?.into_iter().map(DemuxedData::Nal));
        demuxed.extend(self.adts_parser.flush()?.into_iter().map(DemuxedData::Aac));
        demuxed.extend(self.id3_parser.flush()?.into_iter().map(DemuxedData::Id3));
        Ok(demuxed)
    }

    fn drain_packets(
        &mut self,
        at_end: bool,
        demuxed: &mut Vec<DemuxedData>,
    ) -> Result<(), TransmuxError> {
        loop {
            let parsed = if let Some(packet) = self.splitter.next_packet() {
                self.packet_parser.parse(packet)?
            } else if at_end {
                match self.splitter.last_packet() {
                    Some(packet) => self.packet_parser.parse(packet)?,
                    None => break,
                }
            } else {
                break;
            };
            match parsed {
                Some(ts_packets) => {
                    for ts_packet in ts_packets {
                        self.on_ts_packet(ts_packet, demuxed)?;
                    }
                }
                None => {
                    Logger::lazy_debug(&|| {
                        String::from("TS: malformed packet, looking for the next sync byte")
                    });
                    self.splitter.reject_last();
                }
            }
        }
        Ok(())
    }

    fn on_ts_packet(
        &mut self,
        ts_packet: ParsedTsPacket,
        demuxed: &mut Vec<DemuxedData>,
    ) -> Result<(), TransmuxError> {
        for packet in self.elementary_parser.push(ts_packet)? {
            self.on_elementary_packet(packet, demuxed)?;
        }
        Ok(())
    }

    fn on_elementary_packet(
        &mut self,
        packet: ElementaryPacket,
        demuxed: &mut Vec<DemuxedData>,
    ) -> Result<(), TransmuxError> {
        match packet {
            ElementaryPacket::Metadata(tracks) => {
                self.id3_parser
                    .set_dispatch_type(tracks.metadata_dispatch_type.clone());
                demuxed.push(DemuxedData::Tracks(tracks));
            }
            ElementaryPacket::Media(media) => match media.media_type {
                ElementaryMediaType::Video => demuxed.extend(
                    self.nal_unit_producer
                        .push(media)?
                        .into_iter()
                        .map(DemuxedData::Nal),
                ),
                ElementaryMediaType::Audio => demuxed.extend(
                    self.adts_parser
                        .push(media)?
                        .into_iter()
                        .map(DemuxedData::Aac),
                ),
                ElementaryMediaType::TimedMetadata => demuxed.extend(
                    self.id3_parser
                        .push(media)?
                        .into_iter()
                        .map(DemuxedData::Id3),
                ),
            },
        }
        Ok(())
    }

    /// Drop all buffered data, e.g. when the next segment is not contiguous
    /// to the last one.
    fn reset(&mut self) {
        self.splitter.reset();
        self.packet_parser.reset();
        self.elementary_parser.reset();
        self.nal_unit_producer.reset();
        self.adts_parser.reset();
        self.id3_parser.reset();
    }
}

fn audio_track_id(tracks: &ElementaryTracksInfo) -> Option<u32> {
    tracks
        .tracks
        .iter()
        .find(|t| t.media_type == ElementaryMediaType::Audio)
        .map(|t| t.id as u32)
}

fn to_metadata_cues(
    tags: Vec<Id3Tag>,
    timeline_start_dts: i64,
    keep_original_timestamps: bool,
) -> Vec<MetadataCue> {
    tags.into_iter()
        .map(|tag| MetadataCue {
            cue_time: metadata_ts_to_seconds(
                tag.pts.unwrap_or(timeline_start_dts),
                timeline_start_dts,
                keep_original_timestamps,
            ),
            dispatch_type: tag.dispatch_type,
            frames: tag.frames,
            data: tag.data,
        })
        .collect()
}

/// Transmux MPEG-2 Transport Stream segments into fragmented MP4.
///
/// Data of a segment can be pushed in any number of chunks, `flush` then
/// returns the whole segment's output.
pub(crate) struct Transmuxer {
    options: TransmuxerOptions,
    demuxer: TsDemuxer,
    video_generator: Mp4VideoSegmentGenerator,
    audio_generator: Mp4AudioSegmentGenerator,
    pending_metadata: Vec<Id3Tag>,
    pts_tracker: PtsTracker,
    /// DTS from which the media timeline starts: the first video DTS, or
    /// the first audio DTS for audio-only content.
    timeline_start_dts: Option<i64>,
    sequence_number: u32,
    /// Tracks described by the last emitted initialization segment.
    last_init_tracks: Option<Vec<TrackInfo>>,
}

impl Transmuxer {
    pub(crate) fn new(options: TransmuxerOptions) -> Self {
        Self {
            options,
            demuxer: TsDemuxer::new(),
            video_generator: Mp4VideoSegmentGenerator::new(),
            audio_generator: Mp4AudioSegmentGenerator::new(),
            pending_metadata: vec![],
            pts_tracker: PtsTracker::default(),
            timeline_start_dts: None,
            sequence_number: 0,
            last_init_tracks: None,
        }
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> Result<(), TransmuxError> {
        let demuxed = self.demuxer.push(data)?;
        demuxed.into_iter().for_each(|d| self.on_demuxed(d));
        Ok(())
    }

    fn on_demuxed(&mut self, data: DemuxedData) {
        self.pts_tracker.record(&data);
        match data {
            DemuxedData::Tracks(tracks) => {
                if let Some(id) = audio_track_id(&tracks) {
                    self.audio_generator.set_track_id(id);
                }
            }
            DemuxedData::Nal(nal) => self.video_generator.push_nal_unit(nal),
            DemuxedData::Aac(frame) => self.audio_generator.push_frame(frame),
            DemuxedData::Id3(tag) => self.pending_metadata.push(tag),
        }
    }

    /// Tracks that will be part of the current segment.
    fn current_tracks(&self) -> Vec<TrackInfo> {
        let mut tracks = vec![];
        if self.video_generator.has_data() {
            if let Some(md) = self.video_generator.metadata() {
                tracks.push(TrackInfo {
                    md: IsobmffMetadata::Video(md),
                    track_id: self.video_generator.track_id(),
                    duration: None,
                });
            }
        }
        if self.audio_generator.has_data() {
            if let Some(md) = self.audio_generator.metadata() {
                tracks.push(TrackInfo {
                    md: IsobmffMetadata::Audio(md.clone()),
                    track_id: self.audio_generator.track_id(),
                    duration: None,
                });
            }
        }
        tracks
    }

    /// Produce the output for all data pushed since the last `flush`.
    pub(crate) fn flush(&mut self) -> Result<TransmuxedSegment, TransmuxError> {
        let demuxed = self.demuxer.flush()?;
        demuxed.into_iter().for_each(|d| self.on_demuxed(d));

        // The video track gives the timeline its origin. Audio starting
        // earlier than it is dropped.
        let video_start_dts = self.video_generator.min_segment_dts();
        if self.timeline_start_dts.is_none() {
            self.timeline_start_dts =
                video_start_dts.or_else(|| self.audio_generator.min_segment_dts());
        }
        if let (Some(_), Some(start)) = (video_start_dts, self.timeline_start_dts) {
            self.audio_generator.trim_frames_before(start);
        }
        let timeline_start_dts = self.timeline_start_dts.unwrap_or(0);
        let keep_original_timestamps = self.options.keep_original_timestamps;

        let tracks = self.current_tracks();
        let init_segment =
            if !tracks.is_empty() && self.last_init_tracks.as_ref() != Some(&tracks) {
                let init = create_init_segment(&tracks);
                self.last_init_tracks = Some(tracks);
                Some(init)
            } else {
                None
            };

        let mut generated = vec![];
        if let Some(fragment) = self.video_generator.generate_fragment(
            self.sequence_number,
            timeline_start_dts,
            keep_original_timestamps,
        ) {
            self.sequence_number += 1;
            generated.push(fragment);
        }
        if let Some(fragment) = self.audio_generator.generate_fragment(
            self.sequence_number,
            timeline_start_dts,
            keep_original_timestamps,
        ) {
            self.sequence_number += 1;
            generated.push(fragment);
        }
        let fragments = generated
            .into_iter()
            .map(|fragment| TrackFragment {
                track_type: match fragment.media_type {
                    MediaType::Video => TrackType::Video,
                    MediaType::Audio => TrackType::Audio,
                },
                track_id: fragment.track_id,
                data: fragment.data,
            })
            .collect();

        let metadata = to_metadata_cues(
            std::mem::take(&mut self.pending_metadata),
            timeline_start_dts,
            keep_original_timestamps,
        );
        Ok(TransmuxedSegment {
            init_segment,
            fragments,
            metadata,
            pts_info: self.pts_tracker.take(),
        })
    }

    /// Forget the timeline, so that the next segment starts a new one.
    pub(crate) fn reset_timeline(&mut self) {
        self.timeline_start_dts = None;
    }

    /// Drop all pending data and state, as if newly created.
    pub(crate) fn reset(&mut self) {
        self.demuxer.reset();
        self.video_generator.reset();
        self.audio_generator.reset();
        self.pending_metadata.clear();
        self.pts_tracker = PtsTracker::default();
        self.timeline_start_dts = None;
        self.last_init_tracks = None;
    }
}

/// Transmux MPEG-2 Transport Stream segments into FLV tags.
pub(crate) struct FlvTransmuxer {
    demuxer: TsDemuxer,
    video_generator: FlvVideoTagGenerator,
    audio_generator: FlvAudioTagGenerator,
    pending_metadata: Vec<Id3Tag>,
    pts_tracker: PtsTracker,
    has_video: bool,
    has_audio: bool,
}

impl FlvTransmuxer {
    pub(crate) fn new() -> Self {
        Self {
            demuxer: TsDemuxer::new(),
            video_generator: FlvVideoTagGenerator::new(),
            audio_generator: FlvAudioTagGenerator::new(),
            pending_metadata: vec![],
            pts_tracker: PtsTracker::default(),
            has_video: false,
            has_audio: false,
        }
    }

    /// The FLV file header, for the tracks announced so far.
    pub(crate) fn header(&self, duration: Option<f64>) -> Vec<u8> {
        flv_header(duration, self.has_audio, self.has_video)
    }

    pub(crate) fn push(&mut self, data: &[u8]) -> Result<(), TransmuxError> {
        let demuxed = self.demuxer.push(data)?;
        demuxed.into_iter().for_each(|d| self.on_demuxed(d));
        Ok(())
    }

    fn on_demuxed(&mut self, data: DemuxedData) {
        self.pts_tracker.record(&data);
        match data {
            DemuxedData::Tracks(tracks) => {
                self.has_video = tracks
                    .tracks
                    .iter()
                    .any(|t| t.media_type == ElementaryMediaType::Video);
                self.has_audio = audio_track_id(&tracks).is_some();
            }
            DemuxedData::Nal(nal) => self.video_generator.push_nal_unit(nal),
            DemuxedData::Aac(frame) => self.audio_generator.push_frame(frame),
            DemuxedData::Id3(tag) => self.pending_metadata.push(tag),
        }
    }

    pub(crate) fn flush(&mut self) -> Result<FlvSegment, TransmuxError> {
        let demuxed = self.demuxer.flush()?;
        demuxed.into_iter().for_each(|d| self.on_demuxed(d));

        let video_tags = if self.video_generator.has_data() {
            self.video_generator.generate_tags()
        } else {
            vec![]
        };
        let audio_tags = if self.audio_generator.has_data() {
            self.audio_generator.generate_tags()
        } else {
            vec![]
        };
        let tags = interleave_tags(video_tags, audio_tags)
            .into_iter()
            .flat_map(|t| t.bytes)
            .collect();
        let metadata = to_metadata_cues(std::mem::take(&mut self.pending_metadata), 0, true);
        Ok(FlvSegment {
            tags,
            metadata,
            pts_info: self.pts_tracker.take(),
        })
    }

    pub(crate) fn reset(&mut self) {
        self.demuxer.reset();
        self.video_generator.reset();
        self.audio_generator.reset();
        self.pending_metadata.clear();
        self.pts_tracker = PtsTracker::default();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use adts::tests::adts_frame;
    use elementary_packet_parser::tests::pes_packet;
    use fmp4::tests::{find_box, parse_boxes};
    use id3::tests::{id3_frame, id3_tag};
    use nal_unit_producer::tests::{pps, sps_720p};
    use transport_packet_parser::tests::{pat_payload, pmt_payload, ts_packet};

    const PMT_PID: u16 = 0x1000;
    const VIDEO_PID: u16 = 0x100;
    const AUDIO_PID: u16 = 0x101;
    const METADATA_PID: u16 = 0x102;

    fn annex_b(nals: &[Vec<u8>]) -> Vec<u8> {
        nals.iter()
            .flat_map(|n| {
                let mut v = vec![0, 0, 0, 1];
                v.extend(n);
                v
            })
            .collect()
    }

    pub(crate) fn sample_stream() -> Vec<u8> {
        stream_with_audio_pts(90_000)
    }

    fn stream_with_audio_pts(audio_pts: i64) -> Vec<u8> {
        let mut ts = ts_packet(0, true, &pat_payload(&[(1, PMT_PID)]));
        ts.extend(ts_packet(
            PMT_PID,
            true,
            &pmt_payload(
                VIDEO_PID,
                &[
                    (0x1b, VIDEO_PID, &[]),
                    (0x0f, AUDIO_PID, &[]),
                    (0x15, METADATA_PID, &[0xab]),
                ],
            ),
        ));
        let first_au = annex_b(&[
            vec![0x09, 0xf0],
            sps_720p(),
            pps(),
            vec![0x65, 0x88, 0x84, 0x21, 0x43],
        ]);
        ts.extend(ts_packet(
            VIDEO_PID,
            true,
            &pes_packet(0xe0, Some(93_000), Some(90_000), true, &first_au),
        ));
        let mut aac = adts_frame(3, 2, &[0x11; 20]);
        aac.extend(adts_frame(3, 2, &[0x22; 20]));
        ts.extend(ts_packet(
            AUDIO_PID,
            true,
            &pes_packet(0xc0, Some(audio_pts), None, true, &aac),
        ));
        let tag = id3_tag(&[id3_frame(b"TXXX", b"\x03key\0value")]);
        ts.extend(ts_packet(
            METADATA_PID,
            true,
            &pes_packet(0xbd, Some(180_000), None, true, &tag),
        ));
        let second_au = annex_b(&[vec![0x09, 0xf0], vec![0x41, 0x9a, 0x02, 0x04]]);
        ts.extend(ts_packet(
            VIDEO_PID,
            true,
            &pes_packet(0xe0, Some(96_000), Some(93_000), true, &second_au),
        ));
        ts
    }

    #[test]
    fn test_transmux_to_fmp4() {
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&sample_stream()).unwrap();
        let segment = transmuxer.flush().unwrap();

        let init = segment.init_segment.expect("an init segment");
        let top: Vec<String> = parse_boxes(&init).into_iter().map(|(n, _)| n).collect();
        assert_eq!(top, vec!["ftyp", "moov"]);
        let moov = find_box(&init, &["moov"]).unwrap();
        let traks = parse_boxes(moov)
            .into_iter()
            .filter(|(n, _)| n == "trak")
            .count();
        assert_eq!(traks, 2);

        assert_eq!(segment.fragments.len(), 2);
        let video = &segment.fragments[0];
        assert_eq!(video.track_type, TrackType::Video);
        assert_eq!(video.track_id, VIDEO_PID as u32);
        let tfdt = find_box(&video.data, &["moof", "traf", "tfdt"]).unwrap();
        assert_eq!(&tfdt[4..12], &0u64.to_be_bytes());
        let trun = find_box(&video.data, &["moof", "traf", "trun"]).unwrap();
        assert_eq!(&trun[4..8], &2u32.to_be_bytes());
        // key frame first
        assert_eq!(trun[20], 0x02);

        let audio = &segment.fragments[1];
        assert_eq!(audio.track_type, TrackType::Audio);
        assert_eq!(audio.track_id, AUDIO_PID as u32);
        let trun = find_box(&audio.data, &["moof", "traf", "trun"]).unwrap();
        assert_eq!(&trun[4..8], &2u32.to_be_bytes());

        assert_eq!(segment.metadata.len(), 1);
        assert_eq!(segment.metadata[0].cue_time, 1.);
        assert_eq!(segment.metadata[0].dispatch_type.as_deref(), Some("15ab"));
    }

    #[test]
    fn test_audio_starting_before_video() {
        // one 48kHz AAC frame (1920 ticks) before the first video DTS
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&stream_with_audio_pts(88_080)).unwrap();
        let segment = transmuxer.flush().unwrap();
        assert_eq!(segment.fragments.len(), 2);

        let video = &segment.fragments[0];
        let tfdt = find_box(&video.data, &["moof", "traf", "tfdt"]).unwrap();
        assert_eq!(&tfdt[4..12], &0u64.to_be_bytes());

        let audio = &segment.fragments[1];
        let tfdt = find_box(&audio.data, &["moof", "traf", "tfdt"]).unwrap();
        assert_eq!(&tfdt[4..12], &0u64.to_be_bytes());
        let trun = find_box(&audio.data, &["moof", "traf", "trun"]).unwrap();
        assert_eq!(&trun[4..8], &1u32.to_be_bytes());
    }

    #[test]
    fn test_pts_info() {
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&sample_stream()).unwrap();
        let segment = transmuxer.flush().unwrap();
        assert_eq!(segment.pts_info.video, Some((1033., 1066.)));
        assert_eq!(segment.pts_info.audio, Some((1000., 1021.)));
        assert_eq!(segment.into_buffers().len(), 3);

        // nothing left for the next segment
        assert_eq!(transmuxer.flush().unwrap().pts_info, SegmentPtsInfo::default());
    }

    #[test]
    fn test_init_segment_only_on_change() {
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&sample_stream()).unwrap();
        assert!(transmuxer.flush().unwrap().init_segment.is_some());
        transmuxer.push(&sample_stream()).unwrap();
        let second = transmuxer.flush().unwrap();
        assert!(second.init_segment.is_none());
        assert_eq!(second.fragments.len(), 2);
    }

    #[test]
    fn test_arbitrary_chunking_gives_same_output() {
        let stream = sample_stream();
        let mut whole = Transmuxer::new(TransmuxerOptions::default());
        whole.push(&stream).unwrap();
        let expected = whole.flush().unwrap();

        for chunk_size in [1, 7, 188, 500] {
            let mut chunked = Transmuxer::new(TransmuxerOptions::default());
            for chunk in stream.chunks(chunk_size) {
                chunked.push(chunk).unwrap();
            }
            assert_eq!(chunked.flush().unwrap(), expected);
        }
    }

    #[test]
    fn test_garbage_before_stream() {
        let mut stream = vec![0x47, 0x00, 0x12, 0x47, 0x33];
        stream.extend(sample_stream());
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&stream).unwrap();
        assert_eq!(transmuxer.flush().unwrap().fragments.len(), 2);
    }

    #[test]
    fn test_multiple_programs_is_an_error() {
        let ts = ts_packet(0, true, &pat_payload(&[(1, 0x1000), (2, 0x1001)]));
        let mut transmuxer = Transmuxer::new(TransmuxerOptions::default());
        transmuxer.push(&ts).unwrap();
        assert_eq!(transmuxer.flush(), Err(TransmuxError::MultiplePrograms));
    }

    #[test]
    fn test_transmux_to_flv() {
        let mut transmuxer = FlvTransmuxer::new();
        transmuxer.push(&sample_stream()).unwrap();
        let segment = transmuxer.flush().unwrap();
        assert_eq!(transmuxer.header(None)[4], 0x05);

        // walk the tags
        let mut types = vec![];
        let mut offset = 0;
        while offset < segment.tags.len() {
            let data_size = u32::from_be_bytes([
                0,
                segment.tags[offset + 1],
                segment.tags[offset + 2],
                segment.tags[offset + 3],
            ]) as usize;
            types.push(segment.tags[offset]);
            offset += 11 + data_size + 4;
        }
        // video metadata, AVC header, key frame, then audio metadata, AAC
        // config and frames, with the last video frame at the end
        assert_eq!(types, vec![0x12, 0x09, 0x09, 0x12, 0x08, 0x08, 0x08, 0x09]);
        assert_eq!(segment.metadata.len(), 1);
        assert_eq!(segment.metadata[0].cue_time, 2.);
    }
}
