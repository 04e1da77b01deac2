use super::{
    clock_utils::RolloverHandler,
    transport_packet_parser::{
        ParsedTsPacket, PesPacketInfo, Pid, ProgramMapTable, ADTS_STREAM_TYPE, H264_STREAM_TYPE,
        METADATA_STREAM_TYPE,
    },
    StreamStage, TransmuxError,
};
use crate::Logger;

/// A complete PES packet, with its header parsed.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct MediaElementaryPacket {
    pub(crate) media_type: ElementaryMediaType,
    pub(crate) track_id: Pid,
    /// PES payload, without the PES header.
    pub(crate) data: Vec<u8>,
    pub(crate) packet_length: usize,
    pub(crate) data_alignment_indicator: bool,
    /// Presentation timestamp, in the 90kHz clock, unwrapped from the 33-bit rollover.
    pub(crate) pts: Option<i64>,
    /// Decode timestamp, in the 90kHz clock, unwrapped from the 33-bit rollover.
    pub(crate) dts: Option<i64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ElementaryMediaType {
    Video,
    Audio,
    TimedMetadata,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ElementaryTrack {
    pub(crate) id: Pid,
    pub(crate) codec: &'static str,
    pub(crate) media_type: ElementaryMediaType,
}

/// Tracks announced by the last Program Map Table.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ElementaryTracksInfo {
    pub(crate) tracks: Vec<ElementaryTrack>,
    /// Dispatch type of the in-band metadata track, if one exists.
    pub(crate) metadata_dispatch_type: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElementaryPacket {
    Metadata(ElementaryTracksInfo),
    Media(MediaElementaryPacket),
}

#[derive(Debug, Default)]
struct ElementaryTrackInfo {
    data: Vec<PesPacketInfo>,
    size: usize,
}

/// Reassembles PES packets from the transport stream packets carrying them.
pub(crate) struct ElementaryPacketParser {
    segment_had_pmt: bool,
    audio: ElementaryTrackInfo,
    video: ElementaryTrackInfo,
    timed_metadata: ElementaryTrackInfo,
    program_map_table: Option<ProgramMapTable>,
    video_rollover: RolloverHandler,
    audio_rollover: RolloverHandler,
    metadata_rollover: RolloverHandler,
}

impl ElementaryPacketParser {
    pub(crate) fn new() -> Self {
        Self {
            segment_had_pmt: false,
            audio: ElementaryTrackInfo::default(),
            video: ElementaryTrackInfo::default(),
            timed_metadata: ElementaryTrackInfo::default(),
            program_map_table: None,
            video_rollover: RolloverHandler::new(),
            audio_rollover: RolloverHandler::new(),
            metadata_rollover: RolloverHandler::new(),
        }
    }

    /// Identifies M2TS packet types and parses PES packets using metadata
    /// parsed from the PMT
    fn read_next_packet(&mut self, data: ParsedTsPacket) -> Option<ElementaryPacket> {
        match data {
            ParsedTsPacket::Pat(_) => {
                // we have to wait for the PMT to arrive as well before we
                // have any meaningful metadata
                None
            }
            ParsedTsPacket::Pes(info) => {
                let media_type = match info.stream_type {
                    H264_STREAM_TYPE => ElementaryMediaType::Video,
                    ADTS_STREAM_TYPE => ElementaryMediaType::Audio,
                    METADATA_STREAM_TYPE => ElementaryMediaType::TimedMetadata,
                    _ => {
                        // ignore unknown stream types
                        return None;
                    }
                };

                // if a new packet is starting, we can flush the completed
                // packet
                let res = if info.payload_unit_start_indicator {
                    self.flush_stream(media_type, true)
                } else {
                    None
                };

                // buffer this fragment until we are sure we've received the
                // complete payload
                let stream = self.track_info_mut(media_type);
                stream.size += info.data.len();
                stream.data.push(info);
                res
            }
            ParsedTsPacket::Pmt(info) => {
                let tracks = tracks_from_program_map_table(&info.program_map_table);
                self.program_map_table = Some(info.program_map_table);
                self.segment_had_pmt = true;
                Some(ElementaryPacket::Metadata(tracks))
            }
        }
    }

    /// Drop every buffered data and forget timestamp references.
    pub(crate) fn reset(&mut self) {
        self.video = ElementaryTrackInfo::default();
        self.audio = ElementaryTrackInfo::default();
        self.timed_metadata = ElementaryTrackInfo::default();
        self.video_rollover.reset();
        self.audio_rollover.reset();
        self.metadata_rollover.reset();
    }

    /// Pass completely parsed PES packets.
    fn flush_stream(
        &mut self,
        media_type: ElementaryMediaType,
        force_flush: bool,
    ) -> Option<ElementaryPacket> {
        let stream = self.track_info_mut(media_type);

        // do nothing if there is not enough buffered data for a complete
        // PES header
        if stream.data.is_empty() || stream.size < 9 {
            return None;
        }
        let track_id = stream.data[0].pid;

        // reassemble the packet
        let mut packet_data = Vec::with_capacity(stream.size);
        stream.data.iter().for_each(|fragment| {
            packet_data.extend_from_slice(&fragment.data);
        });
        let stream_size = stream.size;

        let parsed = parse_pes(&packet_data, media_type, track_id);

        // non-video PES packets MUST have a non-zero PES_packet_length
        // check that there is enough stream data to fill the packet
        let packet_flushable = match &parsed {
            Ok(packet) => {
                media_type == ElementaryMediaType::Video || packet.packet_length <= stream_size
            }
            Err(_) => false,
        };

        // flush pending packets if the conditions are right
        if force_flush || packet_flushable {
            *self.track_info_mut(media_type) = ElementaryTrackInfo::default();
        }

        match parsed {
            Err(err) => {
                Logger::lazy_warn(&|| format!("TS: dropping PES packet on pid {}: {}", track_id, err));
                None
            }
            // only emit packets that are complete. this is to avoid assembling
            // incomplete PES packets due to poor segmentation
            Ok(mut packet) if packet_flushable => {
                if let (Some(pts), Some(dts)) = (packet.pts, packet.dts) {
                    let (pts, dts) = self.rollover_handler(media_type).process(pts, dts);
                    packet.pts = Some(pts);
                    packet.dts = Some(dts);
                }
                Some(ElementaryPacket::Media(packet))
            }
            Ok(_) => None,
        }
    }

    /// Flush any remaining input. Video PES packets may be of variable
    /// length. Normally, the start of a new video packet can trigger the
    /// finalization of the previous packet. That is not possible if no
    /// more video is forthcoming, however. In that case, some other
    /// mechanism (like the end of the file) has to be employed. When it is
    /// clear that no additional data is forthcoming, calling this method
    /// will flush the buffered packets.
    fn flush_streams(&mut self) -> Vec<ElementaryPacket> {
        [
            ElementaryMediaType::Video,
            ElementaryMediaType::Audio,
            ElementaryMediaType::TimedMetadata,
        ]
        .into_iter()
        .filter_map(|media_type| self.flush_stream(media_type, false))
        .collect()
    }

    fn track_info_mut(&mut self, media_type: ElementaryMediaType) -> &mut ElementaryTrackInfo {
        match media_type {
            ElementaryMediaType::Video => &mut self.video,
            ElementaryMediaType::Audio => &mut self.audio,
            ElementaryMediaType::TimedMetadata => &mut self.timed_metadata,
        }
    }

    fn rollover_handler(&mut self, media_type: ElementaryMediaType) -> &mut RolloverHandler {
        match media_type {
            ElementaryMediaType::Video => &mut self.video_rollover,
            ElementaryMediaType::Audio => &mut self.audio_rollover,
            ElementaryMediaType::TimedMetadata => &mut self.metadata_rollover,
        }
    }
}

impl StreamStage for ElementaryPacketParser {
    type Input = ParsedTsPacket;
    type Output = ElementaryPacket;

    fn push(&mut self, input: ParsedTsPacket) -> Result<Vec<ElementaryPacket>, TransmuxError> {
        Ok(self.read_next_packet(input).into_iter().collect())
    }

    fn flush(&mut self) -> Result<Vec<ElementaryPacket>, TransmuxError> {
        let mut res = vec![];
        // if on flush we haven't had a pmt emitted and we have a
        // pmt to emit. emit the pmt so that we trigger a trackinfo downstream.
        if !self.segment_had_pmt {
            if let Some(program_map_table) = self.program_map_table.as_ref() {
                res.push(ElementaryPacket::Metadata(tracks_from_program_map_table(
                    program_map_table,
                )));
            }
        }
        self.segment_had_pmt = false;
        res.extend(self.flush_streams());
        Ok(res)
    }
}

/// translate audio and video streams to tracks
fn tracks_from_program_map_table(program_map_table: &ProgramMapTable) -> ElementaryTracksInfo {
    let mut tracks = vec![];
    if let Some(id) = program_map_table.video {
        tracks.push(ElementaryTrack {
            id,
            codec: "avc",
            media_type: ElementaryMediaType::Video,
        });
    }
    if let Some(id) = program_map_table.audio {
        tracks.push(ElementaryTrack {
            id,
            codec: "adts",
            media_type: ElementaryMediaType::Audio,
        });
    }
    ElementaryTracksInfo {
        tracks,
        metadata_dispatch_type: program_map_table.metadata_dispatch_type(),
    }
}

/// Read a 33-bit PTS or DTS value starting at `offset`.
///
/// The PTS and DTS are not written out directly. For information
/// on how they are encoded, see
/// http://dvd.sourceforge.net/dvdinfo/pes-hdr.html
fn read_timestamp(payload: &[u8], offset: usize) -> i64 {
    (((payload[offset] & 0x0e) as i64) << 29)
        | ((payload[offset + 1] as i64) << 22)
        | (((payload[offset + 2] & 0xfe) as i64) << 14)
        | ((payload[offset + 3] as i64) << 7)
        | ((payload[offset + 4] as i64) >> 1)
}

fn parse_pes(
    payload: &[u8],
    media_type: ElementaryMediaType,
    track_id: Pid,
) -> Result<MediaElementaryPacket, TransmuxError> {
    let start_prefix =
        ((payload[0] as u32) << 16) | ((payload[1] as u32) << 8) | payload[2] as u32;
    // In certain live streams, the start of a TS fragment has ts packets
    // that are frame data that is continuing from the previous fragment. This
    // is to check that the pes data is the start of a new pes payload
    if start_prefix != 1 {
        return Err(TransmuxError::MissingPesStartCode);
    }

    // get the packet length, this will be 0 for video
    let packet_length = 6 + (((payload[4] as usize) << 8) | payload[5] as usize);

    // find out if this packets starts a new keyframe
    let data_alignment_indicator = (payload[6] & 0x04) != 0;

    // PES packets may be annotated with a PTS value, or a PTS value
    // and a DTS value. Determine what combination of values is
    // available to work with.
    let pts_dts_flags = payload[7];
    let mut pts = None;
    let mut dts = None;
    if pts_dts_flags & 0xc0 != 0 && payload.len() >= 14 {
        pts = Some(read_timestamp(payload, 9));
        dts = pts;
        if pts_dts_flags & 0x40 != 0 && payload.len() >= 19 {
            dts = Some(read_timestamp(payload, 14));
        }
    }

    // the data section starts immediately after the PES header.
    // pes_header_data_length specifies the number of header bytes
    // that follow the last byte of the field.
    let data_start = usize::min(9 + payload[8] as usize, payload.len());
    Ok(MediaElementaryPacket {
        media_type,
        track_id,
        data: payload[data_start..].to_owned(),
        packet_length,
        data_alignment_indicator,
        pts,
        dts,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transmux::transport_packet_parser::PmtPacketInfo;

    fn write_timestamp(marker: u8, ts: i64) -> [u8; 5] {
        [
            marker | (((ts >> 29) & 0x0e) as u8) | 0x01,
            ((ts >> 22) & 0xff) as u8,
            (((ts >> 14) & 0xfe) as u8) | 0x01,
            ((ts >> 7) & 0xff) as u8,
            (((ts << 1) & 0xfe) as u8) | 0x01,
        ]
    }

    /// Build a PES packet. A `packet_length` of 0 is set for video.
    pub(crate) fn pes_packet(
        stream_id: u8,
        pts: Option<i64>,
        dts: Option<i64>,
        data_alignment: bool,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut header_data = vec![];
        let mut flags = 0;
        if let Some(pts) = pts {
            if let Some(dts) = dts {
                flags = 0xc0;
                header_data.extend(write_timestamp(0x30, pts));
                header_data.extend(write_timestamp(0x10, dts));
            } else {
                flags = 0x80;
                header_data.extend(write_timestamp(0x20, pts));
            }
        }
        let packet_length = if stream_id == 0xe0 {
            0
        } else {
            3 + header_data.len() + payload.len()
        };
        let mut pes = vec![
            0x00,
            0x00,
            0x01,
            stream_id,
            (packet_length >> 8) as u8,
            (packet_length & 0xff) as u8,
            0x80 | if data_alignment { 0x04 } else { 0 },
            flags,
            header_data.len() as u8,
        ];
        pes.extend(header_data);
        pes.extend_from_slice(payload);
        pes
    }

    fn pes_info(pid: Pid, stream_type: u8, pusi: bool, data: &[u8]) -> ParsedTsPacket {
        ParsedTsPacket::Pes(PesPacketInfo {
            pid,
            stream_type,
            payload_unit_start_indicator: pusi,
            data: data.to_vec(),
        })
    }

    fn media_packets(packets: Vec<ElementaryPacket>) -> Vec<MediaElementaryPacket> {
        packets
            .into_iter()
            .filter_map(|p| match p {
                ElementaryPacket::Media(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_timestamps_are_decoded() {
        let pes = pes_packet(0xe0, Some(0x1_2345_6789), Some(0x1_2345_0000), true, &[9, 9]);
        let parsed = parse_pes(&pes, ElementaryMediaType::Video, 0x100).unwrap();
        assert_eq!(parsed.pts, Some(0x1_2345_6789));
        assert_eq!(parsed.dts, Some(0x1_2345_0000));
        assert!(parsed.data_alignment_indicator);
        assert_eq!(parsed.data, vec![9, 9]);

        let pes = pes_packet(0xc0, Some(90_000), None, false, &[1]);
        let parsed = parse_pes(&pes, ElementaryMediaType::Audio, 0x101).unwrap();
        assert_eq!(parsed.pts, Some(90_000));
        assert_eq!(parsed.dts, Some(90_000));
        assert_eq!(parsed.packet_length, pes.len());
    }

    #[test]
    fn test_missing_start_code() {
        let data = [0x00, 0x00, 0x02, 0xe0, 0, 0, 0x80, 0, 0];
        assert_eq!(
            parse_pes(&data, ElementaryMediaType::Video, 0x100),
            Err(TransmuxError::MissingPesStartCode)
        );
    }

    #[test]
    fn test_reassembles_packets_across_ts_packets() {
        let mut parser = ElementaryPacketParser::new();
        let pes = pes_packet(0xe0, Some(1000), None, false, &[0xAB; 300]);
        assert!(parser.push(pes_info(0x100, H264_STREAM_TYPE, true, &pes[..150])).unwrap().is_empty());
        assert!(parser.push(pes_info(0x100, H264_STREAM_TYPE, false, &pes[150..])).unwrap().is_empty());

        let next = pes_packet(0xe0, Some(4000), None, false, &[0xCD; 10]);
        let out = media_packets(parser.push(pes_info(0x100, H264_STREAM_TYPE, true, &next)).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pts, Some(1000));
        assert_eq!(out[0].data, vec![0xAB; 300]);

        let out = media_packets(parser.flush().unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pts, Some(4000));
    }

    #[test]
    fn test_incomplete_audio_packet_is_not_flushed() {
        let mut parser = ElementaryPacketParser::new();
        let pes = pes_packet(0xc0, Some(1000), None, false, &[0x11; 200]);
        parser.push(pes_info(0x101, ADTS_STREAM_TYPE, true, &pes[..100])).unwrap();
        assert!(media_packets(parser.flush().unwrap()).is_empty());
        parser.push(pes_info(0x101, ADTS_STREAM_TYPE, false, &pes[100..])).unwrap();
        let out = media_packets(parser.flush().unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 200);
    }

    #[test]
    fn test_pmt_is_reemitted_on_flush() {
        let mut parser = ElementaryPacketParser::new();
        let program_map_table = ProgramMapTable {
            video: Some(0x100),
            audio: Some(0x101),
            ..ProgramMapTable::default()
        };
        let out = parser
            .push(ParsedTsPacket::Pmt(PmtPacketInfo {
                pid: 0x1000,
                program_map_table,
            }))
            .unwrap();
        assert_eq!(out.len(), 1);
        // the PMT was seen in this segment
        assert!(parser.flush().unwrap().is_empty());
        // but not in the next one
        match &parser.flush().unwrap()[0] {
            ElementaryPacket::Metadata(info) => {
                assert_eq!(info.tracks.len(), 2);
                assert_eq!(info.tracks[0].media_type, ElementaryMediaType::Video);
                assert_eq!(info.tracks[1].codec, "adts");
            }
            _ => panic!("expected track metadata"),
        }
    }
}
