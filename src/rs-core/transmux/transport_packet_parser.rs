use super::{
    transport_stream_splitter::{MP2T_PACKET_LENGTH, SYNC_BYTE},
    TransmuxError,
};
use crate::Logger;

pub(crate) const H264_STREAM_TYPE: u8 = 0x1b;
pub(crate) const ADTS_STREAM_TYPE: u8 = 0x0f;
pub(crate) const METADATA_STREAM_TYPE: u8 = 0x15;

const PAT_PID: Pid = 0x0000;
/// Service Description Table, not needed here.
const SDT_PID: Pid = 0x0011;
const NULL_PID: Pid = 0x1fff;

/// Maximum number of packets kept while waiting for a PMT.
const MAX_PACKETS_WAITING_FOR_PMT: usize = 2048;

// PIDs are 13 bits
pub(crate) type Pid = u16;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PatPacketInfo {
    pub(crate) section_number: u8,
    pub(crate) last_section_number: u8,
    pub(crate) pmt_pid: Pid,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PmtPacketInfo {
    pub(crate) pid: Pid,
    pub(crate) program_map_table: ProgramMapTable,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PesPacketInfo {
    pub(crate) pid: Pid,
    pub(crate) stream_type: u8,
    pub(crate) payload_unit_start_indicator: bool,
    pub(crate) data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ProgramMapTable {
    /// PID for the video stream
    pub(crate) video: Option<Pid>,
    /// PID for the audio stream
    pub(crate) audio: Option<Pid>,
    /// map pid to stream type for metadata streams
    pub(crate) timed_metadata: Vec<(Pid, u8)>,
    /// PID carrying the program clock reference
    pub(crate) pcr_pid: Option<Pid>,
    /// Raw ES descriptor bytes announced for the metadata stream.
    pub(crate) metadata_descriptor: Vec<u8>,
}

impl ProgramMapTable {
    fn stream_type_for(&self, pid: Pid) -> Option<u8> {
        if Some(pid) == self.video {
            Some(H264_STREAM_TYPE)
        } else if Some(pid) == self.audio {
            Some(ADTS_STREAM_TYPE)
        } else {
            self.timed_metadata
                .iter()
                .find(|t| t.0 == pid)
                .map(|t| t.1)
        }
    }

    /// In-band metadata track dispatch type: "15" followed by the hex
    /// representation of the metadata descriptor.
    pub(crate) fn metadata_dispatch_type(&self) -> Option<String> {
        if self.timed_metadata.is_empty() {
            return None;
        }
        let mut dispatch_type = format!("{:02x}", METADATA_STREAM_TYPE);
        for byte in &self.metadata_descriptor {
            dispatch_type.push_str(&format!("{:02x}", byte));
        }
        Some(dispatch_type)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ParsedTsPacket {
    Pat(PatPacketInfo),
    Pmt(PmtPacketInfo),
    Pes(PesPacketInfo),
}

/// A packet received before the PMT, with the offset of its payload.
struct WaitingPacket {
    packet: Vec<u8>,
    offset: usize,
    pid: Pid,
    payload_unit_start_indicator: bool,
}

/// Accepts an MP2T Transport packet and parses it into legible
/// information.
pub(crate) struct TransportPacketParser {
    packets_waiting_for_pmt: Vec<WaitingPacket>,
    program_map_table: Option<ProgramMapTable>,
    pmt_pid: Option<Pid>,
    network_pid: Option<Pid>,
}

impl TransportPacketParser {
    pub(crate) fn new() -> Self {
        Self {
            packets_waiting_for_pmt: vec![],
            program_map_table: None,
            pmt_pid: None,
            network_pid: None,
        }
    }

    pub(crate) fn program_map_table(&self) -> Option<&ProgramMapTable> {
        self.program_map_table.as_ref()
    }

    /// Parse a new MP2T Transport packet.
    ///
    /// Returns `Ok(None)` if the packet is malformed, in which case the caller
    /// should try to realign on the next sync byte.
    pub(crate) fn parse(
        &mut self,
        packet: &[u8],
    ) -> Result<Option<Vec<ParsedTsPacket>>, TransmuxError> {
        if packet.len() != MP2T_PACKET_LENGTH || packet[0] != SYNC_BYTE {
            return Ok(None);
        }

        let mut offset: usize = 4;
        let payload_unit_start_indicator = packet[1] & 0x40 != 0;

        // pid is a 13-bit field starting at the last bit of packet[1]
        let pid = (((packet[1] & 0x1f) as u16) << 8) | packet[2] as u16;

        // if an adaption field is present, its length is specified by the
        // fifth byte of the TS packet header. The adaptation field is
        // used to add stuffing to PES packets that don't fill a complete
        // TS packet, and to specify some forms of timing and control data
        // that we do not currently use.
        if (packet[3] & 0x30) >> 4 > 0x01 {
            offset += packet[offset] as usize + 1;
        }

        if offset > packet.len() {
            return Ok(None);
        }
        if offset == packet.len() {
            return Ok(Some(vec![]));
        }

        // parse the rest of the packet based on the type
        if pid == PAT_PID {
            let parsed = self.parse_psi(&packet[offset..], pid, payload_unit_start_indicator)?;
            Ok(Some(parsed.into_iter().collect()))
        } else if Some(pid) == self.pmt_pid {
            let parsed = match self.parse_psi(&packet[offset..], pid, payload_unit_start_indicator)?
            {
                Some(parsed) => parsed,
                None => return Ok(Some(vec![])),
            };
            let mut ret = vec![parsed];

            // if there are any packets waiting for a PMT to be found, process them now
            let waiting = std::mem::take(&mut self.packets_waiting_for_pmt);
            for w in waiting {
                if let Some(pes) =
                    self.process_pes(&w.packet, w.offset, w.pid, w.payload_unit_start_indicator)
                {
                    ret.push(pes);
                }
            }
            Ok(Some(ret))
        } else if self
            .program_map_table
            .as_ref()
            .map_or(false, |pmt| pmt.stream_type_for(pid).is_some())
        {
            Ok(Some(
                self.process_pes(packet, offset, pid, payload_unit_start_indicator)
                    .into_iter()
                    .collect(),
            ))
        } else if self.is_ignored_pid(pid) {
            Ok(Some(vec![]))
        } else if self.program_map_table.is_none() {
            // When we have not seen a PMT yet, defer further processing of PES packets until one
            // has been parsed
            if self.packets_waiting_for_pmt.len() >= MAX_PACKETS_WAITING_FOR_PMT {
                Logger::lazy_warn(&|| {
                    format!(
                        "TS: no PMT after {} packets, dropping them",
                        self.packets_waiting_for_pmt.len()
                    )
                });
                self.packets_waiting_for_pmt.clear();
            }
            self.packets_waiting_for_pmt.push(WaitingPacket {
                packet: packet.to_owned(),
                offset,
                pid,
                payload_unit_start_indicator,
            });
            Ok(Some(vec![]))
        } else {
            Logger::lazy_debug(&|| format!("TS: ignoring packet with unknown pid {}", pid));
            Ok(Some(vec![]))
        }
    }

    pub(crate) fn reset(&mut self) {
        self.packets_waiting_for_pmt.clear();
        self.program_map_table = None;
        self.pmt_pid = None;
        self.network_pid = None;
    }

    fn is_ignored_pid(&self, pid: Pid) -> bool {
        pid == SDT_PID
            || pid == NULL_PID
            || Some(pid) == self.network_pid
            || self.program_map_table.as_ref().and_then(|p| p.pcr_pid) == Some(pid)
    }

    fn parse_psi(
        &mut self,
        payload: &[u8],
        pid: Pid,
        payload_unit_start_indicator: bool,
    ) -> Result<Option<ParsedTsPacket>, TransmuxError> {
        if payload.is_empty() {
            return Ok(None);
        }
        let mut offset = 0;

        // PSI packets may be split into multiple sections and those
        // sections may be split into multiple packets. If a PSI
        // section starts in this packet, the payload_unit_start_indicator
        // will be true and the first byte of the payload will indicate
        // the offset from the current position to the start of the
        // section.
        if payload_unit_start_indicator {
            offset += (payload[0] as usize) + 1;
        }

        if offset >= payload.len() {
            Ok(None)
        } else if pid == PAT_PID {
            self.parse_pat(&payload[offset..])
        } else {
            self.parse_pmt(&payload[offset..], pid)
        }
    }

    fn parse_pat(&mut self, payload: &[u8]) -> Result<Option<ParsedTsPacket>, TransmuxError> {
        if payload.len() < 12 {
            return Ok(None);
        }
        let section_len = (((payload[1] & 0x0f) as usize) << 8) | payload[2] as usize;
        // program entries go from the end of the PSI header to the CRC
        let table_end = usize::min(3 + section_len.saturating_sub(4), payload.len());

        let mut pmt_pid = None;
        let mut offset = 8;
        while offset + 4 <= table_end {
            let program_number = ((payload[offset] as u16) << 8) | payload[offset + 1] as u16;
            let entry_pid =
                (((payload[offset + 2] & 0x1f) as u16) << 8) | payload[offset + 3] as u16;
            if program_number == 0 {
                self.network_pid = Some(entry_pid);
            } else {
                match pmt_pid {
                    Some(p) if p != entry_pid => return Err(TransmuxError::MultiplePrograms),
                    _ => pmt_pid = Some(entry_pid),
                }
            }
            offset += 4;
        }

        let pmt_pid = match pmt_pid {
            Some(pmt_pid) => pmt_pid,
            None => return Ok(None),
        };
        if let Some(previous) = self.pmt_pid {
            if previous != pmt_pid {
                return Err(TransmuxError::MultiplePrograms);
            }
        }
        self.pmt_pid = Some(pmt_pid);
        Ok(Some(ParsedTsPacket::Pat(PatPacketInfo {
            section_number: payload[6],
            last_section_number: payload[7],
            pmt_pid,
        })))
    }

    /// Parses out the relevant fields of a Program Map Table (PMT).
    ///
    /// - payload - The PMT-specific portion of an MP2T
    /// packet. The first byte in this array should be the table_id
    /// field.
    fn parse_pmt(
        &mut self,
        payload: &[u8],
        pid: Pid,
    ) -> Result<Option<ParsedTsPacket>, TransmuxError> {
        if payload.len() < 12 || payload[0] != 0x02 {
            return Ok(None);
        }

        // PMTs can be sent ahead of the time when they should actually
        // take effect. We don't believe this should ever be the case
        // for HLS but we'll ignore "forward" PMT declarations if we see
        // them. Future PMT declarations have the current_next_indicator
        // set to zero.
        if payload[5] & 0x01 == 0 {
            return Ok(None);
        }

        let mut pmt = ProgramMapTable {
            pcr_pid: Some((((payload[8] & 0x1f) as u16) << 8) | payload[9] as u16),
            ..ProgramMapTable::default()
        };

        // the mapping table ends at the end of the current section
        let section_len = (((payload[1] & 0x0f) as usize) << 8) | payload[2] as usize;
        let table_end = usize::min(3 + section_len.saturating_sub(4), payload.len());

        // to determine where the table is, we have to figure out how
        // long the program info descriptors are
        let program_info_len = (((payload[10] & 0x0f) as usize) << 8) | payload[11] as usize;

        // advance the offset to the first entry in the mapping table
        let mut offset = 12 + program_info_len;
        while offset + 5 <= table_end {
            let stream_type = payload[offset];
            let inner_pid =
                (((payload[offset + 1] & 0x1f) as u16) << 8) | payload[offset + 2] as u16;
            let es_info_len =
                (((payload[offset + 3] & 0x0f) as usize) << 8) | payload[offset + 4] as usize;

            // only a single elementary pid for audio and video stream types
            match stream_type {
                H264_STREAM_TYPE => match pmt.video {
                    Some(video) if video != inner_pid => {
                        return Err(TransmuxError::MultipleVideoStreams)
                    }
                    _ => pmt.video = Some(inner_pid),
                },
                ADTS_STREAM_TYPE => match pmt.audio {
                    Some(audio) if audio != inner_pid => {
                        return Err(TransmuxError::MultipleAudioStreams)
                    }
                    _ => pmt.audio = Some(inner_pid),
                },
                METADATA_STREAM_TYPE => {
                    pmt.timed_metadata.push((inner_pid, stream_type));
                    let desc_start = usize::min(offset + 5, payload.len());
                    let desc_end = usize::min(desc_start + es_info_len, payload.len());
                    pmt.metadata_descriptor = payload[desc_start..desc_end].to_vec();
                }
                _ => {
                    Logger::lazy_debug(&|| {
                        format!("TS: ignoring stream type {} on pid {}", stream_type, inner_pid)
                    });
                }
            }

            // move to the next table entry
            // skip past the elementary stream descriptors, if present
            offset += es_info_len + 5;
        }

        self.program_map_table = Some(pmt.clone());
        Ok(Some(ParsedTsPacket::Pmt(PmtPacketInfo {
            pid,
            program_map_table: pmt,
        })))
    }

    fn process_pes(
        &self,
        packet: &[u8],
        offset: usize,
        pid: Pid,
        payload_unit_start_indicator: bool,
    ) -> Option<ParsedTsPacket> {
        let pmt = self.program_map_table.as_ref()?;
        match pmt.stream_type_for(pid) {
            Some(stream_type) => Some(ParsedTsPacket::Pes(PesPacketInfo {
                pid,
                stream_type,
                payload_unit_start_indicator,
                data: packet[offset..].to_owned(),
            })),
            None => {
                if !self.is_ignored_pid(pid) {
                    Logger::lazy_debug(&|| format!("TS: ignoring packet with unknown pid {}", pid));
                }
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a TS packet carrying `payload`, padded with an adaptation field
    /// when the payload does not fill the whole packet.
    pub(crate) fn ts_packet(pid: Pid, pusi: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![
            SYNC_BYTE,
            ((pid >> 8) as u8 & 0x1f) | if pusi { 0x40 } else { 0 },
            (pid & 0xff) as u8,
        ];
        let free = MP2T_PACKET_LENGTH - 4;
        assert!(payload.len() <= free);
        if payload.len() == free {
            packet.push(0x10);
        } else {
            // adaptation field + payload
            packet.push(0x30);
            let stuffing = free - payload.len() - 1;
            packet.push(stuffing as u8);
            if stuffing > 0 {
                packet.push(0x00);
                packet.extend(std::iter::repeat(0xff).take(stuffing - 1));
            }
        }
        packet.extend_from_slice(payload);
        packet
    }

    /// PAT section announcing the given programs, with its pointer field.
    pub(crate) fn pat_payload(programs: &[(u16, Pid)]) -> Vec<u8> {
        let section_len = 5 + 4 * programs.len() + 4;
        let mut p = vec![
            0x00, // pointer field
            0x00, // table id
            0xb0 | ((section_len >> 8) as u8 & 0x0f),
            (section_len & 0xff) as u8,
            0x00,
            0x01,
            0xc1,
            0x00,
            0x00,
        ];
        for (program, pid) in programs {
            p.extend([
                (program >> 8) as u8,
                (program & 0xff) as u8,
                0xe0 | (pid >> 8) as u8,
                (pid & 0xff) as u8,
            ]);
        }
        p.extend([0, 0, 0, 0]); // CRC, not checked
        p
    }

    /// PMT section, with its pointer field, for the given `(stream_type, pid, descriptor)`.
    pub(crate) fn pmt_payload(pcr_pid: Pid, streams: &[(u8, Pid, &[u8])]) -> Vec<u8> {
        let streams_len: usize = streams.iter().map(|s| 5 + s.2.len()).sum();
        let section_len = 9 + streams_len + 4;
        let mut p = vec![
            0x00, // pointer field
            0x02,
            0xb0 | ((section_len >> 8) as u8 & 0x0f),
            (section_len & 0xff) as u8,
            0x00,
            0x01,
            0xc1, // current_next_indicator set
            0x00,
            0x00,
            0xe0 | (pcr_pid >> 8) as u8,
            (pcr_pid & 0xff) as u8,
            0xf0,
            0x00,
        ];
        for (stream_type, pid, desc) in streams {
            p.extend([
                *stream_type,
                0xe0 | (pid >> 8) as u8,
                (pid & 0xff) as u8,
                0xf0 | (desc.len() >> 8) as u8,
                (desc.len() & 0xff) as u8,
            ]);
            p.extend_from_slice(desc);
        }
        p.extend([0, 0, 0, 0]);
        p
    }

    fn parse_ok(parser: &mut TransportPacketParser, packet: &[u8]) -> Vec<ParsedTsPacket> {
        parser.parse(packet).unwrap().unwrap()
    }

    #[test]
    fn test_parse_pat_and_pmt() {
        let mut parser = TransportPacketParser::new();
        let pat = ts_packet(0, true, &pat_payload(&[(0, 0x10), (1, 0x1000)]));
        let parsed = parse_ok(&mut parser, &pat);
        assert_eq!(
            parsed,
            vec![ParsedTsPacket::Pat(PatPacketInfo {
                section_number: 0,
                last_section_number: 0,
                pmt_pid: 0x1000,
            })]
        );

        let pmt = ts_packet(
            0x1000,
            true,
            &pmt_payload(
                0x100,
                &[
                    (H264_STREAM_TYPE, 0x100, &[]),
                    (ADTS_STREAM_TYPE, 0x101, &[]),
                    (METADATA_STREAM_TYPE, 0x102, &[0x25, 0x0f]),
                ],
            ),
        );
        let parsed = parse_ok(&mut parser, &pmt);
        let table = match &parsed[0] {
            ParsedTsPacket::Pmt(info) => info.program_map_table.clone(),
            _ => panic!("expected a PMT"),
        };
        assert_eq!(table.video, Some(0x100));
        assert_eq!(table.audio, Some(0x101));
        assert_eq!(table.pcr_pid, Some(0x100));
        assert_eq!(table.timed_metadata, vec![(0x102, METADATA_STREAM_TYPE)]);
        assert_eq!(table.metadata_dispatch_type(), Some("15250f".to_owned()));

        // network PID is ignored
        assert_eq!(parse_ok(&mut parser, &ts_packet(0x10, true, &[1, 2, 3])), vec![]);
    }

    #[test]
    fn test_pes_waits_for_pmt() {
        let mut parser = TransportPacketParser::new();
        parse_ok(&mut parser, &ts_packet(0, true, &pat_payload(&[(1, 0x1000)])));
        assert_eq!(parse_ok(&mut parser, &ts_packet(0x101, true, &[0xAA; 10])), vec![]);
        let pmt = ts_packet(
            0x1000,
            true,
            &pmt_payload(0x1fff, &[(ADTS_STREAM_TYPE, 0x101, &[])]),
        );
        let parsed = parse_ok(&mut parser, &pmt);
        assert_eq!(parsed.len(), 2);
        match &parsed[1] {
            ParsedTsPacket::Pes(pes) => {
                assert_eq!(pes.pid, 0x101);
                assert_eq!(pes.stream_type, ADTS_STREAM_TYPE);
                assert!(pes.payload_unit_start_indicator);
                assert_eq!(pes.data, vec![0xAA; 10]);
            }
            _ => panic!("expected a PES packet"),
        }
    }

    #[test]
    fn test_packets_waiting_for_pmt_are_bounded() {
        let mut parser = TransportPacketParser::new();
        parse_ok(&mut parser, &ts_packet(0, true, &pat_payload(&[(1, 0x1000)])));
        for i in 0..MAX_PACKETS_WAITING_FOR_PMT + 10 {
            parse_ok(&mut parser, &ts_packet(0x101, true, &[i as u8; 10]));
            assert!(parser.packets_waiting_for_pmt.len() <= MAX_PACKETS_WAITING_FOR_PMT);
        }
        assert_eq!(parser.packets_waiting_for_pmt.len(), 10);

        let pmt = ts_packet(
            0x1000,
            true,
            &pmt_payload(0x1fff, &[(ADTS_STREAM_TYPE, 0x101, &[])]),
        );
        // the PMT itself, then the packets kept since the last drop
        assert_eq!(parse_ok(&mut parser, &pmt).len(), 11);
        assert!(parser.packets_waiting_for_pmt.is_empty());
    }

    #[test]
    fn test_multiple_programs_is_an_error() {
        let mut parser = TransportPacketParser::new();
        let pat = ts_packet(0, true, &pat_payload(&[(1, 0x1000), (2, 0x1001)]));
        assert_eq!(parser.parse(&pat), Err(TransmuxError::MultiplePrograms));
    }

    #[test]
    fn test_multiple_video_streams_is_an_error() {
        let mut parser = TransportPacketParser::new();
        parse_ok(&mut parser, &ts_packet(0, true, &pat_payload(&[(1, 0x1000)])));
        let pmt = ts_packet(
            0x1000,
            true,
            &pmt_payload(
                0x100,
                &[(H264_STREAM_TYPE, 0x100, &[]), (H264_STREAM_TYPE, 0x102, &[])],
            ),
        );
        assert_eq!(parser.parse(&pmt), Err(TransmuxError::MultipleVideoStreams));
    }

    #[test]
    fn test_malformed_packet() {
        let mut parser = TransportPacketParser::new();
        assert_eq!(parser.parse(&[SYNC_BYTE, 0, 0]), Ok(None));
        let mut packet = ts_packet(0x100, false, &[0; 184]);
        packet[3] = 0x30;
        packet[4] = 200;
        assert_eq!(parser.parse(&packet), Ok(None));
    }
}
