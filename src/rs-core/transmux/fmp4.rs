//! ISOBMFF (fragmented MP4) box writers.
//!
//! An initialization segment is made of a `ftyp` and a `moov` describing every
//! track. Each media fragment then is a `moof` followed by a `mdat`, one pair
//! per track.

use super::{
    adts::AdtsFrame,
    frame_utils::{FrameObject, GopsSet},
    nal_unit_producer::NalVideoProperties,
};

static AVC1: [u8; 4] = *b"avc1";
static AVCC: [u8; 4] = *b"avcC";
static BTRT: [u8; 4] = *b"btrt";
static DINF: [u8; 4] = *b"dinf";
static DREF: [u8; 4] = *b"dref";
static ESDS: [u8; 4] = *b"esds";
static FTYP: [u8; 4] = *b"ftyp";
static HDLR: [u8; 4] = *b"hdlr";
static MDAT: [u8; 4] = *b"mdat";
static MDHD: [u8; 4] = *b"mdhd";
static MDIA: [u8; 4] = *b"mdia";
static MFHD: [u8; 4] = *b"mfhd";
static MINF: [u8; 4] = *b"minf";
static MOOF: [u8; 4] = *b"moof";
static MOOV: [u8; 4] = *b"moov";
static MP4A: [u8; 4] = *b"mp4a";
static MVEX: [u8; 4] = *b"mvex";
static MVHD: [u8; 4] = *b"mvhd";
static PASP: [u8; 4] = *b"pasp";
static SDTP: [u8; 4] = *b"sdtp";
static SMHD: [u8; 4] = *b"smhd";
static STBL: [u8; 4] = *b"stbl";
static STCO: [u8; 4] = *b"stco";
static STSC: [u8; 4] = *b"stsc";
static STSD: [u8; 4] = *b"stsd";
static STSZ: [u8; 4] = *b"stsz";
static STTS: [u8; 4] = *b"stts";
static TFDT: [u8; 4] = *b"tfdt";
static TFHD: [u8; 4] = *b"tfhd";
static TKHD: [u8; 4] = *b"tkhd";
static TRAF: [u8; 4] = *b"traf";
static TRAK: [u8; 4] = *b"trak";
static TREX: [u8; 4] = *b"trex";
static TRUN: [u8; 4] = *b"trun";
static VMHD: [u8; 4] = *b"vmhd";

/// Unity transformation matrix, used in both `mvhd` and `tkhd`.
static UNITY_MATRIX: [u8; 36] = [
    0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00,
];

/// Create a box with the given name and corresponding content.
///
/// The box starts with its 32-bit big-endian size, followed by its name.
fn create_box(box_name: [u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    let len = children.iter().fold(0, |acc, c| acc + c.len()) + 4 + 4;
    let mut result = Vec::with_capacity(len);
    result.extend((len as u32).to_be_bytes());
    result.extend(box_name);
    children.iter().for_each(|v| {
        result.extend(v);
    });
    result
}

/// Version and flags of a "full box".
fn full_box_header(version: u8, flags: u32) -> [u8; 4] {
    let flags = flags.to_be_bytes();
    [version, flags[1], flags[2], flags[3]]
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MediaType {
    Audio,
    Video,
}

/// Everything needed to describe a video track in an initialization segment.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct VideoMetadata {
    pub(crate) nal_video_properties: NalVideoProperties,
    pub(crate) spss: Vec<Vec<u8>>,
    pub(crate) ppss: Vec<Vec<u8>>,
}

/// Everything needed to describe an audio track in an initialization segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AudioMetadata {
    pub(crate) audio_object_type: u8,
    pub(crate) sampling_frequency_index: u8,
    pub(crate) channel_count: u16,
    pub(crate) sample_size: u16,
    pub(crate) sample_rate: u32,
}

impl AudioMetadata {
    pub(crate) fn from_frame(frame: &AdtsFrame) -> Self {
        Self {
            audio_object_type: frame.audio_object_type,
            sampling_frequency_index: frame.sampling_frequency_index,
            channel_count: frame.channel_count as u16,
            sample_size: 16,
            sample_rate: frame.sample_rate,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum IsobmffMetadata {
    Video(VideoMetadata),
    Audio(AudioMetadata),
}

impl IsobmffMetadata {
    pub(crate) fn media_type(&self) -> MediaType {
        match self {
            IsobmffMetadata::Video(_) => MediaType::Video,
            IsobmffMetadata::Audio(_) => MediaType::Audio,
        }
    }

    /// Units per second of the track's timestamps.
    fn timescale(&self) -> u32 {
        match self {
            IsobmffMetadata::Video(_) => 90_000,
            IsobmffMetadata::Audio(md) => md.sample_rate,
        }
    }
}

/// A track as declared in the initialization segment.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TrackInfo {
    pub(crate) md: IsobmffMetadata,
    pub(crate) track_id: u32,
    pub(crate) duration: Option<u32>,
}

/// A track's content for a single media fragment.
pub(crate) struct TrackFragmentInfo<'a> {
    pub(crate) media_type: MediaType,
    pub(crate) track_id: u32,
    /// In the track's timescale.
    pub(crate) base_media_decode_time: u64,
    pub(crate) samples: &'a [SampleInfo],
}

/// Create a template `dinf` ISOBMFF box.
fn create_dinf() -> Vec<u8> {
    let mut dref_content = full_box_header(0, 0).to_vec();
    dref_content.extend(1u32.to_be_bytes()); // entry_count
    dref_content.extend(12u32.to_be_bytes()); // entry_size
    dref_content.extend(*b"url ");
    dref_content.extend(full_box_header(0, 1)); // self-contained
    create_box(DINF, &[create_box(DREF, &[dref_content])])
}

/// Create an `esds` ISOBMFF box.
fn create_esds(md: &AudioMetadata) -> Vec<u8> {
    let mut content = full_box_header(0, 0).to_vec();
    content.extend([
        // ES_Descriptor
        0x03, // tag, ES_DescrTag
        0x19, // length
        0x00, 0x00, // ES_ID
        0x00, // streamDependenceFlag, URL_flag, reserved, streamPriority
        // DecoderConfigDescriptor
        0x04, // tag, DecoderConfigDescrTag
        0x11, // length
        0x40, // object type
        0x15, // streamType
        0x00, 0x06, 0x00, // bufferSizeDB
        0x00, 0x00, 0xda, 0xc0, // maxBitrate
        0x00, 0x00, 0xda, 0xc0, // avgBitrate
        // DecoderSpecificInfo
        0x05, // tag, DecoderSpecificInfoTag
        0x02, // length
        // ISO/IEC 14496-3, AudioSpecificConfig
        (md.audio_object_type << 3) | (md.sampling_frequency_index >> 1),
        (md.sampling_frequency_index << 7) | ((md.channel_count as u8) << 3),
        0x06, 0x01, 0x02, // SLConfigDescriptor
    ]);
    create_box(ESDS, &[content])
}

/// Create a template `ftyp` ISOBMFF box.
fn create_ftyp() -> Vec<u8> {
    let major_brand = b"isom".to_vec();
    let minor_version = 1u32.to_be_bytes().to_vec();
    create_box(
        FTYP,
        &[major_brand.clone(), minor_version, major_brand, b"avc1".to_vec()],
    )
}

/// Create an `hdlr` ISOBMFF box.
fn create_hdlr(hdlr_type: MediaType) -> Vec<u8> {
    let (handler_type, name): (&[u8; 4], &[u8]) = match hdlr_type {
        MediaType::Video => (b"vide", b"VideoHandler\0"),
        MediaType::Audio => (b"soun", b"SoundHandler\0"),
    };
    let mut content = full_box_header(0, 0).to_vec();
    content.extend([0; 4]); // pre_defined
    content.extend(handler_type);
    content.extend([0; 12]); // reserved
    content.extend(name);
    create_box(HDLR, &[content])
}

/// Create a `mdat` ISOBMFF box with the corresponding data.
pub(crate) fn create_mdat(data: Vec<u8>) -> Vec<u8> {
    create_box(MDAT, &[data])
}

/// Create a `mdhd` ISOBMFF box.
fn create_mdhd(duration: u32, timescale: u32) -> Vec<u8> {
    let mut content = full_box_header(0, 0).to_vec();
    content.extend(2u32.to_be_bytes()); // creation_time
    content.extend(3u32.to_be_bytes()); // modification_time
    content.extend(timescale.to_be_bytes());
    content.extend(duration.to_be_bytes());
    content.extend([0x55, 0xc4]); // 'und' language (undetermined)
    content.extend([0x00, 0x00]);
    create_box(MDHD, &[content])
}

/// Create a `mdia` ISOBMFF box.
fn create_mdia(md: &IsobmffMetadata, duration: u32) -> Vec<u8> {
    create_box(
        MDIA,
        &[
            create_mdhd(duration, md.timescale()),
            create_hdlr(md.media_type()),
            create_minf(md),
        ],
    )
}

/// Create a `mfhd` ISOBMFF box.
fn create_mfhd(sequence_number: u32) -> Vec<u8> {
    let mut content = full_box_header(0, 0).to_vec();
    content.extend(sequence_number.to_be_bytes());
    create_box(MFHD, &[content])
}

/// Create a `minf` ISOBMFF box.
fn create_minf(md: &IsobmffMetadata) -> Vec<u8> {
    let media_header = match md {
        IsobmffMetadata::Video(_) => {
            let mut vmhd_content = full_box_header(0, 1).to_vec();
            vmhd_content.extend([0; 2]); // graphicsmode
            vmhd_content.extend([0; 6]); // opcolor
            create_box(VMHD, &[vmhd_content])
        }
        IsobmffMetadata::Audio(_) => {
            let mut smhd_content = full_box_header(0, 0).to_vec();
            smhd_content.extend([0; 2]); // balance, 0 means centered
            smhd_content.extend([0; 2]); // reserved
            create_box(SMHD, &[smhd_content])
        }
    };
    create_box(MINF, &[media_header, create_dinf(), create_stbl(md)])
}

/// Create a `moof` ISOBMFF box for a single track.
pub(crate) fn create_moof(sequence_number: u32, track: &TrackFragmentInfo) -> Vec<u8> {
    create_box(MOOF, &[create_mfhd(sequence_number), create_traf(track)])
}

/// Creates a `moov` ISOBMFF box.
fn create_moov(tracks: &[TrackInfo]) -> Vec<u8> {
    let mut inner_boxes = vec![create_mvhd(0xffffffff)];
    tracks
        .iter()
        .for_each(|t| inner_boxes.push(create_trak(t)));
    inner_boxes.push(create_mvex(tracks));
    create_box(MOOV, &inner_boxes)
}

/// Creates a `mvex` ISOBMFF box.
fn create_mvex(tracks: &[TrackInfo]) -> Vec<u8> {
    let boxes: Vec<Vec<u8>> = tracks
        .iter()
        .map(|t| create_trex(t.md.media_type(), t.track_id))
        .collect();
    create_box(MVEX, &boxes)
}

/// Creates a `mvhd` ISOBMFF box.
fn create_mvhd(duration: u32) -> Vec<u8> {
    let mut content = full_box_header(0, 0).to_vec();
    content.extend(1u32.to_be_bytes()); // creation_time
    content.extend(2u32.to_be_bytes()); // modification_time
    content.extend(90_000u32.to_be_bytes()); // timescale, 90,000 "ticks" per second
    content.extend(duration.to_be_bytes());
    content.extend([0x00, 0x01, 0x00, 0x00]); // 1.0 rate
    content.extend([0x01, 0x00]); // 1.0 volume
    content.extend([0; 10]); // reserved
    content.extend(UNITY_MATRIX);
    content.extend([0; 24]); // pre_defined
    content.extend([0xff; 4]); // next_track_ID
    create_box(MVHD, &[content])
}

/// Creates a `sdtp` ISOBMFF box.
fn create_sdtp(samples: &[SampleInfo]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(4 + samples.len());

    // leave the full box header (4 bytes) all zero
    bytes.extend(full_box_header(0, 0));

    // write the sample table
    for sample in samples {
        let flags = &sample.flags;
        bytes.push((flags.depends_on << 4) | (flags.is_depended_on << 2) | flags.has_redundancy);
    }

    create_box(SDTP, &[bytes])
}

/// Creates a `stbl` ISOBMFF box.
fn create_stbl(md: &IsobmffMetadata) -> Vec<u8> {
    // version, flags and a zero entry_count
    let empty_content = vec![0u8; 8];
    create_box(
        STBL,
        &[
            create_stsd(md),
            create_box(STTS, &[empty_content.clone()]),
            create_box(STSC, &[empty_content.clone()]),
            create_box(STSZ, &[empty_content.clone()]),
            create_box(STCO, &[empty_content]),
        ],
    )
}

/// Creates a `stsd` ISOBMFF box.
fn create_stsd(md: &IsobmffMetadata) -> Vec<u8> {
    let mut header = full_box_header(0, 0).to_vec();
    header.extend(1u32.to_be_bytes()); // entry_count
    create_box(
        STSD,
        &[
            header,
            match md {
                IsobmffMetadata::Audio(md) => create_mp4a(md),
                IsobmffMetadata::Video(md) => create_avc1(md),
            },
        ],
    )
}

/// Creates an `avcC` ISOBMFF box.
fn create_avcc(md: &VideoMetadata) -> Vec<u8> {
    let props = &md.nal_video_properties;
    let mut content = vec![
        0x01,                        // configurationVersion
        props.profile_idc,           // AVCProfileIndication
        props.profile_compatibility, // profile_compatibility
        props.level_idc,             // AVCLevelIndication
        0xff,                        // lengthSizeMinusOne, hard-coded to 4 bytes
        0xe0 | (md.spss.len() as u8 & 0x1f),
    ];
    for sps in &md.spss {
        content.extend((sps.len() as u16).to_be_bytes()); // sequenceParameterSetLength
        content.extend(sps);
    }
    content.push(md.ppss.len() as u8);
    for pps in &md.ppss {
        content.extend((pps.len() as u16).to_be_bytes()); // pictureParameterSetLength
        content.extend(pps);
    }
    create_box(AVCC, &[content])
}

/// Creates an `avc1` ISOBMFF box.
fn create_avc1(md: &VideoMetadata) -> Vec<u8> {
    let props = &md.nal_video_properties;
    let mut sample_entry = vec![0; 6]; // reserved
    sample_entry.extend([0x00, 0x01]); // data_reference_index
    sample_entry.extend([0; 16]); // pre_defined and reserved
    sample_entry.extend((props.width as u16).to_be_bytes());
    sample_entry.extend((props.height as u16).to_be_bytes());
    sample_entry.extend([0x00, 0x48, 0x00, 0x00]); // horizresolution
    sample_entry.extend([0x00, 0x48, 0x00, 0x00]); // vertresolution
    sample_entry.extend([0; 4]); // reserved
    sample_entry.extend([0x00, 0x01]); // frame_count
    sample_entry.extend([0; 32]); // compressorname
    sample_entry.extend([0x00, 0x18]); // depth = 24
    sample_entry.extend([0xff, 0xff]); // pre_defined = -1

    let btrt_box = create_box(
        BTRT,
        &[vec![
            0x00, 0x1c, 0x9c, 0x80, // bufferSizeDB
            0x00, 0x2d, 0xc6, 0xc0, // maxBitrate
            0x00, 0x2d, 0xc6, 0xc0, // avgBitrate
        ]],
    );

    let (h_spacing, v_spacing) = props.sar_ratio;
    let mut pasp_content = (h_spacing as u32).to_be_bytes().to_vec();
    pasp_content.extend((v_spacing as u32).to_be_bytes());
    let pasp_box = create_box(PASP, &[pasp_content]);

    create_box(AVC1, &[sample_entry, create_avcc(md), btrt_box, pasp_box])
}

/// Creates a `mp4a` ISOBMFF box.
fn create_mp4a(md: &AudioMetadata) -> Vec<u8> {
    // SampleEntry, ISO/IEC 14496-12
    let mut content = vec![0; 6]; // reserved
    content.extend([0x00, 0x01]); // data_reference_index

    // AudioSampleEntry, ISO/IEC 14496-12
    content.extend([0; 8]); // reserved
    content.extend(md.channel_count.to_be_bytes());
    content.extend(md.sample_size.to_be_bytes());
    content.extend([0; 2]); // pre_defined
    content.extend([0; 2]); // reserved
    content.extend(((md.sample_rate & 0xffff) as u16).to_be_bytes());
    content.extend([0; 2]); // samplerate, 16.16

    // MP4AudioSampleEntry, ISO/IEC 14496-14
    create_box(MP4A, &[content, create_esds(md)])
}

/// Creates a `tkhd` ISOBMFF box.
fn create_tkhd(track_id: u32, duration: u32, width: u32, height: u32) -> Vec<u8> {
    // track enabled, in movie and in preview
    let mut content = full_box_header(0, 0x07).to_vec();
    content.extend(0u32.to_be_bytes()); // creation_time
    content.extend(0u32.to_be_bytes()); // modification_time
    content.extend(track_id.to_be_bytes());
    content.extend([0; 4]); // reserved
    content.extend(duration.to_be_bytes());
    content.extend([0; 8]); // reserved
    content.extend([0x00, 0x00]); // layer
    content.extend([0x00, 0x00]); // alternate_group
    content.extend([0x01, 0x00]); // volume
    content.extend([0x00, 0x00]); // reserved
    content.extend(UNITY_MATRIX);
    content.extend(((width & 0xffff) << 16).to_be_bytes()); // width, 16.16
    content.extend(((height & 0xffff) << 16).to_be_bytes()); // height, 16.16
    create_box(TKHD, &[content])
}

/// Creates a `traf` ISOBMFF box.
fn create_traf(track: &TrackFragmentInfo) -> Vec<u8> {
    // sample_description_index, default_sample_duration, default_sample_size
    // and default_sample_flags present
    let mut tfhd_content = full_box_header(0, 0x3a).to_vec();
    tfhd_content.extend(track.track_id.to_be_bytes());
    tfhd_content.extend(1u32.to_be_bytes()); // sample_description_index
    tfhd_content.extend([0; 4]); // default_sample_duration
    tfhd_content.extend([0; 4]); // default_sample_size
    tfhd_content.extend([0; 4]); // default_sample_flags
    let track_fragment_header = create_box(TFHD, &[tfhd_content]);

    let mut tfdt_content = full_box_header(1, 0).to_vec();
    tfdt_content.extend(track.base_media_decode_time.to_be_bytes());
    let track_fragment_decode_time = create_box(TFDT, &[tfdt_content]);

    // the data offset specifies the number of bytes from the start of
    // the containing moof to the first payload byte of the associated
    // mdat
    let data_offset = 32 + // tfhd
    20 + // tfdt
    8 + // traf header
    16 + // mfhd
    8 + // moof header
    8; // mdat header

    match track.media_type {
        MediaType::Audio => {
            // audio tracks require less metadata
            let track_fragment_run = create_trun(MediaType::Audio, track.samples, data_offset);
            create_box(
                TRAF,
                &[
                    track_fragment_header,
                    track_fragment_decode_time,
                    track_fragment_run,
                ],
            )
        }
        MediaType::Video => {
            // video tracks should contain an independent and disposable samples
            // box (sdtp)
            // generate one and adjust offsets to match
            let sample_dependency_table = create_sdtp(track.samples);
            let track_fragment_run = create_trun(
                MediaType::Video,
                track.samples,
                (sample_dependency_table.len() as u32) + data_offset,
            );
            create_box(
                TRAF,
                &[
                    track_fragment_header,
                    track_fragment_decode_time,
                    track_fragment_run,
                    sample_dependency_table,
                ],
            )
        }
    }
}

/// Creates a `trak` ISOBMFF box.
fn create_trak(track: &TrackInfo) -> Vec<u8> {
    let duration = track.duration.unwrap_or(0xffffffff);
    let (width, height) = match &track.md {
        IsobmffMetadata::Video(info) => (
            info.nal_video_properties.width,
            info.nal_video_properties.height,
        ),
        IsobmffMetadata::Audio(_) => (0, 0),
    };
    create_box(
        TRAK,
        &[
            create_tkhd(track.track_id, duration, width, height),
            create_mdia(&track.md, duration),
        ],
    )
}

/// Creates a `trex` ISOBMFF box.
fn create_trex(media_type: MediaType, track_id: u32) -> Vec<u8> {
    let mut content = full_box_header(0, 0).to_vec();
    content.extend(track_id.to_be_bytes());
    content.extend(1u32.to_be_bytes()); // default_sample_description_index
    content.extend([0; 4]); // default_sample_duration
    content.extend([0; 4]); // default_sample_size

    // the last two bytes of default_sample_flags is the sample
    // degradation priority, a hint about the importance of this sample
    // relative to others. Lower the degradation priority for all sample
    // other than video.
    let degradation_priority = if media_type == MediaType::Video { 1 } else { 0 };
    content.extend([0x00, 0x01, 0x00, degradation_priority]); // default_sample_flags
    create_box(TREX, &[content])
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SampleFlag {
    pub(crate) is_leading: u8,
    pub(crate) depends_on: u8,
    pub(crate) is_depended_on: u8,
    pub(crate) has_redundancy: u8,
    pub(crate) is_non_sync_sample: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SampleInfo {
    pub(crate) duration: u32,
    pub(crate) size: u32,
    pub(crate) flags: SampleFlag,
    pub(crate) composition_time_offset: Option<u32>,
}

/// Default sample object
/// see ISO/IEC 14496-12:2012, section 8.6.4.3
fn create_default_sample() -> SampleInfo {
    SampleInfo {
        size: 0,
        duration: 0,
        composition_time_offset: None,
        flags: SampleFlag {
            is_leading: 0,
            depends_on: 1,
            is_depended_on: 0,
            has_redundancy: 0,
            is_non_sync_sample: 1,
        },
    }
}

/// generate the track's sample table from an array of gops
pub(crate) fn generate_sample_table(gops: &GopsSet) -> Vec<SampleInfo> {
    gops.frames().map(sample_for_frame).collect()
}

/// Collates information from a video frame into an object for eventual
/// entry into an MP4 sample table.
fn sample_for_frame(frame: &FrameObject) -> SampleInfo {
    let mut sample = create_default_sample();

    sample.composition_time_offset = Some(i64::max(0, frame.pts - frame.dts) as u32);
    sample.duration = i64::max(0, frame.duration) as u32;
    sample.size = 4 * frame.data.len() as u32; // Space for nal unit size
    sample.size += frame.nb_bytes as u32;

    if frame.key_frame {
        sample.flags.depends_on = 2;
        sample.flags.is_non_sync_sample = 0;
    }
    sample
}

/// generate the track's sample table from a list of AAC frames
pub(crate) fn generate_audio_sample_table(frames: &[AdtsFrame]) -> Vec<SampleInfo> {
    frames
        .iter()
        .map(|frame| SampleInfo {
            duration: frame.sample_count,
            size: frame.data.len() as u32,
            ..create_default_sample()
        })
        .collect()
}

/// Creates the header of a `trun` ISOBMFF box.
fn create_trun_header(media_type: MediaType, samples: &[SampleInfo], offset: u32) -> Vec<u8> {
    let mut presence_flags: u8 = 0;
    if !samples.is_empty() {
        presence_flags |= 0x1; // sample_duration
        presence_flags |= 0x2; // sample_size
        if media_type == MediaType::Video {
            presence_flags |= 0x4; // sample_flags
            presence_flags |= 0x8; // sample_composition_time_offset
        }
    }
    let mut header = vec![
        0x00, // version 0
        0x00,
        presence_flags,
        0x01, // data_offset present
    ];
    header.extend((samples.len() as u32).to_be_bytes()); // sample_count
    header.extend(offset.to_be_bytes()); // data_offset
    header
}

/// Creates a `trun` ISOBMFF box.
fn create_trun(media_type: MediaType, samples: &[SampleInfo], initial_offset: u32) -> Vec<u8> {
    let entry_size = match media_type {
        MediaType::Audio => 8,
        MediaType::Video => 16,
    };
    let offset = initial_offset + 8 + 12 + entry_size * samples.len() as u32;
    let header = create_trun_header(media_type, samples, offset);
    let mut bytes = Vec::with_capacity(header.len() + samples.len() * entry_size as usize);
    bytes.extend(header);
    for sample in samples {
        bytes.extend(sample.duration.to_be_bytes()); // sample_duration
        bytes.extend(sample.size.to_be_bytes()); // sample_size
        if media_type == MediaType::Video {
            bytes.push((sample.flags.is_leading << 2) | sample.flags.depends_on);
            bytes.push(
                (sample.flags.is_depended_on << 6)
                    | (sample.flags.has_redundancy << 4)
                    | sample.flags.is_non_sync_sample,
            );
            bytes.extend([0x00, 0x00]); // degradation priority
            let composition_time_offset = sample.composition_time_offset.unwrap_or(0);
            bytes.extend(composition_time_offset.to_be_bytes()); // sample_composition_time_offset
        }
    }
    create_box(TRUN, &[bytes])
}

/// Creates an fmp4 initialization segment for segments with the corresponding
/// track information.
pub(crate) fn create_init_segment(tracks: &[TrackInfo]) -> Vec<u8> {
    let ftyp_box = create_ftyp();
    let moov_box = create_moov(tracks);
    let mut result = Vec::with_capacity(ftyp_box.len() + moov_box.len());
    result.extend(ftyp_box);
    result.extend(moov_box);
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns the name and content of every box found at the top level of
    /// `data`.
    pub(crate) fn parse_boxes(data: &[u8]) -> Vec<(String, &[u8])> {
        let mut boxes = vec![];
        let mut offset = 0;
        while offset + 8 <= data.len() {
            let size = u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let name = String::from_utf8_lossy(&data[offset + 4..offset + 8]).into_owned();
            boxes.push((name, &data[offset + 8..offset + size]));
            offset += size;
        }
        boxes
    }

    pub(crate) fn find_box<'a>(data: &'a [u8], path: &[&str]) -> Option<&'a [u8]> {
        let (first, rest) = path.split_first()?;
        let content = parse_boxes(data)
            .into_iter()
            .find(|(name, _)| name == first)
            .map(|(_, content)| content)?;
        if rest.is_empty() {
            Some(content)
        } else {
            find_box(content, rest)
        }
    }

    fn audio_metadata() -> AudioMetadata {
        AudioMetadata {
            audio_object_type: 2,
            sampling_frequency_index: 4,
            channel_count: 2,
            sample_size: 16,
            sample_rate: 44100,
        }
    }

    #[test]
    fn test_create_box_writes_size_then_name() {
        let b = create_box(MDAT, &[vec![1, 2, 3]]);
        assert_eq!(b, vec![0, 0, 0, 11, b'm', b'd', b'a', b't', 1, 2, 3]);
    }

    #[test]
    fn test_init_segment_structure() {
        let init = create_init_segment(&[TrackInfo {
            md: IsobmffMetadata::Audio(audio_metadata()),
            track_id: 2,
            duration: None,
        }]);
        let top: Vec<String> = parse_boxes(&init).into_iter().map(|(n, _)| n).collect();
        assert_eq!(top, vec!["ftyp", "moov"]);
        let mdhd = find_box(&init, &["moov", "trak", "mdia", "mdhd"]).unwrap();
        assert_eq!(&mdhd[12..16], &44100u32.to_be_bytes());
        let stsd = find_box(&init, &["moov", "trak", "mdia", "minf", "stbl", "stsd"]).unwrap();
        assert_eq!(&stsd[12..16], b"mp4a");
        let trex = find_box(&init, &["moov", "mvex", "trex"]).unwrap();
        assert_eq!(&trex[4..8], &2u32.to_be_bytes());
        assert_eq!(trex[23], 0);
    }

    #[test]
    fn test_audio_moof_data_offset() {
        let samples = vec![
            SampleInfo {
                duration: 1024,
                size: 10,
                ..create_default_sample()
            },
            SampleInfo {
                duration: 1024,
                size: 12,
                ..create_default_sample()
            },
        ];
        let moof = create_moof(
            3,
            &TrackFragmentInfo {
                media_type: MediaType::Audio,
                track_id: 2,
                base_media_decode_time: 0x1_0000_0002,
                samples: &samples,
            },
        );
        let trun = find_box(&moof, &["moof", "traf", "trun"]).unwrap();
        // duration and size present, plus data offset
        assert_eq!(&trun[0..4], &[0x00, 0x00, 0x03, 0x01]);
        let data_offset = u32::from_be_bytes([trun[8], trun[9], trun[10], trun[11]]);
        assert_eq!(data_offset as usize, moof.len() + 8);
        assert_eq!(trun.len(), 12 + 2 * 8);
        let tfdt = find_box(&moof, &["moof", "traf", "tfdt"]).unwrap();
        assert_eq!(tfdt[0], 1);
        assert_eq!(&tfdt[4..12], &0x1_0000_0002u64.to_be_bytes());
        let mfhd = find_box(&moof, &["moof", "mfhd"]).unwrap();
        assert_eq!(&mfhd[4..8], &3u32.to_be_bytes());
    }

    #[test]
    fn test_video_moof_has_sdtp() {
        let mut key = create_default_sample();
        key.flags.depends_on = 2;
        key.flags.is_non_sync_sample = 0;
        key.size = 100;
        key.duration = 3000;
        key.composition_time_offset = Some(3000);
        let samples = vec![key, create_default_sample()];
        let moof = create_moof(
            1,
            &TrackFragmentInfo {
                media_type: MediaType::Video,
                track_id: 1,
                base_media_decode_time: 0,
                samples: &samples,
            },
        );
        let sdtp = find_box(&moof, &["moof", "traf", "sdtp"]).unwrap();
        assert_eq!(sdtp, &[0, 0, 0, 0, 0x20, 0x10]);
        let trun = find_box(&moof, &["moof", "traf", "trun"]).unwrap();
        assert_eq!(&trun[0..4], &[0x00, 0x00, 0x0f, 0x01]);
        let data_offset = u32::from_be_bytes([trun[8], trun[9], trun[10], trun[11]]);
        assert_eq!(data_offset as usize, moof.len() + 8);
        // first sample: duration, size, flags, composition time offset
        assert_eq!(&trun[12..16], &3000u32.to_be_bytes());
        assert_eq!(&trun[16..20], &100u32.to_be_bytes());
        assert_eq!(&trun[20..22], &[0x02, 0x00]);
        assert_eq!(&trun[24..28], &3000u32.to_be_bytes());
    }
}
