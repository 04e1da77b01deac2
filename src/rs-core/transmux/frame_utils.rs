use super::nal_unit_producer::{NalUnit, NalUnitType};

/// A single access unit: every NAL unit making up one picture.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct FrameObject {
    pub(crate) dts: i64,
    pub(crate) pts: i64,
    pub(crate) nb_bytes: usize,
    pub(crate) duration: i64,
    pub(crate) key_frame: bool,
    pub(crate) data: Vec<NalUnit>,
}

impl FrameObject {
    fn start_with(nal: NalUnit) -> Self {
        Self {
            dts: nal.dts,
            pts: nal.pts,
            nb_bytes: nal.data.len(),
            duration: 0,
            key_frame: nal.nal_type == NalUnitType::IdrSlice,
            data: vec![nal],
        }
    }

    fn has_slice(&self) -> bool {
        self.data.iter().any(|n| n.is_slice())
    }

    /// Returns `true` if `nal` cannot belong to this access unit anymore.
    fn is_ended_by(&self, nal: &NalUnit) -> bool {
        if self.data.is_empty() {
            return false;
        }
        match nal.nal_type {
            NalUnitType::AccessUnitDelimiter => true,
            NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Sei => self.has_slice(),
            NalUnitType::IdrSlice | NalUnitType::NonIdrSlice => {
                nal.is_first_slice_of_picture() && self.has_slice()
            }
            _ => false,
        }
    }

    fn push(&mut self, nal: NalUnit) {
        if nal.nal_type == NalUnitType::IdrSlice {
            self.key_frame = true;
        }
        self.nb_bytes += nal.data.len();
        self.data.push(nal);
    }
}

#[derive(Debug, Default)]
pub(crate) struct FramesObject {
    pub(crate) nal_count: usize,
    pub(crate) duration: i64,
    pub(crate) nb_bytes: usize,
    pub(crate) frames: Vec<FrameObject>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct GopData {
    pub(crate) frames: Vec<FrameObject>,
    pub(crate) nb_bytes: usize,
    pub(crate) nal_count: usize,
    pub(crate) duration: i64,
    pub(crate) pts: i64,
    pub(crate) dts: i64,
}

impl GopData {
    fn start_with(frame: FrameObject) -> Self {
        Self {
            nb_bytes: frame.nb_bytes,
            nal_count: frame.data.len(),
            duration: frame.duration,
            pts: frame.pts,
            dts: frame.dts,
            frames: vec![frame],
        }
    }

    fn push(&mut self, frame: FrameObject) {
        self.duration += frame.duration;
        self.nal_count += frame.data.len();
        self.nb_bytes += frame.nb_bytes;
        self.frames.push(frame);
    }
}

#[derive(Debug, Default)]
pub(crate) struct GopsSet {
    pub(crate) gops: Vec<GopData>,
    pub(crate) nb_bytes: usize,
    pub(crate) nal_count: usize,
    pub(crate) duration: i64,
    pub(crate) pts: i64,
    pub(crate) dts: i64,
}

impl GopsSet {
    pub(crate) fn frames(&self) -> impl Iterator<Item = &FrameObject> {
        self.gops.iter().flat_map(|g| g.frames.iter())
    }
}

/// Group NAL units into access units, keeping track of cumulative data such
/// as the frame duration, starting pts, etc.
///
/// A frame is closed by an access unit delimiter, or by a new picture (first
/// slice, SPS, PPS or SEI) after it already has a slice.
pub(crate) fn group_nals_into_frames(nal_units: Vec<NalUnit>) -> FramesObject {
    let mut frames_obj = FramesObject::default();
    let mut current_frame: Option<FrameObject> = None;

    for nal in nal_units {
        match current_frame.as_mut() {
            Some(frame) if !frame.is_ended_by(&nal) => frame.push(nal),
            _ => {
                let new_frame = FrameObject::start_with(nal);
                if let Some(mut prev) = current_frame.replace(new_frame) {
                    prev.duration = prev_duration(&prev, current_frame.as_ref());
                    frames_obj.nb_bytes += prev.nb_bytes;
                    frames_obj.nal_count += prev.data.len();
                    frames_obj.duration += prev.duration;
                    frames_obj.frames.push(prev);
                }
            }
        }
    }

    if let Some(mut last) = current_frame {
        // For the last frame, use the duration of the previous frame if we
        // have nothing better to go on
        last.duration = frames_obj.frames.last().map_or(0, |f| f.duration);
        frames_obj.nb_bytes += last.nb_bytes;
        frames_obj.nal_count += last.data.len();
        frames_obj.duration += last.duration;
        frames_obj.frames.push(last);
    }
    frames_obj
}

fn prev_duration(prev: &FrameObject, next: Option<&FrameObject>) -> i64 {
    next.map_or(0, |n| i64::max(0, n.dts - prev.dts))
}

/// Convert an array of frames into an array of Gop with each Gop being composed
/// of the frames that make up that Gop
/// Also keep track of cummulative data about the Gop from the frames such as the
/// Gop duration, starting pts, etc.
pub(crate) fn group_frames_into_gops(frames_obj: FramesObject) -> GopsSet {
    let mut gops = GopsSet::default();
    let (pts, dts) = match frames_obj.frames.first() {
        None => return gops,
        Some(f) => (f.pts, f.dts),
    };

    // store some metadata about all the Gops
    gops.pts = pts;
    gops.dts = dts;

    let mut current_gop: Option<GopData> = None;
    for frame in frames_obj.frames {
        match current_gop.as_mut() {
            // Every key frame starts a new GOP
            Some(gop) if !frame.key_frame => gop.push(frame),
            _ => {
                if let Some(prev) = current_gop.replace(GopData::start_with(frame)) {
                    gops.nb_bytes += prev.nb_bytes;
                    gops.nal_count += prev.nal_count;
                    gops.duration += prev.duration;
                    gops.gops.push(prev);
                }
            }
        }
    }

    if let Some(mut last) = current_gop {
        if !gops.gops.is_empty() && last.duration == 0 {
            last.duration = gops.gops.last().map_or(0, |g| g.duration);
        }
        gops.nb_bytes += last.nb_bytes;
        gops.nal_count += last.nal_count;
        gops.duration += last.duration;
        gops.gops.push(last);
    }
    gops
}

/// Search for the first keyframe in the GOPs and throw away all frames
/// until that keyframe. Then extend the duration of the pulled keyframe
/// and pull the PTS and DTS of the keyframe so that it covers the time
/// range of the frames that were disposed.
pub(crate) fn extend_first_key_frame(gops: &mut GopsSet) {
    let starts_with_key_frame = gops
        .gops
        .first()
        .and_then(|g| g.frames.first())
        .map_or(true, |f| f.key_frame);
    if starts_with_key_frame || gops.gops.len() < 2 {
        return;
    }

    // Remove until the first key frame (so basically, remove the first GOP)
    let first_gop = gops.gops.remove(0);
    gops.nb_bytes -= first_gop.nb_bytes;
    gops.nal_count -= first_gop.nal_count;

    // Extend the first frame of what is now the
    // first gop to cover the time period of the
    // frames we just removed
    let new_first = &mut gops.gops[0];
    new_first.dts = first_gop.dts;
    new_first.pts = first_gop.pts;
    new_first.duration += first_gop.duration;
    if let Some(frame) = new_first.frames.first_mut() {
        frame.dts = first_gop.dts;
        frame.pts = first_gop.pts;
        frame.duration += first_gop.duration;
    }
}

/// generate the track's raw mdat data from an array of gops
pub(crate) fn concatenate_nal_data(gops: &GopsSet) -> Vec<u8> {
    let total_byte_length = gops.nb_bytes + 4 * gops.nal_count;
    let mut data = Vec::with_capacity(total_byte_length);
    gops.frames()
        .flat_map(|f| f.data.iter())
        .for_each(|d| {
            data.extend((d.data.len() as u32).to_be_bytes());
            data.extend_from_slice(&d.data);
        });
    data
}

/// generate the track's raw mdat data from a frame
pub(crate) fn concatenate_nal_data_for_frame(frame: &FrameObject) -> Vec<u8> {
    let total_byte_length = frame.nb_bytes + 4 * frame.data.len();
    let mut data = Vec::with_capacity(total_byte_length);
    frame.data.iter().for_each(|d| {
        data.extend((d.data.len() as u32).to_be_bytes());
        data.extend_from_slice(&d.data);
    });
    data
}
