pub(crate) const MP2T_PACKET_LENGTH: usize = 188;
pub(crate) const SYNC_BYTE: u8 = 0x47;

/// Splits an incoming stream of binary data into single MPEG-2 Transport
/// Stream packets.
///
/// Data can be fed in arbitrary chunks: bytes which cannot form a whole packet
/// yet stay buffered until the next `feed` call.
pub(crate) struct TransportStreamSplitter {
    input: Vec<u8>,
    /// Offset in `input` where the next packet is looked for.
    start_index: usize,
    /// Offset in `input` of the last emitted packet, if any.
    last_packet_start: Option<usize>,
}

impl TransportStreamSplitter {
    pub(crate) fn new() -> Self {
        Self {
            input: Vec::with_capacity(MP2T_PACKET_LENGTH),
            start_index: 0,
            last_packet_start: None,
        }
    }

    /// Append new data after the bytes that were not consumed yet.
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        if self.start_index > 0 {
            self.input.drain(..usize::min(self.start_index, self.input.len()));
        }
        self.input.extend_from_slice(bytes);
        self.start_index = 0;
        self.last_packet_start = None;
    }

    /// Returns the next whole packet found in the data fed so far.
    ///
    /// A packet is only emitted once the sync byte of the packet following it
    /// has been seen too, so that a false sync byte is not mistaken for a packet
    /// start. Use `last_packet` at the end of the data to retrieve a trailing
    /// packet which has no successor.
    pub(crate) fn next_packet(&mut self) -> Option<&[u8]> {
        while self.start_index + MP2T_PACKET_LENGTH < self.input.len() {
            let end_index = self.start_index + MP2T_PACKET_LENGTH;

            // Look for a pair of start and end sync bytes in the data..
            if self.input[self.start_index] == SYNC_BYTE && self.input[end_index] == SYNC_BYTE {
                // We found a packet so emit it and jump one whole packet forward
                let start = self.start_index;
                self.last_packet_start = Some(start);
                self.start_index = end_index;
                return Some(&self.input[start..end_index]);
            }

            // If we get here, we have somehow become de-synchronized and we need to step
            // forward one byte at a time until we find a pair of sync bytes that denote
            // a packet
            self.start_index += 1;
        }
        None
    }

    /// To call once `next_packet` returned `None` and no more data is expected for now.
    ///
    /// If exactly one whole packet is left, it is emitted. Otherwise leftover
    /// data is kept because it may be important for decoding the next chunk.
    pub(crate) fn last_packet(&mut self) -> Option<&[u8]> {
        let remaining = self.input.len().saturating_sub(self.start_index);
        if remaining == MP2T_PACKET_LENGTH && self.input[self.start_index] == SYNC_BYTE {
            let start = self.start_index;
            self.last_packet_start = Some(start);
            self.start_index = self.input.len();
            Some(&self.input[start..])
        } else {
            None
        }
    }

    /// Signal that the last emitted packet could not be parsed. The search for
    /// the next packet restarts one byte after its start.
    pub(crate) fn reject_last(&mut self) {
        if let Some(last) = self.last_packet_start.take() {
            self.start_index = last + 1;
        }
    }

    /// Number of bytes fed but not emitted yet.
    pub(crate) fn pending_len(&self) -> usize {
        self.input.len().saturating_sub(self.start_index)
    }

    pub(crate) fn reset(&mut self) {
        self.input.clear();
        self.start_index = 0;
        self.last_packet_start = None;
    }
}
