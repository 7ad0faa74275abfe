//! Annex-B elementary stream splitting
//!
//! Raw `.h264`/`.h265` files carry no packet boundaries. FFmpeg decoders
//! without a parser expect one picture per packet, so NAL units are grouped
//! into access units before they are sent.

/// Codec family of a raw elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    H264,
    Hevc,
}

impl StreamKind {
    /// Guess the stream layout from an FFmpeg decoder name ("h264", "h264_cuvid", "hevc_qsv"...)
    pub fn from_codec_name(codec: &str) -> Option<Self> {
        let codec = codec.to_ascii_lowercase();
        if codec.starts_with("h264") {
            Some(StreamKind::H264)
        } else if codec.starts_with("hevc") || codec.starts_with("h265") {
            Some(StreamKind::Hevc)
        } else {
            None
        }
    }

    fn nal_type(&self, payload: &[u8]) -> Option<u8> {
        let header = *payload.first()?;
        Some(match self {
            StreamKind::H264 => header & 0x1F,
            StreamKind::Hevc => (header >> 1) & 0x3F,
        })
    }

    /// Slice data NAL
    fn is_vcl(&self, payload: &[u8]) -> bool {
        match (self, self.nal_type(payload)) {
            (StreamKind::H264, Some(t)) => (1..=5).contains(&t),
            (StreamKind::Hevc, Some(t)) => t <= 31,
            _ => false,
        }
    }

    /// First slice of a picture: first_mb_in_slice == 0 (H.264) or
    /// first_slice_segment_in_pic_flag (HEVC), both the first bit after the header
    fn is_first_slice(&self, payload: &[u8]) -> bool {
        let header_len = match self {
            StreamKind::H264 => 1,
            StreamKind::Hevc => 2,
        };
        payload.get(header_len).is_some_and(|b| b & 0x80 != 0)
    }

    /// NAL that can only appear at the start of an access unit
    fn starts_access_unit(&self, payload: &[u8]) -> bool {
        let Some(t) = self.nal_type(payload) else {
            return false;
        };

        match self {
            // SEI, SPS, PPS, AUD, 14..=18 prefix/reserved
            StreamKind::H264 => {
                matches!(t, 6..=9 | 14..=18)
                    || (self.is_vcl(payload) && self.is_first_slice(payload))
            }
            // VPS, SPS, PPS, AUD, prefix SEI, 41..=44 reserved, 48..=55 unspecified
            StreamKind::Hevc => {
                matches!(t, 32..=35 | 39 | 41..=44 | 48..=55)
                    || (self.is_vcl(payload) && self.is_first_slice(payload))
            }
        }
    }
}

/// Find the next start code at or after `from`, returns (position, length)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && data.get(i + 3) == Some(&1) {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// One NAL unit borrowed from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nal<'a> {
    /// Start code and payload
    pub bytes: &'a [u8],
    /// Header and body, without the start code
    pub payload: &'a [u8],
    start: usize,
    end: usize,
}

/// Iterator over Annex-B NAL units
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = Nal<'a>;

    fn next(&mut self) -> Option<Nal<'a>> {
        let (start, prefix) = find_start_code(self.data, self.pos)?;
        let payload_start = start + prefix;
        let mut end = find_start_code(self.data, payload_start)
            .map_or(self.data.len(), |(next, _)| next);
        // trailing_zero_8bits belong to no NAL
        while end > payload_start && self.data[end - 1] == 0 && end < self.data.len() {
            end -= 1;
        }
        self.pos = payload_start.max(end);

        Some(Nal {
            bytes: &self.data[start..end],
            payload: &self.data[payload_start..end],
            start,
            end,
        })
    }
}

/// Iterator over access units (one picture each) of an Annex-B stream
pub struct AccessUnits<'a> {
    data: &'a [u8],
    kind: StreamKind,
    nals: std::iter::Peekable<NalUnits<'a>>,
}

impl<'a> AccessUnits<'a> {
    pub fn new(data: &'a [u8], kind: StreamKind) -> Self {
        Self {
            data,
            kind,
            nals: NalUnits::new(data).peekable(),
        }
    }
}

impl<'a> Iterator for AccessUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let first = self.nals.next()?;
        let start = first.start;
        let mut end = first.end;
        let mut has_vcl = self.kind.is_vcl(first.payload);

        while let Some(nal) = self.nals.peek() {
            if has_vcl && self.kind.starts_access_unit(nal.payload) {
                break;
            }
            has_vcl |= self.kind.is_vcl(nal.payload);
            end = nal.end;
            self.nals.next();
        }

        Some(&self.data[start..end])
    }
}
