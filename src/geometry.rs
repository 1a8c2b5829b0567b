/// Framebuffer geometry, immutable after construction (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub fb_w: u32,
    pub fb_h: u32,
    pub pitch: u32,
    pub bpp: Bpp,
    pub idx_off: usize,
    pub slot_base: usize,
    pub nbuf: u32,
    /// If set, `current_slot` always returns this value regardless of the
    /// producer index (spec.md §4.2).
    pub forced_slot: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bpp {
    /// Source is BGR, rendered as RGB.
    Bgr = 3,
    /// Source is BGRA, rendered with alpha forced to opaque on upload.
    Bgra = 4,
}

impl Bpp {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            3 => Some(Bpp::Bgr),
            4 => Some(Bpp::Bgra),
            _ => None,
        }
    }

    pub fn bytes(self) -> u32 {
        self as u32
    }
}

impl Geometry {
    pub fn new(
        fb_w: u32,
        fb_h: u32,
        pitch: u32,
        bpp: Bpp,
        idx_off: usize,
        slot_base: usize,
        nbuf: u32,
    ) -> Self {
        Self {
            fb_w,
            fb_h,
            pitch,
            bpp,
            idx_off,
            slot_base,
            nbuf,
            forced_slot: None,
        }
    }

    pub fn with_forced_slot(mut self, slot: u32) -> Self {
        self.forced_slot = Some(slot);
        self
    }

    /// Bytes per tight output row.
    pub fn tight_row_bytes(&self) -> usize {
        self.fb_w as usize * self.bpp.bytes() as usize
    }

    /// Bytes per source slot, pitched.
    pub fn slot_size(&self) -> usize {
        self.pitch as usize * self.fb_h as usize
    }

    /// Total tight output buffer length.
    pub fn tight_frame_len(&self) -> usize {
        self.tight_row_bytes() * self.fb_h as usize
    }

    /// Absolute byte offset of slot `k`.
    pub fn slot_offset(&self, k: u32) -> usize {
        self.slot_base + k as usize * self.slot_size()
    }

    pub fn is_tight(&self) -> bool {
        self.pitch as usize == self.tight_row_bytes()
    }

    /// Minimum segment size this geometry requires.
    pub fn min_segment_size(&self) -> usize {
        self.slot_base + self.nbuf as usize * self.slot_size()
    }
}
