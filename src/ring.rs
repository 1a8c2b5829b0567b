use crate::geometry::Geometry;
use crate::segment::SegmentMap;

/// Produces a tightly-packed frame buffer from a pitched slot in the segment
/// (spec.md §4.2). Transient out-of-range or decode failures surface as
/// `None` — a skipped frame, never a fatal error; the renderer re-uses its
/// last good texture.
pub struct RingReader<'a> {
    geometry: Geometry,
    segment: &'a SegmentMap,
}

impl<'a> RingReader<'a> {
    pub fn new(segment: &'a SegmentMap, geometry: Geometry) -> Self {
        Self { segment, geometry }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// If the geometry specifies a forced slot, returns it unchanged; else
    /// `idx_word mod nbuf`. A read failure on the index word falls back to
    /// slot 0 rather than panicking.
    pub fn current_slot(&self) -> u32 {
        if let Some(forced) = self.geometry.forced_slot {
            return forced;
        }
        if self.geometry.nbuf <= 1 {
            return 0;
        }
        match self.segment.read_u32(self.geometry.idx_off) {
            Ok(idx) => idx % self.geometry.nbuf,
            Err(_) => 0,
        }
    }

    /// Returns the next frame as a tightly-packed buffer of length
    /// `fb_w * fb_h * bpp`, or `None` if the slot's extent falls outside the
    /// segment.
    pub fn read_frame_tight(&self, k: u32) -> Option<Vec<u8>> {
        let off = self.geometry.slot_offset(k);
        let slot_size = self.geometry.slot_size();

        let extent = self.segment.slice(off, slot_size).ok()?;

        if self.geometry.is_tight() {
            return Some(extent.to_vec());
        }

        let tight_row = self.geometry.tight_row_bytes();
        let pitch = self.geometry.pitch as usize;
        let mut out = vec![0u8; self.geometry.tight_frame_len()];
        for row in 0..self.geometry.fb_h as usize {
            let src_start = row * pitch;
            let dst_start = row * tight_row;
            out[dst_start..dst_start + tight_row]
                .copy_from_slice(&extent[src_start..src_start + tight_row]);
        }
        Some(out)
    }

    /// Convenience: reads the frame for `current_slot()`.
    pub fn read_current_frame(&self) -> Option<Vec<u8>> {
        self.read_frame_tight(self.current_slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bpp;
    use std::io::Write;

    fn segment_with(bytes: &[u8]) -> (tempfile::NamedTempFile, SegmentMap) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        let seg = SegmentMap::open(f.path(), None).unwrap();
        (f, seg)
    }

    /// Scenario 1: tight frame, BGR. fb_w=4, fb_h=2, pitch=12, bpp=3.
    #[test]
    fn tight_frame_is_returned_unchanged() {
        let mut data = vec![0u8; 0x200000];
        data[0..4].copy_from_slice(b"LGMP");
        let frame: Vec<u8> = (1u8..=24).collect();
        data[0x1000..0x1000 + 24].copy_from_slice(&frame);
        let (_f, seg) = segment_with(&data);

        let geom = Geometry::new(4, 2, 12, Bpp::Bgr, 0x10, 0x1000, 1);
        let ring = RingReader::new(&seg, geom);
        let out = ring.read_frame_tight(0).unwrap();
        assert_eq!(out, frame);
    }

    /// Scenario 2: pitched frame repack. pitch=16 with 4 bytes padding/row.
    #[test]
    fn pitched_frame_is_repacked_without_padding() {
        let mut data = vec![0u8; 0x200000];
        data[0..4].copy_from_slice(b"LGMP");
        let row = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut padded_row = row.to_vec();
        padded_row.extend_from_slice(&[0, 0, 0, 0]);
        for r in 0..8 {
            let start = 0x1000 + r * 16;
            data[start..start + 16].copy_from_slice(&padded_row);
        }
        let (_f, seg) = segment_with(&data);

        // fb_h must match 8 rows for this scenario's row count.
        let geom = Geometry::new(4, 8, 16, Bpp::Bgr, 0x10, 0x1000, 1);
        let ring = RingReader::new(&seg, geom);
        let out = ring.read_frame_tight(0).unwrap();

        assert_eq!(out.len(), 4 * 8 * 3);
        for chunk in out.chunks(12) {
            assert_eq!(chunk, &row[..]);
        }
    }

    #[test]
    fn out_of_range_slot_yields_no_frame_not_an_error() {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(b"LGMP");
        let (_f, seg) = segment_with(&data);

        let geom = Geometry::new(1920, 1080, 1920 * 3, Bpp::Bgr, 0x10, 0x1000, 2);
        let ring = RingReader::new(&seg, geom);
        assert!(ring.read_frame_tight(0).is_none());
    }

    #[test]
    fn current_slot_respects_forced_slot_override() {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(b"LGMP");
        data[0x10..0x14].copy_from_slice(&7u32.to_le_bytes());
        let (_f, seg) = segment_with(&data);

        let geom = Geometry::new(4, 2, 12, Bpp::Bgr, 0x10, 0x1000, 4).with_forced_slot(2);
        let ring = RingReader::new(&seg, geom);
        assert_eq!(ring.current_slot(), 2);
    }

    #[test]
    fn current_slot_wraps_index_by_nbuf() {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(b"LGMP");
        data[0x10..0x14].copy_from_slice(&7u32.to_le_bytes());
        let (_f, seg) = segment_with(&data);

        let geom = Geometry::new(4, 2, 12, Bpp::Bgr, 0x10, 0x1000, 3);
        let ring = RingReader::new(&seg, geom);
        assert_eq!(ring.current_slot(), 7 % 3);
    }
}
