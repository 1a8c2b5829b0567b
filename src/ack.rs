use std::time::Duration;

use crate::error::SegmentError;
use crate::segment::SegmentMap;

/// Dwell between writes within one mode iteration (spec.md §3).
pub const WRITE_DWELL: Duration = Duration::from_micros(1500);

/// One of the three fixed write-sequence templates applied to the ACK word
/// (spec.md §3, GLOSSARY "Mode").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AckMode {
    Inc32,
    Mirror,
    Toggle1,
}

impl AckMode {
    /// Scan order used by preflight: `inc32, mirror, toggle1` (spec.md §4.3).
    pub const SCAN_ORDER: [AckMode; 3] = [AckMode::Inc32, AckMode::Mirror, AckMode::Toggle1];

    pub fn as_str(self) -> &'static str {
        match self {
            AckMode::Inc32 => "inc32",
            AckMode::Mirror => "mirror",
            AckMode::Toggle1 => "toggle1",
        }
    }
}

/// Per-mode running state threaded across pulse iterations. `inc32` carries
/// an internal monotonically-incrementing counter; the other modes don't
/// need any.
#[derive(Clone, Copy, Debug, Default)]
pub struct AckState {
    inc32_counter: Option<u32>,
}

/// A 32-bit linear-congruential step, matching the official client's observed
/// constants (spec.md §3).
fn lcg_step(prior: u32) -> u32 {
    prior.wrapping_mul(1_103_515_245).wrapping_add(12345)
}

/// Builds the ordered list of words one `pulse_once` iteration writes,
/// without touching the segment. Kept separate from `pulse_once` so the
/// sequence itself is trivially testable.
fn sequence(idx: u32, mode: AckMode, state: AckState) -> (Vec<u32>, AckState) {
    match mode {
        AckMode::Inc32 => {
            let counter = state.inc32_counter.map_or(1, |c| c.wrapping_add(1));
            let next = AckState {
                inc32_counter: Some(counter),
            };
            (
                vec![lcg_step(idx), idx, idx.wrapping_add(1), counter],
                next,
            )
        }
        AckMode::Mirror => (vec![idx, idx.wrapping_add(1), idx], state),
        AckMode::Toggle1 => {
            let v = if idx & 1 == 0 {
                0xAAAA_AAAA
            } else {
                0x5555_5555
            };
            (vec![v], state)
        }
    }
}

/// Runs one iteration of `mode`'s write sequence against `off`, keyed on the
/// current producer index `idx`. Each write is followed by `WRITE_DWELL`.
/// Returns the updated `AckState` to carry into the next iteration.
pub fn pulse_once(
    seg: &mut SegmentMap,
    off: usize,
    idx: u32,
    mode: AckMode,
    state: AckState,
    sleep: impl Fn(Duration),
) -> Result<AckState, SegmentError> {
    let (writes, next_state) = sequence(idx, mode, state);
    for v in writes {
        seg.write_u32(off, v)?;
        sleep(WRITE_DWELL);
    }
    Ok(next_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_segment() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(b"LGMP");
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn mirror_sequence_is_index_then_index_plus_one_then_index() {
        let (writes, _) = sequence(41, AckMode::Mirror, AckState::default());
        assert_eq!(writes, vec![41, 42, 41]);
    }

    #[test]
    fn inc32_sequence_carries_an_incrementing_counter() {
        let (first, s) = sequence(10, AckMode::Inc32, AckState::default());
        assert_eq!(first[1], 10);
        assert_eq!(first[2], 11);
        assert_eq!(first[3], 1);

        let (second, _) = sequence(10, AckMode::Inc32, s);
        assert_eq!(second[3], 2);
    }

    #[test]
    fn toggle1_alternates_on_index_parity() {
        let (even, _) = sequence(0, AckMode::Toggle1, AckState::default());
        assert_eq!(even, vec![0xAAAA_AAAA]);

        let (odd, _) = sequence(1, AckMode::Toggle1, AckState::default());
        assert_eq!(odd, vec![0x5555_5555]);
    }

    #[test]
    fn pulse_once_writes_the_last_sequence_value_to_the_ack_word() {
        let f = make_segment();
        let mut seg = SegmentMap::open(f.path(), None).unwrap();
        pulse_once(&mut seg, 0x200, 41, AckMode::Mirror, AckState::default(), |_| {}).unwrap();
        assert_eq!(seg.read_u32(0x200).unwrap(), 41);
    }

    #[test]
    fn pulse_once_never_touches_the_index_offset() {
        let f = make_segment();
        let mut seg = SegmentMap::open(f.path(), None).unwrap();
        seg.write_u32(0x10, 0x1234).unwrap();
        pulse_once(&mut seg, 0x200, 0x1234, AckMode::Inc32, AckState::default(), |_| {}).unwrap();
        assert_eq!(seg.read_u32(0x10).unwrap(), 0x1234);
    }
}
