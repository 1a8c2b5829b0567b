use std::thread::sleep;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::ack::{pulse_once, AckMode, AckState};
use crate::error::PreflightError;
use crate::profile::SET_BITS;
use crate::segment::SegmentMap;

/// Quiet/pulse probe window (spec.md §4.3).
const PROBE_WINDOW: Duration = Duration::from_millis(45);
const POLL_STEP: Duration = Duration::from_millis(5);

/// Result of a successful preflight run: which offset to keep rewriting, and
/// in which mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckTarget {
    pub ack_off: usize,
    pub mode: AckMode,
}

/// Step 1: OR the connection flag's bit in if it's clear.
fn ensure_connected(seg: &mut SegmentMap, flag_off: usize, flag_mask: u32) -> Result<(), PreflightError> {
    let cur = seg.read_u32(flag_off)?;
    if cur & flag_mask == 0 {
        seg.write_u32(flag_off, cur | flag_mask)?;
    }
    Ok(())
}

/// Step 2: OR each stable set-bit in, skipping `idx_off`. Idempotent: a
/// second application is a no-op (spec.md §8).
fn apply_set_bits(seg: &mut SegmentMap, idx_off: usize) -> Result<usize, PreflightError> {
    let mut applied = 0;
    for &(off, mask) in SET_BITS {
        if off == idx_off {
            continue;
        }
        let cur = seg.read_u32(off)?;
        let new = cur | mask;
        if new != cur {
            seg.write_u32(off, new)?;
            applied += 1;
        }
    }
    Ok(applied)
}

/// Quiet delta: modular difference in the producer index over `PROBE_WINDOW`
/// of silence, polled every `POLL_STEP`.
fn quiet_delta(seg: &SegmentMap, idx_off: usize) -> Result<u32, PreflightError> {
    let start = seg.read_u32(idx_off)?;
    let deadline = Instant::now() + PROBE_WINDOW;
    while Instant::now() < deadline {
        sleep(POLL_STEP);
    }
    let end = seg.read_u32(idx_off)?;
    Ok(end.wrapping_sub(start))
}

/// Pulse delta for a single mode: run its write sequence repeatedly for
/// `PROBE_WINDOW`, keying each iteration on the current index.
fn pulse_delta(seg: &mut SegmentMap, off: usize, idx_off: usize, mode: AckMode) -> Result<u32, PreflightError> {
    let p0 = seg.read_u32(idx_off)?;
    let deadline = Instant::now() + PROBE_WINDOW;
    let mut state = AckState::default();
    while Instant::now() < deadline {
        let idx = seg.read_u32(idx_off)?;
        state = pulse_once(seg, off, idx, mode, state, sleep)?;
    }
    let p1 = seg.read_u32(idx_off)?;
    Ok(p1.wrapping_sub(p0))
}

/// Scores one candidate offset: quiet delta plus the best of the three
/// modes' pulse deltas, in scan order (spec.md §4.3).
fn score_candidate(
    seg: &mut SegmentMap,
    off: usize,
    idx_off: usize,
) -> Result<(u32, AckMode, u32), PreflightError> {
    let dq = quiet_delta(seg, idx_off)?;
    let mut best_mode = AckMode::Inc32;
    let mut best_dp = None;
    for mode in AckMode::SCAN_ORDER {
        let dp = pulse_delta(seg, off, idx_off, mode)?;
        let beats_current_best = match best_dp {
            Some(best) => dp > best,
            None => true,
        };
        if beats_current_best {
            best_dp = Some(dp);
            best_mode = mode;
        }
    }
    Ok((dq, best_mode, best_dp.unwrap_or(0)))
}

/// Scans `offsets` (already filtered to 4-byte stride by the caller) for the
/// first candidate whose pulse delta beats its quiet delta by at least
/// `margin`. First passing candidate wins; scanning stops immediately.
fn scan(
    seg: &mut SegmentMap,
    idx_off: usize,
    offsets: impl Iterator<Item = usize>,
    tried: &mut std::collections::HashSet<usize>,
    margin: u32,
) -> Result<Option<AckTarget>, PreflightError> {
    for off in offsets {
        if off == idx_off || !tried.insert(off) {
            continue;
        }
        let (dq, mode, dp) = score_candidate(seg, off, idx_off)?;
        let ok = dp >= dq.saturating_add(margin);
        debug!(
            "preflight candidate off=0x{off:x} best={} dq={dq} dp={dp} -> {}",
            mode.as_str(),
            if ok { "accepted" } else { "rejected" }
        );
        if ok {
            return Ok(Some(AckTarget { ack_off: off, mode }));
        }
    }
    Ok(None)
}

/// Locates the ACK offset and mode: ranges first, then the bounded fallback.
fn find_ack(
    seg: &mut SegmentMap,
    idx_off: usize,
    ranges: &[(usize, usize)],
    fallback: (usize, usize),
    margin: u32,
) -> Result<AckTarget, PreflightError> {
    let mut tried = std::collections::HashSet::new();
    let mut scanned = 0usize;

    for &(lo, hi) in ranges {
        let offsets: Vec<usize> = (lo..hi).step_by(4).collect();
        scanned += offsets.len();
        if let Some(target) = scan(seg, idx_off, offsets.into_iter(), &mut tried, margin)? {
            return Ok(target);
        }
    }

    let (lo, hi) = fallback;
    let offsets: Vec<usize> = (lo..hi).step_by(4).collect();
    scanned += offsets.len();
    match scan(seg, idx_off, offsets.into_iter(), &mut tried, margin)? {
        Some(target) => Ok(target),
        None => Err(PreflightError::AckNotFound { scanned, margin }),
    }
}

/// Replays stable boot bits, discovers the ACK offset/mode by correlating
/// writes with producer-index deltas, then warm-pumps briefly (spec.md
/// §4.3). Returns `(ack_off, mode)` for the caller to hand to `AckPump`.
pub fn warm_boot_and_find_ack(
    seg: &mut SegmentMap,
    idx_off: usize,
    flag_off: usize,
    flag_mask: u32,
    ranges: &[(usize, usize)],
    fallback: (usize, usize),
    margin: u32,
    pump_seconds: f64,
    interval: Duration,
) -> Result<AckTarget, PreflightError> {
    ensure_connected(seg, flag_off, flag_mask)?;

    let applied = apply_set_bits(seg, idx_off)?;
    debug!("preflight applied {applied} set-bit writes");

    let target = find_ack(seg, idx_off, ranges, fallback, margin)?;
    info!(
        "preflight found ACK at 0x{:x} using mode {}",
        target.ack_off,
        target.mode.as_str()
    );

    let deadline = Instant::now() + Duration::from_secs_f64(pump_seconds.max(0.0));
    let mut state = AckState::default();
    let mut beats = 0u64;
    while Instant::now() < deadline {
        let idx = seg.read_u32(idx_off)?;
        state = pulse_once(seg, target.ack_off, idx, target.mode, state, sleep)?;
        beats += 1;
        sleep(interval.max(Duration::from_millis(1)));
    }
    debug!("preflight warm-pumped {beats} ticks");

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ACK_FALLBACK_DEFAULT, FLAG_MASK_DEFAULT, FLAG_OFF_DEFAULT, IDX_OFF_DEFAULT};
    use std::io::Write;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    fn base_segment() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data = vec![0u8; 0x20000 + 4096];
        let mut data = data;
        data[0..4].copy_from_slice(b"LGMP");
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f
    }

    /// Drives a producer simulator: advances `idx_off` by 1 every 2ms while
    /// any write to `ack_target` occurred in the last 3ms (scenario 3/4).
    struct Simulator {
        stop: Arc<std::sync::atomic::AtomicBool>,
        handle: Option<thread::JoinHandle<()>>,
    }

    impl Simulator {
        fn start(path: std::path::PathBuf, idx_off: usize, responsive_to: Option<usize>) -> Self {
            let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let stop2 = stop.clone();
            let handle = thread::spawn(move || {
                let mut seg = SegmentMap::open(&path, None).unwrap();
                let mut last_seen = 0u32;
                let mut last_write_at = Instant::now() - Duration::from_secs(1);
                let mut idx = 0u32;
                while !stop2.load(Ordering::Relaxed) {
                    if let Some(ack_off) = responsive_to {
                        if let Ok(v) = seg.read_u32(ack_off) {
                            if v != last_seen {
                                last_seen = v;
                                last_write_at = Instant::now();
                            }
                        }
                        if last_write_at.elapsed() < Duration::from_millis(3) {
                            idx = idx.wrapping_add(1);
                            let _ = seg.write_u32(idx_off, idx);
                        }
                    }
                    thread::sleep(Duration::from_millis(2));
                }
            });
            Self {
                stop,
                handle: Some(handle),
            }
        }
    }

    impl Drop for Simulator {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(h) = self.handle.take() {
                let _ = h.join();
            }
        }
    }

    /// Scenario 3: preflight happy path.
    #[test]
    fn finds_ack_when_producer_responds_to_writes() {
        let f = base_segment();
        let path = f.path().to_path_buf();
        let _sim = Simulator::start(path.clone(), IDX_OFF_DEFAULT, Some(0x200));

        let mut seg = SegmentMap::open(&path, None).unwrap();
        let target = warm_boot_and_find_ack(
            &mut seg,
            IDX_OFF_DEFAULT,
            FLAG_OFF_DEFAULT,
            FLAG_MASK_DEFAULT,
            &[(0x14, 0x300)],
            ACK_FALLBACK_DEFAULT,
            2,
            0.05,
            Duration::from_millis(20),
        )
        .unwrap();

        assert_eq!(target.ack_off, 0x200);
    }

    /// Scenario 4: preflight rejects a fully static producer.
    #[test]
    fn fails_when_producer_never_advances() {
        let f = base_segment();
        let path = f.path().to_path_buf();
        let _sim = Simulator::start(path.clone(), IDX_OFF_DEFAULT, None);

        let mut seg = SegmentMap::open(&path, None).unwrap();
        let err = warm_boot_and_find_ack(
            &mut seg,
            IDX_OFF_DEFAULT,
            FLAG_OFF_DEFAULT,
            FLAG_MASK_DEFAULT,
            &[(0x14, 0x40)],
            (0x40, 0x80),
            2,
            0.0,
            Duration::from_millis(20),
        )
        .unwrap_err();

        assert!(matches!(err, PreflightError::AckNotFound { .. }));
    }

    #[test]
    fn set_bits_application_is_idempotent() {
        let f = base_segment();
        let mut seg = SegmentMap::open(f.path(), None).unwrap();
        let first = apply_set_bits(&mut seg, IDX_OFF_DEFAULT).unwrap();
        assert!(first > 0);
        let second = apply_set_bits(&mut seg, IDX_OFF_DEFAULT).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn never_writes_the_index_offset() {
        let f = base_segment();
        let mut seg = SegmentMap::open(f.path(), None).unwrap();
        seg.write_u32(IDX_OFF_DEFAULT, 999).unwrap();
        apply_set_bits(&mut seg, IDX_OFF_DEFAULT).unwrap();
        assert_eq!(seg.read_u32(IDX_OFF_DEFAULT).unwrap(), 999);
    }
}
