use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;

use log::debug;

use crate::ack::{pulse_once, AckMode, AckState};
use crate::error::SegmentError;
use crate::segment::SegmentMap;

/// Default pump cadence (spec.md §4.4).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(20);

/// The ack offset/mode the supervisor currently wants pumped. Shared between
/// the pump task and the classify task: the latter swaps it to `None` before
/// re-running preflight (so the old pump releases exclusive write access to
/// the segment) and to `Some(new_target)` once a fresh one is found.
pub type AckTargetSlot = Arc<Mutex<Option<(usize, AckMode)>>>;

/// Dedicated task that, once preflight has located the ack word, keeps
/// nudging the producer by re-running one iteration of the chosen mode's
/// write sequence every `interval` (spec.md §4.4). Cooperatively cancellable
/// via a shared stop flag; a missed tick (scheduler jitter) is not an error.
pub struct AckPump {
    ack_off: usize,
    mode: AckMode,
    interval: Duration,
}

impl AckPump {
    pub fn new(ack_off: usize, mode: AckMode, interval: Duration) -> Self {
        Self {
            ack_off,
            mode,
            interval,
        }
    }

    /// Runs until `stop` is set or `current` no longer names this pump's
    /// `(ack_off, mode)`, sleeping in chunks no larger than `interval` so
    /// both shutdown and target-change latency are bounded (spec.md §5, §9
    /// "Cancellation"). Returning here — rather than looping forever once
    /// started — is what lets the supervisor's pump task notice a fresh
    /// target from a preflight retry and restart against it.
    pub fn run(
        &self,
        seg: &mut SegmentMap,
        idx_off: usize,
        stop: &Arc<AtomicBool>,
        current: &AckTargetSlot,
    ) -> Result<(), SegmentError> {
        let still_current = || *current.lock().unwrap() == Some((self.ack_off, self.mode));
        let mut state = AckState::default();
        let mut ticks = 0u64;
        while !stop.load(Ordering::Relaxed) && still_current() {
            let idx = seg.read_u32(idx_off)?;
            state = pulse_once(seg, self.ack_off, idx, self.mode, state, |d| {
                chunked_sleep(d, stop, &still_current);
            })?;
            ticks += 1;
            chunked_sleep(self.interval, stop, &still_current);
        }
        debug!("ack pump stopped after {ticks} ticks");
        Ok(())
    }
}

/// Sleeps `total`, checking `stop` and `still_current` every 5ms so a
/// cancellation or target change is observed promptly even mid-dwell.
fn chunked_sleep(total: Duration, stop: &Arc<AtomicBool>, still_current: &dyn Fn() -> bool) {
    let step = Duration::from_millis(5).min(total.max(Duration::from_micros(1)));
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) || !still_current() {
            return;
        }
        let this_step = step.min(remaining);
        sleep(this_step);
        remaining = remaining.saturating_sub(this_step);
    }
}
