use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, warn};

use crate::history::History;
use crate::predicate::Predicate;
use crate::rate::RateMeter;
use crate::segment::SegmentMap;

/// Overall health verdict (spec.md §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Ok,
    Problematic,
    Dead,
}

impl Health {
    fn label(self) -> &'static str {
        match self {
            Health::Ok => "ok",
            Health::Problematic => "problematic",
            Health::Dead => "dead",
        }
    }
}

/// A classification result with its human-readable reason (spec.md §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub health: Health,
    pub reason: String,
}

/// `(previous, current)` delivered on every classification change.
pub type Transition = (Health, Health);

pub struct MonitorConfig {
    pub idx_off: usize,
    pub flag_off: usize,
    pub flag_mask: u32,
    pub predicates: Vec<(usize, Predicate)>,
    pub poll_period: Duration,
    pub rate_horizon: Duration,
    pub fps_ok: f64,
    pub fps_dead: f64,
    pub relaxed: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            idx_off: crate::profile::IDX_OFF_DEFAULT,
            flag_off: crate::profile::FLAG_OFF_DEFAULT,
            flag_mask: crate::profile::FLAG_MASK_DEFAULT,
            predicates: crate::profile::default_predicates(),
            poll_period: Duration::from_millis(10),
            rate_horizon: Duration::from_secs(1),
            fps_ok: 30.0,
            fps_dead: 0.5,
            relaxed: false,
        }
    }
}

struct WatchState {
    last_value: HashMap<usize, u32>,
    history: HashMap<usize, History>,
    rate: RateMeter,
}

/// Samples a watch set of words, classifies overall health, and delivers
/// debounced transitions (spec.md §4.5). Poll and classify run on separate
/// threads (spec.md §5) communicating only through `state`, guarded by one
/// mutex per "a single mutex ... is sufficient".
pub struct SignalMonitor {
    cfg: MonitorConfig,
    watch_addrs: Vec<usize>,
    state: Mutex<WatchState>,
    transitions_tx: Sender<Transition>,
    transitions_rx: Receiver<Transition>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl SignalMonitor {
    pub fn new(cfg: MonitorConfig) -> Self {
        let mut watch_addrs = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for a in std::iter::once(cfg.idx_off)
            .chain(std::iter::once(cfg.flag_off))
            .chain(cfg.predicates.iter().map(|(off, _)| *off))
        {
            if seen.insert(a) {
                watch_addrs.push(a);
            }
        }

        let state = WatchState {
            last_value: HashMap::new(),
            history: watch_addrs.iter().map(|&a| (a, History::new())).collect(),
            rate: RateMeter::new(cfg.rate_horizon.as_millis() as u64),
        };

        let (tx, rx) = unbounded();
        Self {
            cfg,
            watch_addrs,
            state: Mutex::new(state),
            transitions_tx: tx,
            transitions_rx: rx,
        }
    }

    pub fn watch_addrs(&self) -> &[usize] {
        &self.watch_addrs
    }

    /// Receiver side of the transition channel; the supervisor drains this
    /// to react to `dead|problematic -> ok` recoveries.
    pub fn transitions(&self) -> Receiver<Transition> {
        self.transitions_rx.clone()
    }

    /// One poll iteration (spec.md §4.5 steps 1-3): reads every watch
    /// offset, folding read failures into "reuse the prior value".
    pub fn poll_once(&self, seg: &SegmentMap) {
        let mut state = self.state.lock().unwrap();
        let t = now_ms();

        let idx = seg
            .read_u32(self.cfg.idx_off)
            .unwrap_or_else(|_| *state.last_value.get(&self.cfg.idx_off).unwrap_or(&0));
        state.rate.push(t, idx);
        state.last_value.insert(self.cfg.idx_off, idx);

        for &addr in &self.watch_addrs {
            if addr == self.cfg.idx_off {
                continue;
            }
            let v = seg
                .read_u32(addr)
                .unwrap_or_else(|_| *state.last_value.get(&addr).unwrap_or(&0));
            let changed = state.last_value.get(&addr) != Some(&v);
            if changed {
                state.last_value.insert(addr, v);
                state.history.entry(addr).or_default().push(t, v);
            }
        }
    }

    /// Classifies current state (spec.md §4.5 decision tree + relaxed
    /// override). Pure given the locked snapshot: does not mutate state.
    pub fn classify(&self) -> Verdict {
        let state = self.state.lock().unwrap();
        let now = now_ms();
        let fps = state.rate.rate();
        let flag_v = *state.last_value.get(&self.cfg.flag_off).unwrap_or(&0);
        let masked = self.cfg.flag_mask == 0 || (flag_v & self.cfg.flag_mask) != 0;

        let mut preds_ok = true;
        for (addr, pred) in &self.cfg.predicates {
            let cur = *state.last_value.get(addr).unwrap_or(&0);
            let hist = state
                .history
                .get(addr)
                .map(|h| h.as_slice_oldest_first())
                .unwrap_or_default();
            if !pred.check(cur, &hist, now) {
                preds_ok = false;
                break;
            }
        }

        let mut verdict = if fps <= self.cfg.fps_dead {
            Verdict {
                health: Health::Dead,
                reason: format!("fps={fps:.1}, idx stalled"),
            }
        } else if fps >= self.cfg.fps_ok && masked && preds_ok {
            Verdict {
                health: Health::Ok,
                reason: format!("fps={fps:.1}, mask bit on, predicates pass"),
            }
        } else {
            let mut reasons = Vec::new();
            if fps < self.cfg.fps_ok {
                reasons.push(format!("low fps={fps:.1}"));
            }
            if !masked {
                reasons.push("mask bit off".to_string());
            }
            if !preds_ok {
                reasons.push("predicates failed".to_string());
            }
            Verdict {
                health: Health::Problematic,
                reason: reasons.join(", "),
            }
        };

        if self.cfg.relaxed && verdict.health != Health::Dead && fps >= 0.9 * self.cfg.fps_ok {
            verdict = Verdict {
                health: Health::Ok,
                reason: format!("{} (relaxed)", verdict.reason),
            };
        }

        verdict
    }

    /// One classify-task tick: classifies, and if it differs from
    /// `previous`, emits `(previous, current)` on the transition channel and
    /// returns the new classification so the caller can thread it into the
    /// next tick. Never panics: a downstream receiver being gone just drops
    /// the send.
    pub fn tick(&self, previous: Option<Health>) -> (Health, Option<Verdict>) {
        let verdict = self.classify();
        match previous {
            Some(prev) if prev == verdict.health => (prev, None),
            prev => {
                if let Some(prev) = prev {
                    let _ = self.transitions_tx.send((prev, verdict.health));
                }
                (verdict.health, Some(verdict))
            }
        }
    }

    /// Formats a diagnostic snapshot record matching the original monitor's
    /// text layout byte-for-byte in structure (spec.md §4.5, §6).
    pub fn snapshot_text(&self, label: Option<&str>) -> String {
        let state = self.state.lock().unwrap();
        let verdict = self.classify();
        let now = now_ms();

        let mut lines = Vec::new();
        let label_suffix = label.map(|l| format!(" [{l}]")).unwrap_or_default();
        lines.push(format!("=== SNAPSHOT {now}{label_suffix} ==="));
        lines.push(format!(
            "status={} ({}); fps={:.1}",
            verdict.health.label(),
            verdict.reason,
            state.rate.rate()
        ));
        let flag_v = *state.last_value.get(&self.cfg.flag_off).unwrap_or(&0);
        lines.push(format!(
            "flag 0x{:08X} & 0x{:08X} => 0x{:08X} (raw=0x{:08X})",
            self.cfg.flag_off,
            self.cfg.flag_mask,
            flag_v & self.cfg.flag_mask,
            flag_v
        ));
        for (addr, pred) in &self.cfg.predicates {
            let cur = *state.last_value.get(addr).unwrap_or(&0);
            let hist = state
                .history
                .get(addr)
                .map(|h| h.as_slice_oldest_first())
                .unwrap_or_default();
            let ok = pred.check(cur, &hist, now);
            lines.push(format!(
                "pred  0x{:08X}: cur=0x{cur:08X}, require {} -> {}",
                addr,
                pred.describe(),
                if ok { "OK" } else { "FAIL" }
            ));
        }
        for &addr in &self.watch_addrs {
            let cur = *state.last_value.get(&addr).unwrap_or(&0);
            lines.push(format!("addr 0x{addr:08X}: current=0x{cur:08X}"));
            if let Some(h) = state.history.get(&addr) {
                for (i, sample) in h.last_three().iter().enumerate() {
                    lines.push(format!("  -#{} 0x{:08X} @ {}", i + 1, sample.value, sample.at_ms));
                }
            }
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

/// Invokes a transition callback with panic isolation (spec.md §7: callback
/// panics are caught, logged, and swallowed; they never stop the monitor).
pub fn invoke_transition_callback<F: FnMut(Health, Health)>(mut callback: F, prev: Health, curr: Health) {
    let result = catch_unwind(AssertUnwindSafe(|| callback(prev, curr)));
    if let Err(payload) = result {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        error!("health transition callback panicked: {msg}");
    }
    warn!("health transition {} -> {}", prev.label(), curr.label());
}
