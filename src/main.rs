use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use lgmp_client::ack::AckMode;
use lgmp_client::cli::Cli;
use lgmp_client::geometry::Geometry;
use lgmp_client::input::{Calibration, RfbInputProxy};
use lgmp_client::monitor::{Health, MonitorConfig, SignalMonitor};
use lgmp_client::preflight::warm_boot_and_find_ack;
use lgmp_client::profile;
use lgmp_client::pump::{AckPump, AckTargetSlot};
use lgmp_client::ring::RingReader;
use lgmp_client::segment::SegmentMap;
use lgmp_client::shell::{FrameConsumer, HealthOverlay, NullShell};

fn main() {
    let cli = Cli::parse();
    lgmp_client::init_logging(if cli.verbose { "debug" } else { &cli.log_level });

    if let Err(e) = run(cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let idx_off = cli.idx_off.unwrap_or(profile::IDX_OFF_DEFAULT);
    let flag_off = cli.flag_off.unwrap_or(profile::FLAG_OFF_DEFAULT);
    let flag_mask = cli.flag_mask.unwrap_or(profile::FLAG_MASK_DEFAULT);

    let geometry = Geometry::new(
        cli.width,
        cli.height,
        cli.pitch,
        cli.bpp(),
        idx_off,
        cli.offset.unwrap_or(0),
        1,
    )
    .with_forced_slot(cli.slot);

    let min_size = geometry.min_segment_size() as u64;
    let mut seg = SegmentMap::open(&cli.shm, Some(min_size))?;
    info!("mapped {} ({} bytes)", cli.shm.display(), seg.size());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
            .expect("failed to install Ctrl-C handler");
    }

    let ack_target: AckTargetSlot = Arc::new(Mutex::new(None::<(usize, AckMode)>));

    if !cli.no_preflight {
        match warm_boot_and_find_ack(
            &mut seg,
            idx_off,
            flag_off,
            flag_mask,
            profile::ACK_RANGES_DEFAULT,
            profile::ACK_FALLBACK_DEFAULT,
            2,
            2.0,
            Duration::from_millis(20),
        ) {
            Ok(target) => {
                *ack_target.lock().unwrap() = Some((target.ack_off, target.mode));
            }
            Err(e) => {
                // Recoverable: logged, renderer/monitor still start so a
                // later dead -> ok transition can retry (spec.md §7).
                warn!("preflight failed: {e}");
            }
        }
    }

    let monitor = Arc::new(SignalMonitor::new(MonitorConfig {
        idx_off,
        flag_off,
        flag_mask,
        predicates: profile::default_predicates(),
        poll_period: Duration::from_millis(10),
        rate_horizon: Duration::from_secs(1),
        fps_ok: cli.health_fps_ok,
        fps_dead: cli.health_fps_dead,
        relaxed: cli.health_relaxed,
    }));

    let shell = Arc::new(NullShell::new());

    let input: Option<Arc<RfbInputProxy>> = if cli.no_input {
        None
    } else if let Some(host) = cli.vnc_host.clone() {
        let calibration = Calibration {
            offset_x: cli.vnc_offset_x,
            offset_y: cli.vnc_offset_y,
            scale_x: cli.vnc_scale_x,
            scale_y: cli.vnc_scale_y,
        };
        match RfbInputProxy::start(host, cli.vnc_port, calibration) {
            Ok(proxy) => Some(Arc::new(proxy)),
            Err(e) => {
                warn!("input proxy failed to start, continuing without input: {e}");
                None
            }
        }
    } else {
        None
    };
    // Keeps the proxy (and its worker thread) alive for the process
    // lifetime; the HostShell collaborator would route dispatched events
    // into `input.pointer()`/`input.key()` when one is wired in.
    let _input_guard = input;

    let pump_handle = {
        let stop = stop.clone();
        let shm_path = cli.shm.clone();
        let ack_target = ack_target.clone();
        thread::spawn(move || {
            // `pump.run` returns as soon as `ack_target` no longer names its
            // own (ack_off, mode) — either the supervisor cleared it ahead of
            // a preflight retry, or a retry already landed a new target — so
            // this outer loop always picks up the current target on its next
            // iteration instead of pumping a stale one forever.
            while !stop.load(Ordering::Relaxed) {
                let target = *ack_target.lock().unwrap();
                if let Some((ack_off, mode)) = target {
                    if let Ok(mut pump_seg) = SegmentMap::open(&shm_path, None) {
                        let pump = AckPump::new(ack_off, mode, lgmp_client::pump::DEFAULT_INTERVAL);
                        let _ = pump.run(&mut pump_seg, idx_off, &stop, &ack_target);
                    }
                } else {
                    thread::sleep(Duration::from_millis(100));
                }
            }
        })
    };

    let monitor_handle = {
        let monitor = monitor.clone();
        let stop = stop.clone();
        let shm_path = cli.shm.clone();
        thread::spawn(move || {
            let Ok(poll_seg) = SegmentMap::open(&shm_path, None) else {
                return;
            };
            while !stop.load(Ordering::Relaxed) {
                monitor.poll_once(&poll_seg);
                thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let classify_handle = {
        let monitor = monitor.clone();
        let stop = stop.clone();
        let shell = shell.clone();
        let snapshot_log = cli.snapshot_log.clone();
        let shm_path = cli.shm.clone();
        let flag_off_for_retry = flag_off;
        let flag_mask_for_retry = flag_mask;
        let ack_target = ack_target.clone();
        thread::spawn(move || {
            let mut prev = None;
            let transitions = monitor.transitions();
            while !stop.load(Ordering::Relaxed) {
                let (state, verdict) = monitor.tick(prev);
                prev = Some(state);
                if let Some(v) = verdict {
                    shell.on_health(v.health, &v.reason);
                    if let Err(e) = append_snapshot(&snapshot_log, &monitor.snapshot_text(None)) {
                        warn!("failed to write snapshot log: {e}");
                    }
                }
                while let Ok((from, to)) = transitions.try_recv() {
                    if matches!(from, Health::Dead | Health::Problematic) && to == Health::Ok {
                        info!("health recovered ({from:?} -> {to:?}); re-running preflight");
                        // Clear the shared target first so the pump task's
                        // `run()` notices and releases exclusive write access
                        // to the segment before this re-scan starts probing
                        // it; otherwise the old pump's writes would pollute
                        // the new scan's quiet/pulse-delta measurements.
                        *ack_target.lock().unwrap() = None;
                        thread::sleep(Duration::from_millis(50));
                        if let Ok(mut retry_seg) = SegmentMap::open(&shm_path, None) {
                            if let Ok(target) = warm_boot_and_find_ack(
                                &mut retry_seg,
                                idx_off,
                                flag_off_for_retry,
                                flag_mask_for_retry,
                                profile::ACK_RANGES_DEFAULT,
                                profile::ACK_FALLBACK_DEFAULT,
                                2,
                                1.0,
                                Duration::from_millis(20),
                            ) {
                                *ack_target.lock().unwrap() = Some((target.ack_off, target.mode));
                            }
                        }
                    }
                }
                thread::sleep(Duration::from_millis(200));
            }
        })
    };

    {
        let ring = RingReader::new(&seg, geometry);
        while !stop.load(Ordering::Relaxed) {
            if let Some(frame) = ring.read_current_frame() {
                shell.on_frame(ring.geometry(), &frame);
            }
            thread::sleep(Duration::from_millis(16));
        }
    }

    stop.store(true, Ordering::Relaxed);
    let _ = pump_handle.join();
    let _ = monitor_handle.join();
    let _ = classify_handle.join();

    info!("clean shutdown after {} frames", shell.frame_count());
    Ok(())
}

fn append_snapshot(path: &std::path::Path, text: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{text}")
}
