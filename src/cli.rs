use std::path::PathBuf;

use clap::Parser;

use crate::geometry::Bpp;

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

fn parse_usize(s: &str) -> Result<usize, std::num::ParseIntError> {
    parse_u32(s).map(|v| v as usize)
}

/// Window size as `WxH`, e.g. `1920x1080`.
#[derive(Clone, Copy, Debug)]
pub struct WindowSize {
    pub w: u32,
    pub h: u32,
}

impl std::str::FromStr for WindowSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("expected WxH, got {s:?}"))?;
        Ok(WindowSize {
            w: w.parse().map_err(|e| format!("{e}"))?,
            h: h.parse().map_err(|e| format!("{e}"))?,
        })
    }
}

/// Shared-memory LGMP framebuffer mirror client, matching the original
/// `main.py` argument surface 1:1 plus ambient logging flags.
#[derive(Parser, Debug)]
#[command(name = "lgmp-client", version, about)]
pub struct Cli {
    #[arg(long, default_value = "/dev/shm/looking-glass")]
    pub shm: PathBuf,

    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(3..=4))]
    pub bpp: u8,

    #[arg(long, default_value_t = 1920)]
    pub width: u32,

    #[arg(long, default_value_t = 1080)]
    pub height: u32,

    #[arg(long, default_value_t = 5888)]
    pub pitch: u32,

    /// Forced absolute slot-0 byte offset.
    #[arg(long, value_parser = parse_usize)]
    pub offset: Option<usize>,

    #[arg(long, default_value_t = 0)]
    pub slot: u32,

    #[arg(long, default_value = "1920x1080")]
    pub win: WindowSize,

    #[arg(long)]
    pub no_preflight: bool,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long = "idx-off", value_parser = parse_usize)]
    pub idx_off: Option<usize>,

    #[arg(long = "flag-off", value_parser = parse_usize)]
    pub flag_off: Option<usize>,

    #[arg(long = "flag-mask", value_parser = parse_u32)]
    pub flag_mask: Option<u32>,

    #[arg(long = "health-fps-ok", default_value_t = 30.0)]
    pub health_fps_ok: f64,

    #[arg(long = "health-fps-dead", default_value_t = 0.5)]
    pub health_fps_dead: f64,

    #[arg(long = "health-relaxed")]
    pub health_relaxed: bool,

    #[arg(long = "vnc-host")]
    pub vnc_host: Option<String>,

    #[arg(long = "vnc-port", default_value_t = 5901)]
    pub vnc_port: u16,

    #[arg(long = "vnc-offset-x", default_value_t = 0)]
    pub vnc_offset_x: i32,

    #[arg(long = "vnc-offset-y", default_value_t = 0)]
    pub vnc_offset_y: i32,

    #[arg(long = "vnc-scale-x", default_value_t = 1.0)]
    pub vnc_scale_x: f64,

    #[arg(long = "vnc-scale-y", default_value_t = 1.0)]
    pub vnc_scale_y: f64,

    #[arg(long = "no-input")]
    pub no_input: bool,

    #[arg(long = "snapshot-log", default_value = "signal_snapshots.txt")]
    pub snapshot_log: PathBuf,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    pub fn bpp(&self) -> Bpp {
        match self.bpp {
            4 => Bpp::Bgra,
            _ => Bpp::Bgr,
        }
    }
}
