pub mod ack;
pub mod cli;
pub mod error;
pub mod geometry;
pub mod history;
pub mod input;
pub mod logging;
pub mod monitor;
pub mod predicate;
pub mod preflight;
pub mod profile;
pub mod pump;
pub mod rate;
pub mod ring;
pub mod segment;
pub mod shell;

pub use error::{Error, InputError, PreflightError, SegmentError};
pub use geometry::{Bpp, Geometry};
pub use logging::init as init_logging;
pub use monitor::{Health, MonitorConfig, SignalMonitor, Verdict};
pub use ring::RingReader;
pub use segment::SegmentMap;
