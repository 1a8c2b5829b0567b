use std::path::PathBuf;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Fatal initialization errors (spec.md §7): these terminate the process.
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("shared-memory segment not found: {0}")]
    NotFound(PathBuf),

    #[error("segment {path} is too small ({actual} bytes, need at least {needed})")]
    TooSmall {
        path: PathBuf,
        actual: u64,
        needed: u64,
    },

    #[error("segment {0} does not carry the LGMP magic tag")]
    NotLgmp(PathBuf),

    #[error("failed to map segment {path}: {source}")]
    MapFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "word access at offset 0x{offset:x} (len {len}) is out of bounds (segment size {size})"
    )]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
}

/// Fails this preflight attempt; recoverable by retrying on a health transition.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error(
        "no ACK candidate accelerated the producer index by at least margin={margin} after scanning {scanned} offsets"
    )]
    AckNotFound { scanned: usize, margin: u32 },

    #[error(transparent)]
    Segment(#[from] SegmentError),
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("failed to connect to RFB endpoint {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("RFB handshake failed: {0}")]
    Handshake(String),

    #[error("RFB connection closed unexpectedly")]
    Eof,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Segment(#[from] SegmentError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Input(#[from] InputError),
}
