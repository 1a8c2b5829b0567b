use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};

use crate::error::InputError;
use crate::shell::InputSink;

/// RFB pointer-event button-mask bits for transient wheel presses, matching
/// `on_scroll`'s edge-only encoding (up/down/right/left).
pub const WHEEL_UP: u8 = 0x08;
pub const WHEEL_DOWN: u8 = 0x10;
pub const WHEEL_RIGHT: u8 = 0x20;
pub const WHEEL_LEFT: u8 = 0x40;

#[derive(Clone, Copy, Debug)]
pub struct Calibration {
    pub offset_x: i32,
    pub offset_y: i32,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset_x: 0,
            offset_y: 0,
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }
}

impl Calibration {
    /// Applies offset/scale then clamps to `[0, remote)` per axis
    /// (`input_vnc.py`'s `_current_window_xy`).
    pub fn apply(&self, x: i32, y: i32, remote_w: Option<u16>, remote_h: Option<u16>) -> (i32, i32) {
        let mut xr = (x as f64 * self.scale_x) as i32 + self.offset_x;
        let mut yr = (y as f64 * self.scale_y) as i32 + self.offset_y;
        if let Some(w) = remote_w {
            xr = xr.clamp(0, w as i32 - 1);
        }
        if let Some(h) = remote_h {
            yr = yr.clamp(0, h as i32 - 1);
        }
        (xr, yr)
    }
}

enum Event {
    Pointer { x: i32, y: i32, button_mask: u8 },
    Key { keysym: u32, down: bool },
}

/// `InputSink` that forwards calibrated pointer/key events to a VNC/RFB
/// server over its own worker thread (spec.md §4.7). A connection or I/O
/// failure stops that thread only; it never propagates to the render or
/// monitor tasks.
pub struct RfbInputProxy {
    tx: mpsc::Sender<Event>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    calibration: Calibration,
    remote_w: u16,
    remote_h: u16,
}

struct RfbConnection {
    stream: TcpStream,
    remote_w: u16,
    remote_h: u16,
}

impl RfbConnection {
    fn connect(host: &str, port: u16) -> Result<Self, InputError> {
        let stream =
            TcpStream::connect((host, port)).map_err(|source| InputError::Connect {
                host: host.to_string(),
                port,
                source,
            })?;
        stream.set_nodelay(true).ok();
        Self::handshake(stream)
    }

    fn recv_exact(stream: &mut TcpStream, n: usize) -> Result<Vec<u8>, InputError> {
        let mut buf = vec![0u8; n];
        stream.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                InputError::Eof
            } else {
                InputError::Io(e)
            }
        })?;
        Ok(buf)
    }

    /// RFB 3.8 handshake: ProtocolVersion, security type None, ClientInit,
    /// ServerInit, SetEncodings (empty), matching `_connect_and_handshake`.
    fn handshake(mut stream: TcpStream) -> Result<Self, InputError> {
        let greeting = Self::recv_exact(&mut stream, 12)?;
        if !greeting.starts_with(b"RFB ") {
            return Err(InputError::Handshake("invalid server greeting".into()));
        }
        stream.write_all(b"RFB 003.008\n")?;

        let count = Self::recv_exact(&mut stream, 1)?[0] as usize;
        let types = Self::recv_exact(&mut stream, count)?;
        if !types.contains(&1) {
            return Err(InputError::Handshake(format!(
                "server doesn't offer None security: {types:?}"
            )));
        }
        stream.write_all(&[1])?;

        let result = Self::recv_exact(&mut stream, 4)?;
        if u32::from_be_bytes(result.try_into().unwrap()) != 0 {
            return Err(InputError::Handshake("security negotiation failed".into()));
        }

        stream.write_all(&[1])?; // ClientInit: share desktop

        let header = Self::recv_exact(&mut stream, 24)?;
        let remote_w = u16::from_be_bytes([header[0], header[1]]);
        let remote_h = u16::from_be_bytes([header[2], header[3]]);
        let name_len = u32::from_be_bytes(header[20..24].try_into().unwrap()) as usize;
        let _name = Self::recv_exact(&mut stream, name_len)?;

        info!("rfb input proxy connected, remote {remote_w}x{remote_h}");

        // SetEncodings with an empty list.
        stream.write_all(&[2, 0, 0, 0])?;

        Ok(Self {
            stream,
            remote_w,
            remote_h,
        })
    }

    fn send_pointer(&mut self, x: i32, y: i32, button_mask: u8) -> Result<(), InputError> {
        let mut msg = [0u8; 6];
        msg[0] = 5;
        msg[1] = button_mask;
        msg[2..4].copy_from_slice(&(x as u16).to_be_bytes());
        msg[4..6].copy_from_slice(&(y as u16).to_be_bytes());
        self.stream.write_all(&msg)?;
        Ok(())
    }

    fn send_key(&mut self, keysym: u32, down: bool) -> Result<(), InputError> {
        let mut msg = [0u8; 8];
        msg[0] = 4;
        msg[1] = if down { 1 } else { 0 };
        msg[4..8].copy_from_slice(&keysym.to_be_bytes());
        self.stream.write_all(&msg)?;
        Ok(())
    }
}

impl RfbInputProxy {
    /// Connects, handshakes, and starts the worker thread. Returns
    /// `InputError` only for the initial connection attempt; once running
    /// the proxy isolates failures to its own thread.
    pub fn start(host: String, port: u16, calibration: Calibration) -> Result<Self, InputError> {
        let mut conn = RfbConnection::connect(&host, port)?;
        let (remote_w, remote_h) = (conn.remote_w, conn.remote_h);
        let (tx, rx) = mpsc::channel::<Event>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();

        let handle = thread::spawn(move || {
            while !stop2.load(Ordering::Relaxed) {
                match rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(Event::Pointer { x, y, button_mask }) => {
                        if let Err(e) = conn.send_pointer(x, y, button_mask) {
                            warn!("rfb input proxy pointer write failed: {e}");
                            break;
                        }
                    }
                    Ok(Event::Key { keysym, down }) => {
                        if let Err(e) = conn.send_key(keysym, down) {
                            warn!("rfb input proxy key write failed: {e}");
                            break;
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(Self {
            tx,
            stop,
            handle: Some(handle),
            calibration,
            remote_w,
            remote_h,
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }

    /// Encodes a scroll gesture as transient wheel button-mask bits,
    /// pressed then released without latching into steady button state
    /// (`on_scroll`).
    pub fn scroll(&self, x: i32, y: i32, base_mask: u8, dx: f64, dy: f64) {
        if dy > 0.0 {
            self.pointer(x, y, base_mask | WHEEL_UP);
            self.pointer(x, y, base_mask);
        } else if dy < 0.0 {
            self.pointer(x, y, base_mask | WHEEL_DOWN);
            self.pointer(x, y, base_mask);
        }
        if dx > 0.0 {
            self.pointer(x, y, base_mask | WHEEL_RIGHT);
            self.pointer(x, y, base_mask);
        } else if dx < 0.0 {
            self.pointer(x, y, base_mask | WHEEL_LEFT);
            self.pointer(x, y, base_mask);
        }
    }
}

impl InputSink for RfbInputProxy {
    /// Applies calibration (offset/scale, then remote-geometry clamping)
    /// before handing the event to the worker thread.
    fn pointer(&self, x: i32, y: i32, button_mask: u8) {
        let (xr, yr) = self
            .calibration
            .apply(x, y, Some(self.remote_w), Some(self.remote_h));
        let _ = self.tx.send(Event::Pointer {
            x: xr,
            y: yr,
            button_mask,
        });
    }

    fn key(&self, keysym: u32, down: bool) {
        let _ = self.tx.send(Event::Key { keysym, down });
    }
}

impl Drop for RfbInputProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_applies_offset_and_scale_before_clamping() {
        let cal = Calibration {
            offset_x: 10,
            offset_y: -5,
            scale_x: 2.0,
            scale_y: 1.0,
        };
        let (x, y) = cal.apply(100, 100, Some(300), Some(300));
        assert_eq!(x, 210);
        assert_eq!(y, 95);
    }

    #[test]
    fn calibration_clamps_to_remote_bounds() {
        let cal = Calibration::default();
        let (x, y) = cal.apply(-10, 99999, Some(50), Some(50));
        assert_eq!(x, 0);
        assert_eq!(y, 49);
    }

    #[test]
    fn calibration_without_remote_size_is_unclamped() {
        let cal = Calibration::default();
        let (x, y) = cal.apply(-10, 9999, None, None);
        assert_eq!((x, y), (-10, 9999));
    }
}
