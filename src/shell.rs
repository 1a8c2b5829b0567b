use std::sync::Mutex;

use crate::geometry::Geometry;
use crate::monitor::Health;

/// Consumes decoded tight frames for display (spec.md §4.6). A real
/// windowing backend uploads `frame` to a texture; `NullShell` just records
/// the call.
pub trait FrameConsumer {
    fn on_frame(&self, geometry: &Geometry, frame: &[u8]);
}

/// Displays the current health verdict to the user, e.g. as an on-screen
/// banner (spec.md §4.6).
pub trait HealthOverlay {
    fn on_health(&self, health: Health, reason: &str);
}

/// Accepts calibrated pointer/key events for forwarding to the guest
/// (spec.md §4.6); `input::RfbInputProxy` is the concrete implementor.
pub trait InputSink {
    fn pointer(&self, x: i32, y: i32, button_mask: u8);
    fn key(&self, keysym: u32, down: bool);
}

#[derive(Default)]
struct Recorded {
    frames: usize,
    last_frame_len: usize,
    health_calls: Vec<(Health, String)>,
    pointer_calls: Vec<(i32, i32, u8)>,
    key_calls: Vec<(u32, bool)>,
}

/// Reference `FrameConsumer + HealthOverlay + InputSink` implementation with
/// no windowing dependency: records every call for assertions. Used by
/// integration tests and by the CLI's headless mode.
#[derive(Default)]
pub struct NullShell {
    state: Mutex<Recorded>,
}

impl NullShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().unwrap().frames
    }

    pub fn last_frame_len(&self) -> usize {
        self.state.lock().unwrap().last_frame_len
    }

    pub fn health_history(&self) -> Vec<(Health, String)> {
        self.state.lock().unwrap().health_calls.clone()
    }

    pub fn pointer_events(&self) -> Vec<(i32, i32, u8)> {
        self.state.lock().unwrap().pointer_calls.clone()
    }

    pub fn key_events(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().key_calls.clone()
    }
}

impl FrameConsumer for NullShell {
    fn on_frame(&self, _geometry: &Geometry, frame: &[u8]) {
        let mut s = self.state.lock().unwrap();
        s.frames += 1;
        s.last_frame_len = frame.len();
    }
}

impl HealthOverlay for NullShell {
    fn on_health(&self, health: Health, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .health_calls
            .push((health, reason.to_string()));
    }
}

impl InputSink for NullShell {
    fn pointer(&self, x: i32, y: i32, button_mask: u8) {
        self.state.lock().unwrap().pointer_calls.push((x, y, button_mask));
    }

    fn key(&self, keysym: u32, down: bool) {
        self.state.lock().unwrap().key_calls.push((keysym, down));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Bpp, Geometry};

    #[test]
    fn records_frames_health_and_input_calls() {
        let shell = NullShell::new();
        let geom = Geometry::new(4, 2, 12, Bpp::Bgr, 0x10, 0x1000, 1);

        shell.on_frame(&geom, &[1, 2, 3]);
        shell.on_frame(&geom, &[1, 2, 3, 4]);
        shell.on_health(Health::Ok, "fps=60.0");
        shell.pointer(10, 20, 0x1);
        shell.key(0x61, true);

        assert_eq!(shell.frame_count(), 2);
        assert_eq!(shell.last_frame_len(), 4);
        assert_eq!(shell.health_history(), vec![(Health::Ok, "fps=60.0".to_string())]);
        assert_eq!(shell.pointer_events(), vec![(10, 20, 0x1)]);
        assert_eq!(shell.key_events(), vec![(0x61, true)]);
    }
}
