use std::collections::HashSet;

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    pub const W: Self = Self::Character('W');
    pub const A: Self = Self::Character('A');
    pub const S: Self = Self::Character('S');
    pub const D: Self = Self::Character('D');
}

/// Friendly names for the non-printable keys the engine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Escape,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
}

/// Resolution and color depth of the monitor the window is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    /// Refresh rate in millihertz, as reported by the windowing system.
    pub refresh_rate_millihertz: u32,
    pub red_bits: u8,
    pub green_bits: u8,
    pub blue_bits: u8,
}

impl VideoMode {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            refresh_rate_millihertz: 60_000,
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
        }
    }

    pub fn refresh_rate_hz(&self) -> f32 {
        self.refresh_rate_millihertz as f32 / 1000.0
    }

    /// Converts a mouse delta in pixels into a fraction of the screen size.
    pub fn normalize_delta(&self, delta: Vec2) -> Vec2 {
        Vec2::new(
            delta.x / self.width.max(1) as f32,
            delta.y / self.height.max(1) as f32,
        )
    }
}

impl Default for VideoMode {
    fn default() -> Self {
        let (width, height) = crate::config::FALLBACK_WINDOW_SIZE;
        Self::new(width, height)
    }
}

/// Input snapshot for the current frame.
///
/// Keys stay down until released; the mouse delta accumulates between
/// [`InputState::end_frame`] calls.
#[derive(Debug, Default, Clone)]
pub struct InputState {
    keys: HashSet<KeyCode>,
    mouse_delta: Vec2,
    close_requested: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_down(&mut self, key: KeyCode) {
        self.keys.insert(key);
        if key == KeyCode::Named(NamedKey::Escape) {
            self.close_requested = true;
        }
    }

    pub fn set_key_up(&mut self, key: KeyCode) {
        self.keys.remove(&key);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn add_mouse_delta(&mut self, delta: Vec2) {
        self.mouse_delta += delta;
    }

    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Drops per-frame state once every consumer has seen it.
    pub fn end_frame(&mut self) {
        self.mouse_delta = Vec2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_state_tracks_keys() {
        let mut state = InputState::new();
        state.set_key_down(KeyCode::W);
        assert!(state.is_key_down(KeyCode::W));
        state.set_key_up(KeyCode::W);
        assert!(!state.is_key_down(KeyCode::W));
    }

    #[test]
    fn mouse_delta_accumulates_until_end_of_frame() {
        let mut state = InputState::new();
        state.add_mouse_delta(Vec2::new(3.0, -1.0));
        state.add_mouse_delta(Vec2::new(2.0, 4.0));
        assert_eq!(state.mouse_delta(), Vec2::new(5.0, 3.0));
        state.end_frame();
        assert_eq!(state.mouse_delta(), Vec2::ZERO);
    }

    #[test]
    fn escape_requests_close() {
        let mut state = InputState::new();
        assert!(!state.close_requested());
        state.set_key_down(KeyCode::Named(NamedKey::Escape));
        assert!(state.close_requested());
    }

    #[test]
    fn video_mode_normalizes_by_resolution() {
        let mode = VideoMode::new(1920, 1080);
        let delta = mode.normalize_delta(Vec2::new(960.0, 540.0));
        assert_eq!(delta, Vec2::new(0.5, 0.5));
        assert!((mode.refresh_rate_hz() - 60.0).abs() < f32::EPSILON);
    }
}
