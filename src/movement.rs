//! Strategies that move a [`Viewer`](crate::viewer::Viewer) over time.

use glam::Vec3;

use crate::input::{InputState, KeyCode, NamedKey, VideoMode};
use crate::viewer::Pose;

const MAX_PITCH: f32 = 89.0_f32 * std::f32::consts::PI / 180.0;

/// Movement strategy owned by a single viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum Movement {
    FirstPerson(FirstPerson),
    Circle(CircleMovement),
}

impl Movement {
    /// Advances `pose` by `dt` seconds and returns the new pose.
    pub fn advance(&mut self, pose: Pose, dt: f32, input: &InputState) -> Pose {
        match self {
            Movement::FirstPerson(movement) => movement.advance(pose, dt, input),
            Movement::Circle(movement) => movement.advance(pose, dt),
        }
    }
}

impl From<FirstPerson> for Movement {
    fn from(movement: FirstPerson) -> Self {
        Movement::FirstPerson(movement)
    }
}

impl From<CircleMovement> for Movement {
    fn from(movement: CircleMovement) -> Self {
        Movement::Circle(movement)
    }
}

/// Orbit around `center` in the horizontal plane, always facing the focus
/// point, which is the center unless [`CircleMovement::with_focus`] moves it.
///
/// The position only depends on the accumulated time, so any split of the
/// same total `dt` lands on the same point.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleMovement {
    center: Vec3,
    focus: Vec3,
    radius: f32,
    angular_speed: f32,
    elapsed: f64,
}

impl CircleMovement {
    pub fn new(center: Vec3, radius: f32, angular_speed: f32) -> Self {
        Self {
            center,
            focus: center,
            radius,
            angular_speed,
            elapsed: 0.0,
        }
    }

    /// Faces `focus` instead of the center. A light orbiting above a scene
    /// uses this to look down at it.
    pub fn with_focus(mut self, focus: Vec3) -> Self {
        self.focus = focus;
        self
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn focus(&self) -> Vec3 {
        self.focus
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn angular_speed(&self) -> f32 {
        self.angular_speed
    }

    /// Total time accumulated through [`CircleMovement::advance`].
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Restarts the orbit at angle zero.
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }

    /// Position on the orbit after `time` seconds.
    pub fn position_at(&self, time: f64) -> Vec3 {
        let angle = self.angular_speed as f64 * time;
        let offset = Vec3::new(angle.cos() as f32, 0.0, angle.sin() as f32) * self.radius;
        self.center + offset
    }

    pub fn advance(&mut self, pose: Pose, dt: f32) -> Pose {
        self.elapsed += dt.max(0.0) as f64;
        let position = self.position_at(self.elapsed);
        // A zero radius orbit sits on the center; keep the previous heading.
        let forward = (self.focus - position)
            .try_normalize()
            .unwrap_or(pose.forward);
        Pose { position, forward }
    }
}

/// Keyboard and mouse driven fly camera.
///
/// W/S move along the sight direction, A/D strafe, Space and LeftShift move
/// vertically and LeftCtrl sprints. Mouse movement is measured relative to
/// the video mode so the turn rate does not depend on the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct FirstPerson {
    video_mode: VideoMode,
    speed: f32,
    sprint_multiplier: f32,
    /// Radians turned for a mouse sweep across the full screen width.
    turn_rate: f32,
    orientation: Option<(f32, f32)>,
}

impl FirstPerson {
    pub fn new(video_mode: VideoMode) -> Self {
        Self {
            video_mode,
            speed: 4.0,
            sprint_multiplier: 3.0,
            turn_rate: std::f32::consts::PI,
            orientation: None,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_turn_rate(mut self, turn_rate: f32) -> Self {
        self.turn_rate = turn_rate;
        self
    }

    pub fn video_mode(&self) -> VideoMode {
        self.video_mode
    }

    /// Current yaw and pitch in radians, once the first update has run.
    pub fn orientation(&self) -> Option<(f32, f32)> {
        self.orientation
    }

    pub fn advance(&mut self, pose: Pose, dt: f32, input: &InputState) -> Pose {
        let (mut yaw, mut pitch) = self
            .orientation
            .unwrap_or_else(|| yaw_pitch_from(pose.forward));

        let delta = self.video_mode.normalize_delta(input.mouse_delta());
        yaw += delta.x * self.turn_rate;
        pitch = (pitch - delta.y * self.turn_rate).clamp(-MAX_PITCH, MAX_PITCH);
        self.orientation = Some((yaw, pitch));

        let forward = forward_from(yaw, pitch);
        let right = forward.cross(Vec3::Y).normalize_or_zero();

        let mut direction = Vec3::ZERO;
        if input.is_key_down(KeyCode::W) {
            direction += forward;
        }
        if input.is_key_down(KeyCode::S) {
            direction -= forward;
        }
        if input.is_key_down(KeyCode::D) {
            direction += right;
        }
        if input.is_key_down(KeyCode::A) {
            direction -= right;
        }
        if input.is_key_down(KeyCode::Named(NamedKey::Space)) {
            direction += Vec3::Y;
        }
        if input.is_key_down(KeyCode::Named(NamedKey::LeftShift)) {
            direction -= Vec3::Y;
        }

        let mut speed = self.speed;
        if input.is_key_down(KeyCode::Named(NamedKey::LeftCtrl)) {
            speed *= self.sprint_multiplier;
        }

        Pose {
            position: pose.position + direction.normalize_or_zero() * speed * dt.max(0.0),
            forward,
        }
    }
}

fn yaw_pitch_from(forward: Vec3) -> (f32, f32) {
    let forward = forward.normalize_or_zero();
    let yaw = forward.z.atan2(forward.x);
    let pitch = forward.y.clamp(-1.0, 1.0).asin().clamp(-MAX_PITCH, MAX_PITCH);
    (yaw, pitch)
}

fn forward_from(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        yaw.cos() * pitch.cos(),
        pitch.sin(),
        yaw.sin() * pitch.cos(),
    )
    .normalize()
}
