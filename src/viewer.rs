use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::input::InputState;
use crate::movement::Movement;

/// Position and sight direction of a viewer.
///
/// `forward` is kept normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Pose {
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            forward: (target - position).try_normalize().unwrap_or(Vec3::NEG_Z),
        }
    }
}

/// Projection used to build a viewer's projection matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Symmetric box `[-half_extent, half_extent]` on both axes.
    Orthographic { half_extent: f32, near: f32, far: f32 },
}

impl Projection {
    pub const DEFAULT_FOV_Y: f32 = 45.0_f32 * std::f32::consts::PI / 180.0;

    pub fn perspective(aspect: f32) -> Self {
        Projection::Perspective {
            fov_y: Self::DEFAULT_FOV_Y,
            aspect,
            near: 0.1,
            far: 100.0,
        }
    }

    /// Light-space volume large enough to cover the demo scene.
    pub fn orthographic() -> Self {
        Projection::Orthographic {
            half_extent: 12.0,
            near: 0.1,
            far: 40.0,
        }
    }

    pub fn is_orthographic(&self) -> bool {
        matches!(self, Projection::Orthographic { .. })
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect.max(0.01), near, far),
            Projection::Orthographic {
                half_extent,
                near,
                far,
            } => Mat4::orthographic_rh(
                -half_extent,
                half_extent,
                -half_extent,
                half_extent,
                near,
                far,
            ),
        }
    }
}

/// Camera producing view and projection matrices.
///
/// Matrices are derived from the pose and projection on every query, so
/// they always reflect the current state.
#[derive(Debug, Clone)]
pub struct Viewer {
    pose: Pose,
    projection: Projection,
    movement: Option<Movement>,
}

impl Viewer {
    pub fn new(position: Vec3, target: Vec3, projection: Projection) -> Self {
        Self {
            pose: Pose::looking_at(position, target),
            projection,
            movement: None,
        }
    }

    /// Perspective viewer with the default field of view.
    pub fn perspective(position: Vec3, target: Vec3, aspect: f32) -> Self {
        Self::new(position, target, Projection::perspective(aspect))
    }

    /// Advances the pose through the attached movement, if any.
    pub fn update(&mut self, dt: f32, input: &InputState) {
        if let Some(movement) = self.movement.as_mut() {
            self.pose = movement.advance(self.pose, dt, input);
        }
    }

    /// Takes ownership of `movement`, returning the one it replaces.
    pub fn apply_movement(&mut self, movement: impl Into<Movement>) -> Option<Movement> {
        self.movement.replace(movement.into())
    }

    pub fn clear_movement(&mut self) -> Option<Movement> {
        self.movement.take()
    }

    pub fn movement(&self) -> Option<&Movement> {
        self.movement.as_ref()
    }

    /// Switches to the orthographic light-space projection.
    pub fn set_ortho_projection(&mut self) {
        self.projection = Projection::orthographic();
    }

    /// Switches to a perspective projection, keeping the current aspect ratio
    /// when the viewer was already perspective.
    pub fn set_perspective_projection(&mut self, fov_y: f32, near: f32, far: f32) {
        let aspect = match self.projection {
            Projection::Perspective { aspect, .. } => aspect,
            Projection::Orthographic { .. } => 1.0,
        };
        self.projection = Projection::Perspective {
            fov_y,
            aspect,
            near,
            far,
        };
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    /// Updates the aspect ratio of a perspective projection.
    pub fn set_aspect(&mut self, new_aspect: f32) {
        if let Projection::Perspective { aspect, .. } = &mut self.projection {
            *aspect = new_aspect;
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        if let Some(forward) = (target - self.pose.position).try_normalize() {
            self.pose.forward = forward;
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.pose.position = position;
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn position(&self) -> Vec3 {
        self.pose.position
    }

    pub fn sight_direction(&self) -> Vec3 {
        self.pose.forward
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn view_matrix(&self) -> Mat4 {
        // Looking straight up or down makes Y a degenerate up vector.
        let up = if self.pose.forward.dot(Vec3::Y).abs() > 0.999 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_to_rh(self.pose.position, self.pose.forward, up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
