use glam::Vec4;

use crate::mesh::MeshData;
use crate::render::{DrawCall, RenderBackend, TextureBindings};
use crate::shader::Shader;

/// Rectangle in normalized device coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    pub const FULL: Self = Self {
        x: -1.0,
        y: -1.0,
        width: 2.0,
        height: 2.0,
    };

    /// Square in the top right corner covering `fraction` of each axis.
    pub fn top_right(fraction: f32) -> Self {
        let size = 2.0 * fraction.clamp(0.0, 1.0);
        Self {
            x: 1.0 - size,
            y: 1.0 - size,
            width: size,
            height: size,
        }
    }

    fn to_vec4(self) -> Vec4 {
        Vec4::new(self.x, self.y, self.width, self.height)
    }
}

/// Quad used to inspect a depth texture on screen.
pub struct ScreenQuad<B: RenderBackend> {
    geometry: B::Geometry,
    /// Exponent applied to depth values before display. Perspective depth
    /// maps need a large value to show any contrast.
    depth_power: f32,
}

impl<B: RenderBackend> ScreenQuad<B> {
    pub fn new(backend: &mut B) -> Self {
        let quad = MeshData::quad();
        Self {
            geometry: backend.upload_geometry("screen-quad", &quad.vertices, &quad.indices),
            depth_power: 1.0,
        }
    }

    pub fn with_depth_power(mut self, depth_power: f32) -> Self {
        self.depth_power = depth_power;
        self
    }

    pub fn draw(
        &self,
        backend: &mut B,
        shader: &mut Shader<B>,
        depth: &B::DepthTarget,
        rect: ScreenRect,
    ) {
        shader.set_vec4("rect", rect.to_vec4());
        shader.set_float("depth_power", self.depth_power);
        backend.draw(DrawCall {
            program: shader.program(),
            uniforms: shader.uniforms().bytes(),
            geometry: &self.geometry,
            textures: TextureBindings {
                diffuse: None,
                depth: Some(depth),
            },
        });
    }
}
