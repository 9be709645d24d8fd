//! Seam between the engine and the GPU.
//!
//! The shadow pipeline only talks to a [`RenderBackend`]: it compiles
//! programs, uploads geometry, creates the depth target, and records passes
//! of indexed draws. `wgpu_backend` implements it on top of wgpu.

#[cfg(test)]
pub(crate) mod recording;
pub mod shaders;
pub mod wgpu_backend;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::mesh::Vertex;
use crate::texture::ImageData;

pub use wgpu_backend::WgpuBackend;

/// Size of a render target in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Pixel rectangle a pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(extent: Extent) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }
}

/// Which attachments a program writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramOutput {
    /// Color plus depth-tested geometry, drawn into the screen.
    Color,
    /// Depth only. The program has no fragment stage and no color target.
    DepthOnly,
    /// Color without depth testing, drawn over the screen.
    Overlay,
}

impl ProgramOutput {
    pub fn writes_color(self) -> bool {
        !matches!(self, ProgramOutput::DepthOnly)
    }
}

/// Textures a program samples besides its uniform block.
///
/// The binding numbers are fixed so every WGSL source can declare them
/// without knowing about the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    /// `texture_2d<f32>` at binding 1 with a filtering sampler at binding 2.
    Diffuse,
    /// `texture_depth_2d` at binding 3 with a comparison sampler at binding 4.
    ShadowMap,
    /// `texture_depth_2d` at binding 5, read with `textureLoad`.
    DepthView,
}

/// Everything needed to build a program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    /// WGSL source with a `vs_main` entry point, plus `fs_main` unless the
    /// output is [`ProgramOutput::DepthOnly`].
    pub source: &'a str,
    pub uniform_size: usize,
    pub slots: &'a [TextureSlot],
    pub output: ProgramOutput,
}

/// Clear operations applied when a pass begins. `None` keeps the previous
/// contents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearOps {
    pub color: Option<[f64; 4]>,
    pub depth: Option<f32>,
}

impl ClearOps {
    pub const DEPTH: Self = Self {
        color: None,
        depth: Some(1.0),
    };

    pub const LOAD: Self = Self {
        color: None,
        depth: None,
    };

    pub fn color_and_depth(color: [f64; 4]) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
        }
    }
}

/// Attachment a pass renders into.
pub enum PassTarget<'a, B: RenderBackend + ?Sized> {
    /// The window surface and its depth buffer.
    Screen,
    /// An offscreen depth target. No color attachment exists.
    Depth(&'a B::DepthTarget),
}

pub struct PassDesc<'a, B: RenderBackend + ?Sized> {
    pub label: &'a str,
    pub target: PassTarget<'a, B>,
    pub viewport: Viewport,
    pub clear: ClearOps,
}

/// Textures bound for a single draw.
pub struct TextureBindings<'a, B: RenderBackend + ?Sized> {
    pub diffuse: Option<&'a B::Texture>,
    pub depth: Option<&'a B::DepthTarget>,
}

impl<B: RenderBackend + ?Sized> Default for TextureBindings<'_, B> {
    fn default() -> Self {
        Self {
            diffuse: None,
            depth: None,
        }
    }
}

/// One indexed draw of a whole geometry.
pub struct DrawCall<'a, B: RenderBackend + ?Sized> {
    pub program: &'a B::Program,
    pub uniforms: &'a [u8],
    pub geometry: &'a B::Geometry,
    pub textures: TextureBindings<'a, B>,
}

/// Outcome of acquiring the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Ready,
    /// The surface is temporarily unavailable; nothing should be drawn.
    Skipped,
}

/// GPU operations used by the engine.
///
/// Resources are owned by the returned handles and released when dropped.
/// Passes are strictly sequential: a pass ends before the next one begins.
pub trait RenderBackend {
    type Program;
    type Geometry;
    type Texture;
    type DepthTarget;

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<Self::Program>;

    fn upload_geometry(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Self::Geometry;

    fn create_texture(&mut self, label: &str, image: &ImageData) -> Self::Texture;

    /// Creates a sampleable depth-only render target.
    fn create_depth_target(&mut self, label: &str, extent: Extent) -> Self::DepthTarget;

    fn surface_size(&self) -> Extent;

    fn resize(&mut self, size: Extent);

    fn begin_frame(&mut self) -> Result<FrameStatus>;

    fn begin_pass(&mut self, pass: PassDesc<'_, Self>);

    fn draw(&mut self, call: DrawCall<'_, Self>);

    fn end_pass(&mut self);

    /// Submits the frame and swaps buffers.
    fn present(&mut self);
}
