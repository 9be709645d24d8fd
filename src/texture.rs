use std::path::Path;

use anyhow::Context;
use log::debug;

use crate::error::{EngineError, EngineResult};
use crate::render::{Extent, RenderBackend};

/// Decoded RGBA8 pixels, rows stored top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// A 1x1 image of a single color.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }

    /// Square checkerboard of `cells` x `cells` squares alternating between
    /// `a` and `b`, starting with `a` in the first row.
    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let color = if (x / cell + y / cell) % 2 == 0 { a } else { b };
                pixels.extend_from_slice(&color);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}

/// Decodes an image file into RGBA8.
///
/// With `flip_vertically` the first row of the result is the bottom row of
/// the file, matching texture coordinates that grow upwards.
pub fn load_image(path: &Path, flip_vertically: bool) -> anyhow::Result<ImageData> {
    let mut image =
        image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    if flip_vertically {
        image = image.flipv();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    debug!("decoded {} ({width}x{height})", path.display());
    Ok(ImageData {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Sampled color texture owned by the GPU.
pub struct Texture<B: RenderBackend> {
    handle: B::Texture,
    width: u32,
    height: u32,
}

impl<B: RenderBackend> Texture<B> {
    pub fn upload(backend: &mut B, label: &str, image: &ImageData) -> Self {
        Self {
            handle: backend.create_texture(label, image),
            width: image.width,
            height: image.height,
        }
    }

    pub fn load(backend: &mut B, path: &Path, flip_vertically: bool) -> EngineResult<Self> {
        let image =
            load_image(path, flip_vertically).map_err(|err| EngineError::asset(path, err))?;
        Ok(Self::upload(backend, &path.display().to_string(), &image))
    }

    pub fn handle(&self) -> &B::Texture {
        &self.handle
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Depth-only render target that can later be sampled.
pub struct DepthMap<B: RenderBackend> {
    target: B::DepthTarget,
    extent: Extent,
}

impl<B: RenderBackend> DepthMap<B> {
    pub fn new(backend: &mut B, label: &str, extent: Extent) -> Self {
        Self {
            target: backend.create_depth_target(label, extent),
            extent,
        }
    }

    pub fn target(&self) -> &B::DepthTarget {
        &self.target
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }
}
