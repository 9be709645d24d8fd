//! Backend that records every call instead of talking to a GPU.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use anyhow::Result;

use super::{
    ClearOps, DrawCall, Extent, FrameStatus, PassDesc, PassTarget, ProgramDesc, ProgramOutput,
    RenderBackend, TextureSlot, Viewport,
};
use crate::error::{EngineError, EngineResult};
use crate::mesh::Vertex;
use crate::texture::ImageData;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedProgram {
    pub id: u64,
    pub label: String,
    pub output: ProgramOutput,
    pub slots: Vec<TextureSlot>,
    pub uniform_size: usize,
}

#[derive(Debug)]
pub(crate) struct RecordedGeometry {
    pub id: u64,
    pub index_count: usize,
    released: Rc<RefCell<Vec<u64>>>,
}

impl Drop for RecordedGeometry {
    fn drop(&mut self) {
        self.released.borrow_mut().push(self.id);
    }
}

#[derive(Debug)]
pub(crate) struct RecordedTexture {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub(crate) struct RecordedDepthTarget {
    pub id: u64,
    pub extent: Extent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordedTarget {
    Screen,
    Depth(u64),
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedDraw {
    pub program: String,
    pub uniforms: Vec<u8>,
    pub geometry: u64,
    pub diffuse: Option<u64>,
    pub depth: Option<u64>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedPass {
    pub label: String,
    pub target: RecordedTarget,
    pub color_attachment: bool,
    pub viewport: Viewport,
    pub clear: ClearOps,
    pub draws: Vec<RecordedDraw>,
}

pub(crate) struct RecordingBackend {
    size: Extent,
    next_id: u64,
    failing: HashSet<String>,
    current: Option<RecordedPass>,
    released: Rc<RefCell<Vec<u64>>>,
    pub programs: Vec<RecordedProgram>,
    pub passes: Vec<RecordedPass>,
    pub frames: usize,
    pub presents: usize,
    pub frame_status: FrameStatus,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Extent::new(width, height),
            next_id: 0,
            failing: HashSet::new(),
            current: None,
            released: Rc::new(RefCell::new(Vec::new())),
            programs: Vec::new(),
            passes: Vec::new(),
            frames: 0,
            presents: 0,
            frame_status: FrameStatus::Ready,
        }
    }

    /// Makes the next compilation of `label` fail.
    pub fn fail_program(&mut self, label: &str) {
        self.failing.insert(label.to_string());
    }

    /// Ids of geometries dropped so far, in drop order.
    pub fn released(&self) -> Vec<u64> {
        self.released.borrow().clone()
    }

    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|pass| pass.draws.len()).sum()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl RenderBackend for RecordingBackend {
    type Program = RecordedProgram;
    type Geometry = RecordedGeometry;
    type Texture = RecordedTexture;
    type DepthTarget = RecordedDepthTarget;

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> EngineResult<RecordedProgram> {
        if self.failing.remove(desc.label) {
            return Err(EngineError::ShaderCompile {
                label: desc.label.to_string(),
                message: "rejected by recording backend".to_string(),
            });
        }
        let program = RecordedProgram {
            id: self.next_id(),
            label: desc.label.to_string(),
            output: desc.output,
            slots: desc.slots.to_vec(),
            uniform_size: desc.uniform_size,
        };
        self.programs.push(program.clone());
        Ok(program)
    }

    fn upload_geometry(
        &mut self,
        _label: &str,
        _vertices: &[Vertex],
        indices: &[u32],
    ) -> RecordedGeometry {
        RecordedGeometry {
            id: self.next_id(),
            index_count: indices.len(),
            released: Rc::clone(&self.released),
        }
    }

    fn create_texture(&mut self, _label: &str, image: &ImageData) -> RecordedTexture {
        RecordedTexture {
            id: self.next_id(),
            width: image.width,
            height: image.height,
        }
    }

    fn create_depth_target(&mut self, _label: &str, extent: Extent) -> RecordedDepthTarget {
        RecordedDepthTarget {
            id: self.next_id(),
            extent,
        }
    }

    fn surface_size(&self) -> Extent {
        self.size
    }

    fn resize(&mut self, size: Extent) {
        if !size.is_empty() {
            self.size = size;
        }
    }

    fn begin_frame(&mut self) -> Result<FrameStatus> {
        self.frames += 1;
        Ok(self.frame_status)
    }

    fn begin_pass(&mut self, pass: PassDesc<'_, Self>) {
        assert!(self.current.is_none(), "pass {} began inside another pass", pass.label);
        let (target, color_attachment) = match pass.target {
            PassTarget::Screen => (RecordedTarget::Screen, true),
            PassTarget::Depth(depth) => (RecordedTarget::Depth(depth.id), false),
        };
        self.current = Some(RecordedPass {
            label: pass.label.to_string(),
            target,
            color_attachment,
            viewport: pass.viewport,
            clear: pass.clear,
            draws: Vec::new(),
        });
    }

    fn draw(&mut self, call: DrawCall<'_, Self>) {
        let pass = self.current.as_mut().expect("draw outside of a pass");
        pass.draws.push(RecordedDraw {
            program: call.program.label.clone(),
            uniforms: call.uniforms.to_vec(),
            geometry: call.geometry.id,
            diffuse: call.textures.diffuse.map(|texture| texture.id),
            depth: call.textures.depth.map(|depth| depth.id),
        });
    }

    fn end_pass(&mut self) {
        let pass = self.current.take().expect("end_pass without a pass");
        self.passes.push(pass);
    }

    fn present(&mut self) {
        assert!(self.current.is_none(), "present with an open pass");
        self.presents += 1;
    }
}
