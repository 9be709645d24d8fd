//! Compiled programs and their named uniform blocks.
//!
//! Uniforms are staged on the CPU in a single block laid out with the WGSL
//! uniform address space rules and copied to the GPU with every draw call.

use bytemuck::bytes_of;
use glam::{Mat4, Vec2, Vec3, Vec4};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::render::shaders::{self, ShaderSources};
use crate::render::{ProgramDesc, ProgramOutput, RenderBackend, TextureSlot};

/// Type of a single uniform entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Mat4Array(usize),
}

impl UniformKind {
    fn align(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 | UniformKind::Vec4 | UniformKind::Mat4 | UniformKind::Mat4Array(_) => {
                16
            }
        }
    }

    fn size(self) -> usize {
        match self {
            UniformKind::Float | UniformKind::Int => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Mat4 => 64,
            UniformKind::Mat4Array(len) => 64 * len,
        }
    }
}

/// Value written to or read from a uniform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformEntry {
    pub name: &'static str,
    pub kind: UniformKind,
    pub offset: usize,
}

/// Ordered list of uniforms matching a WGSL `struct` bound at group 0,
/// binding 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    entries: Vec<UniformEntry>,
    size: usize,
}

impl UniformLayout {
    pub fn new(fields: &[(&'static str, UniformKind)]) -> Self {
        let mut entries = Vec::with_capacity(fields.len());
        let mut cursor = 0;
        for &(name, kind) in fields {
            let offset = align_to(cursor, kind.align());
            entries.push(UniformEntry { name, kind, offset });
            cursor = offset + kind.size();
        }
        Self {
            entries,
            size: align_to(cursor, 16).max(16),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&UniformEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[UniformEntry] {
        &self.entries
    }

    /// Size in bytes of the whole block, padded to 16 bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Decodes the value stored for `name` in a block laid out by `self`.
    pub fn read(&self, bytes: &[u8], name: &str) -> Option<UniformValue> {
        let entry = self.entry(name)?;
        let data = bytes.get(entry.offset..entry.offset + entry.kind.size())?;
        let floats = |count: usize| -> Vec<f32> {
            data[..count * 4]
                .chunks_exact(4)
                .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect()
        };
        Some(match entry.kind {
            UniformKind::Float => UniformValue::Float(floats(1)[0]),
            UniformKind::Int => {
                UniformValue::Int(i32::from_ne_bytes([data[0], data[1], data[2], data[3]]))
            }
            UniformKind::Vec2 => UniformValue::Vec2(Vec2::from_slice(&floats(2))),
            UniformKind::Vec3 => UniformValue::Vec3(Vec3::from_slice(&floats(3))),
            UniformKind::Vec4 => UniformValue::Vec4(Vec4::from_slice(&floats(4))),
            UniformKind::Mat4 | UniformKind::Mat4Array(_) => {
                UniformValue::Mat4(Mat4::from_cols_slice(&floats(16)))
            }
        })
    }
}

fn align_to(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// CPU copy of a uniform block.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    layout: UniformLayout,
    data: Vec<u8>,
}

impl UniformBlock {
    pub fn new(layout: UniformLayout) -> Self {
        let data = vec![0; layout.size()];
        Self { layout, data }
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes `value` into the named slot. Returns `false` when no entry of
    /// that name and type exists.
    pub fn set(&mut self, name: &str, value: UniformValue) -> bool {
        let Some(entry) = self.layout.entry(name) else {
            return false;
        };
        let offset = entry.offset;
        match (entry.kind, value) {
            (UniformKind::Float, UniformValue::Float(v)) => self.write(offset, bytes_of(&v)),
            (UniformKind::Int, UniformValue::Int(v)) => self.write(offset, bytes_of(&v)),
            (UniformKind::Vec2, UniformValue::Vec2(v)) => {
                self.write(offset, bytes_of(&v.to_array()))
            }
            (UniformKind::Vec3, UniformValue::Vec3(v)) => {
                self.write(offset, bytes_of(&v.to_array()))
            }
            (UniformKind::Vec4, UniformValue::Vec4(v)) => {
                self.write(offset, bytes_of(&v.to_array()))
            }
            (UniformKind::Mat4 | UniformKind::Mat4Array(_), UniformValue::Mat4(v)) => {
                self.write(offset, bytes_of(&v.to_cols_array()))
            }
            _ => return false,
        }
        true
    }

    /// Writes a run of matrices starting at the first element of an array
    /// entry; extra matrices beyond the array length are dropped.
    pub fn set_mat4_array(&mut self, name: &str, values: &[Mat4]) -> bool {
        let Some(entry) = self.layout.entry(name) else {
            return false;
        };
        let UniformKind::Mat4Array(len) = entry.kind else {
            return false;
        };
        let offset = entry.offset;
        let columns: Vec<[f32; 16]> = values
            .iter()
            .take(len)
            .map(Mat4::to_cols_array)
            .collect();
        self.write(offset, bytemuck::cast_slice(&columns));
        true
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.layout.read(&self.data, name)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// A compiled program and the uniform values staged for its next draw.
pub struct Shader<B: RenderBackend> {
    label: String,
    program: B::Program,
    uniforms: UniformBlock,
}

impl<B: RenderBackend> Shader<B> {
    pub fn compile(
        backend: &mut B,
        label: &str,
        source: &str,
        layout: UniformLayout,
        slots: &[TextureSlot],
        output: ProgramOutput,
    ) -> EngineResult<Self> {
        let program = backend.create_program(&ProgramDesc {
            label,
            source,
            uniform_size: layout.size(),
            slots,
            output,
        })?;
        Ok(Self {
            label: label.to_string(),
            program,
            uniforms: UniformBlock::new(layout),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    pub fn set(&mut self, name: &str, value: UniformValue) {
        if !self.uniforms.set(name, value) {
            trace!("shader {}: no {:?} uniform named {name}", self.label, value.kind());
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.set(name, UniformValue::Float(value));
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.set(name, UniformValue::Int(value));
    }

    pub fn set_vec2(&mut self, name: &str, value: Vec2) {
        self.set(name, UniformValue::Vec2(value));
    }

    pub fn set_vec3(&mut self, name: &str, value: Vec3) {
        self.set(name, UniformValue::Vec3(value));
    }

    pub fn set_vec4(&mut self, name: &str, value: Vec4) {
        self.set(name, UniformValue::Vec4(value));
    }

    pub fn set_mat4(&mut self, name: &str, value: Mat4) {
        self.set(name, UniformValue::Mat4(value));
    }

    pub fn set_mat4_array(&mut self, name: &str, values: &[Mat4]) {
        if !self.uniforms.set_mat4_array(name, values) {
            trace!("shader {}: no matrix array uniform named {name}", self.label);
        }
    }
}

/// Which shader a mesh is drawn with during the lit pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShaderRole {
    #[default]
    Static,
    Animated,
}

/// Every program the engine uses, one field per role.
pub struct Shaders<B: RenderBackend> {
    pub static_mesh: Shader<B>,
    pub animated: Shader<B>,
    /// Depth-only program for the shadow pass.
    pub shadow: Shader<B>,
    /// Full-screen quad program for depth map inspection.
    pub debug: Shader<B>,
}

impl<B: RenderBackend> Shaders<B> {
    pub fn load(backend: &mut B, sources: &ShaderSources) -> EngineResult<Self> {
        let lit_slots = [TextureSlot::Diffuse, TextureSlot::ShadowMap];
        Ok(Self {
            static_mesh: Shader::compile(
                backend,
                "static",
                &sources.static_program(),
                shaders::lit_layout(),
                &lit_slots,
                ProgramOutput::Color,
            )?,
            animated: Shader::compile(
                backend,
                "animated",
                &sources.animated_program(),
                shaders::lit_layout(),
                &lit_slots,
                ProgramOutput::Color,
            )?,
            shadow: Shader::compile(
                backend,
                "shadow",
                &sources.shadow,
                shaders::shadow_layout(),
                &[],
                ProgramOutput::DepthOnly,
            )?,
            debug: Shader::compile(
                backend,
                "debug",
                &sources.debug,
                shaders::debug_layout(),
                &[TextureSlot::DepthView],
                ProgramOutput::Overlay,
            )?,
        })
    }

    pub fn get_mut(&mut self, role: ShaderRole) -> &mut Shader<B> {
        match role {
            ShaderRole::Static => &mut self.static_mesh,
            ShaderRole::Animated => &mut self.animated,
        }
    }

    /// Shaders drawn in the lit pass, which all receive the frame globals.
    pub fn lit_mut(&mut self) -> [&mut Shader<B>; 2] {
        [&mut self.static_mesh, &mut self.animated]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::RecordingBackend;

    #[test]
    fn lit_layout_matches_wgsl_offsets() {
        let layout = shaders::lit_layout();
        let offset = |name: &str| layout.entry(name).unwrap().offset;
        assert_eq!(offset("model"), 0);
        assert_eq!(offset("light_projection"), 256);
        assert_eq!(offset("eye_position"), 320);
        assert_eq!(offset("time"), 332);
        assert_eq!(offset("light_direction"), 336);
        assert_eq!(offset("ambient"), 348);
        assert_eq!(offset("light_color"), 352);
        assert_eq!(offset("roughness"), 364);
        assert_eq!(offset("shadow_map_size"), 368);
        assert_eq!(offset("skinned"), 376);
        assert_eq!(offset("bones"), 384);
        assert_eq!(layout.size(), 4480);
    }

    #[test]
    fn shadow_and_debug_layouts_are_padded() {
        let shadow = shaders::shadow_layout();
        assert_eq!(shadow.entry("skinned").unwrap().offset, 192);
        assert_eq!(shadow.entry("bones").unwrap().offset, 208);
        assert_eq!(shadow.size(), 4304);
        assert_eq!(shaders::debug_layout().size(), 32);
    }

    #[test]
    fn set_and_read_back_values() {
        let mut block = UniformBlock::new(UniformLayout::new(&[
            ("time", UniformKind::Float),
            ("color", UniformKind::Vec3),
            ("mode", UniformKind::Int),
        ]));
        assert!(block.set("time", UniformValue::Float(1.5)));
        assert!(block.set("color", UniformValue::Vec3(Vec3::new(1.0, 0.5, 0.25))));
        assert!(block.set("mode", UniformValue::Int(-3)));
        assert_eq!(block.get("time"), Some(UniformValue::Float(1.5)));
        assert_eq!(
            block.get("color"),
            Some(UniformValue::Vec3(Vec3::new(1.0, 0.5, 0.25)))
        );
        assert_eq!(block.get("mode"), Some(UniformValue::Int(-3)));
    }

    #[test]
    fn setting_twice_is_idempotent() {
        let mut block = UniformBlock::new(shaders::lit_layout());
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        block.set("model", UniformValue::Mat4(matrix));
        let once = block.bytes().to_vec();
        block.set("model", UniformValue::Mat4(matrix));
        assert_eq!(block.bytes(), once.as_slice());
    }

    #[test]
    fn unknown_or_mistyped_uniforms_are_ignored() {
        let mut block = UniformBlock::new(UniformLayout::new(&[("time", UniformKind::Float)]));
        let before = block.bytes().to_vec();
        assert!(!block.set("missing", UniformValue::Float(1.0)));
        assert!(!block.set("time", UniformValue::Int(1)));
        assert_eq!(block.bytes(), before.as_slice());
    }

    #[test]
    fn matrix_arrays_are_truncated_to_capacity() {
        let mut block = UniformBlock::new(UniformLayout::new(&[
            ("bones", UniformKind::Mat4Array(2)),
            ("after", UniformKind::Float),
        ]));
        block.set("after", UniformValue::Float(7.0));
        let palette = [Mat4::IDENTITY, Mat4::IDENTITY * 2.0, Mat4::IDENTITY * 3.0];
        assert!(block.set_mat4_array("bones", &palette));
        assert_eq!(block.get("bones"), Some(UniformValue::Mat4(Mat4::IDENTITY)));
        assert_eq!(block.get("after"), Some(UniformValue::Float(7.0)));
    }

    #[test]
    fn shaders_compile_with_matching_outputs() {
        let mut backend = RecordingBackend::new(800, 600);
        let shaders = Shaders::load(&mut backend, &ShaderSources::embedded()).unwrap();
        assert_eq!(shaders.shadow.program().output, ProgramOutput::DepthOnly);
        assert_eq!(shaders.static_mesh.program().output, ProgramOutput::Color);
        assert_eq!(shaders.debug.program().output, ProgramOutput::Overlay);
        assert!(shaders.shadow.program().slots.is_empty());
    }

    #[test]
    fn shader_compile_failure_is_reported() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.fail_program("animated");
        let err = Shaders::load(&mut backend, &ShaderSources::embedded())
            .err()
            .unwrap();
        assert!(err.to_string().contains("animated"));
    }
}
