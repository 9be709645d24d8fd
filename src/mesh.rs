use std::rc::Rc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::render::{DrawCall, RenderBackend, TextureBindings};
use crate::shader::{Shader, ShaderRole};
use crate::texture::Texture;
use crate::viewer::Viewer;

/// Interleaved vertex as uploaded to the GPU.
///
/// `joints` and `weights` are only read by skinned programs; static
/// geometry leaves them zeroed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texcoord: [f32; 2],
    pub joints: [u32; 4],
    pub weights: [f32; 4],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, texcoord: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            texcoord: texcoord.to_array(),
            joints: [0; 4],
            weights: [0.0; 4],
        }
    }
}

/// CPU-side indexed triangle list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

const CUBE_FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
    // normal, right, up
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
];

impl MeshData {
    /// Unit quad in the XY plane facing +Z, spanning [-1, 1].
    pub fn quad() -> Self {
        let normal = Vec3::Z;
        let vertices = vec![
            Vertex::new(Vec3::new(-1.0, -1.0, 0.0), normal, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec3::new(1.0, -1.0, 0.0), normal, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(1.0, 1.0, 0.0), normal, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(-1.0, 1.0, 0.0), normal, Vec2::new(0.0, 1.0)),
        ];
        Self {
            vertices,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Unit cube centered on the origin, four vertices per face.
    pub fn cube() -> Self {
        let mut mesh = Self::default();
        for (normal, right, up) in CUBE_FACES {
            let (normal, right, up) = (
                Vec3::from_array(normal),
                Vec3::from_array(right),
                Vec3::from_array(up),
            );
            let base = mesh.vertices.len() as u32;
            let center = normal * 0.5;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = center + right * (u - 0.5) + up * (v - 0.5);
                mesh.vertices
                    .push(Vertex::new(position, normal, Vec2::new(u, v)));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        mesh
    }

    /// Square ground plane at y = 0 with side `size`, texture repeated once
    /// per unit.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let normal = Vec3::Y;
        let vertices = vec![
            Vertex::new(Vec3::new(-half, 0.0, half), normal, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec3::new(half, 0.0, half), normal, Vec2::new(size, 0.0)),
            Vertex::new(Vec3::new(half, 0.0, -half), normal, Vec2::new(size, size)),
            Vertex::new(Vec3::new(-half, 0.0, -half), normal, Vec2::new(0.0, size)),
        ];
        Self {
            vertices,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Gives every vertex without a normal the average of its faces'
    /// normals.
    pub fn compute_missing_normals(&mut self) {
        if self.vertices.iter().all(|vertex| vertex.normal != [0.0; 3]) {
            return;
        }
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];
        for triangle in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [
                triangle[0] as usize,
                triangle[1] as usize,
                triangle[2] as usize,
            ];
            let (Some(a), Some(b), Some(c)) = (
                self.vertices.get(i0),
                self.vertices.get(i1),
                self.vertices.get(i2),
            ) else {
                continue;
            };
            let p0 = Vec3::from_array(a.position);
            let p1 = Vec3::from_array(b.position);
            let p2 = Vec3::from_array(c.position);
            if let Some(normal) = (p1 - p0).cross(p2 - p0).try_normalize() {
                accum[i0] += normal;
                accum[i1] += normal;
                accum[i2] += normal;
            }
        }
        for (vertex, normal) in self.vertices.iter_mut().zip(accum) {
            if vertex.normal == [0.0; 3] {
                vertex.normal = normal.normalize_or_zero().to_array();
            }
        }
    }
}

/// Surface parameters passed to the lit programs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialParams {
    /// Light reaching the surface regardless of the light direction.
    pub ambient: f32,
    pub roughness: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            ambient: 0.2,
            roughness: 0.6,
        }
    }
}

pub struct Material<B: RenderBackend> {
    pub params: MaterialParams,
    /// Shared, read-only once uploaded. `None` samples plain white.
    pub diffuse: Option<Rc<Texture<B>>>,
}

impl<B: RenderBackend> Clone for Material<B> {
    fn clone(&self) -> Self {
        Self {
            params: self.params,
            diffuse: self.diffuse.clone(),
        }
    }
}

impl<B: RenderBackend> Default for Material<B> {
    fn default() -> Self {
        Self {
            params: MaterialParams::default(),
            diffuse: None,
        }
    }
}

/// What a draw needs besides the mesh and its shader.
pub struct DrawContext<'a, B: RenderBackend> {
    pub viewer: &'a Viewer,
    /// Depth map sampled for shadows. Absent while rendering the map itself.
    pub shadow_map: Option<&'a B::DepthTarget>,
}

/// Geometry owned on the GPU plus how to draw it.
pub struct Mesh<B: RenderBackend> {
    label: String,
    geometry: B::Geometry,
    index_count: usize,
    material: Material<B>,
    shader: ShaderRole,
    transform: Mat4,
}

impl<B: RenderBackend> Mesh<B> {
    pub fn new(
        backend: &mut B,
        label: &str,
        data: &MeshData,
        material: Material<B>,
        shader: ShaderRole,
    ) -> Self {
        Self {
            label: label.to_string(),
            geometry: backend.upload_geometry(label, &data.vertices, &data.indices),
            index_count: data.indices.len(),
            material,
            shader,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn shader_role(&self) -> ShaderRole {
        self.shader
    }

    pub fn material(&self) -> &Material<B> {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut Material<B> {
        &mut self.material
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    /// Draws with the mesh's own transform as the model matrix.
    pub fn draw(&self, backend: &mut B, shader: &mut Shader<B>, ctx: &DrawContext<'_, B>) {
        shader.set_int("skinned", 0);
        self.submit(backend, shader, ctx, self.transform);
    }

    /// Uploads the per-draw uniforms and issues the indexed draw.
    pub(crate) fn submit(
        &self,
        backend: &mut B,
        shader: &mut Shader<B>,
        ctx: &DrawContext<'_, B>,
        model: Mat4,
    ) {
        if self.index_count == 0 {
            return;
        }
        shader.set_mat4("model", model);
        shader.set_mat4("view", ctx.viewer.view_matrix());
        shader.set_mat4("projection", ctx.viewer.projection_matrix());
        shader.set_float("ambient", self.material.params.ambient);
        shader.set_float("roughness", self.material.params.roughness);

        backend.draw(DrawCall {
            program: shader.program(),
            uniforms: shader.uniforms().bytes(),
            geometry: &self.geometry,
            textures: TextureBindings {
                diffuse: self.material.diffuse.as_deref().map(Texture::handle),
                depth: ctx.shadow_map,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::RecordingBackend;
    use crate::render::shaders;
    use crate::render::{ClearOps, PassDesc, PassTarget, ProgramOutput, Viewport};
    use crate::shader::UniformValue;

    #[test]
    fn cube_has_outward_normals() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        for vertex in &cube.vertices {
            let position = Vec3::from_array(vertex.position);
            let normal = Vec3::from_array(vertex.normal);
            assert!(position.dot(normal) > 0.0);
            assert!(position.abs().max_element() <= 0.5 + 1e-6);
        }
    }

    #[test]
    fn plane_lies_flat() {
        let plane = MeshData::plane(10.0);
        assert!(plane.vertices.iter().all(|v| v.position[1] == 0.0));
        assert!(plane.vertices.iter().all(|v| v.normal == [0.0, 1.0, 0.0]));
    }

    #[test]
    fn draw_uploads_viewer_matrices_and_material() {
        let mut backend = RecordingBackend::new(640, 480);
        let mut shader = Shader::compile(
            &mut backend,
            "static",
            "",
            shaders::lit_layout(),
            &[],
            ProgramOutput::Color,
        )
        .unwrap();
        let material = Material {
            params: MaterialParams {
                ambient: 0.35,
                roughness: 0.9,
            },
            diffuse: None,
        };
        let transform = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        let mesh = Mesh::new(
            &mut backend,
            "cube",
            &MeshData::cube(),
            material,
            ShaderRole::Static,
        )
        .with_transform(transform);
        let viewer = Viewer::perspective(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, 4.0 / 3.0);

        backend.begin_pass(PassDesc {
            label: "test",
            target: PassTarget::Screen,
            viewport: Viewport::full(backend.surface_size()),
            clear: ClearOps::LOAD,
        });
        mesh.draw(
            &mut backend,
            &mut shader,
            &DrawContext {
                viewer: &viewer,
                shadow_map: None,
            },
        );
        backend.end_pass();

        let draw = &backend.passes[0].draws[0];
        let layout = shaders::lit_layout();
        assert_eq!(
            layout.read(&draw.uniforms, "model"),
            Some(UniformValue::Mat4(transform))
        );
        assert_eq!(
            layout.read(&draw.uniforms, "view"),
            Some(UniformValue::Mat4(viewer.view_matrix()))
        );
        assert_eq!(
            layout.read(&draw.uniforms, "ambient"),
            Some(UniformValue::Float(0.35))
        );
        assert_eq!(layout.read(&draw.uniforms, "skinned"), Some(UniformValue::Int(0)));
        assert_eq!(draw.diffuse, None);
    }

    #[test]
    fn geometry_is_released_once_on_drop() {
        let mut backend = RecordingBackend::new(1, 1);
        let mesh = Mesh::new(
            &mut backend,
            "quad",
            &MeshData::quad(),
            Material::default(),
            ShaderRole::Static,
        );
        assert!(backend.released().is_empty());
        drop(mesh);
        assert_eq!(backend.released().len(), 1);
    }
}
