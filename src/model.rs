use std::rc::Rc;

use glam::Mat4;
use log::warn;

use crate::animation::{AnimationClip, Node, NodeTransform, Skeleton, Skin};
use crate::config::MAX_BONES;
use crate::mesh::{DrawContext, Material, MaterialParams, Mesh, MeshData};
use crate::render::RenderBackend;
use crate::shader::{Shader, ShaderRole};
use crate::texture::{ImageData, Texture};

/// Geometry of one primitive before upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveData {
    pub label: String,
    pub mesh: MeshData,
    /// Node whose global transform places the primitive.
    pub node: usize,
    pub skin: Option<usize>,
    pub material: MaterialParams,
    /// Index into [`ModelData::images`].
    pub texture: Option<usize>,
}

/// Everything a loader produces for one model file.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub skeleton: Skeleton,
    pub skins: Vec<Skin>,
    pub clips: Vec<AnimationClip>,
    pub images: Vec<ImageData>,
    pub primitives: Vec<PrimitiveData>,
}

impl ModelData {
    /// Single static primitive attached to one root node.
    pub fn from_mesh(label: &str, mesh: MeshData) -> Self {
        Self {
            skeleton: Skeleton::new(vec![Node {
                name: label.to_string(),
                parent: None,
                rest: NodeTransform::IDENTITY,
            }]),
            skins: Vec::new(),
            clips: Vec::new(),
            images: Vec::new(),
            primitives: vec![PrimitiveData {
                label: label.to_string(),
                mesh,
                node: 0,
                skin: None,
                material: MaterialParams::default(),
                texture: None,
            }],
        }
    }

    pub fn is_animated(&self) -> bool {
        !self.clips.is_empty() || !self.skins.is_empty()
    }
}

struct Primitive<B: RenderBackend> {
    mesh: Mesh<B>,
    node: usize,
    skin: Option<usize>,
}

/// A node hierarchy of meshes, optionally skinned and animated.
pub struct Model<B: RenderBackend> {
    name: String,
    shader: ShaderRole,
    transform: Mat4,
    primitives: Vec<Primitive<B>>,
    skeleton: Skeleton,
    skins: Vec<Skin>,
    clips: Vec<AnimationClip>,
    active_clip: Option<usize>,
    globals: Vec<Mat4>,
    palettes: Vec<Vec<Mat4>>,
}

impl<B: RenderBackend> Model<B> {
    /// Uploads every primitive and texture of `data`.
    pub fn new(backend: &mut B, name: &str, data: ModelData, shader: ShaderRole) -> Self {
        let textures: Vec<Rc<Texture<B>>> = data
            .images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                Rc::new(Texture::upload(backend, &format!("{name}-texture-{index}"), image))
            })
            .collect();

        let primitives = data
            .primitives
            .iter()
            .map(|primitive| {
                let material = Material {
                    params: primitive.material,
                    diffuse: primitive
                        .texture
                        .and_then(|index| textures.get(index))
                        .cloned(),
                };
                Primitive {
                    mesh: Mesh::new(backend, &primitive.label, &primitive.mesh, material, shader),
                    node: primitive.node,
                    skin: primitive.skin,
                }
            })
            .collect();

        for (index, skin) in data.skins.iter().enumerate() {
            if skin.joints.len() > MAX_BONES {
                warn!(
                    "{name}: skin {index} has {} joints, only {MAX_BONES} are animated",
                    skin.joints.len()
                );
            }
        }

        // Play the longest clip by default.
        let active_clip = data
            .clips
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.duration().total_cmp(&b.duration()))
            .map(|(index, _)| index);

        let mut model = Self {
            name: name.to_string(),
            shader,
            transform: Mat4::IDENTITY,
            primitives,
            skeleton: data.skeleton,
            skins: data.skins,
            clips: data.clips,
            active_clip,
            globals: Vec::new(),
            palettes: Vec::new(),
        };
        model.pose(&model.skeleton.rest_pose());
        model
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader_role(&self) -> ShaderRole {
        self.shader
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn clips(&self) -> &[AnimationClip] {
        &self.clips
    }

    pub fn active_clip(&self) -> Option<&AnimationClip> {
        self.active_clip.and_then(|index| self.clips.get(index))
    }

    /// Selects the clip played by [`Model::update`]. Out of range indices
    /// stop the animation.
    pub fn set_active_clip(&mut self, index: Option<usize>) {
        self.active_clip = index.filter(|&index| index < self.clips.len());
    }

    /// Overrides the material parameters of every primitive.
    pub fn set_material_params(&mut self, params: MaterialParams) {
        for primitive in &mut self.primitives {
            primitive.mesh.material_mut().params = params;
        }
    }

    /// Replaces the diffuse texture of every primitive.
    pub fn set_diffuse(&mut self, texture: Rc<Texture<B>>) {
        for primitive in &mut self.primitives {
            primitive.mesh.material_mut().diffuse = Some(Rc::clone(&texture));
        }
    }

    /// Bone palette of skin `index` for the current pose.
    pub fn palette(&self, index: usize) -> Option<&[Mat4]> {
        self.palettes.get(index).map(Vec::as_slice)
    }

    /// Samples the active clip at `time` seconds, looping over its duration.
    pub fn update(&mut self, time: f32) {
        let Some(clip) = self.active_clip.and_then(|index| self.clips.get(index)) else {
            return;
        };
        let mut pose = self.skeleton.rest_pose();
        clip.sample(time, &mut pose);
        self.pose(&pose);
    }

    fn pose(&mut self, locals: &[NodeTransform]) {
        self.globals = self.skeleton.global_transforms(locals);
        self.palettes = self
            .skins
            .iter()
            .map(|skin| skin.palette(&self.globals))
            .collect();
    }

    pub fn draw(&self, backend: &mut B, shader: &mut Shader<B>, ctx: &DrawContext<'_, B>) {
        for primitive in &self.primitives {
            match primitive.skin.and_then(|index| self.palettes.get(index)) {
                Some(palette) => {
                    shader.set_int("skinned", 1);
                    shader.set_mat4_array("bones", palette);
                    primitive.mesh.submit(backend, shader, ctx, self.transform);
                }
                None => {
                    let node = self
                        .globals
                        .get(primitive.node)
                        .copied()
                        .unwrap_or(Mat4::IDENTITY);
                    shader.set_int("skinned", 0);
                    primitive
                        .mesh
                        .submit(backend, shader, ctx, self.transform * node);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{Channel, ChannelValues, Interpolation};
    use crate::render::recording::RecordingBackend;
    use crate::render::shaders;
    use crate::render::{ClearOps, PassDesc, PassTarget, ProgramOutput, Viewport};
    use crate::shader::UniformValue;
    use crate::viewer::Viewer;
    use glam::Vec3;

    fn animated_data() -> ModelData {
        let skeleton = Skeleton::new(vec![
            Node {
                name: "root".into(),
                parent: None,
                rest: NodeTransform::IDENTITY,
            },
            Node {
                name: "bone".into(),
                parent: Some(0),
                rest: NodeTransform::IDENTITY,
            },
        ]);
        let slide = AnimationClip::new(
            "slide",
            vec![Channel {
                node: 1,
                interpolation: Interpolation::Linear,
                times: vec![0.0, 2.0],
                values: ChannelValues::Translation(vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)]),
            }],
        );
        let blip = AnimationClip::new("blip", Vec::new());
        let mut data = ModelData::from_mesh("body", MeshData::quad());
        data.skeleton = skeleton;
        data.skins = vec![Skin {
            joints: vec![1],
            inverse_bind: vec![Mat4::IDENTITY],
        }];
        data.clips = vec![blip, slide];
        data.primitives[0].skin = Some(0);
        data.images = vec![ImageData::solid([255, 0, 0, 255])];
        data.primitives[0].texture = Some(0);
        data
    }

    #[test]
    fn longest_clip_plays_by_default() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut model = Model::new(&mut backend, "walker", animated_data(), ShaderRole::Animated);
        assert_eq!(model.active_clip().map(AnimationClip::name), Some("slide"));

        model.update(1.0);
        let bone = model.palette(0).unwrap()[0];
        assert!(bone
            .transform_point3(Vec3::ZERO)
            .distance(Vec3::new(1.0, 0.0, 0.0))
            < 1e-5);
    }

    #[test]
    fn skinned_draw_uploads_bone_palette() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shader = Shader::compile(
            &mut backend,
            "animated",
            "",
            shaders::lit_layout(),
            &[],
            ProgramOutput::Color,
        )
        .unwrap();
        let mut model = Model::new(&mut backend, "walker", animated_data(), ShaderRole::Animated);
        model.update(2.5);
        let viewer = Viewer::perspective(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);

        backend.begin_pass(PassDesc {
            label: "test",
            target: PassTarget::Screen,
            viewport: Viewport::full(backend.surface_size()),
            clear: ClearOps::LOAD,
        });
        model.draw(
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
        assert_eq!(layout.read(&draw.uniforms, "skinned"), Some(UniformValue::Int(1)));
        let expected = model.palette(0).unwrap()[0];
        assert_eq!(
            layout.read(&draw.uniforms, "bones"),
            Some(UniformValue::Mat4(expected))
        );
        assert!(draw.diffuse.is_some());
    }

    #[test]
    fn static_primitive_uses_node_transform() {
        let mut backend = RecordingBackend::new(8, 8);
        let mut shader = Shader::compile(
            &mut backend,
            "static",
            "",
            shaders::lit_layout(),
            &[],
            ProgramOutput::Color,
        )
        .unwrap();
        let mut data = ModelData::from_mesh("crate", MeshData::cube());
        let offset = Vec3::new(0.0, 3.0, 0.0);
        data.skeleton = Skeleton::new(vec![Node {
            name: "crate".into(),
            parent: None,
            rest: NodeTransform {
                translation: offset,
                ..NodeTransform::IDENTITY
            },
        }]);
        let placement = Mat4::from_translation(Vec3::X);
        let model = Model::new(&mut backend, "crate", data, ShaderRole::Static)
            .with_transform(placement);
        let viewer = Viewer::perspective(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);

        backend.begin_pass(PassDesc {
            label: "test",
            target: PassTarget::Screen,
            viewport: Viewport::full(backend.surface_size()),
            clear: ClearOps::LOAD,
        });
        model.draw(
            &mut backend,
            &mut shader,
            &DrawContext {
                viewer: &viewer,
                shadow_map: None,
            },
        );
        backend.end_pass();

        let draw = &backend.passes[0].draws[0];
        let Some(UniformValue::Mat4(model_matrix)) =
            shaders::lit_layout().read(&draw.uniforms, "model")
        else {
            panic!("model matrix missing");
        };
        let origin = model_matrix.transform_point3(Vec3::ZERO);
        assert!(origin.distance(Vec3::new(1.0, 3.0, 0.0)) < 1e-6);
    }
}
