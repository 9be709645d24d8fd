//! Two-pass shadow rendering.
//!
//! The depth pass renders the scene from the light viewer into the shadow
//! map. The color pass renders it again from the main viewer, handing the
//! lit programs the light's matrices and the shadow map so each fragment can
//! be compared against the stored depth.

use glam::{Mat4, Vec2, Vec3};

use crate::config::{SHADOW_HEIGHT, SHADOW_WIDTH};
use crate::input::InputState;
use crate::mesh::{DrawContext, Mesh};
use crate::model::Model;
use crate::render::{ClearOps, Extent, PassDesc, PassTarget, RenderBackend, Viewport};
use crate::screen_quad::{ScreenQuad, ScreenRect};
use crate::shader::{Shader, Shaders};
use crate::texture::DepthMap;
use crate::viewer::Viewer;

/// The two viewers every frame is rendered from.
#[derive(Debug, Clone)]
pub struct Viewers {
    pub main: Viewer,
    /// Shadow caster; its sight direction is the light direction.
    pub light: Viewer,
}

impl Viewers {
    pub fn update(&mut self, dt: f32, input: &InputState) {
        self.main.update(dt, input);
        self.light.update(dt, input);
    }
}

/// Depth target written by the depth pass and sampled by the color pass.
pub struct ShadowMap<B: RenderBackend> {
    depth: DepthMap<B>,
}

impl<B: RenderBackend> ShadowMap<B> {
    pub fn new(backend: &mut B) -> Self {
        Self {
            depth: DepthMap::new(
                backend,
                "shadow-map",
                Extent::new(SHADOW_WIDTH, SHADOW_HEIGHT),
            ),
        }
    }

    pub fn target(&self) -> &B::DepthTarget {
        self.depth.target()
    }

    pub fn extent(&self) -> Extent {
        self.depth.extent()
    }
}

/// Uniforms shared by every lit program for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGlobals {
    pub time: f32,
    pub light_direction: Vec3,
    pub light_color: Vec3,
    pub eye_position: Vec3,
    pub light_view: Mat4,
    pub light_projection: Mat4,
    pub shadow_map_size: Vec2,
}

impl FrameGlobals {
    pub fn new(time: f32, viewers: &Viewers, light_color: Vec3, shadow_map: Extent) -> Self {
        Self {
            time,
            light_direction: viewers.light.sight_direction(),
            light_color,
            eye_position: viewers.main.position(),
            light_view: viewers.light.view_matrix(),
            light_projection: viewers.light.projection_matrix(),
            shadow_map_size: Vec2::new(shadow_map.width as f32, shadow_map.height as f32),
        }
    }

    pub fn apply<B: RenderBackend>(&self, shader: &mut Shader<B>) {
        shader.set_float("time", self.time);
        shader.set_vec3("light_direction", self.light_direction);
        shader.set_vec3("light_color", self.light_color);
        shader.set_vec3("eye_position", self.eye_position);
        shader.set_mat4("light_view", self.light_view);
        shader.set_mat4("light_projection", self.light_projection);
        shader.set_vec2("shadow_map_size", self.shadow_map_size);
    }
}

/// Everything drawn in both passes.
pub struct RenderScene<B: RenderBackend> {
    pub meshes: Vec<Mesh<B>>,
    pub models: Vec<Model<B>>,
}

impl<B: RenderBackend> Default for RenderScene<B> {
    fn default() -> Self {
        Self {
            meshes: Vec::new(),
            models: Vec::new(),
        }
    }
}

impl<B: RenderBackend> RenderScene<B> {
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty() && self.models.is_empty()
    }

    pub fn update(&mut self, time: f32) {
        for model in &mut self.models {
            model.update(time);
        }
    }
}

/// Renders depth only from the light viewer into `shadow_map`.
pub fn render_depth_pass<B: RenderBackend>(
    backend: &mut B,
    scene: &RenderScene<B>,
    shader: &mut Shader<B>,
    light: &Viewer,
    shadow_map: &ShadowMap<B>,
) {
    backend.begin_pass(PassDesc {
        label: "shadow-depth",
        target: PassTarget::Depth(shadow_map.target()),
        viewport: Viewport::full(shadow_map.extent()),
        clear: ClearOps::DEPTH,
    });
    let ctx = DrawContext {
        viewer: light,
        shadow_map: None,
    };
    for mesh in &scene.meshes {
        mesh.draw(backend, shader, &ctx);
    }
    for model in &scene.models {
        model.draw(backend, shader, &ctx);
    }
    backend.end_pass();
}

/// Renders the lit scene from `main` into the screen, sampling `shadow_map`.
pub fn render_color_pass<B: RenderBackend>(
    backend: &mut B,
    scene: &RenderScene<B>,
    shaders: &mut Shaders<B>,
    globals: &FrameGlobals,
    main: &Viewer,
    shadow_map: &ShadowMap<B>,
    clear_color: [f64; 4],
) {
    for shader in shaders.lit_mut() {
        globals.apply(shader);
    }

    let viewport = Viewport::full(backend.surface_size());
    backend.begin_pass(PassDesc {
        label: "color",
        target: PassTarget::Screen,
        viewport,
        clear: ClearOps::color_and_depth(clear_color),
    });
    let ctx = DrawContext {
        viewer: main,
        shadow_map: Some(shadow_map.target()),
    };
    for mesh in &scene.meshes {
        mesh.draw(backend, shaders.get_mut(mesh.shader_role()), &ctx);
    }
    for model in &scene.models {
        model.draw(backend, shaders.get_mut(model.shader_role()), &ctx);
    }
    backend.end_pass();
}

/// Draws the shadow map over a corner of the screen.
pub fn render_debug_overlay<B: RenderBackend>(
    backend: &mut B,
    quad: &ScreenQuad<B>,
    shader: &mut Shader<B>,
    shadow_map: &ShadowMap<B>,
    rect: ScreenRect,
) {
    let viewport = Viewport::full(backend.surface_size());
    backend.begin_pass(PassDesc {
        label: "debug-shadow-map",
        target: PassTarget::Screen,
        viewport,
        clear: ClearOps::LOAD,
    });
    quad.draw(backend, shader, shadow_map.target(), rect);
    backend.end_pass();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Material, MeshData};
    use crate::render::recording::{RecordedTarget, RecordingBackend};
    use crate::render::shaders::{self, ShaderSources};
    use crate::shader::{ShaderRole, UniformValue};
    use crate::viewer::Projection;

    struct Fixture {
        backend: RecordingBackend,
        shaders: Shaders<RecordingBackend>,
        shadow_map: ShadowMap<RecordingBackend>,
        scene: RenderScene<RecordingBackend>,
        viewers: Viewers,
    }

    fn fixture() -> Fixture {
        let mut backend = RecordingBackend::new(1024, 768);
        let shaders = Shaders::load(&mut backend, &ShaderSources::embedded()).unwrap();
        let shadow_map = ShadowMap::new(&mut backend);
        let mut scene = RenderScene::default();
        scene.meshes.push(Mesh::new(
            &mut backend,
            "ground",
            &MeshData::plane(10.0),
            Material::default(),
            ShaderRole::Static,
        ));
        scene.meshes.push(Mesh::new(
            &mut backend,
            "crate",
            &MeshData::cube(),
            Material::default(),
            ShaderRole::Static,
        ));
        let light = Viewer::new(
            Vec3::new(4.0, 8.0, 4.0),
            Vec3::ZERO,
            Projection::orthographic(),
        );
        let viewers = Viewers {
            main: Viewer::perspective(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO, 4.0 / 3.0),
            light,
        };
        Fixture {
            backend,
            shaders,
            shadow_map,
            scene,
            viewers,
        }
    }

    fn render(f: &mut Fixture) {
        render_depth_pass(
            &mut f.backend,
            &f.scene,
            &mut f.shaders.shadow,
            &f.viewers.light,
            &f.shadow_map,
        );
        let globals = FrameGlobals::new(1.5, &f.viewers, Vec3::ONE, f.shadow_map.extent());
        render_color_pass(
            &mut f.backend,
            &f.scene,
            &mut f.shaders,
            &globals,
            &f.viewers.main,
            &f.shadow_map,
            [0.0, 0.0, 0.0, 1.0],
        );
    }

    #[test]
    fn depth_pass_writes_only_depth_from_the_light() {
        let mut f = fixture();
        render(&mut f);

        let depth = &f.backend.passes[0];
        assert_eq!(depth.target, RecordedTarget::Depth(f.shadow_map.target().id));
        assert!(!depth.color_attachment);
        assert_eq!(depth.clear, ClearOps::DEPTH);
        assert_eq!(depth.draws.len(), 2);
        assert!(depth.draws.iter().all(|draw| draw.program == "shadow"));

        let layout = shaders::shadow_layout();
        assert_eq!(
            layout.read(&depth.draws[0].uniforms, "view"),
            Some(UniformValue::Mat4(f.viewers.light.view_matrix()))
        );
    }

    #[test]
    fn color_pass_samples_the_shadow_map_in_light_space() {
        let mut f = fixture();
        render(&mut f);

        let color = &f.backend.passes[1];
        assert_eq!(color.target, RecordedTarget::Screen);
        assert!(color.color_attachment);
        assert_eq!(color.viewport, Viewport::full(Extent::new(1024, 768)));
        assert_eq!(color.draws.len(), 2);

        let layout = shaders::lit_layout();
        for draw in &color.draws {
            assert_eq!(draw.depth, Some(f.shadow_map.target().id));
            assert_eq!(
                layout.read(&draw.uniforms, "light_view"),
                Some(UniformValue::Mat4(f.viewers.light.view_matrix()))
            );
            assert_eq!(
                layout.read(&draw.uniforms, "view"),
                Some(UniformValue::Mat4(f.viewers.main.view_matrix()))
            );
            assert_eq!(
                layout.read(&draw.uniforms, "light_direction"),
                Some(UniformValue::Vec3(f.viewers.light.sight_direction()))
            );
        }
    }

    #[test]
    fn shadow_resolution_matches_between_passes() {
        let mut f = fixture();
        render(&mut f);

        let depth_viewport = f.backend.passes[0].viewport;
        assert_eq!(depth_viewport.extent(), Extent::new(SHADOW_WIDTH, SHADOW_HEIGHT));

        let sampled = shaders::lit_layout().read(&f.backend.passes[1].draws[0].uniforms, "shadow_map_size");
        assert_eq!(
            sampled,
            Some(UniformValue::Vec2(Vec2::new(
                depth_viewport.width as f32,
                depth_viewport.height as f32
            )))
        );
    }

    #[test]
    fn globals_reach_every_lit_shader() {
        let mut f = fixture();
        let globals = FrameGlobals::new(2.0, &f.viewers, Vec3::new(1.0, 0.5, 0.2), f.shadow_map.extent());
        for shader in f.shaders.lit_mut() {
            globals.apply(shader);
        }
        for shader in [&f.shaders.static_mesh, &f.shaders.animated] {
            assert_eq!(shader.uniforms().get("time"), Some(UniformValue::Float(2.0)));
            assert_eq!(
                shader.uniforms().get("light_color"),
                Some(UniformValue::Vec3(Vec3::new(1.0, 0.5, 0.2)))
            );
        }
    }

    #[test]
    fn debug_overlay_reads_the_depth_map_without_clearing() {
        let mut f = fixture();
        let quad = ScreenQuad::new(&mut f.backend);
        render_debug_overlay(
            &mut f.backend,
            &quad,
            &mut f.shaders.debug,
            &f.shadow_map,
            ScreenRect::top_right(0.25),
        );
        let pass = &f.backend.passes[0];
        assert_eq!(pass.clear, ClearOps::LOAD);
        assert_eq!(pass.draws[0].program, "debug");
        assert_eq!(pass.draws[0].depth, Some(f.shadow_map.target().id));
    }
}
