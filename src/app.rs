use std::rc::Rc;

use anyhow::Result;
use log::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::input::{InputState, VideoMode};
use crate::mesh::{MaterialParams, Mesh, MeshData};
use crate::model::{Model, ModelData};
use crate::model_loader::load_model;
use crate::pipeline::{
    render_color_pass, render_debug_overlay, render_depth_pass, FrameGlobals, RenderScene,
    ShadowMap, Viewers,
};
use crate::render::shaders::ShaderSources;
use crate::render::{Extent, FrameStatus, RenderBackend};
use crate::scene::{ModelConfig, ModelSource, SceneConfig, TextureSource};
use crate::screen_quad::{ScreenQuad, ScreenRect};
use crate::shader::{ShaderRole, Shaders};
use crate::texture::{ImageData, Texture};

/// Fraction of each screen axis covered by the shadow map overlay.
const DEBUG_OVERLAY_FRACTION: f32 = 0.3;

/// Owns the viewers, shaders and scene, and renders one frame at a time.
///
/// An `App` only exists once every shader compiled and every asset loaded.
pub struct App<B: RenderBackend> {
    viewers: Viewers,
    shaders: Shaders<B>,
    scene: RenderScene<B>,
    shadow_map: ShadowMap<B>,
    screen_quad: ScreenQuad<B>,
    light_color: glam::Vec3,
    clear_color: [f64; 4],
    debug_shadow_map: bool,
    elapsed: f64,
}

impl<B: RenderBackend> App<B> {
    pub fn new(backend: &mut B, config: &SceneConfig, video_mode: VideoMode) -> EngineResult<Self> {
        let sources = match &config.settings.shader_dir {
            Some(dir) => {
                let dir = config.resolve(dir);
                ShaderSources::from_dir(&dir).map_err(|err| EngineError::asset(dir, err))?
            }
            None => ShaderSources::embedded(),
        };
        let shaders = Shaders::load(backend, &sources)?;

        let aspect = backend.surface_size().aspect();
        let viewers = Viewers {
            main: config.main_viewer.build(aspect, video_mode),
            light: config.light_viewer.build(aspect, video_mode),
        };

        let mut scene = RenderScene::default();
        for model in &config.models {
            scene.models.push(build_model(backend, config, model)?);
        }
        info!(
            "scene ready: {} model(s), shadow map {}x{}",
            scene.models.len(),
            crate::config::SHADOW_WIDTH,
            crate::config::SHADOW_HEIGHT
        );

        let shadow_map = ShadowMap::new(backend);
        // Orthographic depth is linear; a mild power is enough for contrast.
        let screen_quad = ScreenQuad::new(backend).with_depth_power(2.0);
        let color = config.settings.clear_color;

        Ok(Self {
            viewers,
            shaders,
            scene,
            shadow_map,
            screen_quad,
            light_color: config.light.color,
            clear_color: [color.x as f64, color.y as f64, color.z as f64, 1.0],
            debug_shadow_map: config.settings.debug_shadow_map,
            elapsed: 0.0,
        })
    }

    /// Advances every viewer and model by `dt` seconds and renders a frame.
    ///
    /// Only an unrecoverable GPU condition is returned as an error; a frame
    /// the surface cannot provide is skipped.
    pub fn frame(&mut self, backend: &mut B, input: &InputState, dt: f32) -> Result<()> {
        let dt = dt.max(0.0);
        self.elapsed += dt as f64;
        self.viewers.update(dt, input);
        self.scene.update(self.elapsed as f32);

        if backend.begin_frame()? == FrameStatus::Skipped {
            debug!("frame skipped");
            return Ok(());
        }

        render_depth_pass(
            backend,
            &self.scene,
            &mut self.shaders.shadow,
            &self.viewers.light,
            &self.shadow_map,
        );
        let globals = FrameGlobals::new(
            self.elapsed as f32,
            &self.viewers,
            self.light_color,
            self.shadow_map.extent(),
        );
        render_color_pass(
            backend,
            &self.scene,
            &mut self.shaders,
            &globals,
            &self.viewers.main,
            &self.shadow_map,
            self.clear_color,
        );
        if self.debug_shadow_map {
            render_debug_overlay(
                backend,
                &self.screen_quad,
                &mut self.shaders.debug,
                &self.shadow_map,
                ScreenRect::top_right(DEBUG_OVERLAY_FRACTION),
            );
        }
        backend.present();
        Ok(())
    }

    /// Resizes the surface and keeps perspective viewers in sync with it.
    pub fn resize(&mut self, backend: &mut B, size: Extent) {
        if size.is_empty() {
            return;
        }
        backend.resize(size);
        self.viewers.main.set_aspect(size.aspect());
    }

    pub fn add_mesh(&mut self, mesh: Mesh<B>) {
        self.scene.meshes.push(mesh);
    }

    pub fn add_model(&mut self, model: Model<B>) {
        self.scene.models.push(model);
    }

    pub fn models(&self) -> &[Model<B>] {
        &self.scene.models
    }

    pub fn viewers(&self) -> &Viewers {
        &self.viewers
    }

    pub fn viewers_mut(&mut self) -> &mut Viewers {
        &mut self.viewers
    }

    pub fn set_debug_shadow_map(&mut self, enabled: bool) {
        self.debug_shadow_map = enabled;
    }

    pub fn debug_shadow_map(&self) -> bool {
        self.debug_shadow_map
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }
}

fn build_model<B: RenderBackend>(
    backend: &mut B,
    scene: &SceneConfig,
    config: &ModelConfig,
) -> EngineResult<Model<B>> {
    let data = match &config.source {
        ModelSource::File { path } => load_model(&scene.resolve(path))?,
        ModelSource::Plane { size } => ModelData::from_mesh(&config.name, MeshData::plane(*size)),
        ModelSource::Cube => ModelData::from_mesh(&config.name, MeshData::cube()),
        ModelSource::Quad => ModelData::from_mesh(&config.name, MeshData::quad()),
    };
    let role = config.shader.unwrap_or(if data.is_animated() {
        ShaderRole::Animated
    } else {
        ShaderRole::Static
    });
    debug!("building model {} with {role:?} shader", config.name);

    let mut model = Model::new(backend, &config.name, data, role).with_transform(config.transform());

    if config.ambient.is_some() || config.roughness.is_some() {
        let defaults = MaterialParams::default();
        model.set_material_params(MaterialParams {
            ambient: config.ambient.unwrap_or(defaults.ambient),
            roughness: config.roughness.unwrap_or(defaults.roughness),
        });
    }
    match &config.texture {
        Some(TextureSource::File {
            path,
            flip_vertically,
        }) => {
            let texture = Texture::load(backend, &scene.resolve(path), *flip_vertically)?;
            model.set_diffuse(Rc::new(texture));
        }
        Some(TextureSource::Checker) => {
            let image = ImageData::checker(256, 8, [200, 200, 200, 255], [60, 60, 70, 255]);
            let label = format!("{}-checker", config.name);
            model.set_diffuse(Rc::new(Texture::upload(backend, &label, &image)));
        }
        None => {}
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::{RecordedTarget, RecordingBackend};
    use crate::render::shaders;
    use crate::shader::UniformValue;
    use glam::Vec3;
    use std::path::Path;

    fn empty_scene() -> SceneConfig {
        SceneConfig::from_xml("<scene/>", Path::new(".")).unwrap()
    }

    #[test]
    fn zero_models_still_present_a_frame() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &empty_scene(), VideoMode::default()).unwrap();
        app.frame(&mut backend, &InputState::new(), 0.016).unwrap();

        assert_eq!(backend.draw_count(), 0);
        assert_eq!(backend.passes.len(), 2);
        assert_eq!(backend.presents, 1);
    }

    #[test]
    fn depth_pass_precedes_color_pass() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &SceneConfig::default(), VideoMode::default()).unwrap();
        app.frame(&mut backend, &InputState::new(), 0.016).unwrap();

        let targets: Vec<_> = backend.passes.iter().map(|pass| pass.target).collect();
        assert!(matches!(targets[..], [RecordedTarget::Depth(_), RecordedTarget::Screen]));
        assert_eq!(backend.passes[0].draws.len(), 2);
        assert_eq!(backend.passes[1].draws.len(), 2);
        // The textured crate samples its own texture, the ground plain white.
        assert!(backend.passes[1].draws[0].diffuse.is_none());
        assert!(backend.passes[1].draws[1].diffuse.is_some());
    }

    #[test]
    fn skipped_frame_draws_nothing() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.frame_status = FrameStatus::Skipped;
        let mut app = App::new(&mut backend, &SceneConfig::default(), VideoMode::default()).unwrap();
        app.frame(&mut backend, &InputState::new(), 0.016).unwrap();

        assert!(backend.passes.is_empty());
        assert_eq!(backend.presents, 0);
        // Time still advances so movement is not frozen by a lost surface.
        assert!(app.elapsed() > 0.0);
    }

    #[test]
    fn debug_flag_adds_overlay_pass() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &empty_scene(), VideoMode::default()).unwrap();
        app.set_debug_shadow_map(true);
        app.frame(&mut backend, &InputState::new(), 0.016).unwrap();

        assert_eq!(backend.passes.len(), 3);
        let overlay = &backend.passes[2];
        assert_eq!(overlay.draws.len(), 1);
        assert_eq!(overlay.draws[0].program, "debug");
    }

    #[test]
    fn shader_failure_prevents_construction() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.fail_program("shadow");
        let result = App::new(&mut backend, &SceneConfig::default(), VideoMode::default());
        assert!(matches!(result, Err(EngineError::ShaderCompile { .. })));
    }

    #[test]
    fn missing_model_file_prevents_construction() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut config = empty_scene();
        config
            .models
            .push(ModelConfig::new("ghost", ModelSource::File { path: "missing.obj".into() }));
        let result = App::new(&mut backend, &config, VideoMode::default());
        assert!(matches!(result, Err(EngineError::AssetLoad { .. })));
    }

    #[test]
    fn time_uniform_follows_elapsed_frames() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &SceneConfig::default(), VideoMode::default()).unwrap();
        for _ in 0..4 {
            app.frame(&mut backend, &InputState::new(), 0.25).unwrap();
        }
        let last = backend.passes.last().unwrap();
        let time = shaders::lit_layout().read(&last.draws[0].uniforms, "time");
        assert_eq!(time, Some(UniformValue::Float(1.0)));
    }

    #[test]
    fn light_orbit_moves_the_light_view() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &SceneConfig::default(), VideoMode::default()).unwrap();
        app.frame(&mut backend, &InputState::new(), 0.0).unwrap();
        let before = app.viewers().light.position();
        app.frame(&mut backend, &InputState::new(), 1.0).unwrap();
        let after = app.viewers().light.position();

        assert!(before.distance(after) > 0.1);
        assert!((after.y - 10.0).abs() < 1e-5);
        assert!(app.viewers().light.sight_direction().y < 0.0);
    }

    #[test]
    fn resize_updates_main_aspect() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut app = App::new(&mut backend, &empty_scene(), VideoMode::default()).unwrap();
        app.resize(&mut backend, Extent::new(1600, 400));
        assert_eq!(backend.surface_size(), Extent::new(1600, 400));

        let projection = app.viewers().main.projection_matrix();
        let expected = app.viewers().main.projection();
        assert_eq!(projection, expected.matrix());
        assert!(matches!(
            expected,
            crate::viewer::Projection::Perspective { aspect, .. } if aspect == 4.0
        ));
        assert_eq!(app.viewers().main.position(), Vec3::new(0.0, 3.0, 8.0));
    }
}
