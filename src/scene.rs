use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use glam::{Mat4, Vec3};
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::config::{SHADOW_HEIGHT, SHADOW_WIDTH};
use crate::error::{EngineError, EngineResult};
use crate::input::VideoMode;
use crate::movement::{CircleMovement, FirstPerson};
use crate::shader::ShaderRole;
use crate::viewer::{Projection, Viewer};

/// Everything needed to build an [`App`](crate::app::App): viewers, light,
/// models and render settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    pub settings: Settings,
    pub light: LightConfig,
    pub main_viewer: ViewerConfig,
    pub light_viewer: ViewerConfig,
    pub models: Vec<ModelConfig>,
    /// Relative asset paths are resolved against this directory.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory overriding the embedded WGSL sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader_dir: Option<PathBuf>,
    #[serde(default)]
    pub debug_shadow_map: bool,
    pub clear_color: Vec3,
    pub fullscreen: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shader_dir: None,
            debug_shadow_map: false,
            clear_color: Vec3::new(0.08, 0.08, 0.12),
            fullscreen: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightConfig {
    pub color: Vec3,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self { color: Vec3::ONE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Perspective,
    Orthographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MovementConfig {
    FirstPerson {
        speed: f32,
    },
    Circle {
        center: Vec3,
        radius: f32,
        angular_speed: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        focus: Option<Vec3>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    pub position: Vec3,
    pub target: Vec3,
    pub projection: ProjectionKind,
    pub fov_degrees: f32,
    /// Half size of the orthographic volume.
    pub half_extent: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementConfig>,
}

impl ViewerConfig {
    fn main_default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 8.0),
            target: Vec3::new(0.0, 0.5, 0.0),
            projection: ProjectionKind::Perspective,
            fov_degrees: 45.0,
            half_extent: 12.0,
            movement: Some(MovementConfig::FirstPerson { speed: 4.0 }),
        }
    }

    fn light_default() -> Self {
        Self {
            position: Vec3::new(8.0, 10.0, 0.0),
            target: Vec3::ZERO,
            projection: ProjectionKind::Orthographic,
            fov_degrees: 45.0,
            half_extent: 12.0,
            movement: Some(MovementConfig::Circle {
                center: Vec3::new(0.0, 10.0, 0.0),
                radius: 8.0,
                angular_speed: 0.3,
                focus: Some(Vec3::ZERO),
            }),
        }
    }

    /// Builds the viewer with its movement attached.
    pub fn build(&self, aspect: f32, video_mode: VideoMode) -> Viewer {
        let projection = match self.projection {
            ProjectionKind::Perspective => Projection::Perspective {
                fov_y: self.fov_degrees.to_radians(),
                aspect,
                near: 0.1,
                far: 100.0,
            },
            ProjectionKind::Orthographic => Projection::Orthographic {
                half_extent: self.half_extent,
                near: 0.1,
                far: 40.0,
            },
        };
        let mut viewer = Viewer::new(self.position, self.target, projection);
        match self.movement {
            Some(MovementConfig::FirstPerson { speed }) => {
                viewer.apply_movement(FirstPerson::new(video_mode).with_speed(speed));
            }
            Some(MovementConfig::Circle {
                center,
                radius,
                angular_speed,
                focus,
            }) => {
                viewer.apply_movement(
                    CircleMovement::new(center, radius, angular_speed)
                        .with_focus(focus.unwrap_or(center)),
                );
            }
            None => {}
        }
        viewer
    }

    fn describe(&self) -> String {
        let projection = match self.projection {
            ProjectionKind::Perspective => "perspective",
            ProjectionKind::Orthographic => "orthographic",
        };
        let movement = match self.movement {
            Some(MovementConfig::FirstPerson { .. }) => "first-person",
            Some(MovementConfig::Circle { .. }) => "circle",
            None => "static",
        };
        format!(
            "{projection} at ({:.2}, {:.2}, {:.2}), {movement}",
            self.position.x, self.position.y, self.position.z
        )
    }
}

/// Where a model's geometry comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSource {
    /// `.obj`, `.gltf` or `.glb` file.
    File { path: PathBuf },
    Plane { size: f32 },
    Cube,
    Quad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TextureSource {
    File { path: PathBuf, flip_vertically: bool },
    /// Generated checkerboard, usable without any asset on disk.
    Checker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub source: ModelSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture: Option<TextureSource>,
    /// Forced shader. Without it, animated files use the animated shader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shader: Option<ShaderRole>,
    pub position: Vec3,
    /// Euler angles in degrees.
    pub rotation: Vec3,
    pub scale: Vec3,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness: Option<f32>,
}

impl ModelConfig {
    pub fn new(name: &str, source: ModelSource) -> Self {
        Self {
            name: name.to_string(),
            source,
            texture: None,
            shader: None,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            ambient: None,
            roughness: None,
        }
    }

    pub fn transform(&self) -> Mat4 {
        let translation = Mat4::from_translation(self.position);
        let rotation = Mat4::from_rotation_z(self.rotation.z.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_x(self.rotation.x.to_radians());
        let scale = Mat4::from_scale(self.scale);
        translation * rotation * scale
    }

    fn describe(&self) -> String {
        let source = match &self.source {
            ModelSource::File { path } => path.display().to_string(),
            ModelSource::Plane { size } => format!("plane {size}"),
            ModelSource::Cube => "cube".to_string(),
            ModelSource::Quad => "quad".to_string(),
        };
        let shader = match self.shader {
            Some(ShaderRole::Static) => "static",
            Some(ShaderRole::Animated) => "animated",
            None => "auto",
        };
        format!("{} ({source}, {shader})", self.name)
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        let mut ground = ModelConfig::new("ground", ModelSource::Plane { size: 20.0 });
        ground.roughness = Some(0.9);

        let mut crate_box = ModelConfig::new("crate", ModelSource::Cube);
        crate_box.position = Vec3::new(0.0, 1.0, 0.0);
        crate_box.rotation = Vec3::new(0.0, 30.0, 0.0);
        crate_box.texture = Some(TextureSource::Checker);

        Self {
            settings: Settings::default(),
            light: LightConfig::default(),
            main_viewer: ViewerConfig::main_default(),
            light_viewer: ViewerConfig::light_default(),
            models: vec![ground, crate_box],
            base_dir: PathBuf::from("."),
        }
    }
}

impl SceneConfig {
    /// Reads and parses a scene file. Assets are resolved next to it.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let xml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(|err| EngineError::asset(path, err))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_xml(&xml, &base_dir)
            .with_context(|| format!("invalid scene {}", path.display()))
            .map_err(EngineError::SceneConfig)
    }

    /// Parses a scene document. Elements that are left out keep the values
    /// of the default scene, except `<model>` entries which replace it.
    pub fn from_xml(xml: &str, base_dir: &Path) -> Result<Self> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            bail!("root element must be <scene>, found <{}>", root.tag_name().name());
        }

        let mut scene = SceneConfig {
            models: Vec::new(),
            base_dir: base_dir.to_path_buf(),
            ..SceneConfig::default()
        };

        if let Some(node) = child(&root, "settings") {
            scene.settings = parse_settings(&node, scene.settings)?;
        }
        if let Some(node) = child(&root, "light") {
            scene.light.color = parse_color(optional_text(&node, "color"), scene.light.color)?;
        }
        for node in root.children().filter(|n| n.has_tag_name("viewer")) {
            match required_text(&node, "role")?.as_str() {
                "main" => scene.main_viewer = parse_viewer(&node, scene.main_viewer)?,
                "light" => scene.light_viewer = parse_viewer(&node, scene.light_viewer)?,
                other => bail!("unknown viewer role `{other}`"),
            }
        }
        for node in root.children().filter(|n| n.has_tag_name("model")) {
            let model = parse_model(&node)?;
            scene.models.push(model);
        }

        Ok(scene)
    }

    /// Resolves an asset path relative to the scene file.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Human readable overview printed by `--summary-only`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "main viewer: {}", self.main_viewer.describe());
        let _ = writeln!(out, "light viewer: {}", self.light_viewer.describe());
        let _ = writeln!(out, "models: {}", self.models.len());
        for model in &self.models {
            let _ = writeln!(out, " - {}", model.describe());
        }
        let _ = writeln!(out, "shadow map: {SHADOW_WIDTH}x{SHADOW_HEIGHT}");
        let _ = writeln!(
            out,
            "debug shadow map: {}",
            if self.settings.debug_shadow_map { "on" } else { "off" }
        );
        out
    }
}

fn parse_settings(node: &Node<'_, '_>, defaults: Settings) -> Result<Settings> {
    Ok(Settings {
        shader_dir: optional_text(node, "shader_dir")
            .map(PathBuf::from)
            .or(defaults.shader_dir),
        debug_shadow_map: parse_bool(
            optional_text(node, "debug_shadow_map"),
            defaults.debug_shadow_map,
        )?,
        clear_color: parse_color(optional_text(node, "clear_color"), defaults.clear_color)?,
        fullscreen: parse_bool(optional_text(node, "fullscreen"), defaults.fullscreen)?,
    })
}

fn parse_viewer(node: &Node<'_, '_>, defaults: ViewerConfig) -> Result<ViewerConfig> {
    let projection = match optional_text(node, "projection").as_deref() {
        None => defaults.projection,
        Some("perspective") => ProjectionKind::Perspective,
        Some("orthographic") => ProjectionKind::Orthographic,
        Some(other) => bail!("unknown projection `{other}`"),
    };
    let movement = match optional_text(node, "movement").as_deref() {
        None => defaults.movement,
        Some("none") => None,
        Some("first-person") => Some(MovementConfig::FirstPerson {
            speed: parse_f32(optional_text(node, "speed"), 4.0)?,
        }),
        Some("circle") => {
            let center = parse_vec3(optional_text(node, "center"), Vec3::ZERO)?;
            let focus = optional_text(node, "focus")
                .map(|text| parse_vec3(Some(text), center))
                .transpose()?;
            Some(MovementConfig::Circle {
                center,
                radius: parse_f32(optional_text(node, "radius"), 8.0)?,
                angular_speed: parse_f32(optional_text(node, "angular_speed"), 1.0)?,
                focus,
            })
        }
        Some(other) => bail!("unknown movement `{other}`"),
    };
    Ok(ViewerConfig {
        position: parse_vec3(optional_text(node, "position"), defaults.position)?,
        target: parse_vec3(optional_text(node, "target"), defaults.target)?,
        projection,
        fov_degrees: parse_f32(optional_text(node, "fov"), defaults.fov_degrees)?,
        half_extent: parse_f32(optional_text(node, "half_extent"), defaults.half_extent)?,
        movement,
    })
}

fn parse_model(node: &Node<'_, '_>) -> Result<ModelConfig> {
    let name = required_text(node, "name")?;
    let source = match (optional_text(node, "path"), optional_text(node, "primitive")) {
        (Some(path), _) => ModelSource::File {
            path: PathBuf::from(path),
        },
        (None, Some(primitive)) => match primitive.as_str() {
            "plane" => ModelSource::Plane {
                size: parse_f32(optional_text(node, "size"), 10.0)?,
            },
            "cube" => ModelSource::Cube,
            "quad" => ModelSource::Quad,
            other => bail!("model `{name}`: unknown primitive `{other}`"),
        },
        (None, None) => bail!("model `{name}` needs a <path> or a <primitive>"),
    };

    let texture = match optional_text(node, "texture") {
        None => None,
        Some(text) if text == "builtin:checker" => Some(TextureSource::Checker),
        Some(path) => Some(TextureSource::File {
            path: PathBuf::from(path),
            flip_vertically: parse_bool(optional_text(node, "flip_texture"), true)?,
        }),
    };
    let shader = match optional_text(node, "shader").as_deref() {
        None => None,
        Some("static") => Some(ShaderRole::Static),
        Some("animated") => Some(ShaderRole::Animated),
        Some(other) => bail!("model `{name}`: unknown shader `{other}`"),
    };

    let mut model = ModelConfig::new(&name, source);
    model.texture = texture;
    model.shader = shader;
    model.position = parse_vec3(optional_text(node, "position"), model.position)?;
    model.rotation = parse_vec3(optional_text(node, "rotation"), model.rotation)?;
    model.scale = parse_vec3(optional_text(node, "scale"), model.scale)?;
    model.ambient = optional_text(node, "ambient")
        .map(|text| parse_f32(Some(text), 0.0))
        .transpose()?;
    model.roughness = optional_text(node, "roughness")
        .map(|text| parse_f32(Some(text), 0.0))
        .transpose()?;
    Ok(model)
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_components<const N: usize>(value: &str, what: &str) -> Result<[f32; N]> {
    let mut out = [0.0; N];
    let mut numbers = value.split_whitespace().map(|component| {
        component
            .parse::<f32>()
            .with_context(|| format!("invalid {what} component `{component}`"))
    });
    for slot in &mut out {
        *slot = numbers
            .next()
            .ok_or_else(|| anyhow!("{what} is missing components"))??;
    }
    Ok(out)
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    Ok(Vec3::from_array(parse_components::<3>(&value, "vector")?))
}

/// Colors are written as 0-255 components.
fn parse_color(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    Ok(Vec3::from_array(parse_components::<3>(&value, "color")?) / 255.0)
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float: {err}")),
        None => Ok(default),
    }
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        None => Ok(default),
        Some("true" | "yes" | "1") => Ok(true),
        Some("false" | "no" | "0") => Ok(false),
        Some(other) => Err(anyhow!("failed to parse boolean `{other}`")),
    }
}
