//! Core of the Curse engine: a small real-time renderer built around a
//! two-pass shadow mapping pipeline.
//!
//! Every frame first renders the scene from the light viewer into a depth
//! map, then renders it from the main viewer while sampling that map to
//! decide which fragments are lit. All GPU work goes through the
//! [`RenderBackend`] trait so the pipeline stays testable without a window.

pub mod animation;
pub mod app;
pub mod config;
pub mod error;
pub mod input;
pub mod mesh;
pub mod model;
pub mod model_loader;
pub mod movement;
pub mod obj;
pub mod pipeline;
pub mod render;
pub mod scene;
pub mod screen_quad;
pub mod shader;
pub mod texture;
pub mod viewer;

pub use app::App;
pub use error::{EngineError, EngineResult};
pub use input::{InputState, KeyCode, NamedKey, VideoMode};
pub use mesh::{MeshData, Vertex};
pub use model::ModelData;
pub use movement::{CircleMovement, FirstPerson, Movement};
pub use obj::{load_obj, load_obj_from_str};
pub use render::{Extent, RenderBackend, WgpuBackend};
pub use scene::SceneConfig;
pub use shader::{ShaderRole, Shaders};
pub use viewer::{Projection, Viewer};
