//! WGSL sources and the uniform layouts mirroring their `Uniforms` structs.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::MAX_BONES;
use crate::shader::{UniformKind, UniformLayout};

const LIT_COMMON: &str = include_str!("../../shaders/lit_common.wgsl");
const STATIC_VS: &str = include_str!("../../shaders/static.wgsl");
const ANIMATED_VS: &str = include_str!("../../shaders/animated.wgsl");
const SHADOW: &str = include_str!("../../shaders/shadow.wgsl");
const DEBUG_DEPTH: &str = include_str!("../../shaders/debug_depth.wgsl");

/// Layout shared by the static and animated lit programs.
pub fn lit_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("model", UniformKind::Mat4),
        ("view", UniformKind::Mat4),
        ("projection", UniformKind::Mat4),
        ("light_view", UniformKind::Mat4),
        ("light_projection", UniformKind::Mat4),
        ("eye_position", UniformKind::Vec3),
        ("time", UniformKind::Float),
        ("light_direction", UniformKind::Vec3),
        ("ambient", UniformKind::Float),
        ("light_color", UniformKind::Vec3),
        ("roughness", UniformKind::Float),
        ("shadow_map_size", UniformKind::Vec2),
        ("skinned", UniformKind::Int),
        ("bones", UniformKind::Mat4Array(MAX_BONES)),
    ])
}

pub fn shadow_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("model", UniformKind::Mat4),
        ("view", UniformKind::Mat4),
        ("projection", UniformKind::Mat4),
        ("skinned", UniformKind::Int),
        ("bones", UniformKind::Mat4Array(MAX_BONES)),
    ])
}

pub fn debug_layout() -> UniformLayout {
    UniformLayout::new(&[
        ("rect", UniformKind::Vec4),
        ("depth_power", UniformKind::Float),
    ])
}

/// Source text of every program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    pub lit_common: String,
    pub static_vs: String,
    pub animated_vs: String,
    pub shadow: String,
    pub debug: String,
}

impl ShaderSources {
    /// Sources compiled into the binary.
    pub fn embedded() -> Self {
        Self {
            lit_common: LIT_COMMON.to_string(),
            static_vs: STATIC_VS.to_string(),
            animated_vs: ANIMATED_VS.to_string(),
            shadow: SHADOW.to_string(),
            debug: DEBUG_DEPTH.to_string(),
        }
    }

    /// Reads sources from `dir`, falling back to the embedded copy for any
    /// file that does not exist there.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        info!("loading shaders from {}", dir.display());
        Ok(Self {
            lit_common: read_or(dir, "lit_common.wgsl", LIT_COMMON)?,
            static_vs: read_or(dir, "static.wgsl", STATIC_VS)?,
            animated_vs: read_or(dir, "animated.wgsl", ANIMATED_VS)?,
            shadow: read_or(dir, "shadow.wgsl", SHADOW)?,
            debug: read_or(dir, "debug_depth.wgsl", DEBUG_DEPTH)?,
        })
    }

    pub fn static_program(&self) -> String {
        format!("{}\n{}", self.lit_common, self.static_vs)
    }

    pub fn animated_program(&self) -> String {
        format!("{}\n{}", self.lit_common, self.animated_vs)
    }
}

fn read_or(dir: &Path, name: &str, fallback: &str) -> anyhow::Result<String> {
    use anyhow::Context;

    let path = dir.join(name);
    if !path.exists() {
        debug!("{} not found, using built-in source", path.display());
        return Ok(fallback.to_string());
    }
    fs::read_to_string(&path).with_context(|| format!("failed to read shader {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lit_programs_share_the_common_block() {
        let sources = ShaderSources::embedded();
        assert!(sources.static_program().starts_with(&sources.lit_common));
        assert!(sources.animated_program().contains("skin_matrix"));
        assert!(sources.shadow.contains("vs_main"));
        assert!(!sources.shadow.contains("fs_main"));
    }

    #[test]
    fn missing_files_fall_back_to_embedded_sources() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("shadow.wgsl"), "// custom").unwrap();
        let sources = ShaderSources::from_dir(dir.path()).unwrap();
        assert_eq!(sources.shadow, "// custom");
        assert_eq!(sources.debug, DEBUG_DEPTH);
    }
}
