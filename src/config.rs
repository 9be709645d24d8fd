//! Compile-time engine settings.

/// Title of the main window.
pub const WINDOW_TITLE: &str = "Curse Engine";

/// Shadow map width in texels. Used both for the depth pass viewport and
/// for the texel size handed to the lit shaders.
pub const SHADOW_WIDTH: u32 = 2048;

/// Shadow map height in texels.
pub const SHADOW_HEIGHT: u32 = 2048;

/// Size of the bone palette uploaded to skinned shaders.
pub const MAX_BONES: usize = 64;

/// Window size used when the primary monitor cannot be queried.
pub const FALLBACK_WINDOW_SIZE: (u32, u32) = (1280, 720);
