// GPU-visible parameter blocks
//
// Layouts must match shaders/toy.frag and shaders/texture.frag.

use bytemuck::{Pod, Zeroable};
use glam::{IVec2, UVec2};

/// Uniform block of the toy pass (set 0, binding 2), std140
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ShaderParams {
    pub resolution: UVec2,
    /// Cursor position in framebuffer pixels
    pub mouse_pos: IVec2,
}

impl ShaderParams {
    pub fn new(resolution: UVec2, mouse_pos: IVec2) -> Self {
        Self { resolution, mouse_pos }
    }
}

/// Push constant of the texture pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TextureParams {
    pub resolution: UVec2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_shader_params_layout() {
        assert_eq!(size_of::<ShaderParams>(), 16);
        assert_eq!(offset_of!(ShaderParams, resolution), 0);
        assert_eq!(offset_of!(ShaderParams, mouse_pos), 8);
    }

    #[test]
    fn test_texture_params_fit_push_constants() {
        // Vulkan guarantees at least 128 bytes of push constants
        assert_eq!(size_of::<TextureParams>(), 8);
    }

    #[test]
    fn test_negative_mouse_survives_bytes() {
        let params = ShaderParams::new(UVec2::new(1280, 720), IVec2::new(-4, 30));
        let bytes = bytemuck::bytes_of(&params);
        assert_eq!(&bytes[8..12], &(-4i32).to_ne_bytes());
        assert_eq!(&bytes[0..4], &1280u32.to_ne_bytes());
    }
}
