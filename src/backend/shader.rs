// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. build.rs compiles the GLSL sources in
// shaders/ with glslc; at runtime we load the .spv files from disk so they
// can be recompiled and hot reloaded without rebuilding the binary.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::VulkanDevice;

/// Owned shader module, destroyed on drop
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn load(device: &'a VulkanDevice, path: &Path) -> Result<Self> {
        let code = read_spirv(path)?;
        let module = create_shader_module(device, &code)
            .with_context(|| format!("Failed to create shader module from {:?}", path))?;
        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

/// Read a SPIR-V file into 4-byte words (handles alignment and endianness)
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Shader not found: {:?} (is glslc installed?)", path))?;
    ash::util::read_spv(&mut file).with_context(|| format!("Invalid SPIR-V in {:?}", path))
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_spirv_words() {
        let path = std::env::temp_dir().join("local_shadertoy_test_words.spv");
        let words: [u32; 3] = [0x0723_0203, 0x0001_0000, 42];
        {
            let mut file = std::fs::File::create(&path).unwrap();
            for word in words {
                file.write_all(&word.to_le_bytes()).unwrap();
            }
        }

        assert_eq!(read_spirv(&path).unwrap(), words.to_vec());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_truncated_spirv_rejected() {
        let path = std::env::temp_dir().join("local_shadertoy_test_truncated.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07, 0x00]).unwrap();

        assert!(read_spirv(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_shader_names_path() {
        let err = read_spirv(Path::new("no/such/shader.spv")).unwrap_err();
        assert!(format!("{:#}", err).contains("no/such/shader.spv"));
    }
}
