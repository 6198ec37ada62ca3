//! Texture file loading
//!
//! Decodes an image file from disk into tightly packed RGBA8 for GPU upload.

use anyhow::{Context, Result};
use std::path::Path;

/// Decoded RGBA8 pixels
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    /// Load an image file, converting any supported format to RGBA8
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Loading texture from {:?}", path);

        let bytes = std::fs::read(path).with_context(|| format!("Texture not found: {:?}", path))?;
        let texture =
            Self::from_bytes(&bytes).with_context(|| format!("Failed to decode texture {:?}", path))?;

        log::info!("Loaded texture {}x{} from {:?}", texture.width, texture.height, path);
        Ok(texture)
    }

    /// Decode an in-memory image, format guessed from its header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        anyhow::ensure!(width > 0 && height > 0, "Texture has no pixels");

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode_bmp(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 200]));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Bmp).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_bmp_expands_to_rgba() {
        let texture = TextureData::from_bytes(&encode_bmp(3, 2)).unwrap();
        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.pixels.len(), 3 * 2 * 4);
        // Second pixel of the first row
        assert_eq!(&texture.pixels[4..8], &[10, 0, 200, 255]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(TextureData::from_bytes(b"definitely not an image").is_err());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = TextureData::from_file("resources/textures/missing.bmp").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Texture not found"));
        assert!(message.contains("missing.bmp"));
    }

    #[test]
    fn test_bundled_texture_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/textures/texture1.bmp");
        let texture = TextureData::from_file(path).unwrap();
        assert_eq!((texture.width, texture.height), (64, 64));
    }
}
