// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

/// Upper bound for `graphics.frames_in_flight`
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Local Shadertoy".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub vsync: bool,
    pub frames_in_flight: usize,
    /// Size of the offscreen image the texture pass renders into
    pub texture_resolution: [u32; 2],
    /// Milliseconds the CPU sleeps while recording each frame
    pub simulated_cpu_work_ms: u64,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            frames_in_flight: 3,
            texture_resolution: [128, 128],
            simulated_cpu_work_ms: 8,
        }
    }
}

/// Where shaders and textures live on disk
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub shader_dir: PathBuf,
    pub texture: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            texture: PathBuf::from("resources/textures/texture1.bmp"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
    pub hot_reload: bool,
    /// Record CPU scopes and serve them to puffin_viewer
    pub profiler: bool,
    pub profiler_addr: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
            hot_reload: true,
            profiler: false,
            profiler_addr: format!("127.0.0.1:{}", puffin_http::DEFAULT_PORT),
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub quit_key: String,
    pub fullscreen_key: String,
    pub reload_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
            fullscreen_key: "F11".to_string(),
            reload_key: "F5".to_string(),
        }
    }
}

/// Resolved key bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    pub quit: KeyCode,
    pub fullscreen: KeyCode,
    pub reload: KeyCode,
}

impl Config {
    /// Load configuration from a specific path. `Ok(None)` if there is no
    /// file; the caller decides how to report that.
    ///
    /// Runs before logging is set up, so nothing is logged here.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.graphics.frames_in_flight =
            config.graphics.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT);
        Ok(config)
    }

    /// Present modes to try, most preferred first. FIFO is always supported
    /// so it terminates every list.
    pub fn present_mode_preference(&self) -> &'static [vk::PresentModeKHR] {
        if self.graphics.vsync {
            &[vk::PresentModeKHR::FIFO]
        } else {
            &[
                vk::PresentModeKHR::MAILBOX,
                vk::PresentModeKHR::IMMEDIATE,
                vk::PresentModeKHR::FIFO,
            ]
        }
    }

    pub fn texture_extent(&self) -> vk::Extent2D {
        let [width, height] = self.graphics.texture_resolution;
        vk::Extent2D {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn key_bindings(&self) -> KeyBindings {
        let defaults = ControlsConfig::default();
        let resolve = |name: &str, fallback: &str| {
            parse_key_code(name).unwrap_or_else(|| {
                log::warn!("Unknown key '{}', using '{}'", name, fallback);
                // Defaults are always parseable
                parse_key_code(fallback).unwrap_or(KeyCode::Escape)
            })
        };

        KeyBindings {
            quit: resolve(&self.controls.quit_key, &defaults.quit_key),
            fullscreen: resolve(&self.controls.fullscreen_key, &defaults.fullscreen_key),
            reload: resolve(&self.controls.reload_key, &defaults.reload_key),
        }
    }
}

/// Parse a key name such as "Escape", "F11", "Space", "R" or "7"
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let key = match name.trim().to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        other => {
            let mut chars = other.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            return single_char_key(c);
        }
    };
    Some(key)
}

fn single_char_key(c: char) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC, KeyCode::KeyD, KeyCode::KeyE,
        KeyCode::KeyF, KeyCode::KeyG, KeyCode::KeyH, KeyCode::KeyI, KeyCode::KeyJ,
        KeyCode::KeyK, KeyCode::KeyL, KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyO,
        KeyCode::KeyP, KeyCode::KeyQ, KeyCode::KeyR, KeyCode::KeyS, KeyCode::KeyT,
        KeyCode::KeyU, KeyCode::KeyV, KeyCode::KeyW, KeyCode::KeyX, KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3, KeyCode::Digit4,
        KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7, KeyCode::Digit8, KeyCode::Digit9,
    ];

    match c {
        'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize]),
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_demo() {
        let config = Config::default();
        assert_eq!(config.window.title, "Local Shadertoy");
        assert_eq!((config.window.width, config.window.height), (1280, 720));
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.texture_extent(), vk::Extent2D { width: 128, height: 128 });
        assert_eq!(config.graphics.simulated_cpu_work_ms, 8);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [graphics]
            vsync = false

            [assets]
            texture = "other.png"
            "#,
        )
        .unwrap();

        assert!(!config.graphics.vsync);
        assert_eq!(config.graphics.frames_in_flight, 3);
        assert_eq!(config.assets.texture, PathBuf::from("other.png"));
        assert_eq!(config.assets.shader_dir, PathBuf::from("shaders"));
        assert_eq!(config.window.width, 1280);
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        let zero = Config::from_toml("[graphics]\nframes_in_flight = 0").unwrap();
        assert_eq!(zero.graphics.frames_in_flight, 1);

        let huge = Config::from_toml("[graphics]\nframes_in_flight = 100").unwrap();
        assert_eq!(huge.graphics.frames_in_flight, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(Config::from_toml("[graphics\nvsync = ").is_err());
    }

    #[test]
    fn test_missing_file_is_reported_as_none() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_existing_file_is_loaded() {
        let path = std::env::temp_dir().join(format!("local-shadertoy-{}.toml", std::process::id()));
        std::fs::write(&path, "[graphics]\nframes_in_flight = 2").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.map(|c| c.graphics.frames_in_flight), Some(2));
    }

    #[test]
    fn test_profiler_off_by_default() {
        let config = Config::default();
        assert!(!config.debug.profiler);
        assert!(config.debug.profiler_addr.ends_with(":8585"));
    }

    #[test]
    fn test_present_mode_preference() {
        let mut config = Config::default();
        assert_eq!(config.present_mode_preference(), &[vk::PresentModeKHR::FIFO]);

        config.graphics.vsync = false;
        let modes = config.present_mode_preference();
        assert_eq!(modes.first(), Some(&vk::PresentModeKHR::MAILBOX));
        assert_eq!(modes.last(), Some(&vk::PresentModeKHR::FIFO));
    }

    #[test]
    fn test_parse_key_code() {
        assert_eq!(parse_key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("f11"), Some(KeyCode::F11));
        assert_eq!(parse_key_code("R"), Some(KeyCode::KeyR));
        assert_eq!(parse_key_code("7"), Some(KeyCode::Digit7));
        assert_eq!(parse_key_code("Hyper"), None);
        assert_eq!(parse_key_code(""), None);
    }

    #[test]
    fn test_unknown_binding_falls_back() {
        let config = Config::from_toml("[controls]\nquit_key = \"nope\"\nreload_key = \"r\"").unwrap();
        let keys = config.key_bindings();
        assert_eq!(keys.quit, KeyCode::Escape);
        assert_eq!(keys.reload, KeyCode::KeyR);
        assert_eq!(keys.fullscreen, KeyCode::F11);
    }
}
