//! Rendering options applied to a page before the screenshot is taken.

use serde::{Deserialize, Serialize};

/// Output image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => "webp",
        }
    }

    /// Whether the encoder accepts a quality setting for this format.
    pub fn supports_quality(&self) -> bool {
        !matches!(self, ImageFormat::Png)
    }
}

/// Page viewport dimensions used for device metrics emulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale_factor")]
    pub device_scale_factor: f64,
    #[serde(default)]
    pub mobile: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

fn default_scale_factor() -> f64 {
    1.0
}

/// Built-in emulation profiles covering the common testing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreset {
    DesktopHd,
    Iphone14,
    Pixel7,
    IpadMini,
}

impl DevicePreset {
    pub fn viewport(&self) -> Viewport {
        match self {
            DevicePreset::DesktopHd => Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: 1.0,
                mobile: false,
            },
            DevicePreset::Iphone14 => Viewport {
                width: 390,
                height: 844,
                device_scale_factor: 3.0,
                mobile: true,
            },
            DevicePreset::Pixel7 => Viewport {
                width: 412,
                height: 915,
                device_scale_factor: 2.625,
                mobile: true,
            },
            DevicePreset::IpadMini => Viewport {
                width: 744,
                height: 1133,
                device_scale_factor: 2.0,
                mobile: true,
            },
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            DevicePreset::DesktopHd => {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
            }
            DevicePreset::Iphone14 => {
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1"
            }
            DevicePreset::Pixel7 => {
                "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36"
            }
            DevicePreset::IpadMini => {
                "Mozilla/5.0 (iPad; CPU OS 17_5 like Mac OS X) AppleWebKit/605.1.15 \
                 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1"
            }
        }
    }
}

/// Rectangular capture region in CSS pixels, relative to the page origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Wait for a selector to appear after navigation, up to a per-wait timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitFor {
    pub selector: String,
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}

/// Everything that shapes the rendered output of a single capture.
///
/// All fields have serde defaults so a bare `{}` deserializes to a plain
/// PNG capture of the default viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    #[serde(default)]
    pub format: ImageFormat,
    /// Encoder quality 0-100, ignored for PNG.
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub full_page: bool,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub device: Option<DevicePreset>,
    #[serde(default)]
    pub clip: Option<ClipRegion>,
    #[serde(default)]
    pub wait_for: Option<WaitFor>,
    /// Extra stylesheet injected after navigation, before capture.
    #[serde(default)]
    pub inject_css: Option<String>,
    #[serde(default)]
    pub dark_mode: bool,
}

fn default_quality() -> u8 {
    85
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: ImageFormat::default(),
            quality: default_quality(),
            full_page: false,
            viewport: None,
            device: None,
            clip: None,
            wait_for: None,
            inject_css: None,
            dark_mode: false,
        }
    }
}

impl RenderOptions {
    /// The viewport to emulate, if any. An explicit viewport overrides the
    /// device preset's dimensions.
    pub fn effective_viewport(&self) -> Option<Viewport> {
        self.viewport.or_else(|| self.device.map(|d| d.viewport()))
    }
}
