use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::CameraFacing;
use crate::mapper::MIN_KEYPOINT_SCORE;
use crate::model::{ModelConfig, ModelVariant};
use crate::overlay::MarkerStyle;

const DEFAULT_SCREEN_WIDTH: f32 = 1080.0;
const DEFAULT_TENSOR_WIDTH: u32 = 180;
const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_CAPTURE_WIDTH: u32 = 640;
const DEFAULT_CAPTURE_HEIGHT: u32 = 480;
const DEFAULT_CAPTURE_FPS: u32 = 30;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_SLOW_INFERENCE_MS: u64 = 250;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

// ----------------------------------------------------------------------------
// Device description
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Platform {
    Ios,
    #[default]
    Android,
    Other,
}

impl Platform {
    /// Preview width divided by preview height in portrait.
    ///
    /// iOS previews render undistorted at 16:9, everything else at 4:3.
    pub fn portrait_aspect(self) -> f32 {
        match self {
            Platform::Ios => 9.0 / 16.0,
            Platform::Android | Platform::Other => 3.0 / 4.0,
        }
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "other" | "desktop" | "linux" => Ok(Platform::Other),
            other => Err(anyhow!("unknown platform '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl FromStr for Orientation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(anyhow!("unknown orientation '{}'", other)),
        }
    }
}

/// When overlay x coordinates are reflected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MirrorPolicy {
    /// Always mirror. Matches previews that are mirrored regardless of camera.
    #[default]
    Always,
    /// Mirror only frames from the front camera.
    FrontCamera,
    Never,
}

impl MirrorPolicy {
    pub fn applies_to(self, facing: CameraFacing) -> bool {
        match self {
            MirrorPolicy::Always => true,
            MirrorPolicy::FrontCamera => facing == CameraFacing::Front,
            MirrorPolicy::Never => false,
        }
    }
}

impl FromStr for MirrorPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "true" => Ok(MirrorPolicy::Always),
            "front" | "front_camera" => Ok(MirrorPolicy::FrontCamera),
            "never" | "false" => Ok(MirrorPolicy::Never),
            other => Err(anyhow!("unknown mirror policy '{}'", other)),
        }
    }
}

// ----------------------------------------------------------------------------
// Display geometry
// ----------------------------------------------------------------------------

/// Preview surface and inference tensor sizes, fixed for the life of the process.
///
/// `display_*` is the surface as the overlay sees it in the current orientation;
/// `tensor_*` is the size of the frames the model receives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayGeometry {
    pub display_width: f32,
    pub display_height: f32,
    pub tensor_width: f32,
    pub tensor_height: f32,
}

impl DisplayGeometry {
    /// Derive geometry from the device description.
    ///
    /// The preview keeps the platform aspect ratio at full screen width. On iOS in
    /// landscape the tensor is transposed so the camera image is not stretched;
    /// Android rotates the camera texture itself and keeps the portrait tensor.
    /// Mapped points are never rotated.
    pub fn for_device(
        platform: Platform,
        screen_width: f32,
        orientation: Orientation,
        tensor_base_width: u32,
    ) -> Result<Self> {
        if !(screen_width.is_finite() && screen_width > 0.0) {
            return Err(anyhow!("screen width must be positive, got {}", screen_width));
        }
        if tensor_base_width == 0 {
            return Err(anyhow!("tensor width must be positive"));
        }
        let aspect = platform.portrait_aspect();
        let preview_width = screen_width;
        let preview_height = screen_width / aspect;
        let tensor_width = tensor_base_width as f32;
        let tensor_height = (tensor_width / aspect).round();

        let landscape = orientation == Orientation::Landscape;
        let (display_width, display_height) = if landscape {
            (preview_height, preview_width)
        } else {
            (preview_width, preview_height)
        };
        let (tensor_width, tensor_height) = if landscape && platform == Platform::Ios {
            (tensor_height, tensor_width)
        } else {
            (tensor_width, tensor_height)
        };

        Self::new(display_width, display_height, tensor_width, tensor_height)
    }

    /// Explicit geometry. All sides must be positive.
    pub fn new(
        display_width: f32,
        display_height: f32,
        tensor_width: f32,
        tensor_height: f32,
    ) -> Result<Self> {
        for (label, value) in [
            ("display width", display_width),
            ("display height", display_height),
            ("tensor width", tensor_width),
            ("tensor height", tensor_height),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("{} must be positive, got {}", label, value));
            }
        }
        Ok(Self {
            display_width,
            display_height,
            tensor_width,
            tensor_height,
        })
    }

    /// Tensor size in whole pixels, for frame sources.
    pub fn tensor_dims(&self) -> (u32, u32) {
        (
            self.tensor_width.round() as u32,
            self.tensor_height.round() as u32,
        )
    }
}

// ----------------------------------------------------------------------------
// Config file
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    display: Option<DisplayConfigFile>,
    overlay: Option<OverlayStyleFile>,
    model: Option<ModelConfigFile>,
    pump: Option<PumpConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    platform: Option<String>,
    screen_width: Option<f32>,
    orientation: Option<String>,
    tensor_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayStyleFile {
    min_score: Option<f32>,
    mirror: Option<String>,
    marker: Option<MarkerStyle>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    variant: Option<String>,
    enable_smoothing: Option<bool>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PumpConfigFile {
    target_fps: Option<u32>,
    slow_inference_ms: Option<u64>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    front_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    capture_fps: Option<u32>,
    initial_facing: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub platform: Platform,
    pub screen_width: f32,
    pub orientation: Orientation,
    pub tensor_width: u32,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub min_score: f32,
    pub mirror: MirrorPolicy,
    pub marker: MarkerStyle,
}

#[derive(Debug, Clone)]
pub struct PumpSettings {
    /// Refresh rate the pump paces itself to. 0 runs unpaced.
    pub target_fps: u32,
    pub slow_inference: Duration,
    pub health_log_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// `stub://...` for the synthetic source, otherwise a device path.
    pub uri: String,
    pub front_device: Option<String>,
    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_fps: u32,
    pub initial_facing: CameraFacing,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub display: DisplaySettings,
    pub overlay: OverlaySettings,
    pub model: ModelConfig,
    pub pump: PumpSettings,
    pub source: SourceSettings,
}

impl OverlayConfig {
    /// Load from the file named by `POSE_OVERLAY_CONFIG` (if any), then apply env.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("POSE_OVERLAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any), then apply env overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => OverlayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Geometry for the configured device.
    pub fn geometry(&self) -> Result<DisplayGeometry> {
        DisplayGeometry::for_device(
            self.display.platform,
            self.display.screen_width,
            self.display.orientation,
            self.display.tensor_width,
        )
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            platform: parse_or_default(display_file.platform.as_deref())?,
            screen_width: display_file.screen_width.unwrap_or(DEFAULT_SCREEN_WIDTH),
            orientation: parse_or_default(display_file.orientation.as_deref())?,
            tensor_width: display_file.tensor_width.unwrap_or(DEFAULT_TENSOR_WIDTH),
        };

        let overlay_file = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            min_score: overlay_file.min_score.unwrap_or(MIN_KEYPOINT_SCORE),
            mirror: parse_or_default(overlay_file.mirror.as_deref())?,
            marker: overlay_file.marker.unwrap_or_default(),
        };

        let model_file = file.model.unwrap_or_default();
        let defaults = ModelConfig::default();
        let model = ModelConfig {
            variant: match model_file.variant.as_deref() {
                Some(variant) => variant.parse::<ModelVariant>()?,
                None => defaults.variant,
            },
            enable_smoothing: model_file
                .enable_smoothing
                .unwrap_or(defaults.enable_smoothing),
            model_path: model_file.model_path,
        };

        let pump_file = file.pump.unwrap_or_default();
        let pump = PumpSettings {
            target_fps: pump_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            slow_inference: Duration::from_millis(
                pump_file
                    .slow_inference_ms
                    .unwrap_or(DEFAULT_SLOW_INFERENCE_MS),
            ),
            health_log_interval: Duration::from_secs(
                pump_file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
        };

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            front_device: source_file.front_device,
            capture_width: source_file.capture_width.unwrap_or(DEFAULT_CAPTURE_WIDTH),
            capture_height: source_file.capture_height.unwrap_or(DEFAULT_CAPTURE_HEIGHT),
            capture_fps: source_file.capture_fps.unwrap_or(DEFAULT_CAPTURE_FPS),
            initial_facing: parse_or_default(source_file.initial_facing.as_deref())?,
        };

        Ok(Self {
            display,
            overlay,
            model,
            pump,
            source,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(platform) = std::env::var("POSE_OVERLAY_PLATFORM") {
            if !platform.trim().is_empty() {
                self.display.platform = platform.parse()?;
            }
        }
        if let Ok(width) = std::env::var("POSE_OVERLAY_SCREEN_WIDTH") {
            self.display.screen_width = width
                .trim()
                .parse()
                .map_err(|_| anyhow!("POSE_OVERLAY_SCREEN_WIDTH must be a number"))?;
        }
        if let Ok(score) = std::env::var("POSE_OVERLAY_MIN_SCORE") {
            self.overlay.min_score = score
                .trim()
                .parse()
                .map_err(|_| anyhow!("POSE_OVERLAY_MIN_SCORE must be a number"))?;
        }
        if let Ok(mirror) = std::env::var("POSE_OVERLAY_MIRROR") {
            if !mirror.trim().is_empty() {
                self.overlay.mirror = mirror.parse()?;
            }
        }
        if let Ok(fps) = std::env::var("POSE_OVERLAY_TARGET_FPS") {
            self.pump.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("POSE_OVERLAY_TARGET_FPS must be an integer"))?;
        }
        if let Ok(path) = std::env::var("POSE_OVERLAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(uri) = std::env::var("POSE_OVERLAY_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.overlay.min_score) {
            return Err(anyhow!(
                "min_score must be within [0, 1], got {}",
                self.overlay.min_score
            ));
        }
        if self.overlay.marker.radius <= 0.0 {
            return Err(anyhow!("marker radius must be positive"));
        }
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        // Surfaces geometry errors at load time rather than at pump start.
        self.geometry()?;
        Ok(())
    }
}

fn parse_or_default<T>(value: Option<&str>) -> Result<T>
where
    T: FromStr<Err = anyhow::Error> + Default,
{
    match value {
        Some(raw) if !raw.trim().is_empty() => raw.parse(),
        _ => Ok(T::default()),
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
