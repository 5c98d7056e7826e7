//! Synthetic frame source.
//!
//! `SyntheticSource` stands in for a phone camera pipeline: it emits NV12 sensor
//! frames at the capture resolution, converts them to RGB and resizes them to the
//! inference tensor dimensions, the same path a real camera adapter takes.
//!
//! Only `stub://` URIs are accepted.

use anyhow::{anyhow, Result};
use std::collections::HashSet;

use super::normalize::{normalize_to_rgb, resize_rgb_nearest, PixelFormat};
use super::{CameraFacing, CameraSelector, FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URI (e.g., "stub://front_camera").
    pub uri: String,
    /// Simulated sensor resolution. Must be even in both dimensions (NV12).
    pub capture_width: u32,
    pub capture_height: u32,
    /// Resolution of the frames handed to the pump.
    pub output_width: u32,
    pub output_height: u32,
    /// Stop after this many frames. `None` runs forever.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            uri: "stub://camera".to_string(),
            capture_width: 640,
            capture_height: 480,
            output_width: 180,
            output_height: 240,
            frame_limit: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    selector: CameraSelector,
    active: Option<CameraFacing>,
    outstanding: HashSet<u64>,
    stats: SourceStats,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig, selector: CameraSelector) -> Result<Self> {
        if !config.uri.starts_with("stub://") {
            return Err(anyhow!(
                "synthetic source only accepts stub:// URIs, got '{}'",
                config.uri
            ));
        }
        if config.capture_width == 0
            || config.capture_height == 0
            || config.capture_width % 2 != 0
            || config.capture_height % 2 != 0
        {
            return Err(anyhow!(
                "synthetic capture size {}x{} must be non-zero and even",
                config.capture_width,
                config.capture_height
            ));
        }
        if config.output_width == 0 || config.output_height == 0 {
            return Err(anyhow!("synthetic output size must be non-zero"));
        }
        Ok(Self {
            config,
            selector,
            active: None,
            outstanding: HashSet::new(),
            stats: SourceStats::default(),
            connected: false,
        })
    }

    /// Synthetic sources are always reachable.
    pub fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{} -> {}x{})",
            self.config.uri,
            self.config.capture_width,
            self.config.capture_height,
            self.config.output_width,
            self.config.output_height
        );
        Ok(())
    }

    fn generate_nv12(&self, facing: CameraFacing) -> Vec<u8> {
        let w = self.config.capture_width as usize;
        let h = self.config.capture_height as usize;
        let frame = self.stats.frames_captured;
        let y_plane = w * h;

        let mut nv12 = vec![0u8; y_plane + y_plane / 2];
        // Diagonal gradient that drifts each frame; front camera drifts the other way.
        for j in 0..h {
            for i in 0..w {
                let shift = match facing {
                    CameraFacing::Back => frame as usize,
                    CameraFacing::Front => (w - i) + frame as usize,
                };
                nv12[j * w + i] = ((i + j + shift) % 256) as u8;
            }
        }
        let chroma = match facing {
            CameraFacing::Back => [128u8, 128u8],
            CameraFacing::Front => [112u8, 144u8],
        };
        for pair in nv12[y_plane..].chunks_exact_mut(2) {
            pair.copy_from_slice(&chroma);
        }
        nv12
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.uri
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.config.uri));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.stats.frames_captured >= limit {
                return Ok(None);
            }
        }

        let facing = self.selector.current();
        if self.active.is_some_and(|active| active != facing) {
            self.stats.camera_switches += 1;
            log::info!("SyntheticSource: switched to {:?} camera", facing);
        }
        self.active = Some(facing);

        let nv12 = self.generate_nv12(facing);
        let rgb = normalize_to_rgb(
            &nv12,
            self.config.capture_width,
            self.config.capture_height,
            PixelFormat::Nv12,
        )?;
        let rgb = resize_rgb_nearest(
            rgb,
            self.config.capture_width,
            self.config.capture_height,
            self.config.output_width,
            self.config.output_height,
        )?;

        self.stats.frames_captured += 1;
        let sequence = self.stats.frames_captured;
        let frame = Frame::new(
            rgb,
            self.config.output_width,
            self.config.output_height,
            sequence,
            facing,
        )?;
        self.outstanding.insert(sequence);
        Ok(Some(frame))
    }

    fn release(&mut self, frame: Frame) -> Result<()> {
        if !self.outstanding.remove(&frame.sequence) {
            return Err(anyhow!(
                "frame {} was not issued by {} or was already released",
                frame.sequence,
                self.config.uri
            ));
        }
        self.stats.frames_released += 1;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}
