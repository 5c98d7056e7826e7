//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing frames from local V4L2 devices
//! (USB webcams, laptop cameras, phone cameras exposed through v4l2loopback).
//!
//! The V4L2 source is responsible for:
//! - Opening the device node that matches the selected camera facing
//! - Reopening on a camera toggle, before the next frame is captured
//! - Converting RGB3/NV12 captures to RGB and resizing to tensor dimensions
//!
//! The V4L2 source MUST NOT:
//! - Store captured frames to disk
//! - Retain frames beyond handoff to the pump

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, resize_rgb_nearest, PixelFormat};
use super::{CameraFacing, CameraSelector, FrameSource, SourceStats};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device used for the front camera. Falls back to `back_device` when unset.
    pub front_device: Option<String>,
    /// Device used for the back camera (e.g., "/dev/video0").
    pub back_device: String,
    /// Requested capture rate. 0 leaves the driver default.
    pub target_fps: u32,
    /// Preferred capture size.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Size of the frames handed to the pump.
    pub output_width: u32,
    pub output_height: u32,
    pub frame_limit: Option<u64>,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            front_device: None,
            back_device: "/dev/video0".to_string(),
            target_fps: 30,
            capture_width: 640,
            capture_height: 480,
            output_width: 180,
            output_height: 240,
            frame_limit: None,
        }
    }
}

impl V4l2Config {
    fn device_for(&self, facing: CameraFacing) -> &str {
        match facing {
            CameraFacing::Front => self
                .front_device
                .as_deref()
                .unwrap_or(self.back_device.as_str()),
            CameraFacing::Back => self.back_device.as_str(),
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: V4l2Config,
    selector: CameraSelector,
    state: Option<DeviceState>,
    active_facing: Option<CameraFacing>,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
    outstanding: HashSet<u64>,
    stats: SourceStats,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config, selector: CameraSelector) -> Result<Self> {
        if config.back_device.trim().is_empty() {
            return Err(anyhow!("v4l2 device path must not be empty"));
        }
        if config.output_width == 0 || config.output_height == 0 {
            return Err(anyhow!("v4l2 output size must be non-zero"));
        }
        Ok(Self {
            active_width: config.capture_width,
            active_height: config.capture_height,
            config,
            selector,
            state: None,
            active_facing: None,
            active_format: PixelFormat::Rgb24,
            outstanding: HashSet::new(),
            stats: SourceStats::default(),
            last_frame_at: None,
            last_error: None,
        })
    }

    /// Open the device for the currently selected camera.
    pub fn connect(&mut self) -> Result<()> {
        let facing = self.selector.current();
        self.open(facing)
    }

    fn open(&mut self, facing: CameraFacing) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        // Drop the old stream before opening the next device.
        self.state = None;
        let path = self.config.device_for(facing).to_string();

        let mut device =
            v4l::Device::with_path(&path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.capture_width;
        format.height = self.config.capture_height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB3 on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.active_format = if format.fourcc == v4l::FourCC::new(b"NV12") {
            PixelFormat::Nv12
        } else if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else {
            return Err(anyhow!(
                "v4l2 device {} negotiated unsupported format {}",
                path,
                format.fourcc
            ));
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.active_facing = Some(facing);
        self.last_error = None;

        log::info!(
            "V4l2Source: {:?} camera on {} ({}x{} {:?})",
            facing,
            path,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &str {
        &self.config.back_device
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        if let Some(limit) = self.config.frame_limit {
            if self.stats.frames_captured >= limit {
                return Ok(None);
            }
        }

        let facing = self.selector.current();
        if self.active_facing != Some(facing) {
            if self.active_facing.is_some() {
                self.stats.camera_switches += 1;
            }
            self.open(facing)?;
        }

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let captured = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                anyhow::Error::new(err).context("capture v4l2 frame")
            })?;
        self.last_frame_at = Some(Instant::now());

        let rgb = normalize_to_rgb(
            &captured,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;
        let rgb = resize_rgb_nearest(
            rgb,
            self.active_width,
            self.active_height,
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
                self.config.back_device
            ));
        }
        self.stats.frames_released += 1;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn front_falls_back_to_back_device() {
        let config = V4l2Config::default();
        assert_eq!(config.device_for(CameraFacing::Front), "/dev/video0");

        let config = V4l2Config {
            front_device: Some("/dev/video2".to_string()),
            ..V4l2Config::default()
        };
        assert_eq!(config.device_for(CameraFacing::Front), "/dev/video2");
        assert_eq!(config.device_for(CameraFacing::Back), "/dev/video0");
    }

    #[test]
    fn rejects_empty_device() {
        let config = V4l2Config {
            back_device: " ".to_string(),
            ..V4l2Config::default()
        };
        assert!(V4l2Source::new(config, CameraSelector::default()).is_err());
    }
}
