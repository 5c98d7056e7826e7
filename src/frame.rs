//! Frame ownership layer.
//!
//! - `Frame`: Opaque image buffer plus dimensions. Pixels are private.
//! - `FrameView`: Read-only view handed to pose models for one inference call.
//! - `FrameLease`: Scoped ownership of an in-flight frame. Guarantees the frame goes
//!   back to its source exactly once, on every exit path.
//!
//! A frame that is dropped without passing through `FrameSource::release` leaks
//! whatever the source holds for it (mapped buffers, pool slots), so the pump never
//! touches a bare `Frame` outside a lease.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};
use zeroize::Zeroize;

use crate::ingest::{CameraFacing, FrameSource};

/// Bytes per pixel for packed RGB frames.
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame: Opaque image container
// ----------------------------------------------------------------------------

/// Opaque RGB frame. There is no `Clone` and no owned byte export.
///
/// Pixel bytes are not reachable from outside the crate:
///
/// ```compile_fail
/// use pose_overlay::{CameraFacing, Frame};
///
/// let frame = Frame::new(vec![0u8; 3], 1, 1, 1, CameraFacing::Back).unwrap();
/// let _bytes = frame.data;
/// ```
///
/// and a frame cannot be duplicated to dodge release:
///
/// ```compile_fail
/// use pose_overlay::{CameraFacing, Frame};
///
/// let frame = Frame::new(vec![0u8; 3], 1, 1, 1, CameraFacing::Back).unwrap();
/// let _copy = frame.clone();
/// ```
pub struct Frame {
    /// Packed RGB24 pixel data, row-major.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Source-assigned sequence number, unique per source.
    pub sequence: u64,

    /// Camera the frame was captured from.
    pub facing: CameraFacing,

    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB pixels. The buffer length must match the dimensions.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
        facing: CameraFacing,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame length mismatch: expected {} RGB bytes for {}x{}, got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            facing,
            captured_at: Instant::now(),
        })
    }

    /// Read-only view for inference.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }

    /// Time since capture.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("facing", &self.facing)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// FrameView: What models receive
// ----------------------------------------------------------------------------

/// Borrowed view of a frame. The borrow ends before the frame is released, so a
/// model cannot hold on to pixels across calls.
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    pub fn facing(&self) -> CameraFacing {
        self.frame.facing
    }

    /// Packed RGB24 pixels.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }
}

// ----------------------------------------------------------------------------
// FrameLease: Scoped release
// ----------------------------------------------------------------------------

/// An in-flight frame bound to the source that must take it back.
///
/// Call [`FrameLease::release`] on the normal path so release errors propagate.
/// If the lease is dropped instead (unwinding), the frame is still released and a
/// failure is logged.
pub struct FrameLease<'a> {
    source: &'a mut dyn FrameSource,
    frame: Option<Frame>,
}

impl<'a> FrameLease<'a> {
    pub fn new(source: &'a mut dyn FrameSource, frame: Frame) -> Self {
        Self {
            source,
            frame: Some(frame),
        }
    }

    pub fn frame(&self) -> &Frame {
        // Only `release` and `drop` take the frame, and both consume the lease.
        match &self.frame {
            Some(frame) => frame,
            None => unreachable!("frame lease accessed after release"),
        }
    }

    /// Hand the frame back to its source.
    pub fn release(mut self) -> Result<()> {
        match self.frame.take() {
            Some(frame) => self.source.release(frame),
            None => Ok(()),
        }
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            let sequence = frame.sequence;
            if let Err(err) = self.source.release(frame) {
                log::error!(
                    "frame {} release failed during unwind on {}: {:#}",
                    sequence,
                    self.source.name(),
                    err
                );
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
