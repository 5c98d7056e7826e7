//! Overlay output.
//!
//! The mapper produces `Overlay` values; sinks receive them. `SharedOverlay` keeps
//! the latest one for whatever draws the preview, and `SvgDumpSink` writes SVG
//! snapshots for headless runs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::mapper::DisplayPoint;

/// Marker appearance. Policy only; mapping never depends on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerStyle {
    pub radius: f32,
    pub stroke_width: f32,
    pub fill: String,
    pub stroke: String,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            radius: 4.0,
            stroke_width: 2.0,
            fill: "#00AA00".to_string(),
            stroke: "white".to_string(),
        }
    }
}

/// One keypoint marker in display space.
#[derive(Clone, Debug, PartialEq)]
pub struct Marker {
    /// Stable per-keypoint key, `skeletonkp_<name>`.
    pub key: String,
    pub center: DisplayPoint,
}

/// Everything drawn for one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    /// Sequence of the frame the overlay was computed from.
    pub frame_sequence: u64,
    pub markers: Vec<Marker>,
}

impl Overlay {
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Render path for overlays.
pub trait OverlaySink: Send {
    /// Replace the current overlay. Called every tick, including empty ticks.
    fn publish(&mut self, overlay: Overlay);

    /// Present the preview frame together with the current overlay.
    fn refresh(&mut self) -> Result<()>;
}

// ----------------------------------------------------------------------------
// SharedOverlay
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct OverlayState {
    latest: Overlay,
    publishes: u64,
    refreshes: u64,
}

/// Latest-overlay slot shared between the pump and a renderer.
#[derive(Clone, Debug, Default)]
pub struct SharedOverlay {
    state: Arc<Mutex<OverlayState>>,
}

impl SharedOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Overlay {
        self.lock().latest.clone()
    }

    pub fn publishes(&self) -> u64 {
        self.lock().publishes
    }

    pub fn refreshes(&self) -> u64 {
        self.lock().refreshes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OverlayState> {
        // A panic while holding this lock cannot leave the overlay half-written.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OverlaySink for SharedOverlay {
    fn publish(&mut self, overlay: Overlay) {
        let mut state = self.lock();
        state.latest = overlay;
        state.publishes += 1;
    }

    fn refresh(&mut self) -> Result<()> {
        self.lock().refreshes += 1;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// SVG rendering
// ----------------------------------------------------------------------------

/// Render an overlay as a standalone SVG document sized to the display.
pub fn render_svg(
    overlay: &Overlay,
    width: f32,
    height: f32,
    style: &MarkerStyle,
) -> Result<String> {
    let mut svg = String::new();
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    )?;
    for marker in &overlay.markers {
        writeln!(
            svg,
            r#"  <circle id="{}" cx="{:.2}" cy="{:.2}" r="{}" stroke-width="{}" fill="{}" stroke="{}"/>"#,
            marker.key,
            marker.center.x,
            marker.center.y,
            style.radius,
            style.stroke_width,
            style.fill,
            style.stroke
        )?;
    }
    svg.push_str("</svg>\n");
    Ok(svg)
}

/// Writes every `every_n`th refreshed overlay to `dir` as SVG, and mirrors the
/// latest overlay into a `SharedOverlay`.
pub struct SvgDumpSink {
    dir: PathBuf,
    width: f32,
    height: f32,
    style: MarkerStyle,
    every_n: u64,
    shared: SharedOverlay,
    refreshes: u64,
}

impl SvgDumpSink {
    pub fn new(
        dir: impl Into<PathBuf>,
        width: f32,
        height: f32,
        style: MarkerStyle,
        every_n: u64,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create overlay dump directory {}", dir.display()))?;
        Ok(Self {
            dir,
            width,
            height,
            style,
            every_n: every_n.max(1),
            shared: SharedOverlay::new(),
            refreshes: 0,
        })
    }

    pub fn shared(&self) -> SharedOverlay {
        self.shared.clone()
    }
}

impl OverlaySink for SvgDumpSink {
    fn publish(&mut self, overlay: Overlay) {
        self.shared.publish(overlay);
    }

    fn refresh(&mut self) -> Result<()> {
        self.shared.refresh()?;
        self.refreshes += 1;
        if (self.refreshes - 1) % self.every_n != 0 {
            return Ok(());
        }
        let overlay = self.shared.latest();
        let path = self
            .dir
            .join(format!("overlay_{:06}.svg", overlay.frame_sequence));
        let svg = render_svg(&overlay, self.width, self.height, &self.style)?;
        std::fs::write(&path, svg)
            .with_context(|| format!("write overlay {}", path.display()))?;
        log::debug!("wrote overlay {}", path.display());
        Ok(())
    }
}
