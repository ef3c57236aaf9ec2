use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

/// Size/quality bounds for one exported artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportTarget {
    /// Longest side of the encoded crop.
    pub max_dim: u32,
    /// Longest side the filter bake works at.
    pub bake_max_dim: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl ExportTarget {
    fn validate(&self, section: &str) -> Result<()> {
        ensure!(self.max_dim > 0, "{section}.max-dim must be greater than zero");
        ensure!(
            self.bake_max_dim > 0,
            "{section}.bake-max-dim must be greater than zero"
        );
        ensure!(
            (1..=100).contains(&self.quality),
            "{section}.quality must be within 1-100"
        );
        Ok(())
    }
}

/// Fast, low-resolution artifact produced before the editor unblocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PreviewOptions {
    pub max_dim: u32,
    pub bake_max_dim: u32,
    pub quality: u8,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            max_dim: 1200,
            bake_max_dim: 768,
            quality: 85,
        }
    }
}

impl PreviewOptions {
    pub fn target(&self) -> ExportTarget {
        ExportTarget {
            max_dim: self.max_dim,
            bake_max_dim: self.bake_max_dim,
            quality: self.quality,
        }
    }
}

/// Slow, high-resolution artifact rendered by the background queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PrintOptions {
    pub max_dim: u32,
    pub bake_max_dim: u32,
    pub quality: u8,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            max_dim: 2048,
            bake_max_dim: 3072,
            quality: 92,
        }
    }
}

impl PrintOptions {
    pub fn target(&self) -> ExportTarget {
        ExportTarget {
            max_dim: self.max_dim,
            bake_max_dim: self.bake_max_dim,
            quality: self.quality,
        }
    }
}

/// Bounds and damping for the pan/pinch controller.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GestureOptions {
    /// Upper zoom bound; the lower bound is always 1.0 (cover fit).
    pub max_zoom: f64,
    /// Multiplier on raw pan deltas.
    pub pan_damping: f64,
    /// Multiplier on the pinch scale delta.
    pub pinch_damping: f64,
    /// Duration of the settle animation after a gesture ends.
    #[serde(with = "humantime_serde")]
    pub settle_duration: Duration,
}

impl Default for GestureOptions {
    fn default() -> Self {
        Self {
            max_zoom: 5.0,
            pan_damping: 0.8,
            pinch_damping: 1.0,
            settle_duration: Duration::from_millis(180),
        }
    }
}

impl GestureOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_zoom.is_finite() && self.max_zoom >= 1.0,
            "gesture.max-zoom must be at least 1.0"
        );
        ensure!(
            self.pan_damping > 0.0 && self.pan_damping <= 1.0,
            "gesture.pan-damping must be within (0, 1]"
        );
        ensure!(
            self.pinch_damping > 0.0 && self.pinch_damping.is_finite(),
            "gesture.pinch-damping must be positive"
        );
        Ok(())
    }
}

/// Snapshot polling budget for the render surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BakeOptions {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for BakeOptions {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Idle polling used by the checkout gate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct QueueOptions {
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            ready_timeout: Duration::from_secs(60),
        }
    }
}

/// Local draft persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DraftOptions {
    /// Draft file; `None` disables persistence.
    pub path: Option<PathBuf>,
    /// Quiet period before an edit burst is written.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
    /// Drafts older than this are discarded on load.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for DraftOptions {
    fn default() -> Self {
        Self {
            path: None,
            debounce: Duration::from_millis(500),
            ttl: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }
}

/// Viewport used when the editor is driven headless (CLI, tests).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ViewportOptions {
    pub width: f64,
    pub height: f64,
    /// Inset of the square crop window from the shorter viewport edge.
    pub frame_margin: f64,
}

impl Default for ViewportOptions {
    fn default() -> Self {
        Self {
            width: 1000.0,
            height: 1000.0,
            frame_margin: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Directory receiving working copies, thumbnails and exported artifacts.
    pub output_dir: PathBuf,
    /// Longest side of the interactive working copy.
    pub working_max_dim: u32,
    /// Longest side of the filter-strip thumbnail.
    pub thumbnail_max_dim: u32,
    /// JPEG quality for working and thumbnail copies.
    pub derivative_quality: u8,
    pub viewport: ViewportOptions,
    pub preview: PreviewOptions,
    pub print: PrintOptions,
    pub gesture: GestureOptions,
    pub bake: BakeOptions,
    pub queue: QueueOptions,
    pub draft: DraftOptions,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.working_max_dim > 0,
            "working-max-dim must be greater than zero"
        );
        ensure!(
            self.thumbnail_max_dim > 0,
            "thumbnail-max-dim must be greater than zero"
        );
        ensure!(
            (1..=100).contains(&self.derivative_quality),
            "derivative-quality must be within 1-100"
        );
        ensure!(
            self.viewport.width > 0.0 && self.viewport.height > 0.0,
            "viewport dimensions must be positive"
        );
        ensure!(
            self.viewport.frame_margin >= 0.0
                && self.viewport.frame_margin * 2.0
                    < self.viewport.width.min(self.viewport.height),
            "viewport.frame-margin leaves no room for the crop window"
        );
        self.preview.target().validate("preview")?;
        self.print.target().validate("print")?;
        self.gesture.validate()?;
        ensure!(
            self.bake.max_attempts > 0,
            "bake.max-attempts must be greater than zero"
        );
        ensure!(
            self.queue.poll_interval > Duration::ZERO,
            "queue.poll-interval must be positive"
        );
        ensure!(
            self.queue.ready_timeout >= self.queue.poll_interval,
            "queue.ready-timeout must be at least one poll interval"
        );
        ensure!(
            self.draft.debounce > Duration::ZERO,
            "draft.debounce must be positive"
        );
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("memotile-out"),
            working_max_dim: 1280,
            thumbnail_max_dim: 256,
            derivative_quality: 90,
            viewport: ViewportOptions::default(),
            preview: PreviewOptions::default(),
            print: PrintOptions::default(),
            gesture: GestureOptions::default(),
            bake: BakeOptions::default(),
            queue: QueueOptions::default(),
            draft: DraftOptions::default(),
        }
    }
}
