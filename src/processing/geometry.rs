//! Crop geometry: map an on-screen pan/zoom back onto image pixels.
//!
//! The crop window (`FrameRect`) sits inside a viewport (`container`). The
//! displayed image is cover-fitted to the frame at `scale == 1`, centered in
//! the viewport, then translated and scaled by the live [`Transform`]. The
//! solver inverts that placement to find which square of the displayed image
//! is under the frame and, optionally, rescales it onto a larger original.
//!
//! All pixel coordinates are floored. A value within `1e-6` of an integer is
//! snapped to it first so float noise from rescaling never costs a pixel.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

const SNAP_EPSILON: f64 = 1e-6;

/// Natural pixel size of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    #[must_use]
    pub fn longest_side(&self) -> u32 {
        self.width.max(self.height)
    }
}

/// Viewport size in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Crop window inside the viewport, recomputed only on layout changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FrameRect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Largest square centered in `container`, inset by `margin` on each side.
    #[must_use]
    pub fn centered_square(container: Size, margin: f64) -> Self {
        let side = (container.width.min(container.height) - 2.0 * margin).max(0.0);
        Self {
            x: (container.width - side) / 2.0,
            y: (container.height - side) / 2.0,
            width: side,
            height: side,
        }
    }

    fn is_usable(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }
}

/// Live gesture state relative to the cover-fit base size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub scale: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl Transform {
    pub const fn new(scale: f64, translate_x: f64, translate_y: f64) -> Self {
        Self {
            scale,
            translate_x,
            translate_y,
        }
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.scale.is_finite() && self.translate_x.is_finite() && self.translate_y.is_finite()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}

/// Square pixel rectangle on a concrete image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Whether the rectangle is square, non-empty and inside `bounds`.
    #[must_use]
    pub fn fits(&self, bounds: Dimensions) -> bool {
        self.width == self.height
            && self.width >= 1
            && u64::from(self.x) + u64::from(self.width) <= u64::from(bounds.width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(bounds.height)
    }
}

/// Everything the solver needs from the interactive view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropView {
    pub container: Size,
    pub frame: FrameRect,
    pub transform: Transform,
}

/// Cover scale: the smallest uniform scale at which `image` fills `frame`.
#[must_use]
pub fn cover_scale(image: Dimensions, frame_width: f64, frame_height: f64) -> f64 {
    let w = f64::from(image.width.max(1));
    let h = f64::from(image.height.max(1));
    (frame_width / w).max(frame_height / h)
}

/// Rendered size of `image` at `scale == 1`.
#[must_use]
pub fn cover_base_size(image: Dimensions, frame_width: f64, frame_height: f64) -> (f64, f64) {
    let base = cover_scale(image, frame_width, frame_height);
    (
        f64::from(image.width.max(1)) * base,
        f64::from(image.height.max(1)) * base,
    )
}

/// Solve the square crop under the frame.
///
/// `displayed` is the image actually rendered in the view (the working copy).
/// `target` is the image the rectangle is expressed on: pass `displayed` again
/// for the UI-space rect, or the original's dimensions for the source-space
/// rect. The result is clamped against `target` independently.
pub fn solve_crop(
    view: &CropView,
    displayed: Dimensions,
    target: Dimensions,
) -> Result<CropRect, Error> {
    if !displayed.is_valid() || !target.is_valid() {
        return Err(Error::GeometryInvalid(format!(
            "image dimensions must be positive (displayed {}x{}, target {}x{})",
            displayed.width, displayed.height, target.width, target.height
        )));
    }
    if !view.frame.is_usable() || !view.transform.is_finite() || view.transform.scale <= 0.0 {
        return Err(Error::GeometryInvalid(format!(
            "degenerate view: {view:?}"
        )));
    }

    let dw = f64::from(displayed.width);
    let dh = f64::from(displayed.height);
    let rendered_scale =
        cover_scale(displayed, view.frame.width, view.frame.height) * view.transform.scale;
    if !rendered_scale.is_finite() || rendered_scale <= 0.0 {
        return Err(Error::GeometryInvalid(format!(
            "rendered scale {rendered_scale} is unusable"
        )));
    }

    let rendered_w = dw * rendered_scale;
    let rendered_h = dh * rendered_scale;
    let image_left = (view.container.width - rendered_w) / 2.0 + view.transform.translate_x;
    let image_top = (view.container.height - rendered_h) / 2.0 + view.transform.translate_y;

    let sx = (view.frame.x - image_left) / rendered_scale;
    let sy = (view.frame.y - image_top) / rendered_scale;
    let size = view.frame.width / rendered_scale;

    let rx = f64::from(target.width) / dw;
    let ry = f64::from(target.height) / dh;
    sanitize(sx * rx, sy * ry, (size * rx).min(size * ry), target)
}

/// Floor and clamp a candidate square into `bounds`.
pub fn sanitize(x: f64, y: f64, size: f64, bounds: Dimensions) -> Result<CropRect, Error> {
    if !(x.is_finite() && y.is_finite() && size.is_finite()) {
        return Err(Error::GeometryInvalid(format!(
            "non-finite crop candidate ({x}, {y}, {size})"
        )));
    }
    if !bounds.is_valid() {
        return Err(Error::GeometryInvalid("empty bounds".into()));
    }
    let bw = f64::from(bounds.width);
    let bh = f64::from(bounds.height);

    let x = floor_px(x).clamp(0.0, bw - 1.0);
    let y = floor_px(y).clamp(0.0, bh - 1.0);
    let size = floor_px(size).min(bw - x).min(bh - y).floor().max(1.0);

    let rect = CropRect {
        x: x as u32,
        y: y as u32,
        width: size as u32,
        height: size as u32,
    };
    if rect.width == 0 {
        return Err(Error::GeometryInvalid("crop collapsed to zero".into()));
    }
    Ok(rect)
}

/// Centered square covering the shorter side; 1×1 at the origin for invalid input.
#[must_use]
pub fn default_crop(bounds: Dimensions) -> CropRect {
    if !bounds.is_valid() {
        return CropRect {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        };
    }
    let side = bounds.width.min(bounds.height);
    CropRect {
        x: (bounds.width - side) / 2,
        y: (bounds.height - side) / 2,
        width: side,
        height: side,
    }
}

/// [`solve_crop`], falling back to [`default_crop`] on invalid geometry.
#[must_use]
pub fn crop_or_default(view: &CropView, displayed: Dimensions, target: Dimensions) -> CropRect {
    match solve_crop(view, displayed, target) {
        Ok(rect) => rect,
        Err(err) => {
            warn!(error = %err, "crop geometry invalid; using centered default");
            default_crop(target)
        }
    }
}

fn floor_px(value: f64) -> f64 {
    let nearest = value.round();
    if (value - nearest).abs() < SNAP_EPSILON {
        nearest
    } else {
        value.floor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_view(transform: Transform) -> CropView {
        CropView {
            container: Size::new(1000.0, 1000.0),
            frame: FrameRect::new(0.0, 0.0, 1000.0, 1000.0),
            transform,
        }
    }

    #[test]
    fn floor_px_snaps_noise_only() {
        assert_eq!(floor_px(499.999_999_9), 500.0);
        assert_eq!(floor_px(499.6), 499.0);
        assert_eq!(floor_px(-0.3), -1.0);
    }

    #[test]
    fn sanitize_keeps_rect_inside_bounds() {
        let bounds = Dimensions::new(100, 80);
        let rect = sanitize(90.7, 75.2, 50.0, bounds).unwrap();
        assert_eq!(rect, CropRect { x: 90, y: 75, width: 5, height: 5 });
        assert!(rect.fits(bounds));

        let rect = sanitize(-20.0, -5.0, 500.0, bounds).unwrap();
        assert_eq!(rect, CropRect { x: 0, y: 0, width: 80, height: 80 });
    }

    #[test]
    fn sanitize_enforces_minimum_size() {
        let rect = sanitize(99.0, 79.0, 0.2, Dimensions::new(100, 80)).unwrap();
        assert_eq!(rect.width, 1);
        assert!(rect.fits(Dimensions::new(100, 80)));
    }

    #[test]
    fn sanitize_rejects_non_finite() {
        assert!(sanitize(f64::NAN, 0.0, 10.0, Dimensions::new(10, 10)).is_err());
        assert!(sanitize(0.0, 0.0, f64::INFINITY, Dimensions::new(10, 10)).is_err());
    }

    #[test]
    fn default_crop_is_centered_square() {
        assert_eq!(
            default_crop(Dimensions::new(4000, 3000)),
            CropRect { x: 500, y: 0, width: 3000, height: 3000 }
        );
        assert_eq!(
            default_crop(Dimensions::new(0, 3000)),
            CropRect { x: 0, y: 0, width: 1, height: 1 }
        );
    }

    #[test]
    fn rejects_degenerate_views() {
        let dims = Dimensions::new(400, 300);
        let mut view = square_view(Transform::default());
        view.transform.scale = 0.0;
        assert!(solve_crop(&view, dims, dims).is_err());

        let mut view = square_view(Transform::default());
        view.frame.width = 0.0;
        assert!(solve_crop(&view, dims, dims).is_err());

        let view = square_view(Transform::new(1.0, f64::NAN, 0.0));
        assert!(solve_crop(&view, dims, dims).is_err());

        assert!(solve_crop(&square_view(Transform::default()), Dimensions::new(0, 0), dims).is_err());
    }

    #[test]
    fn crop_or_default_falls_back() {
        let dims = Dimensions::new(400, 300);
        let view = square_view(Transform::new(f64::INFINITY, 0.0, 0.0));
        assert_eq!(crop_or_default(&view, dims, dims), default_crop(dims));
    }

    #[test]
    fn pan_moves_crop_opposite_to_image() {
        let dims = Dimensions::new(4000, 3000);
        // Dragging the image right by 100 layout px reveals more of its left side.
        let rect = solve_crop(&square_view(Transform::new(1.0, 100.0, 0.0)), dims, dims).unwrap();
        assert_eq!(rect, CropRect { x: 200, y: 0, width: 3000, height: 3000 });
    }
}
