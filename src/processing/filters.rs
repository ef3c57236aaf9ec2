//! Named filter presets offered in the editor's filter strip.
//!
//! Each preset is a [`ColorMatrix`] plus an optional flat overlay tint. The
//! overlay is composited after the matrix, over the whole tile.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use super::color_matrix::ColorMatrix;

pub const ORIGINAL: &str = "original";

/// Flat colour laid over the baked image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub color: [u8; 3],
    pub opacity: f32,
}

/// The matrix/overlay pair persisted alongside an edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    pub matrix: ColorMatrix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_color: Option<[u8; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay_opacity: Option<f32>,
}

impl FilterParams {
    pub fn new(matrix: ColorMatrix, overlay: Option<Overlay>) -> Self {
        Self {
            matrix,
            overlay_color: overlay.map(|o| o.color),
            overlay_opacity: overlay.map(|o| o.opacity),
        }
    }

    /// Overlay if both halves are present and the tint is visible.
    pub fn overlay(&self) -> Option<Overlay> {
        let color = self.overlay_color?;
        let opacity = self.overlay_opacity?.clamp(0.0, 1.0);
        (opacity > f32::EPSILON).then_some(Overlay { color, opacity })
    }

    /// No rasterisation needed: identity matrix and no visible overlay.
    pub fn is_noop(&self) -> bool {
        self.matrix.is_identity() && self.overlay().is_none()
    }
}

impl Default for FilterParams {
    fn default() -> Self {
        Self::new(ColorMatrix::identity(), None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPreset {
    pub id: &'static str,
    pub label: &'static str,
    pub params: FilterParams,
}

/// All presets in strip order.
pub fn catalog() -> Vec<FilterPreset> {
    vec![
        FilterPreset {
            id: ORIGINAL,
            label: "Original",
            params: FilterParams::default(),
        },
        FilterPreset {
            id: "bw",
            label: "B&W",
            params: FilterParams::new(
                ColorMatrix::compose(&[ColorMatrix::grayscale(1.0), ColorMatrix::contrast(1.1)]),
                None,
            ),
        },
        FilterPreset {
            id: "vintage",
            label: "Vintage",
            params: FilterParams::new(
                ColorMatrix::multiply(&ColorMatrix::sepia(0.6), &ColorMatrix::contrast(1.1)),
                Some(Overlay {
                    color: [255, 236, 200],
                    opacity: 0.08,
                }),
            ),
        },
        FilterPreset {
            id: "warm",
            label: "Warm",
            params: FilterParams::new(
                ColorMatrix::compose(&[ColorMatrix::saturate(1.15), ColorMatrix::hue_rotate(-8.0)]),
                Some(Overlay {
                    color: [255, 170, 80],
                    opacity: 0.10,
                }),
            ),
        },
        FilterPreset {
            id: "cool",
            label: "Cool",
            params: FilterParams::new(
                ColorMatrix::compose(&[ColorMatrix::saturate(0.9), ColorMatrix::hue_rotate(10.0)]),
                Some(Overlay {
                    color: [90, 150, 255],
                    opacity: 0.10,
                }),
            ),
        },
        FilterPreset {
            id: "vivid",
            label: "Vivid",
            params: FilterParams::new(
                ColorMatrix::compose(&[ColorMatrix::contrast(1.15), ColorMatrix::saturate(1.4)]),
                None,
            ),
        },
        FilterPreset {
            id: "fade",
            label: "Fade",
            params: FilterParams::new(
                ColorMatrix::compose(&[
                    ColorMatrix::contrast(0.85),
                    ColorMatrix::brightness(1.05),
                    ColorMatrix::saturate(0.8),
                ]),
                None,
            ),
        },
    ]
}

pub fn lookup(id: &str) -> Option<FilterPreset> {
    catalog().into_iter().find(|preset| preset.id == id)
}

/// Parameters for `id`, falling back to the unfiltered original.
pub fn params_for(id: &str) -> FilterParams {
    lookup(id).map(|preset| preset.params).unwrap_or_default()
}

/// Rasterise `params` into `image` in place.
pub fn apply_filter(image: &mut RgbaImage, params: &FilterParams) {
    if image.width() == 0 || image.height() == 0 {
        return;
    }
    if !params.matrix.is_identity() {
        params.matrix.apply_to_image(image);
    }
    if let Some(overlay) = params.overlay() {
        apply_overlay(image, overlay);
    }
}

fn apply_overlay(image: &mut RgbaImage, overlay: Overlay) {
    let tint = overlay.color.map(|c| f32::from(c) / 255.0);
    for pixel in image.pixels_mut() {
        let (rgb, alpha) = pixel_to_rgb_alpha(pixel);
        let mixed = mix_rgb(rgb, tint, overlay.opacity);
        *pixel = rgb_alpha_to_pixel(mixed, alpha);
    }
}

fn pixel_to_rgb_alpha(pixel: &Rgba<u8>) -> ([f32; 3], f32) {
    let r = (pixel[0] as f32) / 255.0;
    let g = (pixel[1] as f32) / 255.0;
    let b = (pixel[2] as f32) / 255.0;
    let a = (pixel[3] as f32) / 255.0;
    ([r, g, b], a)
}

fn rgb_alpha_to_pixel(rgb: [f32; 3], alpha: f32) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for (i, channel) in rgb.iter().enumerate() {
        out[i] = (channel.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    }
    out[3] = (alpha.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    Rgba(out)
}

fn mix_rgb(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    let t = t.clamp(0.0, 1.0);
    [
        lerp(a[0], b[0], t),
        lerp(a[1], b[1], t),
        lerp(a[2], b[2], t),
    ]
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_original_is_noop() {
        let presets = catalog();
        let mut ids: Vec<_> = presets.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), presets.len());
        assert!(params_for(ORIGINAL).is_noop());
        for preset in presets.iter().filter(|p| p.id != ORIGINAL) {
            assert!(!preset.params.is_noop(), "{} should bake", preset.id);
        }
    }

    #[test]
    fn unknown_id_falls_back_to_original() {
        assert!(lookup("does-not-exist").is_none());
        assert!(params_for("does-not-exist").is_noop());
    }

    #[test]
    fn invisible_overlay_is_ignored() {
        let params = FilterParams::new(
            ColorMatrix::identity(),
            Some(Overlay {
                color: [255, 0, 0],
                opacity: 0.0,
            }),
        );
        assert!(params.is_noop());
        assert!(params.overlay().is_none());
    }

    #[test]
    fn overlay_tints_toward_color() {
        let mut image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let params = FilterParams::new(
            ColorMatrix::identity(),
            Some(Overlay {
                color: [255, 255, 255],
                opacity: 0.5,
            }),
        );
        apply_filter(&mut image, &params);
        assert_eq!(image.get_pixel(1, 1).0, [128, 128, 128, 255]);
    }

    #[test]
    fn params_serialize_in_camel_case() {
        let json = serde_json::to_value(params_for("warm")).unwrap();
        assert_eq!(json["matrix"].as_array().unwrap().len(), 20);
        assert!(json.get("overlayColor").is_some());
        assert!(json.get("overlayOpacity").is_some());
        let plain = serde_json::to_value(params_for("bw")).unwrap();
        assert!(plain.get("overlayColor").is_none());
    }
}
