//! 4×5 affine colour matrices over normalised (R, G, B, A, 1).
//!
//! Rows are output channels; columns 0..4 are the linear weights on the input
//! channels and column 4 is the bias. Channel values live in `[0, 1]`, so a
//! bias of `0.5` shifts a channel by half its range.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const MATRIX_LEN: usize = 20;

const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct ColorMatrix([f32; MATRIX_LEN]);

impl ColorMatrix {
    pub const fn from_array(values: [f32; MATRIX_LEN]) -> Self {
        Self(values)
    }

    /// Build a matrix from an arbitrary slice, rejecting anything but 20 values.
    pub fn from_slice(values: &[f32]) -> Result<Self, Error> {
        let array: [f32; MATRIX_LEN] = values
            .try_into()
            .map_err(|_| Error::InvalidMatrixShape { len: values.len() })?;
        Ok(Self(array))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub const fn identity() -> Self {
        Self([
            1.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    /// `a ∘ b`: the single matrix that applies `b` first, then `a`.
    #[must_use]
    pub fn multiply(a: &Self, b: &Self) -> Self {
        let mut out = [0.0f32; MATRIX_LEN];
        for row in 0..4 {
            for col in 0..5 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += a.0[row * 5 + k] * b.0[k * 5 + col];
                }
                if col == 4 {
                    acc += a.0[row * 5 + 4];
                }
                out[row * 5 + col] = acc;
            }
        }
        Self(out)
    }

    /// Fold matrices listed in application order (first entry applied first).
    #[must_use]
    pub fn compose(steps: &[Self]) -> Self {
        steps
            .iter()
            .fold(Self::identity(), |acc, step| Self::multiply(step, &acc))
    }

    #[must_use]
    pub fn brightness(factor: f32) -> Self {
        Self([
            factor, 0.0, 0.0, 0.0, 0.0, //
            0.0, factor, 0.0, 0.0, 0.0, //
            0.0, 0.0, factor, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    #[must_use]
    pub fn contrast(factor: f32) -> Self {
        let bias = (1.0 - factor) * 0.5;
        Self([
            factor, 0.0, 0.0, 0.0, bias, //
            0.0, factor, 0.0, 0.0, bias, //
            0.0, 0.0, factor, 0.0, bias, //
            0.0, 0.0, 0.0, 1.0, 0.0,
        ])
    }

    #[must_use]
    pub fn saturate(factor: f32) -> Self {
        let s = factor;
        Self([
            LUMA_R + (1.0 - LUMA_R) * s,
            LUMA_G - LUMA_G * s,
            LUMA_B - LUMA_B * s,
            0.0,
            0.0,
            LUMA_R - LUMA_R * s,
            LUMA_G + (1.0 - LUMA_G) * s,
            LUMA_B - LUMA_B * s,
            0.0,
            0.0,
            LUMA_R - LUMA_R * s,
            LUMA_G - LUMA_G * s,
            LUMA_B + (1.0 - LUMA_B) * s,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
        ])
    }

    /// `amount` 0 leaves colour untouched, 1 is full luma grayscale.
    #[must_use]
    pub fn grayscale(amount: f32) -> Self {
        Self::saturate(1.0 - amount)
    }

    #[must_use]
    pub fn sepia(amount: f32) -> Self {
        let inv = 1.0 - amount;
        Self([
            0.393 + 0.607 * inv,
            0.769 - 0.769 * inv,
            0.189 - 0.189 * inv,
            0.0,
            0.0,
            0.349 - 0.349 * inv,
            0.686 + 0.314 * inv,
            0.168 - 0.168 * inv,
            0.0,
            0.0,
            0.272 - 0.272 * inv,
            0.534 - 0.534 * inv,
            0.131 + 0.869 * inv,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
        ])
    }

    #[must_use]
    pub fn hue_rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self([
            LUMA_R + cos * (1.0 - LUMA_R) - sin * LUMA_R,
            LUMA_G - cos * LUMA_G - sin * LUMA_G,
            LUMA_B - cos * LUMA_B + sin * (1.0 - LUMA_B),
            0.0,
            0.0,
            LUMA_R - cos * LUMA_R + sin * 0.143,
            LUMA_G + cos * (1.0 - LUMA_G) + sin * 0.140,
            LUMA_B - cos * LUMA_B - sin * 0.283,
            0.0,
            0.0,
            LUMA_R - cos * LUMA_R - sin * (1.0 - LUMA_R),
            LUMA_G - cos * LUMA_G + sin * LUMA_G,
            LUMA_B + cos * (1.0 - LUMA_B) + sin * LUMA_B,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
        ])
    }

    #[must_use]
    pub fn approx_eq(&self, other: &Self, eps: f32) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= eps)
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::identity(), 1e-6)
    }

    /// Transform one normalised RGBA sample.
    #[must_use]
    pub fn apply_rgba(&self, rgba: [f32; 4]) -> [f32; 4] {
        let m = &self.0;
        let mut out = [0.0f32; 4];
        for (row, value) in out.iter_mut().enumerate() {
            let base = row * 5;
            *value = m[base] * rgba[0]
                + m[base + 1] * rgba[1]
                + m[base + 2] * rgba[2]
                + m[base + 3] * rgba[3]
                + m[base + 4];
        }
        out
    }

    /// Rasterise the matrix into an 8-bit buffer in place.
    pub fn apply_to_image(&self, image: &mut RgbaImage) {
        for pixel in image.pixels_mut() {
            let input = [
                f32::from(pixel[0]) / 255.0,
                f32::from(pixel[1]) / 255.0,
                f32::from(pixel[2]) / 255.0,
                f32::from(pixel[3]) / 255.0,
            ];
            let output = self.apply_rgba(input);
            for (channel, value) in pixel.0.iter_mut().zip(output) {
                *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
}

impl Default for ColorMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl TryFrom<Vec<f32>> for ColorMatrix {
    type Error = Error;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_slice(&values)
    }
}

impl From<ColorMatrix> for Vec<f32> {
    fn from(matrix: ColorMatrix) -> Self {
        matrix.0.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn samples() -> Vec<ColorMatrix> {
        vec![
            ColorMatrix::identity(),
            ColorMatrix::contrast(1.3),
            ColorMatrix::saturate(0.2),
            ColorMatrix::sepia(0.7),
            ColorMatrix::hue_rotate(45.0),
            ColorMatrix::multiply(&ColorMatrix::sepia(1.0), &ColorMatrix::contrast(1.2)),
        ]
    }

    #[test]
    fn rejects_wrong_length() {
        let err = ColorMatrix::from_slice(&[1.0; 19]).unwrap_err();
        assert!(matches!(err, Error::InvalidMatrixShape { len: 19 }));
        assert!(ColorMatrix::from_slice(&[0.0; 21]).is_err());
        assert!(ColorMatrix::from_slice(&[0.0; 20]).is_ok());
    }

    #[test]
    fn composed_filters_keep_twenty_elements() {
        let composed = ColorMatrix::compose(&[
            ColorMatrix::brightness(1.1),
            ColorMatrix::contrast(0.9),
            ColorMatrix::saturate(1.4),
            ColorMatrix::hue_rotate(-30.0),
        ]);
        assert_eq!(composed.as_slice().len(), MATRIX_LEN);
    }

    #[test]
    fn unit_brightness_is_left_identity() {
        for x in samples() {
            let out = ColorMatrix::multiply(&ColorMatrix::brightness(1.0), &x);
            assert!(out.approx_eq(&x, 1e-6), "{out:?} != {x:?}");
        }
    }

    #[test]
    fn neutral_constructors_are_identity() {
        assert!(ColorMatrix::saturate(1.0).is_identity());
        assert!(ColorMatrix::grayscale(0.0).is_identity());
        assert!(ColorMatrix::sepia(0.0).is_identity());
        assert!(ColorMatrix::hue_rotate(0.0).is_identity());
        assert!(ColorMatrix::contrast(1.0).is_identity());
    }

    #[test]
    fn multiply_applies_right_operand_first() {
        // contrast adds a bias; applying brightness afterwards must scale that bias.
        let a = ColorMatrix::brightness(2.0);
        let b = ColorMatrix::contrast(0.5);
        let ab = ColorMatrix::multiply(&a, &b);
        let px = [0.2, 0.4, 0.6, 1.0];
        let sequential = a.apply_rgba(b.apply_rgba(px));
        let combined = ab.apply_rgba(px);
        for (s, c) in sequential.iter().zip(combined.iter()) {
            assert!((s - c).abs() < 1e-6);
        }
        assert!((ab.as_slice()[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn compose_matches_nested_multiply() {
        let sepia = ColorMatrix::sepia(0.8);
        let contrast = ColorMatrix::contrast(1.2);
        let composed = ColorMatrix::compose(&[contrast, sepia]);
        assert!(composed.approx_eq(&ColorMatrix::multiply(&sepia, &contrast), 1e-6));
    }

    #[test]
    fn grayscale_equalizes_channels() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([200, 40, 90, 255]));
        ColorMatrix::grayscale(1.0).apply_to_image(&mut image);
        let p = image.get_pixel(0, 0);
        assert!((i32::from(p[0]) - i32::from(p[1])).abs() <= 1);
        assert!((i32::from(p[1]) - i32::from(p[2])).abs() <= 1);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn extreme_factors_stay_finite_and_clamp() {
        let mut image = RgbaImage::from_pixel(1, 1, Rgba([128, 128, 128, 255]));
        ColorMatrix::brightness(50.0).apply_to_image(&mut image);
        assert_eq!(image.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn serde_roundtrip_validates_length() {
        let json = serde_json::to_string(&ColorMatrix::sepia(1.0)).unwrap();
        let back: ColorMatrix = serde_json::from_str(&json).unwrap();
        assert!(back.approx_eq(&ColorMatrix::sepia(1.0), 1e-6));
        let bad = serde_json::from_str::<ColorMatrix>("[1.0, 0.0]");
        assert!(bad.is_err());
    }
}
