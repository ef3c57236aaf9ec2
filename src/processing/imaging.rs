//! Blocking pixel I/O: decode, crop, resize and encode.
//!
//! Callers on the async side wrap these in `spawn_blocking`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, RgbaImage};
use tracing::debug;

use super::geometry::{CropRect, Dimensions};
use super::layout::fit_within;

// Decodes an image to RGBA8 and applies EXIF orientation if available.
pub fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    let img = img.to_rgba8();
    let orientation = read_orientation(path).unwrap_or(1);
    Ok(apply_orientation(img, orientation))
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    use image::imageops::{flip_horizontal, flip_vertical, rotate90, rotate180, rotate270};
    match orientation {
        2 => flip_horizontal(&img),
        3 => rotate180(&img),
        4 => flip_vertical(&img),
        5 => flip_horizontal(&rotate90(&img)),
        6 => rotate90(&img),
        7 => flip_horizontal(&rotate270(&img)),
        8 => rotate270(&img),
        _ => img,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {} for {}", o, path.display());
    Some(o)
}

/// Natural dimensions as displayed, i.e. after EXIF orientation.
pub fn identify(path: &Path) -> Result<Dimensions> {
    let (w, h) = image::image_dimensions(path)
        .with_context(|| format!("failed to read dimensions of {}", path.display()))?;
    let dims = match read_orientation(path) {
        Some(5..=8) => Dimensions::new(h, w),
        _ => Dimensions::new(w, h),
    };
    Ok(dims)
}

pub fn dimensions_of(image: &RgbaImage) -> Dimensions {
    Dimensions::new(image.width(), image.height())
}

/// Copy out `rect`; the rectangle must already be clamped to the image.
pub fn crop(image: &RgbaImage, rect: CropRect) -> Result<RgbaImage> {
    if !rect.fits(dimensions_of(image)) {
        anyhow::bail!(
            "crop {:?} exceeds image {}x{}",
            rect,
            image.width(),
            image.height()
        );
    }
    Ok(image::imageops::crop_imm(image, rect.x, rect.y, rect.width, rect.height).to_image())
}

pub fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resize failed")?;
    let buffer = dst_image.into_vec();
    RgbaImage::from_raw(target_w, target_h, buffer)
        .ok_or_else(|| anyhow!("failed to construct resized RGBA image"))
}

/// Downscale so the longest side is at most `max_side`; smaller images pass through.
pub fn downscale_to(image: RgbaImage, max_side: u32) -> Result<RgbaImage> {
    let dims = dimensions_of(&image);
    let target = fit_within(dims, max_side);
    if target == dims {
        return Ok(image);
    }
    resize_rgba(&image, target.width, target.height)
}

/// Encode as baseline JPEG; alpha is dropped.
pub fn encode_jpeg(image: &RgbaImage, path: &Path, quality: u8) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), quality.clamp(1, 100));
    encoder
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(())
}

/// Decode `source`, shrink to `max_side`, and write it to `dest`.
pub fn write_derivative(source: &Path, dest: &Path, max_side: u32, quality: u8) -> Result<Dimensions> {
    let image = decode_rgba8_apply_exif(source)?;
    let image = downscale_to(image, max_side)?;
    encode_jpeg(&image, dest, quality)?;
    Ok(dimensions_of(&image))
}

/// Crop `rect` out of `source`, shrink to `max_side`, and encode to `dest`.
pub fn export_crop(
    source: &Path,
    rect: CropRect,
    dest: &Path,
    max_side: u32,
    quality: u8,
) -> Result<Dimensions> {
    let image = decode_rgba8_apply_exif(source)?;
    let cropped = crop(&image, rect)?;
    let out = downscale_to(cropped, max_side)?;
    encode_jpeg(&out, dest, quality)?;
    Ok(dimensions_of(&out))
}
