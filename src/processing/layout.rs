use super::geometry::Dimensions;

/// Shrink `src` so its longest side is at most `max_side`; never upscales.
pub fn fit_within(src: Dimensions, max_side: u32) -> Dimensions {
    let iw = src.width.max(1) as f32;
    let ih = src.height.max(1) as f32;
    let limit = max_side.max(1) as f32;
    let scale = (limit / iw).min(limit / ih).min(1.0);
    let scale = if scale.is_finite() { scale } else { 1.0 };
    let w = (iw * scale).round().clamp(1.0, limit);
    let h = (ih * scale).round().clamp(1.0, limit);
    Dimensions::new(w as u32, h as u32)
}

/// Whether `src` already satisfies the `max_side` bound.
pub fn within(src: Dimensions, max_side: u32) -> bool {
    src.longest_side() <= max_side
}
