//! Per-frame crop and resize
//!
//! Geometry is computed by pure functions ([`crop_rect`], [`fit_within`]) and
//! then applied to the decoded image. Crop always runs before resize, and
//! neither step ever makes an image larger.

use crate::capture::Dimensions;
use image::imageops::FilterType;
use image::DynamicImage;

/// Pixel rectangle inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// Centered crop window for a `width`×`height` frame
///
/// Returns `None` when the spec is unset or the frame already fits, in which
/// case the frame passes through unchanged.
pub fn crop_rect(width: u32, height: u32, spec: Dimensions) -> Option<Rect> {
    if !spec.is_set() {
        return None;
    }

    let target_w = if spec.width > 0 {
        spec.width.min(width)
    } else {
        width
    };
    let target_h = if spec.height > 0 {
        spec.height.min(height)
    } else {
        height
    };

    if target_w == width && target_h == height {
        return None;
    }

    Some(Rect {
        x: (width - target_w) / 2,
        y: (height - target_h) / 2,
        width: target_w,
        height: target_h,
    })
}

/// Size that fits `width`×`height` inside `spec` without upscaling
///
/// A zero spec dimension leaves that axis unconstrained. Returns `None` when
/// no scaling is needed.
pub fn fit_within(width: u32, height: u32, spec: Dimensions) -> Option<(u32, u32)> {
    if !spec.is_set() || width == 0 || height == 0 {
        return None;
    }

    let scale_w = if spec.width > 0 {
        spec.width as f64 / width as f64
    } else {
        f64::INFINITY
    };
    let scale_h = if spec.height > 0 {
        spec.height as f64 / height as f64
    } else {
        f64::INFINITY
    };
    let scale = scale_w.min(scale_h);

    if scale >= 1.0 {
        return None;
    }

    let new_w = ((width as f64 * scale).round() as u32).clamp(1, width);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, height);
    Some((new_w, new_h))
}

/// Apply crop then resize to a decoded frame
pub fn process_frame(image: DynamicImage, crop: Dimensions, resize: Dimensions) -> DynamicImage {
    let image = match crop_rect(image.width(), image.height(), crop) {
        Some(rect) => image.crop_imm(rect.x, rect.y, rect.width, rect.height),
        None => image,
    };

    match fit_within(image.width(), image.height(), resize) {
        Some((w, h)) => image.resize_exact(w, h, FilterType::Lanczos3),
        None => image,
    }
}
