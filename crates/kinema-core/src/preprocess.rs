//! Geometric normalization of the conditioning image.
//!
//! The model runs on resolutions that are multiples of 64 and was trained at
//! 576x1024. Inputs are uniformly scaled so the larger side lands on the
//! requested maximum dimension, then truncated to the model stride.

use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use log::warn;

use crate::error::{Error, Result};

pub const TRAINED_WIDTH: u32 = 1024;
pub const TRAINED_HEIGHT: u32 = 576;
/// Both output dimensions must divide this.
pub const STRIDE: u32 = 64;

/// Scale to fit `max_dimension` (upscaling small inputs too), then truncate
/// each dimension down to the nearest multiple of the model stride.
pub fn normalize_image(image: DynamicImage, max_dimension: u32) -> Result<RgbImage> {
    let rgb = image.to_rgb8();
    let (w, h) = rgb.dimensions();

    let scale = f64::min(
        max_dimension as f64 / w as f64,
        max_dimension as f64 / h as f64,
    );
    let (sw, sh) = ((w as f64 * scale) as u32, (h as f64 * scale) as u32);
    if sw < STRIDE || sh < STRIDE {
        return Err(Error::Shape(format!(
            "image of {w}x{h} scales to {sw}x{sh}, below the {STRIDE} pixel stride"
        )));
    }
    let mut resized = image::imageops::resize(&rgb, sw, sh, FilterType::CatmullRom);

    let (tw, th) = (sw - sw % STRIDE, sh - sh % STRIDE);
    if (tw, th) != (sw, sh) {
        warn!(
            "image size {sh}x{sw} is not divisible by {STRIDE}, resizing to {th}x{tw}"
        );
        resized = image::imageops::resize(&resized, tw, th, FilterType::CatmullRom);
    }
    Ok(resized)
}

/// Advisory checks only; generation proceeds regardless.
pub fn advise(width: u32, height: u32, motion_bucket_id: u32, fps_id: u32) {
    if (height, width) != (TRAINED_HEIGHT, TRAINED_WIDTH) {
        warn!(
            "conditioning frame is {height}x{width}, not {TRAINED_HEIGHT}x{TRAINED_WIDTH}; \
             the model was only trained at that resolution, consider increasing cond_aug"
        );
    }
    if motion_bucket_id > 255 {
        warn!("high motion bucket ({motion_bucket_id}), output quality may degrade");
    }
    if fps_id < 5 {
        warn!("small fps value ({fps_id}), output quality may degrade");
    }
    if fps_id > 30 {
        warn!("large fps value ({fps_id}), output quality may degrade");
    }
}

/// `[1, 3, H, W]` float tensor scaled to [-1, 1].
pub fn to_conditioning_tensor<B: Backend>(image: &RgbImage, device: &B::Device) -> Tensor<B, 4> {
    let (w, h) = image.dimensions();
    let (w, h) = (w as usize, h as usize);
    let plane = w * h;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, px) in image.enumerate_pixels() {
        let idx = y as usize * w + x as usize;
        for c in 0..3 {
            data[c * plane + idx] = px.0[c] as f32 / 255.0 * 2.0 - 1.0;
        }
    }
    Tensor::from_data(TensorData::new(data, [1, 3, h, w]), device)
}
