//! MP4 encoding of decoded frame tensors.
//!
//! Frames arrive as a `[t, 3, h, w]` tensor in [0, 1] and leave as the bytes
//! of an H.264 MP4 written to a per-request temp file at `fps` frames per
//! second.

use std::sync::OnceLock;

use burn::tensor::{Tensor, backend::Backend};
use log::info;
use ndarray::Array3;
use video_rs::encode::{Encoder, Settings};
use video_rs::location::Location;
use video_rs::time::Time;

use crate::error::{Error, Result};
use crate::watermark;

fn ensure_init() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| video_rs::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(Error::VideoEncode)
}

/// Encode frames into an MP4 container and return its bytes.
pub fn encode_mp4<B: Backend>(frames: Tensor<B, 4>, fps: u32) -> Result<Vec<u8>> {
    ensure_init()?;

    let [t, c, h, w] = frames.dims();
    if c != 3 {
        return Err(Error::Shape(format!("expected 3 color channels, got {c}")));
    }
    let data = frames
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| Error::Shape(format!("{e:?}")))?;

    // t c h w -> per-frame h w c, 8-bit.
    let plane = h * w;
    let mut frames8 = Vec::with_capacity(t);
    for f in 0..t {
        let mut buf = vec![0u8; plane * 3];
        for ch in 0..3 {
            let base = (f * 3 + ch) * plane;
            for i in 0..plane {
                buf[i * 3 + ch] = (data[base + i] * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
        frames8.push(buf);
    }
    watermark::embed(&mut frames8);

    let file = tempfile::Builder::new()
        .prefix("kinema-out-")
        .suffix(".mp4")
        .tempfile()?;
    let path = file.path().to_path_buf();

    let settings = Settings::preset_h264_yuv420p(w as _, h as _, false);
    let mut encoder = Encoder::new(Location::File(path.clone()), settings)
        .map_err(|e| Error::VideoEncode(e.to_string()))?;

    let duration = Time::from_nth_of_a_second(fps as usize);
    let mut position = Time::zero();
    for buf in frames8 {
        let frame = Array3::from_shape_vec((h, w, 3), buf)
            .map_err(|e| Error::Shape(e.to_string()))?;
        encoder
            .encode(&frame, position)
            .map_err(|e| Error::VideoEncode(e.to_string()))?;
        position = position.aligned_with(duration).add();
    }
    encoder
        .finish()
        .map_err(|e| Error::VideoEncode(e.to_string()))?;

    let bytes = std::fs::read(&path)?;
    info!("encoded {t} frames at {fps} fps ({} bytes)", bytes.len());
    Ok(bytes)
}
