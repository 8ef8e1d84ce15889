//! Per-request generation pipeline.
//!
//! Orchestrates everything between a decoded input image and the decoded
//! frame tensor: normalization, value dictionary, conditioning batches,
//! seeded noise, sampling and the chunked first-stage decode.

use std::collections::HashMap;

use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::DynamicImage;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::batch::{KEY_COND_FRAMES, KEY_COND_FRAMES_WITHOUT_NOISE, ValueDict, build_batch};
use crate::error::Result;
use crate::model::{FrameMetadata, SvdModel};
use crate::preprocess;

/// Request-scoped generation knobs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub fps_id: u32,
    pub motion_bucket_id: u32,
    pub cond_aug: f32,
    pub seed: u64,
    pub decoding_t: usize,
}

/// Deterministic per-request noise. Draw order matters: the conditioning
/// augmentation noise is taken before the latent noise, so a fixed seed
/// reproduces the full generation.
pub struct NoiseSource {
    rng: StdRng,
}

impl NoiseSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn normal<B: Backend, const D: usize>(
        &mut self,
        shape: [usize; D],
        device: &B::Device,
    ) -> Tensor<B, D> {
        let count: usize = shape.iter().product();
        let data: Vec<f32> = (0..count)
            .map(|_| self.rng.sample(StandardNormal))
            .collect();
        Tensor::from_data(TensorData::new(data, shape), device)
    }
}

/// Generate `num_frames` frames conditioned on `image`. Returns a
/// `[frames, 3, H, W]` tensor in [0, 1].
pub fn generate_frames<B: Backend>(
    model: &SvdModel<B>,
    image: DynamicImage,
    params: &GenerationParams,
    num_frames: usize,
    max_dimension: u32,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let rgb = preprocess::normalize_image(image, max_dimension)?;
    let (width, height) = rgb.dimensions();
    info!("conditioning frame resized to {height}x{width}");
    preprocess::advise(width, height, params.motion_bucket_id, params.fps_id);

    let image_tensor = preprocess::to_conditioning_tensor::<B>(&rgb, device);
    let (h, w) = (height as usize, width as usize);

    let mut noise = NoiseSource::new(params.seed);
    let cond_frames =
        image_tensor.clone() + noise.normal::<B, 4>([1, 3, h, w], device) * params.cond_aug;
    let value_dict = ValueDict {
        fps_id: params.fps_id as f32,
        motion_bucket_id: params.motion_bucket_id as f32,
        cond_aug: params.cond_aug,
        cond_frames,
        cond_frames_without_noise: image_tensor,
        extra: HashMap::new(),
    };

    let keys = model.conditioner.input_keys();
    let (batch, batch_uc) = build_batch(&keys, &value_dict, (1, num_frames), num_frames, device)?;
    let (c, uc) = model.conditioner.unconditional_conditioning(
        &batch,
        &batch_uc,
        &[KEY_COND_FRAMES, KEY_COND_FRAMES_WITHOUT_NOISE],
    )?;
    let (c, uc) = (c.expand_frames(num_frames), uc.expand_frames(num_frames));

    let f = model.scale_factor;
    let randn = noise.normal::<B, 4>([num_frames, model.latent_channels, h / f, w / f], device);
    let meta = FrameMetadata {
        image_only_indicator: Tensor::zeros([2, num_frames], device),
        num_video_frames: batch.num_video_frames.unwrap_or(num_frames),
    };

    let samples_z = model.sample(randn, &c, &uc, &meta)?;
    let samples_x = model.decode_first_stage(samples_z, params.decoding_t)?;
    Ok(((samples_x + 1.0) / 2.0).clamp(0.0, 1.0))
}
