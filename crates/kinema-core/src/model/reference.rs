//! Deterministic, weight-free model stack.
//!
//! Stands in for the pretrained components behind the same seams the real
//! networks use: an embedder stack over the stock input keys, an analytic
//! v-prediction network that pulls latents toward the concat conditioning
//! with a per-frame drift, and a linear nearest-neighbour decoder. Every op
//! is per-sample deterministic, which the chunked-decode contract relies on.

use burn::tensor::{Tensor, backend::Backend};

use crate::batch::{
    Batch, KEY_COND_AUG, KEY_COND_FRAMES, KEY_COND_FRAMES_WITHOUT_NOISE, KEY_FPS_ID,
    KEY_MOTION_BUCKET_ID,
};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::model::{Conditioner, Conditioning, DenoiserNetwork, FirstStageDecoder, FrameMetadata};

/// Fourier features of a scalar per batch slot, `[n] -> [n, 2 * (dim / 2)]`.
fn sinusoidal_embedding<B: Backend>(x: Tensor<B, 1>, dim: usize) -> Tensor<B, 2> {
    let device = x.device();
    let n = x.dims()[0];
    let half = (dim / 2).max(1);
    let freqs: Vec<f32> = (0..half)
        .map(|i| 10000f32.powf(-(i as f32) / half as f32))
        .collect();
    let freqs = Tensor::<B, 1>::from_floats(freqs.as_slice(), &device).reshape([1, half]);
    let args = x.reshape([n, 1]) * freqs;
    Tensor::cat(vec![args.clone().sin(), args.cos()], 1)
}

pub struct ReferenceConditioner {
    keys: Vec<String>,
    embed_dim: usize,
    vector_dim: usize,
    latent_channels: usize,
    scale_factor: usize,
}

impl ReferenceConditioner {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            keys: config.input_keys(),
            embed_dim: config.embed_dim,
            vector_dim: config.vector_dim,
            latent_channels: config.latent_channels,
            scale_factor: config.scale_factor,
        }
    }
}

impl<B: Backend> Conditioner<B> for ReferenceConditioner {
    fn input_keys(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn embed(&self, batch: &Batch<B>, force_zero: &[&str]) -> Result<Conditioning<B>> {
        let clean = batch.frames(KEY_COND_FRAMES_WITHOUT_NOISE)?;
        let noised = batch.frames(KEY_COND_FRAMES)?;
        let device = clean.device();
        let [b, _, h, w] = clean.dims();
        let f = self.scale_factor;
        if h % f != 0 || w % f != 0 {
            return Err(Error::Shape(format!(
                "conditioning frame {h}x{w} is not divisible by the latent stride {f}"
            )));
        }
        let (lh, lw) = (h / f, w / f);

        // Attention context from the clean frame's luminance summary.
        let crossattn = if force_zero.contains(&KEY_COND_FRAMES_WITHOUT_NOISE) {
            Tensor::zeros([b, 1, 2 * (self.embed_dim / 2)], &device)
        } else {
            let means = clean.clone().reshape([b, 3, h * w]).mean_dim(2).reshape([b, 3]);
            let weights =
                Tensor::<B, 1>::from_floats([0.299, 0.587, 0.114], &device).reshape([1, 3]);
            let luma = (means * weights).sum_dim(1).reshape([b]);
            sinusoidal_embedding(luma, self.embed_dim).unsqueeze_dim::<3>(1)
        };

        // Pseudo first-stage encoding of the augmented frame: block means at
        // the latent stride, extra channels carry the channel mean.
        let concat = if force_zero.contains(&KEY_COND_FRAMES) {
            Tensor::zeros([b, self.latent_channels, lh, lw], &device)
        } else {
            let ds = noised
                .clone()
                .reshape([b, 3, lh, f, lw, f])
                .mean_dim(5)
                .mean_dim(3)
                .reshape([b, 3, lh, lw]);
            if self.latent_channels <= 3 {
                ds.narrow(1, 0, self.latent_channels)
            } else {
                let extra = ds.clone().mean_dim(1);
                let mut parts = vec![ds];
                for _ in 0..self.latent_channels - 3 {
                    parts.push(extra.clone());
                }
                Tensor::cat(parts, 1)
            }
        };

        // Scalar knobs each get a Fourier slice of the vector embedding.
        let dim = (self.vector_dim / 3).max(2);
        let mut parts = Vec::new();
        for key in [KEY_FPS_ID, KEY_MOTION_BUCKET_ID, KEY_COND_AUG] {
            let vals = batch.per_sample(key)?.clone();
            let emb = if force_zero.contains(&key) {
                Tensor::zeros([vals.dims()[0], 2 * (dim / 2)], &device)
            } else {
                sinusoidal_embedding(vals, dim)
            };
            parts.push(emb);
        }
        let vector = Tensor::cat(parts, 1);

        Ok(Conditioning {
            crossattn,
            concat,
            vector,
        })
    }
}

/// Analytic v-prediction network: drifts each frame's latent toward a
/// phase-modulated copy of the concat conditioning.
pub struct ReferenceDenoiserNetwork {
    pub drift: f32,
}

impl Default for ReferenceDenoiserNetwork {
    fn default() -> Self {
        Self { drift: 0.35 }
    }
}

impl<B: Backend> DenoiserNetwork<B> for ReferenceDenoiserNetwork {
    fn forward(
        &self,
        input: Tensor<B, 4>,
        _c_noise: Tensor<B, 1>,
        cond: &Conditioning<B>,
        meta: &FrameMetadata<B>,
    ) -> Result<Tensor<B, 4>> {
        let dims = input.dims();
        if cond.concat.dims() != dims {
            return Err(Error::Shape(format!(
                "concat conditioning {:?} does not match network input {:?}",
                cond.concat.dims(),
                dims
            )));
        }
        let [bt, _, _, _] = dims;
        let device = input.device();
        let t = meta.num_video_frames.max(1);

        let phases: Vec<f32> = (0..bt).map(|i| (i % t) as f32 * self.drift).collect();
        let phase =
            Tensor::<B, 1>::from_floats(phases.as_slice(), &device).reshape([bt, 1, 1, 1]);
        let knob = cond.vector.clone().mean_dim(1).reshape([bt, 1, 1, 1]);
        let ctx = cond.crossattn.clone().mean_dim(2).mean_dim(1).reshape([bt, 1, 1, 1]);

        let target = cond.concat.clone() * phase.cos() + (knob + ctx) * 0.01;
        Ok((target - input) * 0.5)
    }
}

/// Linear nearest-neighbour upsampling decoder.
pub struct ReferenceDecoder {
    pub scale_factor: usize,
}

impl<B: Backend> FirstStageDecoder<B> for ReferenceDecoder {
    fn decode(&self, latents: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let [n, c, h, w] = latents.dims();
        if c < 3 {
            return Err(Error::Shape(format!(
                "decoder expects at least 3 latent channels, got {c}"
            )));
        }
        let f = self.scale_factor;
        let rgb = latents.narrow(1, 0, 3);
        let up = rgb
            .reshape([n, 3, h, 1, w, 1])
            .repeat(&[1, 1, 1, f, 1, f])
            .reshape([n, 3, h * f, w * f]);
        Ok(up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ValueDict, build_batch};
    use std::collections::HashMap;

    type TB = burn_ndarray::NdArray<f32>;
    type Device = <TB as Backend>::Device;

    fn batches(device: &Device) -> (Batch<TB>, Batch<TB>, ReferenceConditioner) {
        let config = ModelConfig::reference_default();
        let conditioner = ReferenceConditioner::new(&config);
        let image = Tensor::<TB, 4>::ones([1, 3, 64, 128], device) * 0.25;
        let dict = ValueDict {
            fps_id: 6.0,
            motion_bucket_id: 127.0,
            cond_aug: 0.02,
            cond_frames: image.clone(),
            cond_frames_without_noise: image,
            extra: HashMap::new(),
        };
        let keys = Conditioner::<TB>::input_keys(&conditioner);
        let (batch, batch_uc) = build_batch(&keys, &dict, (1, 14), 14, device).unwrap();
        (batch, batch_uc, conditioner)
    }

    #[test]
    fn embedding_shapes_follow_config() {
        let device = Default::default();
        let (batch, _, conditioner) = batches(&device);
        let c = conditioner.embed(&batch, &[]).unwrap();
        assert_eq!(c.crossattn.dims(), [1, 1, 1024]);
        assert_eq!(c.concat.dims(), [1, 4, 8, 16]);
        assert_eq!(c.vector.dims(), [14, 768]);
    }

    #[test]
    fn forced_keys_embed_to_exact_zeros() {
        let device = Default::default();
        let (batch, batch_uc, conditioner) = batches(&device);
        let (c, uc) = conditioner
            .unconditional_conditioning(
                &batch,
                &batch_uc,
                &[KEY_COND_FRAMES, KEY_COND_FRAMES_WITHOUT_NOISE],
            )
            .unwrap();

        let zeroed = uc.crossattn.into_data().to_vec::<f32>().unwrap();
        assert!(zeroed.iter().all(|v| *v == 0.0));
        let zeroed = uc.concat.into_data().to_vec::<f32>().unwrap();
        assert!(zeroed.iter().all(|v| *v == 0.0));

        // The conditional side keeps real content.
        let live = c.concat.into_data().to_vec::<f32>().unwrap();
        assert!(live.iter().any(|v| *v != 0.0));
        // The scalar-knob vector is shared between both branches.
        let v = c.vector.into_data().to_vec::<f32>().unwrap();
        let v_uc = uc.vector.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, v_uc);
    }

    #[test]
    fn decoder_upsamples_by_the_latent_stride() {
        let device = Default::default();
        let decoder = ReferenceDecoder { scale_factor: 8 };
        let latents = Tensor::<TB, 4>::ones([2, 4, 8, 16], &device);
        let out = FirstStageDecoder::<TB>::decode(&decoder, latents).unwrap();
        assert_eq!(out.dims(), [2, 3, 64, 128]);
    }

    #[test]
    fn network_output_matches_input_shape() {
        let device = Default::default();
        let network = ReferenceDenoiserNetwork::default();
        let cond = Conditioning::<TB> {
            crossattn: Tensor::ones([4, 1, 16], &device),
            concat: Tensor::ones([4, 4, 8, 8], &device),
            vector: Tensor::ones([4, 6], &device),
        };
        let meta = FrameMetadata {
            image_only_indicator: Tensor::zeros([2, 2], &device),
            num_video_frames: 2,
        };
        let input = Tensor::<TB, 4>::ones([4, 4, 8, 8], &device);
        let c_noise = Tensor::<TB, 1>::from_floats([0.0], &device);
        let out = network.forward(input, c_noise, &cond, &meta).unwrap();
        assert_eq!(out.dims(), [4, 4, 8, 8]);
    }
}
