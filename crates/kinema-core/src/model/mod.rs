//! Model seams and the assembled image-to-video model.
//!
//! The pretrained components (embedder stack, denoising network, first-stage
//! decoder) sit behind traits; what lives here is the numerical glue around
//! them: conditioning assembly, classifier-free guidance batching, and the
//! chunked first-stage decode.

pub mod loader;
pub mod reference;
pub mod sampler;

use burn::tensor::{Tensor, backend::Backend};

use crate::batch::Batch;
use crate::error::Result;
use sampler::EulerEdmSampler;

/// Output of the embedder stack, split by how the network consumes it.
#[derive(Debug, Clone)]
pub struct Conditioning<B: Backend> {
    /// Cross-attention context, `[b, seq, dim]`.
    pub crossattn: Tensor<B, 3>,
    /// Channel-concatenated conditioning, `[b, c, h, w]` at latent resolution.
    pub concat: Tensor<B, 4>,
    /// Pooled scalar-knob embeddings, `[n, dim]`.
    pub vector: Tensor<B, 2>,
}

impl<B: Backend> Conditioning<B> {
    /// Replicate the attention and concat fields across the frame axis,
    /// `b ... -> (b t) ...`. The vector field is already at full width.
    pub fn expand_frames(self, t: usize) -> Self {
        let [b, s, d] = self.crossattn.dims();
        let crossattn = self
            .crossattn
            .unsqueeze_dim::<4>(1)
            .repeat(&[1, t, 1, 1])
            .reshape([b * t, s, d]);
        let [b, c, h, w] = self.concat.dims();
        let concat = self
            .concat
            .unsqueeze_dim::<5>(1)
            .repeat(&[1, t, 1, 1, 1])
            .reshape([b * t, c, h, w]);
        Self {
            crossattn,
            concat,
            vector: self.vector,
        }
    }
}

/// Per-frame metadata forwarded to the network on every evaluation.
#[derive(Debug, Clone)]
pub struct FrameMetadata<B: Backend> {
    /// `[branches, frames]` zero tensor; nonzero marks image-only slots.
    pub image_only_indicator: Tensor<B, 2>,
    pub num_video_frames: usize,
}

/// Embedder stack over the declared input keys.
pub trait Conditioner<B: Backend>: Send + Sync {
    /// Unique input keys the embedders consume.
    fn input_keys(&self) -> Vec<String>;

    /// Embed a batch. Keys listed in `force_zero` contribute their zero
    /// embedding instead of the batch content.
    fn embed(&self, batch: &Batch<B>, force_zero: &[&str]) -> Result<Conditioning<B>>;

    /// Conditional and unconditional conditioning in one call; the
    /// unconditional side zeroes the named keys.
    fn unconditional_conditioning(
        &self,
        batch: &Batch<B>,
        batch_uc: &Batch<B>,
        force_uc_zero: &[&str],
    ) -> Result<(Conditioning<B>, Conditioning<B>)> {
        let c = self.embed(batch, &[])?;
        let uc = self.embed(batch_uc, force_uc_zero)?;
        Ok((c, uc))
    }
}

/// The denoising network. `input` arrives pre-scaled by the sampler's
/// preconditioning; the output is a v-prediction.
pub trait DenoiserNetwork<B: Backend>: Send + Sync {
    fn forward(
        &self,
        input: Tensor<B, 4>,
        c_noise: Tensor<B, 1>,
        cond: &Conditioning<B>,
        meta: &FrameMetadata<B>,
    ) -> Result<Tensor<B, 4>>;
}

/// Latent-to-pixel decoder. Must be per-sample deterministic so chunked
/// decoding is equivalent to a single pass.
pub trait FirstStageDecoder<B: Backend>: Send + Sync {
    fn decode(&self, latents: Tensor<B, 4>) -> Result<Tensor<B, 4>>;
}

/// Assembled model: conditioner, network, sampler and decoder.
pub struct SvdModel<B: Backend> {
    pub conditioner: Box<dyn Conditioner<B>>,
    network: Box<dyn DenoiserNetwork<B>>,
    sampler: EulerEdmSampler,
    first_stage: Box<dyn FirstStageDecoder<B>>,
    pub latent_channels: usize,
    pub scale_factor: usize,
}

impl<B: Backend> core::fmt::Debug for SvdModel<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SvdModel")
            .field("latent_channels", &self.latent_channels)
            .field("scale_factor", &self.scale_factor)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> SvdModel<B> {
    pub fn new(
        conditioner: Box<dyn Conditioner<B>>,
        network: Box<dyn DenoiserNetwork<B>>,
        sampler: EulerEdmSampler,
        first_stage: Box<dyn FirstStageDecoder<B>>,
        latent_channels: usize,
        scale_factor: usize,
    ) -> Self {
        Self {
            conditioner,
            network,
            sampler,
            first_stage,
            latent_channels,
            scale_factor,
        }
    }

    /// Run the sampler from `randn` down to clean latents.
    pub fn sample(
        &self,
        randn: Tensor<B, 4>,
        c: &Conditioning<B>,
        uc: &Conditioning<B>,
        meta: &FrameMetadata<B>,
    ) -> Result<Tensor<B, 4>> {
        self.sampler.sample(self.network.as_ref(), randn, c, uc, meta)
    }

    /// Decode latents to pixel space in chunks of `decoding_t` frames to
    /// bound decoder memory. Chunking never changes the result.
    pub fn decode_first_stage(
        &self,
        latents: Tensor<B, 4>,
        decoding_t: usize,
    ) -> Result<Tensor<B, 4>> {
        let frames = latents.dims()[0];
        let chunk = decoding_t.clamp(1, frames);
        let mut decoded = Vec::new();
        let mut start = 0;
        while start < frames {
            let len = chunk.min(frames - start);
            decoded.push(
                self.first_stage
                    .decode(latents.clone().narrow(0, start, len))?,
            );
            start += len;
        }
        Ok(Tensor::cat(decoded, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::loader;
    use crate::pipeline::NoiseSource;

    type TB = burn_ndarray::NdArray<f32>;

    #[test]
    fn chunked_decode_matches_single_pass() {
        let device = Default::default();
        let config = ModelConfig::reference_default();
        let model = loader::instantiate::<TB>(&config, &device).unwrap();

        let latents = NoiseSource::new(7).normal::<TB, 4>([14, 4, 8, 16], &device);
        let whole = model
            .decode_first_stage(latents.clone(), 14)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let chunked = model
            .decode_first_stage(latents, 1)
            .unwrap()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(whole.len(), chunked.len());
        for (a, b) in whole.iter().zip(chunked.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn decoding_t_zero_is_treated_as_one() {
        let device = Default::default();
        let config = ModelConfig::reference_default();
        let model = loader::instantiate::<TB>(&config, &device).unwrap();
        let latents = Tensor::<TB, 4>::ones([2, 4, 8, 8], &device);
        let out = model.decode_first_stage(latents, 0).unwrap();
        assert_eq!(out.dims(), [2, 3, 64, 64]);
    }

    #[test]
    fn expand_frames_replicates_leading_axis() {
        let device = Default::default();
        let cond = Conditioning::<TB> {
            crossattn: Tensor::ones([1, 1, 16], &device),
            concat: Tensor::ones([1, 4, 8, 8], &device),
            vector: Tensor::ones([14, 32], &device),
        };
        let expanded = cond.expand_frames(14);
        assert_eq!(expanded.crossattn.dims(), [14, 1, 16]);
        assert_eq!(expanded.concat.dims(), [14, 4, 8, 8]);
        assert_eq!(expanded.vector.dims(), [14, 32]);
    }
}
