//! Euler EDM sampling with frame-ramped classifier-free guidance.

use burn::tensor::{Tensor, backend::Backend};
use log::debug;

use crate::config::SamplerConfig;
use crate::error::Result;
use crate::model::{Conditioning, DenoiserNetwork, FrameMetadata};

/// Karras-style noise schedule.
#[derive(Debug, Clone, Copy)]
pub struct EdmDiscretization {
    pub sigma_min: f64,
    pub sigma_max: f64,
    pub rho: f64,
}

impl EdmDiscretization {
    /// `n` sigmas from `sigma_max` down to `sigma_min`, plus a trailing zero.
    pub fn sigmas(&self, n: usize) -> Vec<f64> {
        let min_inv = self.sigma_min.powf(1.0 / self.rho);
        let max_inv = self.sigma_max.powf(1.0 / self.rho);
        let mut sigmas: Vec<f64> = (0..n)
            .map(|i| {
                let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                (max_inv + t * (min_inv - max_inv)).powf(self.rho)
            })
            .collect();
        sigmas.push(0.0);
        sigmas
    }
}

/// Guidance scale ramping linearly from `min_scale` on the first frame to
/// `max_scale` on the last.
#[derive(Debug, Clone, Copy)]
pub struct LinearPredictionGuider {
    pub min_scale: f64,
    pub max_scale: f64,
    pub num_frames: usize,
}

impl LinearPredictionGuider {
    /// Combine a stacked `[uncond; cond]` prediction into a guided one.
    pub fn combine<B: Backend>(&self, denoised: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = denoised.device();
        let t = self.num_frames;
        let uncond = denoised.clone().narrow(0, 0, t);
        let cond = denoised.narrow(0, t, t);

        let scales: Vec<f32> = (0..t)
            .map(|i| {
                let r = if t > 1 { i as f64 / (t - 1) as f64 } else { 0.0 };
                (self.min_scale + (self.max_scale - self.min_scale) * r) as f32
            })
            .collect();
        let scale = Tensor::<B, 1>::from_floats(scales.as_slice(), &device).reshape([t, 1, 1, 1]);

        uncond.clone() + (cond - uncond) * scale
    }
}

/// v-prediction preconditioning around the raw network.
fn scalings(sigma: f64) -> (f64, f64, f64, f64) {
    let c_skip = 1.0 / (sigma * sigma + 1.0);
    let c_out = -sigma / (sigma * sigma + 1.0).sqrt();
    let c_in = 1.0 / (sigma * sigma + 1.0).sqrt();
    let c_noise = 0.25 * sigma.ln();
    (c_skip, c_out, c_in, c_noise)
}

pub struct EulerEdmSampler {
    pub num_steps: usize,
    pub discretization: EdmDiscretization,
    pub guider: LinearPredictionGuider,
}

impl EulerEdmSampler {
    pub fn from_config(config: &SamplerConfig) -> Self {
        Self {
            num_steps: config.num_steps,
            discretization: EdmDiscretization {
                sigma_min: config.discretization.sigma_min,
                sigma_max: config.discretization.sigma_max,
                rho: config.discretization.rho,
            },
            guider: LinearPredictionGuider {
                min_scale: config.guider.min_scale,
                max_scale: config.guider.max_scale,
                num_frames: config.guider.num_frames,
            },
        }
    }

    /// One denoiser evaluation: both guidance branches are stacked along the
    /// leading axis and run through the network in a single pass.
    fn denoise<B: Backend>(
        &self,
        network: &dyn DenoiserNetwork<B>,
        x: &Tensor<B, 4>,
        sigma: f64,
        c: &Conditioning<B>,
        uc: &Conditioning<B>,
        meta: &FrameMetadata<B>,
    ) -> Result<Tensor<B, 4>> {
        let device = x.device();
        let input = Tensor::cat(vec![x.clone(), x.clone()], 0);
        let cond = Conditioning {
            crossattn: Tensor::cat(vec![uc.crossattn.clone(), c.crossattn.clone()], 0),
            concat: Tensor::cat(vec![uc.concat.clone(), c.concat.clone()], 0),
            vector: Tensor::cat(vec![uc.vector.clone(), c.vector.clone()], 0),
        };

        let (c_skip, c_out, c_in, c_noise) = scalings(sigma);
        let c_noise = Tensor::<B, 1>::from_floats([c_noise as f32], &device);
        let out = network.forward(input.clone() * c_in, c_noise, &cond, meta)?;
        let denoised = out * c_out + input * c_skip;

        Ok(self.guider.combine(denoised))
    }

    /// Euler integration of the probability-flow ODE from `randn`.
    pub fn sample<B: Backend>(
        &self,
        network: &dyn DenoiserNetwork<B>,
        randn: Tensor<B, 4>,
        c: &Conditioning<B>,
        uc: &Conditioning<B>,
        meta: &FrameMetadata<B>,
    ) -> Result<Tensor<B, 4>> {
        let sigmas = self.discretization.sigmas(self.num_steps);
        let mut x = randn * (1.0 + sigmas[0] * sigmas[0]).sqrt();

        for i in 0..self.num_steps {
            let sigma = sigmas[i];
            let sigma_next = sigmas[i + 1];

            let denoised = self.denoise(network, &x, sigma, c, uc, meta)?;
            let d = (x.clone() - denoised) / sigma;
            x = x + d * (sigma_next - sigma);

            debug!("sampler step {}/{}, sigma {sigma:.4}", i + 1, self.num_steps);
        }
        Ok(x)
    }
}
