//! Declarative model configuration.
//!
//! The model stack is described by a JSON file (embedder keys, sampler and
//! guider settings) and instantiated through [`crate::model::loader`]. The
//! server applies its startup overrides (step count, frame count) on top of
//! the loaded file, so the file stays deployment-independent.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Generation constants matching the deployed model card.
pub const NUM_FRAMES: usize = 14;
pub const NUM_STEPS: usize = 25;
pub const DEFAULT_FPS_ID: u32 = 6;
pub const DEFAULT_MOTION_BUCKET_ID: u32 = 127;
pub const DEFAULT_COND_AUG: f32 = 0.02;
/// Seed used when a request does not carry one.
pub const DEFAULT_SEED: u64 = 23;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which model stack to instantiate, e.g. `"reference"`.
    pub target: String,
    #[serde(default = "default_latent_channels")]
    pub latent_channels: usize,
    /// Spatial stride between pixel space and latent space.
    #[serde(default = "default_scale_factor")]
    pub scale_factor: usize,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    pub embedders: Vec<EmbedderConfig>,
    pub sampler: SamplerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub input_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub num_steps: usize,
    pub discretization: DiscretizationConfig,
    pub guider: GuiderConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DiscretizationConfig {
    #[serde(default = "default_sigma_min")]
    pub sigma_min: f64,
    #[serde(default = "default_sigma_max")]
    pub sigma_max: f64,
    #[serde(default = "default_rho")]
    pub rho: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GuiderConfig {
    pub min_scale: f64,
    pub max_scale: f64,
    pub num_frames: usize,
}

fn default_latent_channels() -> usize {
    4
}

fn default_scale_factor() -> usize {
    8
}

fn default_embed_dim() -> usize {
    1024
}

fn default_vector_dim() -> usize {
    768
}

fn default_sigma_min() -> f64 {
    0.002
}

fn default_sigma_max() -> f64 {
    700.0
}

fn default_rho() -> f64 {
    7.0
}

impl ModelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Startup override knobs: sampler step count and guider frame count.
    pub fn apply_overrides(&mut self, num_steps: usize, num_frames: usize) {
        self.sampler.num_steps = num_steps;
        self.sampler.guider.num_frames = num_frames;
    }

    /// The reference stack with the stock SVD embedder keys. Used as the
    /// shipped default config and by the test suite.
    pub fn reference_default() -> Self {
        let keys = [
            "fps_id",
            "motion_bucket_id",
            "cond_aug",
            "cond_frames",
            "cond_frames_without_noise",
        ];
        Self {
            target: "reference".to_string(),
            latent_channels: default_latent_channels(),
            scale_factor: default_scale_factor(),
            embed_dim: default_embed_dim(),
            vector_dim: default_vector_dim(),
            embedders: keys
                .iter()
                .map(|k| EmbedderConfig {
                    input_key: k.to_string(),
                })
                .collect(),
            sampler: SamplerConfig {
                num_steps: NUM_STEPS,
                discretization: DiscretizationConfig {
                    sigma_min: default_sigma_min(),
                    sigma_max: default_sigma_max(),
                    rho: default_rho(),
                },
                guider: GuiderConfig {
                    min_scale: 1.0,
                    max_scale: 2.5,
                    num_frames: NUM_FRAMES,
                },
            },
        }
    }

    /// Embedder input keys, deduplicated but in declaration order.
    pub fn input_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for emb in &self.embedders {
            if !keys.contains(&emb.input_key) {
                keys.push(emb.input_key.clone());
            }
        }
        keys
    }
}
