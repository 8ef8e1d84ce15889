//! Process-wide model context, built once at startup.

use std::sync::Mutex;

use burn::tensor::backend::Backend;
use tracing::info;

use kinema_core::config::{NUM_FRAMES, NUM_STEPS};
use kinema_core::model::loader;
use kinema_core::{ModelConfig, SvdModel};

use crate::config::Settings;

// Backend selection mirrors the build features: wgpu when the `gpu` feature
// is enabled, ndarray on the CPU otherwise.
#[cfg(feature = "gpu")]
pub type AppBackend = burn_wgpu::Wgpu;
#[cfg(not(feature = "gpu"))]
pub type AppBackend = burn_ndarray::NdArray<f32>;

pub type AppDevice = <AppBackend as Backend>::Device;

#[cfg(feature = "gpu")]
pub fn default_device() -> AppDevice {
    burn_wgpu::WgpuDevice::default()
}

#[cfg(not(feature = "gpu"))]
pub fn default_device() -> AppDevice {
    burn_ndarray::NdArrayDevice::Cpu
}

pub struct Context {
    pub model: SvdModel<AppBackend>,
    pub device: AppDevice,
    pub num_frames: usize,
    pub num_steps: usize,
    pub config: ModelConfig,
    /// One generation at a time; concurrent requests queue here.
    pub gen_lock: Mutex<()>,
}

impl Context {
    pub fn init(settings: &Settings) -> anyhow::Result<Self> {
        let mut config = ModelConfig::load(&settings.model_config)?;
        config.apply_overrides(NUM_STEPS, NUM_FRAMES);

        let device = default_device();
        let model = loader::instantiate::<AppBackend>(&config, &device)?;
        info!(
            "model `{}` ready on {device:?} ({NUM_FRAMES} frames, {NUM_STEPS} steps)",
            config.target
        );

        Ok(Self {
            model,
            device,
            num_frames: NUM_FRAMES,
            num_steps: NUM_STEPS,
            config,
            gen_lock: Mutex::new(()),
        })
    }

    /// Context over an already-loaded config; used by tests.
    pub fn with_config(config: ModelConfig) -> anyhow::Result<Self> {
        let device = default_device();
        let model = loader::instantiate::<AppBackend>(&config, &device)?;
        let num_frames = config.sampler.guider.num_frames;
        let num_steps = config.sampler.num_steps;
        Ok(Self {
            model,
            device,
            num_frames,
            num_steps,
            config,
            gen_lock: Mutex::new(()),
        })
    }
}
