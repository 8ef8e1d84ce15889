//! Config-driven model instantiation.

use burn::tensor::backend::Backend;
use log::info;

use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::model::SvdModel;
use crate::model::reference::{ReferenceConditioner, ReferenceDecoder, ReferenceDenoiserNetwork};
use crate::model::sampler::EulerEdmSampler;

/// Build the model stack named by `config.target`.
pub fn instantiate<B: Backend>(config: &ModelConfig, _device: &B::Device) -> Result<SvdModel<B>> {
    match config.target.as_str() {
        "reference" => {
            info!(
                "instantiating reference model stack ({} steps, {} frames)",
                config.sampler.num_steps, config.sampler.guider.num_frames
            );
            Ok(SvdModel::new(
                Box::new(ReferenceConditioner::new(config)),
                Box::new(ReferenceDenoiserNetwork::default()),
                EulerEdmSampler::from_config(&config.sampler),
                Box::new(ReferenceDecoder {
                    scale_factor: config.scale_factor,
                }),
                config.latent_channels,
                config.scale_factor,
            ))
        }
        other => Err(Error::Config(format!("unknown model target `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn_ndarray::NdArray<f32>;

    #[test]
    fn reference_target_instantiates() {
        let device = Default::default();
        let model = instantiate::<TB>(&ModelConfig::reference_default(), &device).unwrap();
        assert_eq!(model.latent_channels, 4);
        assert_eq!(model.scale_factor, 8);
    }

    #[test]
    fn unknown_target_is_a_config_error() {
        let device = Default::default();
        let mut config = ModelConfig::reference_default();
        config.target = "svd_xt".to_string();
        let err = instantiate::<TB>(&config, &device).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
