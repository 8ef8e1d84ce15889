//! Conditioning batch construction.
//!
//! The conditioner declares which input keys it wants; the value dictionary
//! carries the per-request values. Scalar knobs are broadcast across the
//! batch width, conditioning frames are replicated across the leading batch
//! dimension, and everything else passes through untouched.

use std::collections::HashMap;

use burn::tensor::{Tensor, backend::Backend};

use crate::error::{Error, Result};

pub const KEY_FPS_ID: &str = "fps_id";
pub const KEY_MOTION_BUCKET_ID: &str = "motion_bucket_id";
pub const KEY_COND_AUG: &str = "cond_aug";
pub const KEY_COND_FRAMES: &str = "cond_frames";
pub const KEY_COND_FRAMES_WITHOUT_NOISE: &str = "cond_frames_without_noise";

/// One entry in a conditioning batch.
#[derive(Debug, Clone)]
pub enum BatchValue<B: Backend> {
    /// One scalar per batch slot, shape `[n]`.
    PerSample(Tensor<B, 1>),
    /// Image-like conditioning, shape `[b, c, h, w]`.
    Frames(Tensor<B, 4>),
}

/// Per-request values feeding the conditioner.
#[derive(Debug, Clone)]
pub struct ValueDict<B: Backend> {
    pub fps_id: f32,
    pub motion_bucket_id: f32,
    pub cond_aug: f32,
    /// Conditioning image with augmentation noise added.
    pub cond_frames: Tensor<B, 4>,
    pub cond_frames_without_noise: Tensor<B, 4>,
    /// Passthrough values for any further embedder keys.
    pub extra: HashMap<String, BatchValue<B>>,
}

#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    values: HashMap<String, BatchValue<B>>,
    /// Set on the conditional batch only.
    pub num_video_frames: Option<usize>,
}

impl<B: Backend> Batch<B> {
    pub fn get(&self, key: &str) -> Result<&BatchValue<B>> {
        self.values
            .get(key)
            .ok_or_else(|| Error::MissingConditioningKey(key.to_string()))
    }

    pub fn frames(&self, key: &str) -> Result<&Tensor<B, 4>> {
        match self.get(key)? {
            BatchValue::Frames(t) => Ok(t),
            BatchValue::PerSample(_) => Err(Error::Shape(format!(
                "batch key `{key}` holds per-sample scalars, expected frames"
            ))),
        }
    }

    pub fn per_sample(&self, key: &str) -> Result<&Tensor<B, 1>> {
        match self.get(key)? {
            BatchValue::PerSample(t) => Ok(t),
            BatchValue::Frames(_) => Err(Error::Shape(format!(
                "batch key `{key}` holds frames, expected per-sample scalars"
            ))),
        }
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Build the conditional and unconditional batches for the given embedder
/// keys. `n` is `(batch, frames)`; scalar knobs broadcast to `n.0 * n.1`
/// slots, frame entries replicate across `n.0`. The unconditional batch is a
/// clone of every tensor entry and carries no frame-count metadata.
pub fn build_batch<B: Backend>(
    keys: &[String],
    value_dict: &ValueDict<B>,
    n: (usize, usize),
    num_video_frames: usize,
    device: &B::Device,
) -> Result<(Batch<B>, Batch<B>)> {
    let width = n.0 * n.1;
    let mut values = HashMap::new();
    for key in keys {
        let entry = match key.as_str() {
            KEY_FPS_ID => broadcast(value_dict.fps_id, width, device),
            KEY_MOTION_BUCKET_ID => broadcast(value_dict.motion_bucket_id, width, device),
            KEY_COND_AUG => broadcast(value_dict.cond_aug, width, device),
            KEY_COND_FRAMES => {
                BatchValue::Frames(value_dict.cond_frames.clone().repeat(&[n.0, 1, 1, 1]))
            }
            KEY_COND_FRAMES_WITHOUT_NOISE => BatchValue::Frames(
                value_dict
                    .cond_frames_without_noise
                    .clone()
                    .repeat(&[n.0, 1, 1, 1]),
            ),
            other => value_dict
                .extra
                .get(other)
                .cloned()
                .ok_or_else(|| Error::MissingConditioningKey(other.to_string()))?,
        };
        values.insert(key.clone(), entry);
    }

    let batch_uc = Batch {
        values: values.clone(),
        num_video_frames: None,
    };
    let batch = Batch {
        values,
        num_video_frames: Some(num_video_frames),
    };
    Ok((batch, batch_uc))
}

fn broadcast<B: Backend>(value: f32, width: usize, device: &B::Device) -> BatchValue<B> {
    BatchValue::PerSample(Tensor::<B, 1>::from_floats([value], device).repeat(&[width]))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TB = burn_ndarray::NdArray<f32>;

    fn value_dict(device: &<TB as Backend>::Device) -> ValueDict<TB> {
        let image = Tensor::<TB, 4>::ones([1, 3, 64, 64], device);
        ValueDict {
            fps_id: 6.0,
            motion_bucket_id: 127.0,
            cond_aug: 0.02,
            cond_frames: image.clone() * 0.5,
            cond_frames_without_noise: image,
            extra: HashMap::new(),
        }
    }

    fn stock_keys() -> Vec<String> {
        [
            KEY_FPS_ID,
            KEY_MOTION_BUCKET_ID,
            KEY_COND_AUG,
            KEY_COND_FRAMES,
            KEY_COND_FRAMES_WITHOUT_NOISE,
        ]
        .iter()
        .map(|k| k.to_string())
        .collect()
    }

    #[test]
    fn conditional_and_unconditional_share_keys() {
        let device = Default::default();
        let (batch, batch_uc) =
            build_batch(&stock_keys(), &value_dict(&device), (1, 14), 14, &device).unwrap();
        assert_eq!(batch.keys(), batch_uc.keys());
        assert_eq!(batch.num_video_frames, Some(14));
        assert_eq!(batch_uc.num_video_frames, None);
    }

    #[test]
    fn scalars_broadcast_to_batch_width() {
        let device = Default::default();
        let (batch, _) =
            build_batch(&stock_keys(), &value_dict(&device), (1, 14), 14, &device).unwrap();
        let fps = batch.per_sample(KEY_FPS_ID).unwrap();
        assert_eq!(fps.dims(), [14]);
        let data = fps.clone().into_data().to_vec::<f32>().unwrap();
        assert!(data.iter().all(|v| (v - 6.0).abs() < 1e-6));
    }

    #[test]
    fn frames_replicate_leading_dimension() {
        let device = Default::default();
        let (batch, _) =
            build_batch(&stock_keys(), &value_dict(&device), (2, 7), 7, &device).unwrap();
        assert_eq!(batch.frames(KEY_COND_FRAMES).unwrap().dims(), [2, 3, 64, 64]);
        assert_eq!(batch.per_sample(KEY_COND_AUG).unwrap().dims(), [14]);
    }

    #[test]
    fn unknown_key_without_passthrough_is_an_error() {
        let device = Default::default();
        let mut keys = stock_keys();
        keys.push("polar_angle".to_string());
        let err = build_batch(&keys, &value_dict(&device), (1, 14), 14, &device).unwrap_err();
        assert!(matches!(err, Error::MissingConditioningKey(k) if k == "polar_angle"));
    }

    #[test]
    fn passthrough_keys_survive_unchanged() {
        let device = Default::default();
        let mut dict = value_dict(&device);
        dict.extra.insert(
            "polar_angle".to_string(),
            BatchValue::PerSample(Tensor::<TB, 1>::from_floats([0.25], &device)),
        );
        let mut keys = stock_keys();
        keys.push("polar_angle".to_string());
        let (batch, _) = build_batch(&keys, &dict, (1, 14), 14, &device).unwrap();
        assert_eq!(batch.per_sample("polar_angle").unwrap().dims(), [1]);
    }
}
