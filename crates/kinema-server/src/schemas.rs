use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Frames decoded per first-stage chunk; lower to reduce memory.
    #[serde(default = "default_decoding_t")]
    pub decoding_t: usize,
    /// Largest side of the conditioning frame after resizing.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Base64-encoded image; wins over `image_url` when both are set.
    #[serde(default)]
    pub image_bytes: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

fn default_decoding_t() -> usize {
    1
}

fn default_max_dimension() -> u32 {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Base64-encoded MP4.
    pub mp4_bytes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_an_empty_request() {
        let req: GenerateRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.decoding_t, 1);
        assert_eq!(req.max_dimension, 1024);
        assert!(req.seed.is_none());
        assert!(req.image_bytes.is_none());
        assert!(req.image_url.is_none());
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let req: GenerateRequest =
            serde_json::from_str(r#"{"decoding_t": 7, "seed": 5, "image_url": "http://x/y.png"}"#)
                .unwrap();
        assert_eq!(req.decoding_t, 7);
        assert_eq!(req.seed, Some(5));
        assert_eq!(req.image_url.as_deref(), Some("http://x/y.png"));
    }
}
