//! Input image resolution.
//!
//! A request can carry the image inline (base64), point at a URL, or carry
//! nothing at all, in which case the bundled default asset is used. Inline
//! bytes win over a URL when both are present.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::DynamicImage;
use log::info;

use crate::error::Result;

/// Bundled fallback image, used when a request names no source.
pub static DEFAULT_IMAGE: &[u8] = include_bytes!("../assets/test_image.png");

#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Url(String),
    Default,
}

impl ImageSource {
    /// Pick the source for a request. Base64 payloads are decoded eagerly so
    /// malformed input fails before any work is done.
    pub fn from_request(image_bytes: Option<&str>, image_url: Option<&str>) -> Result<Self> {
        if let Some(b64) = image_bytes {
            Ok(Self::Bytes(STANDARD.decode(b64)?))
        } else if let Some(url) = image_url {
            Ok(Self::Url(url.to_string()))
        } else {
            Ok(Self::Default)
        }
    }

    /// Fetch and decode the image. A URL fetch that does not return a
    /// success status is an error; the default asset is never substituted.
    pub fn resolve(self) -> Result<DynamicImage> {
        let bytes = match self {
            Self::Bytes(bytes) => bytes,
            Self::Url(url) => {
                let response = reqwest::blocking::get(&url)?.error_for_status()?;
                response.bytes()?.to_vec()
            }
            Self::Default => {
                info!("no image supplied, using bundled default");
                DEFAULT_IMAGE.to_vec()
            }
        };
        Ok(image::load_from_memory(&bytes)?)
    }
}
