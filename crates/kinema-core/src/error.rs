use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid base64 image payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("failed to fetch image: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("conditioner requires key `{0}` but the value dictionary does not provide it")]
    MissingConditioningKey(String),

    #[error("model config error: {0}")]
    Config(String),

    #[error("unexpected tensor shape: {0}")]
    Shape(String),

    #[error("video encoding failed: {0}")]
    VideoEncode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
