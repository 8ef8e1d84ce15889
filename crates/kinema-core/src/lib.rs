pub mod batch;
pub mod config;
pub mod error;
pub mod input;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod video;
mod watermark;

pub use config::ModelConfig;
pub use error::{Error, Result};
pub use model::SvdModel;
pub use pipeline::GenerationParams;
