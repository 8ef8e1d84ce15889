use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub model_config: PathBuf,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let port: u16 = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()?;
        let model_config = env::var("KINEMA_MODEL_CONFIG")
            .unwrap_or_else(|_| "config/svd.json".to_string())
            .into();

        Ok(Self { port, model_config })
    }
}
