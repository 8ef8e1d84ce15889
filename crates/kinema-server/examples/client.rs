//! Example client for the generation endpoint.
//!
//! Run the server, then:
//!
//! ```bash
//! cargo run --example client                      # bundled default image
//! cargo run --example client -- image.png         # inline bytes
//! cargo run --example client -- https://host/a.png
//! ```

use std::fs;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

fn main() -> anyhow::Result<()> {
    let url = std::env::var("KINEMA_URL").unwrap_or_else(|_| "http://127.0.0.1:8000/".to_string());

    let body = match std::env::args().nth(1) {
        None => json!({}),
        Some(arg) if arg.starts_with("http://") || arg.starts_with("https://") => {
            json!({ "image_url": arg })
        }
        Some(path) => {
            let bytes = fs::read(&path)?;
            json!({ "image_bytes": STANDARD.encode(bytes) })
        }
    };

    println!("POST {url}");
    let response: Value = reqwest::blocking::Client::new()
        .post(&url)
        .json(&body)
        .send()?
        .error_for_status()?
        .json()?;

    let mp4_b64 = response
        .get("mp4_bytes")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("response is missing mp4_bytes"))?;
    let mp4 = STANDARD.decode(mp4_b64)?;
    fs::write("out.mp4", &mp4)?;
    println!("wrote out.mp4 ({} bytes)", mp4.len());
    Ok(())
}
