//! End-to-end handler tests over the reference model stack.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use kinema_core::ModelConfig;
use kinema_server::context::Context;
use kinema_server::routes::generate;
use kinema_server::schemas::GenerateRequest;

fn test_context(num_steps: usize, num_frames: usize) -> Arc<Context> {
    let mut config = ModelConfig::reference_default();
    config.apply_overrides(num_steps, num_frames);
    Arc::new(Context::with_config(config).unwrap())
}

fn empty_request() -> GenerateRequest {
    serde_json::from_str("{}").unwrap()
}

#[tokio::test]
async fn default_image_yields_a_clip() {
    let context = test_context(3, 4);
    let mut request = empty_request();
    request.seed = Some(23);
    request.max_dimension = 256;

    let Json(response) = generate(State(context), Json(request)).await.unwrap();
    assert!(!response.mp4_bytes.is_empty());

    let bytes = STANDARD.decode(&response.mp4_bytes).unwrap();
    assert!(bytes.len() > 100);
    assert_eq!(&bytes[4..8], b"ftyp");
}

#[tokio::test]
async fn fixed_seed_is_reproducible() {
    let context = test_context(2, 2);
    let mut request = empty_request();
    request.seed = Some(23);
    request.max_dimension = 128;

    let Json(a) = generate(State(context.clone()), Json(request.clone()))
        .await
        .unwrap();
    let Json(b) = generate(State(context), Json(request)).await.unwrap();
    assert_eq!(a.mp4_bytes, b.mp4_bytes);
}

#[tokio::test]
async fn decoding_chunk_size_does_not_change_the_clip() {
    let context = test_context(2, 4);
    let mut chunked = empty_request();
    chunked.seed = Some(7);
    chunked.max_dimension = 128;
    chunked.decoding_t = 1;
    let mut whole = chunked.clone();
    whole.decoding_t = 4;

    let Json(a) = generate(State(context.clone()), Json(chunked)).await.unwrap();
    let Json(b) = generate(State(context), Json(whole)).await.unwrap();
    assert_eq!(a.mp4_bytes, b.mp4_bytes);
}

#[tokio::test]
async fn inline_bytes_beat_the_default_asset() {
    let context = test_context(2, 2);

    let img = image::RgbImage::from_pixel(200, 200, image::Rgb([250, 10, 10]));
    let mut png = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();

    let mut request = empty_request();
    request.seed = Some(23);
    request.max_dimension = 128;
    request.image_bytes = Some(STANDARD.encode(png.into_inner()));

    let Json(response) = generate(State(context), Json(request)).await.unwrap();
    let bytes = STANDARD.decode(&response.mp4_bytes).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
}

#[tokio::test]
async fn unreachable_url_fails_the_request() {
    let context = test_context(2, 2);
    let mut request = empty_request();
    request.image_url = Some("http://127.0.0.1:1/missing.png".to_string());

    let result = generate(State(context), Json(request)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn malformed_base64_fails_the_request() {
    let context = test_context(2, 2);
    let mut request = empty_request();
    request.image_bytes = Some("@@not-base64@@".to_string());

    let result = generate(State(context), Json(request)).await;
    assert!(result.is_err());
}
