use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::info;

use kinema_core::config::{DEFAULT_COND_AUG, DEFAULT_FPS_ID, DEFAULT_MOTION_BUCKET_ID, DEFAULT_SEED};
use kinema_core::input::ImageSource;
use kinema_core::{GenerationParams, pipeline, video};

use crate::context::Context;
use crate::error::AppError;
use crate::schemas::{GenerateRequest, GenerateResponse};

/// POST `/` — one still image in, one MP4 clip out.
pub async fn generate(
    State(context): State<Arc<Context>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let response = tokio::task::spawn_blocking(move || run_generation(&context, request))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok(Json(response))
}

fn run_generation(
    context: &Context,
    request: GenerateRequest,
) -> Result<GenerateResponse, AppError> {
    // Everything below blocks; the whole generation runs one at a time.
    let _guard = context
        .gen_lock
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let source = ImageSource::from_request(
        request.image_bytes.as_deref(),
        request.image_url.as_deref(),
    )?;
    let image = source.resolve()?;

    let params = GenerationParams {
        fps_id: DEFAULT_FPS_ID,
        motion_bucket_id: DEFAULT_MOTION_BUCKET_ID,
        cond_aug: DEFAULT_COND_AUG,
        seed: request.seed.unwrap_or(DEFAULT_SEED),
        decoding_t: request.decoding_t,
    };
    info!(
        "generating {} frames (seed {}, decoding_t {})",
        context.num_frames, params.seed, params.decoding_t
    );

    let frames = pipeline::generate_frames(
        &context.model,
        image,
        &params,
        context.num_frames,
        request.max_dimension,
        &context.device,
    )?;
    let mp4 = video::encode_mp4(frames, params.fps_id + 1)?;

    Ok(GenerateResponse {
        mp4_bytes: STANDARD.encode(mp4),
    })
}
