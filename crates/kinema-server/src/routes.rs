use std::sync::Arc;

use axum::Router;
use axum::routing::post;

use crate::context::Context;

mod generate;

pub use generate::generate;

pub fn api_routes() -> Router<Arc<Context>> {
    Router::new().route("/", post(generate))
}
