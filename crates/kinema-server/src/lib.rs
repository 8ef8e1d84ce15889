pub mod config;
pub mod context;
pub mod error;
pub mod routes;
pub mod schemas;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Settings;
use crate::context::Context;

pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let context = Arc::new(Context::init(&settings)?);
    let app = routes::api_routes().with_state(context);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    info!("listening on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
