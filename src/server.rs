use std::net::SocketAddr;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use crate::error::MirrorError;

/// Serve a mirror directory over HTTP until canceled.
pub async fn serve(path: &Path, port: u16, cancel: CancellationToken) -> Result<(), MirrorError> {
    let app = axum::Router::new().fallback_service(ServeDir::new(path));
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    info!(path = %path.display(), address = %format!("http://{addr}"), "serving directory");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
