//! Edge file service: hands out files from one directory by bare name.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::EdgeConfig;
use crate::error::{AppError, Result};

#[derive(Clone)]
struct EdgeState {
    root: Arc<PathBuf>,
}

pub fn router(root: PathBuf) -> Router {
    let state = EdgeState {
        root: Arc::new(root),
    };
    Router::new()
        .route("/files/{name}", get(fetch_file))
        .route("/hls/{name}", get(fetch_file))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A bare file name: no separators, no parent references.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && !name.contains(['/', '\\']) && !name.contains("..")
}

async fn fetch_file(
    State(state): State<EdgeState>,
    Path(name): Path<String>,
    request: Request<Body>,
) -> Response {
    if !is_plain_name(&name) {
        debug!(name = %name, "Rejected file name");
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.root.join(&name);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return StatusCode::NOT_FOUND.into_response(),
    }

    match ServeFile::new(path).try_call(request).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            warn!(name = %name, error = %e, "Failed to serve file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    config: &EdgeConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let root = tokio::fs::canonicalize(&config.root).await?;
    let listener = TcpListener::bind(config.bind).await?;
    info!(root = %root.display(), "Edge file service listening on http://{}", config.bind);

    axum::serve(listener, router(root))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Edge file service shutting down...");
        })
        .await
        .map_err(|e| AppError::Server(format!("Server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn get_status_and_body(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("seg1.ts"), b"segment one").unwrap();
        std::fs::write(dir.path().join("index.m3u8"), b"#EXTM3U\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn serves_files_by_name() {
        let dir = fixture();

        let (status, body) =
            get_status_and_body(router(dir.path().to_path_buf()), "/files/seg1.ts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"segment one");

        let (status, body) =
            get_status_and_body(router(dir.path().to_path_buf()), "/hls/index.m3u8").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"#EXTM3U\n");
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        let dir = fixture();
        let (status, _) =
            get_status_and_body(router(dir.path().to_path_buf()), "/files/seg9.ts").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_is_not_found() {
        let dir = fixture();
        let served = dir.path().join("served");
        std::fs::create_dir(&served).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        for uri in ["/files/..%2Fsecret.txt", "/files/%2E%2E", "/hls/sub%5Csecret.txt"] {
            let (status, _) = get_status_and_body(router(served.clone()), uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[test]
    fn plain_names() {
        assert!(is_plain_name("seg1.ts"));
        assert!(!is_plain_name(""));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b.ts"));
        assert!(!is_plain_name("a\\b.ts"));
    }
}
