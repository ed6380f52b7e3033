use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;
use std::sync::Arc;

/// Serve the browser client from `dir`; unknown paths fall back to `index.html`.
pub fn create_static_router(dir: &Path) -> Router<Arc<AppState>> {
    let index = ServeFile::new(dir.join("index.html"));
    Router::new().fallback_service(ServeDir::new(dir).fallback(index))
}
