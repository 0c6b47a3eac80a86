use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
#[cfg(debug_assertions)]
use std::path::PathBuf;
#[cfg(debug_assertions)]
use std::sync::OnceLock;

// Only embed assets in release mode
#[cfg(not(debug_assertions))]
use rust_embed::Embed;

#[cfg(not(debug_assertions))]
/// Embedded client page - only in release mode
#[derive(Embed)]
#[folder = "web"]
#[prefix = ""]
pub struct StaticAssets;

/// In debug builds the page is read from `web/` next to the executable
#[cfg(debug_assertions)]
fn get_static_base_dir() -> PathBuf {
    static BASE_DIR: OnceLock<PathBuf> = OnceLock::new();
    BASE_DIR
        .get_or_init(|| {
            if let Ok(exe_path) = std::env::current_exe() {
                if let Some(exe_dir) = exe_path.parent() {
                    return exe_dir.join("web");
                }
            }
            PathBuf::from("web")
        })
        .clone()
}

/// Serve the client page for `GET /`
pub async fn index_handler() -> Response {
    serve_file("index.html")
}

fn serve_file(path: &str) -> Response {
    match read_asset(path) {
        Some(data) => {
            let mime = mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, mime),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
                Body::from(data),
            )
                .into_response()
        }
        None if path == "index.html" => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            placeholder_html(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not Found").into_response(),
    }
}

fn read_asset(path: &str) -> Option<Vec<u8>> {
    #[cfg(debug_assertions)]
    {
        let file_path = get_static_base_dir().join(path);
        match std::fs::read(&file_path) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!(
                    "Failed to read static file '{}' from '{}': {}",
                    path,
                    file_path.display(),
                    e
                );
                None
            }
        }
    }

    #[cfg(not(debug_assertions))]
    {
        StaticAssets::get(path).map(|asset| asset.data.to_vec())
    }
}

/// Served when the client page is missing
pub fn placeholder_html() -> &'static str {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>picam-rtc</title>
</head>
<body>
    <h1>picam-rtc</h1>
    <p>Client page not found. POST an SDP offer to <code>/offer</code>.</p>
</body>
</html>"#
}
