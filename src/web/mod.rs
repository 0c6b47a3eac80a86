mod handlers;
mod routes;
mod static_files;

pub use handlers::HealthResponse;
pub use routes::create_router;
// StaticAssets is only available in release mode (embedded assets)
#[cfg(not(debug_assertions))]
pub use static_files::StaticAssets;
