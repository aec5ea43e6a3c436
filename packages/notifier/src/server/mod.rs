// Health and metrics side channel (Axum)
pub mod app;
pub mod routes;

pub use app::*;
