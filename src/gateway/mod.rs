//! HTTP surface: the inbound gates mounted on an axum router

mod router;
mod server;

pub use router::{AppState, create_router};
pub use server::Gateway;
