pub mod handlers;
pub mod responses;
pub mod routes;

pub use routes::{api_routes, create_router, AppState};
