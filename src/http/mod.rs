//! HTTP surface of the gate: admission middleware, routes and server.

mod middleware;
mod routes;
mod server;
mod state;

pub use middleware::{
    admit, apply_rate_limit_headers, authenticate, request_id, request_span, require_admin,
    response_time, security_headers, RequestId,
};
pub use routes::router;
pub use server::HttpServer;
pub use state::AppState;
