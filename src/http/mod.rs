mod error;
mod middleware;
mod server;


pub use error::AppError;
pub use middleware::{allow_cors, request_logger};
pub use server::{format_bind_addr, HttpConfig, HttpServer, RouteInfo, DEFAULT_PORT};
