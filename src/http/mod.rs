//! HTTP surface: the rate limiting middleware and the demo server.

mod layer;
mod server;

pub use layer::{RateLimitLayer, RateLimitService};
pub use server::{router, HitCounter, HttpServer};
