//! PokeWatch Gate - request admission for the PokeWatch price API
//!
//! This crate implements per-client rate limiting for the PokeWatch HTTP
//! services. Clients are keyed by API key or peer address and admitted
//! through a token bucket kept in process, or through a sliding window kept
//! in Redis when several instances must share one limit. Every response
//! carries `X-RateLimit-*` headers; rejected requests get a 429 with
//! `Retry-After`.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
