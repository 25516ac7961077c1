//! Networking primitives shared by every external API consumer.
//!
//! - [`SourceRateLimiter`] - per-source minimum-interval pacing
//! - [`HttpClient`] - retrying GET with exponential backoff and redirects

pub mod client;
pub mod rate_limiter;

pub use client::{HttpClient, HttpError};
pub use rate_limiter::SourceRateLimiter;
