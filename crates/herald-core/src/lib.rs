//! Shared plumbing for Herald services: tracing setup, environment helpers,
//! HTTP error mapping, health checks and correlation-id middleware.

pub mod env;
pub mod error;
pub mod health;
pub mod middleware;
pub mod tracing;
