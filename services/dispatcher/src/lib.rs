pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod infra;
pub mod propagation;
pub mod resilience;
pub mod router;
pub mod state;
pub mod usecase;
