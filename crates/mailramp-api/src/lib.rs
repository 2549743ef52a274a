//! MailRamp API - HTTP surface
//!
//! This crate provides the control API, the tracking and unsubscribe
//! endpoints, provider webhooks, health checks and metrics.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod pages;
pub mod routes;

pub use auth::AppState;
pub use routes::create_router;
