//! TresBill HTTP API Service.
//!
//! This crate provides the HTTP API for the TresBill chargeback service,
//! including:
//!
//! - Login and JWT session tokens
//! - Published pricing formulas with ETag caching
//! - Receipt issuance and settlement
//! - Payment provider checkout and webhooks
//! - Admin GL operations (accruals, close/reopen, ECL, exports)
//! - Tamper-evident audit log inspection
//!
//! # Authentication
//!
//! The service issues its own HS256 JWTs at `POST /auth/login`. Admin
//! endpoints additionally require the `admin` role on the token.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Some handlers need async for consistency

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod providers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use providers::{CheckoutSession, PaymentProvider, WebhookEvent};
pub use routes::create_router;
pub use state::AppState;
