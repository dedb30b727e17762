//! Appointment Booking Service
//!
//! This library provides a web service for booking fixed-duration
//! appointment slots over a rolling calendar window, with optional checkout
//! through an external payment gateway and passive visitor re-identification
//! via a device cookie.
//!
//! # Modules
//!
//! - `client`: payment gateway client (create/verify transaction)
//! - `models`: value types and HTTP DTOs
//! - `services`: slot generation, the appointment ledger and device
//!   registry, server-side sessions, and the booking workflow
//! - `handlers`: axum request handlers
//! - `routes`: router assembly
//!
//! # Consistency
//!
//! The appointment ledger enforces at most one booking per time slot at the
//! storage layer; every handler-level availability check is only a UX
//! optimization. The payment flow spans two requests correlated by a
//! server-side session; a crash between gateway capture and the ledger
//! commit loses the booking despite captured funds, which is a known
//! limitation reconciled manually via logged invoice ids.

pub mod client;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

// Re-export the main types for ease of use
pub use client::{GatewayClient, PaymentError, PaymentGateway};
pub use handlers::api::AppState;
pub use routes::create_router;
