//! Purchase Lifecycle & Dispute Reconciliation Engine
//!
//! Drives marketplace purchases from payment to a final outcome:
//! auto-confirmation after the dispute window, or a dispute that an
//! admin resolves (with escalation when no admin acts in time).
//!
//! # Modules
//!
//! - [`purchase`] - State machine, coordinator, reconciler, stores and side effects
//! - [`gateway`] - HTTP surface (axum) with OpenAPI docs
//! - [`db`] - PostgreSQL connection pool
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod purchase;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use purchase::{
    Actor, PaymentResult, Purchase, PurchaseCoordinator, PurchaseError, PurchaseId,
    PurchaseStatus, ReconciliationWorker,
};
