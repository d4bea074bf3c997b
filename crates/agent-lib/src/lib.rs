//! Contention detection library for the node oversubscription agent
//!
//! This crate provides the core functionality for:
//! - The usage snapshot and contention data model
//! - A composable detection pipeline (stages, sink, cycle driver)
//! - CPU contention detection with pluggable usage extraction
//! - An out-of-process pipeline adapter
//! - Health checks and observability

pub mod detector;
pub mod external;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod usage;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use pipeline::{Contentions, Stage};
