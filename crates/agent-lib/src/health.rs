//! Component health tracking for liveness and readiness probes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, but misbehaving
    Degraded,
    Unhealthy,
}

/// One component's current health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Aggregate health report served at /healthz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Readiness report served at /readyz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names tracked by the agent
pub mod components {
    pub const SNAPSHOT_SOURCE: &str = "snapshot_source";
    pub const PIPELINE: &str = "pipeline";
    pub const API: &str = "api";
}

/// Shared registry of component health and agent readiness
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, starting healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut components = self.components.write().await;
        components.insert(
            name.to_string(),
            ComponentHealth::with_status(status, message),
        );
    }

    /// Flip readiness once wiring is complete (or lost)
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Aggregate report: unhealthy dominates, then degraded
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let mut status = ComponentStatus::Healthy;
        for component in components.values() {
            match component.status {
                ComponentStatus::Unhealthy => {
                    status = ComponentStatus::Unhealthy;
                    break;
                }
                ComponentStatus::Degraded => status = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("agent still wiring up".to_string()),
            };
        }
        let health = self.health().await;
        if health.status == ComponentStatus::Unhealthy {
            return ReadinessResponse {
                ready: false,
                reason: Some("a component is unhealthy".to_string()),
            };
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_degraded_component_degrades_aggregate() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;
        registry.register(components::SNAPSHOT_SOURCE).await;

        registry
            .set_degraded(components::PIPELINE, "failed cycles")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::PIPELINE].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_unhealthy_dominates() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;
        registry.register(components::SNAPSHOT_SOURCE).await;

        registry.set_degraded(components::PIPELINE, "slow").await;
        registry
            .set_unhealthy(components::SNAPSHOT_SOURCE, "feed gone")
            .await;

        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_not_ready_until_flagged() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_ready_but_unhealthy_reports_not_ready() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::PIPELINE, "dead").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_recovery_restores_health() {
        let registry = HealthRegistry::new();
        registry.register(components::PIPELINE).await;
        registry.set_unhealthy(components::PIPELINE, "dead").await;
        registry.set_healthy(components::PIPELINE).await;

        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }
}
