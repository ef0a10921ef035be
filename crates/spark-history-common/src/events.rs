//! Kubernetes Event recording for the history server controller.
//!
//! Events are fire-and-forget: a failed publish is logged and never fails the
//! reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about a resource
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Every dependent resource converged in one pass
    pub const AVAILABLE: &str = "Available";
    /// The spec cannot be reconciled until it is edited
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A referenced S3Bucket, S3Connection or AuthenticationClass is missing
    pub const REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";
    /// Transient failures exceeded the escalation threshold
    pub const TRANSIENT_FAILURE: &str = "TransientFailure";
    /// Reconciliation suspended by the administrator
    pub const PAUSED: &str = "ReconciliationPaused";
}

/// Event actions
pub mod actions {
    /// A reconcile pass
    pub const RECONCILE: &str = "Reconcile";
}
