//! Role group reconciliation
//!
//! Applies the children of one role group in dependency order:
//!
//! ```text
//! ConfigMap → Secret → PVC → [OIDC client Secret exists?] → StatefulSet → Service → Ingress
//! ```
//!
//! Later resources name earlier ones, so a failure stops the sequence. A
//! missing prerequisite is a short requeue, not an error. The group converges
//! only when every step was applied in this pass.

use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use spark_history_common::Error;

use crate::build::{BuildContext, RoleGroupResources};
use crate::resource::ChildResource;
use crate::status::PassProgress;
use crate::store::{cancellable, fetch, ApplyOutcome, ObjectKind, ResourceStore};

/// Result of reconciling one unit (role group, role or cluster)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every step was applied
    Converged,
    /// A prerequisite is missing; try again after `after`
    Requeue {
        /// Delay before the next pass
        after: Duration,
        /// What is missing
        reason: String,
    },
}

/// Applies dependent resources through the store for one pass
pub struct Applier<'a> {
    store: &'a dyn ResourceStore,
    token: &'a CancellationToken,
    dependency_requeue: Duration,
}

impl<'a> Applier<'a> {
    /// Create an applier for one pass
    pub fn new(
        store: &'a dyn ResourceStore,
        token: &'a CancellationToken,
        dependency_requeue: Duration,
    ) -> Self {
        Self {
            store,
            token,
            dependency_requeue,
        }
    }

    /// Store used by this pass
    pub fn store(&self) -> &'a dyn ResourceStore {
        self.store
    }

    /// Pass cancellation token
    pub fn token(&self) -> &'a CancellationToken {
        self.token
    }

    /// Delay before retrying a missing prerequisite
    pub fn dependency_requeue(&self) -> Duration {
        self.dependency_requeue
    }

    /// Upsert one child, unless the pass was cancelled
    pub async fn apply(
        &self,
        resource: ChildResource,
        progress: &mut PassProgress,
    ) -> Result<ApplyOutcome, Error> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match cancellable(self.token, self.store.apply(&resource)).await {
            Ok(outcome) => {
                debug!(
                    kind = resource.kind(),
                    name = resource.name(),
                    ?outcome,
                    "applied"
                );
                progress.record(resource.family(), outcome);
                Ok(outcome)
            }
            Err(e) => {
                if !matches!(e, Error::Cancelled) {
                    progress.failed = Some(resource.family());
                }
                Err(e)
            }
        }
    }
}

/// Apply the children of one role group in order
pub async fn reconcile_role_group(
    applier: &Applier<'_>,
    ctx: &BuildContext<'_>,
    group: &str,
    resources: RoleGroupResources,
    progress: &mut PassProgress,
) -> Result<Outcome, Error> {
    let RoleGroupResources {
        config_map,
        secret,
        pvc,
        stateful_set,
        service,
        ingress,
    } = resources;

    applier
        .apply(ChildResource::ConfigMap(config_map), progress)
        .await?;
    if let Some(secret) = secret {
        applier.apply(ChildResource::Secret(secret), progress).await?;
    }
    if let Some(pvc) = pvc {
        applier
            .apply(ChildResource::PersistentVolumeClaim(pvc), progress)
            .await?;
    }

    if let Some(oidc) = &ctx.refs.oidc {
        let name = oidc.client_credentials_secret.as_str();
        let found: Option<Secret> = cancellable(
            applier.token(),
            fetch(applier.store(), ObjectKind::Secret, &ctx.owner.namespace, name),
        )
        .await?;
        if found.is_none() {
            let reason = format!(
                "OIDC client credentials Secret {}/{name} does not exist yet",
                ctx.owner.namespace
            );
            info!(role_group = group, %reason, "waiting for prerequisite");
            return Ok(Outcome::Requeue {
                after: applier.dependency_requeue(),
                reason,
            });
        }
    }

    applier
        .apply(ChildResource::StatefulSet(stateful_set), progress)
        .await?;
    applier
        .apply(ChildResource::Service(service), progress)
        .await?;
    if let Some(ingress) = ingress {
        applier
            .apply(ChildResource::Ingress(ingress), progress)
            .await?;
    }

    debug!(role_group = group, "role group converged");
    Ok(Outcome::Converged)
}
