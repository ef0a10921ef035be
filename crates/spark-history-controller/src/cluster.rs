//! Cluster reconciliation
//!
//! Entry point of one pass over a SparkHistoryServer. Evaluates the
//! administrative flags, merges and validates the role groups, resolves the
//! image and every external reference once, then hands the single `node` role
//! to the role reconciler.

use kube::ResourceExt;
use tracing::{info, instrument};

use spark_history_common::crd::{SparkHistoryServer, NODE_ROLE};
use spark_history_common::Error;

use crate::build::{BuildContext, OwnerInfo};
use crate::image::{resolve, ProductImage};
use crate::merge::ClusterDefaults;
use crate::resolve::{resolve_all, Readiness};
use crate::role::{build_role, merge_role, reconcile_role};
use crate::role_group::{Applier, Outcome};
use crate::status::PassProgress;
use crate::store::cancellable;

/// Result of one pass over a SparkHistoryServer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// Reconciliation is suspended; nothing was read or written
    Paused,
    /// The pipeline ran
    Reconciled(Outcome),
}

/// Run one pass over a SparkHistoryServer
///
/// Stopped clusters run the full pipeline with every workload at zero
/// replicas. Paused clusters are skipped entirely.
#[instrument(skip_all, fields(server = %server.name_any()))]
pub async fn reconcile_cluster(
    applier: &Applier<'_>,
    product: &ProductImage,
    server: &SparkHistoryServer,
    progress: &mut PassProgress,
) -> Result<PassOutcome, Error> {
    let spec = &server.spec;
    if spec.is_paused() {
        info!("reconciliation paused, leaving dependent resources untouched");
        return Ok(PassOutcome::Paused);
    }

    let owner = OwnerInfo::from_server(server)?;
    let image = resolve(product, &spec.image);
    let defaults = ClusterDefaults::new(spec.cluster_config.clone());

    let effective = match &spec.node {
        Some(role) => merge_role(&owner.name, role, &defaults)?,
        None => Vec::new(),
    };
    let ships_logs = effective.iter().any(|e| e.log_shipping_enabled());

    let refs = match cancellable(
        applier.token(),
        resolve_all(
            applier.store(),
            &owner.name,
            &owner.namespace,
            &spec.cluster_config,
            ships_logs,
        ),
    )
    .await?
    {
        Readiness::Ready(refs) => refs,
        Readiness::Waiting(reason) => {
            info!(%reason, "waiting for external reference");
            return Ok(PassOutcome::Reconciled(Outcome::Requeue {
                after: applier.dependency_requeue(),
                reason,
            }));
        }
    };

    let Some(role) = &spec.node else {
        return Ok(PassOutcome::Reconciled(Outcome::Converged));
    };

    let ctx = BuildContext {
        owner: &owner,
        role: NODE_ROLE,
        image: &image,
        refs: &refs,
        stopped: spec.is_stopped(),
    };
    let plan = build_role(&ctx, role, effective)?;
    let outcome = reconcile_role(applier, &ctx, plan, progress).await?;
    Ok(PassOutcome::Reconciled(outcome))
}
