//! Role reconciliation
//!
//! Planning merges and builds every role group before anything is written, so
//! a validation error in one group leaves the whole role untouched. Applying
//! then walks the groups in name order and stops at the first group that does
//! not converge. The disruption budget goes last.

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tracing::{debug, instrument};

use spark_history_common::crd::RoleSpec;
use spark_history_common::Error;

use crate::build::config::validate_cleaner;
use crate::build::pdb::build_pdb;
use crate::build::{build_role_group, BuildContext, RoleGroupResources};
use crate::merge::{merge_role_group, ClusterDefaults, EffectiveConfig};
use crate::resource::ChildResource;
use crate::role_group::{reconcile_role_group, Applier, Outcome};
use crate::status::PassProgress;

/// One role group ready to be applied
#[derive(Clone, Debug, PartialEq)]
pub struct GroupPlan {
    /// Merged configuration
    pub effective: EffectiveConfig,
    /// Built children
    pub resources: RoleGroupResources,
}

/// Every object of one role, built and validated
#[derive(Clone, Debug, PartialEq)]
pub struct RolePlan {
    /// Role groups in name order
    pub groups: Vec<GroupPlan>,
    /// Role disruption budget
    pub pdb: Option<PodDisruptionBudget>,
}

/// Merge and validate every role group of a role
///
/// Needs no external reference, so a rejected spec is reported before any
/// lookup can make the pass wait.
pub fn merge_role(
    owner: &str,
    role: &RoleSpec,
    defaults: &ClusterDefaults,
) -> Result<Vec<EffectiveConfig>, Error> {
    let effective = role
        .role_groups
        .iter()
        .map(|(name, group)| merge_role_group(owner, defaults, role, name, group))
        .collect::<Result<Vec<_>, _>>()?;
    validate_cleaner(owner, role, &effective)?;
    Ok(effective)
}

/// Build every merged role group of a role
pub fn build_role(
    ctx: &BuildContext<'_>,
    role: &RoleSpec,
    effective: Vec<EffectiveConfig>,
) -> Result<RolePlan, Error> {
    let groups = effective
        .into_iter()
        .map(|effective| {
            let resources = build_role_group(ctx, &effective)?;
            Ok(GroupPlan {
                effective,
                resources,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    let pdb = if groups.is_empty() {
        None
    } else {
        build_pdb(ctx.owner, ctx.role, role)?
    };

    Ok(RolePlan { groups, pdb })
}

/// Apply a planned role
#[instrument(skip_all, fields(role = ctx.role, groups = plan.groups.len()))]
pub async fn reconcile_role(
    applier: &Applier<'_>,
    ctx: &BuildContext<'_>,
    plan: RolePlan,
    progress: &mut PassProgress,
) -> Result<Outcome, Error> {
    for group in plan.groups {
        let name = group.effective.role_group.clone();
        let outcome =
            reconcile_role_group(applier, ctx, &name, group.resources, progress).await?;
        if let Outcome::Requeue { .. } = outcome {
            debug!(role_group = %name, "role group not converged, skipping the rest");
            return Ok(outcome);
        }
    }

    if let Some(pdb) = plan.pdb {
        applier
            .apply(ChildResource::PodDisruptionBudget(pdb), progress)
            .await?;
    }
    Ok(Outcome::Converged)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;
    use crate::build::fixtures::*;
    use crate::resolve::ResolvedRefs;
    use crate::store::memory::MemoryStore;
    use spark_history_common::crd::{ClusterConfigSpec, HistoryServerConfig, RoleGroupSpec};
    use tokio_util::sync::CancellationToken;

    fn plan_role(
        ctx: &BuildContext<'_>,
        role: &RoleSpec,
        defaults: &ClusterDefaults,
    ) -> Result<RolePlan, Error> {
        let effective = merge_role(&ctx.owner.name, role, defaults)?;
        build_role(ctx, role, effective)
    }

    fn group(replicas: i32, cleaner: bool) -> RoleGroupSpec {
        RoleGroupSpec {
            replicas: Some(replicas),
            config: Some(HistoryServerConfig {
                cleaner: Some(cleaner),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn role(groups: &[(&str, RoleGroupSpec)]) -> RoleSpec {
        RoleSpec {
            role_groups: groups
                .iter()
                .map(|(name, spec)| (name.to_string(), spec.clone()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    /// Story: Two cleaner groups fail planning, so nothing is written
    #[test]
    fn story_validation_failure_writes_nothing() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let defaults = ClusterDefaults::new(ClusterConfigSpec::default());

        let role = role(&[("a", group(1, true)), ("b", group(1, true))]);
        let err = plan_role(&ctx, &role, &defaults).expect_err("two cleaners");
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("a, b"));
    }

    /// Story: Groups are applied in name order and the budget comes last
    #[tokio::test]
    async fn story_groups_then_budget() {
        let store = MemoryStore::new();
        let token = CancellationToken::new();
        let applier = Applier::new(&store, &token, Duration::from_secs(10));
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let defaults = ClusterDefaults::new(ClusterConfigSpec::default());

        let role = role(&[("b", group(1, true)), ("a", group(1, false))]);
        let plan = plan_role(&ctx, &role, &defaults).expect("plan");
        let outcome = reconcile_role(&applier, &ctx, plan, &mut PassProgress::default())
            .await
            .expect("reconcile");

        assert_eq!(outcome, Outcome::Converged);
        let names: Vec<String> = store.applied().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "history-node-a-config",
                "history-node-a-server",
                "history-node-a-svc",
                "history-node-b-config",
                "history-node-b-server",
                "history-node-b-svc",
                "history-node-pdb",
            ]
        );
    }

    #[test]
    fn empty_role_builds_nothing() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let plan = plan_role(
            &ctx,
            &RoleSpec::default(),
            &ClusterDefaults::new(ClusterConfigSpec::default()),
        )
        .expect("plan");
        assert!(plan.groups.is_empty());
        assert!(plan.pdb.is_none());
    }

    #[test]
    fn builder_errors_surface_from_planning() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let mut bad = group(1, false);
        bad.overrides.config_overrides = Some(BTreeMap::from([(
            "core-site.xml".to_string(),
            BTreeMap::new(),
        )]));

        let err = plan_role(
            &ctx,
            &role(&[("a", bad)]),
            &ClusterDefaults::new(ClusterConfigSpec::default()),
        )
        .expect_err("unknown file");
        assert!(err.to_string().contains("core-site.xml"));
    }
}
