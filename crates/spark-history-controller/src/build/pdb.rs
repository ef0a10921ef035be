//! Role-level PodDisruptionBudget

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use spark_history_common::crd::RoleSpec;
use spark_history_common::kube_utils::{role_child_name, role_labels, validate_child_name};
use spark_history_common::Error;

use super::{OwnerInfo, SUFFIX_PDB};

/// Pods of the role that may be down at once unless configured
pub const DEFAULT_MAX_UNAVAILABLE: i32 = 1;

/// Disruption budget covering every pod of the role, unless disabled
pub fn build_pdb(
    owner: &OwnerInfo,
    role: &str,
    spec: &RoleSpec,
) -> Result<Option<PodDisruptionBudget>, Error> {
    let config = spec
        .role_config
        .as_ref()
        .and_then(|c| c.pod_disruption_budget.clone())
        .unwrap_or_default();
    if !config.enabled.unwrap_or(true) {
        return Ok(None);
    }

    let max_unavailable = config.max_unavailable.unwrap_or(DEFAULT_MAX_UNAVAILABLE);
    if max_unavailable < 0 {
        return Err(Error::validation_for_field(
            &owner.name,
            "spec.node.roleConfig.podDisruptionBudget.maxUnavailable",
            format!("maxUnavailable must not be negative, got {max_unavailable}"),
        ));
    }

    let name = role_child_name(&owner.name, role, SUFFIX_PDB);
    validate_child_name(&owner.name, &name)?;
    let labels = role_labels(&owner.name, role);

    Ok(Some(PodDisruptionBudget {
        metadata: owner.child_metadata(name, labels.clone()),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }))
}
