//! Event log volume claim

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, Volume,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use spark_history_common::Error;

use super::{BuildContext, SUFFIX_EVENTLOG};

/// Size of a created event log claim
pub const DEFAULT_EVENTLOG_SIZE: &str = "10Gi";
/// Volume holding the event logs
pub const EVENTLOG_VOLUME: &str = "eventlog";

/// Claim for PVC event log storage, unless an existing claim is used
pub fn build_pvc(
    ctx: &BuildContext<'_>,
    group: &str,
) -> Result<Option<PersistentVolumeClaim>, Error> {
    let Some(persistence) = ctx.refs.pvc() else {
        return Ok(None);
    };
    if persistence.existing_claim.is_some() {
        return Ok(None);
    }

    let size = persistence
        .size
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_EVENTLOG_SIZE.to_string());
    let access_modes = persistence
        .access_modes
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]);

    Ok(Some(PersistentVolumeClaim {
        metadata: ctx.metadata(group, SUFFIX_EVENTLOG)?,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes),
            storage_class_name: persistence.storage_class.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Volume mounting the event log claim
pub fn eventlog_volume(ctx: &BuildContext<'_>, group: &str) -> Result<Option<Volume>, Error> {
    let Some(persistence) = ctx.refs.pvc() else {
        return Ok(None);
    };
    let claim_name = match persistence.existing_claim.as_deref() {
        Some(existing) => existing.to_string(),
        None => ctx.child_name(group, SUFFIX_EVENTLOG)?,
    };
    Ok(Some(Volume {
        name: EVENTLOG_VOLUME.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name,
            read_only: Some(false),
        }),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::fixtures::*;
    use crate::resolve::{LogDirectory, ResolvedRefs};
    use spark_history_common::crd::PersistenceSpec;

    fn refs(persistence: PersistenceSpec) -> ResolvedRefs {
        ResolvedRefs {
            log_directory: Some(LogDirectory::Pvc(persistence)),
            ..Default::default()
        }
    }

    #[test]
    fn claim_uses_defaults() {
        let owner = owner();
        let image = image();
        let refs = refs(PersistenceSpec::default());
        let ctx = context(&owner, &image, &refs);

        let pvc = build_pvc(&ctx, "a").expect("build").expect("claim");
        assert_eq!(pvc.metadata.name.as_deref(), Some("history-node-a-eventlog"));
        let spec = pvc.spec.expect("spec");
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(
            spec.resources.and_then(|r| r.requests).expect("requests")["storage"],
            Quantity("10Gi".to_string())
        );

        let volume = eventlog_volume(&ctx, "a").expect("build").expect("volume");
        assert_eq!(
            volume.persistent_volume_claim.expect("pvc").claim_name,
            "history-node-a-eventlog"
        );
    }

    #[test]
    fn existing_claim_is_mounted_not_created() {
        let owner = owner();
        let image = image();
        let refs = refs(PersistenceSpec {
            existing_claim: Some("shared-events".to_string()),
            ..Default::default()
        });
        let ctx = context(&owner, &image, &refs);

        assert!(build_pvc(&ctx, "a").expect("build").is_none());
        let volume = eventlog_volume(&ctx, "a").expect("build").expect("volume");
        assert_eq!(
            volume.persistent_volume_claim.expect("pvc").claim_name,
            "shared-events"
        );
    }

    #[test]
    fn s3_storage_needs_no_claim() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        assert!(build_pvc(&ctx, "a").expect("build").is_none());
        assert!(eventlog_volume(&ctx, "a").expect("build").is_none());
    }
}
