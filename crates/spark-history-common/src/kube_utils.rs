//! Shared Kubernetes helpers: names, labels, owner references, hashing and
//! status patching.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};

use crate::crd::SparkHistoryServer;
use crate::Error;

// =============================================================================
// Labels
// =============================================================================

/// Product name label value
pub const APP_NAME: &str = "spark-history-server";

/// `app.kubernetes.io/name`
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// `app.kubernetes.io/instance`: the owning SparkHistoryServer
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
/// `app.kubernetes.io/managed-by`
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
/// `app.kubernetes.io/component`: the role name
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// `app.kubernetes.io/role-group`
pub const LABEL_ROLE_GROUP: &str = "app.kubernetes.io/role-group";

/// Value of the managed-by label
pub const MANAGED_BY: &str = "spark.kubedoop.dev";

/// Labels identifying every pod of one role
pub fn role_labels(owner: &str, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_INSTANCE.to_string(), owner.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        (LABEL_COMPONENT.to_string(), role.to_string()),
    ])
}

/// Labels identifying exactly the pods of one role group
pub fn role_group_labels(owner: &str, role: &str, group: &str) -> BTreeMap<String, String> {
    let mut labels = role_labels(owner, role);
    labels.insert(LABEL_ROLE_GROUP.to_string(), group.to_string());
    labels
}

// =============================================================================
// Names
// =============================================================================

/// Longest name accepted for a DNS-1123 label (Service names are labels)
pub const MAX_NAME_LEN: usize = 63;

/// Name of a role-group scoped child: `<owner>-<role>-<group>-<suffix>`
pub fn role_group_child_name(owner: &str, role: &str, group: &str, suffix: &str) -> String {
    format!("{owner}-{role}-{group}-{suffix}").to_lowercase()
}

/// Name of a role scoped child: `<owner>-<role>-<suffix>`
pub fn role_child_name(owner: &str, role: &str, suffix: &str) -> String {
    format!("{owner}-{role}-{suffix}").to_lowercase()
}

/// Check that a generated name is a valid DNS-1123 label
pub fn validate_child_name(owner: &str, name: &str) -> Result<(), Error> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::validation_for(
            owner,
            format!(
                "generated name '{name}' is {} characters, at most {MAX_NAME_LEN} allowed; shorten the resource or role group name",
                name.len()
            ),
        ));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(Error::validation_for(
            owner,
            format!("generated name '{name}' is not a valid DNS-1123 label"),
        ));
    }
    Ok(())
}

// =============================================================================
// Ownership
// =============================================================================

/// Controller owner reference pointing at the SparkHistoryServer
///
/// Requires the object to have been read from the API server (uid set).
pub fn owner_reference(owner: &SparkHistoryServer) -> Result<OwnerReference, Error> {
    owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner",
            format!("SparkHistoryServer {} has no uid", owner.name_any()),
        )
    })
}

// =============================================================================
// Hashing
// =============================================================================

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Truncated SHA-256 so the value is stable across toolchains and can be
/// persisted in annotations.
pub fn deterministic_hash(input: &str) -> String {
    hex_prefix(&sha256(input.as_bytes()), 8)
}

/// SHA-256 digest of the input bytes
pub fn sha256(input: &[u8]) -> Vec<u8> {
    use aws_lc_rs::digest;
    digest::digest(&digest::SHA256, input).as_ref().to_vec()
}

/// Lower-case hex of the first `bytes` bytes of a digest
pub fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    digest
        .iter()
        .take(bytes)
        .fold(String::with_capacity(bytes * 2), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

// =============================================================================
// Status
// =============================================================================

/// Patch the status sub-resource of a SparkHistoryServer.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch.
pub async fn patch_server_status(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> Result<(), Error> {
    let api: Api<SparkHistoryServer> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}
