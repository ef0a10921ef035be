//! Dependent resource builders
//!
//! Every builder is a pure function of the effective config, the resolved
//! references and the role group identity. Names never contain random parts,
//! so building twice from unchanged input gives identical objects.

pub mod config;
pub mod ingress;
pub mod pdb;
pub mod pvc;
pub mod secret;
pub mod service;
pub mod workload;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use spark_history_common::crd::SparkHistoryServer;
use spark_history_common::kube_utils::{
    deterministic_hash, owner_reference, role_group_child_name, role_group_labels,
    validate_child_name,
};
use spark_history_common::Error;

use crate::image::ImageRef;
use crate::merge::EffectiveConfig;
use crate::resolve::ResolvedRefs;

/// ConfigMap name suffix
pub const SUFFIX_CONFIG: &str = "config";
/// Credential Secret name suffix
pub const SUFFIX_SECRET: &str = "secret";
/// Event log PVC name suffix
pub const SUFFIX_EVENTLOG: &str = "eventlog";
/// StatefulSet name suffix
pub const SUFFIX_SERVER: &str = "server";
/// Service name suffix
pub const SUFFIX_SERVICE: &str = "svc";
/// Ingress name suffix
pub const SUFFIX_INGRESS: &str = "ingress";
/// Role-level PodDisruptionBudget name suffix
pub const SUFFIX_PDB: &str = "pdb";

/// Main container name
pub const MAIN_CONTAINER: &str = "spark-history";
/// Auth proxy container name
pub const OIDC_CONTAINER: &str = "oidc";
/// Log shipping container name
pub const VECTOR_CONTAINER: &str = "vector";

/// History server UI port
pub const HTTP_PORT: i32 = 18080;
/// JMX exporter port
pub const METRICS_PORT: i32 = 18081;
/// Auth proxy port
pub const OIDC_PORT: i32 = 4180;

/// Pod template annotation carrying the hash of the mounted config
pub const CONFIG_HASH_ANNOTATION: &str = "spark.kubedoop.dev/config-hash";

/// Config files as used by the processes
pub const CONFIG_DIR: &str = "/kubedoop/config";
/// Read-only mount of the config bundle
pub const CONFIG_MOUNT_DIR: &str = "/kubedoop/mount/config";
/// Log files picked up by the vector agent
pub const LOG_DIR: &str = "/kubedoop/log";
/// Mount point of the S3 credentials
pub const S3_CREDENTIALS_DIR: &str = "/kubedoop/secret/s3-credentials";
/// Mount point of a PVC event log directory
pub const EVENTLOG_DIR: &str = "/kubedoop/spark-events";

/// The owning SparkHistoryServer as seen by the builders
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerInfo {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Object uid
    pub uid: String,
    /// Controller owner reference stamped on every child
    pub reference: OwnerReference,
}

impl OwnerInfo {
    /// Identity of a SparkHistoryServer read from the API server
    pub fn from_server(server: &SparkHistoryServer) -> Result<Self, Error> {
        let name = server.name_any();
        let namespace = server.namespace().ok_or_else(|| {
            Error::internal_with_context("owner", format!("SparkHistoryServer {name} has no namespace"))
        })?;
        let uid = server.uid().ok_or_else(|| {
            Error::internal_with_context("owner", format!("SparkHistoryServer {name} has no uid"))
        })?;
        Ok(Self {
            reference: owner_reference(server)?,
            name,
            namespace,
            uid,
        })
    }

    /// Metadata of a child owned by this server
    pub fn child_metadata(&self, name: String, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.reference.clone()]),
            ..Default::default()
        }
    }
}

/// Inputs shared by the builders of one role group
#[derive(Clone, Copy, Debug)]
pub struct BuildContext<'a> {
    /// Owning server
    pub owner: &'a OwnerInfo,
    /// Role name
    pub role: &'a str,
    /// Resolved container image
    pub image: &'a ImageRef,
    /// Resolved external references
    pub refs: &'a ResolvedRefs,
    /// Cluster is administratively stopped
    pub stopped: bool,
}

impl BuildContext<'_> {
    /// Validated child name for a role group
    pub fn child_name(&self, group: &str, suffix: &str) -> Result<String, Error> {
        let name = role_group_child_name(&self.owner.name, self.role, group, suffix);
        validate_child_name(&self.owner.name, &name)?;
        Ok(name)
    }

    /// Labels selecting exactly the pods of a role group
    pub fn labels(&self, group: &str) -> BTreeMap<String, String> {
        role_group_labels(&self.owner.name, self.role, group)
    }

    /// Metadata of a role group child
    pub fn metadata(&self, group: &str, suffix: &str) -> Result<ObjectMeta, Error> {
        Ok(self
            .owner
            .child_metadata(self.child_name(group, suffix)?, self.labels(group)))
    }

    /// Whether the auth proxy sidecar runs
    pub fn oidc_enabled(&self) -> bool {
        self.refs.oidc.is_some()
    }

    /// Aggregator address when this group ships its logs
    pub fn log_shipping<'e>(&'e self, effective: &EffectiveConfig) -> Option<&'e str> {
        if effective.log_shipping_enabled() {
            self.refs.vector_address.as_deref()
        } else {
            None
        }
    }
}

/// Every role group child in apply order
#[derive(Clone, Debug, PartialEq)]
pub struct RoleGroupResources {
    /// Config bundle
    pub config_map: ConfigMap,
    /// Static S3 credentials
    pub secret: Option<Secret>,
    /// Event log claim
    pub pvc: Option<PersistentVolumeClaim>,
    /// Workload
    pub stateful_set: StatefulSet,
    /// Network service
    pub service: Service,
    /// UI route
    pub ingress: Option<Ingress>,
}

/// Build every child of one role group
pub fn build_role_group(
    ctx: &BuildContext<'_>,
    effective: &EffectiveConfig,
) -> Result<RoleGroupResources, Error> {
    let config_map = config::build_config_map(ctx, effective)?;
    let secret = secret::build_secret(ctx, &effective.role_group)?;
    let pvc = pvc::build_pvc(ctx, &effective.role_group)?;
    let hash = config_hash(&config_map, secret.as_ref())?;
    let stateful_set = workload::build_stateful_set(ctx, effective, &hash)?;
    let service = service::build_service(ctx, effective)?;
    let ingress = ingress::build_ingress(ctx, effective)?;

    Ok(RoleGroupResources {
        config_map,
        secret,
        pvc,
        stateful_set,
        service,
        ingress,
    })
}

/// Hash of the mounted config so pods roll when it changes
fn config_hash(config_map: &ConfigMap, secret: Option<&Secret>) -> Result<String, Error> {
    let input = serde_json::json!({
        "config": config_map.data,
        "credentials": secret.and_then(|s| s.string_data.as_ref()),
    });
    let canonical = serde_json::to_string(&input)?;
    Ok(deterministic_hash(&canonical))
}
