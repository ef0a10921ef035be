//! SparkHistoryServer CRD types
//!
//! The desired state is layered: product defaults, then the role-level
//! `config`, then each role group's `config`, then the override blocks.
//! Every config field is optional so that an unset field falls through to the
//! broader level during merge.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::s3::S3BucketRef;
use super::types::Condition;

/// Name of the single role managed by this operator
pub const NODE_ROLE: &str = "node";

// =============================================================================
// Image
// =============================================================================

/// Container image selection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Full image reference, used verbatim when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,

    /// Image repository (e.g. "quay.io/zncdatadev")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    /// Spark version shipped in the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_version: Option<String>,

    /// Platform build version of the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubedoop_version: Option<String>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,

    /// Name of a docker-registry Secret used to pull the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret_name: Option<String>,
}

// =============================================================================
// Cluster config
// =============================================================================

/// How the history server Service is exposed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerClass {
    /// Reachable only inside the cluster (ClusterIP)
    #[default]
    ClusterInternal,
    /// Reachable from outside on a node port (NodePort)
    ExternalUnstable,
    /// Reachable from outside on a stable address (LoadBalancer)
    ExternalStable,
}

impl ListenerClass {
    /// Kubernetes Service type for this listener class
    pub fn service_type(&self) -> &'static str {
        match self {
            Self::ClusterInternal => "ClusterIP",
            Self::ExternalUnstable => "NodePort",
            Self::ExternalStable => "LoadBalancer",
        }
    }
}

/// Event logs stored in an S3 bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3LogFileSpec {
    /// Bucket holding the event logs
    pub bucket: S3BucketRef,

    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
}

/// Event logs stored on a persistent volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Mount this pre-existing claim instead of creating one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_claim: Option<String>,

    /// Storage class of the created claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Requested size of the created claim (default "10Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Access modes of the created claim (default ReadWriteOnce)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_modes: Option<Vec<String>>,
}

/// Where Spark applications write their event logs; exactly one is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogFileDirectorySpec {
    /// Object storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3LogFileSpec>,

    /// Persistent volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistenceSpec>,
}

/// OIDC settings for the auth proxy in front of the UI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcSpec {
    /// Secret holding CLIENT_ID and CLIENT_SECRET
    pub client_credentials_secret: String,

    /// Scopes requested in addition to "openid email profile"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_scopes: Vec<String>,
}

/// Authentication of the history server UI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationSpec {
    /// Name of the cluster-scoped AuthenticationClass
    pub authentication_class: String,

    /// OIDC client settings; enables the auth proxy sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcSpec>,
}

/// Ingress exposing the history server UI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Host name routed to the history server
    pub host: String,

    /// Ingress class handling the route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    /// Annotations added to the Ingress
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Settings shared by every role group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSpec {
    /// Service exposure
    #[serde(default)]
    pub listener_class: ListenerClass,

    /// Discovery ConfigMap of the vector aggregator; enables log shipping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_aggregator_config_map_name: Option<String>,

    /// Event log location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_directory: Option<LogFileDirectorySpec>,

    /// UI authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationSpec>,

    /// UI ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
}

/// Administrative operation flags
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperationSpec {
    /// Scale every workload to zero replicas
    #[serde(default)]
    pub stopped: bool,

    /// Leave all dependent resources untouched
    #[serde(default)]
    pub reconciliation_paused: bool,
}

// =============================================================================
// Role / role group config
// =============================================================================

/// CPU bounds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    /// CPU request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,

    /// CPU limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

/// Memory bounds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    /// Memory request and limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
}

/// Compute resources of the main container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesSpec {
    /// CPU bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,

    /// Memory bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,
}

/// Log level of a logger or appender
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// TRACE
    Trace,
    /// DEBUG
    Debug,
    /// INFO
    Info,
    /// WARN
    Warn,
    /// ERROR
    Error,
    /// FATAL
    Fatal,
    /// Logging disabled
    None,
}

impl LogLevel {
    /// log4j2 spelling of the level
    pub fn as_log4j(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::None => "OFF",
        }
    }
}

/// Logging of one container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLoggingSpec {
    /// Level of the console appender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<LogLevel>,

    /// Level of the file appender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<LogLevel>,

    /// Per-logger levels; "ROOT" sets the root logger
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loggers: BTreeMap<String, LogLevel>,
}

/// Logging settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSpec {
    /// Per-container logging keyed by container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<BTreeMap<String, ContainerLoggingSpec>>,

    /// Run the vector agent sidecar when an aggregator is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_vector_agent: Option<bool>,
}

/// Mergeable configuration of the history server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryServerConfig {
    /// Compute resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesSpec>,

    /// Termination grace period (e.g. "30s", "1m30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful_shutdown_timeout: Option<String>,

    /// Node selector of the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    /// Tolerations of the pods; replaced wholesale by more specific levels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,

    /// Logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSpec>,

    /// Run the event log cleaner in this role group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaner: Option<bool>,
}

/// Override blocks applied after config merging
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverridesSpec {
    /// Replaces the main container command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_overrides: Option<Vec<String>>,

    /// Environment variables added to the main container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_overrides: Option<BTreeMap<String, String>>,

    /// Properties added to generated config files, keyed by file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_overrides: Option<BTreeMap<String, BTreeMap<String, String>>>,

    /// Partial pod template deep-merged into the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub pod_overrides: Option<serde_json::Value>,
}

/// Disruption budget of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetSpec {
    /// Create the budget (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Pods of the role that may be unavailable at once (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

/// Role-wide settings that do not apply per role group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfigSpec {
    /// Disruption budget covering all pods of the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_disruption_budget: Option<PodDisruptionBudgetSpec>,
}

/// One independently scaled subset of a role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleGroupSpec {
    /// Replica count; wins over the role default, including 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Group-level config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<HistoryServerConfig>,

    /// Group-level overrides
    #[serde(default, flatten)]
    pub overrides: OverridesSpec,
}

/// The history server role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Default replica count of the role groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Role-level config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<HistoryServerConfig>,

    /// Role-wide settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_config: Option<RoleConfigSpec>,

    /// Role-level overrides, inherited by every group
    #[serde(default, flatten)]
    pub overrides: OverridesSpec,

    /// Role groups keyed by name
    #[serde(default)]
    pub role_groups: BTreeMap<String, RoleGroupSpec>,
}

// =============================================================================
// CRD
// =============================================================================

/// Spark History Server deployment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "spark.kubedoop.dev",
    version = "v1alpha1",
    kind = "SparkHistoryServer",
    plural = "sparkhistoryservers",
    shortname = "shs",
    namespaced,
    status = "SparkHistoryServerStatus",
    printcolumn = r#"{"name":"Available","type":"string","jsonPath":".status.conditions[?(@.type==\"Available\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SparkHistoryServerSpec {
    /// Container image
    #[serde(default)]
    pub image: ImageSpec,

    /// Settings shared by every role group
    #[serde(default)]
    pub cluster_config: ClusterConfigSpec,

    /// Administrative flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_operation: Option<ClusterOperationSpec>,

    /// The history server role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<RoleSpec>,
}

impl SparkHistoryServerSpec {
    /// Whether workloads must be scaled to zero
    pub fn is_stopped(&self) -> bool {
        self.cluster_operation.as_ref().is_some_and(|op| op.stopped)
    }

    /// Whether reconciliation is suspended
    pub fn is_paused(&self) -> bool {
        self.cluster_operation
            .as_ref()
            .is_some_and(|op| op.reconciliation_paused)
    }
}

/// Observed state of a SparkHistoryServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SparkHistoryServerStatus {
    /// Conditions keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Consecutive reconcile passes that failed transiently
    #[serde(default)]
    pub transient_failures: u32,
}

fn preserve_unknown_fields(
    _: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schemars::schema::Schema::Object(schema)
}
