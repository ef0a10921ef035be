//! Hierarchical configuration merge
//!
//! Precedence, lowest to highest: product defaults, role `config`, role group
//! `config`, then overrides (role overrides under group overrides).
//!
//! Field rules:
//! - scalars: the more specific `Some` wins, `None` never overrides
//! - nested config: merged field by field
//! - maps: union, the more specific entry wins on conflict
//! - vectors: replaced wholesale by the more specific level
//! - pod overrides: free-form JSON, deep merged; an object meeting a
//!   non-object is a merge error

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Toleration;
use serde::Serialize;
use serde_json::Value;

use spark_history_common::crd::{
    AuthenticationSpec, ClusterConfigSpec, ContainerLoggingSpec, CpuSpec, HistoryServerConfig,
    IngressSpec, ListenerClass, LogFileDirectorySpec, LoggingSpec, MemorySpec, OverridesSpec,
    ResourcesSpec, RoleGroupSpec, RoleSpec, S3ConnectionSpec,
};
use spark_history_common::Error;

/// Replicas when neither the group nor the role sets a count
pub const DEFAULT_REPLICAS: i32 = 1;
/// Default CPU request of the main container
pub const DEFAULT_CPU_MIN: &str = "500m";
/// Default CPU limit of the main container
pub const DEFAULT_CPU_MAX: &str = "1";
/// Default memory of the main container
pub const DEFAULT_MEMORY: &str = "1Gi";
/// Default termination grace period
pub const DEFAULT_GRACEFUL_SHUTDOWN: &str = "30s";

// =============================================================================
// Merge trait
// =============================================================================

/// Fill unset fields of `self` from a broader level
pub trait Merge {
    /// Merge `defaults` under `self`; values already set in `self` win
    fn merge(&mut self, defaults: &Self);
}

fn merge_scalar<T: Clone>(target: &mut Option<T>, defaults: &Option<T>) {
    if target.is_none() {
        target.clone_from(defaults);
    }
}

fn merge_nested<T: Merge + Clone>(target: &mut Option<T>, defaults: &Option<T>) {
    match (target.as_mut(), defaults) {
        (Some(t), Some(d)) => t.merge(d),
        (None, Some(d)) => *target = Some(d.clone()),
        _ => {}
    }
}

fn merge_map<V: Clone>(
    target: &mut Option<BTreeMap<String, V>>,
    defaults: &Option<BTreeMap<String, V>>,
) {
    let Some(defaults) = defaults else {
        return;
    };
    let merged = target.get_or_insert_with(BTreeMap::new);
    for (key, value) in defaults {
        merged.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

impl Merge for CpuSpec {
    fn merge(&mut self, defaults: &Self) {
        merge_scalar(&mut self.min, &defaults.min);
        merge_scalar(&mut self.max, &defaults.max);
    }
}

impl Merge for MemorySpec {
    fn merge(&mut self, defaults: &Self) {
        merge_scalar(&mut self.limit, &defaults.limit);
    }
}

impl Merge for ResourcesSpec {
    fn merge(&mut self, defaults: &Self) {
        merge_nested(&mut self.cpu, &defaults.cpu);
        merge_nested(&mut self.memory, &defaults.memory);
    }
}

impl Merge for ContainerLoggingSpec {
    fn merge(&mut self, defaults: &Self) {
        merge_scalar(&mut self.console, &defaults.console);
        merge_scalar(&mut self.file, &defaults.file);
        for (logger, level) in &defaults.loggers {
            self.loggers.entry(logger.clone()).or_insert(*level);
        }
    }
}

impl Merge for LoggingSpec {
    fn merge(&mut self, defaults: &Self) {
        match (self.containers.as_mut(), &defaults.containers) {
            (Some(containers), Some(default_containers)) => {
                for (name, spec) in default_containers {
                    containers
                        .entry(name.clone())
                        .and_modify(|c| c.merge(spec))
                        .or_insert_with(|| spec.clone());
                }
            }
            (None, Some(default_containers)) => {
                self.containers = Some(default_containers.clone())
            }
            _ => {}
        }
        merge_scalar(&mut self.enable_vector_agent, &defaults.enable_vector_agent);
    }
}

impl Merge for HistoryServerConfig {
    fn merge(&mut self, defaults: &Self) {
        merge_nested(&mut self.resources, &defaults.resources);
        merge_scalar(
            &mut self.graceful_shutdown_timeout,
            &defaults.graceful_shutdown_timeout,
        );
        merge_map(&mut self.node_selector, &defaults.node_selector);
        merge_scalar(&mut self.tolerations, &defaults.tolerations);
        merge_nested(&mut self.logging, &defaults.logging);
        merge_scalar(&mut self.cleaner, &defaults.cleaner);
    }
}

impl Merge for S3ConnectionSpec {
    fn merge(&mut self, defaults: &Self) {
        merge_scalar(&mut self.host, &defaults.host);
        merge_scalar(&mut self.port, &defaults.port);
        merge_scalar(&mut self.region, &defaults.region);
        merge_scalar(&mut self.path_style, &defaults.path_style);
        merge_scalar(&mut self.tls, &defaults.tls);
        merge_scalar(&mut self.credentials, &defaults.credentials);
    }
}

/// Merge override blocks; `specific` wins over `broader`
///
/// Fails only when the pod overrides cannot be combined.
pub fn merge_overrides(
    specific: &OverridesSpec,
    broader: &OverridesSpec,
) -> Result<OverridesSpec, Error> {
    let mut merged = specific.clone();
    merge_scalar(&mut merged.command_overrides, &broader.command_overrides);
    merge_map(&mut merged.env_overrides, &broader.env_overrides);

    if let Some(broader_files) = &broader.config_overrides {
        let files = merged.config_overrides.get_or_insert_with(BTreeMap::new);
        for (file, properties) in broader_files {
            let entry = files.entry(file.clone()).or_default();
            for (key, value) in properties {
                entry.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }

    merged.pod_overrides = match (&broader.pod_overrides, &specific.pod_overrides) {
        (Some(base), Some(overlay)) => Some(deep_merge_json(base, overlay, "podOverrides")?),
        (base, overlay) => overlay.clone().or_else(|| base.clone()),
    };
    Ok(merged)
}

/// Deep merge `overlay` onto `base`
///
/// Objects merge key by key and `null` in the overlay keeps the base value.
/// Lists of named entries (containers, volumes, env and the like) merge by
/// `name`: matching entries merge recursively in place, new names are
/// appended. Other arrays and scalars in the overlay replace the base.
/// Combining an object with any other non-null value fails with the JSON path
/// of the conflict.
pub fn deep_merge_json(base: &Value, overlay: &Value, path: &str) -> Result<Value, Error> {
    match (base, overlay) {
        (_, Value::Null) => Ok(base.clone()),
        (Value::Null, _) => Ok(overlay.clone()),
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let child_path = format!("{path}.{key}");
                let next = match base_map.get(key) {
                    Some(existing) => deep_merge_json(existing, value, &child_path)?,
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Ok(Value::Object(merged))
        }
        (Value::Array(base_items), Value::Array(overlay_items))
            if is_named_list(base_items) && is_named_list(overlay_items) =>
        {
            merge_named_list(base_items, overlay_items, path)
        }
        (Value::Object(_), other) | (other, Value::Object(_)) => Err(Error::merge(
            path,
            format!("cannot combine an object with {}", json_type(other)),
        )),
        (_, overlay) => Ok(overlay.clone()),
    }
}

fn entry_name(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

/// A non-empty array whose every element is an object with a string `name`
fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| entry_name(item).is_some())
}

fn merge_named_list(base: &[Value], overlay: &[Value], path: &str) -> Result<Value, Error> {
    let mut merged = base.to_vec();
    for item in overlay {
        let name = entry_name(item).unwrap_or_default();
        match merged.iter().position(|existing| entry_name(existing) == Some(name)) {
            Some(index) => {
                let child_path = format!("{path}[{name}]");
                merged[index] = deep_merge_json(&merged[index], item, &child_path)?;
            }
            None => merged.push(item.clone()),
        }
    }
    Ok(Value::Array(merged))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Effective config
// =============================================================================

/// Product defaults and cluster-wide settings, the broadest merge level
#[derive(Clone, Debug)]
pub struct ClusterDefaults {
    /// Product defaults for every role group
    pub config: HistoryServerConfig,
    /// Cluster-wide settings carried into every effective config
    pub cluster_config: ClusterConfigSpec,
}

impl ClusterDefaults {
    /// Product defaults combined with the given cluster config
    pub fn new(cluster_config: ClusterConfigSpec) -> Self {
        Self {
            config: product_defaults(),
            cluster_config,
        }
    }
}

/// Product defaults of the history server
pub fn product_defaults() -> HistoryServerConfig {
    HistoryServerConfig {
        resources: Some(ResourcesSpec {
            cpu: Some(CpuSpec {
                min: Some(DEFAULT_CPU_MIN.to_string()),
                max: Some(DEFAULT_CPU_MAX.to_string()),
            }),
            memory: Some(MemorySpec {
                limit: Some(DEFAULT_MEMORY.to_string()),
            }),
        }),
        graceful_shutdown_timeout: Some(DEFAULT_GRACEFUL_SHUTDOWN.to_string()),
        logging: Some(LoggingSpec {
            containers: None,
            enable_vector_agent: Some(true),
        }),
        cleaner: Some(false),
        ..Default::default()
    }
}

/// Compute resources after merging
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveResources {
    /// CPU request
    pub cpu_min: String,
    /// CPU limit
    pub cpu_max: String,
    /// Memory request and limit
    pub memory: String,
}

/// Fully merged configuration of one role group
///
/// A pure function of the desired state; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveConfig {
    /// Role group name
    pub role_group: String,
    /// Configured replica count (before the stopped override)
    pub replicas: i32,
    /// Main container resources
    pub resources: EffectiveResources,
    /// Termination grace period
    pub graceful_shutdown: Duration,
    /// Pod node selector
    pub node_selector: BTreeMap<String, String>,
    /// Pod tolerations
    pub tolerations: Vec<Toleration>,
    /// Per-container logging
    pub logging: BTreeMap<String, ContainerLoggingSpec>,
    /// Whether the vector agent may run when an aggregator is configured
    pub enable_vector_agent: bool,
    /// Event log cleaner requested for this group
    pub cleaner: bool,
    /// Replacement for the main container command
    pub command_overrides: Option<Vec<String>>,
    /// Extra environment of the main container
    pub env_overrides: BTreeMap<String, String>,
    /// Extra properties per generated file
    pub config_overrides: BTreeMap<String, BTreeMap<String, String>>,
    /// Partial pod template merged into the generated one
    pub pod_overrides: Option<Value>,
    /// Service exposure
    pub listener_class: ListenerClass,
    /// Event log location
    pub log_file_directory: Option<LogFileDirectorySpec>,
    /// UI authentication
    pub authentication: Option<AuthenticationSpec>,
    /// Vector aggregator discovery ConfigMap
    pub vector_aggregator: Option<String>,
    /// UI ingress
    pub ingress: Option<IngressSpec>,
}

impl EffectiveConfig {
    /// Whether a vector sidecar ships this group's logs
    pub fn log_shipping_enabled(&self) -> bool {
        self.enable_vector_agent && self.vector_aggregator.is_some()
    }

    /// Termination grace period in whole seconds
    pub fn termination_grace_period_seconds(&self) -> i64 {
        i64::try_from(self.graceful_shutdown.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Merge the levels for one role group
///
/// `owner` only labels validation errors.
pub fn merge_role_group(
    owner: &str,
    cluster: &ClusterDefaults,
    role: &RoleSpec,
    group_name: &str,
    group: &RoleGroupSpec,
) -> Result<EffectiveConfig, Error> {
    let mut config = group.config.clone().unwrap_or_default();
    if let Some(role_config) = &role.config {
        config.merge(role_config);
    }
    config.merge(&cluster.config);

    let overrides = merge_overrides(&group.overrides, &role.overrides)?;

    let replicas = group.replicas.or(role.replicas).unwrap_or(DEFAULT_REPLICAS);
    if replicas < 0 {
        return Err(Error::validation_for_field(
            owner,
            format!("spec.node.roleGroups.{group_name}.replicas"),
            format!("replicas must not be negative, got {replicas}"),
        ));
    }

    let graceful_shutdown = parse_duration(
        owner,
        group_name,
        config
            .graceful_shutdown_timeout
            .as_deref()
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN),
    )?;

    let resources = config.resources.unwrap_or_default();
    let cpu = resources.cpu.unwrap_or_default();
    let memory = resources.memory.unwrap_or_default();
    let logging = config.logging.unwrap_or_default();

    Ok(EffectiveConfig {
        role_group: group_name.to_string(),
        replicas,
        resources: EffectiveResources {
            cpu_min: cpu.min.unwrap_or_else(|| DEFAULT_CPU_MIN.to_string()),
            cpu_max: cpu.max.unwrap_or_else(|| DEFAULT_CPU_MAX.to_string()),
            memory: memory.limit.unwrap_or_else(|| DEFAULT_MEMORY.to_string()),
        },
        graceful_shutdown,
        node_selector: config.node_selector.unwrap_or_default(),
        tolerations: config.tolerations.unwrap_or_default(),
        logging: logging.containers.unwrap_or_default(),
        enable_vector_agent: logging.enable_vector_agent.unwrap_or(true),
        cleaner: config.cleaner.unwrap_or(false),
        command_overrides: overrides.command_overrides,
        env_overrides: overrides.env_overrides.unwrap_or_default(),
        config_overrides: overrides.config_overrides.unwrap_or_default(),
        pod_overrides: overrides.pod_overrides,
        listener_class: cluster.cluster_config.listener_class,
        log_file_directory: cluster.cluster_config.log_file_directory.clone(),
        authentication: cluster.cluster_config.authentication.clone(),
        vector_aggregator: cluster
            .cluster_config
            .vector_aggregator_config_map_name
            .clone()
            .filter(|name| !name.is_empty()),
        ingress: cluster.cluster_config.ingress.clone(),
    })
}

/// Parse a duration such as "30s", "1m30s" or "2h"
fn parse_duration(owner: &str, group_name: &str, value: &str) -> Result<Duration, Error> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        Error::validation_for_field(
            owner,
            format!("spec.node.roleGroups.{group_name}.config.gracefulShutdownTimeout"),
            format!("invalid duration '{value}': {e}"),
        )
    })
}
