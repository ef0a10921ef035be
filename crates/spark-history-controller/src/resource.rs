//! Dependent resources produced by the builders

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::discovery::ApiResource;
use serde_json::Value;

use spark_history_common::kube_utils::deterministic_hash;
use spark_history_common::Error;

/// Annotation holding the fingerprint of the last applied desired state
pub const APPLIED_HASH_ANNOTATION: &str = "spark.kubedoop.dev/applied-hash";

/// Resource families reported as separate status conditions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceFamily {
    /// ConfigMaps and credential Secrets
    Config,
    /// PersistentVolumeClaims
    Storage,
    /// StatefulSets
    Workload,
    /// Services and Ingresses
    Network,
    /// PodDisruptionBudgets
    DisruptionBudget,
}

impl ResourceFamily {
    /// Every family, in apply order
    pub const ALL: [ResourceFamily; 5] = [
        Self::Config,
        Self::Storage,
        Self::Workload,
        Self::Network,
        Self::DisruptionBudget,
    ];

    /// Status condition type reporting this family
    pub fn condition_type(&self) -> &'static str {
        match self {
            Self::Config => "ConfigReconciled",
            Self::Storage => "StorageReconciled",
            Self::Workload => "WorkloadReconciled",
            Self::Network => "NetworkReconciled",
            Self::DisruptionBudget => "DisruptionBudgetReconciled",
        }
    }
}

/// A dependent resource ready to be applied
#[derive(Clone, Debug, PartialEq)]
pub enum ChildResource {
    /// Config bundle
    ConfigMap(ConfigMap),
    /// Credential bundle
    Secret(Secret),
    /// Event log volume claim
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// Workload
    StatefulSet(StatefulSet),
    /// Network service
    Service(Service),
    /// Ingress route
    Ingress(Ingress),
    /// Role disruption budget
    PodDisruptionBudget(PodDisruptionBudget),
}

impl ChildResource {
    /// Kubernetes kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigMap(_) => "ConfigMap",
            Self::Secret(_) => "Secret",
            Self::PersistentVolumeClaim(_) => "PersistentVolumeClaim",
            Self::StatefulSet(_) => "StatefulSet",
            Self::Service(_) => "Service",
            Self::Ingress(_) => "Ingress",
            Self::PodDisruptionBudget(_) => "PodDisruptionBudget",
        }
    }

    /// Family the resource is reported under
    pub fn family(&self) -> ResourceFamily {
        match self {
            Self::ConfigMap(_) | Self::Secret(_) => ResourceFamily::Config,
            Self::PersistentVolumeClaim(_) => ResourceFamily::Storage,
            Self::StatefulSet(_) => ResourceFamily::Workload,
            Self::Service(_) | Self::Ingress(_) => ResourceFamily::Network,
            Self::PodDisruptionBudget(_) => ResourceFamily::DisruptionBudget,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ConfigMap(r) => &r.metadata,
            Self::Secret(r) => &r.metadata,
            Self::PersistentVolumeClaim(r) => &r.metadata,
            Self::StatefulSet(r) => &r.metadata,
            Self::Service(r) => &r.metadata,
            Self::Ingress(r) => &r.metadata,
            Self::PodDisruptionBudget(r) => &r.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// API resource used to address the object dynamically
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::ConfigMap(_) => ApiResource::erase::<ConfigMap>(&()),
            Self::Secret(_) => ApiResource::erase::<Secret>(&()),
            Self::PersistentVolumeClaim(_) => ApiResource::erase::<PersistentVolumeClaim>(&()),
            Self::StatefulSet(_) => ApiResource::erase::<StatefulSet>(&()),
            Self::Service(_) => ApiResource::erase::<Service>(&()),
            Self::Ingress(_) => ApiResource::erase::<Ingress>(&()),
            Self::PodDisruptionBudget(_) => ApiResource::erase::<PodDisruptionBudget>(&()),
        }
    }

    /// Serialize with apiVersion and kind set
    pub fn to_json(&self) -> Result<Value, Error> {
        let result = match self {
            Self::ConfigMap(r) => serde_json::to_value(r),
            Self::Secret(r) => serde_json::to_value(r),
            Self::PersistentVolumeClaim(r) => serde_json::to_value(r),
            Self::StatefulSet(r) => serde_json::to_value(r),
            Self::Service(r) => serde_json::to_value(r),
            Self::Ingress(r) => serde_json::to_value(r),
            Self::PodDisruptionBudget(r) => serde_json::to_value(r),
        };
        let mut json =
            result.map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))?;
        let ar = self.api_resource();
        if let Some(obj) = json.as_object_mut() {
            obj.insert("apiVersion".to_string(), Value::String(ar.api_version));
            obj.insert("kind".to_string(), Value::String(ar.kind));
        }
        Ok(json)
    }

    /// Fingerprint of the desired state, stable across passes
    pub fn fingerprint(&self) -> Result<String, Error> {
        let json = self.to_json()?;
        let canonical = serde_json::to_string(&json)
            .map_err(|e| Error::serialization_for_kind(self.kind(), e.to_string()))?;
        Ok(deterministic_hash(&canonical))
    }

    /// Desired state JSON carrying its fingerprint annotation
    pub fn to_apply_json(&self) -> Result<(Value, String), Error> {
        let fingerprint = self.fingerprint()?;
        let mut json = self.to_json()?;
        if let Some(metadata) = json.get_mut("metadata").and_then(Value::as_object_mut) {
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(
                    APPLIED_HASH_ANNOTATION.to_string(),
                    Value::String(fingerprint.clone()),
                );
            }
        }
        Ok((json, fingerprint))
    }
}

/// Fingerprint recorded on a stored object, if any
pub fn applied_fingerprint(stored: &Value) -> Option<&str> {
    stored
        .get("metadata")?
        .get("annotations")?
        .get(APPLIED_HASH_ANNOTATION)?
        .as_str()
}
