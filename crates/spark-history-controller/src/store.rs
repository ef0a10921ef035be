//! Backing-store access
//!
//! The reconcilers only ever fetch objects by name and upsert dependent
//! resources; they never rely on watches or caches. [`ResourceStore`] is that
//! narrow seam, implemented over the Kubernetes API by [`KubeStore`].

use std::future::Future;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use spark_history_common::crd::{
    AuthenticationClass, S3Bucket, S3Connection, SparkHistoryServerStatus,
};
use spark_history_common::kube_utils::patch_server_status;
use spark_history_common::Error;

use crate::resource::{ChildResource, APPLIED_HASH_ANNOTATION};

/// Kinds the reconcilers read by name
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    /// s3.kubedoop.dev S3Bucket
    S3Bucket,
    /// s3.kubedoop.dev S3Connection
    S3Connection,
    /// authentication.kubedoop.dev AuthenticationClass (cluster-scoped)
    AuthenticationClass,
    /// core ConfigMap
    ConfigMap,
    /// core Secret
    Secret,
}

impl ObjectKind {
    /// Kubernetes kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3Bucket => "S3Bucket",
            Self::S3Connection => "S3Connection",
            Self::AuthenticationClass => "AuthenticationClass",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::AuthenticationClass)
    }

    fn api_resource(&self) -> ApiResource {
        use k8s_openapi::api::core::v1::{ConfigMap, Secret};
        match self {
            Self::S3Bucket => ApiResource::erase::<S3Bucket>(&()),
            Self::S3Connection => ApiResource::erase::<S3Connection>(&()),
            Self::AuthenticationClass => ApiResource::erase::<AuthenticationClass>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an upsert
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The object existed with a different desired state and was patched
    Updated,
    /// The object already matched; the apply changed nothing
    Unchanged,
}

/// Fetch/upsert primitive the reconcilers are written against
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object by name; `Ok(None)` when it does not exist
    ///
    /// `namespace` is ignored for cluster-scoped kinds.
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, Error>;

    /// Create if absent, patch if changed, no-op if identical
    async fn apply(&self, resource: &ChildResource) -> Result<ApplyOutcome, Error>;

    /// Replace the status of a SparkHistoryServer
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SparkHistoryServerStatus,
    ) -> Result<(), Error>;
}

/// Fetch and deserialize an object
pub async fn fetch<T: DeserializeOwned>(
    store: &dyn ResourceStore,
    kind: ObjectKind,
    namespace: &str,
    name: &str,
) -> Result<Option<T>, Error> {
    match store.get(kind, namespace, name).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string())),
        None => Ok(None),
    }
}

/// Run a store call unless the pass is cancelled first
pub async fn cancellable<T>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}

// =============================================================================
// Kubernetes implementation
// =============================================================================

/// [`ResourceStore`] over the Kubernetes API using server-side apply
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    /// Create a store applying as `field_manager`
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn dynamic_api(&self, ar: &ApiResource, namespaced: bool, namespace: &str) -> Api<DynamicObject> {
        if namespaced {
            Api::namespaced_with(self.client.clone(), namespace, ar)
        } else {
            Api::all_with(self.client.clone(), ar)
        }
    }
}

/// Classify a server-side apply by the resourceVersion before and after
///
/// The API server leaves the version alone when an apply changes nothing.
pub fn apply_outcome(before: Option<&str>, existed: bool, after: Option<&str>) -> ApplyOutcome {
    if !existed {
        ApplyOutcome::Created
    } else if before.is_some() && before == after {
        ApplyOutcome::Unchanged
    } else {
        ApplyOutcome::Updated
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>, Error> {
        let api = self.dynamic_api(&kind.api_resource(), kind.is_namespaced(), namespace);
        match api.get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn apply(&self, resource: &ChildResource) -> Result<ApplyOutcome, Error> {
        let namespace = resource.namespace().ok_or_else(|| {
            Error::internal_with_context(
                "store",
                format!("{} {} has no namespace", resource.kind(), resource.name()),
            )
        })?;
        let api = self.dynamic_api(&resource.api_resource(), true, namespace);
        let (json, fingerprint) = resource.to_apply_json()?;

        let existing = api.get_opt(resource.name()).await?;
        let matched_fingerprint = existing.as_ref().is_some_and(|existing| {
            existing
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(APPLIED_HASH_ANNOTATION))
                == Some(&fingerprint)
        });

        // Always sent: an unchanged desired state may still have drifted live.
        let params = PatchParams::apply(&self.field_manager).force();
        let applied = api
            .patch(resource.name(), &params, &Patch::Apply(&json))
            .await?;

        let outcome = apply_outcome(
            existing
                .as_ref()
                .and_then(|e| e.metadata.resource_version.as_deref()),
            existing.is_some(),
            applied.metadata.resource_version.as_deref(),
        );
        if matched_fingerprint && outcome == ApplyOutcome::Updated {
            info!(kind = resource.kind(), name = resource.name(), "repaired drifted resource");
        }
        debug!(kind = resource.kind(), name = resource.name(), ?outcome, "resource applied");
        Ok(outcome)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &SparkHistoryServerStatus,
    ) -> Result<(), Error> {
        patch_server_status(&self.client, name, namespace, status, &self.field_manager).await
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// In-memory [`ResourceStore`] recording every write, for tests
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;
    use crate::resource::applied_fingerprint;

    /// One upsert seen by the store
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct AppliedRecord {
        /// Kubernetes kind
        pub kind: String,
        /// Object name
        pub name: String,
        /// Result of the upsert
        pub outcome: ApplyOutcome,
    }

    type Key = (String, String, String);

    /// Objects keyed by (kind, namespace, name)
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<BTreeMap<Key, Value>>,
        applied: Mutex<Vec<AppliedRecord>>,
        statuses: Mutex<Vec<SparkHistoryServerStatus>>,
    }

    impl MemoryStore {
        /// Empty store
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed an object readable through [`ResourceStore::get`]
        pub fn insert(
            &self,
            kind: ObjectKind,
            namespace: &str,
            name: &str,
            object: &impl serde::Serialize,
        ) {
            let namespace = if kind.is_namespaced() { namespace } else { "" };
            let value = serde_json::to_value(object).expect("serializable test object");
            self.lock_objects().insert(
                (kind.as_str().to_string(), namespace.to_string(), name.to_string()),
                value,
            );
        }

        /// Overwrite a stored object the way another writer would
        pub fn overwrite(&self, kind: &str, namespace: &str, name: &str, object: Value) {
            self.lock_objects().insert(
                (kind.to_string(), namespace.to_string(), name.to_string()),
                object,
            );
        }

        /// Remove a seeded or applied object
        pub fn remove(&self, kind: &str, namespace: &str, name: &str) {
            self.lock_objects().remove(&(
                kind.to_string(),
                namespace.to_string(),
                name.to_string(),
            ));
        }

        /// Stored object of the given kind
        pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
            self.lock_objects()
                .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
                .cloned()
        }

        /// Stored object deserialized into `T`
        pub fn typed<T: DeserializeOwned>(
            &self,
            kind: &str,
            namespace: &str,
            name: &str,
        ) -> Option<T> {
            self.object(kind, namespace, name)
                .and_then(|v| serde_json::from_value(v).ok())
        }

        /// Names of stored objects of one kind
        pub fn names_of(&self, kind: &str) -> Vec<String> {
            self.lock_objects()
                .keys()
                .filter(|(k, _, _)| k == kind)
                .map(|(_, _, name)| name.clone())
                .collect()
        }

        /// Every upsert in order
        pub fn applied(&self) -> Vec<AppliedRecord> {
            self.applied.lock().expect("applied lock").clone()
        }

        /// Forget recorded upserts, keeping stored objects
        pub fn clear_applied(&self) {
            self.applied.lock().expect("applied lock").clear();
        }

        /// Every status written, oldest first
        pub fn statuses(&self) -> Vec<SparkHistoryServerStatus> {
            self.statuses.lock().expect("status lock").clone()
        }

        fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<Key, Value>> {
            self.objects.lock().expect("objects lock")
        }
    }

    #[async_trait]
    impl ResourceStore for MemoryStore {
        async fn get(
            &self,
            kind: ObjectKind,
            namespace: &str,
            name: &str,
        ) -> Result<Option<Value>, Error> {
            let namespace = if kind.is_namespaced() { namespace } else { "" };
            Ok(self.object(kind.as_str(), namespace, name))
        }

        async fn apply(&self, resource: &ChildResource) -> Result<ApplyOutcome, Error> {
            let (json, fingerprint) = resource.to_apply_json()?;
            let key = (
                resource.kind().to_string(),
                resource.namespace().unwrap_or_default().to_string(),
                resource.name().to_string(),
            );

            let outcome = {
                let mut objects = self.lock_objects();
                let outcome = match objects.get(&key) {
                    Some(existing) if *existing == json => ApplyOutcome::Unchanged,
                    Some(existing) => {
                        if applied_fingerprint(existing) == Some(fingerprint.as_str()) {
                            debug!(kind = resource.kind(), name = resource.name(), "repairing drift");
                        }
                        ApplyOutcome::Updated
                    }
                    None => ApplyOutcome::Created,
                };
                if outcome != ApplyOutcome::Unchanged {
                    objects.insert(key, json);
                }
                outcome
            };

            self.applied
                .lock()
                .expect("applied lock")
                .push(AppliedRecord {
                    kind: resource.kind().to_string(),
                    name: resource.name().to_string(),
                    outcome,
                });
            Ok(outcome)
        }

        async fn patch_status(
            &self,
            _namespace: &str,
            _name: &str,
            status: &SparkHistoryServerStatus,
        ) -> Result<(), Error> {
            self.statuses
                .lock()
                .expect("status lock")
                .push(status.clone());
            Ok(())
        }
    }
}
