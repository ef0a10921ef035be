//! External reference resolution
//!
//! Everything the builders need from other objects is resolved here once per
//! pass: the event log bucket (through optional S3Bucket and S3Connection
//! references), the OIDC provider of the AuthenticationClass, and the vector
//! aggregator address. Nothing is cached between passes.
//!
//! A named object that does not exist is [`Error::Reference`]. Store failures
//! propagate unchanged and stay transient.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use spark_history_common::crd::{
    AuthenticationClass, AuthenticationSpec, ClusterConfigSpec, OidcProvider, PersistenceSpec,
    S3Bucket, S3BucketRef, S3Connection, S3ConnectionRef, S3ConnectionSpec, S3Credentials,
};
use spark_history_common::Error;

use crate::merge::Merge;
use crate::store::{fetch, ObjectKind, ResourceStore};

/// Region used when the connection names none
pub const DEFAULT_REGION: &str = "us-west-1";
/// Key of the aggregator address in the vector discovery ConfigMap
pub const VECTOR_ADDRESS_KEY: &str = "ADDRESS";

/// A dependency that may not exist yet
#[derive(Clone, Debug, PartialEq)]
pub enum Readiness<T> {
    /// Resolved
    Ready(T),
    /// Not there yet; retry shortly
    Waiting(String),
}

/// Where S3 credentials come from
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialSource {
    /// Issued into the pod by a secret class
    SecretClass {
        /// Secret class name
        class: String,
        /// Scope annotation value, if any
        scope: Option<String>,
    },
    /// Literal key material stored in a generated Secret
    Static {
        /// Access key id
        access_key: String,
        /// Secret access key
        secret_key: String,
    },
}

/// A bucket with its connection fully resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBucket {
    /// `http(s)://host[:port]`
    pub endpoint: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Path-style addressing
    pub path_style: bool,
    /// TLS towards the endpoint
    pub tls: bool,
    /// Credentials, if the endpoint needs any
    pub credentials: Option<CredentialSource>,
}

impl ResolvedBucket {
    /// `s3a://` URL of a prefix inside the bucket
    pub fn s3a_url(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("s3a://{}/", self.bucket_name)
        } else {
            format!("s3a://{}/{}", self.bucket_name, prefix)
        }
    }
}

/// Resolved event log location
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogDirectory {
    /// Object storage
    S3 {
        /// Bucket holding the logs
        bucket: ResolvedBucket,
        /// Key prefix
        prefix: String,
    },
    /// Persistent volume
    Pvc(PersistenceSpec),
}

/// OIDC settings of the auth proxy
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOidc {
    /// Provider of the AuthenticationClass
    pub provider: OidcProvider,
    /// Secret holding CLIENT_ID and CLIENT_SECRET
    pub client_credentials_secret: String,
    /// Scopes requested in addition to the defaults
    pub extra_scopes: Vec<String>,
}

impl ResolvedOidc {
    /// Issuer URL; ports 0 and 80 are left out
    pub fn issuer_url(&self) -> String {
        let host = match self.provider.port {
            Some(port) if port != 0 && port != 80 => {
                format!("{}:{port}", self.provider.hostname)
            }
            _ => self.provider.hostname.clone(),
        };
        let path = self.provider.root_path.trim_start_matches('/');
        format!("http://{host}/{path}")
    }

    /// Space separated scopes: the defaults, the provider's, then the extras
    pub fn scopes(&self) -> String {
        let mut scopes: Vec<&str> = vec!["openid", "email", "profile"];
        for scope in self
            .provider
            .scopes
            .iter()
            .chain(self.extra_scopes.iter())
        {
            if !scopes.contains(&scope.as_str()) {
                scopes.push(scope.as_str());
            }
        }
        scopes.join(" ")
    }

    /// Provider name understood by oauth2-proxy
    pub fn proxy_provider(&self) -> String {
        match self.provider.provider_hint.as_deref() {
            Some("keycloak") => "keycloak-oidc".to_string(),
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => "oidc".to_string(),
        }
    }
}

/// Every external reference of one SparkHistoryServer
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRefs {
    /// Event log location
    pub log_directory: Option<LogDirectory>,
    /// Auth proxy settings
    pub oidc: Option<ResolvedOidc>,
    /// Vector aggregator address
    pub vector_address: Option<String>,
}

impl ResolvedRefs {
    /// Bucket of S3 event log storage
    pub fn s3_bucket(&self) -> Option<&ResolvedBucket> {
        match &self.log_directory {
            Some(LogDirectory::S3 { bucket, .. }) => Some(bucket),
            _ => None,
        }
    }

    /// Persistence of PVC event log storage
    pub fn pvc(&self) -> Option<&PersistenceSpec> {
        match &self.log_directory {
            Some(LogDirectory::Pvc(persistence)) => Some(persistence),
            _ => None,
        }
    }
}

/// Resolve every reference in the cluster config
///
/// The vector discovery ConfigMap is only looked up when `ships_logs` is set,
/// so a cluster whose groups all disable the agent never waits on it.
pub async fn resolve_all(
    store: &dyn ResourceStore,
    owner: &str,
    namespace: &str,
    cluster_config: &ClusterConfigSpec,
    ships_logs: bool,
) -> Result<Readiness<ResolvedRefs>, Error> {
    let log_directory = match &cluster_config.log_file_directory {
        None => None,
        Some(dir) => match (&dir.s3, &dir.persistent_volume_claim) {
            (Some(s3), None) => Some(LogDirectory::S3 {
                bucket: resolve_bucket(store, owner, namespace, &s3.bucket).await?,
                prefix: s3.prefix.clone(),
            }),
            (None, Some(pvc)) => Some(LogDirectory::Pvc(pvc.clone())),
            _ => {
                return Err(Error::validation_for_field(
                    owner,
                    "spec.clusterConfig.logFileDirectory",
                    "exactly one of s3 or persistentVolumeClaim must be set",
                ))
            }
        },
    };

    let oidc = match &cluster_config.authentication {
        Some(auth) => Some(resolve_authentication(store, owner, auth).await?),
        None => None,
    };

    let vector_address = match cluster_config
        .vector_aggregator_config_map_name
        .as_deref()
        .filter(|name| ships_logs && !name.is_empty())
    {
        Some(name) => match resolve_vector_address(store, namespace, name).await? {
            Readiness::Ready(address) => Some(address),
            Readiness::Waiting(reason) => return Ok(Readiness::Waiting(reason)),
        },
        None => None,
    };

    Ok(Readiness::Ready(ResolvedRefs {
        log_directory,
        oidc,
        vector_address,
    }))
}

/// Resolve a bucket reference in the owner's namespace
///
/// Inline connection fields fill in whatever a referenced S3Connection leaves
/// unset; the referenced object wins on conflict.
pub async fn resolve_bucket(
    store: &dyn ResourceStore,
    owner: &str,
    namespace: &str,
    bucket: &S3BucketRef,
) -> Result<ResolvedBucket, Error> {
    let spec = match (&bucket.inline, &bucket.reference) {
        (Some(inline), None) => inline.clone(),
        (None, Some(name)) => {
            fetch::<S3Bucket>(store, ObjectKind::S3Bucket, namespace, name)
                .await?
                .ok_or_else(|| Error::reference(ObjectKind::S3Bucket.as_str(), namespace, name))?
                .spec
        }
        _ => {
            return Err(Error::validation_for_field(
                owner,
                "spec.clusterConfig.logFileDirectory.s3.bucket",
                "exactly one of inline or reference must be set",
            ))
        }
    };

    if spec.bucket_name.is_empty() {
        return Err(Error::validation_for(owner, "S3 bucket name must not be empty"));
    }

    let connection = resolve_connection(store, namespace, &spec.connection).await?;
    let host = connection
        .host
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::validation_for(owner, "S3 connection has no host"))?;
    let tls = connection.tls.unwrap_or(false);
    let scheme = if tls { "https" } else { "http" };
    let endpoint = match connection.port {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    };

    let credentials = connection
        .credentials
        .as_ref()
        .map(|c| credential_source(owner, c))
        .transpose()?;

    debug!(bucket = %spec.bucket_name, %endpoint, "resolved S3 bucket");
    Ok(ResolvedBucket {
        endpoint,
        bucket_name: spec.bucket_name,
        region: connection
            .region
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        path_style: connection.path_style.unwrap_or(false),
        tls,
        credentials,
    })
}

async fn resolve_connection(
    store: &dyn ResourceStore,
    namespace: &str,
    connection: &S3ConnectionRef,
) -> Result<S3ConnectionSpec, Error> {
    let mut spec = match &connection.reference {
        Some(name) => {
            fetch::<S3Connection>(store, ObjectKind::S3Connection, namespace, name)
                .await?
                .ok_or_else(|| {
                    Error::reference(ObjectKind::S3Connection.as_str(), namespace, name)
                })?
                .spec
        }
        None => S3ConnectionSpec::default(),
    };
    if let Some(inline) = &connection.inline {
        spec.merge(inline);
    }
    Ok(spec)
}

fn credential_source(owner: &str, credentials: &S3Credentials) -> Result<CredentialSource, Error> {
    match (
        &credentials.secret_class,
        &credentials.access_key,
        &credentials.secret_key,
    ) {
        (Some(class), None, None) => Ok(CredentialSource::SecretClass {
            class: class.clone(),
            scope: credentials
                .scope
                .as_ref()
                .map(|s| s.annotation_value())
                .filter(|s| !s.is_empty()),
        }),
        (None, Some(access_key), Some(secret_key)) => Ok(CredentialSource::Static {
            access_key: access_key.clone(),
            secret_key: secret_key.clone(),
        }),
        _ => Err(Error::validation_for(
            owner,
            "S3 credentials need exactly one of secretClass or accessKey with secretKey",
        )),
    }
}

/// Resolve the OIDC provider behind an AuthenticationClass
pub async fn resolve_authentication(
    store: &dyn ResourceStore,
    owner: &str,
    auth: &AuthenticationSpec,
) -> Result<ResolvedOidc, Error> {
    let oidc = auth.oidc.as_ref().ok_or_else(|| {
        Error::validation_for_field(
            owner,
            "spec.clusterConfig.authentication.oidc",
            "only OIDC authentication is supported; oidc must be set",
        )
    })?;

    let class = fetch::<AuthenticationClass>(
        store,
        ObjectKind::AuthenticationClass,
        "",
        &auth.authentication_class,
    )
    .await?
    .ok_or_else(|| {
        Error::reference(
            ObjectKind::AuthenticationClass.as_str(),
            "",
            &auth.authentication_class,
        )
    })?;

    let provider = class.spec.provider.oidc.ok_or_else(|| {
        Error::validation_for(
            owner,
            format!(
                "AuthenticationClass {} has no oidc provider",
                auth.authentication_class
            ),
        )
    })?;

    Ok(ResolvedOidc {
        provider,
        client_credentials_secret: oidc.client_credentials_secret.clone(),
        extra_scopes: oidc.extra_scopes.clone(),
    })
}

/// Read the aggregator address from the vector discovery ConfigMap
pub async fn resolve_vector_address(
    store: &dyn ResourceStore,
    namespace: &str,
    config_map: &str,
) -> Result<Readiness<String>, Error> {
    let data: Option<BTreeMap<String, String>> = fetch::<k8s_openapi::api::core::v1::ConfigMap>(
        store,
        ObjectKind::ConfigMap,
        namespace,
        config_map,
    )
    .await?
    .map(|cm| cm.data.unwrap_or_default());

    let Some(data) = data else {
        return Ok(Readiness::Waiting(format!(
            "vector aggregator discovery ConfigMap {namespace}/{config_map} does not exist yet"
        )));
    };
    match data.get(VECTOR_ADDRESS_KEY).filter(|a| !a.is_empty()) {
        Some(address) => Ok(Readiness::Ready(address.clone())),
        None => Ok(Readiness::Waiting(format!(
            "vector aggregator discovery ConfigMap {namespace}/{config_map} has no {VECTOR_ADDRESS_KEY}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::MockResourceStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::error::ErrorResponse;
    use spark_history_common::crd::{
        AuthenticationClassSpec, AuthenticationProvider, CredentialScope, LogFileDirectorySpec,
        OidcSpec, S3BucketSpec, S3LogFileSpec,
    };
    use spark_history_common::ErrorCategory;
    use std::collections::BTreeSet;

    const NS: &str = "spark";

    fn connection_spec() -> S3ConnectionSpec {
        S3ConnectionSpec {
            host: Some("minio.storage.svc".to_string()),
            port: Some(9000),
            region: None,
            path_style: Some(true),
            tls: Some(false),
            credentials: Some(S3Credentials {
                secret_class: Some("s3-credentials".to_string()),
                scope: Some(CredentialScope {
                    node: false,
                    pod: true,
                    services: BTreeSet::new(),
                }),
                ..Default::default()
            }),
        }
    }

    fn inline_bucket() -> S3BucketRef {
        S3BucketRef {
            inline: Some(S3BucketSpec {
                bucket_name: "spark-logs".to_string(),
                connection: S3ConnectionRef {
                    inline: Some(connection_spec()),
                    reference: None,
                },
            }),
            reference: None,
        }
    }

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "backing store unavailable".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code,
        }))
    }

    // =========================================================================
    // Story Tests: Bucket resolution
    // =========================================================================

    /// Story: A fully referenced bucket resolves to the same result as an
    /// inline one describing the same endpoint
    #[tokio::test]
    async fn story_referenced_bucket_matches_inline() {
        let store = MemoryStore::new();
        store.insert(
            ObjectKind::S3Connection,
            NS,
            "minio",
            &S3Connection::new("minio", connection_spec()),
        );
        store.insert(
            ObjectKind::S3Bucket,
            NS,
            "logs",
            &S3Bucket::new(
                "logs",
                S3BucketSpec {
                    bucket_name: "spark-logs".to_string(),
                    connection: S3ConnectionRef {
                        inline: None,
                        reference: Some("minio".to_string()),
                    },
                },
            ),
        );

        let inline = resolve_bucket(&store, "history", NS, &inline_bucket())
            .await
            .expect("inline bucket");
        let referenced = resolve_bucket(
            &store,
            "history",
            NS,
            &S3BucketRef {
                inline: None,
                reference: Some("logs".to_string()),
            },
        )
        .await
        .expect("referenced bucket");

        assert_eq!(inline, referenced);
        assert_eq!(inline.endpoint, "http://minio.storage.svc:9000");
        assert_eq!(inline.region, DEFAULT_REGION);
        assert!(inline.path_style);
        assert_eq!(
            inline.credentials,
            Some(CredentialSource::SecretClass {
                class: "s3-credentials".to_string(),
                scope: Some("pod".to_string()),
            })
        );
    }

    /// Story: Inline connection fields only fill gaps of the referenced one
    #[tokio::test]
    async fn story_inline_connection_is_a_fallback() {
        let store = MemoryStore::new();
        store.insert(
            ObjectKind::S3Connection,
            NS,
            "minio",
            &S3Connection::new(
                "minio",
                S3ConnectionSpec {
                    host: Some("referenced.example".to_string()),
                    tls: Some(true),
                    ..Default::default()
                },
            ),
        );
        let bucket = S3BucketRef {
            inline: Some(S3BucketSpec {
                bucket_name: "spark-logs".to_string(),
                connection: S3ConnectionRef {
                    inline: Some(S3ConnectionSpec {
                        host: Some("inline.example".to_string()),
                        region: Some("eu-central-1".to_string()),
                        ..Default::default()
                    }),
                    reference: Some("minio".to_string()),
                },
            }),
            reference: None,
        };

        let resolved = resolve_bucket(&store, "history", NS, &bucket)
            .await
            .expect("bucket");
        assert_eq!(resolved.endpoint, "https://referenced.example");
        assert_eq!(resolved.region, "eu-central-1");
        assert!(resolved.credentials.is_none());
    }

    /// Story: A missing named bucket is a reference error, not a transient one
    #[tokio::test]
    async fn story_missing_bucket_is_a_reference_error() {
        let store = MemoryStore::new();
        let err = resolve_bucket(
            &store,
            "history",
            NS,
            &S3BucketRef {
                inline: None,
                reference: Some("absent".to_string()),
            },
        )
        .await
        .expect_err("bucket is missing");

        assert_eq!(err.category(), ErrorCategory::Reference);
        assert_eq!(err.to_string(), "S3Bucket spark/absent not found");
    }

    /// Story: Store failures stay transient so the pass is retried
    #[tokio::test]
    async fn story_store_failure_is_transient() {
        let mut store = MockResourceStore::new();
        store
            .expect_get()
            .returning(|_, _, _| Err(api_error(503)));

        let err = resolve_bucket(
            &store,
            "history",
            NS,
            &S3BucketRef {
                inline: None,
                reference: Some("logs".to_string()),
            },
        )
        .await
        .expect_err("store is down");
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn bucket_ref_needs_exactly_one_source() {
        let store = MemoryStore::new();
        let err = resolve_bucket(&store, "history", NS, &S3BucketRef::default())
            .await
            .expect_err("neither inline nor reference");
        assert_eq!(err.category(), ErrorCategory::Validation);

        let mut both = inline_bucket();
        both.reference = Some("logs".to_string());
        assert!(resolve_bucket(&store, "history", NS, &both).await.is_err());
    }

    #[tokio::test]
    async fn static_credentials_and_tls() {
        let store = MemoryStore::new();
        let mut bucket = inline_bucket();
        if let Some(spec) = bucket.inline.as_mut() {
            spec.connection.inline = Some(S3ConnectionSpec {
                host: Some("s3.example".to_string()),
                tls: Some(true),
                credentials: Some(S3Credentials {
                    access_key: Some("AKIA".to_string()),
                    secret_key: Some("secret".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        let resolved = resolve_bucket(&store, "history", NS, &bucket)
            .await
            .expect("bucket");
        assert_eq!(resolved.endpoint, "https://s3.example");
        assert!(!resolved.path_style);
        assert_eq!(
            resolved.credentials,
            Some(CredentialSource::Static {
                access_key: "AKIA".to_string(),
                secret_key: "secret".to_string(),
            })
        );
        assert_eq!(resolved.s3a_url("/events/"), "s3a://spark-logs/events");
        assert_eq!(resolved.s3a_url(""), "s3a://spark-logs/");
    }

    #[tokio::test]
    async fn mixed_credentials_are_rejected() {
        let store = MemoryStore::new();
        let mut bucket = inline_bucket();
        if let Some(spec) = bucket.inline.as_mut() {
            if let Some(conn) = spec.connection.inline.as_mut() {
                conn.credentials = Some(S3Credentials {
                    secret_class: Some("s3".to_string()),
                    access_key: Some("AKIA".to_string()),
                    ..Default::default()
                });
            }
        }
        let err = resolve_bucket(&store, "history", NS, &bucket)
            .await
            .expect_err("ambiguous credentials");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    // =========================================================================
    // Authentication and vector discovery
    // =========================================================================

    fn oidc_class() -> AuthenticationClass {
        AuthenticationClass::new(
            "keycloak",
            AuthenticationClassSpec {
                provider: AuthenticationProvider {
                    oidc: Some(OidcProvider {
                        hostname: "keycloak.auth.svc".to_string(),
                        port: Some(8080),
                        root_path: "/realms/kubedoop".to_string(),
                        provider_hint: Some("keycloak".to_string()),
                        scopes: vec!["groups".to_string(), "email".to_string()],
                    }),
                },
            },
        )
    }

    fn auth_spec() -> AuthenticationSpec {
        AuthenticationSpec {
            authentication_class: "keycloak".to_string(),
            oidc: Some(OidcSpec {
                client_credentials_secret: "oidc-client".to_string(),
                extra_scopes: vec!["offline_access".to_string()],
            }),
        }
    }

    /// Story: The AuthenticationClass is cluster-scoped and feeds the proxy
    #[tokio::test]
    async fn story_authentication_class_resolves_to_proxy_settings() {
        let store = MemoryStore::new();
        store.insert(ObjectKind::AuthenticationClass, "", "keycloak", &oidc_class());

        let oidc = resolve_authentication(&store, "history", &auth_spec())
            .await
            .expect("oidc");
        assert_eq!(oidc.client_credentials_secret, "oidc-client");
        assert_eq!(
            oidc.issuer_url(),
            "http://keycloak.auth.svc:8080/realms/kubedoop"
        );
        assert_eq!(oidc.scopes(), "openid email profile groups offline_access");
        assert_eq!(oidc.proxy_provider(), "keycloak-oidc");
    }

    #[tokio::test]
    async fn missing_authentication_class_is_a_reference_error() {
        let store = MemoryStore::new();
        let err = resolve_authentication(&store, "history", &auth_spec())
            .await
            .expect_err("class missing");
        assert_eq!(err.category(), ErrorCategory::Reference);
    }

    #[tokio::test]
    async fn authentication_class_without_oidc_is_invalid() {
        let store = MemoryStore::new();
        store.insert(
            ObjectKind::AuthenticationClass,
            "",
            "keycloak",
            &AuthenticationClass::new("keycloak", AuthenticationClassSpec::default()),
        );
        let err = resolve_authentication(&store, "history", &auth_spec())
            .await
            .expect_err("no oidc provider");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn issuer_omits_default_ports() {
        let mut oidc = ResolvedOidc {
            provider: OidcProvider {
                hostname: "idp".to_string(),
                port: Some(80),
                root_path: "/".to_string(),
                provider_hint: None,
                scopes: vec![],
            },
            client_credentials_secret: "c".to_string(),
            extra_scopes: vec![],
        };
        assert_eq!(oidc.issuer_url(), "http://idp/");
        oidc.provider.port = Some(0);
        assert_eq!(oidc.issuer_url(), "http://idp/");
        assert_eq!(oidc.proxy_provider(), "oidc");
        assert_eq!(oidc.scopes(), "openid email profile");
    }

    /// Story: The aggregator may be deployed after the server
    #[tokio::test]
    async fn story_missing_vector_discovery_waits() {
        let store = MemoryStore::new();
        let waiting = resolve_vector_address(&store, NS, "vector-aggregator")
            .await
            .expect("resolve");
        assert!(matches!(waiting, Readiness::Waiting(_)));

        store.insert(
            ObjectKind::ConfigMap,
            NS,
            "vector-aggregator",
            &ConfigMap {
                metadata: ObjectMeta {
                    name: Some("vector-aggregator".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    VECTOR_ADDRESS_KEY.to_string(),
                    "vector-aggregator.logging.svc:6000".to_string(),
                )])),
                ..Default::default()
            },
        );
        let ready = resolve_vector_address(&store, NS, "vector-aggregator")
            .await
            .expect("resolve");
        assert_eq!(
            ready,
            Readiness::Ready("vector-aggregator.logging.svc:6000".to_string())
        );
    }

    #[tokio::test]
    async fn vector_discovery_is_skipped_without_log_shipping() {
        let store = MemoryStore::new();
        let cluster_config = ClusterConfigSpec {
            vector_aggregator_config_map_name: Some("vector-aggregator".to_string()),
            ..Default::default()
        };

        let skipped = resolve_all(&store, "history", NS, &cluster_config, false)
            .await
            .expect("resolve");
        assert_eq!(skipped, Readiness::Ready(ResolvedRefs::default()));

        let waiting = resolve_all(&store, "history", NS, &cluster_config, true)
            .await
            .expect("resolve");
        assert!(matches!(waiting, Readiness::Waiting(_)));
    }

    #[tokio::test]
    async fn resolve_all_combines_references() {
        let store = MemoryStore::new();
        store.insert(ObjectKind::AuthenticationClass, "", "keycloak", &oidc_class());

        let cluster_config = ClusterConfigSpec {
            log_file_directory: Some(LogFileDirectorySpec {
                s3: Some(S3LogFileSpec {
                    bucket: inline_bucket(),
                    prefix: "events".to_string(),
                }),
                persistent_volume_claim: None,
            }),
            authentication: Some(auth_spec()),
            ..Default::default()
        };
        let Readiness::Ready(refs) = resolve_all(&store, "history", NS, &cluster_config, false)
            .await
            .expect("resolve")
        else {
            panic!("references should be ready");
        };
        assert_eq!(
            refs.s3_bucket().map(|b| b.bucket_name.as_str()),
            Some("spark-logs")
        );
        assert!(refs.pvc().is_none());
        assert!(refs.oidc.is_some());
        assert!(refs.vector_address.is_none());
    }

    #[tokio::test]
    async fn log_directory_needs_exactly_one_backend() {
        let store = MemoryStore::new();
        let cluster_config = ClusterConfigSpec {
            log_file_directory: Some(LogFileDirectorySpec::default()),
            ..Default::default()
        };
        let err = resolve_all(&store, "history", NS, &cluster_config, false)
            .await
            .expect_err("empty log directory");
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
}
