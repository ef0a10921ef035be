//! S3Bucket and S3Connection CRD types
//!
//! A bucket is referenced from a SparkHistoryServer either inline or by name.
//! A bucket's connection is in turn inline or a reference to a named
//! `S3Connection`, so one connection can be shared by many buckets.

use std::collections::BTreeSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Credentials
// =============================================================================

/// Scope of a secret-class issued credential volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialScope {
    /// Bind the credential to the node the pod runs on
    #[serde(default)]
    pub node: bool,

    /// Bind the credential to the pod identity
    #[serde(default)]
    pub pod: bool,

    /// Bind the credential to these service names
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub services: BTreeSet<String>,
}

impl CredentialScope {
    /// Render as the comma-separated scope annotation value
    pub fn annotation_value(&self) -> String {
        let mut parts = Vec::new();
        if self.node {
            parts.push("node".to_string());
        }
        if self.pod {
            parts.push("pod".to_string());
        }
        parts.extend(self.services.iter().map(|s| format!("service={s}")));
        parts.join(",")
    }
}

/// Access credentials for an S3 endpoint
///
/// Exactly one of `secretClass` or the literal `accessKey`/`secretKey` pair
/// must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    /// Secret class that issues the credentials into the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_class: Option<String>,

    /// Scope of the issued credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<CredentialScope>,

    /// Literal access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Literal secret key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

// =============================================================================
// S3Connection
// =============================================================================

/// Connection details for an S3-compatible endpoint
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3.kubedoop.dev",
    version = "v1alpha1",
    kind = "S3Connection",
    plural = "s3connections",
    namespaced,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3ConnectionSpec {
    /// Endpoint host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Endpoint port; omitted from the endpoint URL when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Region of the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_style: Option<bool>,

    /// Connect over TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,

    /// Credentials used to access the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<S3Credentials>,
}

/// Inline connection or a reference to a named `S3Connection`
///
/// When both are set the referenced connection wins and inline fields only
/// fill in what it leaves unset.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3ConnectionRef {
    /// Inline connection definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<S3ConnectionSpec>,

    /// Name of an `S3Connection` in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

// =============================================================================
// S3Bucket
// =============================================================================

/// A bucket on an S3-compatible endpoint
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "s3.kubedoop.dev",
    version = "v1alpha1",
    kind = "S3Bucket",
    plural = "s3buckets",
    namespaced,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".spec.bucketName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    /// Name of the bucket on the endpoint
    pub bucket_name: String,

    /// Connection used to reach the bucket
    #[serde(default)]
    pub connection: S3ConnectionRef,
}

/// Inline bucket or a reference to a named `S3Bucket`; exactly one is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketRef {
    /// Inline bucket definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<S3BucketSpec>,

    /// Name of an `S3Bucket` in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_annotation_lists_node_pod_then_services() {
        let scope = CredentialScope {
            node: true,
            pod: true,
            services: BTreeSet::from(["history-svc".to_string(), "alt".to_string()]),
        };
        assert_eq!(
            scope.annotation_value(),
            "node,pod,service=alt,service=history-svc"
        );
        assert_eq!(CredentialScope::default().annotation_value(), "");
    }

    #[test]
    fn bucket_ref_accepts_reference_only() {
        let parsed: S3BucketRef =
            serde_json::from_value(serde_json::json!({"reference": "event-logs"}))
                .expect("parse bucket ref");
        assert_eq!(parsed.reference.as_deref(), Some("event-logs"));
        assert!(parsed.inline.is_none());
    }

    #[test]
    fn inline_connection_parses_camel_case() {
        let parsed: S3BucketSpec = serde_json::from_value(serde_json::json!({
            "bucketName": "spark-logs",
            "connection": {"inline": {
                "host": "minio", "port": 9000, "pathStyle": true,
                "credentials": {"secretClass": "s3-credentials"}
            }}
        }))
        .expect("parse bucket spec");
        let conn = parsed.connection.inline.expect("inline connection");
        assert_eq!(conn.port, Some(9000));
        assert_eq!(conn.path_style, Some(true));
        assert_eq!(
            conn.credentials.and_then(|c| c.secret_class).as_deref(),
            Some("s3-credentials")
        );
    }
}
