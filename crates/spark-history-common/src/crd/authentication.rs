//! AuthenticationClass CRD types
//!
//! Cluster-scoped description of an identity provider. The operator only
//! consumes the OIDC provider to wire an auth proxy in front of the UI.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OpenID Connect identity provider
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OidcProvider {
    /// Host name of the identity provider
    pub hostname: String,

    /// Port of the identity provider; 0 or 80 are left out of the issuer URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Path prefix of the issuer
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Provider flavour understood by the proxy (e.g. "keycloak")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hint: Option<String>,

    /// Scopes always requested from the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

fn default_root_path() -> String {
    "/".to_string()
}

/// Supported authentication providers; at most one is set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationProvider {
    /// OpenID Connect provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcProvider>,
}

/// Identity provider shared across products
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "authentication.kubedoop.dev",
    version = "v1alpha1",
    kind = "AuthenticationClass",
    plural = "authenticationclasses",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationClassSpec {
    /// The configured provider
    pub provider: AuthenticationProvider,
}
