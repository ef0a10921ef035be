//! CRD installation
//!
//! The operator installs the SparkHistoryServer CRD on startup with
//! server-side apply, so the schema always matches the running version.
//! S3Bucket, S3Connection and AuthenticationClass belong to the platform and
//! are only read.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use spark_history_common::crd::SparkHistoryServer;

/// CRDs owned by this operator
pub fn owned_crds() -> Vec<CustomResourceDefinition> {
    vec![SparkHistoryServer::crd()]
}

/// Owned CRDs as one multi-document YAML stream
pub fn render_crds() -> anyhow::Result<String> {
    let docs = owned_crds()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
    Ok(docs.join("---\n"))
}

/// Apply every owned CRD
pub async fn ensure_crds_installed(client: &Client, field_manager: &str) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(field_manager).force();

    for crd in owned_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {name} CRD: {e}"))?;
    }
    Ok(())
}
