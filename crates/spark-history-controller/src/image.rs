//! Container image resolution
//!
//! The product image is `<repo>/<product>:<productVersion>-kubedoop<platformVersion>`.
//! A `custom` image in the spec replaces the whole reference; the individual
//! fields replace only their own part.

use k8s_openapi::api::core::v1::LocalObjectReference;
use serde::Serialize;

use spark_history_common::crd::ImageSpec;

/// Default image repository
pub const DEFAULT_REPO: &str = "quay.io/zncdatadev";
/// Product image name
pub const PRODUCT_NAME: &str = "spark-k8s";
/// Spark version shipped when the spec names none
pub const DEFAULT_PRODUCT_VERSION: &str = "3.5.1";
/// Pull policy used when the spec names none
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Product-level image defaults supplied by the operator build
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductImage {
    /// Image repository
    pub repo: String,
    /// Image name inside the repository
    pub product_name: String,
    /// Spark version
    pub product_version: String,
    /// Platform build version
    pub kubedoop_version: String,
}

impl ProductImage {
    /// Defaults for an operator built at `kubedoop_version`
    pub fn new(kubedoop_version: impl Into<String>) -> Self {
        Self {
            repo: DEFAULT_REPO.to_string(),
            product_name: PRODUCT_NAME.to_string(),
            product_version: DEFAULT_PRODUCT_VERSION.to_string(),
            kubedoop_version: kubedoop_version.into(),
        }
    }

    /// Override the default repository
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }
}

/// Fully specified image reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Image reference passed to the container runtime
    pub image: String,
    /// Pull policy, never empty
    pub pull_policy: String,
    /// Secrets used to pull the image
    pub pull_secrets: Vec<String>,
}

impl ImageRef {
    /// `imagePullSecrets` entries for the pod spec
    pub fn pull_secret_refs(&self) -> Option<Vec<LocalObjectReference>> {
        if self.pull_secrets.is_empty() {
            return None;
        }
        Some(
            self.pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
        )
    }
}

/// Resolve the image reference from product defaults and the spec override
pub fn resolve(defaults: &ProductImage, spec: &ImageSpec) -> ImageRef {
    let image = match spec.custom.as_deref().filter(|c| !c.is_empty()) {
        Some(custom) => custom.to_string(),
        None => {
            let repo = non_empty(&spec.repo).unwrap_or(&defaults.repo);
            let product_version =
                non_empty(&spec.product_version).unwrap_or(&defaults.product_version);
            let kubedoop_version =
                non_empty(&spec.kubedoop_version).unwrap_or(&defaults.kubedoop_version);
            format!(
                "{}/{}:{}-kubedoop{}",
                repo.trim_end_matches('/'),
                defaults.product_name,
                product_version,
                kubedoop_version
            )
        }
    };

    ImageRef {
        image,
        pull_policy: non_empty(&spec.pull_policy)
            .unwrap_or(DEFAULT_PULL_POLICY)
            .to_string(),
        pull_secrets: non_empty(&spec.pull_secret_name)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ProductImage {
        ProductImage::new("0.1.0")
    }

    #[test]
    fn empty_spec_uses_product_defaults() {
        let image = resolve(&defaults(), &ImageSpec::default());
        assert_eq!(image.image, "quay.io/zncdatadev/spark-k8s:3.5.1-kubedoop0.1.0");
        assert_eq!(image.pull_policy, "IfNotPresent");
        assert!(image.pull_secrets.is_empty());
        assert!(image.pull_secret_refs().is_none());
    }

    #[test]
    fn custom_image_replaces_everything_but_pull_settings() {
        let spec = ImageSpec {
            custom: Some("registry.local/spark:dev".to_string()),
            repo: Some("ignored.example".to_string()),
            pull_policy: Some("Always".to_string()),
            ..Default::default()
        };
        let image = resolve(&defaults(), &spec);
        assert_eq!(image.image, "registry.local/spark:dev");
        assert_eq!(image.pull_policy, "Always");
    }

    #[test]
    fn individual_fields_override_their_part() {
        let spec = ImageSpec {
            repo: Some("registry.local/mirror/".to_string()),
            product_version: Some("3.4.3".to_string()),
            pull_secret_name: Some("regcred".to_string()),
            ..Default::default()
        };
        let image = resolve(&defaults().with_repo("unused"), &spec);
        assert_eq!(image.image, "registry.local/mirror/spark-k8s:3.4.3-kubedoop0.1.0");
        assert_eq!(image.pull_secrets, vec!["regcred".to_string()]);
        assert_eq!(
            image.pull_secret_refs().expect("pull secrets")[0].name,
            "regcred"
        );
    }

    #[test]
    fn empty_strings_count_as_unset() {
        let spec = ImageSpec {
            custom: Some(String::new()),
            pull_policy: Some(String::new()),
            ..Default::default()
        };
        let image = resolve(&defaults(), &spec);
        assert!(image.image.starts_with("quay.io/zncdatadev/"));
        assert_eq!(image.pull_policy, DEFAULT_PULL_POLICY);
    }
}
