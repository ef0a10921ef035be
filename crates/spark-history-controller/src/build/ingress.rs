//! UI Ingress
//!
//! Routes the configured host to the role group Service. With OIDC enabled the
//! route goes through the auth proxy port, never straight to the UI.

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};

use spark_history_common::Error;

use super::{BuildContext, SUFFIX_INGRESS, SUFFIX_SERVICE};
use crate::merge::EffectiveConfig;

/// Ingress of a role group, when one is configured
pub fn build_ingress(
    ctx: &BuildContext<'_>,
    effective: &EffectiveConfig,
) -> Result<Option<Ingress>, Error> {
    let Some(spec) = &effective.ingress else {
        return Ok(None);
    };
    let group = effective.role_group.as_str();
    if spec.host.is_empty() {
        return Err(Error::validation_for_field(
            &ctx.owner.name,
            "spec.clusterConfig.ingress.host",
            "ingress host must not be empty",
        ));
    }

    let port_name = if ctx.oidc_enabled() { "oidc" } else { "http" };
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: ctx.child_name(group, SUFFIX_SERVICE)?,
            port: Some(ServiceBackendPort {
                name: Some(port_name.to_string()),
                number: None,
            }),
        }),
        ..Default::default()
    };

    let mut metadata = ctx.metadata(group, SUFFIX_INGRESS)?;
    if !spec.annotations.is_empty() {
        metadata.annotations = Some(spec.annotations.clone());
    }

    Ok(Some(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: spec.ingress_class_name.clone(),
            rules: Some(vec![IngressRule {
                host: Some(spec.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend,
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::build::fixtures::*;
    use crate::resolve::{ResolvedOidc, ResolvedRefs};
    use spark_history_common::crd::{ClusterConfigSpec, IngressSpec as IngressConfig, OidcProvider};

    fn with_ingress(host: &str) -> ClusterConfigSpec {
        ClusterConfigSpec {
            ingress: Some(IngressConfig {
                host: host.to_string(),
                ingress_class_name: Some("nginx".to_string()),
                annotations: BTreeMap::from([(
                    "nginx.ingress.kubernetes.io/proxy-body-size".to_string(),
                    "8m".to_string(),
                )]),
            }),
            ..Default::default()
        }
    }

    fn backend_port(ingress: &Ingress) -> Option<String> {
        ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.as_ref())
            .and_then(|r| r[0].http.as_ref())
            .and_then(|h| h.paths[0].backend.service.as_ref())
            .and_then(|s| s.port.as_ref())
            .and_then(|p| p.name.clone())
    }

    /// Story: A configured host routes to the UI port of the group Service
    #[test]
    fn story_ingress_routes_to_the_ui() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let effective = effective("a", with_ingress("history.example.com"));

        let ingress = build_ingress(&ctx, &effective).expect("build").expect("ingress");
        assert_eq!(ingress.metadata.name.as_deref(), Some("history-node-a-ingress"));
        assert_eq!(backend_port(&ingress).as_deref(), Some("http"));

        let spec = ingress.spec.as_ref().expect("spec");
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        let rule = &spec.rules.as_ref().expect("rules")[0];
        assert_eq!(rule.host.as_deref(), Some("history.example.com"));
        let path = &rule.http.as_ref().expect("http").paths[0];
        assert_eq!(
            path.backend.service.as_ref().map(|s| s.name.as_str()),
            Some("history-node-a-svc")
        );
        assert!(ingress
            .metadata
            .annotations
            .expect("annotations")
            .contains_key("nginx.ingress.kubernetes.io/proxy-body-size"));
    }

    /// Story: With OIDC the route always goes through the auth proxy
    #[test]
    fn story_oidc_routes_through_the_proxy() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs {
            oidc: Some(ResolvedOidc {
                provider: OidcProvider {
                    hostname: "keycloak".to_string(),
                    root_path: "/".to_string(),
                    ..Default::default()
                },
                client_credentials_secret: "oidc".to_string(),
                extra_scopes: vec![],
            }),
            ..Default::default()
        };
        let ctx = context(&owner, &image, &refs);
        let effective = effective("a", with_ingress("history.example.com"));

        let ingress = build_ingress(&ctx, &effective).expect("build").expect("ingress");
        assert_eq!(backend_port(&ingress).as_deref(), Some("oidc"));
    }

    #[test]
    fn no_ingress_configured() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let effective = effective("a", ClusterConfigSpec::default());
        assert!(build_ingress(&ctx, &effective).expect("build").is_none());
    }

    #[test]
    fn empty_host_is_rejected() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let effective = effective("a", with_ingress(""));
        assert!(matches!(
            build_ingress(&ctx, &effective),
            Err(Error::Validation { .. })
        ));
    }
}
