//! Role group Service

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use spark_history_common::Error;

use super::{BuildContext, HTTP_PORT, METRICS_PORT, OIDC_PORT, SUFFIX_SERVICE};
use crate::merge::EffectiveConfig;

/// Service exposing the UI, the metrics endpoint and the auth proxy when enabled
pub fn build_service(ctx: &BuildContext<'_>, effective: &EffectiveConfig) -> Result<Service, Error> {
    let group = effective.role_group.as_str();

    let mut ports = vec![port("http", HTTP_PORT), port("metrics", METRICS_PORT)];
    if ctx.oidc_enabled() {
        ports.push(port("oidc", OIDC_PORT));
    }

    Ok(Service {
        metadata: ctx.metadata(group, SUFFIX_SERVICE)?,
        spec: Some(ServiceSpec {
            type_: Some(effective.listener_class.service_type().to_string()),
            selector: Some(ctx.labels(group)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
