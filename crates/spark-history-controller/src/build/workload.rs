//! History server StatefulSet
//!
//! One main `spark-history` container plus optional sidecars:
//! - `oidc`: oauth2-proxy in front of the UI when OIDC is configured
//! - `vector`: ships the log files when log shipping is enabled
//!
//! Volumes follow the enabled features. The config volume is always there,
//! credentials only for S3 storage with credentials, the event log claim only
//! for PVC storage, and the log volume only when logs are shipped.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    PodSpec, PodTemplateSpec, Probe, ResourceRequirements, SecretKeySelector, TCPSocketAction,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use spark_history_common::kube_utils::{hex_prefix, sha256};
use spark_history_common::Error;

use super::config::{SPARK_DEFAULTS_FILE, VECTOR_FILE};
use super::pvc::{eventlog_volume, EVENTLOG_VOLUME};
use super::secret::{credentials_volume, ACCESS_KEY, SECRET_KEY};
use super::{
    BuildContext, CONFIG_DIR, CONFIG_HASH_ANNOTATION, CONFIG_MOUNT_DIR, EVENTLOG_DIR, HTTP_PORT,
    LOG_DIR, MAIN_CONTAINER, METRICS_PORT, OIDC_CONTAINER, OIDC_PORT, S3_CREDENTIALS_DIR,
    SUFFIX_CONFIG, SUFFIX_SERVER, VECTOR_CONTAINER,
};
use crate::merge::{deep_merge_json, EffectiveConfig};
use crate::resolve::ResolvedOidc;

/// Pinned oauth2-proxy image of the auth sidecar
pub const OIDC_PROXY_IMAGE: &str = "quay.io/oauth2-proxy/oauth2-proxy:v7.6.0";

const CONFIG_VOLUME: &str = "config";
const LOG_VOLUME: &str = "log";
const LOG_VOLUME_SIZE: &str = "30Mi";
const SPARK_HOME: &str = "/kubedoop/spark";
const JMX_DIR: &str = "/kubedoop/jmx";

/// Build the StatefulSet of a role group
pub fn build_stateful_set(
    ctx: &BuildContext<'_>,
    effective: &EffectiveConfig,
    config_hash: &str,
) -> Result<StatefulSet, Error> {
    let group = effective.role_group.as_str();
    let labels = ctx.labels(group);
    let shipping = ctx.log_shipping(effective).is_some();

    let mut volumes = vec![Volume {
        name: CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: ctx.child_name(group, SUFFIX_CONFIG)?,
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: CONFIG_VOLUME.to_string(),
        mount_path: CONFIG_MOUNT_DIR.to_string(),
        ..Default::default()
    }];

    let credentials = credentials_volume(ctx, group)?;
    if let Some(volume) = &credentials {
        mounts.push(VolumeMount {
            name: volume.name.clone(),
            mount_path: S3_CREDENTIALS_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(volume.clone());
    }
    if let Some(volume) = eventlog_volume(ctx, group)? {
        mounts.push(VolumeMount {
            name: EVENTLOG_VOLUME.to_string(),
            mount_path: EVENTLOG_DIR.to_string(),
            ..Default::default()
        });
        volumes.push(volume);
    }
    if shipping {
        mounts.push(VolumeMount {
            name: LOG_VOLUME.to_string(),
            mount_path: LOG_DIR.to_string(),
            ..Default::default()
        });
        volumes.push(Volume {
            name: LOG_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                size_limit: Some(Quantity(LOG_VOLUME_SIZE.to_string())),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let mut containers = vec![main_container(ctx, effective, credentials.is_some(), mounts)];
    if let Some(oidc) = &ctx.refs.oidc {
        containers.push(oidc_container(oidc, &ctx.owner.uid));
    }
    if shipping {
        containers.push(vector_container(ctx));
    }

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                config_hash.to_string(),
            )])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            volumes: Some(volumes),
            node_selector: Some(effective.node_selector.clone()).filter(|s| !s.is_empty()),
            tolerations: Some(effective.tolerations.clone()).filter(|t| !t.is_empty()),
            image_pull_secrets: ctx.image.pull_secret_refs(),
            termination_grace_period_seconds: Some(effective.termination_grace_period_seconds()),
            ..Default::default()
        }),
    };
    let template = apply_pod_overrides(template, effective.pod_overrides.as_ref())?;

    Ok(StatefulSet {
        metadata: ctx.metadata(group, SUFFIX_SERVER)?,
        spec: Some(StatefulSetSpec {
            replicas: Some(if ctx.stopped { 0 } else { effective.replicas }),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            template,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Deep merge the pod overrides into the generated template
fn apply_pod_overrides(
    template: PodTemplateSpec,
    overrides: Option<&serde_json::Value>,
) -> Result<PodTemplateSpec, Error> {
    let Some(overrides) = overrides else {
        return Ok(template);
    };
    let base = serde_json::to_value(&template)?;
    let merged = deep_merge_json(&base, overrides, "podOverrides")?;
    serde_json::from_value(merged).map_err(|e| Error::merge("podOverrides", e.to_string()))
}

fn main_container(
    ctx: &BuildContext<'_>,
    effective: &EffectiveConfig,
    with_credentials: bool,
    volume_mounts: Vec<VolumeMount>,
) -> Container {
    let (command, args) = match &effective.command_overrides {
        Some(command) => (command.clone(), None),
        None => (
            vec!["/bin/bash".to_string(), "-c".to_string()],
            Some(vec![startup_script(with_credentials)]),
        ),
    };

    let probe = Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::String("http".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        timeout_seconds: Some(5),
        period_seconds: Some(10),
        success_threshold: Some(1),
        ..Default::default()
    };

    let resources = &effective.resources;
    Container {
        name: MAIN_CONTAINER.to_string(),
        image: Some(ctx.image.image.clone()),
        image_pull_policy: Some(ctx.image.pull_policy.clone()),
        command: Some(command),
        args,
        env: Some(main_env(&effective.env_overrides)),
        ports: Some(vec![
            container_port("http", HTTP_PORT),
            container_port("metrics", METRICS_PORT),
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(resources.cpu_min.clone())),
                ("memory".to_string(), Quantity(resources.memory.clone())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(resources.cpu_max.clone())),
                ("memory".to_string(), Quantity(resources.memory.clone())),
            ])),
            ..Default::default()
        }),
        readiness_probe: Some(probe.clone()),
        liveness_probe: Some(probe),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn startup_script(with_credentials: bool) -> String {
    let mut script = format!(
        "mkdir -p {CONFIG_DIR} {LOG_DIR}/{MAIN_CONTAINER}\ncp {CONFIG_MOUNT_DIR}/* {CONFIG_DIR}\n"
    );
    if with_credentials {
        script.push_str(&format!(
            "export AWS_ACCESS_KEY_ID=$(cat {S3_CREDENTIALS_DIR}/{ACCESS_KEY})\n\
             export AWS_SECRET_ACCESS_KEY=$(cat {S3_CREDENTIALS_DIR}/{SECRET_KEY})\n"
        ));
    }
    script.push_str(&format!(
        "{SPARK_HOME}/sbin/start-history-server.sh --properties-file {CONFIG_DIR}/{SPARK_DEFAULTS_FILE}\n"
    ));
    script
}

fn main_env(overrides: &BTreeMap<String, String>) -> Vec<EnvVar> {
    let history_opts = [
        format!("-Dlog4j.configurationFile={CONFIG_DIR}/log4j2.properties"),
        format!("-javaagent:{JMX_DIR}/jmx_prometheus_javaagent.jar={METRICS_PORT}:{JMX_DIR}/config.yaml"),
    ]
    .join(" ");

    let mut env = BTreeMap::from([
        ("SPARK_NO_DAEMONIZE".to_string(), "true".to_string()),
        (
            "SPARK_DAEMON_CLASSPATH".to_string(),
            format!("{SPARK_HOME}/extra-jars/*"),
        ),
        ("SPARK_HISTORY_OPTS".to_string(), history_opts),
    ]);
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    env.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect()
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Cookie secret derived from the owner uid, stable across passes
pub fn cookie_secret(uid: &str) -> String {
    let token = hex_prefix(&sha256(uid.as_bytes()), 8);
    STANDARD.encode(STANDARD.encode(token.as_bytes()))
}

fn oidc_container(oidc: &ResolvedOidc, uid: &str) -> Container {
    let secret_env = |name: &str, key: &str| EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: oidc.client_credentials_secret.clone(),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    let plain_env = |name: &str, value: String| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    };

    Container {
        name: OIDC_CONTAINER.to_string(),
        image: Some(OIDC_PROXY_IMAGE.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(vec![
            plain_env("OAUTH2_PROXY_COOKIE_SECRET", cookie_secret(uid)),
            secret_env("OAUTH2_PROXY_CLIENT_ID", "CLIENT_ID"),
            secret_env("OAUTH2_PROXY_CLIENT_SECRET", "CLIENT_SECRET"),
            plain_env("OAUTH2_PROXY_OIDC_ISSUER_URL", oidc.issuer_url()),
            plain_env("OAUTH2_PROXY_SCOPE", oidc.scopes()),
            plain_env("OAUTH2_PROXY_PROVIDER", oidc.proxy_provider()),
            plain_env(
                "OAUTH2_PROXY_UPSTREAMS",
                format!("http://localhost:{HTTP_PORT}"),
            ),
            plain_env("OAUTH2_PROXY_HTTP_ADDRESS", format!("0.0.0.0:{OIDC_PORT}")),
            plain_env("OAUTH2_PROXY_COOKIE_SECURE", "false".to_string()),
            plain_env("OAUTH2_PROXY_WHITELIST_DOMAINS", "*".to_string()),
            plain_env("OAUTH2_PROXY_CODE_CHALLENGE_METHOD", "S256".to_string()),
            plain_env("OAUTH2_PROXY_EMAIL_DOMAINS", "*".to_string()),
        ]),
        ports: Some(vec![container_port("oidc", OIDC_PORT)]),
        resources: Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("600m".to_string())),
                ("memory".to_string(), Quantity("512Mi".to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn vector_container(ctx: &BuildContext<'_>) -> Container {
    Container {
        name: VECTOR_CONTAINER.to_string(),
        image: Some(ctx.image.image.clone()),
        image_pull_policy: Some(ctx.image.pull_policy.clone()),
        command: Some(vec![
            "/bin/bash".to_string(),
            "-x".to_string(),
            "-euo".to_string(),
            "pipefail".to_string(),
            "-c".to_string(),
        ]),
        args: Some(vec![format!(
            "mkdir -p /kubedoop/vector/var\nvector --config {CONFIG_DIR}/{VECTOR_FILE}\n"
        )]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("250m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ])),
            ..Default::default()
        }),
        volume_mounts: Some(vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: CONFIG_DIR.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: LOG_VOLUME.to_string(),
                mount_path: LOG_DIR.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}
