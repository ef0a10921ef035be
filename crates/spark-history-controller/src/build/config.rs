//! Config bundle: spark-defaults.conf, log4j2.properties and vector.yaml

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use serde_json::json;

use spark_history_common::crd::{ContainerLoggingSpec, LogLevel, RoleSpec};
use spark_history_common::Error;

use super::{BuildContext, EVENTLOG_DIR, HTTP_PORT, LOG_DIR, MAIN_CONTAINER, SUFFIX_CONFIG};
use crate::merge::EffectiveConfig;
use crate::resolve::LogDirectory;

/// Spark properties file
pub const SPARK_DEFAULTS_FILE: &str = "spark-defaults.conf";
/// log4j2 config file
pub const LOG4J2_FILE: &str = "log4j2.properties";
/// Vector agent config file
pub const VECTOR_FILE: &str = "vector.yaml";

/// Property switching the event log cleaner on
pub const CLEANER_PROPERTY: &str = "spark.history.fs.cleaner.enabled";

const CONSOLE_PATTERN: &str = "%d{ISO8601} %p [%t] %c - %m%n";
const LOG4J2_LOG_FILE: &str = "spark.log4j2.xml";
const LOG_FILE_MAX_SIZE: &str = "5MB";

/// Whether the group ends up running the cleaner
///
/// A `spark-defaults.conf` override of the cleaner property wins over the
/// `cleaner` flag, the same way it wins in the rendered file.
pub fn runs_cleaner(effective: &EffectiveConfig) -> bool {
    match effective
        .config_overrides
        .get(SPARK_DEFAULTS_FILE)
        .and_then(|overrides| overrides.get(CLEANER_PROPERTY))
    {
        Some(value) => value.trim().eq_ignore_ascii_case("true"),
        None => effective.cleaner,
    }
}

/// Check the cleaner runs in at most one single-replica role group
///
/// Runs over every group before anything is written.
pub fn validate_cleaner(
    owner: &str,
    role: &RoleSpec,
    groups: &[EffectiveConfig],
) -> Result<(), Error> {
    let role_cleaner = role.config.as_ref().and_then(|c| c.cleaner) == Some(true);
    if role_cleaner && role.role_groups.len() > 1 {
        return Err(Error::validation_for_field(
            owner,
            "spec.node.config.cleaner",
            "the cleaner is enabled for the whole role but the role has more than one role group",
        ));
    }

    let cleaners: Vec<&EffectiveConfig> = groups.iter().filter(|g| runs_cleaner(g)).collect();
    if cleaners.len() > 1 {
        let names: Vec<&str> = cleaners.iter().map(|g| g.role_group.as_str()).collect();
        return Err(Error::validation_for(
            owner,
            format!(
                "the cleaner may run in one role group only, enabled in: {}",
                names.join(", ")
            ),
        ));
    }
    if let Some(group) = cleaners.iter().find(|g| g.replicas > 1) {
        return Err(Error::validation_for_field(
            owner,
            format!("spec.node.roleGroups.{}.replicas", group.role_group),
            format!(
                "role group {} runs the cleaner and must have at most 1 replica, has {}",
                group.role_group, group.replicas
            ),
        ));
    }
    Ok(())
}

/// Build the config bundle of a role group
pub fn build_config_map(
    ctx: &BuildContext<'_>,
    effective: &EffectiveConfig,
) -> Result<ConfigMap, Error> {
    let group = effective.role_group.as_str();

    if let Some(unknown) = effective
        .config_overrides
        .keys()
        .find(|file| *file != SPARK_DEFAULTS_FILE && *file != LOG4J2_FILE)
    {
        return Err(Error::validation_for_field(
            &ctx.owner.name,
            format!("spec.node.roleGroups.{group}.configOverrides"),
            format!("unknown config file '{unknown}', expected {SPARK_DEFAULTS_FILE} or {LOG4J2_FILE}"),
        ));
    }

    let mut data = BTreeMap::from([
        (
            SPARK_DEFAULTS_FILE.to_string(),
            render_properties(&spark_defaults(ctx, effective), "="),
        ),
        (LOG4J2_FILE.to_string(), log4j2(effective)),
    ]);
    if let Some(address) = ctx.log_shipping(effective) {
        data.insert(VECTOR_FILE.to_string(), vector_yaml(ctx, group, address)?);
    }

    Ok(ConfigMap {
        metadata: ctx.metadata(group, SUFFIX_CONFIG)?,
        data: Some(data),
        ..Default::default()
    })
}

/// Spark properties of a role group, before rendering
pub fn spark_defaults(ctx: &BuildContext<'_>, effective: &EffectiveConfig) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::from([(
        "spark.history.ui.port".to_string(),
        HTTP_PORT.to_string(),
    )]);

    match &ctx.refs.log_directory {
        Some(LogDirectory::S3 { bucket, prefix }) => {
            properties.extend([
                (
                    "spark.history.fs.logDirectory".to_string(),
                    bucket.s3a_url(prefix),
                ),
                (
                    "spark.hadoop.fs.s3a.endpoint".to_string(),
                    bucket.endpoint.clone(),
                ),
                (
                    "spark.hadoop.fs.s3a.endpoint.region".to_string(),
                    bucket.region.clone(),
                ),
                (
                    "spark.hadoop.fs.s3a.path.style.access".to_string(),
                    bucket.path_style.to_string(),
                ),
                (
                    "spark.hadoop.fs.s3a.connection.ssl.enabled".to_string(),
                    bucket.tls.to_string(),
                ),
            ]);
        }
        Some(LogDirectory::Pvc(_)) => {
            properties.insert(
                "spark.history.fs.logDirectory".to_string(),
                format!("file://{EVENTLOG_DIR}"),
            );
        }
        None => {}
    }

    if effective.cleaner {
        properties.insert(CLEANER_PROPERTY.to_string(), "true".to_string());
    }

    if let Some(overrides) = effective.config_overrides.get(SPARK_DEFAULTS_FILE) {
        properties.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    properties
}

/// Render sorted `key<sep>value` lines
pub fn render_properties(properties: &BTreeMap<String, String>, separator: &str) -> String {
    properties
        .iter()
        .map(|(key, value)| format!("{key}{separator}{value}\n"))
        .collect()
}

fn log4j2(effective: &EffectiveConfig) -> String {
    let logging = effective
        .logging
        .get(MAIN_CONTAINER)
        .cloned()
        .unwrap_or_else(ContainerLoggingSpec::default);
    let console = logging.console.unwrap_or(LogLevel::Info).as_log4j();
    let file = logging.file.unwrap_or(LogLevel::Info).as_log4j();
    let root = logging
        .loggers
        .get("ROOT")
        .copied()
        .unwrap_or(LogLevel::Info)
        .as_log4j();
    let log_file = format!("{LOG_DIR}/{MAIN_CONTAINER}/{LOG4J2_LOG_FILE}");

    let mut properties = BTreeMap::from([
        ("appenders".to_string(), "CONSOLE, FILE".to_string()),
        ("appender.CONSOLE.type".to_string(), "Console".to_string()),
        ("appender.CONSOLE.name".to_string(), "CONSOLE".to_string()),
        ("appender.CONSOLE.target".to_string(), "SYSTEM_ERR".to_string()),
        ("appender.CONSOLE.layout.type".to_string(), "PatternLayout".to_string()),
        ("appender.CONSOLE.layout.pattern".to_string(), CONSOLE_PATTERN.to_string()),
        ("appender.CONSOLE.filter.threshold.type".to_string(), "ThresholdFilter".to_string()),
        ("appender.CONSOLE.filter.threshold.level".to_string(), console.to_string()),
        ("appender.FILE.type".to_string(), "RollingFile".to_string()),
        ("appender.FILE.name".to_string(), "FILE".to_string()),
        ("appender.FILE.fileName".to_string(), log_file.clone()),
        ("appender.FILE.filePattern".to_string(), format!("{log_file}.%i")),
        ("appender.FILE.layout.type".to_string(), "XMLLayout".to_string()),
        ("appender.FILE.policies.type".to_string(), "Policies".to_string()),
        ("appender.FILE.policies.size.type".to_string(), "SizeBasedTriggeringPolicy".to_string()),
        ("appender.FILE.policies.size.size".to_string(), LOG_FILE_MAX_SIZE.to_string()),
        ("appender.FILE.strategy.type".to_string(), "DefaultRolloverStrategy".to_string()),
        ("appender.FILE.strategy.max".to_string(), "1".to_string()),
        ("appender.FILE.filter.threshold.type".to_string(), "ThresholdFilter".to_string()),
        ("appender.FILE.filter.threshold.level".to_string(), file.to_string()),
        ("rootLogger.level".to_string(), root.to_string()),
        ("rootLogger.appenderRefs".to_string(), "CONSOLE, FILE".to_string()),
        ("rootLogger.appenderRef.CONSOLE.ref".to_string(), "CONSOLE".to_string()),
        ("rootLogger.appenderRef.FILE.ref".to_string(), "FILE".to_string()),
    ]);

    let loggers: Vec<(String, &String, LogLevel)> = logging
        .loggers
        .iter()
        .filter(|(name, _)| name.as_str() != "ROOT")
        .map(|(name, level)| (logger_id(name), name, *level))
        .collect();
    if !loggers.is_empty() {
        let ids: Vec<&str> = loggers.iter().map(|(id, _, _)| id.as_str()).collect();
        properties.insert("loggers".to_string(), ids.join(", "));
        for (id, name, level) in &loggers {
            properties.insert(format!("logger.{id}.name"), (*name).clone());
            properties.insert(format!("logger.{id}.level"), level.as_log4j().to_string());
        }
    }

    if let Some(overrides) = effective.config_overrides.get(LOG4J2_FILE) {
        properties.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    render_properties(&properties, " = ")
}

fn logger_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn vector_yaml(ctx: &BuildContext<'_>, group: &str, address: &str) -> Result<String, Error> {
    let config = json!({
        "api": {"enabled": true},
        "data_dir": "/kubedoop/vector/var",
        "log_schema": {"host_key": "pod"},
        "sources": {
            "files_log4j2": {
                "type": "file",
                "include": [format!("{LOG_DIR}/*/*.log4j2.xml")],
                "line_delimiter": "\r\n",
                "multiline": {
                    "mode": "halt_before",
                    "start_pattern": "^<log4j:event",
                    "condition_pattern": "^<log4j:event",
                    "timeout_ms": 1000
                }
            }
        },
        "transforms": {
            "processed_files_log4j2": {
                "inputs": ["files_log4j2"],
                "type": "remap",
                "source": concat!(
                    "event = parse_xml!(.message, include_attr: true)\n",
                    ".logger = event.\"log4j:event\".@logger\n",
                    ".level = event.\"log4j:event\".@level\n",
                    ".message = event.\"log4j:event\".\"log4j:message\"\n",
                )
            },
            "extended_logs": {
                "inputs": ["processed_*"],
                "type": "remap",
                "source": format!(
                    ".namespace = \"{}\"\n.cluster = \"{}\"\n.role = \"{}\"\n.roleGroup = \"{}\"\n",
                    ctx.owner.namespace, ctx.owner.name, ctx.role, group
                )
            }
        },
        "sinks": {
            "aggregator": {
                "inputs": ["extended_logs"],
                "type": "vector",
                "address": address
            }
        }
    });
    serde_yaml::to_string(&config).map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::fixtures::*;
    use crate::merge::{merge_role_group, ClusterDefaults};
    use crate::resolve::{ResolvedBucket, ResolvedRefs};
    use spark_history_common::crd::{
        ClusterConfigSpec, HistoryServerConfig, LoggingSpec, OverridesSpec, PersistenceSpec,
        RoleGroupSpec,
    };

    fn s3_refs() -> ResolvedRefs {
        ResolvedRefs {
            log_directory: Some(LogDirectory::S3 {
                bucket: ResolvedBucket {
                    endpoint: "http://minio:9000".to_string(),
                    bucket_name: "spark-logs".to_string(),
                    region: "us-west-1".to_string(),
                    path_style: true,
                    tls: false,
                    credentials: None,
                },
                prefix: "events".to_string(),
            }),
            ..Default::default()
        }
    }

    fn cleaner_group(replicas: i32) -> RoleGroupSpec {
        RoleGroupSpec {
            replicas: Some(replicas),
            config: Some(HistoryServerConfig {
                cleaner: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn role_with(groups: &[(&str, RoleGroupSpec)]) -> RoleSpec {
        RoleSpec {
            role_groups: groups
                .iter()
                .map(|(name, spec)| (name.to_string(), spec.clone()))
                .collect(),
            ..Default::default()
        }
    }

    fn merged(role: &RoleSpec) -> Vec<EffectiveConfig> {
        let cluster = ClusterDefaults::new(ClusterConfigSpec::default());
        role.role_groups
            .iter()
            .map(|(name, group)| merge_role_group(NAME, &cluster, role, name, group).expect("merge"))
            .collect()
    }

    // =========================================================================
    // Story Tests: Cleaner ownership
    // =========================================================================

    /// Story: Exactly one single-replica group may run the cleaner
    #[test]
    fn story_single_cleaner_group_is_accepted() {
        let role = role_with(&[("a", RoleGroupSpec::default()), ("b", cleaner_group(1))]);
        assert!(validate_cleaner(NAME, &role, &merged(&role)).is_ok());
    }

    /// Story: Two cleaner groups fail before anything is built
    #[test]
    fn story_two_cleaner_groups_are_rejected() {
        let role = role_with(&[("a", cleaner_group(1)), ("b", cleaner_group(1))]);
        let err = validate_cleaner(NAME, &role, &merged(&role)).expect_err("two cleaners");
        assert!(matches!(err, Error::Validation { .. }));
        assert!(err.to_string().contains("a, b"));
    }

    /// Story: The cleaner group must not be scaled out
    #[test]
    fn story_scaled_cleaner_group_is_rejected() {
        let role = role_with(&[("b", cleaner_group(2))]);
        let err = validate_cleaner(NAME, &role, &merged(&role)).expect_err("replicas > 1");
        assert!(err.to_string().contains("at most 1 replica"));
    }

    /// Story: A cleaner switched on through configOverrides counts too
    #[test]
    fn story_cleaner_override_counts_as_a_cleaner() {
        let overridden = |value: &str| RoleGroupSpec {
            replicas: Some(1),
            overrides: OverridesSpec {
                config_overrides: Some(BTreeMap::from([(
                    SPARK_DEFAULTS_FILE.to_string(),
                    BTreeMap::from([(CLEANER_PROPERTY.to_string(), value.to_string())]),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        let role = role_with(&[("a", cleaner_group(1)), ("b", overridden("true"))]);
        let err = validate_cleaner(NAME, &role, &merged(&role)).expect_err("two cleaners");
        assert!(err.to_string().contains("a, b"));

        let mut scaled = overridden("TRUE");
        scaled.replicas = Some(3);
        let role = role_with(&[("a", scaled)]);
        let err = validate_cleaner(NAME, &role, &merged(&role)).expect_err("replicas > 1");
        assert!(err.to_string().contains("at most 1 replica"));

        let mut off = cleaner_group(1);
        off.overrides = overridden("false").overrides;
        let role = role_with(&[("a", off), ("b", cleaner_group(1))]);
        assert!(validate_cleaner(NAME, &role, &merged(&role)).is_ok());
    }

    #[test]
    fn role_level_cleaner_with_many_groups_is_rejected() {
        let mut role = role_with(&[
            ("a", RoleGroupSpec::default()),
            ("b", RoleGroupSpec::default()),
        ]);
        role.config = Some(HistoryServerConfig {
            cleaner: Some(true),
            ..Default::default()
        });
        assert!(validate_cleaner(NAME, &role, &merged(&role)).is_err());
    }

    // =========================================================================
    // spark-defaults.conf
    // =========================================================================

    #[test]
    fn s3_storage_renders_sorted_properties() {
        let owner = owner();
        let image = image();
        let refs = s3_refs();
        let ctx = context(&owner, &image, &refs);
        let effective = effective("a", ClusterConfigSpec::default());

        let cm = build_config_map(&ctx, &effective).expect("config map");
        let data = cm.data.expect("data");
        let defaults = &data[SPARK_DEFAULTS_FILE];
        assert_eq!(
            defaults,
            "spark.hadoop.fs.s3a.connection.ssl.enabled=false\n\
             spark.hadoop.fs.s3a.endpoint=http://minio:9000\n\
             spark.hadoop.fs.s3a.endpoint.region=us-west-1\n\
             spark.hadoop.fs.s3a.path.style.access=true\n\
             spark.history.fs.logDirectory=s3a://spark-logs/events\n\
             spark.history.ui.port=18080\n"
        );
        assert!(!defaults.contains(CLEANER_PROPERTY));
        assert!(data.contains_key(LOG4J2_FILE));
        assert!(!data.contains_key(VECTOR_FILE));
    }

    #[test]
    fn cleaner_and_overrides_land_in_spark_defaults() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs {
            log_directory: Some(LogDirectory::Pvc(PersistenceSpec::default())),
            ..Default::default()
        };
        let ctx = context(&owner, &image, &refs);
        let effective = effective_with(
            "b",
            ClusterConfigSpec::default(),
            RoleGroupSpec {
                config: Some(HistoryServerConfig {
                    cleaner: Some(true),
                    ..Default::default()
                }),
                overrides: OverridesSpec {
                    config_overrides: Some(BTreeMap::from([(
                        SPARK_DEFAULTS_FILE.to_string(),
                        BTreeMap::from([(
                            "spark.history.ui.port".to_string(),
                            "18888".to_string(),
                        )]),
                    )])),
                    ..Default::default()
                },
                ..Default::default()
            },
        );

        let properties = spark_defaults(&ctx, &effective);
        assert_eq!(properties[CLEANER_PROPERTY], "true");
        assert_eq!(properties["spark.history.ui.port"], "18888");
        assert_eq!(
            properties["spark.history.fs.logDirectory"],
            "file:///kubedoop/spark-events"
        );
    }

    #[test]
    fn unknown_override_file_is_rejected() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs::default();
        let ctx = context(&owner, &image, &refs);
        let effective = effective_with(
            "a",
            ClusterConfigSpec::default(),
            RoleGroupSpec {
                overrides: OverridesSpec {
                    config_overrides: Some(BTreeMap::from([(
                        "hive-site.xml".to_string(),
                        BTreeMap::new(),
                    )])),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let err = build_config_map(&ctx, &effective).expect_err("unknown file");
        assert!(err.to_string().contains("hive-site.xml"));
    }

    // =========================================================================
    // Logging
    // =========================================================================

    #[test]
    fn log4j2_reflects_container_logging() {
        let effective = effective_with(
            "a",
            ClusterConfigSpec::default(),
            RoleGroupSpec {
                config: Some(HistoryServerConfig {
                    logging: Some(LoggingSpec {
                        containers: Some(BTreeMap::from([(
                            MAIN_CONTAINER.to_string(),
                            ContainerLoggingSpec {
                                console: Some(LogLevel::Warn),
                                file: None,
                                loggers: BTreeMap::from([
                                    ("ROOT".to_string(), LogLevel::Error),
                                    ("org.apache.spark".to_string(), LogLevel::Debug),
                                ]),
                            },
                        )])),
                        enable_vector_agent: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let rendered = log4j2(&effective);
        assert!(rendered.contains("appender.CONSOLE.filter.threshold.level = WARN\n"));
        assert!(rendered.contains("appender.FILE.filter.threshold.level = INFO\n"));
        assert!(rendered.contains("rootLogger.level = ERROR\n"));
        assert!(rendered.contains("loggers = org_apache_spark\n"));
        assert!(rendered.contains("logger.org_apache_spark.name = org.apache.spark\n"));
        assert!(rendered.contains("logger.org_apache_spark.level = DEBUG\n"));
        assert!(rendered.contains("/kubedoop/log/spark-history/spark.log4j2.xml"));
    }

    #[test]
    fn vector_config_only_with_log_shipping() {
        let owner = owner();
        let image = image();
        let refs = ResolvedRefs {
            vector_address: Some("vector-aggregator:6000".to_string()),
            ..Default::default()
        };
        let ctx = context(&owner, &image, &refs);
        let shipping = effective(
            "a",
            ClusterConfigSpec {
                vector_aggregator_config_map_name: Some("vector-aggregator".to_string()),
                ..Default::default()
            },
        );

        let data = build_config_map(&ctx, &shipping)
            .expect("config map")
            .data
            .expect("data");
        let vector: serde_json::Value =
            serde_yaml::from_str(&data[VECTOR_FILE]).expect("vector yaml parses");
        assert_eq!(vector["sinks"]["aggregator"]["address"], "vector-aggregator:6000");
        assert!(vector["transforms"]["extended_logs"]["source"]
            .as_str()
            .expect("source")
            .contains(".roleGroup = \"a\""));

        let local = effective("a", ClusterConfigSpec::default());
        let data = build_config_map(&ctx, &local)
            .expect("config map")
            .data
            .expect("data");
        assert!(!data.contains_key(VECTOR_FILE));
    }
}
