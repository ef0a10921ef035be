//! Spark History Server operator - runs SparkHistoryServer custom resources on Kubernetes

mod crds;

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;

use spark_history_common::telemetry::{init_tracing, LogFormat};
use spark_history_common::FIELD_MANAGER;
use spark_history_controller::ControllerConfig;

/// Kubernetes operator managing Spark History Server deployments
#[derive(Parser, Debug)]
#[command(name = "spark-history-operator", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format: json or plain
    #[arg(long, env = "SHS_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Field manager used for server-side apply
    #[arg(long, env = "SHS_FIELD_MANAGER", default_value = FIELD_MANAGER)]
    field_manager: String,

    /// Requeue after a converged pass, in seconds
    #[arg(long, env = "SHS_RESYNC_SECS", default_value_t = 300)]
    resync_secs: u64,

    /// Requeue while waiting for a dependency, in seconds
    #[arg(long, env = "SHS_DEPENDENCY_REQUEUE_SECS", default_value_t = 10)]
    dependency_requeue_secs: u64,

    /// Requeue after a missing reference, in seconds
    #[arg(long, env = "SHS_REFERENCE_REQUEUE_SECS", default_value_t = 60)]
    reference_requeue_secs: u64,

    /// Consecutive transient failures before they show in status
    #[arg(long, env = "SHS_TRANSIENT_FAILURE_THRESHOLD", default_value_t = 5)]
    transient_failure_threshold: u32,

    /// Platform version used in default image tags
    #[arg(long, env = "SHS_OPERATOR_VERSION")]
    operator_version: Option<String>,

    /// Registry and repository for default images
    #[arg(long, env = "SHS_IMAGE_REPO")]
    image_repo: Option<String>,

    /// Skip CRD installation on startup
    #[arg(long, env = "SHS_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            field_manager: defaults.field_manager,
            resync_secs: defaults.resync.as_secs(),
            dependency_requeue_secs: defaults.dependency_requeue.as_secs(),
            reference_requeue_secs: defaults.reference_requeue.as_secs(),
            transient_failure_threshold: defaults.transient_failure_threshold,
            operator_version: None,
            image_repo: None,
            skip_crd_install: false,
        }
    }
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        let defaults = ControllerConfig::default();
        ControllerConfig {
            field_manager: self.field_manager.clone(),
            resync: Duration::from_secs(self.resync_secs),
            dependency_requeue: Duration::from_secs(self.dependency_requeue_secs),
            reference_requeue: Duration::from_secs(self.reference_requeue_secs),
            transient_failure_threshold: self.transient_failure_threshold.max(1),
            operator_version: self
                .operator_version
                .clone()
                .unwrap_or(defaults.operator_version),
            image_repo: self.image_repo.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube's rustls stack and aws-lc-rs both link a crypto provider, so the
    // process default has to be chosen explicitly before any client exists.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install the aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crds::render_crds()?);
        return Ok(());
    }

    init_tracing(cli.log_format)?;

    let args = match cli.command {
        Some(Commands::Run(args)) => args,
        None => RunArgs::default(),
    };
    run(args).await
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.controller_config();
    tracing::info!(
        version = %config.operator_version,
        field_manager = %config.field_manager,
        "starting spark history operator"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    if args.skip_crd_install {
        tracing::info!("skipping CRD installation");
    } else {
        crds::ensure_crds_installed(&client, &config.field_manager).await?;
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    spark_history_controller::run(client, config, shutdown).await;
    tracing::info!("controller stopped");
    Ok(())
}

/// Cancel in-flight passes on SIGTERM or Ctrl-C
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = term.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown requested, cancelling in-flight reconciles");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_map_onto_controller_config() {
        let cli = Cli::parse_from([
            "spark-history-operator",
            "run",
            "--resync-secs",
            "120",
            "--transient-failure-threshold",
            "0",
            "--image-repo",
            "registry.local/kubedoop",
        ]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        let config = args.controller_config();
        assert_eq!(config.resync, Duration::from_secs(120));
        assert_eq!(config.transient_failure_threshold, 1);
        assert_eq!(config.image_repo.as_deref(), Some("registry.local/kubedoop"));
        assert_eq!(config.dependency_requeue, Duration::from_secs(10));
    }

    #[test]
    fn default_mode_matches_controller_defaults() {
        let config = RunArgs::default().controller_config();
        let defaults = ControllerConfig::default();
        assert_eq!(config.resync, defaults.resync);
        assert_eq!(config.field_manager, defaults.field_manager);
        assert_eq!(config.operator_version, defaults.operator_version);
    }

    #[test]
    fn log_format_parses_from_flag() {
        let cli = Cli::parse_from(["spark-history-operator", "--log-format", "plain"]);
        assert_eq!(cli.log_format, LogFormat::Plain);
        assert!(cli.command.is_none());
    }
}
