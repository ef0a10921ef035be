//! SparkHistoryServer controller
//!
//! Wires one reconcile pass into kube-runtime: runs the cluster reconciler,
//! folds the outcome into status conditions, writes status when it changed,
//! records events on transitions and picks the requeue.
//!
//! Error handling follows the error category:
//!
//! - validation errors wait for a spec change
//! - reference errors retry on a slow timer
//! - transient errors go back to kube-runtime, which retries with backoff

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{predicates, reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use spark_history_common::crd::{SparkHistoryServer, SparkHistoryServerStatus};
use spark_history_common::events::{actions, reasons as event_reasons};
use spark_history_common::kube_utils::{LABEL_MANAGED_BY, MANAGED_BY};
use spark_history_common::{
    ConditionStatus, Error, ErrorCategory, EventPublisher, KubeEventPublisher, FIELD_MANAGER,
};

use crate::cluster::{reconcile_cluster, PassOutcome};
use crate::image::ProductImage;
use crate::role_group::{Applier, Outcome};
use crate::status::{
    next_status, reasons, ConditionSet, PassProgress, AVAILABLE, PROGRESSING,
    RECONCILIATION_PAUSED,
};
use crate::store::{cancellable, KubeStore, ResourceStore};

/// Name the controller reports events as
pub const CONTROLLER_NAME: &str = "spark-history-operator";

/// Watcher timeout (seconds), kept below the client read timeout of 30s
const WATCH_TIMEOUT_SECS: u32 = 25;

/// First retry delay after a transient failure
pub const BACKOFF_BASE: Duration = Duration::from_secs(30);
/// Upper bound of the retry delay
pub const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Tunables of the controller
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Server-side apply field manager
    pub field_manager: String,
    /// Requeue after a converged pass
    pub resync: Duration,
    /// Requeue while waiting for a dependency
    pub dependency_requeue: Duration,
    /// Requeue after a reference error
    pub reference_requeue: Duration,
    /// Consecutive transient failures before they are surfaced in status
    pub transient_failure_threshold: u32,
    /// Operator version used in default image tags
    pub operator_version: String,
    /// Registry and repository overriding the default image
    pub image_repo: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            field_manager: FIELD_MANAGER.to_string(),
            resync: Duration::from_secs(300),
            dependency_requeue: Duration::from_secs(10),
            reference_requeue: Duration::from_secs(60),
            transient_failure_threshold: 5,
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            image_repo: None,
        }
    }
}

impl ControllerConfig {
    /// Image defaults for this operator build
    pub fn product_image(&self) -> ProductImage {
        let image = ProductImage::new(self.operator_version.clone());
        match &self.image_repo {
            Some(repo) => image.with_repo(repo.clone()),
            None => image,
        }
    }
}

/// Shared state of every reconcile pass
pub struct Context {
    /// Object access
    pub store: Arc<dyn ResourceStore>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Tunables
    pub config: ControllerConfig,
    /// Cancelled on operator shutdown
    pub shutdown: CancellationToken,
}

impl Context {
    /// Context backed by the Kubernetes API
    pub fn new(client: Client, config: ControllerConfig, shutdown: CancellationToken) -> Self {
        Self {
            store: Arc::new(KubeStore::new(client.clone(), config.field_manager.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
            shutdown,
        }
    }

    /// Context over arbitrary store and event implementations
    pub fn with_store(
        store: Arc<dyn ResourceStore>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            events,
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Retry delay after `failures` consecutive transient failures
pub fn backoff(failures: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(failures))
        .min(BACKOFF_MAX)
}

/// Highest failure count worth recording
///
/// Past the escalation threshold and the backoff cap another failure changes
/// nothing, so the count stops there and a persistent failure stops
/// rewriting status.
pub fn failure_ceiling(threshold: u32) -> u32 {
    let mut saturated = 0;
    while backoff(saturated) < BACKOFF_MAX {
        saturated += 1;
    }
    threshold.max(saturated)
}

/// Reconcile one SparkHistoryServer
#[instrument(
    skip(server, ctx),
    fields(
        server = %server.name_any(),
        namespace = %server.namespace().unwrap_or_default(),
        generation = ?server.metadata.generation,
    )
)]
pub async fn reconcile(server: Arc<SparkHistoryServer>, ctx: Arc<Context>) -> Result<Action, Error> {
    let token = ctx.shutdown.child_token();
    let config = &ctx.config;
    let previous = server.status.clone().unwrap_or_default();
    let mut conditions = ConditionSet::observe(&previous.conditions, server.metadata.generation);
    let stopped = server.spec.is_stopped();

    let applier = Applier::new(ctx.store.as_ref(), &token, config.dependency_requeue);
    let mut progress = PassProgress::default();
    let result = reconcile_cluster(&applier, &config.product_image(), &server, &mut progress).await;

    let (action, failures, failure) = match result {
        Ok(PassOutcome::Paused) => {
            conditions.set_operation_flags(true, stopped);
            (Action::await_change(), previous.transient_failures, None)
        }
        Ok(PassOutcome::Reconciled(Outcome::Converged)) => {
            conditions.set_operation_flags(false, stopped);
            conditions.converged(&progress);
            info!(writes = progress.writes(), "reconciled");
            (Action::requeue(config.resync), 0, None)
        }
        Ok(PassOutcome::Reconciled(Outcome::Requeue { after, reason })) => {
            conditions.set_operation_flags(false, stopped);
            conditions.waiting(&progress, &reason);
            (Action::requeue(after), 0, None)
        }
        Err(Error::Cancelled) => {
            debug!("pass cancelled, leaving status untouched");
            return Err(Error::Cancelled);
        }
        Err(e) => {
            conditions.set_operation_flags(false, stopped);
            match e.category() {
                ErrorCategory::Validation => {
                    warn!(error = %e, "spec rejected, waiting for a change");
                    conditions.failed(&progress, &e);
                    (Action::await_change(), 0, None)
                }
                ErrorCategory::Reference => {
                    warn!(error = %e, "referenced object missing");
                    conditions.failed(&progress, &e);
                    (Action::requeue(config.reference_requeue), 0, None)
                }
                ErrorCategory::Transient => {
                    let failures = previous
                        .transient_failures
                        .saturating_add(1)
                        .min(failure_ceiling(config.transient_failure_threshold));
                    if failures >= config.transient_failure_threshold {
                        conditions.escalate(&e);
                    }
                    (Action::await_change(), failures, Some(e))
                }
            }
        }
    };

    let next = next_status(conditions, failures);
    if server.status.as_ref() != Some(&next) {
        let namespace = server.namespace().unwrap_or_default();
        cancellable(
            &token,
            ctx.store.patch_status(&namespace, &server.name_any(), &next),
        )
        .await?;
        publish_transitions(&server, &ctx, &previous, &next).await;
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(action),
    }
}

/// Requeue after a failed pass
///
/// Only transient and cancelled passes end up here. The delay doubles with
/// the failures recorded in status before the pass.
pub fn error_policy(server: Arc<SparkHistoryServer>, error: &Error, _ctx: Arc<Context>) -> Action {
    let failures = server
        .status
        .as_ref()
        .map(|s| s.transient_failures)
        .unwrap_or(0);
    let delay = backoff(failures);
    warn!(
        server = %server.name_any(),
        error = %error,
        failures,
        retry_in = %humantime::format_duration(delay),
        "reconcile failed"
    );
    Action::requeue(delay)
}

/// An event worth recording between two statuses
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Normal or Warning
    pub type_: EventType,
    /// Event reason
    pub reason: &'static str,
    /// Human readable note
    pub note: String,
}

/// Events implied by moving from `previous` to `next`
pub fn transitions(
    previous: &SparkHistoryServerStatus,
    next: &SparkHistoryServerStatus,
) -> Vec<Transition> {
    let find = |status: &SparkHistoryServerStatus, type_: &str| {
        status
            .conditions
            .iter()
            .find(|c| c.type_ == type_)
            .map(|c| (c.status.clone(), c.reason.clone(), c.message.clone()))
    };
    let is_true = |status: &SparkHistoryServerStatus, type_: &str| {
        find(status, type_).is_some_and(|(s, _, _)| s == ConditionStatus::True)
    };

    let mut events = Vec::new();

    if let Some((_, reason, message)) = find(next, PROGRESSING) {
        let changed = find(previous, PROGRESSING).map(|(_, r, _)| r) != Some(reason.clone());
        let warning = match reason.as_str() {
            reasons::VALIDATION_FAILED => Some(event_reasons::VALIDATION_FAILED),
            reasons::REFERENCE_NOT_FOUND => Some(event_reasons::REFERENCE_NOT_FOUND),
            reasons::TRANSIENT_FAILURE => Some(event_reasons::TRANSIENT_FAILURE),
            _ => None,
        };
        if let (true, Some(reason)) = (changed, warning) {
            events.push(Transition {
                type_: EventType::Warning,
                reason,
                note: message,
            });
        }
    }

    if is_true(next, AVAILABLE) && !is_true(previous, AVAILABLE) {
        events.push(Transition {
            type_: EventType::Normal,
            reason: event_reasons::AVAILABLE,
            note: "every role group converged".to_string(),
        });
    }

    if is_true(next, RECONCILIATION_PAUSED) && !is_true(previous, RECONCILIATION_PAUSED) {
        events.push(Transition {
            type_: EventType::Normal,
            reason: event_reasons::PAUSED,
            note: "reconciliation paused by the administrator".to_string(),
        });
    }

    events
}

async fn publish_transitions(
    server: &SparkHistoryServer,
    ctx: &Context,
    previous: &SparkHistoryServerStatus,
    next: &SparkHistoryServerStatus,
) {
    let object_ref = server.object_ref(&());
    for transition in transitions(previous, next) {
        ctx.events
            .publish(
                &object_ref,
                transition.type_,
                transition.reason,
                actions::RECONCILE,
                Some(transition.note),
            )
            .await;
    }
}

/// Run the controller until shutdown
///
/// `shutdown` is cancelled by the caller on SIGTERM. In-flight passes stop at
/// the next store call; the controller stream drains on the same signal.
pub async fn run(client: Client, config: ControllerConfig, shutdown: CancellationToken) {
    let servers: Api<SparkHistoryServer> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(client.clone(), config, shutdown));

    info!("- SparkHistoryServer controller");

    // Status writes must not wake the object ahead of its backoff, so the
    // primary watch only passes generation changes.
    let (reader, writer) = reflector::store();
    let stream = watcher(
        servers,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .default_backoff()
    .reflect(writer)
    .applied_objects()
    .predicate_filter(predicates::generation);

    Controller::for_stream(stream, reader)
        .owns(Api::<ConfigMap>::all(client.clone()), owned_watcher())
        .owns(Api::<Secret>::all(client.clone()), owned_watcher())
        .owns(Api::<PersistentVolumeClaim>::all(client.clone()), owned_watcher())
        .owns(Api::<StatefulSet>::all(client.clone()), owned_watcher())
        .owns(Api::<Service>::all(client.clone()), owned_watcher())
        .owns(Api::<Ingress>::all(client.clone()), owned_watcher())
        .owns(Api::<PodDisruptionBudget>::all(client), owned_watcher())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("SparkHistoryServer"))
        .await;
}

fn owned_watcher() -> WatcherConfig {
    WatcherConfig::default()
        .labels(&format!("{LABEL_MANAGED_BY}={MANAGED_BY}"))
        .timeout(WATCH_TIMEOUT_SECS)
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Display>(
    controller: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => debug!(controller, ?action, "reconciliation completed"),
            Err(e) => error!(controller, error = %e, "reconciliation error"),
        }
        std::future::ready(())
    }
}
