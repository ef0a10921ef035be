//! Spark History Server controller
//!
//! Turns a SparkHistoryServer into its dependent resources: merges role group
//! configuration, resolves external references, builds the children and
//! applies them in dependency order, then reports status conditions.

#![deny(missing_docs)]

/// Dependent-resource builders
pub mod build;
/// Cluster-level reconciliation
pub mod cluster;
/// kube-runtime controller, status and event handling
pub mod controller;
/// Container image resolution
pub mod image;
/// Configuration layering
pub mod merge;
/// External reference resolution
pub mod resolve;
/// Dependent resources and their families
pub mod resource;
/// Role-level reconciliation
pub mod role;
/// Role group reconciliation and the applier
pub mod role_group;
/// Status conditions
pub mod status;
/// Object access seam
pub mod store;

pub use controller::{error_policy, reconcile, run, Context, ControllerConfig};
pub use store::{KubeStore, ResourceStore};
