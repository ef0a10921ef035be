//! Common types for the Spark History Server operator: CRDs, errors and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod telemetry;

pub use crd::{Condition, ConditionStatus};
pub use error::{Error, ErrorCategory};
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "spark-history-operator";

/// Prefix of labels and annotations owned by this operator
pub const ANNOTATION_PREFIX: &str = "spark.kubedoop.dev";
