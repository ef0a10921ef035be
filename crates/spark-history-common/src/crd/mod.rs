//! Custom Resource Definitions used by the Spark History Server operator
//!
//! `SparkHistoryServer` is owned by this operator. `S3Bucket`, `S3Connection`
//! and `AuthenticationClass` are shared platform resources that are only read.

mod authentication;
mod history_server;
mod s3;
mod types;

pub use authentication::{
    AuthenticationClass, AuthenticationClassSpec, AuthenticationProvider, OidcProvider,
};
pub use history_server::{
    AuthenticationSpec, ClusterConfigSpec, ClusterOperationSpec, ContainerLoggingSpec, CpuSpec,
    HistoryServerConfig, ImageSpec, IngressSpec, ListenerClass, LogFileDirectorySpec, LogLevel,
    LoggingSpec, MemorySpec, OidcSpec, OverridesSpec, PersistenceSpec, PodDisruptionBudgetSpec,
    ResourcesSpec, RoleConfigSpec, RoleGroupSpec, RoleSpec, S3LogFileSpec, SparkHistoryServer,
    SparkHistoryServerSpec, SparkHistoryServerStatus, NODE_ROLE,
};
pub use s3::{
    CredentialScope, S3Bucket, S3BucketRef, S3BucketSpec, S3Connection, S3ConnectionRef,
    S3ConnectionSpec, S3Credentials,
};
pub use types::{Condition, ConditionStatus};
