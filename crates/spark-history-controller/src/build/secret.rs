//! S3 credentials
//!
//! Literal keys are written to a Secret. Secret-class credentials are never
//! materialized by the operator: the pod gets an ephemeral volume whose claim
//! template asks the secret class to issue them.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EphemeralVolumeSource, PersistentVolumeClaimSpec, PersistentVolumeClaimTemplate, Secret,
    SecretVolumeSource, Volume, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use spark_history_common::Error;

use super::{BuildContext, SUFFIX_SECRET};
use crate::resolve::CredentialSource;

/// Key of the access key id
pub const ACCESS_KEY: &str = "ACCESS_KEY";
/// Key of the secret access key
pub const SECRET_KEY: &str = "SECRET_KEY";
/// Volume holding the S3 credentials
pub const S3_CREDENTIALS_VOLUME: &str = "s3-credentials";

/// Annotation naming the issuing secret class
pub const SECRET_CLASS_ANNOTATION: &str = "secrets.kubedoop.dev/class";
/// Annotation scoping the issued secret
pub const SECRET_SCOPE_ANNOTATION: &str = "secrets.kubedoop.dev/scope";
/// Storage class served by the secret CSI driver
pub const SECRET_STORAGE_CLASS: &str = "secrets.kubedoop.dev";

/// Secret with literal S3 keys, if the bucket uses them
pub fn build_secret(ctx: &BuildContext<'_>, group: &str) -> Result<Option<Secret>, Error> {
    let Some(CredentialSource::Static {
        access_key,
        secret_key,
    }) = ctx.refs.s3_bucket().and_then(|b| b.credentials.as_ref())
    else {
        return Ok(None);
    };

    Ok(Some(Secret {
        metadata: ctx.metadata(group, SUFFIX_SECRET)?,
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([
            (ACCESS_KEY.to_string(), access_key.clone()),
            (SECRET_KEY.to_string(), secret_key.clone()),
        ])),
        ..Default::default()
    }))
}

/// Volume exposing the S3 credentials as files, if the bucket has any
pub fn credentials_volume(ctx: &BuildContext<'_>, group: &str) -> Result<Option<Volume>, Error> {
    let Some(credentials) = ctx.refs.s3_bucket().and_then(|b| b.credentials.as_ref()) else {
        return Ok(None);
    };

    let volume = match credentials {
        CredentialSource::Static { .. } => Volume {
            name: S3_CREDENTIALS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(ctx.child_name(group, SUFFIX_SECRET)?),
                ..Default::default()
            }),
            ..Default::default()
        },
        CredentialSource::SecretClass { class, scope } => {
            let mut annotations =
                BTreeMap::from([(SECRET_CLASS_ANNOTATION.to_string(), class.clone())]);
            if let Some(scope) = scope {
                annotations.insert(SECRET_SCOPE_ANNOTATION.to_string(), scope.clone());
            }
            Volume {
                name: S3_CREDENTIALS_VOLUME.to_string(),
                ephemeral: Some(EphemeralVolumeSource {
                    volume_claim_template: Some(PersistentVolumeClaimTemplate {
                        metadata: Some(ObjectMeta {
                            annotations: Some(annotations),
                            ..Default::default()
                        }),
                        spec: PersistentVolumeClaimSpec {
                            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                            storage_class_name: Some(SECRET_STORAGE_CLASS.to_string()),
                            resources: Some(VolumeResourceRequirements {
                                requests: Some(BTreeMap::from([(
                                    "storage".to_string(),
                                    Quantity("1Mi".to_string()),
                                )])),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                    }),
                }),
                ..Default::default()
            }
        }
    };
    Ok(Some(volume))
}
