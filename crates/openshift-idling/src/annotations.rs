//! Well-known annotations read and written during idling.
//!
//! See <https://kubernetes.io/docs/concepts/overview/working-with-objects/annotations/>
//! for more information on Kubernetes annotations.
use std::collections::BTreeMap;

use jiff::Timestamp;
use k8s_openapi::{api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::reference::{ObjectRef, RecordedScaleReference};

/// Serialized reference to the object which created the annotated object.
pub const CREATED_BY: &str = "kubernetes.io/created-by";

/// Name of the DeploymentConfig owning the annotated pod or ReplicationController.
pub const DEPLOYMENT_CONFIG: &str = "openshift.io/deployment-config.name";

/// JSON list of the scalable resources to wake up once the service receives traffic.
pub const UNIDLE_TARGETS: &str = "idling.alpha.openshift.io/unidle-targets";

/// The time at which the annotated object was idled.
pub const IDLED_AT: &str = "idling.alpha.openshift.io/idled-at";

/// The number of replicas a scalable resource ran before it was idled.
pub const PREVIOUS_SCALE: &str = "idling.alpha.openshift.io/previous-scale";

pub const DEPLOYMENT_CONFIG_KIND: &str = "DeploymentConfig";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("could not decode the creator reference {raw:?}"))]
    DecodeCreatorReference {
        source: serde_json::Error,
        raw: String,
    },

    #[snafu(display("failed to decode the unidle targets annotation"))]
    DecodeUnidleTargets { source: serde_json::Error },

    #[snafu(display("failed to encode the unidle targets annotation"))]
    EncodeUnidleTargets { source: serde_json::Error },
}

#[derive(Debug, Deserialize)]
struct SerializedReference {
    reference: ObjectReference,
}

/// Returns the controller which created the object described by `metadata`.
///
/// The `kubernetes.io/created-by` annotation is consulted first. If it is
/// missing, the OpenShift DeploymentConfig annotation is used to build a
/// `DeploymentConfig` reference in the object's namespace. Returns `None` if
/// neither annotation is present.
pub fn creator_reference(metadata: &ObjectMeta) -> Result<Option<ObjectRef>, Error> {
    let namespace = metadata.namespace.clone().unwrap_or_default();
    let Some(annotations) = &metadata.annotations else {
        return Ok(None);
    };

    match annotations.get(CREATED_BY) {
        Some(raw) => {
            let serialized: SerializedReference =
                serde_json::from_str(raw).context(DecodeCreatorReferenceSnafu { raw })?;
            let mut reference = ObjectRef::from(&serialized.reference);
            if reference.namespace.is_empty() {
                reference.namespace = namespace;
            }

            Ok(Some(reference))
        }
        None => Ok(annotations
            .get(DEPLOYMENT_CONFIG)
            .map(|deployment_config| ObjectRef {
                api_version: String::new(),
                kind: DEPLOYMENT_CONFIG_KIND.to_owned(),
                namespace,
                name: deployment_config.clone(),
            })),
    }
}

/// Reads the recorded unidle targets, returning `None` if the annotation is absent.
pub fn unidle_targets(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<Vec<RecordedScaleReference>>, Error> {
    annotations
        .get(UNIDLE_TARGETS)
        .map(|raw| serde_json::from_str(raw).context(DecodeUnidleTargetsSnafu))
        .transpose()
}

/// Records `targets` and the idling time in `annotations`.
pub fn set_idle_annotations(
    annotations: &mut BTreeMap<String, String>,
    targets: &[RecordedScaleReference],
    now: Timestamp,
) -> Result<(), Error> {
    set_unidle_targets(annotations, targets)?;
    annotations.insert(IDLED_AT.to_owned(), format_timestamp(now));

    Ok(())
}

/// Replaces the recorded unidle targets in `annotations`.
pub fn set_unidle_targets(
    annotations: &mut BTreeMap<String, String>,
    targets: &[RecordedScaleReference],
) -> Result<(), Error> {
    let targets = serde_json::to_string(targets).context(EncodeUnidleTargetsSnafu)?;
    annotations.insert(UNIDLE_TARGETS.to_owned(), targets);

    Ok(())
}

/// Removes every trace of idling from `annotations`.
pub fn clear_idle_annotations(annotations: &mut BTreeMap<String, String>) {
    annotations.remove(UNIDLE_TARGETS);
    annotations.remove(IDLED_AT);
}

/// Formats `timestamp` as an RFC 3339 string in UTC with second precision.
pub fn format_timestamp(timestamp: Timestamp) -> String {
    timestamp.strftime("%Y-%m-%dT%H:%M:%SZ").to_string()
}
