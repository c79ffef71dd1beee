//! Reference types used to address the objects involved in idling.
//!
//! Kubernetes identifies objects in several slightly different ways. This
//! module provides the three forms the idling machinery needs:
//!
//! - [`ObjectRef`]: a fully qualified reference (API version, kind, namespace
//!   and name) used to fetch pods and controllers.
//! - [`CrossGroupObjectReference`]: a version independent `(kind, name, group)`
//!   triple identifying a scale target.
//! - [`RecordedScaleReference`]: a scale target plus the replica count to
//!   restore it to, as persisted in the unidle targets annotation.
use std::{fmt, str::FromStr};

use k8s_openapi::api::core::v1::ObjectReference;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ParseGroupVersionError {
    #[snafu(display("unexpected GroupVersion string {input:?}"))]
    TooManySeparators { input: String },
}

/// The parsed form of an `apiVersion` string, with the `(<GROUP>/)<VERSION>`
/// format, for example `apps.openshift.io/v1` or `v1`.
///
/// Unlike a strict API version, the empty string is accepted and parses into
/// an empty group and version. References built from the OpenShift
/// DeploymentConfig annotation carry no API version at all. A leading `/`
/// addresses the core group, so `/v1` is the same as `v1`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl FromStr for GroupVersion {
    type Err = ParseGroupVersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.is_empty() {
            return Ok(Self::default());
        }

        match input.split_once('/') {
            None => Ok(Self {
                group: String::new(),
                version: input.to_owned(),
            }),
            Some((group, version)) => {
                ensure!(
                    !version.contains('/'),
                    TooManySeparatorsSnafu { input }
                );

                Ok(Self {
                    group: group.to_owned(),
                    version: version.to_owned(),
                })
            }
        }
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

/// A reference to a namespaced object, keyed on everything needed to fetch it.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    /// Parses the API version of this reference.
    pub fn group_version(&self) -> Result<GroupVersion, ParseGroupVersionError> {
        self.api_version.parse()
    }

    /// Normalizes this reference into a version independent scale target.
    pub fn to_cross_group(&self) -> Result<CrossGroupObjectReference, ParseGroupVersionError> {
        let GroupVersion { group, .. } = self.group_version()?;

        Ok(CrossGroupObjectReference {
            kind: self.kind.clone(),
            name: self.name.clone(),
            group,
        })
    }
}

impl From<&ObjectReference> for ObjectRef {
    fn from(reference: &ObjectReference) -> Self {
        Self {
            api_version: reference.api_version.clone().unwrap_or_default(),
            kind: reference.kind.clone().unwrap_or_default(),
            namespace: reference.namespace.clone().unwrap_or_default(),
            name: reference.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// The namespace and name of an object, rendered as `namespace/name`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifies a scalable resource independently of its API version.
///
/// The namespace is implied by the endpoints object that lists the target.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub struct CrossGroupObjectReference {
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
}

impl CrossGroupObjectReference {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            group: group.into(),
        }
    }
}

/// A scale target together with the number of replicas it should be restored
/// to once its service receives traffic again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordedScaleReference {
    #[serde(flatten)]
    pub target: CrossGroupObjectReference,

    pub replicas: i32,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", "", "")]
    #[case("v1", "", "v1")]
    #[case("apps/v1", "apps", "v1")]
    #[case("apps.openshift.io/v1", "apps.openshift.io", "v1")]
    fn valid_group_version(#[case] input: &str, #[case] group: &str, #[case] version: &str) {
        let group_version = GroupVersion::from_str(input).expect("valid group version");
        assert_eq!(group_version.group, group);
        assert_eq!(group_version.version, version);
        assert_eq!(group_version.to_string(), input);
    }

    #[rstest]
    #[case("/", "")]
    #[case("/v1", "v1")]
    fn leading_separator_addresses_the_core_group(#[case] input: &str, #[case] version: &str) {
        let group_version = GroupVersion::from_str(input).expect("valid group version");
        assert_eq!(group_version, GroupVersion {
            group: String::new(),
            version: version.to_owned(),
        });
        assert_eq!(group_version.to_string(), version);
    }

    #[rstest]
    #[case("apps/v1/extra", ParseGroupVersionError::TooManySeparators { input: "apps/v1/extra".into() })]
    #[case("/v1/extra", ParseGroupVersionError::TooManySeparators { input: "/v1/extra".into() })]
    fn invalid_group_version(#[case] input: &str, #[case] error: ParseGroupVersionError) {
        let err = GroupVersion::from_str(input).expect_err("invalid group version");
        assert_eq!(err, error);
    }

    #[test]
    fn cross_group_reference_drops_version() {
        let reference = ObjectRef {
            api_version: "apps.openshift.io/v1".into(),
            kind: "DeploymentConfig".into(),
            namespace: "somens".into(),
            name: "somedc".into(),
        };

        assert_eq!(
            reference.to_cross_group().expect("valid reference"),
            CrossGroupObjectReference::new("DeploymentConfig", "somedc", "apps.openshift.io")
        );
    }

    #[test]
    fn recorded_scale_reference_json_layout() {
        let records = vec![
            RecordedScaleReference {
                target: CrossGroupObjectReference::new("ReplicationController", "somerc", ""),
                replicas: 2,
            },
            RecordedScaleReference {
                target: CrossGroupObjectReference::new(
                    "DeploymentConfig",
                    "somedc",
                    "apps.openshift.io",
                ),
                replicas: 3,
            },
        ];

        let json = serde_json::to_string(&records).expect("records serialize");
        assert_eq!(
            json,
            r#"[{"kind":"ReplicationController","name":"somerc","replicas":2},{"kind":"DeploymentConfig","name":"somedc","group":"apps.openshift.io","replicas":3}]"#
        );

        let parsed: Vec<RecordedScaleReference> =
            serde_json::from_str(&json).expect("records deserialize");
        assert_eq!(parsed, records);
    }
}
