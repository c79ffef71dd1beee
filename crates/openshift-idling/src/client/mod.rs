//! Access to the Kubernetes API as needed by idling and unidling.
//!
//! The orchestrators only talk to the cluster through [`ClusterClient`], so
//! that they can be exercised against in-memory fakes. [`KubeClusterClient`]
//! is the production implementation on top of [`kube::Client`].
use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::core::DynamicObject;
use snafu::Snafu;

use crate::{
    namespace::NamespaceScope,
    reference::{CrossGroupObjectReference, NamespacedName, ObjectRef, ParseGroupVersionError},
};

mod kube_client;

pub use kube_client::KubeClusterClient;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to get {kind} {namespace}/{name}"))]
    GetObject {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} not found"))]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to list endpoints"))]
    ListEndpoints { source: kube::Error },

    #[snafu(display("failed to discover the API group {group:?}"))]
    DiscoverGroup { source: kube::Error, group: String },

    #[snafu(display("the server doesn't have a resource of kind {kind:?} in group {group:?}"))]
    UnknownKind { group: String, kind: String },

    #[snafu(display("invalid API version {api_version:?}"))]
    ParseApiVersion {
        source: ParseGroupVersionError,
        api_version: String,
    },

    #[snafu(display("failed to get the scale of {kind} {namespace}/{name}"))]
    GetScale {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("failed to scale {kind} {namespace}/{name} to {replicas} replicas"))]
    UpdateScale {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
        replicas: i32,
    },

    #[snafu(display("failed to patch {kind} {namespace}/{name}"))]
    PatchObject {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
    },
}

impl Error {
    /// Returns whether the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// The cluster operations used by the idling and unidling orchestrators.
///
/// Lookups of individual pods and controllers report a missing object as
/// `Ok(None)`, everything else which fails is an [`Error`].
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Retrieves a single endpoints object.
    async fn get_endpoints(&self, name: &NamespacedName) -> Result<Option<Endpoints>, Error>;

    /// Lists the endpoints in `scope`, optionally filtered by a label selector.
    async fn list_endpoints(
        &self,
        scope: &NamespaceScope,
        label_selector: Option<&str>,
    ) -> Result<Vec<Endpoints>, Error>;

    async fn get_pod(&self, reference: &ObjectRef) -> Result<Option<Pod>, Error>;

    /// Retrieves an arbitrary controller object, such as a ReplicationController.
    async fn get_controller(&self, reference: &ObjectRef) -> Result<Option<DynamicObject>, Error>;

    /// Returns the current number of replicas of `target`.
    ///
    /// Fails with [`Error::NotFound`] if the target does not exist.
    async fn get_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
    ) -> Result<i32, Error>;

    /// Sets the desired number of replicas of `target` through its scale
    /// subresource.
    async fn set_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        replicas: i32,
    ) -> Result<(), Error>;

    /// Merges `annotations` into the annotations of `target`. A `None` value
    /// removes the annotation.
    async fn annotate_scalable(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error>;

    /// Applies a strategic merge `patch` to an endpoints object.
    async fn patch_endpoints(
        &self,
        name: &NamespacedName,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;
}
