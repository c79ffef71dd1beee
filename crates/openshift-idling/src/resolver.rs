//! Discovery of the scalable resources behind an endpoints object.
//!
//! Every address of an endpoints object may point at a pod. Each pod names
//! the controller which created it, and that controller may in turn have been
//! created by a higher level controller. For example, a ReplicationController
//! created by a DeploymentConfig. The deepest creator found this way is the
//! resource that has to be scaled to idle the service.
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::core::DynamicObject;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    annotations::{self, creator_reference},
    client,
    reference::{CrossGroupObjectReference, ObjectRef, ParseGroupVersionError},
};

const POD_KIND: &str = "Pod";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to find controller for pod {namespace}/{name}"))]
    FetchPod {
        source: client::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display("unable to find controller for pod {namespace}/{name}"))]
    PodCreator {
        source: annotations::Error,
        namespace: String,
        name: String,
    },

    #[snafu(display(
        "unable to find controller for pod {namespace}/{name}: no creator reference listed"
    ))]
    NoCreator { namespace: String, name: String },

    #[snafu(display("unable to load {kind} {name:?}"))]
    LoadController {
        source: client::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("unable to load the creator of {kind} {name:?}"))]
    ControllerCreator {
        source: annotations::Error,
        kind: String,
        name: String,
    },

    #[snafu(display("unable to load the creator of {kind} {name:?}"))]
    NormalizeReference {
        source: ParseGroupVersionError,
        kind: String,
        name: String,
    },
}

/// Loads the objects visited while resolving scale targets.
///
/// Objects which do not exist are reported as `Ok(None)`.
#[async_trait]
pub trait ObjectFetcher: Send {
    async fn get_pod(&mut self, reference: &ObjectRef) -> Result<Option<Pod>, client::Error>;

    async fn get_controller(
        &mut self,
        reference: &ObjectRef,
    ) -> Result<Option<DynamicObject>, client::Error>;
}

/// Finds the unique set of scalable resources backing `endpoints`.
///
/// Pods and controllers which no longer exist are skipped. Any other failure
/// aborts the resolution for this endpoints object.
pub async fn find_scalable_resources<F>(
    endpoints: &Endpoints,
    fetcher: &mut F,
) -> Result<BTreeSet<CrossGroupObjectReference>, Error>
where
    F: ObjectFetcher + ?Sized,
{
    // First figure out which pods are pointed to by the endpoints...
    let mut pods = BTreeMap::new();
    let addresses = endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten());

    for address in addresses {
        let Some(target) = &address.target_ref else {
            continue;
        };
        if target.kind.as_deref() != Some(POD_KIND) {
            continue;
        }

        let reference = ObjectRef::from(target);
        let pod = fetcher
            .get_pod(&reference)
            .await
            .with_context(|_| FetchPodSnafu {
                namespace: &reference.namespace,
                name: &reference.name,
            })?;

        match pod {
            Some(pod) => {
                pods.insert(reference, pod);
            }
            None => tracing::debug!(pod = %reference, "skipping pod which no longer exists"),
        }
    }

    // ...then collect the unique set of controllers owning those pods...
    let mut immediate_controllers = BTreeSet::new();
    for (reference, pod) in &pods {
        let controller = creator_reference(&pod.metadata)
            .with_context(|_| PodCreatorSnafu {
                namespace: &reference.namespace,
                name: &reference.name,
            })?
            .with_context(|| NoCreatorSnafu {
                namespace: &reference.namespace,
                name: &reference.name,
            })?;

        immediate_controllers.insert(controller);
    }

    // ...and finally check whether those controllers are owned by something
    // else again, which covers DeploymentConfigs owning ReplicationControllers.
    let mut targets = BTreeSet::new();
    for controller_ref in &immediate_controllers {
        let controller = fetcher
            .get_controller(controller_ref)
            .await
            .with_context(|_| LoadControllerSnafu {
                kind: &controller_ref.kind,
                name: &controller_ref.name,
            })?;

        let Some(controller) = controller else {
            tracing::debug!(controller = %controller_ref, "skipping controller which no longer exists");
            continue;
        };

        let parent_ref =
            creator_reference(&controller.metadata).with_context(|_| ControllerCreatorSnafu {
                kind: &controller_ref.kind,
                name: &controller_ref.name,
            })?;

        let target = parent_ref
            .as_ref()
            .unwrap_or(controller_ref)
            .to_cross_group()
            .with_context(|_| NormalizeReferenceSnafu {
                kind: &controller_ref.kind,
                name: &controller_ref.name,
            })?;

        tracing::debug!(controller = %controller_ref, target.kind, target.name, "found scalable resource");
        targets.insert(target);
    }

    Ok(targets)
}
