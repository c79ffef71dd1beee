use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Pod};
use kube::{
    Api,
    api::{ListParams, Patch, PatchParams},
    core::{ApiResource, DynamicObject},
    discovery,
};
use serde_json::json;
use snafu::{OptionExt, ResultExt};

use crate::{
    annotations::DEPLOYMENT_CONFIG_KIND,
    client::{
        ClusterClient, DiscoverGroupSnafu, Error, GetObjectSnafu, GetScaleSnafu,
        ListEndpointsSnafu, NotFoundSnafu, ParseApiVersionSnafu, PatchObjectSnafu,
        UnknownKindSnafu, UpdateScaleSnafu,
    },
    namespace::NamespaceScope,
    reference::{CrossGroupObjectReference, NamespacedName, ObjectRef},
};

/// The API group DeploymentConfigs are served from on current clusters.
/// References recorded by older clients carry the legacy (empty) group.
const OPENSHIFT_APPS_GROUP: &str = "apps.openshift.io";

/// This `Client` can be used to access Kubernetes.
/// It wraps an underlying [`kube::Client`] and remembers which [`ApiResource`]
/// serves each `(group, kind)` pair for the lifetime of the client.
pub struct KubeClusterClient {
    client: kube::Client,
    patch_params: PatchParams,
    api_resources: Mutex<BTreeMap<(String, String), ApiResource>>,
}

impl KubeClusterClient {
    pub fn new(client: kube::Client, field_manager: Option<String>) -> Self {
        Self {
            client,
            patch_params: PatchParams {
                field_manager,
                ..PatchParams::default()
            },
            api_resources: Mutex::default(),
        }
    }

    /// Resolves the [`ApiResource`] serving `kind` in `group`, consulting API
    /// discovery on first use.
    async fn api_resource(&self, group: &str, kind: &str) -> Result<ApiResource, Error> {
        let key = (group.to_owned(), kind.to_owned());
        let cached = self.cached_api_resources().get(&key).cloned();
        if let Some(resource) = cached {
            return Ok(resource);
        }

        let mut candidates = vec![group];
        if group.is_empty() && kind == DEPLOYMENT_CONFIG_KIND {
            candidates.push(OPENSHIFT_APPS_GROUP);
        }

        let mut resolved = None;
        for candidate in candidates {
            match discovery::group(&self.client, candidate).await {
                Ok(api_group) => {
                    if let Some((resource, _)) = api_group.recommended_kind(kind) {
                        resolved = Some(resource);
                        break;
                    }
                }
                // A missing legacy fallback group is not an error of its own
                Err(error) if candidate != group => {
                    tracing::debug!(%error, group = candidate, "fallback API group is not served");
                }
                Err(error) => {
                    return Err(error).context(DiscoverGroupSnafu { group: candidate });
                }
            }
        }

        let resource = resolved.context(UnknownKindSnafu { group, kind })?;
        tracing::debug!(group, kind, plural = %resource.plural, "resolved API resource");

        self.cached_api_resources().insert(key, resource.clone());
        Ok(resource)
    }

    fn cached_api_resources(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), ApiResource>> {
        self.api_resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn scalable_api(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
    ) -> Result<Api<DynamicObject>, Error> {
        let resource = self.api_resource(&target.group, &target.kind).await?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_endpoints(&self, name: &NamespacedName) -> Result<Option<Endpoints>, Error> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &name.namespace);
        api.get_opt(&name.name).await.context(GetObjectSnafu {
            kind: "Endpoints",
            namespace: &name.namespace,
            name: &name.name,
        })
    }

    async fn list_endpoints(
        &self,
        scope: &NamespaceScope,
        label_selector: Option<&str>,
    ) -> Result<Vec<Endpoints>, Error> {
        let api: Api<Endpoints> = scope.get_api(&self.client);
        let params = match label_selector {
            Some(selector) => ListParams::default().labels(selector),
            None => ListParams::default(),
        };

        Ok(api.list(&params).await.context(ListEndpointsSnafu)?.items)
    }

    async fn get_pod(&self, reference: &ObjectRef) -> Result<Option<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &reference.namespace);
        api.get_opt(&reference.name).await.context(GetObjectSnafu {
            kind: &reference.kind,
            namespace: &reference.namespace,
            name: &reference.name,
        })
    }

    async fn get_controller(&self, reference: &ObjectRef) -> Result<Option<DynamicObject>, Error> {
        let group_version = reference
            .group_version()
            .context(ParseApiVersionSnafu {
                api_version: &reference.api_version,
            })?;
        let resource = self
            .api_resource(&group_version.group, &reference.kind)
            .await?;

        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &reference.namespace, &resource);
        api.get_opt(&reference.name).await.context(GetObjectSnafu {
            kind: &reference.kind,
            namespace: &reference.namespace,
            name: &reference.name,
        })
    }

    async fn get_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
    ) -> Result<i32, Error> {
        let api = self.scalable_api(namespace, target).await?;

        let exists = api
            .get_opt(&target.name)
            .await
            .context(GetObjectSnafu {
                kind: &target.kind,
                namespace,
                name: &target.name,
            })?
            .is_some();
        if !exists {
            return NotFoundSnafu {
                kind: &target.kind,
                namespace,
                name: &target.name,
            }
            .fail();
        }

        let scale = api.get_scale(&target.name).await.context(GetScaleSnafu {
            kind: &target.kind,
            namespace,
            name: &target.name,
        })?;

        Ok(scale
            .spec
            .and_then(|spec| spec.replicas)
            .unwrap_or_default())
    }

    async fn set_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        replicas: i32,
    ) -> Result<(), Error> {
        let api = self.scalable_api(namespace, target).await?;
        let patch = json!({ "spec": { "replicas": replicas } });

        api.patch_scale(&target.name, &self.patch_params, &Patch::Merge(&patch))
            .await
            .context(UpdateScaleSnafu {
                kind: &target.kind,
                namespace,
                name: &target.name,
                replicas,
            })?;

        Ok(())
    }

    async fn annotate_scalable(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        let api = self.scalable_api(namespace, target).await?;
        let patch = json!({ "metadata": { "annotations": annotations } });

        api.patch(&target.name, &self.patch_params, &Patch::Merge(&patch))
            .await
            .context(PatchObjectSnafu {
                kind: &target.kind,
                namespace,
                name: &target.name,
            })?;

        Ok(())
    }

    async fn patch_endpoints(
        &self,
        name: &NamespacedName,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &name.namespace);

        api.patch(&name.name, &self.patch_params, &Patch::Strategic(patch))
            .await
            .context(PatchObjectSnafu {
                kind: "Endpoints",
                namespace: &name.namespace,
                name: &name.name,
            })?;

        Ok(())
    }
}
