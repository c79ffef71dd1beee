//! An in-memory [`ClusterClient`] recording every call made against it.
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{EndpointAddress, EndpointSubset, Endpoints, ObjectReference, Pod},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::core::{DynamicObject, TypeMeta};
use serde_json::{Value, json};

use crate::{
    annotations::{CREATED_BY, DEPLOYMENT_CONFIG},
    client::{ClusterClient, Error},
    namespace::NamespaceScope,
    reference::{CrossGroupObjectReference, NamespacedName, ObjectRef},
};

pub const NAMESPACE: &str = "somens";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    GetEndpoints(String),
    ListEndpoints(Option<String>),
    GetPod(String),
    GetController(String),
    GetScale(String),
    SetScale(String, i32),
    AnnotateScalable(String, BTreeMap<String, Option<String>>),
    PatchEndpoints(String, Value),
}

/// Operations which can be made to fail for a given object name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Failure {
    GetPod(String),
    GetController(String),
    GetScale(String),
    SetScale(String),
    AnnotateScalable(String),
    PatchEndpoints(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Scalable {
    pub replicas: i32,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeCluster {
    endpoints: Mutex<BTreeMap<NamespacedName, Endpoints>>,
    pods: BTreeMap<NamespacedName, Pod>,
    controllers: BTreeMap<NamespacedName, DynamicObject>,
    scalables: Mutex<BTreeMap<(String, CrossGroupObjectReference), Scalable>>,
    failures: BTreeSet<Failure>,
    calls: Mutex<Vec<Call>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of(metadata: &ObjectMeta) -> NamespacedName {
    NamespacedName::new(
        metadata.namespace.clone().unwrap_or_default(),
        metadata.name.clone().unwrap_or_default(),
    )
}

fn injected(name: &str) -> Error {
    Error::UnknownKind {
        group: "injected".into(),
        kind: name.into(),
    }
}

impl FakeCluster {
    pub fn with_endpoints(self, endpoints: Endpoints) -> Self {
        lock(&self.endpoints).insert(key_of(&endpoints.metadata), endpoints);
        self
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.pods.insert(key_of(&pod.metadata), pod);
        self
    }

    pub fn with_controller(mut self, controller: DynamicObject) -> Self {
        self.controllers
            .insert(key_of(&controller.metadata), controller);
        self
    }

    pub fn with_scalable(self, target: CrossGroupObjectReference, replicas: i32) -> Self {
        self.with_scalable_in(NAMESPACE, target, replicas)
    }

    pub fn with_scalable_in(
        self,
        namespace: &str,
        target: CrossGroupObjectReference,
        replicas: i32,
    ) -> Self {
        lock(&self.scalables).insert((namespace.to_owned(), target), Scalable {
            replicas,
            annotations: BTreeMap::new(),
        });
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failures.insert(failure);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn pod_lookups(&self) -> usize {
        self.count_calls(|call| matches!(call, Call::GetPod(_)))
    }

    pub fn controller_lookups(&self) -> usize {
        self.count_calls(|call| matches!(call, Call::GetController(_)))
    }

    /// Returns the writes made against the cluster, in order.
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::SetScale(..) | Call::AnnotateScalable(..) | Call::PatchEndpoints(..)
                )
            })
            .collect()
    }

    pub fn endpoints_annotations(&self, name: &str) -> BTreeMap<String, String> {
        self.endpoints_annotations_in(NAMESPACE, name)
    }

    pub fn endpoints_annotations_in(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        lock(&self.endpoints)
            .get(&NamespacedName::new(namespace, name))
            .and_then(|endpoints| endpoints.metadata.annotations.clone())
            .unwrap_or_default()
    }

    pub fn scalable(&self, target: &CrossGroupObjectReference) -> Option<Scalable> {
        self.scalable_in(NAMESPACE, target)
    }

    pub fn scalable_in(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
    ) -> Option<Scalable> {
        lock(&self.scalables)
            .get(&(namespace.to_owned(), target.clone()))
            .cloned()
    }

    fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    fn check(&self, failure: Failure, name: &str) -> Result<(), Error> {
        if self.failures.contains(&failure) {
            Err(injected(name))
        } else {
            Ok(())
        }
    }

    fn not_found(namespace: &str, target: &CrossGroupObjectReference) -> Error {
        Error::NotFound {
            kind: target.kind.clone(),
            namespace: namespace.to_owned(),
            name: target.name.clone(),
        }
    }
}

/// Applies the annotation part of a merge patch, `null` removing the key.
fn apply_annotations_patch(annotations: &mut BTreeMap<String, String>, patch: &Value) {
    let Some(changes) = patch.pointer("/metadata/annotations").and_then(Value::as_object) else {
        return;
    };

    for (key, value) in changes {
        match value.as_str() {
            Some(value) => {
                annotations.insert(key.clone(), value.to_owned());
            }
            None => {
                annotations.remove(key);
            }
        }
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_endpoints(&self, name: &NamespacedName) -> Result<Option<Endpoints>, Error> {
        self.record(Call::GetEndpoints(name.name.clone()));
        Ok(lock(&self.endpoints).get(name).cloned())
    }

    async fn list_endpoints(
        &self,
        scope: &NamespaceScope,
        label_selector: Option<&str>,
    ) -> Result<Vec<Endpoints>, Error> {
        self.record(Call::ListEndpoints(label_selector.map(str::to_owned)));

        let wanted_label = label_selector.and_then(|selector| selector.split_once('='));
        Ok(lock(&self.endpoints)
            .iter()
            .filter(|(name, _)| {
                scope
                    .namespace()
                    .is_none_or(|namespace| namespace == name.namespace)
            })
            .filter(|(_, endpoints)| match wanted_label {
                Some((key, value)) => endpoints
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(key))
                    .is_some_and(|label| label == value),
                None => true,
            })
            .map(|(_, endpoints)| endpoints.clone())
            .collect())
    }

    async fn get_pod(&self, reference: &ObjectRef) -> Result<Option<Pod>, Error> {
        self.record(Call::GetPod(reference.name.clone()));
        self.check(Failure::GetPod(reference.name.clone()), &reference.name)?;

        Ok(self
            .pods
            .get(&NamespacedName::new(&reference.namespace, &reference.name))
            .cloned())
    }

    async fn get_controller(&self, reference: &ObjectRef) -> Result<Option<DynamicObject>, Error> {
        self.record(Call::GetController(reference.name.clone()));
        self.check(Failure::GetController(reference.name.clone()), &reference.name)?;

        Ok(self
            .controllers
            .get(&NamespacedName::new(&reference.namespace, &reference.name))
            .cloned())
    }

    async fn get_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
    ) -> Result<i32, Error> {
        self.record(Call::GetScale(target.name.clone()));
        self.check(Failure::GetScale(target.name.clone()), &target.name)?;

        lock(&self.scalables)
            .get(&(namespace.to_owned(), target.clone()))
            .map(|scalable| scalable.replicas)
            .ok_or_else(|| Self::not_found(namespace, target))
    }

    async fn set_scale(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        replicas: i32,
    ) -> Result<(), Error> {
        self.record(Call::SetScale(target.name.clone(), replicas));
        self.check(Failure::SetScale(target.name.clone()), &target.name)?;

        let mut scalables = lock(&self.scalables);
        let scalable = scalables
            .get_mut(&(namespace.to_owned(), target.clone()))
            .ok_or_else(|| Self::not_found(namespace, target))?;
        scalable.replicas = replicas;
        Ok(())
    }

    async fn annotate_scalable(
        &self,
        namespace: &str,
        target: &CrossGroupObjectReference,
        annotations: &BTreeMap<String, Option<String>>,
    ) -> Result<(), Error> {
        self.record(Call::AnnotateScalable(
            target.name.clone(),
            annotations.clone(),
        ));
        self.check(Failure::AnnotateScalable(target.name.clone()), &target.name)?;

        let mut scalables = lock(&self.scalables);
        let scalable = scalables
            .get_mut(&(namespace.to_owned(), target.clone()))
            .ok_or_else(|| Self::not_found(namespace, target))?;
        for (key, value) in annotations {
            match value {
                Some(value) => {
                    scalable.annotations.insert(key.clone(), value.clone());
                }
                None => {
                    scalable.annotations.remove(key);
                }
            }
        }
        Ok(())
    }

    async fn patch_endpoints(&self, name: &NamespacedName, patch: &Value) -> Result<(), Error> {
        self.record(Call::PatchEndpoints(name.name.clone(), patch.clone()));
        self.check(Failure::PatchEndpoints(name.name.clone()), &name.name)?;

        let mut endpoints = lock(&self.endpoints);
        if let Some(endpoints) = endpoints.get_mut(name) {
            let annotations = endpoints.metadata.annotations.get_or_insert_default();
            apply_annotations_patch(annotations, patch);
        }
        Ok(())
    }
}

fn serialized_reference(namespace: &str, kind: &str, name: &str, api_version: &str) -> String {
    json!({
        "kind": "SerializedReference",
        "apiVersion": "v1",
        "reference": {
            "kind": kind,
            "namespace": namespace,
            "name": name,
            "apiVersion": api_version,
        }
    })
    .to_string()
}

fn object_meta(namespace: &str, name: &str, annotations: &[(&str, String)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        annotations: (!annotations.is_empty()).then(|| {
            annotations
                .iter()
                .map(|(key, value)| ((*key).to_owned(), value.clone()))
                .collect()
        }),
        ..ObjectMeta::default()
    }
}

/// A pod created by the ReplicationController `controller`.
pub fn pod_owned_by(name: &str, controller: &str) -> Pod {
    pod_owned_by_in(NAMESPACE, name, controller)
}

pub fn pod_owned_by_in(namespace: &str, name: &str, controller: &str) -> Pod {
    Pod {
        metadata: object_meta(namespace, name, &[(
            CREATED_BY,
            serialized_reference(namespace, "ReplicationController", controller, "v1"),
        )]),
        ..Pod::default()
    }
}

fn replication_controller(
    namespace: &str,
    name: &str,
    annotations: &[(&str, String)],
) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: "v1".into(),
            kind: "ReplicationController".into(),
        }),
        metadata: object_meta(namespace, name, annotations),
        data: json!({ "spec": { "replicas": 1 } }),
    }
}

/// A ReplicationController without any creator.
pub fn plain_controller(name: &str) -> DynamicObject {
    plain_controller_in(NAMESPACE, name)
}

pub fn plain_controller_in(namespace: &str, name: &str) -> DynamicObject {
    replication_controller(namespace, name, &[])
}

/// A ReplicationController whose creator is recorded in the created-by annotation.
pub fn controller_with_creator(name: &str, kind: &str, creator: &str) -> DynamicObject {
    controller_with_creator_api_version(name, kind, creator, "v1")
}

pub fn controller_with_creator_api_version(
    name: &str,
    kind: &str,
    creator: &str,
    api_version: &str,
) -> DynamicObject {
    replication_controller(NAMESPACE, name, &[(
        CREATED_BY,
        serialized_reference(NAMESPACE, kind, creator, api_version),
    )])
}

/// A ReplicationController only carrying the DeploymentConfig name annotation.
pub fn controller_owned_by_deployment_config(name: &str, deployment_config: &str) -> DynamicObject {
    replication_controller(NAMESPACE, name, &[(
        DEPLOYMENT_CONFIG,
        deployment_config.to_owned(),
    )])
}

pub fn pod_ref_address(pod: &str) -> EndpointAddress {
    pod_ref_address_in(NAMESPACE, pod)
}

fn pod_ref_address_in(namespace: &str, pod: &str) -> EndpointAddress {
    EndpointAddress {
        ip: "10.0.0.1".into(),
        target_ref: Some(ObjectReference {
            api_version: Some("v1".into()),
            kind: Some("Pod".into()),
            namespace: Some(namespace.into()),
            name: Some(pod.into()),
            ..ObjectReference::default()
        }),
        ..EndpointAddress::default()
    }
}

/// Endpoints named `name` whose addresses point at `pods`.
pub fn endpoints_for_pods(name: &str, pods: &[&str]) -> Endpoints {
    endpoints_for_pods_in(NAMESPACE, name, pods)
}

pub fn endpoints_for_pods_in(namespace: &str, name: &str, pods: &[&str]) -> Endpoints {
    Endpoints {
        metadata: object_meta(namespace, name, &[]),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                pods.iter()
                    .map(|pod| pod_ref_address_in(namespace, pod))
                    .collect(),
            ),
            ..EndpointSubset::default()
        }]),
    }
}

/// Endpoints already carrying the given annotations.
pub fn annotated_endpoints(name: &str, pods: &[&str], annotations: &[(&str, &str)]) -> Endpoints {
    let mut endpoints = endpoints_for_pods(name, pods);
    endpoints.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect(),
    );
    endpoints
}
