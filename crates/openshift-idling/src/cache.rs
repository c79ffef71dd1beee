//! Per-invocation caches for objects fetched while walking controller chains.
//!
//! Several endpoint addresses usually point at pods of the same controller,
//! so [`CachingFetcher`] memoizes every pod and controller it loads. The
//! caches are plain values owned by the fetcher and are dropped together with
//! it at the end of a command run.
use std::{collections::HashMap, hash::Hash};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;

use crate::{
    client::{ClusterClient, Error},
    reference::ObjectRef,
    resolver::ObjectFetcher,
};

/// A minimal key/value cache.
pub trait ObjectCache<K, V> {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&mut self, key: K, value: V);
}

/// Keeps every entry in memory until dropped.
#[derive(Debug)]
pub struct MemoryCache<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for MemoryCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> MemoryCache<K, V> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> ObjectCache<K, V> for MemoryCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }
}

/// Never remembers anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl<K, V> ObjectCache<K, V> for NoCache {
    fn get(&self, _key: &K) -> Option<V> {
        None
    }

    fn put(&mut self, _key: K, _value: V) {}
}

/// An [`ObjectFetcher`] backed by a [`ClusterClient`], caching every object
/// it finds. Missing objects and failures are not cached.
pub struct CachingFetcher<
    'a,
    C: ?Sized,
    P = MemoryCache<ObjectRef, Pod>,
    R = MemoryCache<ObjectRef, DynamicObject>,
> {
    client: &'a C,
    pods: P,
    controllers: R,
}

impl<'a, C> CachingFetcher<'a, C>
where
    C: ClusterClient + ?Sized,
{
    pub fn new(client: &'a C) -> Self {
        Self::with_caches(client, MemoryCache::default(), MemoryCache::default())
    }
}

impl<'a, C, P, R> CachingFetcher<'a, C, P, R>
where
    C: ClusterClient + ?Sized,
{
    pub fn with_caches(client: &'a C, pods: P, controllers: R) -> Self {
        Self {
            client,
            pods,
            controllers,
        }
    }
}

#[async_trait]
impl<'a, C, P, R> ObjectFetcher for CachingFetcher<'a, C, P, R>
where
    C: ClusterClient + ?Sized,
    P: ObjectCache<ObjectRef, Pod> + Send,
    R: ObjectCache<ObjectRef, DynamicObject> + Send,
{
    async fn get_pod(&mut self, reference: &ObjectRef) -> Result<Option<Pod>, Error> {
        if let Some(pod) = self.pods.get(reference) {
            return Ok(Some(pod));
        }

        let pod = self.client.get_pod(reference).await?;
        if let Some(pod) = &pod {
            self.pods.put(reference.clone(), pod.clone());
        }

        Ok(pod)
    }

    async fn get_controller(&mut self, reference: &ObjectRef) -> Result<Option<DynamicObject>, Error> {
        if let Some(controller) = self.controllers.get(reference) {
            return Ok(Some(controller));
        }

        let controller = self.client.get_controller(reference).await?;
        if let Some(controller) = &controller {
            self.controllers.put(reference.clone(), controller.clone());
        }

        Ok(controller)
    }
}
