//! This module provides helpers to deal with the namespaces a command operates on
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum NamespaceScope {
    All,
    One(String),
}

impl NamespaceScope {
    pub fn new(namespace: &str, all_namespaces: bool) -> Self {
        if all_namespaces {
            Self::All
        } else {
            Self::One(namespace.to_owned())
        }
    }

    /// Gets an API object for the namespace in question or for all namespaces,
    /// depending on which variant we are.
    pub fn get_api<T>(&self, client: &Client) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self {
            Self::All => Api::all(client.clone()),
            Self::One(namespace) => Api::namespaced(client.clone(), namespace),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::One(namespace) => Some(namespace),
        }
    }
}
