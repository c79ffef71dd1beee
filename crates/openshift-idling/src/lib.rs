//! Idling and unidling of OpenShift services.
//!
//! Idling a service scales the resources serving it down to zero while
//! recording, on the service's endpoints, how to scale them up again. The
//! entry points are [`idle::run_idle`] and [`unidle::run_unidle`], both of
//! which talk to the cluster through a [`client::ClusterClient`].

pub mod annotations;
pub mod cache;
pub mod cli;
pub mod client;
pub mod idle;
pub mod logging;
pub mod merge;
pub mod namespace;
pub mod output;
pub mod patch;
pub mod reference;
pub mod resolver;
pub mod selection;
pub mod unidle;

#[cfg(test)]
mod testing;

// External re-exports
pub use k8s_openapi;
pub use kube;
