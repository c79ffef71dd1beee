//! Selecting the endpoints objects a command operates on.
//!
//! Endpoints can be named on the command line or in a file, or be selected
//! by label selector or all at once, optionally across all namespaces.
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use clap::Args;
use k8s_openapi::api::core::v1::Endpoints;
use snafu::{ResultExt, Snafu, ensure};

use crate::{client::ClusterClient, namespace::NamespaceScope, reference::NamespacedName};

/// Reading the names file from this path reads stdin instead.
const STDIN_PATH: &str = "-";

/// Resource types accepted in front of a `TYPE/NAME` argument.
const ENDPOINTS_RESOURCE_TYPES: &[&str] = &["endpoints", "endpoint", "ep"];

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display(
        "resource names, selectors, and the all flag may not be specified if a filename is specified"
    ))]
    FilenameWithOtherSelectors,

    #[snafu(display(
        "you must specify endpoints by name, with a selector, with the all flag or with a names file"
    ))]
    NothingSelected,

    #[snafu(display("resource names, selectors, and the all flag may not be combined"))]
    ConflictingSelectors,

    #[snafu(display("a resource cannot be retrieved by name across all namespaces"))]
    NamesAcrossNamespaces,

    #[snafu(display(
        "you must specify endpoints, not {resource_type} (view available endpoints with \"oc get endpoints\")"
    ))]
    WrongResourceType { resource_type: String },

    #[snafu(display("failed to read resource names from {path:?}"))]
    ReadNamesFile { source: io::Error, path: PathBuf },

    #[snafu(display("endpoints \"{name}\" not found"))]
    EndpointsNotFound { name: NamespacedName },

    #[snafu(display("failed to get endpoints \"{name}\""))]
    GetEndpoints {
        source: crate::client::Error,
        name: NamespacedName,
    },

    #[snafu(display("failed to list endpoints"))]
    ListEndpoints { source: crate::client::Error },
}

/// The command line arguments selecting endpoints.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionArguments {
    /// Names of the service endpoints, either `NAME` or `endpoints/NAME`.
    #[arg(value_name = "SERVICE_ENDPOINTS")]
    pub names: Vec<String>,

    /// Selector (label query) to use to select services.
    #[arg(long, short = 'l')]
    pub selector: Option<String>,

    /// Select all services in the namespace.
    #[arg(long)]
    pub all: bool,

    /// Select services across all namespaces.
    #[arg(long, short = 'A')]
    pub all_namespaces: bool,

    /// File containing the list of services to act on, one per line. Use `-` to read stdin.
    #[arg(long, value_name = "FILE")]
    pub resource_names_file: Option<PathBuf>,

    /// The namespace to act in, defaults to the namespace of the current context.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,
}

/// Which endpoints objects a command acts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointsSelection {
    Names(Vec<NamespacedName>),
    Selector {
        scope: NamespaceScope,
        selector: String,
    },
    All(NamespaceScope),
}

impl SelectionArguments {
    /// Validates the arguments and turns them into an [`EndpointsSelection`].
    ///
    /// `default_namespace` is used unless a namespace was given explicitly.
    pub fn into_selection(self, default_namespace: &str) -> Result<EndpointsSelection, Error> {
        let namespace = self
            .namespace
            .unwrap_or_else(|| default_namespace.to_owned());
        let scope = NamespaceScope::new(&namespace, self.all_namespaces);

        let names = match &self.resource_names_file {
            Some(path) => {
                ensure!(
                    self.names.is_empty() && self.selector.is_none() && !self.all,
                    FilenameWithOtherSelectorsSnafu
                );
                read_names_file(path)?
            }
            None => self.names,
        };

        match (names.is_empty(), self.selector, self.all) {
            (true, None, false) => NothingSelectedSnafu.fail(),
            (false, None, false) => {
                ensure!(!self.all_namespaces, NamesAcrossNamespacesSnafu);

                let names = names
                    .iter()
                    .map(|name| parse_endpoints_name(name))
                    .map(|name| name.map(|name| NamespacedName::new(&namespace, name)))
                    .collect::<Result<_, _>>()?;
                Ok(EndpointsSelection::Names(names))
            }
            (true, Some(selector), false) => Ok(EndpointsSelection::Selector { scope, selector }),
            (true, None, true) => Ok(EndpointsSelection::All(scope)),
            _ => ConflictingSelectorsSnafu.fail(),
        }
    }
}

/// Strips an optional endpoints resource type from `argument`.
fn parse_endpoints_name(argument: &str) -> Result<&str, Error> {
    match argument.split_once('/') {
        None => Ok(argument),
        Some((resource_type, name)) => {
            // Allow fully qualified forms such as `endpoints.v1`
            let bare_type = resource_type
                .split_once('.')
                .map_or(resource_type, |(bare_type, _)| bare_type);
            ensure!(
                ENDPOINTS_RESOURCE_TYPES.contains(&bare_type.to_lowercase().as_str()),
                WrongResourceTypeSnafu { resource_type }
            );
            Ok(name)
        }
    }
}

/// Reads the non-empty lines of `path`, or of stdin if the path is `-`.
pub fn read_names_file(path: &Path) -> Result<Vec<String>, Error> {
    let lines = if path == Path::new(STDIN_PATH) {
        scan_lines(io::stdin().lock())
    } else {
        File::open(path).and_then(|file| scan_lines(BufReader::new(file)))
    };

    lines.context(ReadNamesFileSnafu { path })
}

/// Collects every non-empty line of `reader`.
pub fn scan_lines(reader: impl BufRead) -> io::Result<Vec<String>> {
    reader
        .lines()
        .filter(|line| !matches!(line, Ok(line) if line.is_empty()))
        .collect()
}

/// The endpoints found for a selection, plus the problems encountered while
/// looking for them. A failure to find one endpoints object does not prevent
/// finding the others.
#[derive(Debug, Default)]
pub struct SelectedEndpoints {
    pub endpoints: Vec<Endpoints>,
    pub errors: Vec<Error>,
}

/// Fetches the endpoints objects described by `selection`.
pub async fn collect_endpoints<C>(client: &C, selection: &EndpointsSelection) -> SelectedEndpoints
where
    C: ClusterClient + ?Sized,
{
    let mut selected = SelectedEndpoints::default();

    match selection {
        EndpointsSelection::Names(names) => {
            for name in names {
                match client.get_endpoints(name).await {
                    Ok(Some(endpoints)) => selected.endpoints.push(endpoints),
                    Ok(None) => selected
                        .errors
                        .push(Error::EndpointsNotFound { name: name.clone() }),
                    Err(source) => selected.errors.push(Error::GetEndpoints {
                        source,
                        name: name.clone(),
                    }),
                }
            }
        }
        EndpointsSelection::Selector { scope, selector } => {
            match client.list_endpoints(scope, Some(selector.as_str())).await {
                Ok(endpoints) => selected.endpoints = endpoints,
                Err(source) => selected.errors.push(Error::ListEndpoints { source }),
            }
        }
        EndpointsSelection::All(scope) => match client.list_endpoints(scope, None).await {
            Ok(endpoints) => selected.endpoints = endpoints,
            Err(source) => selected.errors.push(Error::ListEndpoints { source }),
        },
    }

    tracing::debug!(
        found = selected.endpoints.len(),
        failed = selected.errors.len(),
        "collected endpoints"
    );
    selected
}
