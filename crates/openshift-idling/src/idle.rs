//! The `idle` command.
//!
//! Idling a service happens in three passes over the selected endpoints:
//!
//! 1. The scalable resources behind every endpoints object are discovered
//!    and their current scale is fetched.
//! 2. Every endpoints object is annotated with the targets to wake up once
//!    traffic arrives, together with the number of replicas to restore.
//! 3. The targets are scaled down to zero.
//!
//! A target is only scaled down once the annotation recording it has been
//! written, so that an interrupted run never leaves a resource at zero
//! replicas without any way to restore it.
use std::{
    collections::{BTreeMap, BTreeSet},
    io::Write,
};

use jiff::Timestamp;
use k8s_openapi::api::core::v1::Endpoints;
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    annotations::{self, IDLED_AT, PREVIOUS_SCALE, format_timestamp, set_idle_annotations},
    cache::CachingFetcher,
    client::ClusterClient,
    merge::pair_scales_with_scale_refs,
    output::{self, Printer, full_message},
    patch::annotations_merge_patch,
    reference::{CrossGroupObjectReference, NamespacedName},
    resolver::{self, find_scalable_resources},
    selection::{EndpointsSelection, collect_endpoints},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no valid scalable resources found to idle: {reason}"))]
    NoScalableResources { reason: String },

    #[snafu(display("unable to calculate scalable resources for service {service}"))]
    ResolveTargets {
        source: resolver::Error,
        service: NamespacedName,
    },

    #[snafu(display("failed to encode the idling annotations"))]
    EncodeAnnotations { source: annotations::Error },

    #[snafu(display("failed to print the command output"))]
    Print { source: output::Error },

    /// Some services or scalable resources could not be idled. The problems
    /// have already been reported.
    #[snafu(display("at least one service could not be idled"))]
    ExitWithFailure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdleOptions {
    pub selection: EndpointsSelection,
    pub dry_run: bool,

    /// The time recorded as the moment of idling.
    pub now: Timestamp,
}

/// A scale target within the namespace of the services it backs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ScaleTarget {
    namespace: String,
    target: CrossGroupObjectReference,
}

impl ScaleTarget {
    fn new(namespace: &str, target: &CrossGroupObjectReference) -> Self {
        Self {
            namespace: namespace.to_owned(),
            target: target.clone(),
        }
    }
}

/// An endpoints object together with the targets to record on it.
struct IdleCandidate {
    endpoints: Endpoints,
    targets: BTreeSet<CrossGroupObjectReference>,
}

struct Discovery {
    by_service: BTreeMap<NamespacedName, IdleCandidate>,
    by_scalable: BTreeMap<ScaleTarget, BTreeSet<NamespacedName>>,
    errors: Vec<String>,
}

/// State shared by the passes of a single idling run.
struct Idler<'a, C: ?Sized, O, E> {
    client: &'a C,
    options: &'a IdleOptions,
    printer: &'a mut Printer<O, E>,
    had_error: bool,
}

/// Idles the services selected in `options`.
///
/// Problems with individual services or scalable resources are printed and
/// the remaining ones are processed regardless. In that case
/// [`Error::ExitWithFailure`] is returned at the end.
#[tracing::instrument(skip_all, fields(dry_run = options.dry_run))]
pub async fn run_idle<C, O, E>(
    client: &C,
    options: &IdleOptions,
    printer: &mut Printer<O, E>,
) -> Result<(), Error>
where
    C: ClusterClient + ?Sized,
    O: Write + Send,
    E: Write + Send,
{
    // figure out which endpoints and resources we need to idle
    let Discovery {
        mut by_service,
        by_scalable,
        errors,
    } = discover(client, &options.selection).await;

    if !errors.is_empty() {
        let reason = errors.join("; ");
        ensure!(
            !by_service.is_empty() && !by_scalable.is_empty(),
            NoScalableResourcesSnafu { reason }
        );
        printer
            .warning(format_args!(
                "continuing on for valid scalable resources, but an error occurred while finding scalable resources to idle: {reason}"
            ))
            .context(PrintSnafu)?;
    }
    ensure!(!by_service.is_empty(), NoScalableResourcesSnafu {
        reason: "no endpoints were selected"
    });

    let mut idler = Idler {
        client,
        options,
        printer,
        had_error: false,
    };

    let replicas = idler.fetch_scales(&by_scalable, &mut by_service).await?;
    let recorded = idler.record_targets(&by_service, &replicas).await?;
    idler.scale_down(&replicas, &recorded).await?;

    ensure!(!idler.had_error, ExitWithFailureSnafu);
    Ok(())
}

impl<C, O, E> Idler<'_, C, O, E>
where
    C: ClusterClient + ?Sized,
    O: Write + Send,
    E: Write + Send,
{
    fn dry_run_suffix(&self) -> &'static str {
        if self.options.dry_run { " (dry run)" } else { "" }
    }

    /// Fetches the current scale of every target. Targets whose scale is
    /// unknown are removed from their services.
    async fn fetch_scales(
        &mut self,
        by_scalable: &BTreeMap<ScaleTarget, BTreeSet<NamespacedName>>,
        by_service: &mut BTreeMap<NamespacedName, IdleCandidate>,
    ) -> Result<BTreeMap<ScaleTarget, i32>, Error> {
        let mut replicas = BTreeMap::new();

        for (scale_target, services) in by_scalable {
            let ScaleTarget { namespace, target } = scale_target;
            match self.client.get_scale(namespace, target).await {
                Ok(current) => {
                    replicas.insert(scale_target.clone(), current);
                }
                Err(error) => {
                    self.printer
                        .error(format_args!(
                            "unable to get scale for {} {namespace}/{}, not marking that scalable as idled: {}",
                            target.kind,
                            target.name,
                            full_message(&error)
                        ))
                        .context(PrintSnafu)?;
                    self.had_error = true;

                    for service in services {
                        if let Some(candidate) = by_service.get_mut(service) {
                            candidate.targets.remove(target);
                        }
                    }
                }
            }
        }

        Ok(replicas)
    }

    /// Annotates every endpoints object with the targets to unidle on
    /// traffic. Returns the targets which were recorded successfully.
    async fn record_targets(
        &mut self,
        by_service: &BTreeMap<NamespacedName, IdleCandidate>,
        replicas: &BTreeMap<ScaleTarget, i32>,
    ) -> Result<BTreeSet<ScaleTarget>, Error> {
        let mut recorded = BTreeSet::new();

        for (service, candidate) in by_service {
            if self.record_service(service, candidate, replicas).await? {
                recorded.extend(
                    candidate
                        .targets
                        .iter()
                        .map(|target| ScaleTarget::new(&service.namespace, target)),
                );
            }
        }

        Ok(recorded)
    }

    /// Marks a single service as idled, returning whether that worked.
    async fn record_service(
        &mut self,
        service: &NamespacedName,
        candidate: &IdleCandidate,
        replicas: &BTreeMap<ScaleTarget, i32>,
    ) -> Result<bool, Error> {
        let dry_run = self.dry_run_suffix();
        let scales: BTreeMap<_, _> = candidate
            .targets
            .iter()
            .filter_map(|target| {
                replicas
                    .get(&ScaleTarget::new(&service.namespace, target))
                    .map(|current| (target.clone(), *current))
            })
            .collect();
        let old_annotations = candidate
            .endpoints
            .metadata
            .annotations
            .clone()
            .unwrap_or_default();

        let records =
            match pair_scales_with_scale_refs(service, &old_annotations, &candidate.targets, &scales)
            {
                Ok(records) => records,
                Err(error) => return self.report_unmarked(service, &error),
            };

        if !self.options.dry_run {
            if candidate.targets.is_empty() {
                self.printer
                    .error(format_args!(
                        "unable to mark the service \"{service}\" as idled.\n\
                         Make sure that the service is not already marked as idled and that it is associated with resources that can be scaled.\n\
                         See 'oc idle -h' for help and examples."
                    ))
                    .context(PrintSnafu)?;
                self.had_error = true;
                return Ok(false);
            }

            let mut new_annotations = old_annotations.clone();
            if let Err(error) =
                set_idle_annotations(&mut new_annotations, &records, self.options.now)
                    .context(EncodeAnnotationsSnafu)
            {
                return self.report_unmarked(service, &error);
            }

            if let Some(patch) = annotations_merge_patch(&old_annotations, &new_annotations) {
                if let Err(error) = self.client.patch_endpoints(service, &patch).await {
                    return self.report_unmarked(service, &error);
                }
            }
        }

        tracing::info!(%service, targets = records.len(), "recorded unidle targets");
        self.printer
            .println(format_args!(
                "The service \"{service}\" has been marked as idled{dry_run}"
            ))
            .context(PrintSnafu)?;
        for record in &records {
            self.printer
                .println(format_args!(
                    "The service will unidle {} \"{}/{}\" to {} replicas once it receives traffic{dry_run}",
                    record.target.kind, service.namespace, record.target.name, record.replicas
                ))
                .context(PrintSnafu)?;
        }

        Ok(true)
    }

    fn report_unmarked(
        &mut self,
        service: &NamespacedName,
        error: &dyn std::error::Error,
    ) -> Result<bool, Error> {
        self.printer
            .error(format_args!(
                "unable to mark service \"{service}\" as idled: {}",
                full_message(error)
            ))
            .context(PrintSnafu)?;
        self.had_error = true;
        Ok(false)
    }

    /// Scales every recorded target down to zero replicas, after the
    /// annotations have been applied so that no traffic is missed.
    async fn scale_down(
        &mut self,
        replicas: &BTreeMap<ScaleTarget, i32>,
        recorded: &BTreeSet<ScaleTarget>,
    ) -> Result<(), Error> {
        let dry_run = self.dry_run_suffix();
        let idled_at = format_timestamp(self.options.now);

        for (scale_target, current) in replicas {
            let ScaleTarget { namespace, target } = scale_target;

            if !self.options.dry_run {
                if !recorded.contains(scale_target) {
                    self.printer
                        .error(format_args!(
                            "not scaling {} {namespace}/{} to 0, since it is not recorded as a target for unidling",
                            target.kind, target.name
                        ))
                        .context(PrintSnafu)?;
                    self.had_error = true;
                    continue;
                }

                let annotations = BTreeMap::from([
                    (IDLED_AT.to_owned(), Some(idled_at.clone())),
                    (PREVIOUS_SCALE.to_owned(), Some(current.to_string())),
                ]);
                let scaled = match self
                    .client
                    .annotate_scalable(namespace, target, &annotations)
                    .await
                {
                    Ok(()) => self.client.set_scale(namespace, target, 0).await,
                    Err(error) => Err(error),
                };
                if let Err(error) = scaled {
                    self.printer
                        .error(format_args!(
                            "unable to scale {} {namespace}/{} to 0, but still listed as target for unidling: {}",
                            target.kind,
                            target.name,
                            full_message(&error)
                        ))
                        .context(PrintSnafu)?;
                    self.had_error = true;
                    continue;
                }
            }

            self.printer
                .println(format_args!(
                    "{} \"{namespace}/{}\" has been idled{dry_run}",
                    target.kind, target.name
                ))
                .context(PrintSnafu)?;
        }

        Ok(())
    }
}

/// Finds the scale targets of every selected endpoints object.
async fn discover<C>(client: &C, selection: &EndpointsSelection) -> Discovery
where
    C: ClusterClient + ?Sized,
{
    let selected = collect_endpoints(client, selection).await;
    let mut errors: Vec<String> = selected
        .errors
        .iter()
        .map(|error| full_message(error))
        .collect();

    let mut fetcher = CachingFetcher::new(client);
    let mut by_service = BTreeMap::new();
    let mut by_scalable: BTreeMap<ScaleTarget, BTreeSet<NamespacedName>> = BTreeMap::new();

    for endpoints in selected.endpoints {
        let service = NamespacedName::new(
            endpoints.metadata.namespace.clone().unwrap_or_default(),
            endpoints.metadata.name.clone().unwrap_or_default(),
        );

        let targets = match find_scalable_resources(&endpoints, &mut fetcher)
            .await
            .context(ResolveTargetsSnafu {
                service: service.clone(),
            }) {
            Ok(targets) => targets,
            Err(error) => {
                tracing::debug!(%service, error = &error as &dyn std::error::Error, "skipping service");
                errors.push(full_message(&error));
                continue;
            }
        };

        for target in &targets {
            by_scalable
                .entry(ScaleTarget::new(&service.namespace, target))
                .or_default()
                .insert(service.clone());
        }
        by_service.insert(service, IdleCandidate { endpoints, targets });
    }

    Discovery {
        by_service,
        by_scalable,
        errors,
    }
}
