//! The `unidle` command, which wakes idled services up again.
//!
//! Every target recorded on an idled endpoints object which is still scaled
//! to zero is scaled back to its recorded number of replicas. Targets which
//! could not be restored stay recorded, so that unidling can be retried.
use std::{collections::BTreeMap, io::Write};

use snafu::{ResultExt, Snafu, ensure};

use crate::{
    annotations::{
        IDLED_AT, PREVIOUS_SCALE, clear_idle_annotations, set_unidle_targets, unidle_targets,
    },
    client::ClusterClient,
    output::{self, Printer, full_message},
    patch::annotations_merge_patch,
    reference::{NamespacedName, RecordedScaleReference},
    selection::{EndpointsSelection, collect_endpoints},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to print the command output"))]
    Print { source: output::Error },

    /// Some services could not be unidled. The problems have already been
    /// reported.
    #[snafu(display("at least one service could not be unidled"))]
    ExitWithFailure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnidleOptions {
    pub selection: EndpointsSelection,
    pub dry_run: bool,
}

/// What happened to a single recorded target.
enum TargetOutcome {
    /// The target runs again, or is gone for good.
    Done,

    /// The target has to stay recorded.
    Keep,
}

struct Unidler<'a, C: ?Sized, O, E> {
    client: &'a C,
    options: &'a UnidleOptions,
    printer: &'a mut Printer<O, E>,
    had_error: bool,
}

/// Unidles the services selected in `options`.
///
/// Services which are not idled are skipped with a warning. Failures are
/// printed and the remaining services are processed regardless, in that case
/// [`Error::ExitWithFailure`] is returned at the end.
#[tracing::instrument(skip_all, fields(dry_run = options.dry_run))]
pub async fn run_unidle<C, O, E>(
    client: &C,
    options: &UnidleOptions,
    printer: &mut Printer<O, E>,
) -> Result<(), Error>
where
    C: ClusterClient + ?Sized,
    O: Write + Send,
    E: Write + Send,
{
    let selected = collect_endpoints(client, &options.selection).await;

    let mut unidler = Unidler {
        client,
        options,
        printer,
        had_error: false,
    };

    for error in &selected.errors {
        unidler.printer.report(error).context(PrintSnafu)?;
        unidler.had_error = true;
    }
    if selected.endpoints.is_empty() && selected.errors.is_empty() {
        unidler
            .printer
            .warning(format_args!("no endpoints were selected"))
            .context(PrintSnafu)?;
    }

    for endpoints in &selected.endpoints {
        let service = NamespacedName::new(
            endpoints.metadata.namespace.clone().unwrap_or_default(),
            endpoints.metadata.name.clone().unwrap_or_default(),
        );
        let annotations = endpoints.metadata.annotations.clone().unwrap_or_default();

        unidler.unidle_service(&service, &annotations).await?;
    }

    ensure!(!unidler.had_error, ExitWithFailureSnafu);
    Ok(())
}

impl<C, O, E> Unidler<'_, C, O, E>
where
    C: ClusterClient + ?Sized,
    O: Write + Send,
    E: Write + Send,
{
    fn dry_run_suffix(&self) -> &'static str {
        if self.options.dry_run { " (dry run)" } else { "" }
    }

    async fn unidle_service(
        &mut self,
        service: &NamespacedName,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let targets = match unidle_targets(annotations) {
            Ok(Some(targets)) => targets,
            Ok(None) => {
                return self
                    .printer
                    .warning(format_args!(
                        "the service \"{service}\" is not idled, skipping it"
                    ))
                    .context(PrintSnafu);
            }
            Err(error) => {
                self.printer
                    .error(format_args!(
                        "unable to unidle the service \"{service}\": {}",
                        full_message(&error)
                    ))
                    .context(PrintSnafu)?;
                self.had_error = true;
                return Ok(());
            }
        };

        let mut remaining = Vec::new();
        for record in targets {
            if let TargetOutcome::Keep = self.unidle_target(&service.namespace, &record).await? {
                remaining.push(record);
            }
        }

        let mut new_annotations = annotations.clone();
        if remaining.is_empty() {
            clear_idle_annotations(&mut new_annotations);
        } else if let Err(error) = set_unidle_targets(&mut new_annotations, &remaining) {
            self.printer
                .error(format_args!(
                    "unable to update the unidle targets of the service \"{service}\": {}",
                    full_message(&error)
                ))
                .context(PrintSnafu)?;
            self.had_error = true;
            return Ok(());
        }

        if !self.options.dry_run {
            if let Some(patch) = annotations_merge_patch(annotations, &new_annotations) {
                if let Err(error) = self.client.patch_endpoints(service, &patch).await {
                    self.printer
                        .error(format_args!(
                            "unable to update the idling annotations of the service \"{service}\": {}",
                            full_message(&error)
                        ))
                        .context(PrintSnafu)?;
                    self.had_error = true;
                    return Ok(());
                }
            }
        }

        let dry_run = self.dry_run_suffix();
        if remaining.is_empty() {
            self.printer
                .println(format_args!(
                    "The service \"{service}\" is no longer marked as idled{dry_run}"
                ))
                .context(PrintSnafu)?;
        } else {
            self.printer
                .println(format_args!(
                    "The service \"{service}\" still has {} targets to unidle{dry_run}",
                    remaining.len()
                ))
                .context(PrintSnafu)?;
        }

        Ok(())
    }

    async fn unidle_target(
        &mut self,
        namespace: &str,
        record: &RecordedScaleReference,
    ) -> Result<TargetOutcome, Error> {
        let dry_run = self.dry_run_suffix();
        let RecordedScaleReference { target, replicas } = record;

        let current = match self.client.get_scale(namespace, target).await {
            Ok(current) => current,
            Err(error) if error.is_not_found() => {
                self.printer
                    .warning(format_args!(
                        "{} \"{namespace}/{}\" no longer exists, not unidling it",
                        target.kind, target.name
                    ))
                    .context(PrintSnafu)?;
                return Ok(TargetOutcome::Done);
            }
            Err(error) => {
                self.printer
                    .error(format_args!(
                        "unable to get scale for {} {namespace}/{}: {}",
                        target.kind,
                        target.name,
                        full_message(&error)
                    ))
                    .context(PrintSnafu)?;
                self.had_error = true;
                return Ok(TargetOutcome::Keep);
            }
        };

        if current != 0 {
            tracing::info!(
                kind = %target.kind,
                name = %target.name,
                current,
                "target is already running"
            );
            self.printer
                .println(format_args!(
                    "{} \"{namespace}/{}\" is already running {current} replicas",
                    target.kind, target.name
                ))
                .context(PrintSnafu)?;
            return Ok(TargetOutcome::Done);
        }

        if !self.options.dry_run {
            if let Err(error) = self.client.set_scale(namespace, target, *replicas).await {
                self.printer
                    .error(format_args!(
                        "unable to scale {} {namespace}/{} to {replicas}: {}",
                        target.kind,
                        target.name,
                        full_message(&error)
                    ))
                    .context(PrintSnafu)?;
                self.had_error = true;
                return Ok(TargetOutcome::Keep);
            }

            let cleared = BTreeMap::from([
                (IDLED_AT.to_owned(), None),
                (PREVIOUS_SCALE.to_owned(), None),
            ]);
            if let Err(error) = self
                .client
                .annotate_scalable(namespace, target, &cleared)
                .await
            {
                // The target runs again, only its bookkeeping is stale
                self.printer
                    .warning(format_args!(
                        "unable to remove the idling annotations from {} {namespace}/{}: {}",
                        target.kind,
                        target.name,
                        full_message(&error)
                    ))
                    .context(PrintSnafu)?;
            }
        }

        self.printer
            .println(format_args!(
                "{} \"{namespace}/{}\" has been unidled to {replicas} replicas{dry_run}",
                target.kind, target.name
            ))
            .context(PrintSnafu)?;
        Ok(TargetOutcome::Done)
    }
}
