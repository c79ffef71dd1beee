//! Merging newly discovered scale targets into previously recorded ones.
use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use snafu::{ResultExt, Snafu};

use crate::{
    annotations::{self, unidle_targets},
    reference::{CrossGroupObjectReference, NamespacedName, RecordedScaleReference},
};

/// The number of replicas restored when nothing better is known.
const DEFAULT_REPLICAS: i32 = 1;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unable to extract existing scale information from endpoints {service}"))]
    ExistingTargets {
        source: annotations::Error,
        service: NamespacedName,
    },
}

/// Builds the list of targets to record on the endpoints of `service`.
///
/// Every target in `targets` gets the replica count observed in `scales`. If
/// none was observed, or it was zero, the count recorded in the existing
/// unidle targets annotation is kept. Recorded targets which were not
/// discovered again are carried over unchanged. A count of zero is never
/// returned, such records restore [`DEFAULT_REPLICAS`] instead.
///
/// The result lists the new targets in order, followed by the carried over
/// targets in the order they were recorded.
pub fn pair_scales_with_scale_refs(
    service: &NamespacedName,
    annotations: &BTreeMap<String, String>,
    targets: &BTreeSet<CrossGroupObjectReference>,
    scales: &BTreeMap<CrossGroupObjectReference, i32>,
) -> Result<Vec<RecordedScaleReference>, Error> {
    let recorded = unidle_targets(annotations)
        .context(ExistingTargetsSnafu { service: service.clone() })?
        .unwrap_or_default();

    // Should a target have been recorded twice, the last record wins
    let mut previous: IndexMap<&CrossGroupObjectReference, i32> = IndexMap::new();
    for record in &recorded {
        previous.insert(&record.target, record.replicas);
    }

    let discovered = targets.iter().map(|target| {
        let replicas = scales
            .get(target)
            .copied()
            .filter(|replicas| *replicas != 0)
            .or_else(|| previous.get(target).copied())
            .unwrap_or_default();

        RecordedScaleReference {
            target: target.clone(),
            replicas,
        }
    });

    let carried_over = previous
        .iter()
        .filter(|(target, _)| !targets.contains(**target))
        .map(|(target, replicas)| RecordedScaleReference {
            target: (*target).clone(),
            replicas: *replicas,
        });

    Ok(discovered
        .chain(carried_over)
        .map(|mut record| {
            if record.replicas == 0 {
                record.replicas = DEFAULT_REPLICAS;
            }
            record
        })
        .collect())
}
