//! Command line arguments of the `idle` and `unidle` commands.
//!
//! The argument structs are plain `clap` derives. They are validated and
//! converted into [`IdleOptions`] and [`UnidleOptions`] before anything talks
//! to the cluster.
use clap::Args;
use jiff::Timestamp;

use crate::{
    idle::IdleOptions,
    logging::TelemetryOptions,
    selection::{self, SelectionArguments},
    unidle::UnidleOptions,
};

/// The field manager used for every write unless overridden.
pub const DEFAULT_FIELD_MANAGER: &str = "oc-idle";

/// Idle scalable resources behind the given services.
///
/// Idling discovers the scalable resources (such as deployment configs or
/// replication controllers) behind a service by examining its endpoints,
/// records them on the endpoints and then scales them down to zero. The
/// resources are scaled up again once the service receives traffic.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct IdleArguments {
    /// Only print the changes that would be made.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub selection: SelectionArguments,
}

impl IdleArguments {
    pub fn into_options(
        self,
        default_namespace: &str,
        now: Timestamp,
    ) -> Result<IdleOptions, selection::Error> {
        Ok(IdleOptions {
            selection: self.selection.into_selection(default_namespace)?,
            dry_run: self.dry_run,
            now,
        })
    }
}

/// Scale the resources recorded on idled services back up.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct UnidleArguments {
    /// Only print the changes that would be made.
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub selection: SelectionArguments,
}

impl UnidleArguments {
    pub fn into_options(self, default_namespace: &str) -> Result<UnidleOptions, selection::Error> {
        Ok(UnidleOptions {
            selection: self.selection.into_selection(default_namespace)?,
            dry_run: self.dry_run,
        })
    }
}

/// Options shared by all commands.
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct CommonOptions {
    /// Name of the manager used to track field ownership of every write.
    #[arg(long, env, default_value = DEFAULT_FIELD_MANAGER, global = true)]
    pub field_manager: String,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}
