//! User facing output of the idling commands.
//!
//! Results are printed to stdout, warnings and errors to stderr. Everything
//! printed here is mirrored into the log.
use std::{
    error::Error as StdError,
    fmt,
    io::{self, Stderr, Stdout, Write},
};

use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to write command output"))]
    WriteOutput { source: io::Error },
}

/// Renders `error` together with all of its sources, separated by colons.
pub fn full_message(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

pub struct Printer<O, E> {
    out: O,
    err: E,
}

impl Printer<Stdout, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl<O, E> Printer<O, E>
where
    O: Write + Send,
    E: Write + Send,
{
    pub fn new(out: O, err: E) -> Self {
        Self { out, err }
    }

    pub fn println(&mut self, message: fmt::Arguments<'_>) -> Result<(), Error> {
        tracing::info!("{message}");
        writeln!(self.out, "{message}").context(WriteOutputSnafu)
    }

    pub fn warning(&mut self, message: fmt::Arguments<'_>) -> Result<(), Error> {
        tracing::warn!("{message}");
        writeln!(self.err, "warning: {message}").context(WriteOutputSnafu)
    }

    pub fn error(&mut self, message: fmt::Arguments<'_>) -> Result<(), Error> {
        tracing::error!("{message}");
        writeln!(self.err, "error: {message}").context(WriteOutputSnafu)
    }

    /// Reports `error` including its whole chain of sources.
    pub fn report(&mut self, error: &dyn StdError) -> Result<(), Error> {
        self.error(format_args!("{}", full_message(error)))
    }

    pub fn into_inner(self) -> (O, E) {
        (self.out, self.err)
    }
}

#[cfg(test)]
pub(crate) type BufferPrinter = Printer<Vec<u8>, Vec<u8>>;

#[cfg(test)]
impl BufferPrinter {
    pub(crate) fn buffered() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Returns everything printed to stdout and stderr so far.
    pub(crate) fn output(&self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.out).into_owned(),
            String::from_utf8_lossy(&self.err).into_owned(),
        )
    }
}
