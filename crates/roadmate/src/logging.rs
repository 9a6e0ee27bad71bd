//! Tracing setup for the `roadmate` binary.
//!
//! Everything is written to stderr. Stdout belongs to command output, some of
//! which is JSON meant for other programs.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much the binary logs. `RUST_LOG` wins over this when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Map the CLI's `-q` flag and `-v` count. `-q` wins.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    fn level_name(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Trace => "trace",
        }
    }

    /// `EnvFilter` directive used when `RUST_LOG` is unset. Only this crate's
    /// events pass; dependencies stay quiet.
    #[must_use]
    pub fn filter_directive(self) -> String {
        format!("{}={}", env!("CARGO_CRATE_NAME"), self.level_name())
    }
}

/// Install the global subscriber.
///
/// Calling this again after a subscriber is installed does nothing.
///
/// ```no_run
/// use roadmate::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::from_flags(false, 1));
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));
    let output = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= Verbosity::Verbose);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init();
}

/// Route warnings from the code under test into the test harness output.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("roadmate=warn"))
        .with_test_writer()
        .try_init();
}
