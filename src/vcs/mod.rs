//! Command-backed VCS access for the module proxy protocol.
//!
//! Provides the [`Vcs`] trait that encapsulates all retrieval of
//! version-control data: the version list, the publication timestamp of a
//! version, and the source archive of a version.  Callers dispatch through
//! this trait so that no detail of how the data is fetched leaks outside
//! this module.

pub mod command;
pub mod encode;

use std::fmt;
use std::process::ExitStatus;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::config::Config;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// An opaque version token as reported by the external command.
///
/// No internal structure is assumed or validated; the token is passed
/// through verbatim into request paths and environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure classes of the VCS operations.
#[derive(Debug, Error)]
pub enum VcsError {
    /// The external command could not be started at all.
    #[error("failed to start command `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The external command ran but exited non-zero.  Its diagnostics go to
    /// stderr directly, so none are carried here.
    #[error("command `{command}` exited with {status}")]
    Exit { command: String, status: ExitStatus },
    /// A `timestamp` response matched none of the accepted formats.
    #[error("unknown time format")]
    UnknownTimeFormat,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A readable stream over a fully materialised source archive.  Dropping it
/// releases nothing; the bytes are already in memory.
pub type ZipStream = Box<dyn AsyncRead + Send + Unpin>;

/// Abstraction over module version-control data retrieval.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// All known versions of the module, in the order reported upstream.
    async fn list(&self) -> Result<Vec<Version>>;

    /// Publication instant of one version.
    async fn timestamp(&self, version: &Version) -> Result<DateTime<Utc>>;

    /// The source archive of one version.
    async fn zip(&self, version: &Version) -> Result<ZipStream>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the configured [`Vcs`] implementation for `module`.
pub fn build(config: &Config, module: &str) -> Box<dyn Vcs> {
    Box::new(command::CommandVcs::new(
        &config.vcs.shell,
        &config.vcs.command,
        module,
    ))
}
