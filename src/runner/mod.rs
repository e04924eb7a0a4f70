//! The probe capability set and its caching decorator.
//!
//! [`Runner`] is the boundary between the cache and the rest of an
//! automation tool: a handful of query operations executed against a remote
//! target. How the commands are built, how their output is parsed, and how
//! the transport is established are all the implementor's business -
//! probecache only interposes in front of the idempotent, read-mostly
//! subset via [`CachedRunner`].

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::facts::Facts;

mod cached;

pub use cached::{CachedRunner, FALLBACK_IDENTITY};

/// Opaque handle for a managed remote target.
///
/// The cache never interprets the address; identity is resolved separately,
/// from facts or from the [`Runner::identity`] probe, because one host may be
/// reachable under several addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    address: String,
    port: Option<u16>,
}

impl Target {
    /// Create a target from its connection address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
        }
    }

    /// Set an explicit port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The connection address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The explicit port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Output of a raw command executed on a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (`None` if the process was killed).
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The capability set of query operations against a remote target.
///
/// Implementations own the transport and the tool-specific command
/// construction and output parsing. All probe operations listed here are
/// expected to be idempotent: invoking one twice with the same arguments
/// observes state, never changes it.
///
/// # Implementations
///
/// Concrete runners (SSH, local, container exec) live with the automation
/// tool embedding this crate; probecache supplies only the decorator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Runner: Send + Sync {
    /// Cheap identity probe: ask the target for its own name.
    ///
    /// Used to scope cache entries when no facts are at hand. Should be far
    /// cheaper than a full fact gather (typically a single `hostname` call).
    async fn identity(&self, target: &Target) -> Result<String>;

    /// Gather the full fact set from the target.
    async fn gather_facts(&self, target: &Target) -> Result<Facts>;

    /// Check whether `command` is available on the target, optionally
    /// resolving through elevated privileges.
    async fn check_command(&self, target: &Target, command: &str, sudo: bool) -> Result<bool>;

    /// Check whether `path` exists on the target.
    async fn path_exists(&self, target: &Target, path: &str) -> Result<bool>;

    /// Check whether `package` is installed, interpreting the package system
    /// indicated by `facts`.
    async fn package_installed(
        &self,
        target: &Target,
        facts: &Facts,
        package: &str,
    ) -> Result<bool>;

    /// Check whether `service` is active, interpreting the init system
    /// indicated by `facts`.
    async fn service_active(&self, target: &Target, facts: &Facts, service: &str) -> Result<bool>;

    /// Execute a raw command on the target. Not idempotent in general and
    /// never cached.
    async fn execute(&self, target: &Target, command: &str, sudo: bool) -> Result<CommandOutput>;
}
