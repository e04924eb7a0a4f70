//! Cache keys and fingerprinting.
//!
//! A [`CacheKey`] identifies one cached probe result: which host it is scoped
//! to, which operation produced it, and the operation's semantically relevant
//! arguments in order. Keys are transient - built per call, reduced to a
//! [fingerprint](CacheKey::fingerprint) for indexing, never stored.

use std::fmt;

/// Names of the cacheable probe operations.
///
/// These are the keys of the per-operation TTL table and the `operation`
/// component of every [`CacheKey`] the decorator builds.
pub mod op {
    /// Gather host facts.
    pub const GATHER_FACTS: &str = "gather_facts";
    /// Check whether a command is available on the target.
    pub const CHECK_COMMAND: &str = "check_command";
    /// Check whether a path exists on the target.
    pub const PATH_EXISTS: &str = "path_exists";
    /// Check whether a package is installed.
    pub const PACKAGE_INSTALLED: &str = "package_installed";
    /// Check whether a service is active.
    pub const SERVICE_ACTIVE: &str = "service_active";
}

/// Separator between key components when computing the fingerprint.
///
/// ASCII unit separator; it does not occur in hostnames, operation names,
/// package names, or paths, so joined components cannot collide by
/// concatenation.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Identifies a cached probe result.
///
/// Two keys are equivalent iff identity, operation, and args (in order) are
/// all equal. Keys are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// The logical target (managed host) the result is scoped to.
    identity: String,
    /// Probe operation name, one of the [`op`] constants.
    operation: String,
    /// Ordered, operation-specific arguments.
    args: Vec<String>,
}

impl CacheKey {
    /// Create a new cache key.
    ///
    /// `identity` must be non-empty; per-identity invalidation depends on it.
    /// Callers that cannot resolve an identity use a fixed sentinel instead
    /// of an empty string.
    pub fn new(
        identity: impl Into<String>,
        operation: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        let identity = identity.into();
        debug_assert!(!identity.is_empty(), "cache key identity must not be empty");
        Self {
            identity,
            operation: operation.into(),
            args,
        }
    }

    /// Key with no arguments (e.g. fact gathering).
    pub fn without_args(identity: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(identity, operation, Vec::new())
    }

    /// The target identity this key is scoped to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The probe operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// The ordered argument list.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Deterministic digest of `(identity, operation, args...)` used as the
    /// store index.
    ///
    /// Identical inputs always produce the same fingerprint; distinct inputs
    /// collide with negligible probability at the expected cardinality of
    /// hundreds to low thousands of live entries. Not a cryptographic
    /// commitment, and no external consumer depends on the byte format.
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::with_capacity(
            self.identity.len()
                + self.operation.len()
                + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
                + 2,
        );
        buf.extend_from_slice(self.identity.as_bytes());
        buf.push(FIELD_SEPARATOR);
        buf.extend_from_slice(self.operation.as_bytes());
        for arg in &self.args {
            buf.push(FIELD_SEPARATOR);
            buf.extend_from_slice(arg.as_bytes());
        }
        format!("{:x}", md5::compute(&buf))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity, self.operation)?;
        if !self.args.is_empty() {
            write!(f, "[{}]", self.args.join(", "))?;
        }
        Ok(())
    }
}
