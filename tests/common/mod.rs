//! Shared test utilities for the probecache test suite.
//!
//! Provides a counting `Runner` implementation so tests can assert exactly
//! how many times each probe reached the (pretend) remote host.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::CountingRunner;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::json;

use probecache::error::{Error, Result};
use probecache::facts::Facts;
use probecache::runner::{CommandOutput, Runner, Target};

/// A `Runner` that answers probes locally and counts every invocation.
///
/// Probe answers are deterministic: commands are available, paths exist
/// unless they start with `/missing`, packages are installed unless named
/// `absent-pkg`, services are active. One-shot failures can be injected with
/// [`CountingRunner::fail_next_probe`].
#[derive(Debug, Default)]
pub struct CountingRunner {
    /// Name the identity probe answers with; `None` makes the probe fail.
    host_name: Option<String>,
    fail_next: AtomicBool,
    pub identity_calls: AtomicU32,
    pub gather_facts_calls: AtomicU32,
    pub check_command_calls: AtomicU32,
    pub path_exists_calls: AtomicU32,
    pub package_installed_calls: AtomicU32,
    pub service_active_calls: AtomicU32,
    pub execute_calls: AtomicU32,
}

impl CountingRunner {
    /// Runner whose target answers the identity probe with `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            host_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Runner whose identity probe always fails.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Make the next probe (any operation) fail once.
    pub fn fail_next_probe(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check_injected_failure(&self, target: &Target, operation: &str) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::probe(
                target.address(),
                operation,
                "injected failure",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Runner for CountingRunner {
    async fn identity(&self, target: &Target) -> Result<String> {
        self.identity_calls.fetch_add(1, Ordering::SeqCst);
        match &self.host_name {
            Some(name) => Ok(name.clone()),
            None => Err(Error::probe(target.address(), "identity", "no name")),
        }
    }

    async fn gather_facts(&self, target: &Target) -> Result<Facts> {
        self.gather_facts_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "gather_facts")?;
        let mut facts = match &self.host_name {
            Some(name) => Facts::with_name(name.clone()),
            None => Facts::new(),
        };
        facts.set("os_family", json!("Debian"));
        facts.set("distribution", json!("Ubuntu"));
        Ok(facts)
    }

    async fn check_command(&self, target: &Target, _command: &str, _sudo: bool) -> Result<bool> {
        self.check_command_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "check_command")?;
        Ok(true)
    }

    async fn path_exists(&self, target: &Target, path: &str) -> Result<bool> {
        self.path_exists_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "path_exists")?;
        Ok(!path.starts_with("/missing"))
    }

    async fn package_installed(
        &self,
        target: &Target,
        _facts: &Facts,
        package: &str,
    ) -> Result<bool> {
        self.package_installed_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "package_installed")?;
        Ok(package != "absent-pkg")
    }

    async fn service_active(
        &self,
        target: &Target,
        _facts: &Facts,
        _service: &str,
    ) -> Result<bool> {
        self.service_active_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "service_active")?;
        Ok(true)
    }

    async fn execute(&self, target: &Target, _command: &str, _sudo: bool) -> Result<CommandOutput> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        self.check_injected_failure(target, "execute")?;
        Ok(CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        })
    }
}
