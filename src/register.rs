//! Test descriptors and the registry that holds them.
//!
//! Test modules describe themselves with a [`Descriptor`] and add it to a
//! [`Registry`] during start-up. The registry has two phases: while open
//! it accepts registrations; once [`closed`](Registry::close) it is
//! read-only and can be handed to the selector and the harness.
//!
//! # Example
//!
//! ```
//! use futures::FutureExt;
//! use sortie::cluster::{TestCluster, TestOutcome};
//! use sortie::register::{Descriptor, Flag, Registry};
//!
//! async fn hostname(c: &TestCluster) -> TestOutcome {
//!     let m = c.machine(0)?;
//!     c.must_ssh(m.as_ref(), "hostname").await?;
//!     Ok(())
//! }
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     Descriptor::new("basic.hostname", |c| hostname(c).boxed())
//!         .with_cluster_size(1)
//!         .with_exclude_platforms(["qemu"])
//!         .with_flag(Flag::NoSshKeyInMetadata),
//! )?;
//! registry.close();
//! assert_eq!(registry.all().len(), 1);
//! # Ok::<(), sortie::register::RegisterError>(())
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::cluster::{TestCluster, TestOutcome};
use crate::platform::RuntimeConfig;

/// Errors returned by [`Registry::register`].
///
/// All of them are programming errors in a test module, not runtime
/// conditions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegisterError {
    /// Another descriptor already holds this name.
    #[error("Duplicate test name: {0}")]
    DuplicateName(String),

    /// The descriptor violates a registration rule.
    #[error("Invalid test {name:?}: {reason}")]
    InvalidDescriptor { name: String, reason: String },

    /// Selection has begun; the registry no longer accepts tests.
    #[error("Registry is closed; cannot register {0}")]
    Closed(String),
}

/// Capability and behavior tags that change how a test's environment
/// is provisioned or whether it runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// Don't inject SSH keys through the boot configuration.
    NoSshKeyInUserData,
    /// Don't inject SSH keys through platform metadata.
    NoSshKeyInMetadata,
    /// Don't fail the test if the machine boots into an emergency shell.
    NoEmergencyShellCheck,
    /// The test needs outbound internet access.
    RequiresInternetAccess,
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Flag::NoSshKeyInUserData => "no-ssh-key-in-user-data",
            Flag::NoSshKeyInMetadata => "no-ssh-key-in-metadata",
            Flag::NoEmergencyShellCheck => "no-emergency-shell-check",
            Flag::RequiresInternetAccess => "requires-internet-access",
        };
        f.write_str(name)
    }
}

/// A test body.
///
/// Takes the cluster handle for the duration of the test and returns
/// `Err` to fail. See [`crate::cluster`] for the assertion helpers.
pub type TestFn = Arc<dyn for<'a> Fn(&'a TestCluster) -> BoxFuture<'a, TestOutcome> + Send + Sync>;

/// A test body that does nothing.
///
/// Useful for tests whose whole check is that provisioning succeeds.
pub fn empty(_cluster: &TestCluster) -> BoxFuture<'_, TestOutcome> {
    async { Ok(()) }.boxed()
}

/// Immutable definition of one registered test.
///
/// Built with [`Descriptor::new`] and the builder methods, then moved
/// into a [`Registry`]. Nothing can change it after registration.
#[derive(Clone)]
pub struct Descriptor {
    name: String,
    run: TestFn,
    cluster_size: usize,
    platforms: Vec<String>,
    exclude_platforms: Vec<String>,
    distros: Vec<String>,
    exclude_architectures: Vec<String>,
    flags: Vec<Flag>,
    user_data: Option<String>,
    timeout: Option<Duration>,
}

impl Descriptor {
    /// Creates a descriptor with the given name and body.
    ///
    /// The defaults are a cluster of zero machines, no target
    /// constraints, no flags and no boot configuration.
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: for<'a> Fn(&'a TestCluster) -> BoxFuture<'a, TestOutcome> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            run: Arc::new(run),
            cluster_size: 0,
            platforms: Vec::new(),
            exclude_platforms: Vec::new(),
            distros: Vec::new(),
            exclude_architectures: Vec::new(),
            flags: Vec::new(),
            user_data: None,
            timeout: None,
        }
    }

    /// Sets how many machines are provisioned before the body runs.
    pub fn with_cluster_size(mut self, size: usize) -> Self {
        self.cluster_size = size;
        self
    }

    /// Restricts the test to these platforms.
    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.extend(platforms.into_iter().map(Into::into));
        self
    }

    /// Never runs the test on these platforms.
    pub fn with_exclude_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_platforms
            .extend(platforms.into_iter().map(Into::into));
        self
    }

    /// Restricts the test to these distributions.
    pub fn with_distros<I, S>(mut self, distros: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.distros.extend(distros.into_iter().map(Into::into));
        self
    }

    /// Never runs the test on these CPU architectures.
    pub fn with_exclude_architectures<I, S>(mut self, arches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_architectures
            .extend(arches.into_iter().map(Into::into));
        self
    }

    /// Adds a flag.
    pub fn with_flag(mut self, flag: Flag) -> Self {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
        self
    }

    /// Sets the boot configuration handed to every machine.
    pub fn with_user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }

    /// Overrides the harness-wide test timeout for this test.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn platforms(&self) -> &[String] {
        &self.platforms
    }

    pub fn exclude_platforms(&self) -> &[String] {
        &self.exclude_platforms
    }

    pub fn distros(&self) -> &[String] {
        &self.distros
    }

    pub fn exclude_architectures(&self) -> &[String] {
        &self.exclude_architectures
    }

    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Invokes the test body.
    pub fn run<'a>(&self, cluster: &'a TestCluster) -> BoxFuture<'a, TestOutcome> {
        (self.run)(cluster)
    }

    /// Provisioning options implied by this test's flags.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            no_ssh_key_in_user_data: self.has_flag(Flag::NoSshKeyInUserData),
            no_ssh_key_in_metadata: self.has_flag(Flag::NoSshKeyInMetadata),
            no_emergency_shell_check: self.has_flag(Flag::NoEmergencyShellCheck),
            requires_internet: self.has_flag(Flag::RequiresInternetAccess),
        }
    }

    fn validate(&self) -> Result<(), RegisterError> {
        let invalid = |reason: String| RegisterError::InvalidDescriptor {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name must not contain whitespace".to_string()));
        }
        if let Some(p) = self
            .platforms
            .iter()
            .find(|p| self.exclude_platforms.contains(p))
        {
            return Err(invalid(format!(
                "platform {} is both required and excluded",
                p
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("name", &self.name)
            .field("cluster_size", &self.cluster_size)
            .field("platforms", &self.platforms)
            .field("exclude_platforms", &self.exclude_platforms)
            .field("distros", &self.distros)
            .field("exclude_architectures", &self.exclude_architectures)
            .field("flags", &self.flags)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Table of registered test descriptors.
///
/// Passed explicitly to the selector and harness; there is no global
/// instance, so every unit test can build a fresh one.
#[derive(Debug, Default)]
pub struct Registry {
    tests: Vec<Descriptor>,
    names: HashSet<String>,
    closed: bool,
}

impl Registry {
    /// Creates an empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor.
    ///
    /// # Errors
    ///
    /// - `RegisterError::Closed` - the registry has been closed
    /// - `RegisterError::InvalidDescriptor` - empty or malformed name, or
    ///   contradictory platform lists
    /// - `RegisterError::DuplicateName` - the name is already taken
    pub fn register(&mut self, descriptor: Descriptor) -> Result<(), RegisterError> {
        if self.closed {
            return Err(RegisterError::Closed(descriptor.name));
        }
        descriptor.validate()?;
        if !self.names.insert(descriptor.name.clone()) {
            return Err(RegisterError::DuplicateName(descriptor.name));
        }
        self.tests.push(descriptor);
        Ok(())
    }

    /// Ends the registration phase. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Whether the registration phase has ended.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// All descriptors in registration order.
    pub fn all(&self) -> &[Descriptor] {
        &self.tests
    }

    /// Looks up a descriptor by name.
    pub fn get(&self, name: &str) -> Option<&Descriptor> {
        self.tests.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_in_order() {
        let mut registry = Registry::new();
        registry.register(Descriptor::new("b", empty)).unwrap();
        registry.register(Descriptor::new("a", empty)).unwrap();
        registry.register(Descriptor::new("c", empty)).unwrap();

        let names: Vec<_> = registry.all().iter().map(|d| d.name()).collect();
        assert_eq!(names, ["b", "a", "c"]);
        assert!(registry.get("a").is_some());
        assert!(registry.get("z").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = Registry::new();
        registry.register(Descriptor::new("x", empty)).unwrap();
        assert_eq!(
            registry.register(Descriptor::new("x", empty).with_cluster_size(2)),
            Err(RegisterError::DuplicateName("x".to_string()))
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.all()[0].cluster_size(), 0);
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.register(Descriptor::new("", empty)),
            Err(RegisterError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            registry.register(Descriptor::new("has space", empty)),
            Err(RegisterError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            registry.register(
                Descriptor::new("contradiction", empty)
                    .with_platforms(["qemu"])
                    .with_exclude_platforms(["qemu"])
            ),
            Err(RegisterError::InvalidDescriptor { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_registry_rejects_registration() {
        let mut registry = Registry::new();
        registry.register(Descriptor::new("x", empty)).unwrap();
        registry.close();
        assert!(registry.is_closed());
        assert_eq!(
            registry.register(Descriptor::new("y", empty)),
            Err(RegisterError::Closed("y".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_flags_map_to_runtime_config() {
        let d = Descriptor::new("x", empty)
            .with_flag(Flag::NoSshKeyInMetadata)
            .with_flag(Flag::NoSshKeyInMetadata)
            .with_flag(Flag::RequiresInternetAccess);

        assert_eq!(d.flags().len(), 2);
        let runtime = d.runtime_config();
        assert!(runtime.no_ssh_key_in_metadata);
        assert!(runtime.requires_internet);
        assert!(!runtime.no_ssh_key_in_user_data);
        assert!(!runtime.no_emergency_shell_check);
    }
}
