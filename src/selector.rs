//! Deciding which registered tests run against a target.
//!
//! [`select`] is a pure function of the registry and a [`Target`]: it
//! labels every descriptor [`Selection::Eligible`] or
//! [`Selection::Skip`] without touching any backend, which is what makes
//! dry-run listing possible.
//!
//! # Matching Rules
//!
//! Applied in order; the first failing rule gives the skip reason.
//!
//! | # | Rule | Reason |
//! |---|------|--------|
//! | 1 | `platforms` non-empty and target platform not in it | platform mismatch |
//! | 2 | target platform in `exclude_platforms` | platform excluded |
//! | 3 | `distros` non-empty and target distro not in it | distro mismatch |
//! | 4 | target architecture in `exclude_architectures` | architecture excluded |
//! | 5 | patterns given and none matches the name | name filter |
//! | 6 | descriptor carries a flag the target excludes | flag excluded |

use std::fmt;

use regex::Regex;

use crate::register::{Descriptor, Flag, Registry};

/// Errors that make selection impossible as a whole.
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// Selection requires the registration phase to be over.
    #[error("Registry is still open for registration")]
    RegistryOpen,

    /// There is nothing to select from.
    #[error("No tests registered")]
    EmptyRegistry,

    /// A name pattern could not be compiled.
    #[error("Invalid name pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Why a descriptor was not selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PlatformMismatch,
    PlatformExcluded,
    DistroMismatch,
    ArchitectureExcluded,
    NameFilter,
    FlagExcluded,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::PlatformMismatch => "platform mismatch",
            SkipReason::PlatformExcluded => "platform excluded",
            SkipReason::DistroMismatch => "distro mismatch",
            SkipReason::ArchitectureExcluded => "architecture excluded",
            SkipReason::NameFilter => "name filter",
            SkipReason::FlagExcluded => "flag excluded",
        };
        f.write_str(reason)
    }
}

/// Verdict for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Eligible,
    Skip(SkipReason),
}

impl Selection {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Selection::Eligible)
    }
}

/// A shell-style test-name pattern.
///
/// `*` matches any run of characters and `?` a single character;
/// everything else is literal. The whole name must match.
#[derive(Debug, Clone)]
pub struct NamePattern {
    raw: String,
    regex: Regex,
}

impl NamePattern {
    /// Compiles a glob pattern.
    ///
    /// # Example
    ///
    /// ```
    /// use sortie::selector::NamePattern;
    ///
    /// let p = NamePattern::new("rhcos.luks.*")?;
    /// assert!(p.matches("rhcos.luks.tpm"));
    /// assert!(!p.matches("coreos.ignition.v2.ssh.key"));
    /// # Ok::<(), sortie::selector::SelectError>(())
    /// ```
    pub fn new(pattern: &str) -> Result<Self, SelectError> {
        if pattern.is_empty() {
            return Err(SelectError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "empty pattern".to_string(),
            });
        }

        let mut source = String::with_capacity(pattern.len() + 8);
        source.push('^');
        let mut literal = [0u8; 4];
        for c in pattern.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                _ => source.push_str(&regex::escape(c.encode_utf8(&mut literal))),
            }
        }
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| SelectError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// The environment a run targets.
///
/// # Example
///
/// ```
/// use sortie::selector::Target;
///
/// let target = Target::new("qemu", "rhcos", "x86_64")
///     .with_patterns(["rhcos.*"])?;
/// assert_eq!(target.platform(), "qemu");
/// # Ok::<(), sortie::selector::SelectError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Target {
    platform: String,
    distro: String,
    arch: String,
    patterns: Vec<NamePattern>,
    exclude_flags: Vec<Flag>,
}

impl Target {
    pub fn new(
        platform: impl Into<String>,
        distro: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            distro: distro.into(),
            arch: arch.into(),
            patterns: Vec::new(),
            exclude_flags: Vec::new(),
        }
    }

    /// Adds test-name patterns. A name is selected if any pattern matches.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Result<Self, SelectError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for p in patterns {
            self.patterns.push(NamePattern::new(p.as_ref())?);
        }
        Ok(self)
    }

    /// Skips tests carrying any of these flags.
    pub fn with_exclude_flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        self.exclude_flags.extend(flags);
        self
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn distro(&self) -> &str {
        &self.distro
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn patterns(&self) -> &[NamePattern] {
        &self.patterns
    }

    /// Applies the matching rules to one descriptor.
    pub fn evaluate(&self, d: &Descriptor) -> Selection {
        let contains = |list: &[String], value: &str| list.iter().any(|v| v == value);

        if !d.platforms().is_empty() && !contains(d.platforms(), &self.platform) {
            return Selection::Skip(SkipReason::PlatformMismatch);
        }
        if contains(d.exclude_platforms(), &self.platform) {
            return Selection::Skip(SkipReason::PlatformExcluded);
        }
        if !d.distros().is_empty() && !contains(d.distros(), &self.distro) {
            return Selection::Skip(SkipReason::DistroMismatch);
        }
        if contains(d.exclude_architectures(), &self.arch) {
            return Selection::Skip(SkipReason::ArchitectureExcluded);
        }
        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| p.matches(d.name())) {
            return Selection::Skip(SkipReason::NameFilter);
        }
        if d.flags().iter().any(|f| self.exclude_flags.contains(f)) {
            return Selection::Skip(SkipReason::FlagExcluded);
        }
        Selection::Eligible
    }
}

/// One line of a dry-run listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub name: String,
    pub selection: Selection,
}

/// Labels every registered descriptor, in registration order.
///
/// # Errors
///
/// - `SelectError::RegistryOpen` - the registry was not closed
/// - `SelectError::EmptyRegistry` - nothing was registered
pub fn select<'r>(
    registry: &'r Registry,
    target: &Target,
) -> Result<Vec<(&'r Descriptor, Selection)>, SelectError> {
    if !registry.is_closed() {
        return Err(SelectError::RegistryOpen);
    }
    if registry.is_empty() {
        return Err(SelectError::EmptyRegistry);
    }
    Ok(registry
        .all()
        .iter()
        .map(|d| (d, target.evaluate(d)))
        .collect())
}

/// Names and verdicts for dry-run listing.
pub fn list_eligible(registry: &Registry, target: &Target) -> Result<Vec<Listing>, SelectError> {
    Ok(select(registry, target)?
        .into_iter()
        .map(|(d, selection)| Listing {
            name: d.name().to_string(),
            selection,
        })
        .collect())
}
