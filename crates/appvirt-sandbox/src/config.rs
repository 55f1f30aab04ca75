//! Sandbox settings.
//!
//! [`SandboxSettings`] holds the policy for one service: whether it is
//! enabled, which methods may be called, which pre-existing resources may be
//! touched and how, and how many operations may run.  [`SandboxConfig`] is
//! the process-wide seed: the global strictness flag, the default settings
//! every service starts from, and optional per-service overrides.
//!
//! All types deserialize from TOML/JSON so settings can be seeded from the
//! runtime configuration at process start.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Operation kinds
// ---------------------------------------------------------------------------

/// The kind of operation a call performs.
///
/// Doubles as the capability a resource rule grants and the bucket a usage
/// counter is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Read,
    Write,
    Delete,
}

impl OpKind {
    /// Every kind, in counter order.
    pub const ALL: [OpKind; 3] = [OpKind::Read, OpKind::Write, OpKind::Delete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Resource rules
// ---------------------------------------------------------------------------

/// Grants capabilities on one pre-existing resource, matched by id or name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRule {
    /// Resource id or resource name.
    pub matcher: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub delete: bool,
}

impl ResourceRule {
    /// A rule that matches `matcher` and grants nothing yet.
    pub fn new(matcher: impl Into<String>) -> Self {
        Self {
            matcher: matcher.into(),
            read: false,
            write: false,
            delete: false,
        }
    }

    /// Read-only access.
    pub fn read_only(matcher: impl Into<String>) -> Self {
        Self::new(matcher).with_read(true)
    }

    /// Read, write and delete access.
    pub fn full(matcher: impl Into<String>) -> Self {
        Self::new(matcher)
            .with_read(true)
            .with_write(true)
            .with_delete(true)
    }

    pub fn with_read(mut self, allow: bool) -> Self {
        self.read = allow;
        self
    }

    pub fn with_write(mut self, allow: bool) -> Self {
        self.write = allow;
        self
    }

    pub fn with_delete(mut self, allow: bool) -> Self {
        self.delete = allow;
        self
    }

    /// Whether this rule applies to a resource with the given id and name.
    pub fn matches(&self, id: &str, name: Option<&str>) -> bool {
        self.matcher == id || name.is_some_and(|n| n == self.matcher)
    }

    /// Whether this rule grants `capability`.
    pub fn allows(&self, capability: OpKind) -> bool {
        match capability {
            OpKind::Read => self.read,
            OpKind::Write => self.write,
            OpKind::Delete => self.delete,
        }
    }
}

// ---------------------------------------------------------------------------
// Usage limits
// ---------------------------------------------------------------------------

/// How many operations a service may perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UsageLimit {
    /// Limit on the sum of all operation kinds.
    Total(u64),
    /// Independent limit per kind.  Kinds without an entry are unlimited.
    PerKind(BTreeMap<OpKind, u64>),
}

impl UsageLimit {
    /// Build a per-kind limit from `(kind, limit)` pairs.
    pub fn per_kind(limits: impl IntoIterator<Item = (OpKind, u64)>) -> Self {
        Self::PerKind(limits.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Per-service settings
// ---------------------------------------------------------------------------

/// The sandbox policy and usage state of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// When `false`, every call to the service is refused.
    pub enabled: bool,

    /// Methods that may be called.  `None` means no restriction.
    #[serde(rename = "methods")]
    pub method_whitelist: Option<BTreeSet<String>>,

    /// Rules granting access to resources not created in this session.
    #[serde(rename = "resources")]
    pub resource_whitelist: Vec<ResourceRule>,

    /// Operation budget.  `None` means unlimited.
    pub usage_limit: Option<UsageLimit>,

    /// Operations performed so far, per kind.
    #[serde(skip)]
    pub usage_count: BTreeMap<OpKind, u64>,

    /// Whether session teardown trashes resources this service created.
    pub cleanup: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            method_whitelist: None,
            resource_whitelist: Vec::new(),
            usage_limit: None,
            usage_count: BTreeMap::new(),
            cleanup: true,
        }
    }
}

impl SandboxSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the service.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Restrict callable methods to `methods`.
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.method_whitelist = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Add a resource rule.
    pub fn with_rule(mut self, rule: ResourceRule) -> Self {
        self.resource_whitelist.push(rule);
        self
    }

    /// Set the usage limit.
    pub fn with_usage_limit(mut self, limit: UsageLimit) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    /// Opt in or out of session teardown.
    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Whether `method` passes the method whitelist.
    pub fn allows_method(&self, method: &str) -> bool {
        self.method_whitelist
            .as_ref()
            .is_none_or(|allowed| allowed.contains(method))
    }

    /// Operations of `kind` performed so far.
    pub fn usage(&self, kind: OpKind) -> u64 {
        self.usage_count.get(&kind).copied().unwrap_or(0)
    }

    /// Operations of every kind performed so far.
    pub fn total_usage(&self) -> u64 {
        self.usage_count.values().sum()
    }

    /// If one more operation of `kind` would break the limit, return which
    /// limit and the `(used, limit)` pair.
    pub(crate) fn quota_exhausted(&self, kind: OpKind) -> Option<(crate::error::LimitScope, u64, u64)> {
        use crate::error::LimitScope;

        match self.usage_limit.as_ref()? {
            UsageLimit::Total(limit) => {
                let used = self.total_usage();
                (used >= *limit).then_some((LimitScope::Total, used, *limit))
            }
            UsageLimit::PerKind(limits) => {
                let limit = *limits.get(&kind)?;
                let used = self.usage(kind);
                (used >= limit).then_some((LimitScope::Kind(kind), used, limit))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Process-wide seed
// ---------------------------------------------------------------------------

/// Seed for the sandbox engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Whether resource access checks apply at all.
    pub strict: bool,

    /// Settings every service starts from.
    pub defaults: SandboxSettings,

    /// Per-service settings that replace `defaults` for that service.
    pub services: BTreeMap<String, SandboxSettings>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            strict: true,
            defaults: SandboxSettings::default(),
            services: BTreeMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle resource access checks.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Replace the default settings.
    pub fn with_defaults(mut self, defaults: SandboxSettings) -> Self {
        self.defaults = defaults;
        self
    }

    /// Seed settings for one service.
    pub fn with_service(mut self, service: impl Into<String>, settings: SandboxSettings) -> Self {
        self.services.insert(service.into(), settings);
        self
    }

    /// The seeded settings for `service`.
    pub fn seed_for(&self, service: &str) -> SandboxSettings {
        self.services
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitScope;

    #[test]
    fn default_settings_values() {
        let s = SandboxSettings::default();
        assert!(s.enabled);
        assert!(s.method_whitelist.is_none());
        assert!(s.resource_whitelist.is_empty());
        assert!(s.usage_limit.is_none());
        assert!(s.cleanup);
        assert_eq!(s.total_usage(), 0);
    }

    #[test]
    fn method_whitelist() {
        let s = SandboxSettings::new();
        assert!(s.allows_method("anything"));

        let s = s.with_methods(["getFileById"]);
        assert!(s.allows_method("getFileById"));
        assert!(!s.allows_method("trashFile"));

        let s = SandboxSettings::new().with_methods(Vec::<String>::new());
        assert!(!s.allows_method("getFileById"));
    }

    #[test]
    fn rule_matches_id_or_name() {
        let rule = ResourceRule::read_only("Budget 2026");
        assert!(rule.matches("id-1", Some("Budget 2026")));
        assert!(!rule.matches("id-1", Some("Other")));
        assert!(!rule.matches("id-1", None));
        assert!(ResourceRule::read_only("id-1").matches("id-1", None));
    }

    #[test]
    fn rule_capabilities() {
        let rule = ResourceRule::read_only("r");
        assert!(rule.allows(OpKind::Read));
        assert!(!rule.allows(OpKind::Write));
        assert!(!rule.allows(OpKind::Delete));

        let rule = ResourceRule::full("r");
        assert!(OpKind::ALL.iter().all(|k| rule.allows(*k)));
    }

    #[test]
    fn total_limit_sums_kinds() {
        let mut s = SandboxSettings::new().with_usage_limit(UsageLimit::Total(3));
        s.usage_count.insert(OpKind::Read, 2);
        assert!(s.quota_exhausted(OpKind::Write).is_none());

        s.usage_count.insert(OpKind::Write, 1);
        assert_eq!(
            s.quota_exhausted(OpKind::Delete),
            Some((LimitScope::Total, 3, 3))
        );
    }

    #[test]
    fn per_kind_limit_is_independent() {
        let mut s = SandboxSettings::new()
            .with_usage_limit(UsageLimit::per_kind([(OpKind::Write, 1)]));
        s.usage_count.insert(OpKind::Write, 1);
        s.usage_count.insert(OpKind::Read, 100);

        assert!(s.quota_exhausted(OpKind::Read).is_none());
        assert_eq!(
            s.quota_exhausted(OpKind::Write),
            Some((LimitScope::Kind(OpKind::Write), 1, 1))
        );
    }

    #[test]
    fn seed_for_falls_back_to_defaults() {
        let config = SandboxConfig::new()
            .with_defaults(SandboxSettings::new().with_usage_limit(UsageLimit::Total(10)))
            .with_service("Drive", SandboxSettings::new().with_enabled(false));

        assert!(!config.seed_for("Drive").enabled);
        assert_eq!(
            config.seed_for("Sheets").usage_limit,
            Some(UsageLimit::Total(10))
        );
    }

    #[test]
    fn settings_from_toml() {
        let raw = r#"
            strict = false

            [defaults]
            usage_limit = 50

            [services.Drive]
            methods = ["getFileById", "createFile"]
            cleanup = false
            resources = [
                { matcher = "abc", read = true },
                { matcher = "Reports", read = true, write = true },
            ]
        "#;
        let config: SandboxConfig = toml::from_str(raw).unwrap();

        assert!(!config.strict);
        assert_eq!(config.defaults.usage_limit, Some(UsageLimit::Total(50)));

        let drive = config.seed_for("Drive");
        assert!(drive.enabled);
        assert!(!drive.cleanup);
        assert!(drive.allows_method("createFile"));
        assert!(!drive.allows_method("trashFile"));
        assert_eq!(drive.resource_whitelist.len(), 2);
        assert!(drive.resource_whitelist[1].write);
        assert!(!drive.resource_whitelist[0].write);
    }
}
