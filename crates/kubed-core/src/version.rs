//! Server version parsing and API version selection.
//!
//! Which API group a workload resource lives in depends on the Kubernetes
//! server version. The mapping is an ordered table of
//! `(min_version, api_version)` rows: the row with the greatest
//! `min_version` not above the server version wins. Supporting a new server
//! version means adding a row.

use std::fmt;

use semver::Version;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse server version: {input:?}")]
pub struct VersionParseError {
    pub input: String,
}

/// A parsed `vMAJOR.MINOR.PATCH[-pre][+build]` server version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    version: Version,
    raw: String,
}

impl ServerVersion {
    /// Parse versions like `v1.7.4`, `v1.9.7-gke.6` or `1.10`.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let raw = input.trim();
        let bare = raw.strip_prefix('v').unwrap_or(raw);
        let err = || VersionParseError {
            input: input.to_string(),
        };

        let version = match Version::parse(bare) {
            Ok(v) => v,
            // Allow `MAJOR.MINOR` as reported by some distributions.
            Err(_) => Version::parse(&format!("{bare}.0")).map_err(|_| err())?,
        };

        Ok(Self {
            version,
            raw: raw.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.version.major
    }

    pub fn minor(&self) -> u64 {
        self.version.minor
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Release triple with pre-release and build metadata dropped.
    fn release(&self) -> Version {
        Version::new(self.version.major, self.version.minor, self.version.patch)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One row of the API version table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersionRule {
    pub min_version: Version,
    pub api_version: String,
}

impl ApiVersionRule {
    pub fn new(major: u64, minor: u64, api_version: &str) -> Self {
        Self {
            min_version: Version::new(major, minor, 0),
            api_version: api_version.to_string(),
        }
    }
}

/// Ordered `(min_version, api_version)` table for workload resources.
#[derive(Debug, Clone)]
pub struct ApiVersionTable {
    rules: Vec<ApiVersionRule>,
}

impl Default for ApiVersionTable {
    fn default() -> Self {
        Self::new(
            ApiVersionRule::new(1, 5, "extensions/v1beta1"),
            [
                ApiVersionRule::new(1, 8, "apps/v1beta2"),
                ApiVersionRule::new(1, 9, "apps/v1"),
            ],
        )
    }
}

impl ApiVersionTable {
    /// Build a table from rules in any order. A table always has at least
    /// one row, so `first` is required.
    pub fn new(first: ApiVersionRule, rest: impl IntoIterator<Item = ApiVersionRule>) -> Self {
        let mut rules: Vec<_> = std::iter::once(first).chain(rest).collect();
        rules.sort_by(|a, b| a.min_version.cmp(&b.min_version));
        Self { rules }
    }

    pub fn rules(&self) -> &[ApiVersionRule] {
        &self.rules
    }

    /// API version of the most recent row.
    pub fn latest(&self) -> &str {
        &self.rules[self.rules.len() - 1].api_version
    }

    /// API version of the oldest row.
    pub fn oldest(&self) -> &str {
        &self.rules[0].api_version
    }

    /// Select the API version for a parsed server version.
    ///
    /// Servers older than every row map to the oldest row.
    pub fn select(&self, server: &ServerVersion) -> &str {
        let release = server.release();
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.min_version <= release)
            .map(|rule| rule.api_version.as_str())
            .unwrap_or_else(|| self.oldest())
    }

    /// Select from a raw version string. Unparseable input maps to the most
    /// recent row.
    pub fn select_raw(&self, server_version: &str) -> &str {
        match ServerVersion::parse(server_version) {
            Ok(v) => self.select(&v),
            Err(e) => {
                warn!(error = %e, fallback = self.latest(), "using most recent API version");
                self.latest()
            }
        }
    }
}

/// Group part of an `apiVersion` (`apps/v1` → `apps`, `v1` → `""`).
pub fn api_group(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}
