//! Configuration-time resource descriptions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The boundary class of a resource, used to pick circuit-breaker defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A database connection or pool.
    Database,
    /// A remote third-party API.
    ExternalApi,
    /// Local or mounted filesystem access.
    Filesystem,
    /// Anything else.
    Other,
}

impl ResourceKind {
    /// Every kind, for registries that want one slot per kind.
    pub const ALL: [Self; 4] = [Self::Database, Self::ExternalApi, Self::Filesystem, Self::Other];

    /// Consecutive failures before the kind's circuit opens.
    #[must_use]
    pub fn failure_threshold(self) -> u32 {
        match self {
            Self::Database => 3,
            Self::ExternalApi | Self::Other => 5,
            Self::Filesystem => 2,
        }
    }

    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::ExternalApi => "external_api",
            Self::Filesystem => "filesystem",
            Self::Other => "other",
        }
    }
}

impl Default for ResourceKind {
    fn default() -> Self {
        Self::Other
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration-time description of a resource.
///
/// Dependencies are injected after construction, so graphs of arbitrary
/// depth need no constructor signature coupling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Unique resource name.
    pub name: String,
    /// Names of resources this one needs attached before initialization.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// The boundary class.
    #[serde(default)]
    pub kind: ResourceKind,
}

impl ResourceDescriptor {
    /// Creates a descriptor with no dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            kind,
        }
    }

    /// Sets the dependency list.
    #[must_use]
    pub fn with_dependencies(
        mut self,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}
