//! Stage taxonomy and the plugin contract.
//!
//! A stage is a named phase of request processing with an ordered plugin
//! list. Plugins are the units of work; they read and write shared run
//! state only through the [`PluginContext`](crate::context::PluginContext)
//! handed to them per execution.

mod classify;
mod registry;

pub use classify::{NameHintClassifier, StageClassifier};
pub use registry::{RegisteredPlugin, StageRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::PluginContext;

/// A named phase of request processing.
///
/// The main loop executes [`Stage::MAIN_SEQUENCE`] in fixed order; `Error`
/// runs only on the recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    /// Inbound message interpretation.
    Parse,
    /// Reasoning and planning.
    Think,
    /// Tool execution and side effects.
    Do,
    /// Output inspection before delivery.
    Review,
    /// Terminal response production.
    Deliver,
    /// Failure recovery; entered only by the orchestrator.
    Error,
}

impl Stage {
    /// The fixed order of one loop iteration.
    pub const MAIN_SEQUENCE: [Self; 5] = [
        Self::Parse,
        Self::Think,
        Self::Do,
        Self::Review,
        Self::Deliver,
    ];

    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Think => "think",
            Self::Do => "do",
            Self::Review => "review",
            Self::Deliver => "deliver",
            Self::Error => "error",
        }
    }

    /// Whether a plugin executing in this stage may set the terminal
    /// response. Deliver is the normal path; Error is the recovery path.
    #[must_use]
    pub fn may_set_response(self) -> bool {
        matches!(self, Self::Deliver | Self::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of plugin type classes.
///
/// The stage-default lookup is total over this enum; `Resource` maps to no
/// stages (resource providers do not execute in the loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Provides a shared service; not stage-bound by default.
    Resource,
    /// Executes side effects.
    Tool,
    /// Drives reasoning.
    Prompt,
    /// Bridges inbound messages and outbound responses.
    Adapter,
    /// Handles the recovery path.
    Failure,
}

impl PluginKind {
    /// The stages a plugin of this kind runs in when none are declared.
    #[must_use]
    pub fn default_stages(self) -> &'static [Stage] {
        match self {
            Self::Tool => &[Stage::Do],
            Self::Prompt => &[Stage::Think],
            Self::Adapter => &[Stage::Parse, Stage::Deliver],
            Self::Failure => &[Stage::Error],
            Self::Resource => &[],
        }
    }

    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Adapter => "adapter",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration-time description of a plugin.
///
/// Produced by the external config loader; immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin name.
    pub name: String,
    /// The plugin's type class.
    pub kind: PluginKind,
    /// Explicit stage assignment; empty means "use kind default".
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Resource names this plugin needs.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Stage-data keys this plugin reads (used by the dependency linter).
    #[serde(default)]
    pub consumes: Vec<String>,
    /// Stage-data keys this plugin writes (used by the dependency linter).
    #[serde(default)]
    pub produces: Vec<String>,
}

impl PluginDescriptor {
    /// Creates a descriptor with no explicit stages or dependencies.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stages: Vec::new(),
            dependencies: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    /// Sets the explicit stage assignment.
    #[must_use]
    pub fn with_stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages = stages.into_iter().collect();
        self
    }

    /// Sets the resource dependencies.
    #[must_use]
    pub fn with_dependencies(
        mut self,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Declares stage-data keys this plugin reads.
    #[must_use]
    pub fn with_consumes(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.consumes = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declares stage-data keys this plugin writes.
    #[must_use]
    pub fn with_produces(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.produces = keys.into_iter().map(Into::into).collect();
        self
    }

    /// The stages this descriptor resolves to before consulting a
    /// classifier: explicit list first, kind default otherwise.
    #[must_use]
    pub fn declared_stages(&self) -> Vec<Stage> {
        if self.stages.is_empty() {
            self.kind.default_stages().to_vec()
        } else {
            self.stages.clone()
        }
    }
}

/// A unit of stage-bound logic.
///
/// Any error returned from `execute` propagates to the orchestrator
/// unchanged; the engine never retries a plugin.
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    /// The plugin name; must match its descriptor.
    fn name(&self) -> &str;

    /// Executes the plugin against the current run.
    async fn execute(&self, ctx: &PluginContext) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_sequence_order() {
        assert_eq!(
            Stage::MAIN_SEQUENCE,
            [Stage::Parse, Stage::Think, Stage::Do, Stage::Review, Stage::Deliver]
        );
        assert!(!Stage::MAIN_SEQUENCE.contains(&Stage::Error));
    }

    #[test]
    fn test_response_permission_by_stage() {
        assert!(Stage::Deliver.may_set_response());
        assert!(Stage::Error.may_set_response());
        for stage in [Stage::Parse, Stage::Think, Stage::Do, Stage::Review] {
            assert!(!stage.may_set_response());
        }
    }

    #[test]
    fn test_kind_defaults_are_total() {
        assert_eq!(PluginKind::Tool.default_stages(), &[Stage::Do]);
        assert_eq!(PluginKind::Prompt.default_stages(), &[Stage::Think]);
        assert_eq!(
            PluginKind::Adapter.default_stages(),
            &[Stage::Parse, Stage::Deliver]
        );
        assert_eq!(PluginKind::Failure.default_stages(), &[Stage::Error]);
        assert!(PluginKind::Resource.default_stages().is_empty());
    }

    #[test]
    fn test_descriptor_declared_stages_precedence() {
        let explicit = PluginDescriptor::new("p", PluginKind::Tool).with_stages([Stage::Parse]);
        assert_eq!(explicit.declared_stages(), vec![Stage::Parse]);

        let defaulted = PluginDescriptor::new("p", PluginKind::Prompt);
        assert_eq!(defaulted.declared_stages(), vec![Stage::Think]);
    }

    #[test]
    fn test_stage_serde_uses_uppercase_names() {
        let json = serde_json::to_string(&Stage::Deliver).unwrap();
        assert_eq!(json, "\"DELIVER\"");
        let parsed: Stage = serde_json::from_str("\"PARSE\"").unwrap();
        assert_eq!(parsed, Stage::Parse);
    }
}
