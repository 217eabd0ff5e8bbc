//! The layered validation pipeline.
//!
//! Three ordered phases gate startup: syntax (per-descriptor structure),
//! dependency (graph checks), and runtime (live connectivity, run in the
//! background). Syntax and dependency failures are fatal and reported
//! whole; runtime failures degrade the engine by opening circuits.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EngineConfig;
use crate::errors::{ConfigValidationError, ValidationFailure};
use crate::events::EventSink;
use crate::resources::{ResourceContainer, ResourceDescriptor};
use crate::stages::Stage;

/// Which validation phase produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPhase {
    /// Per-descriptor structural checks; no cross-descriptor work.
    Syntax,
    /// Graph construction, cycle detection, reference resolution.
    Dependency,
    /// Live connectivity checks against resolved resources.
    Runtime,
}

impl ValidationPhase {
    /// Lowercase stable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Dependency => "dependency",
            Self::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ValidationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of one validation phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// The phase that ran.
    pub phase: ValidationPhase,
    /// How long the phase took.
    pub duration_ms: f64,
    /// Everything the phase found wrong; empty means success.
    pub failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    /// Whether the phase passed.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts a failed phase into the fatal startup error.
    #[must_use]
    pub fn into_error(self) -> Option<ConfigValidationError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(ConfigValidationError::new(self.phase.as_str(), self.failures))
        }
    }
}

/// Phase 1: structural checks on each descriptor in isolation.
///
/// No network, no cross-plugin analysis; this phase is expected to finish
/// well under 100ms even for large configurations.
#[must_use]
pub fn run_syntax_phase(config: &EngineConfig) -> ValidationResult {
    let start = Instant::now();
    let mut failures = Vec::new();

    let mut seen_plugins = HashSet::new();
    for plugin in &config.plugins {
        let location = format!("plugin:{}", plugin.name);
        if plugin.name.trim().is_empty() {
            failures.push(ValidationFailure::new(&location, "plugin name is empty"));
        }
        if !seen_plugins.insert(plugin.name.clone()) {
            failures.push(ValidationFailure::new(&location, "duplicate plugin name"));
        }
        let mut seen_stages = HashSet::new();
        for stage in &plugin.stages {
            if !seen_stages.insert(*stage) {
                failures.push(ValidationFailure::new(
                    &location,
                    format!("stage '{stage}' listed more than once"),
                ));
            }
        }
    }

    let mut seen_resources = HashSet::new();
    for resource in &config.resources {
        let location = format!("resource:{}", resource.name);
        if resource.name.trim().is_empty() {
            failures.push(ValidationFailure::new(&location, "resource name is empty"));
        }
        if !seen_resources.insert(resource.name.clone()) {
            failures.push(ValidationFailure::new(&location, "duplicate resource name"));
        }
        if resource.dependencies.iter().any(|d| d == &resource.name) {
            failures.push(ValidationFailure::new(&location, "resource depends on itself"));
        }
    }

    ValidationResult {
        phase: ValidationPhase::Syntax,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        failures,
    }
}

/// Phase 2: graph checks across the whole configuration.
///
/// Builds the resource dependency graph, detects cycles, resolves every
/// declared dependency, and runs the one static lint the engine carries:
/// a PARSE-stage plugin must not consume a stage-data key produced only by
/// DO-stage plugins (PARSE runs before DO within every iteration, so the
/// key can never be present on the first pass).
#[must_use]
pub fn run_dependency_phase(config: &EngineConfig) -> ValidationResult {
    let start = Instant::now();
    let mut failures = Vec::new();

    let resource_names: HashSet<&str> =
        config.resources.iter().map(|r| r.name.as_str()).collect();

    for resource in &config.resources {
        for dep in &resource.dependencies {
            if !resource_names.contains(dep.as_str()) {
                failures.push(ValidationFailure::new(
                    format!("resource:{}", resource.name),
                    format!("depends on unknown resource '{dep}'"),
                ));
            }
        }
    }

    if let Some(cycle) = find_resource_cycle(&config.resources) {
        failures.push(ValidationFailure::new(
            "resource-graph",
            format!("circular dependency: {}", cycle.join(" -> ")),
        ));
    }

    for plugin in &config.plugins {
        for dep in &plugin.dependencies {
            if !resource_names.contains(dep.as_str()) {
                failures.push(ValidationFailure::new(
                    format!("plugin:{}", plugin.name),
                    format!("depends on unknown resource '{dep}'"),
                ));
            }
        }
    }

    failures.extend(lint_parse_consumes_do_produced(config));

    ValidationResult {
        phase: ValidationPhase::Dependency,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        failures,
    }
}

/// Phase 3: live health checks against every resolved resource.
///
/// Never fatal. A failing resource's circuit is forced open and the
/// failure surfaces through the event sink; the engine starts regardless
/// and runs degraded until the breaker recovers.
pub async fn run_runtime_phase(
    container: Arc<ResourceContainer>,
    sink: Arc<dyn EventSink>,
) -> ValidationResult {
    let start = Instant::now();
    let mut failures = Vec::new();

    for name in container.resource_names() {
        let Ok(resource) = container.get(&name) else {
            continue;
        };
        if let Err(err) = resource.health_check().await {
            warn!(resource = %name, %err, "runtime health check failed; opening circuit");
            if let Some(kind) = container.kind_of(&name) {
                container.breakers().for_kind(kind).force_open();
            }
            sink.try_emit(
                "resource.health_failed",
                Some(serde_json::json!({
                    "resource": name,
                    "error": err.to_string(),
                    "phase": ValidationPhase::Runtime.as_str(),
                })),
            );
            failures.push(ValidationFailure::new(
                format!("resource:{name}"),
                err.to_string(),
            ));
        }
    }

    ValidationResult {
        phase: ValidationPhase::Runtime,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        failures,
    }
}

/// Spawns the runtime phase in the background, non-blocking to startup.
pub fn spawn_runtime_phase(
    container: Arc<ResourceContainer>,
    sink: Arc<dyn EventSink>,
) -> tokio::task::JoinHandle<ValidationResult> {
    tokio::spawn(run_runtime_phase(container, sink))
}

fn find_resource_cycle(resources: &[ResourceDescriptor]) -> Option<Vec<String>> {
    let by_name: HashMap<&str, &ResourceDescriptor> =
        resources.iter().map(|r| (r.name.as_str(), r)).collect();

    fn visit(
        node: &str,
        by_name: &HashMap<&str, &ResourceDescriptor>,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if in_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        in_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(descriptor) = by_name.get(node) {
            for dep in &descriptor.dependencies {
                if let Some(cycle) = visit(dep, by_name, visited, in_stack, path) {
                    return Some(cycle);
                }
            }
        }

        in_stack.remove(node);
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    for resource in resources {
        let mut in_stack = HashSet::new();
        let mut path = Vec::new();
        if let Some(cycle) =
            visit(&resource.name, &by_name, &mut visited, &mut in_stack, &mut path)
        {
            return Some(cycle);
        }
    }
    None
}

fn lint_parse_consumes_do_produced(config: &EngineConfig) -> Vec<ValidationFailure> {
    let mut producers_by_key: HashMap<&str, Vec<Vec<Stage>>> = HashMap::new();
    for plugin in &config.plugins {
        for key in &plugin.produces {
            producers_by_key
                .entry(key.as_str())
                .or_default()
                .push(plugin.declared_stages());
        }
    }

    let mut failures = Vec::new();
    for plugin in &config.plugins {
        if !plugin.declared_stages().contains(&Stage::Parse) {
            continue;
        }
        for key in &plugin.consumes {
            let Some(producers) = producers_by_key.get(key.as_str()) else {
                continue;
            };
            let only_do = producers
                .iter()
                .all(|stages| stages.iter().all(|s| *s == Stage::Do));
            if only_do {
                failures.push(ValidationFailure::new(
                    format!("plugin:{}", plugin.name),
                    format!(
                        "PARSE-stage plugin consumes '{key}', which is produced only by \
                         DO-stage plugins and cannot exist on the first pass"
                    ),
                ));
            }
        }
    }
    failures
}
