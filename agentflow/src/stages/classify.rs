//! Advisory stage classification.
//!
//! Consulted only when a plugin declares no explicit stages and its kind
//! supplies no default. The classifier is best-effort: a `None` answer
//! falls through and registration fails rather than guessing.

use super::{PluginDescriptor, Stage};

/// Pluggable strategy for inferring a stage from a descriptor.
pub trait StageClassifier: Send + Sync {
    /// Suggests a stage for the descriptor, or `None` when unsure.
    fn classify(&self, descriptor: &PluginDescriptor) -> Option<Stage>;
}

/// Keyword-based classifier over the plugin name.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameHintClassifier;

impl NameHintClassifier {
    /// Creates a new classifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StageClassifier for NameHintClassifier {
    fn classify(&self, descriptor: &PluginDescriptor) -> Option<Stage> {
        let name = descriptor.name.to_ascii_lowercase();

        let hints: [(&[&str], Stage); 6] = [
            (&["parse", "input", "ingest"], Stage::Parse),
            (&["think", "reason", "plan", "prompt"], Stage::Think),
            (&["review", "check", "verify"], Stage::Review),
            (&["deliver", "output", "respond", "reply"], Stage::Deliver),
            (&["error", "fallback", "recover"], Stage::Error),
            (&["tool", "exec", "action"], Stage::Do),
        ];

        for (keywords, stage) in hints {
            if keywords.iter().any(|k| name.contains(k)) {
                return Some(stage);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PluginKind;

    fn descriptor(name: &str) -> PluginDescriptor {
        PluginDescriptor::new(name, PluginKind::Resource)
    }

    #[test]
    fn test_name_hints() {
        let classifier = NameHintClassifier::new();
        assert_eq!(classifier.classify(&descriptor("message_parser")), Some(Stage::Parse));
        assert_eq!(classifier.classify(&descriptor("chain_planner")), Some(Stage::Think));
        assert_eq!(classifier.classify(&descriptor("safety_review")), Some(Stage::Review));
        assert_eq!(classifier.classify(&descriptor("http_responder")), Some(Stage::Deliver));
        assert_eq!(classifier.classify(&descriptor("fallback_writer")), Some(Stage::Error));
        assert_eq!(classifier.classify(&descriptor("shell_exec")), Some(Stage::Do));
    }

    #[test]
    fn test_unknown_name_is_none() {
        let classifier = NameHintClassifier::new();
        assert_eq!(classifier.classify(&descriptor("widget")), None);
    }
}
