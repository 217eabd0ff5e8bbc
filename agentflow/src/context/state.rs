//! Per-run shared state.
//!
//! One `RunState` exists per pipeline execution, shared behind an `Arc` by
//! every plugin context created during the run. Nothing in it outlives the
//! run except the conversation, which round-trips through the Memory
//! collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ResponseConflictError;
use crate::stages::Stage;

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// The speaker role ("user", "assistant", "system", ...).
    pub role: String,
    /// The message content.
    pub content: String,
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The record of a plugin failure during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    /// The stage the failure occurred in.
    pub stage: Stage,
    /// The plugin that raised.
    pub plugin_name: String,
    /// The rendered error message.
    pub error_message: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureInfo {
    /// Creates a failure record stamped with the current time.
    #[must_use]
    pub fn new(
        stage: Stage,
        plugin_name: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            plugin_name: plugin_name.into(),
            error_message: error_message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A deferred tool invocation, queued during a stage and executed at the
/// stage boundary.
#[derive(Debug, Clone)]
pub struct QueuedToolCall {
    /// The tool name.
    pub name: String,
    /// The invocation parameters.
    pub params: serde_json::Value,
}

/// Ephemeral state for one pipeline execution.
pub struct RunState {
    run_id: Uuid,
    user_id: String,
    pipeline_id: String,
    conversation: RwLock<Vec<ConversationEntry>>,
    response: RwLock<Option<serde_json::Value>>,
    stage_data: RwLock<HashMap<String, serde_json::Value>>,
    current_stage: RwLock<Stage>,
    iteration: AtomicU32,
    failure_info: RwLock<Option<FailureInfo>>,
    queued_tools: Mutex<Vec<QueuedToolCall>>,
}

impl RunState {
    /// Creates fresh state for a run, positioned at PARSE, iteration 0.
    #[must_use]
    pub fn new(user_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            user_id: user_id.into(),
            pipeline_id: pipeline_id.into(),
            conversation: RwLock::new(Vec::new()),
            response: RwLock::new(None),
            stage_data: RwLock::new(HashMap::new()),
            current_stage: RwLock::new(Stage::Parse),
            iteration: AtomicU32::new(0),
            failure_info: RwLock::new(None),
            queued_tools: Mutex::new(Vec::new()),
        }
    }

    /// The run identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The user identifier.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The pipeline identifier.
    #[must_use]
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    /// The conversation storage key: `{user_id}_{pipeline_id}`.
    #[must_use]
    pub fn conversation_key(&self) -> String {
        format!("{}_{}", self.user_id, self.pipeline_id)
    }

    /// Replaces the conversation with a history loaded from Memory.
    pub fn seed_conversation(&self, entries: Vec<ConversationEntry>) {
        *self.conversation.write() = entries;
    }

    /// Appends a conversation entry.
    pub fn push_entry(&self, role: impl Into<String>, content: impl Into<String>) {
        self.conversation.write().push(ConversationEntry::new(role, content));
    }

    /// A snapshot of the conversation.
    #[must_use]
    pub fn conversation(&self) -> Vec<ConversationEntry> {
        self.conversation.read().clone()
    }

    /// The stage currently executing.
    #[must_use]
    pub fn stage(&self) -> Stage {
        *self.current_stage.read()
    }

    /// Marks a stage as currently executing.
    pub fn enter_stage(&self, stage: Stage) {
        *self.current_stage.write() = stage;
    }

    /// The zero-based iteration counter.
    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration.load(Ordering::Acquire)
    }

    /// Increments the iteration counter, returning the new value.
    pub fn advance_iteration(&self) -> u32 {
        self.iteration.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Stores a stage-data value; last write wins.
    pub fn store(&self, key: impl Into<String>, value: serde_json::Value) {
        self.stage_data.write().insert(key.into(), value);
    }

    /// Loads a stage-data value.
    #[must_use]
    pub fn load(&self, key: &str) -> Option<serde_json::Value> {
        self.stage_data.read().get(key).cloned()
    }

    /// Whether a stage-data key has been stored this run.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.stage_data.read().contains_key(key)
    }

    /// All stage-data keys stored so far.
    #[must_use]
    pub fn stage_data_keys(&self) -> Vec<String> {
        self.stage_data.read().keys().cloned().collect()
    }

    /// Records the terminal response.
    ///
    /// # Errors
    ///
    /// Returns `ResponseConflictError` when a response is already set; the
    /// first response stays intact.
    pub fn set_response(
        &self,
        value: serde_json::Value,
        plugin: &str,
    ) -> Result<(), ResponseConflictError> {
        let mut response = self.response.write();
        if response.is_some() {
            return Err(ResponseConflictError::new(plugin));
        }
        *response = Some(value);
        Ok(())
    }

    /// Whether a terminal response has been set.
    #[must_use]
    pub fn has_response(&self) -> bool {
        self.response.read().is_some()
    }

    /// A copy of the terminal response, if set.
    #[must_use]
    pub fn response(&self) -> Option<serde_json::Value> {
        self.response.read().clone()
    }

    /// Records a plugin failure, replacing any earlier one.
    pub fn record_failure(&self, info: FailureInfo) {
        *self.failure_info.write() = Some(info);
    }

    /// The live failure record, if any.
    #[must_use]
    pub fn failure(&self) -> Option<FailureInfo> {
        self.failure_info.read().clone()
    }

    /// Queues a deferred tool call, returning its position in the queue.
    pub fn queue_tool_call(&self, name: impl Into<String>, params: serde_json::Value) -> usize {
        let mut queue = self.queued_tools.lock();
        queue.push(QueuedToolCall {
            name: name.into(),
            params,
        });
        queue.len() - 1
    }

    /// Takes every queued call, leaving the queue empty.
    #[must_use]
    pub fn drain_queued_calls(&self) -> Vec<QueuedToolCall> {
        std::mem::take(&mut *self.queued_tools.lock())
    }

    /// Discards queued calls without executing them.
    pub fn clear_queued_calls(&self) {
        self.queued_tools.lock().clear();
    }
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("run_id", &self.run_id)
            .field("user_id", &self.user_id)
            .field("pipeline_id", &self.pipeline_id)
            .field("stage", &self.stage())
            .field("iteration", &self.iteration())
            .field("has_response", &self.has_response())
            .finish()
    }
}
