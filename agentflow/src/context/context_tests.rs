//! Cross-module tests for the plugin context contract.

use std::sync::Arc;

use super::{PluginContext, RunState};
use crate::errors::EngineError;
use crate::events::{CollectingEventSink, EventSink, NoOpEventSink};
use crate::resources::{ResourceContainer, ResourceDescriptor, ResourceKind};
use crate::stages::Stage;
use crate::testing::{ScriptedResource, SharedInitLog};
use crate::tools::{FnTool, ToolRegistry};

fn context_for(stage: Stage, state: &Arc<RunState>, sink: Arc<dyn EventSink>) -> PluginContext {
    PluginContext::new(
        state.clone(),
        Arc::new(ResourceContainer::new()),
        Arc::new(ToolRegistry::new()),
        sink,
        "test_plugin",
        stage,
    )
}

#[test]
fn test_response_rejected_from_every_main_stage_but_deliver() {
    let state = Arc::new(RunState::new("u", "p"));

    for stage in [Stage::Parse, Stage::Think, Stage::Do, Stage::Review] {
        let ctx = context_for(stage, &state, Arc::new(NoOpEventSink));
        let err = ctx.set_response(serde_json::json!("nope")).unwrap_err();
        match err {
            EngineError::StagePermission(err) => {
                assert_eq!(err.stage, stage);
                assert_eq!(err.plugin, "test_plugin");
            }
            other => panic!("expected StagePermission, got {other}"),
        }
        assert!(!state.has_response());
    }
}

#[test]
fn test_response_allowed_from_deliver_and_error() {
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = context_for(Stage::Deliver, &state, Arc::new(NoOpEventSink));
    ctx.set_response(serde_json::json!("hi")).unwrap();
    assert!(ctx.has_response());

    let recovery_state = Arc::new(RunState::new("u", "p2"));
    let ctx = context_for(Stage::Error, &recovery_state, Arc::new(NoOpEventSink));
    ctx.set_response(serde_json::json!({"recovered": true})).unwrap();
    assert!(recovery_state.has_response());
}

#[test]
fn test_second_response_write_is_a_conflict() {
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = context_for(Stage::Deliver, &state, Arc::new(NoOpEventSink));

    ctx.set_response(serde_json::json!("first")).unwrap();
    let err = ctx.set_response(serde_json::json!("second")).unwrap_err();
    assert!(matches!(err, EngineError::ResponseConflict(_)));
    assert_eq!(state.response(), Some(serde_json::json!("first")));
}

#[test]
fn test_store_load_has_shared_across_contexts() {
    let state = Arc::new(RunState::new("u", "p"));
    let parse_ctx = context_for(Stage::Parse, &state, Arc::new(NoOpEventSink));
    let think_ctx = context_for(Stage::Think, &state, Arc::new(NoOpEventSink));

    assert!(!parse_ctx.has("intent"));
    parse_ctx.store("intent", serde_json::json!("greet"));

    assert!(think_ctx.has("intent"));
    assert_eq!(think_ctx.load("intent"), Some(serde_json::json!("greet")));
    assert_eq!(
        think_ctx.load_or("missing", serde_json::json!("fallback")),
        serde_json::json!("fallback")
    );
}

#[tokio::test]
async fn test_get_resource_refused_while_circuit_open() {
    let container = Arc::new(ResourceContainer::new());
    let log = SharedInitLog::default();
    container
        .register(
            ResourceDescriptor::new("db", ResourceKind::Database),
            Box::new(move || Arc::new(ScriptedResource::new("db", log.clone())) as _),
        )
        .unwrap();
    container.resolve().await.unwrap();

    let sink = Arc::new(CollectingEventSink::new());
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = PluginContext::new(
        state,
        container.clone(),
        Arc::new(ToolRegistry::new()),
        sink.clone(),
        "reader",
        Stage::Do,
    );

    // Closed circuit: lookup succeeds.
    assert!(ctx.get_resource("db").is_ok());

    container
        .breakers()
        .for_kind(ResourceKind::Database)
        .force_open();

    let err = ctx.get_resource("db").unwrap_err();
    assert!(matches!(err, EngineError::CircuitOpen(_)));
    assert_eq!(sink.events_of_type("resource.call_refused").len(), 1);
}

#[tokio::test]
async fn test_tool_use_emits_lifecycle_events() {
    let tools = Arc::new(ToolRegistry::new());
    tools.register(
        "shout",
        Arc::new(FnTool::new(|params| {
            let text = params.as_str().unwrap_or_default().to_uppercase();
            Ok(serde_json::json!(text))
        })),
    );

    let sink = Arc::new(CollectingEventSink::new());
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = PluginContext::new(
        state,
        Arc::new(ResourceContainer::new()),
        tools,
        sink.clone(),
        "shouter",
        Stage::Do,
    );

    let result = ctx.tool_use("shout", serde_json::json!("hi")).await.unwrap();
    assert_eq!(result, serde_json::json!("HI"));

    assert_eq!(sink.events_of_type("tool.invoked").len(), 1);
    assert_eq!(sink.events_of_type("tool.completed").len(), 1);

    let err = ctx.tool_use("missing", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Tool(_)));
    assert_eq!(sink.events_of_type("tool.failed").len(), 1);
}

#[test]
fn test_queue_tool_use_records_positions() {
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = context_for(Stage::Think, &state, Arc::new(NoOpEventSink));

    ctx.queue_tool_use("search", serde_json::json!({"q": "a"}));
    ctx.queue_tool_use("fetch", serde_json::json!({"url": "b"}));

    let calls = state.drain_queued_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].name, "search");
    assert_eq!(calls[1].name, "fetch");
}

#[test]
fn test_conversation_entries_append() {
    let state = Arc::new(RunState::new("u", "p"));
    let ctx = context_for(Stage::Parse, &state, Arc::new(NoOpEventSink));

    ctx.add_conversation_entry("user", "hello");
    ctx.add_conversation_entry("assistant", "hi there");

    let conversation = ctx.conversation();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].role, "user");
    assert_eq!(conversation[1].content, "hi there");
}
