//! End-to-end tests for the pipeline engine.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::events::CollectingEventSink;
use crate::memory::{ConversationMemory, InMemoryConversationStore, MockConversationMemory};
use crate::pipeline::{EngineBuilder, RunTermination};
use crate::stages::{PluginDescriptor, PluginKind, Stage};
use crate::testing::{FailingPlugin, FnPlugin, RecordingPlugin, RespondingPlugin};
use crate::tools::FnTool;

fn deliver_descriptor(name: &str) -> PluginDescriptor {
    PluginDescriptor::new(name, PluginKind::Adapter).with_stages([Stage::Deliver])
}

#[tokio::test]
async fn test_single_deliver_plugin_returns_after_one_iteration() {
    let config = EngineConfig::new().with_plugin(deliver_descriptor("greeter"));
    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(RespondingPlugin::new("greeter", serde_json::json!("hi"))))
        .build()
        .await
        .unwrap();

    let result = engine.execute("hello", "u1", "p1").await;

    assert_eq!(result.response, serde_json::json!("hi"));
    assert_eq!(result.termination, RunTermination::Success);
    assert_eq!(result.iterations, 1);
}

#[tokio::test]
async fn test_never_responding_run_terminates_at_the_ceiling() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("thinker", PluginKind::Prompt))
        .with_plugin(PluginDescriptor::new("recovery", PluginKind::Failure))
        .with_max_iterations(3);

    let thinker = Arc::new(RecordingPlugin::new("thinker"));
    let recovery = Arc::new(RecordingPlugin::new("recovery"));
    let engine = EngineBuilder::new(config)
        .plugin(thinker.clone())
        .plugin(recovery.clone())
        .build()
        .await
        .unwrap();

    let result = engine.execute("anyone there?", "u1", "p1").await;

    assert_eq!(result.termination, RunTermination::MaxIterations);
    assert_eq!(result.iterations, 3);
    // Exactly three full passes, then exactly one error-stage dispatch.
    assert_eq!(thinker.call_count(), 3);
    assert_eq!(
        thinker.calls().iter().map(|(_, i)| *i).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(recovery.call_count(), 1);
    assert_eq!(result.response["type"], "static_fallback");
}

#[tokio::test]
async fn test_queued_tools_complete_before_do_stage() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("planner", PluginKind::Prompt))
        .with_plugin(PluginDescriptor::new("adder", PluginKind::Tool))
        .with_plugin(deliver_descriptor("deliverer"));

    let planner = FnPlugin::new("planner", |ctx| {
        ctx.queue_tool_use("double", serde_json::json!(2));
        ctx.queue_tool_use("double", serde_json::json!(3));
        Ok(())
    });
    let adder = FnPlugin::new("adder", |ctx| {
        let a = ctx
            .load("tool:0:double")
            .ok_or_else(|| anyhow::anyhow!("first queued result missing before DO"))?;
        let b = ctx
            .load("tool:1:double")
            .ok_or_else(|| anyhow::anyhow!("second queued result missing before DO"))?;
        let sum = a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0);
        ctx.store("sum", serde_json::json!(sum));
        Ok(())
    });
    let deliverer = FnPlugin::new("deliverer", |ctx| {
        ctx.set_response(ctx.load_or("sum", serde_json::Value::Null))?;
        Ok(())
    });

    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(planner))
        .plugin(Arc::new(adder))
        .plugin(Arc::new(deliverer))
        .tool(
            "double",
            Arc::new(FnTool::new(|params| {
                Ok(serde_json::json!(params.as_i64().unwrap_or(0) * 2))
            })),
        )
        .build()
        .await
        .unwrap();

    let result = engine.execute("sum it", "u1", "p1").await;

    assert_eq!(result.termination, RunTermination::Success);
    assert_eq!(result.response, serde_json::json!(10));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_stage_data() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("marker", PluginKind::Prompt))
        .with_plugin(deliver_descriptor("echo_mark"));

    let marker = FnPlugin::new("marker", |ctx| {
        ctx.store("mark", serde_json::json!(ctx.pipeline_id()));
        Ok(())
    });
    let echo = FnPlugin::new("echo_mark", |ctx| {
        ctx.set_response(ctx.load_or("mark", serde_json::Value::Null))?;
        Ok(())
    });

    let engine = Arc::new(
        EngineBuilder::new(config)
            .plugin(Arc::new(marker))
            .plugin(Arc::new(echo))
            .build()
            .await
            .unwrap(),
    );

    let (left, right) = tokio::join!(
        engine.execute("m", "u1", "left"),
        engine.execute("m", "u1", "right"),
    );

    assert_eq!(left.response, serde_json::json!("left"));
    assert_eq!(right.response, serde_json::json!("right"));
}

#[tokio::test]
async fn test_plugin_failure_skips_rest_of_stage_and_terminates() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("boom", PluginKind::Tool))
        .with_plugin(PluginDescriptor::new("after", PluginKind::Tool))
        .with_plugin(PluginDescriptor::new("recovery", PluginKind::Failure));

    let after = Arc::new(RecordingPlugin::new("after"));
    let recovery = Arc::new(RecordingPlugin::new("recovery"));
    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(FailingPlugin::new("boom", "exploded")))
        .plugin(after.clone())
        .plugin(recovery.clone())
        .build()
        .await
        .unwrap();

    let result = engine.execute("go", "u1", "p1").await;

    assert_eq!(result.termination, RunTermination::Error);
    // The plugin registered after the failing one never ran.
    assert_eq!(after.call_count(), 0);
    assert_eq!(recovery.call_count(), 1);
    assert_eq!(result.response["type"], "static_fallback");
}

#[tokio::test]
async fn test_error_stage_sees_failure_and_produces_response() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("boom", PluginKind::Tool))
        .with_plugin(PluginDescriptor::new("recovery", PluginKind::Failure));

    let recovery = FnPlugin::new("recovery", |ctx| {
        let failure = ctx
            .failure()
            .ok_or_else(|| anyhow::anyhow!("no failure info on the error path"))?;
        ctx.set_response(serde_json::json!({
            "recovered_from": failure.plugin_name,
            "stage": failure.stage.as_str(),
        }))?;
        Ok(())
    });

    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(FailingPlugin::new("boom", "exploded")))
        .plugin(Arc::new(recovery))
        .build()
        .await
        .unwrap();

    let result = engine.execute("go", "u1", "p1").await;

    assert_eq!(result.termination, RunTermination::Error);
    assert_eq!(result.response["recovered_from"], "boom");
    assert_eq!(result.response["stage"], "do");
}

#[tokio::test]
async fn test_error_stage_failure_yields_exact_static_fallback() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("boom", PluginKind::Tool))
        .with_plugin(PluginDescriptor::new("bad_recovery", PluginKind::Failure));

    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(FailingPlugin::new("boom", "exploded")))
        .plugin(Arc::new(FailingPlugin::new("bad_recovery", "also exploded")))
        .build()
        .await
        .unwrap();

    let result = engine.execute("go", "u1", "p9").await;

    assert_eq!(result.termination, RunTermination::Error);
    assert_eq!(result.response["error"], "System error occurred");
    assert_eq!(
        result.response["message"],
        "An unexpected error prevented processing your request."
    );
    assert_eq!(result.response["pipeline_id"], "p9");
    assert_eq!(result.response["type"], "static_fallback");
    assert!(result.response["timestamp"].is_string());
}

#[tokio::test]
async fn test_conversation_round_trips_through_memory() {
    let store = Arc::new(InMemoryConversationStore::new());
    let config = EngineConfig::new().with_plugin(deliver_descriptor("chat"));

    let chat = FnPlugin::new("chat", |ctx| {
        ctx.add_conversation_entry("assistant", "noted");
        ctx.set_response(serde_json::json!("noted"))?;
        Ok(())
    });

    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(chat))
        .memory(store.clone())
        .build()
        .await
        .unwrap();

    engine.execute("first message", "alice", "chat").await;
    let saved = store.load_conversation("alice_chat").await.unwrap();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].role, "user");
    assert_eq!(saved[0].content, "first message");
    assert_eq!(saved[1].role, "assistant");

    // The next run sees the prior history and extends it.
    engine.execute("second message", "alice", "chat").await;
    let saved = store.load_conversation("alice_chat").await.unwrap();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved[2].content, "second message");
}

#[tokio::test]
async fn test_memory_load_failure_degrades_not_aborts() {
    let mut memory = MockConversationMemory::new();
    memory
        .expect_load_conversation()
        .returning(|_| Err(anyhow::anyhow!("store offline")));
    memory.expect_save_conversation().returning(|_, _| Ok(()));

    let config = EngineConfig::new().with_plugin(deliver_descriptor("greeter"));
    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(RespondingPlugin::new("greeter", serde_json::json!("hi"))))
        .memory(Arc::new(memory))
        .build()
        .await
        .unwrap();

    let result = engine.execute("hello", "u1", "p1").await;
    assert_eq!(result.termination, RunTermination::Success);
    assert_eq!(result.response, serde_json::json!("hi"));
}

#[tokio::test]
async fn test_plugin_and_pipeline_events_are_emitted() {
    let sink = Arc::new(CollectingEventSink::new());
    let config = EngineConfig::new().with_plugin(deliver_descriptor("greeter"));
    let engine = EngineBuilder::new(config)
        .plugin(Arc::new(RespondingPlugin::new("greeter", serde_json::json!("hi"))))
        .event_sink(sink.clone())
        .build()
        .await
        .unwrap();

    engine.execute("hello", "u1", "p1").await;

    assert_eq!(sink.events_of_type("pipeline.started").len(), 1);
    assert_eq!(sink.events_of_type("pipeline.completed").len(), 1);
    // One pass over the five main stages.
    assert_eq!(sink.events_of_type("stage.started").len(), 5);

    let completed = sink.events_of_type("plugin.completed");
    assert_eq!(completed.len(), 1);
    let payload = completed[0].1.as_ref().unwrap();
    assert_eq!(payload["plugin"], "greeter");
    assert_eq!(payload["stage"], "DELIVER");
    assert_eq!(payload["success"], true);
    assert!(payload["duration_ms"].is_number());
}

#[tokio::test]
async fn test_builder_rejects_duplicate_plugin_names() {
    let config = EngineConfig::new()
        .with_plugin(PluginDescriptor::new("twin", PluginKind::Tool))
        .with_plugin(PluginDescriptor::new("twin", PluginKind::Tool));

    let err = EngineBuilder::new(config).build().await.unwrap_err();
    match err {
        EngineError::ConfigValidation(err) => {
            assert_eq!(err.phase, "syntax");
            assert!(err.report().contains("duplicate plugin name"));
        }
        other => panic!("expected ConfigValidation, got {other}"),
    }
}

#[tokio::test]
async fn test_builder_rejects_descriptor_without_implementation() {
    let config = EngineConfig::new().with_plugin(PluginDescriptor::new("ghost", PluginKind::Tool));

    let err = EngineBuilder::new(config).build().await.unwrap_err();
    match err {
        EngineError::ConfigValidation(err) => {
            assert!(err.report().contains("ghost"));
            assert!(err.report().contains("no implementation registered"));
        }
        other => panic!("expected ConfigValidation, got {other}"),
    }
}

#[tokio::test]
async fn test_builder_rejects_resource_cycles_before_startup() {
    use crate::resources::{ResourceDescriptor, ResourceKind};

    let config = EngineConfig::new()
        .with_resource(ResourceDescriptor::new("a", ResourceKind::Other).with_dependency("b"))
        .with_resource(ResourceDescriptor::new("b", ResourceKind::Other).with_dependency("a"));

    let err = EngineBuilder::new(config).build().await.unwrap_err();
    match err {
        EngineError::ConfigValidation(err) => {
            assert_eq!(err.phase, "dependency");
            assert!(err.report().contains("circular"));
        }
        other => panic!("expected ConfigValidation, got {other}"),
    }
}
